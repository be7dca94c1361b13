//! clusterlens entrypoint: runs the web service or scores a local file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use envconfig::Envconfig;
use tokio::signal;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use clusterlens::cli::Command;
use clusterlens::config::Config;
use clusterlens::server::serve;
use clusterlens::{process_upload, Args, ModelState, ProcessOptions, ResultStore};

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_layer = fmt::layer().with_target(true).with_level(true);

    let log_layer = if debug {
        base_layer
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_filter(filter)
            .boxed()
    } else {
        base_layer.json().with_filter(filter).boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::init_from_env().context("Invalid configuration")?;
    args.apply_overrides(&mut config)?;

    init_tracing(config.debug);

    match args.command() {
        Command::Serve { .. } => run_server(config).await,
        Command::Score {
            input,
            output,
            charts,
            ..
        } => run_score(&config, &input, output.as_deref(), charts.as_deref()),
    }
}

async fn run_server(config: Config) -> Result<()> {
    tracing::info!("starting clusterlens");

    // A missing model degrades the service instead of stopping it
    let model = ModelState::load(&config);

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .with_context(|| format!("could not bind {}", config.bind()))?;
    serve(config, model, listener, shutdown()).await;
    Ok(())
}

/// Label a local file and print the cluster summary
fn run_score(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
    charts_dir: Option<&Path>,
) -> Result<()> {
    let model = ModelState::load(config);
    if model.model().is_none() {
        anyhow::bail!(
            "Clustering pipeline not loaded from {}",
            model.resolved().path.display()
        );
    }

    let bytes = std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let source_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("input.csv");

    let store = ResultStore::new(&config.output_dir).with_retention(config.result_retention);
    let outcome = process_upload(
        &bytes,
        source_name,
        model.model(),
        &store,
        ProcessOptions {
            render_charts: charts_dir.is_some(),
        },
    )?;

    println!("=== Cluster Summary ===");
    println!("Rows labeled: {}", outcome.record.rows);
    if outcome.skipped_rows > 0 {
        println!("Malformed rows skipped: {}", outcome.skipped_rows);
    }
    for column in &outcome.schema.dropped {
        println!("Ignored non-numeric column: {}", column.name);
    }

    print!("{:>8} | {:>6}", "Cluster", "Rows");
    for feature in &outcome.summary.features {
        print!(" | {:>12}", feature);
    }
    println!();
    for stats in &outcome.summary.clusters {
        print!("{:>8} | {:>6}", stats.label, stats.count);
        for mean in &stats.means {
            print!(" | {:>12.4}", mean);
        }
        println!();
    }

    if let Some(output) = output {
        std::fs::copy(&outcome.record.path, output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("\nLabeled data saved to: {}", output.display());
    } else {
        println!("\nLabeled data saved to: {}", outcome.record.path.display());
    }

    if let (Some(dir), Some(charts)) = (charts_dir, outcome.charts.as_ref()) {
        std::fs::create_dir_all(dir)?;
        if let Some(ref scatter) = charts.scatter {
            std::fs::write(dir.join("cluster_scatter.svg"), scatter)?;
        }
        std::fs::write(dir.join("cluster_sizes.svg"), &charts.distribution)?;
        std::fs::write(dir.join("feature_spread.svg"), &charts.spread)?;
        println!("Charts saved to: {}", dir.display());
    }

    Ok(())
}
