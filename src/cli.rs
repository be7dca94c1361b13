//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Label CSV data with a pre-trained clustering pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the web service (the default when no command is given)
    Serve {
        /// Path to the clustering pipeline, overriding MODEL_PATH
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Address to bind, as host:port
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Label a local CSV file and print the cluster summary
    Score {
        /// Path to the input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Where to copy the labeled CSV
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path to the clustering pipeline, overriding MODEL_PATH
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Directory to write SVG charts into
        #[arg(long)]
        charts: Option<PathBuf>,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            model: None,
            address: None,
        })
    }

    /// Apply command-line overrides on top of the environment configuration
    pub fn apply_overrides(&self, config: &mut Config) -> crate::Result<()> {
        match self.command() {
            Command::Serve { model, address } => {
                if let Some(model) = model {
                    config.model_path = Some(model);
                }
                if let Some(address) = address {
                    let (host, port) = parse_address(&address)?;
                    config.host = host;
                    config.port = port;
                }
            }
            Command::Score { model, .. } => {
                if let Some(model) = model {
                    config.model_path = Some(model);
                }
            }
        }
        if self.verbose {
            config.debug = true;
        }
        Ok(())
    }
}

/// Split "host:port"; the port is taken after the last colon
fn parse_address(address: &str) -> crate::Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Address must be in format 'host:port': {}", address))?;

    if host.is_empty() {
        anyhow::bail!("Address is missing a host: {}", address);
    }

    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid port: {}", port))?;

    Ok((host.to_string(), port))
}
