//! Cluster charts rendered to SVG with Plotters

use std::collections::BTreeMap;

use plotters::prelude::*;

use crate::align::AlignedFeatures;
use crate::inference::ClusterAssignment;
use crate::model::ClusterLabel;

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

/// Box plots get crowded beyond this many features
const MAX_SPREAD_FEATURES: usize = 6;

/// Rendered SVG documents for one processed upload
#[derive(Debug, Clone, Default)]
pub struct ChartSet {
    /// Absent when fewer than two features are available
    pub scatter: Option<String>,
    pub distribution: String,
    pub spread: String,
}

/// Render the scatter, distribution and spread charts
pub fn render_charts(
    aligned: &AlignedFeatures,
    assignment: &ClusterAssignment,
) -> crate::Result<ChartSet> {
    let sizes = assignment.cluster_sizes();
    if sizes.is_empty() {
        anyhow::bail!("no rows to chart");
    }

    Ok(ChartSet {
        scatter: create_cluster_scatter(aligned, assignment, &sizes)?,
        distribution: create_cluster_size_chart(&sizes)?,
        spread: create_feature_spread_chart(aligned, assignment, &sizes)?,
    })
}

fn cluster_style(idx: usize) -> ShapeStyle {
    match CLUSTER_COLORS.get(idx) {
        Some(color) => color.mix(0.7).filled(),
        None => Palette99::pick(idx).mix(0.7).filled(),
    }
}

/// Min and max of `values`, widened by 5% (or 1.0 for a flat range)
fn padded_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
    (min - pad, max + pad)
}

/// Standardize a column over all rows; a constant column maps to zeros
fn z_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    values
        .iter()
        .map(|v| if std > 0.0 { (v - mean) / std } else { 0.0 })
        .collect()
}

/// Scatter plot of the first two features, colored by cluster
fn create_cluster_scatter(
    aligned: &AlignedFeatures,
    assignment: &ClusterAssignment,
    sizes: &BTreeMap<ClusterLabel, usize>,
) -> crate::Result<Option<String>> {
    if aligned.features.len() < 2 {
        return Ok(None);
    }

    let xs = aligned.values.column(0);
    let ys = aligned.values.column(1);
    let (x_min, x_max) = padded_bounds(xs.iter().copied());
    let (y_min, y_max) = padded_bounds(ys.iter().copied());

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (800, 600)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Cluster Visualization", ("sans-serif", 30))
            .margin(10)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

        chart
            .configure_mesh()
            .x_desc(&aligned.features[0])
            .y_desc(&aligned.features[1])
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        for (idx, &label) in sizes.keys().enumerate() {
            let style = cluster_style(idx);
            let points: Vec<(f64, f64)> = assignment
                .labels
                .iter()
                .zip(xs.iter().zip(ys.iter()))
                .filter(|&(&row_label, _)| row_label == label)
                .map(|(_, (&x, &y))| (x, y))
                .collect();

            chart
                .draw_series(points.into_iter().map(move |p| Circle::new(p, 4, style)))?
                .label(format!("Cluster {}", label))
                .legend(move |(x, y)| Circle::new((x, y), 4, style));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        root.present()?;
    }

    Ok(Some(svg))
}

/// Bar chart of row counts per cluster
fn create_cluster_size_chart(sizes: &BTreeMap<ClusterLabel, usize>) -> crate::Result<String> {
    let labels: Vec<ClusterLabel> = sizes.keys().copied().collect();
    let max_size = sizes.values().copied().max().unwrap_or(1) as u32;
    let n_clusters = labels.len() as u32;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (600, 400)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Cluster Sizes", ("sans-serif", 30))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(
                (0u32..n_clusters).into_segmented(),
                0u32..(max_size + max_size / 10 + 1),
            )?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc("Cluster")
            .y_desc("Rows")
            .x_label_formatter(&|value| match value {
                SegmentValue::CenterOf(idx) => labels
                    .get(*idx as usize)
                    .map(|label| label.to_string())
                    .unwrap_or_default(),
                _ => String::new(),
            })
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        for (idx, &size) in sizes.values().enumerate() {
            let idx = idx as u32;
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (SegmentValue::Exact(idx), 0),
                    (SegmentValue::Exact(idx + 1), size as u32),
                ],
                cluster_style(idx as usize),
            )))?;
        }

        root.present()?;
    }

    Ok(svg)
}

/// Box plot per cluster of standardized feature values
fn create_feature_spread_chart(
    aligned: &AlignedFeatures,
    assignment: &ClusterAssignment,
    sizes: &BTreeMap<ClusterLabel, usize>,
) -> crate::Result<String> {
    let cluster_names: Vec<String> = sizes.keys().map(|label| format!("Cluster {}", label)).collect();
    let n_features = aligned.features.len().min(MAX_SPREAD_FEATURES);

    // (feature index, cluster index) -> standardized values
    let mut groups: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); sizes.len()]; n_features];
    let mut all_values = Vec::new();
    for (feature_idx, feature_groups) in groups.iter_mut().enumerate() {
        let column = aligned.values.column(feature_idx).to_vec();
        for (&label, z) in assignment.labels.iter().zip(z_scores(&column)) {
            if let Some(cluster_idx) = sizes.keys().position(|&l| l == label) {
                feature_groups[cluster_idx].push(z);
                all_values.push(z);
            }
        }
    }
    let (lo, hi) = padded_bounds(all_values.into_iter());

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (800, 600)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Feature Spread by Cluster", ("sans-serif", 30))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(cluster_names[..].into_segmented(), (lo as f32)..(hi as f32))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .y_desc("Standardized value")
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        let box_width = (60 / n_features.max(1)).max(6) as u32;
        let center = (n_features as f64 - 1.0) / 2.0;
        for (feature_idx, feature_groups) in groups.iter().enumerate() {
            let style = Palette99::pick(feature_idx).stroke_width(2);
            let offset = (feature_idx as f64 - center) * f64::from(box_width + 4);
            let boxes: Vec<_> = feature_groups
                .iter()
                .zip(cluster_names.iter())
                .filter(|(values, _)| !values.is_empty())
                .map(|(values, name)| {
                    Boxplot::new_vertical(SegmentValue::CenterOf(name), &Quartiles::new(values))
                        .width(box_width)
                        .whisker_width(0.5)
                        .style(style)
                        .offset(offset)
                })
                .collect();

            chart
                .draw_series(boxes)?
                .label(aligned.features[feature_idx].clone())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], style.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        root.present()?;
    }

    Ok(svg)
}
