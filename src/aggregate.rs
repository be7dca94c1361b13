//! Merge cluster labels back onto uploads and compute per-cluster means

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use serde::Serialize;

use crate::align::AlignedFeatures;
use crate::data::UploadedDataset;
use crate::error::AppError;
use crate::inference::ClusterAssignment;
use crate::model::ClusterLabel;

/// Name of the column appended to labeled datasets
pub const LABEL_COLUMN: &str = "Cluster";

/// Original upload plus the label column, same row order
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    pub frame: DataFrame,
    pub source_name: String,
}

/// Mean feature values of one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub label: ClusterLabel,
    pub count: usize,
    /// One mean per feature, in summary feature order
    pub means: Vec<f64>,
}

/// Per-cluster feature means, ascending by label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub features: Vec<String>,
    pub clusters: Vec<ClusterStats>,
}

impl ClusterSummary {
    pub fn get(&self, label: ClusterLabel) -> Option<&ClusterStats> {
        self.clusters.iter().find(|stats| stats.label == label)
    }

    /// Mean of `feature` within cluster `label`
    pub fn mean(&self, label: ClusterLabel, feature: &str) -> Option<f64> {
        let idx = self.features.iter().position(|f| f == feature)?;
        self.get(label).map(|stats| stats.means[idx])
    }

    pub fn total_rows(&self) -> usize {
        self.clusters.iter().map(|stats| stats.count).sum()
    }
}

/// Attach `assignment` to `dataset` and summarize the aligned features by label
pub fn aggregate(
    dataset: UploadedDataset,
    aligned: &AlignedFeatures,
    assignment: &ClusterAssignment,
) -> Result<(LabeledDataset, ClusterSummary), AppError> {
    if assignment.len() != dataset.height() || assignment.len() != aligned.n_rows() {
        return Err(AppError::Aggregation(format!(
            "{} labels for {} rows",
            assignment.len(),
            dataset.height()
        )));
    }

    let mut frame = dataset.frame;
    // Replaces any existing column with the same name
    frame.with_column(Series::new(LABEL_COLUMN, assignment.labels.clone()))?;

    let summary = summarize(&aligned.features, aligned.values.view(), &assignment.labels);

    Ok((
        LabeledDataset {
            frame,
            source_name: dataset.source_name,
        },
        summary,
    ))
}

/// Group rows of `values` by label and average each feature within the group
pub fn summarize(
    features: &[String],
    values: ArrayView2<'_, f64>,
    labels: &[ClusterLabel],
) -> ClusterSummary {
    let n_features = features.len();
    let mut groups: BTreeMap<ClusterLabel, (usize, Vec<f64>)> = BTreeMap::new();

    for (row, &label) in values.outer_iter().zip(labels) {
        let (count, sums) = groups
            .entry(label)
            .or_insert_with(|| (0, vec![0.0; n_features]));
        *count += 1;
        for (sum, value) in sums.iter_mut().zip(row.iter()) {
            *sum += value;
        }
    }

    let clusters = groups
        .into_iter()
        .map(|(label, (count, sums))| ClusterStats {
            label,
            count,
            means: sums.into_iter().map(|sum| sum / count as f64).collect(),
        })
        .collect();

    ClusterSummary {
        features: features.to_vec(),
        clusters,
    }
}

/// Re-aggregate a frame that already carries a label column
pub fn summarize_labeled(
    frame: &DataFrame,
    features: &[String],
    label_column: &str,
) -> Result<ClusterSummary, AppError> {
    let labels: Vec<ClusterLabel> = frame
        .column(label_column)?
        .cast(&DataType::UInt32)?
        .u32()?
        .into_iter()
        .map(|label| {
            label.ok_or_else(|| {
                AppError::Aggregation(format!("column '{}' has empty labels", label_column))
            })
        })
        .collect::<Result<_, _>>()?;

    let mut values = Array2::<f64>::zeros((frame.height(), features.len()));
    for (col_idx, feature) in features.iter().enumerate() {
        let column = frame.column(feature)?.cast(&DataType::Float64)?;
        for (row_idx, value) in column.f64()?.into_iter().enumerate() {
            values[[row_idx, col_idx]] = value.unwrap_or(f64::NAN);
        }
    }

    Ok(summarize(features, values.view(), &labels))
}
