//! Apply a loaded clustering model to an aligned feature table

use std::collections::BTreeMap;

use crate::align::AlignedFeatures;
use crate::error::InferenceError;
use crate::model::{ClusterLabel, ClusterModel};

/// One label per aligned row, same row order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub labels: Vec<ClusterLabel>,
}

impl ClusterAssignment {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row count per label, ascending by label
    pub fn cluster_sizes(&self) -> BTreeMap<ClusterLabel, usize> {
        let mut sizes = BTreeMap::new();
        for &label in &self.labels {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }
}

/// Run the model over `aligned`. Deterministic for a deterministic model.
pub fn predict(
    aligned: &AlignedFeatures,
    model: &dyn ClusterModel,
) -> Result<ClusterAssignment, InferenceError> {
    let expected = model.feature_names();
    if aligned.features.as_slice() != expected {
        return Err(InferenceError::FeatureMismatch {
            expected: expected.to_vec(),
            found: aligned.features.clone(),
        });
    }
    if aligned.values.ncols() != expected.len() {
        return Err(InferenceError::ShapeMismatch {
            expected: expected.len(),
            found: aligned.values.ncols(),
        });
    }

    let labels = model.predict(aligned.values.view())?;
    tracing::debug!("assigned {} rows", labels.len());
    Ok(ClusterAssignment { labels })
}
