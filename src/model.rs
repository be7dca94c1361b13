//! Pre-fit clustering pipeline: loading, path resolution and nearest-centroid prediction

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{InferenceError, ModelError};

/// Location used when neither an override nor a search path yields a file.
pub const DEFAULT_MODEL_PATH: &str = "./models/clustering_pipeline.json";

/// Integer label assigned to a row by a clustering model.
pub type ClusterLabel = u32;

/// A pre-fit clustering model.
///
/// Implementations are immutable once constructed and shared read-only
/// across requests.
pub trait ClusterModel: Send + Sync {
    /// Ordered feature names the model was fit on.
    fn feature_names(&self) -> &[String];

    /// Assign one label per row. Columns must follow `feature_names` order.
    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<ClusterLabel>, InferenceError>;
}

/// Per-feature standardization fitted at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Standardize each row as `(x - mean) / scale`. A zero scale leaves the
    /// centred value unscaled, matching how constant features are fitted.
    pub fn transform(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(
            self.scale
                .iter()
                .map(|&s| if s == 0.0 { 1.0 } else { s })
                .collect::<Vec<_>>(),
        );
        (&features - &mean) / &scale
    }
}

/// On-disk representation of a clustering pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub centroids: Vec<Vec<f64>>,
}

/// Scaler followed by nearest-centroid assignment
#[derive(Debug, Clone)]
pub struct ClusteringPipeline {
    feature_names: Vec<String>,
    scaler: Option<StandardScaler>,
    /// Cluster centroids in scaled space, shape (n_clusters, n_features)
    centroids: Array2<f64>,
}

impl ClusteringPipeline {
    pub fn new(
        feature_names: Vec<String>,
        scaler: Option<StandardScaler>,
        centroids: Vec<Vec<f64>>,
    ) -> Result<Self, ModelError> {
        let n_features = feature_names.len();
        if n_features == 0 {
            return Err(ModelError::Invalid("no feature names".to_string()));
        }

        let mut seen = HashSet::new();
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ModelError::Invalid(format!("duplicate feature '{}'", name)));
            }
        }

        if centroids.is_empty() {
            return Err(ModelError::Invalid("no centroids".to_string()));
        }

        if let Some(ref scaler) = scaler {
            if scaler.mean.len() != n_features || scaler.scale.len() != n_features {
                return Err(ModelError::Invalid(format!(
                    "scaler has {} means and {} scales for {} features",
                    scaler.mean.len(),
                    scaler.scale.len(),
                    n_features
                )));
            }
            if !scaler.mean.iter().chain(&scaler.scale).all(|v| v.is_finite()) {
                return Err(ModelError::Invalid("scaler contains non-finite values".to_string()));
            }
        }

        let n_clusters = centroids.len();
        let mut flat = Vec::with_capacity(n_clusters * n_features);
        for (idx, centroid) in centroids.into_iter().enumerate() {
            if centroid.len() != n_features {
                return Err(ModelError::Invalid(format!(
                    "centroid {} has {} values, expected {}",
                    idx,
                    centroid.len(),
                    n_features
                )));
            }
            if !centroid.iter().all(|v| v.is_finite()) {
                return Err(ModelError::Invalid(format!(
                    "centroid {} contains non-finite values",
                    idx
                )));
            }
            flat.extend(centroid);
        }

        let centroids = Array2::from_shape_vec((n_clusters, n_features), flat)
            .map_err(|e| ModelError::Invalid(e.to_string()))?;

        Ok(Self {
            feature_names,
            scaler,
            centroids,
        })
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }
}

impl TryFrom<PipelineFile> for ClusteringPipeline {
    type Error = ModelError;

    fn try_from(file: PipelineFile) -> Result<Self, Self::Error> {
        ClusteringPipeline::new(file.feature_names, file.scaler, file.centroids)
    }
}

impl ClusterModel for ClusteringPipeline {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<ClusterLabel>, InferenceError> {
        if features.ncols() != self.feature_names.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: self.feature_names.len(),
                found: features.ncols(),
            });
        }

        let scaled = match self.scaler {
            Some(ref scaler) => scaler.transform(features),
            None => features.to_owned(),
        };

        let labels = scaled
            .axis_iter(Axis(0))
            .map(|row| {
                // Find nearest centroid
                let mut min_distance = f64::INFINITY;
                let mut closest_cluster = 0;

                for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
                    let distance: f64 = row
                        .iter()
                        .zip(centroid.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum();

                    if distance < min_distance {
                        min_distance = distance;
                        closest_cluster = cluster_idx;
                    }
                }

                closest_cluster as ClusterLabel
            })
            .collect();

        Ok(labels)
    }
}

/// Where a model path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSource {
    Override,
    Search,
    Default,
}

impl fmt::Display for PathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSource::Override => write!(f, "override"),
            PathSource::Search => write!(f, "search path"),
            PathSource::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModelPath {
    pub path: PathBuf,
    pub source: PathSource,
}

/// Resolve the pipeline location: explicit override, else the first existing
/// search path, else `default`.
pub fn resolve_model_path(
    override_path: Option<&Path>,
    search_paths: &[PathBuf],
    default: &Path,
) -> ResolvedModelPath {
    if let Some(path) = override_path {
        tracing::info!("using model path override: {}", path.display());
        return ResolvedModelPath {
            path: path.to_path_buf(),
            source: PathSource::Override,
        };
    }

    if let Some(path) = search_paths.iter().find(|p| p.is_file()) {
        tracing::info!("model found on search path: {}", path.display());
        return ResolvedModelPath {
            path: path.clone(),
            source: PathSource::Search,
        };
    }

    tracing::warn!(
        "model search failed, using fallback path: {}",
        default.display()
    );
    ResolvedModelPath {
        path: default.to_path_buf(),
        source: PathSource::Default,
    }
}

/// Read and validate a clustering pipeline file
pub fn load(path: &Path) -> Result<ClusteringPipeline, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read(path)?;
    let file: PipelineFile = serde_json::from_slice(&contents)?;
    ClusteringPipeline::try_from(file)
}

/// Process-wide model handle. Holds no model when loading failed, in which
/// case requests report the model as unavailable.
#[derive(Clone)]
pub struct ModelState {
    model: Option<Arc<dyn ClusterModel>>,
    resolved: ResolvedModelPath,
    load_error: Option<String>,
}

impl ModelState {
    /// Resolve and load the model described by `config`. Never fails.
    pub fn load(config: &Config) -> Self {
        let resolved = resolve_model_path(
            config.model_path.as_deref(),
            &config.model_search_paths.0,
            Path::new(DEFAULT_MODEL_PATH),
        );

        match load(&resolved.path) {
            Ok(pipeline) => {
                tracing::info!(
                    "clustering pipeline loaded from {} ({} features, {} clusters)",
                    resolved.path.display(),
                    pipeline.feature_names().len(),
                    pipeline.n_clusters()
                );
                Self {
                    model: Some(Arc::new(pipeline)),
                    resolved,
                    load_error: None,
                }
            }
            Err(e) => {
                tracing::error!("failed to load clustering pipeline: {}", e);
                Self {
                    model: None,
                    resolved,
                    load_error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn from_model(model: Arc<dyn ClusterModel>, path: PathBuf) -> Self {
        Self {
            model: Some(model),
            resolved: ResolvedModelPath {
                path,
                source: PathSource::Override,
            },
            load_error: None,
        }
    }

    pub fn unavailable(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            model: None,
            resolved: ResolvedModelPath {
                path,
                source: PathSource::Default,
            },
            load_error: Some(reason.into()),
        }
    }

    pub fn model(&self) -> Option<&dyn ClusterModel> {
        self.model.as_deref()
    }

    pub fn resolved(&self) -> &ResolvedModelPath {
        &self.resolved
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn create_test_pipeline() -> ClusteringPipeline {
        ClusteringPipeline::new(
            names(&["A", "B"]),
            None,
            vec![vec![1.5, 1.5], vec![10.0, 10.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_nearest_centroid() {
        let pipeline = create_test_pipeline();
        let features = array![[1.0, 1.0], [2.0, 2.0], [10.0, 10.0]];

        let labels = pipeline.predict(features.view()).unwrap();
        assert_eq!(labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_predict_applies_scaler() {
        // Scaled: (x - 100) / 10, so 90 -> -1 and 110 -> 1
        let scaler = StandardScaler {
            mean: vec![100.0],
            scale: vec![10.0],
        };
        let pipeline =
            ClusteringPipeline::new(names(&["A"]), Some(scaler), vec![vec![-1.0], vec![1.0]])
                .unwrap();

        let labels = pipeline.predict(array![[90.0], [110.0], [95.0]].view()).unwrap();
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[test]
    fn test_zero_scale_is_not_divided() {
        let scaler = StandardScaler {
            mean: vec![5.0],
            scale: vec![0.0],
        };
        let scaled = scaler.transform(array![[7.0]].view());
        assert_eq!(scaled[[0, 0]], 2.0);
    }

    #[test]
    fn test_predict_ties_go_to_lowest_label() {
        let pipeline =
            ClusteringPipeline::new(names(&["A"]), None, vec![vec![0.0], vec![2.0]]).unwrap();
        assert_eq!(pipeline.predict(array![[1.0]].view()).unwrap(), vec![0]);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let pipeline = create_test_pipeline();
        let result = pipeline.predict(array![[1.0, 2.0, 3.0]].view());
        assert_eq!(
            result,
            Err(InferenceError::ShapeMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_invalid_pipelines() {
        assert!(ClusteringPipeline::new(vec![], None, vec![vec![1.0]]).is_err());
        assert!(ClusteringPipeline::new(names(&["A", "A"]), None, vec![vec![1.0, 1.0]]).is_err());
        assert!(ClusteringPipeline::new(names(&["A"]), None, vec![]).is_err());
        assert!(ClusteringPipeline::new(names(&["A"]), None, vec![vec![1.0, 2.0]]).is_err());
        assert!(ClusteringPipeline::new(names(&["A"]), None, vec![vec![f64::NAN]]).is_err());

        let scaler = StandardScaler {
            mean: vec![0.0, 0.0],
            scale: vec![1.0],
        };
        assert!(ClusteringPipeline::new(names(&["A"]), Some(scaler), vec![vec![1.0]]).is_err());
    }

    #[test]
    fn test_load_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"feature_names": ["Recency", "Frequency"],
                "scaler": {{"mean": [10.0, 2.0], "scale": [5.0, 1.0]}},
                "centroids": [[0.0, 0.0], [1.0, 1.0], [-1.0, -1.0]]}}"#
        )
        .unwrap();

        let pipeline = load(file.path()).unwrap();
        assert_eq!(pipeline.feature_names(), &names(&["Recency", "Frequency"])[..]);
        assert_eq!(pipeline.n_clusters(), 3);
        assert_eq!(pipeline.centroids().shape(), &[3, 2]);
    }

    #[test]
    fn test_load_without_scaler() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"feature_names": ["A"], "centroids": [[1.0]]}}"#).unwrap();

        assert!(load(file.path()).is_ok());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load(&missing), Err(ModelError::NotFound(_))));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(load(file.path()), Err(ModelError::Decode(_))));
    }

    #[test]
    fn test_resolve_prefers_override() {
        let dir = tempdir().unwrap();
        let found = dir.path().join("found.json");
        std::fs::write(&found, "{}").unwrap();

        let resolved = resolve_model_path(
            Some(Path::new("/custom/model.json")),
            &[found],
            Path::new(DEFAULT_MODEL_PATH),
        );
        assert_eq!(resolved.path, PathBuf::from("/custom/model.json"));
        assert_eq!(resolved.source, PathSource::Override);
    }

    #[test]
    fn test_resolve_search_then_default() {
        let dir = tempdir().unwrap();
        let absent = dir.path().join("absent.json");
        let found = dir.path().join("found.json");
        std::fs::write(&found, "{}").unwrap();

        let resolved = resolve_model_path(
            None,
            &[absent.clone(), found.clone()],
            Path::new(DEFAULT_MODEL_PATH),
        );
        assert_eq!(resolved.path, found);
        assert_eq!(resolved.source, PathSource::Search);

        let resolved = resolve_model_path(None, &[absent], Path::new(DEFAULT_MODEL_PATH));
        assert_eq!(resolved.path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(resolved.source, PathSource::Default);
    }

    #[test]
    fn test_model_state_degrades_when_missing() {
        let dir = tempdir().unwrap();
        let mut config = Config::default_for_tests();
        config.model_path = Some(dir.path().join("missing.json"));

        let state = ModelState::load(&config);
        assert!(state.model().is_none());
        assert!(state.load_error().is_some());
        assert_eq!(state.resolved().source, PathSource::Override);
    }
}
