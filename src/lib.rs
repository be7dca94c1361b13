//! clusterlens: label uploaded CSV data with a pre-trained clustering pipeline
//!
//! An upload is parsed, its numeric columns are aligned with the features the
//! pipeline was fit on, every row is assigned a cluster, and the labeled file
//! is stored alongside a per-cluster summary and optional charts.

pub mod aggregate;
pub mod align;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod views;
pub mod viz;

// Re-export public items for easier access
pub use aggregate::{aggregate, summarize, summarize_labeled, ClusterSummary, LABEL_COLUMN};
pub use align::{align, AlignedFeatures};
pub use cli::Args;
pub use data::{ColumnSchema, UploadedDataset};
pub use error::{AlignError, AppError, InferenceError, ModelError};
pub use inference::{predict, ClusterAssignment};
pub use model::{ClusterModel, ClusteringPipeline, ModelState};
pub use pipeline::{process_upload, ProcessOptions, ProcessOutcome};
pub use store::{ResultRecord, ResultStore};
pub use viz::render_charts;

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
