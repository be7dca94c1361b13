//! Error types for model loading, feature validation and request handling

use std::path::PathBuf;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures while resolving or decoding the clustering pipeline file.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("clustering pipeline not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read clustering pipeline: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode clustering pipeline: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid clustering pipeline: {0}")]
    Invalid(String),
}

/// Validation failures raised while aligning an upload with the model's features.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlignError {
    #[error("No numeric data found in the uploaded file.")]
    NoNumericData,
    #[error("The following required features are missing: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
    #[error("Feature '{column}' has {count} empty value(s); every required feature must be filled in")]
    MissingValues { column: String, count: usize },
    #[error("Feature '{column}' has {count} value(s) that are NaN or infinite")]
    NonFiniteValues { column: String, count: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("aligned features {found:?} do not match the model features {expected:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("feature matrix has {found} columns but the model expects {expected}")]
    ShapeMismatch { expected: usize, found: usize },
}

/// Errors surfaced at the request boundary. Every variant becomes a
/// human-readable response; none of them bring the process down.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Please upload a CSV file.")]
    NoFileProvided,
    #[error("failed to read upload: {0}")]
    Upload(String),
    #[error("The uploaded file is too large: {0}")]
    PayloadTooLarge(String),
    #[error("Could not parse the uploaded file: {0}")]
    ParseFailure(String),
    #[error(transparent)]
    Validation(#[from] AlignError),
    #[error("Clustering pipeline not loaded.")]
    ModelUnavailable,
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("failed to aggregate results: {0}")]
    Aggregation(String),
    #[error("Clustered file not found. Please upload and process a dataset first.")]
    ResultNotFound,
    #[error("failed to store results: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<polars::prelude::PolarsError> for AppError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        AppError::ParseFailure(e.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::Upload(e.body_text())
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoFileProvided | AppError::Upload(_) | AppError::ParseFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ResultNotFound => StatusCode::NOT_FOUND,
            AppError::Inference(_) | AppError::Aggregation(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected: {}", self);
        }
        (status, format!("Error: {}", self)).into_response()
    }
}
