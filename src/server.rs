//! HTTP routes: upload form, processing, result download and health

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::model::{ModelState, PathSource};
use crate::pipeline::{process_upload, ProcessOptions};
use crate::store::{ResultRecord, ResultStore};
use crate::views;

#[derive(Clone)]
pub struct AppState {
    pub model: ModelState,
    pub store: Arc<ResultStore>,
    pub options: ProcessOptions,
}

impl AppState {
    pub fn new(model: ModelState, store: ResultStore, options: ProcessOptions) -> Self {
        Self {
            model,
            store: Arc::new(store),
            options,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index).post(upload))
        .route("/download", get(download_latest))
        .route("/download/:id", get(download_by_id))
        .route("/_health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(config: Config, model: ModelState, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(
        model,
        ResultStore::new(&config.output_dir).with_retention(config.result_retention),
        ProcessOptions {
            render_charts: config.render_charts,
        },
    );
    let app = router(state, config.max_upload_bytes);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {}", addr),
        Err(e) => tracing::warn!("listening on unknown address: {}", e),
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("server error: {}", e);
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(views::upload_page(state.model.model().is_some()))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = match upload {
        Some((file_name, bytes)) if !(file_name.is_empty() && bytes.is_empty()) => {
            (file_name, bytes)
        }
        _ => {
            tracing::error!("no file uploaded");
            return Err(AppError::NoFileProvided);
        }
    };

    tracing::info!("uploaded file: {} ({} bytes)", file_name, bytes.len());

    let outcome = tokio::task::spawn_blocking(move || {
        process_upload(
            &bytes,
            &file_name,
            state.model.model(),
            &state.store,
            state.options,
        )
    })
    .await
    .map_err(|e| AppError::Aggregation(format!("processing task failed: {}", e)))??;

    Ok(Html(views::results_page(&outcome)))
}

async fn send_result(record: ResultRecord) -> Result<Response, AppError> {
    let contents = match tokio::fs::read(&record.path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!("clustered file not found: {}", record.path.display());
            return Err(AppError::ResultNotFound);
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("sending clustered file to user: {}", record.path.display());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.file_name),
            ),
        ],
        contents,
    )
        .into_response())
}

async fn download_latest(State(state): State<AppState>) -> Result<Response, AppError> {
    let record = state.store.latest().ok_or(AppError::ResultNotFound)?;
    send_result(record).await
}

async fn download_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::ResultNotFound)?;
    let record = state.store.get(&id).ok_or(AppError::ResultNotFound)?;
    send_result(record).await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    model_path: PathBuf,
    model_source: PathSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_error: Option<String>,
    features: Vec<String>,
    latest_result: Option<ResultRecord>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.model.model();
    let resolved = state.model.resolved();

    Json(HealthResponse {
        status: if model.is_some() { "ok" } else { "degraded" },
        model_loaded: model.is_some(),
        model_path: resolved.path.clone(),
        model_source: resolved.source,
        model_error: state.model.load_error().map(str::to_string),
        features: model
            .map(|m| m.feature_names().to_vec())
            .unwrap_or_default(),
        latest_result: state.store.latest(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt; // for `collect`
    use tempfile::tempdir;
    use tower::ServiceExt; // for `oneshot`

    fn create_app(dir: &std::path::Path) -> Router {
        let model = ModelState::unavailable(dir.join("missing.json"), "not found");
        let state = AppState::new(model, ResultStore::new(dir), ProcessOptions::default());
        router(state, 1024 * 1024)
    }

    #[tokio::test]
    async fn index() {
        let dir = tempdir().unwrap();
        let app = create_app(dir.path());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("not loaded"));
    }

    #[tokio::test]
    async fn health_reports_degraded_model() {
        let dir = tempdir().unwrap();
        let app = create_app(dir.path());

        let response = app
            .oneshot(Request::builder().uri("/_health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["model_error"], "not found");
    }

    #[tokio::test]
    async fn download_before_upload_is_not_found() {
        let dir = tempdir().unwrap();
        let app = create_app(dir.path());

        let response = app
            .oneshot(Request::builder().uri("/download").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_with_invalid_id_is_not_found() {
        let dir = tempdir().unwrap();
        let app = create_app(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/download/..%2Fsecret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let dir = tempdir().unwrap();
        let model = ModelState::unavailable(dir.path().join("missing.json"), "not found");
        let state = AppState::new(model, ResultStore::new(dir.path()), ProcessOptions::default());
        let app = router(state, 64);

        let boundary = "size-limit-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"big.csv\"\r\n\
             \r\n\
             {}\r\n\
             --{boundary}--\r\n",
            "A,B\n1,2\n".repeat(100)
        );
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
