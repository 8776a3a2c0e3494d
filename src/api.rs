//! HTTP API.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/requests` (also `/api`) | create a job, returns the secret |
//! | `GET` | `/requests/:secret/status` (also `/api/query/:secret`) | job status or CSV |
//! | `GET` | `/health` | liveness and outstanding job count |

use crate::error::Error;
use crate::jobs::{JobStatus, JobView, Secret};
use crate::service::{RequestService, StatusService};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    requests: RequestService,
    status: StatusService,
    instructions: Arc<str>,
}

impl AppState {
    /// Bundle the services. `instructions` is returned with every new secret.
    #[must_use]
    pub fn new(requests: RequestService, status: StatusService, instructions: String) -> Self {
        Self {
            requests,
            status,
            instructions: instructions.into(),
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/requests", post(create_request).fallback(method_not_allowed))
        .route("/api", post(create_request).fallback(method_not_allowed))
        .route(
            "/requests/:secret/status",
            get(job_status).fallback(method_not_allowed),
        )
        .route(
            "/api/query/:secret",
            get(job_status).fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Report request body. Accepts both the current and the legacy field names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequestBody {
    #[serde(default, alias = "pokt_node_domain")]
    domain: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "payor-address", alias = "payor_address")]
    payor_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    secret: Secret,
    message: String,
    status_url: String,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    status: JobStatus,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    outstanding_jobs: usize,
}

async fn create_request(
    State(state): State<AppState>,
    body: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", rejection.body_text()),
        )
    })?;

    let fields = [
        ("domain", body.domain.as_deref()),
        ("date", body.date.as_deref()),
        ("payorAddress", body.payor_address.as_deref()),
    ];
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.map(str::trim).unwrap_or_default().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Missing required fields: {}", missing.join(", ")),
        ));
    }

    let secret = state
        .requests
        .create_job(
            body.domain.as_deref().unwrap_or_default(),
            body.date.as_deref().unwrap_or_default(),
            body.payor_address.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(Json(CreatedResponse {
        status_url: format!("/requests/{secret}/status"),
        secret,
        message: state.instructions.to_string(),
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(secret): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.status.get_status(&Secret::from(secret)).await?;
    let status = view.status();
    let progress = view.progress_message().unwrap_or_default();

    let response = match view {
        JobView::Pending | JobView::Verified => (
            StatusCode::ACCEPTED,
            Json(ProgressResponse {
                status,
                message: progress,
            }),
        )
            .into_response(),
        JobView::Completed { filename, report } => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            report.bytes(),
        )
            .into_response(),
        JobView::Failed { reason } => {
            ApiError::new(StatusCode::BAD_REQUEST, reason).into_response()
        }
    };
    Ok(response)
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        outstanding_jobs: state.status.outstanding().await?,
    }))
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Capacity | Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", err);
            return Self::new(status, "Internal server error");
        }
        Self::new(status, err.to_string())
    }
}
