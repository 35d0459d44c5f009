//! HTTP front end: a sequence in, the reconciled report out.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::app::{App, SearchReport};
use crate::error::SeqError;
use crate::kv::KvStore;
use crate::search::SearchTool;

pub type SharedApp = Arc<App<Arc<dyn SearchTool>, Arc<dyn KvStore>>>;

const USAGE: &str = "POST /search with form field `seq` to search the sequence corpus.\n";

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub seq: String,
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    SearchFailed(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    LookupFailed(String),

    #[error("Internal server error")]
    Internal(String),
}

impl From<SeqError> for ApiError {
    fn from(err: SeqError) -> Self {
        match err {
            SeqError::EmptyQuery => Self::BadRequest(err.to_string()),
            SeqError::SearchToolFailure(_) | SeqError::MissingTool(_) => {
                Self::SearchFailed(err.to_string())
            }
            SeqError::SearchTimeout(_) => Self::Timeout(err.to_string()),
            SeqError::ReconciliationLookupFailed(_) | SeqError::Kv(_) => {
                Self::LookupFailed(err.to_string())
            }
            other => {
                error!("query failed: {other:?}");
                Self::Internal(other.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    status: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SearchFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::LookupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            status: "error".to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(app: SharedApp) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/search", post(search))
        .with_state(app)
}

/// Serves until Ctrl-C.
pub async fn serve(app: SharedApp, port: u16) -> Result<(), SeqError> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| SeqError::Server(format!("binding port {port}: {err}")))?;
    info!(port, "query front end listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|err| SeqError::Server(err.to_string()))
}

async fn index() -> &'static str {
    USAGE
}

async fn health() -> &'static str {
    "ok"
}

async fn search(
    State(app): State<SharedApp>,
    Form(request): Form<SearchRequest>,
) -> Result<Json<SearchReport>, ApiError> {
    let report = tokio::task::spawn_blocking(move || app.search(&request.seq))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))??;
    Ok(Json(report))
}
