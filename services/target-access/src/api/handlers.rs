//! 请求处理器

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;
use taa_common::Identity;
use taa_errors::{AppError, AppResult};
use tracing::debug;

use super::state::{AppState, QUERY_KEY_HEADER};

#[derive(Debug, Serialize)]
pub struct TargetAccessResponse {
    pub count: usize,
    pub target_access: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub ping: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub kind: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

/// `GET /target-access/{username}`
pub async fn target_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> AppResult<Json<TargetAccessResponse>> {
    let provided = headers
        .get(QUERY_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if !state.query_key_matches(provided) {
        return Err(AppError::forbidden(format!(
            "Invalid or missing {}",
            QUERY_KEY_HEADER
        )));
    }

    let identity = Identity::parse(&username)?;
    let tokens = state.orchestrator.lookup(&identity).await;
    debug!(identity = %identity, count = tokens.len(), "Target access served");

    Ok(Json(TargetAccessResponse {
        count: tokens.len(),
        target_access: tokens.to_vec(),
    }))
}

/// `GET /ping/`
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        ping: state.availability.status().await,
    })
}

/// `GET /version/`
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        kind: "ISPYB",
        name: "Rust Axum",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => AppError::not_found("Metrics recorder not installed").into_response(),
    }
}
