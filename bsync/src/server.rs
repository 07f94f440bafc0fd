//! HTTP front end of the mirror pipeline
//!
//! - `GET /ping` answers `{"message":"pong"}`
//! - `POST /sync` with `{"bucketName": "<prefix>"}` mirrors that origin prefix to every
//!   configured target and answers with the report

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Progress, Settings, Status};
use store::{Connector, ObjectStore, TargetEndpoint};
use tower_http::trace::TraceLayer;

use crate::mirror::{MirrorReport, mirror};

/// Everything a sync request needs, shared by all requests
#[derive(Debug, Clone)]
pub struct AppState {
    pub origin: Arc<dyn ObjectStore>,
    pub connector: Arc<dyn Connector>,
    pub targets: Arc<Vec<TargetEndpoint>>,
    pub settings: Settings,
    /// every request stages its download in a fresh directory under this one
    pub staging_root: std::path::PathBuf,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub bucket_name: String,
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    let body = serde_json::json!({ "error": message.to_string() });
    (status, Json(body)).into_response()
}

fn status_code(report: &MirrorReport) -> StatusCode {
    match report.status {
        Status::Success => StatusCode::OK,
        Status::Aborted => StatusCode::SERVICE_UNAVAILABLE,
        Status::PartialSuccess | Status::Failure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "pong" }))
}

async fn sync(
    State(state): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("rejected sync request: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let prefix = request.bucket_name.trim();
    if prefix.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "bucketName is required");
    }
    tracing::info!("sync of {:?} requested", prefix);
    let progress = Arc::new(Progress::new());
    match mirror(
        state.origin.clone(),
        prefix,
        &state.staging_root,
        state.connector.as_ref(),
        &state.targets,
        &state.settings,
        &progress,
    )
    .await
    {
        Ok(report) => {
            tracing::info!("sync of {:?} finished: {}", prefix, report.status);
            (status_code(&report), Json(report)).into_response()
        }
        Err(error) => {
            tracing::error!("sync of {:?} failed: {:#}", prefix, &error);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}"))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/sync", post(sync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until ctrl-c is received.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    use anyhow::Context;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    tracing::info!(address = %addr, "sync server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("failed waiting for ctrl-c: {}", error);
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await
        .context("sync server failed")
}
