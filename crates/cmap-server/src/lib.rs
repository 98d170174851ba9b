//! # cmap-server
//!
//! HTTP control API of an agency. The cluster manager creates, inspects and
//! deletes agents through it, and peer agencies post messages to it.
//!
//! | Verb   | Path                              |
//! |--------|-----------------------------------|
//! | GET    | `/api/agency`                     |
//! | GET    | `/api/agency/agents/{id}/status`  |
//! | POST   | `/api/agency/agents`              |
//! | POST   | `/api/agency/msgs`                |
//! | POST   | `/api/agency/msgundeliv`          |
//! | PUT    | `/api/agency/agents/{id}/custom`  |
//! | DELETE | `/api/agency/agents/{id}`         |
//! | GET    | `/metrics`                        |
//!
//! Anything else is answered with 405.

pub mod error;

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use cmap_core::{
    AclMessage, AgencyError, AgencyInfo, AgentDescriptor, AgentId, Counter, Metrics, Status,
};
use cmap_runtime::Agency;

pub use error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub agency: Arc<Agency>,
    pub metrics: Metrics,
}

/// Build the control API router for `agency`.
pub fn build_router(agency: Arc<Agency>) -> Router {
    let state = AppState {
        metrics: agency.metrics().clone(),
        agency,
    };

    Router::new()
        .route("/api/agency", get(agency_handler))
        .route("/api/agency/agents", post(create_agent_handler))
        .route("/api/agency/agents/{id}", axum::routing::delete(delete_agent_handler))
        .route("/api/agency/agents/{id}/status", get(status_handler))
        .route("/api/agency/agents/{id}/custom", put(custom_handler))
        .route("/api/agency/msgs", post(msgs_handler))
        .route("/api/agency/msgundeliv", post(undeliverable_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_allowed_handler)
        .method_not_allowed_fallback(not_allowed_handler)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `listen` and serve until the agency is shut down.
pub async fn start_server(listen: &str, agency: Arc<Agency>) -> cmap_core::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| AgencyError::Bootstrap(format!("failed to bind {listen}: {e}")))?;
    info!(listen = %listen, "control API listening");
    serve(listener, agency).await
}

/// Serve on an already bound listener until the agency is shut down.
pub async fn serve(listener: tokio::net::TcpListener, agency: Arc<Agency>) -> cmap_core::Result<()> {
    let cancel = agency.cancel_token();
    let router = build_router(agency);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

// ── Middleware ─────────────────────────────────────────────────

async fn count_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.metrics.inc(Counter::HttpRequests);
    let resp = next.run(req).await;
    if resp.status().is_client_error() || resp.status().is_server_error() {
        state.metrics.inc(Counter::HttpErrors);
    }
    resp
}

// ── Handlers ───────────────────────────────────────────────────

fn parse_id(raw: &str) -> ApiResult<AgentId> {
    raw.parse::<AgentId>()
        .map_err(|_| ApiError(AgencyError::Protocol(format!("invalid agent id '{raw}'"))))
}

async fn agency_handler(State(state): State<AppState>) -> Json<AgencyInfo> {
    Json(state.agency.info())
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Status>> {
    let id = parse_id(&id)?;
    Ok(Json(state.agency.status(id)?))
}

async fn create_agent_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let descriptor: AgentDescriptor = serde_json::from_slice(&body).map_err(AgencyError::from)?;
    info!(agent_id = descriptor.id, agent_type = %descriptor.agent_type, "create agent");
    state.agency.create_agent(descriptor)?;
    Ok((StatusCode::CREATED, "Resource Created").into_response())
}

async fn delete_agent_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    state.agency.delete_agent(id)?;
    Ok((StatusCode::OK, "Resource deleted").into_response())
}

async fn custom_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let payload = String::from_utf8_lossy(&body).into_owned();
    state.agency.inject_custom(id, payload).await;
    Ok((StatusCode::OK, "Resource Updated").into_response())
}

async fn msgs_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let batch: Vec<AclMessage> = serde_json::from_slice(&body).map_err(AgencyError::from)?;
    let received = batch.len();
    let delivered = state.agency.ingest(batch).await;
    debug!(received, delivered, "ingested message batch");
    Ok((StatusCode::CREATED, "Resource Created").into_response())
}

async fn undeliverable_handler(State(state): State<AppState>, body: Bytes) -> Response {
    if let Ok(msg) = serde_json::from_slice::<AclMessage>(&body) {
        state.agency.report_undeliverable(&msg);
    }
    (StatusCode::CREATED, "Resource Created").into_response()
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render_prometheus(),
    )
        .into_response()
}

async fn not_allowed_handler(method: Method, uri: Uri) -> ApiError {
    ApiError(AgencyError::Protocol(format!("{method} {uri}")))
}
