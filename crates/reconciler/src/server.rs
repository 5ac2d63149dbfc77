//! HTTP surface of the reconciler.
//!
//! - `PUT|POST /v1/run` admits a [`Task`] into the worker pool
//! - `GET /health` reports pool occupancy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, warn, Level};

use crate::error::{Error, Result};
use crate::model::Task;
use crate::service::WorkerPool;

/// API versions accepted in the request path.
const SUPPORTED_VERSIONS: &[&str] = &["v1"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the router serving `pool`.
pub fn router(pool: Arc<WorkerPool>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{version}/run", put(run).post(run))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(pool)
}

/// Serve until `shutdown` fires.
pub async fn serve(pool: Arc<WorkerPool>, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Component reconciler listening");

    axum::serve(listener, router(pool))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health(State(pool): State<Arc<WorkerPool>>) -> Response {
    let status = if pool.is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = json!({
        "status": if pool.is_closed() { "closed" } else { "healthy" },
        "service": "component-reconciler",
        "version": env!("CARGO_PKG_VERSION"),
        "runningWorkers": pool.running_workers(),
        "poolSize": pool.pool_size(),
    });
    (status, Json(body)).into_response()
}

async fn run(
    State(pool): State<Arc<WorkerPool>>,
    Path(version): Path<String>,
    body: Bytes,
) -> Response {
    if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
        return error_body(
            StatusCode::NOT_FOUND,
            &format!("API version '{version}' is not supported"),
        );
    }

    let task: Task = match serde_json::from_slice(&body) {
        Ok(task) => task,
        Err(err) => {
            debug!(error = %err, "Rejecting malformed task");
            return error_body(
                StatusCode::BAD_REQUEST,
                &format!("failed to unmarshal request body: {err}"),
            );
        }
    };

    match pool.assign_worker(task) {
        Ok(()) => (StatusCode::OK, Json(json!({"accepted": true}))).into_response(),
        Err(err) => admission_error(err),
    }
}

fn admission_error(err: Error) -> Response {
    let status = match &err {
        Error::InvalidTask(_) => StatusCode::BAD_REQUEST,
        Error::UnknownComponent(_) => StatusCode::NOT_FOUND,
        Error::DependencyMissing { .. } => StatusCode::PRECONDITION_REQUIRED,
        Error::PoolSaturated { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if err.is_admission() {
        warn!(status = %status, error = %err, "Task not accepted");
    } else {
        error!(status = %status, error = %err, "Failed to assign task");
    }

    if let Error::DependencyMissing {
        required, missing, ..
    } = err
    {
        return (
            status,
            Json(json!({"dependencies": {"required": required, "missing": missing}})),
        )
            .into_response();
    }
    error_body(status, &err.to_string())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
