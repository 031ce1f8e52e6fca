//! HTTP trigger surface for the daemon
//!
//! Routes:
//!
//! - `POST /api/flows/exec?project=<path>&flow=<name>` - trigger a detached run
//! - `POST /api/schedules?project&flow&minute&hour&day` - register a schedule
//! - `GET /api/schedules` - list registered schedules
//! - `DELETE /api/schedules/{id}` - remove a schedule
//! - `GET /metrics` - Prometheus text exposition

use crate::error::{FlowrunError, Result};
use crate::metrics::FlowMetrics;
use crate::models::{Definition, Flow};
use crate::parser::parse_project_file;
use crate::schedule::{Schedule, WILDCARD};
use crate::scheduler::{FlowScheduler, ScheduledFlow};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default listen address for the daemon
pub const DEFAULT_BIND: &str = "127.0.0.1:8116";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<FlowScheduler>,
    pub metrics: Arc<FlowMetrics>,
}

#[derive(Debug, Deserialize)]
pub struct FlowQuery {
    pub project: String,
    pub flow: String,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub project: String,
    pub flow: String,
    pub minute: Option<i32>,
    pub hour: Option<i32>,
    pub day: Option<i32>,
}

/// JSON view of a registered schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub project: String,
    pub flow: String,
    pub schedule: String,
    pub minute: i32,
    pub hour: i32,
    pub day: i32,
}

impl From<&ScheduledFlow> for ScheduleEntry {
    fn from(entry: &ScheduledFlow) -> Self {
        let (minute, hour, day) = entry.schedule.to_parts();
        Self {
            id: entry.id,
            project: entry.project.clone(),
            flow: entry.flow.name.clone(),
            schedule: entry.schedule.to_string(),
            minute,
            hour,
            day,
        }
    }
}

/// Error body returned as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<FlowrunError> for ApiError {
    fn from(err: FlowrunError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Request failed ({}): {}", self.status, self.message);
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Build the router over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/flows/exec", post(exec_flow))
        .route("/api/schedules", post(create_schedule).get(list_schedules))
        .route("/api/schedules/{id}", delete(delete_schedule))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Load `project` and pick out `flow`, returning the project label with it
fn load_flow(project: &str, flow: &str) -> std::result::Result<(String, Flow), ApiError> {
    let definition: Definition = parse_project_file(project)?;

    let found = definition.flow(flow).cloned().ok_or_else(|| {
        ApiError::bad_request(format!(
            "flow '{}' not found in project '{}'",
            flow, definition.name
        ))
    })?;

    Ok((definition.name, found))
}

/// Runs [`load_flow`] on the blocking pool
async fn read_flow(project: String, flow: String) -> std::result::Result<(String, Flow), ApiError> {
    tokio::task::spawn_blocking(move || load_flow(&project, &flow))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("project load task failed: {}", e),
        })?
}

async fn exec_flow(
    State(state): State<AppState>,
    Query(query): Query<FlowQuery>,
) -> std::result::Result<StatusCode, ApiError> {
    let (project, flow) = read_flow(query.project, query.flow).await?;

    info!("HTTP trigger for flow '{}' in project '{}'", flow.name, project);
    // Detached; the outcome is reported through the run's observer
    let _ = state.scheduler.run_flow(&project, flow);

    Ok(StatusCode::NO_CONTENT)
}

async fn create_schedule(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> std::result::Result<Json<ScheduleEntry>, ApiError> {
    let schedule = Schedule::from_parts(
        query.minute.unwrap_or(WILDCARD),
        query.hour.unwrap_or(WILDCARD),
        query.day.unwrap_or(WILDCARD),
    )?;
    let (project, flow) = read_flow(query.project, query.flow).await?;

    let id = state
        .scheduler
        .schedule_flow(project.clone(), flow.clone(), schedule)
        .await;

    Ok(Json(ScheduleEntry::from(&ScheduledFlow {
        id,
        project,
        flow,
        schedule,
    })))
}

async fn list_schedules(State(state): State<AppState>) -> Json<Vec<ScheduleEntry>> {
    let entries = state.scheduler.schedules().await;
    Json(entries.iter().map(ScheduleEntry::from).collect())
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> std::result::Result<StatusCode, ApiError> {
    if state.scheduler.unschedule(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("schedule {} not found", id)))
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Parse a listen address such as `127.0.0.1:8116`
pub fn resolve_bind_address(bind: &str) -> Result<SocketAddr> {
    bind.parse()
        .map_err(|e| FlowrunError::Validation(format!("invalid bind address '{}': {}", bind, e)))
}

/// HTTP server configuration
pub struct HttpServer {
    bind: SocketAddr,
    state: AppState,
}

impl HttpServer {
    pub fn new(bind: SocketAddr, state: AppState) -> Self {
        Self { bind, state }
    }

    /// Bind the listener and serve in a background task
    pub async fn start(self) -> Result<RunningHttpServer> {
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        let bound_address = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = router(self.state);

        info!("HTTP server listening on {}", bound_address);

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        Ok(RunningHttpServer {
            bound_address,
            shutdown_tx,
            handle,
        })
    }
}

/// Handle to a serving HTTP server
#[derive(Debug)]
pub struct RunningHttpServer {
    bound_address: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningHttpServer {
    pub fn bound_address(&self) -> SocketAddr {
        self.bound_address
    }

    /// Stop accepting connections and wait for the server task
    pub async fn stop(self) -> Result<()> {
        debug!("Stopping HTTP server on {}", self.bound_address);
        let _ = self.shutdown_tx.send(true);
        self.handle
            .await
            .map_err(|e| FlowrunError::Other(format!("HTTP server task failed: {}", e)))?;
        Ok(())
    }
}
