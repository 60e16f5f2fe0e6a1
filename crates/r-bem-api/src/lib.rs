//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test-case HTTP API exposing reset, advance and result queries."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use r_bem_common::VERSION;
use r_bem_sim::{
    AdvanceReport, InputSignal, KpiSnapshot, OutputSignal, ResetReport, ResultRow,
    SessionError, SessionManager, SessionStatus, SignalMap, TimeRange, TimeSeries,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared API state exposed to handlers.
pub struct ApiState {
    session: Arc<SessionManager>,
    start: Instant,
    started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            session: self.session.status(),
            version: VERSION.to_owned(),
            started_at: self.started_at.to_rfc3339(),
            uptime_seconds: self.start.elapsed().as_secs(),
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("session", &self.session.name())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Bound address; differs from the requested one when port 0 was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/advance", post(post_advance))
        .route("/reset", put(put_reset))
        .route("/step", get(get_step).put(put_step))
        .route("/inputs", get(get_inputs))
        .route("/measurements", get(get_measurements))
        .route("/results", get(get_results))
        .route("/results/:signal", get(get_series))
        .route("/kpi", get(get_kpis))
        .route("/name", get(get_name))
        .route("/status", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    session: SessionStatus,
    version: String,
    started_at: String,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StepBody {
    step: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    #[serde(default)]
    step: Option<f64>,
}

#[derive(Debug, Serialize)]
struct NameResponse {
    name: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

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

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::InvalidInput { .. } | SessionError::InvalidStep(_) => {
                StatusCode::BAD_REQUEST
            }
            SessionError::NotReady | SessionError::ScenarioEnded => StatusCode::CONFLICT,
            SessionError::UnknownSignal(_) => StatusCode::NOT_FOUND,
            SessionError::ModelStep(_) | SessionError::Reset(_) | SessionError::Commit(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed in the model");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn post_advance(
    State(state): State<Arc<ApiState>>,
    Json(inputs): Json<SignalMap>,
) -> Result<Json<AdvanceReport>, ApiError> {
    Ok(Json(state.session.advance(inputs).await?))
}

/// An empty body resets with the configured step; anything else must be a valid request.
async fn put_reset(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ResetReport>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice::<ResetRequest>(&body).map_err(|err| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("invalid reset request: {err}"))
        })?
    };
    Ok(Json(state.session.reset(request.step).await?))
}

async fn get_step(State(state): State<Arc<ApiState>>) -> Json<StepBody> {
    Json(StepBody {
        step: state.session.get_step(),
    })
}

async fn put_step(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<StepBody>,
) -> Result<Json<StepBody>, ApiError> {
    let step = state.session.set_step(body.step).await?;
    Ok(Json(StepBody { step }))
}

async fn get_inputs(State(state): State<Arc<ApiState>>) -> Json<Vec<InputSignal>> {
    Json(state.session.inputs())
}

async fn get_measurements(State(state): State<Arc<ApiState>>) -> Json<Vec<OutputSignal>> {
    Json(state.session.outputs())
}

async fn get_results(
    State(state): State<Arc<ApiState>>,
    Query(range): Query<TimeRange>,
) -> Json<Vec<ResultRow>> {
    Json(state.session.results(range))
}

async fn get_series(
    State(state): State<Arc<ApiState>>,
    Path(signal): Path<String>,
    Query(range): Query<TimeRange>,
) -> Result<Json<TimeSeries>, ApiError> {
    Ok(Json(state.session.series(&signal, range)?))
}

async fn get_kpis(State(state): State<Arc<ApiState>>) -> Json<KpiSnapshot> {
    Json(state.session.kpis())
}

async fn get_name(State(state): State<Arc<ApiState>>) -> Json<NameResponse> {
    Json(NameResponse {
        name: state.session.name().to_owned(),
    })
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status())
}
