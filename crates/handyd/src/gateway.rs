//! HTTP request gateway.
//!
//! Translates requests into dispatcher commands. Everything is validated here;
//! a request that reaches the dispatcher is well-formed.
//!
//! Command routes accept any method, so `curl host:8080/pause` and
//! `curl -X POST host:8080/pause` behave the same.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

use crate::dispatcher::{Dispatcher, MotionCommand};
use crate::error::CommandError;
use crate::session::StatusSnapshot;

/// Shared state for gateway handlers
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub started: Instant,
}

impl GatewayState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            started: Instant::now(),
        }
    }
}

/// Request rejections and forwarded command failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid {field}: {raw:?}")]
    InvalidValue { field: &'static str, raw: String },

    #[error("Bad payload: {0}")]
    BadPayload(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidValue { .. } | GatewayError::BadPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::UnknownCommand(_) => StatusCode::NOT_FOUND,
            GatewayError::Command(e) => e.status_code(),
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type GatewayResult = Result<Response, GatewayError>;

/// Status as served over HTTP.
///
/// `device_connected` mirrors `device_bound` for clients written against the
/// older field name.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub device_connected: bool,
}

impl From<StatusSnapshot> for StatusBody {
    fn from(snapshot: StatusSnapshot) -> Self {
        let device_connected = snapshot.device_bound;
        Self {
            snapshot,
            device_connected,
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/move/", any(empty_position))
        .route("/move/{position}", any(move_handler))
        .route("/pause", any(pause_handler))
        .route("/resume", any(resume_handler))
        .route("/speed/", any(empty_speed))
        .route("/speed/{value}", any(speed_handler))
        .route("/status", any(status_handler))
        .route("/connect", any(connect_handler))
        .route("/disconnect", any(disconnect_handler))
        .route("/command", post(command_handler))
        .route("/health", get(health_handler))
        .fallback(unknown_route)
        .with_state(state)
}

/// Parse a path segment as a finite number.
fn parse_number(field: &'static str, raw: &str) -> Result<f64, GatewayError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(GatewayError::InvalidValue {
            field,
            raw: raw.to_string(),
        }),
    }
}

async fn move_handler(
    State(state): State<GatewayState>,
    Path(raw): Path<String>,
) -> GatewayResult {
    let position = parse_number("position", &raw)?;
    do_move(&state, MotionCommand::to(position)).await
}

async fn empty_position() -> GatewayError {
    GatewayError::InvalidValue {
        field: "position",
        raw: String::new(),
    }
}

async fn empty_speed() -> GatewayError {
    GatewayError::InvalidValue {
        field: "speed",
        raw: String::new(),
    }
}

async fn pause_handler(State(state): State<GatewayState>) -> GatewayResult {
    Ok(Json(state.dispatcher.pause().await?).into_response())
}

async fn resume_handler(State(state): State<GatewayState>) -> GatewayResult {
    Ok(Json(state.dispatcher.resume().await?).into_response())
}

async fn speed_handler(
    State(state): State<GatewayState>,
    Path(raw): Path<String>,
) -> GatewayResult {
    let value = parse_number("speed", &raw)?;
    do_speed(&state, value).await
}

async fn status_handler(State(state): State<GatewayState>) -> GatewayResult {
    do_status(&state).await
}

async fn connect_handler(State(state): State<GatewayState>) -> GatewayResult {
    do_connect(&state).await
}

async fn disconnect_handler(State(state): State<GatewayState>) -> GatewayResult {
    do_disconnect(&state).await
}

async fn do_move(state: &GatewayState, command: MotionCommand) -> GatewayResult {
    Ok(Json(state.dispatcher.move_to(command).await?).into_response())
}

async fn do_speed(state: &GatewayState, value: f64) -> GatewayResult {
    Ok(Json(state.dispatcher.set_speed(value).await?).into_response())
}

async fn do_status(state: &GatewayState) -> GatewayResult {
    let body = StatusBody::from(state.dispatcher.status().await?);
    Ok(Json(body).into_response())
}

async fn do_connect(state: &GatewayState) -> GatewayResult {
    let body = StatusBody::from(state.dispatcher.connect().await?);
    Ok(Json(body).into_response())
}

async fn do_disconnect(state: &GatewayState) -> GatewayResult {
    let body = StatusBody::from(state.dispatcher.disconnect().await?);
    Ok(Json(serde_json::json!({ "status": body })).into_response())
}

/// JSON command body for `POST /command`.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum CommandRequest {
    Move {
        position: f64,
        #[serde(default)]
        duration: Option<f64>,
    },
    /// Same as `pause`.
    Stop,
    Pause,
    Resume,
    Status,
    Connect,
    Disconnect,
    Speed {
        value: f64,
    },
}

const COMMAND_NAMES: &[&str] = &[
    "move",
    "stop",
    "pause",
    "resume",
    "status",
    "connect",
    "disconnect",
    "speed",
];

/// Validate a `/command` body. Malformed is 400, an unknown name is 404.
fn parse_command(body: &[u8]) -> Result<CommandRequest, GatewayError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::BadPayload(e.to_string()))?;

    let name = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::BadPayload("missing \"command\" field".to_string()))?;

    if !COMMAND_NAMES.contains(&name) {
        return Err(GatewayError::UnknownCommand(name.to_string()));
    }

    serde_json::from_value(value).map_err(|e| GatewayError::BadPayload(e.to_string()))
}

async fn command_handler(State(state): State<GatewayState>, body: Bytes) -> GatewayResult {
    match parse_command(&body)? {
        CommandRequest::Move { position, duration } => {
            let duration_ms = match duration {
                Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms as u32),
                Some(ms) => {
                    return Err(GatewayError::InvalidValue {
                        field: "duration",
                        raw: ms.to_string(),
                    })
                }
                None => None,
            };
            do_move(
                &state,
                MotionCommand {
                    position,
                    duration_ms,
                },
            )
            .await
        }
        CommandRequest::Stop | CommandRequest::Pause => {
            Ok(Json(state.dispatcher.pause().await?).into_response())
        }
        CommandRequest::Resume => Ok(Json(state.dispatcher.resume().await?).into_response()),
        CommandRequest::Status => do_status(&state).await,
        CommandRequest::Connect => do_connect(&state).await,
        CommandRequest::Disconnect => do_disconnect(&state).await,
        CommandRequest::Speed { value } => do_speed(&state, value).await,
    }
}

/// Health check endpoint
async fn health_handler(State(state): State<GatewayState>) -> Json<Value> {
    let session = state
        .dispatcher
        .status()
        .await
        .ok()
        .map(StatusBody::from);

    Json(serde_json::json!({
        "status": if session.is_some() { "healthy" } else { "degraded" },
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "session": session,
    }))
}

async fn unknown_route(uri: Uri) -> GatewayError {
    GatewayError::UnknownCommand(uri.path().to_string())
}
