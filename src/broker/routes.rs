//! Caller-facing HTTP surface of the broker.
//!
//! Everything except `health` and `enroll` sits behind the bearer-token
//! middleware. The dispatch route is a thin shim over the in-process
//! [`Dispatcher`]; callers embedding the broker as a library can skip HTTP
//! entirely.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::connections::ConnectionRegistry;
use super::directory::{DEFAULT_CODE_TTL, DeviceDirectory};
use super::dispatcher::{Dispatcher, ToolInvocation};
use super::waiters::WaiterStore;
use crate::audit::AuditLog;
use crate::config::BrokerConfig;
use crate::security::{AuthzSignals, Role};

/// Shared state handed to every route and the WS handler.
#[derive(Clone)]
pub struct BrokerState {
    pub connections: Arc<ConnectionRegistry>,
    pub waiters: Arc<WaiterStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub directory: Arc<DeviceDirectory>,
    pub audit: Arc<AuditLog>,
    pub config: BrokerConfig,
}

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "opsclaw-broker" }))
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub device_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    pub role: Role,
    /// Caller correlation id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Idle signal forwarded from the caller's environment, if it has one.
    #[serde(default)]
    pub is_user_idle: Option<bool>,
}

pub async fn dispatch(
    State(state): State<BrokerState>,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    let invocation = ToolInvocation {
        id: req
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
        name: req.tool,
        arguments: req.arguments,
        role: req.role,
    };
    let signals = AuthzSignals {
        is_user_idle: req.is_user_idle,
    };
    let result = state
        .dispatcher
        .dispatch(invocation, &req.device_id, signals)
        .await;
    Json(result)
}

#[derive(Debug, Deserialize)]
pub struct RawDispatchRequest {
    pub device_id: String,
    pub command: String,
    #[serde(default)]
    pub timeout: u64,
    pub role: Role,
}

pub async fn dispatch_raw(
    State(state): State<BrokerState>,
    Json(req): Json<RawDispatchRequest>,
) -> impl IntoResponse {
    let result = state
        .dispatcher
        .dispatch_raw(&req.command, req.timeout, req.role, &req.device_id)
        .await;
    Json(result)
}

// ─── Device inspection ────────────────────────────────────────────────────────

pub async fn list_devices(State(state): State<BrokerState>) -> impl IntoResponse {
    Json(json!({ "devices": state.connections.all() }))
}

// ─── Enrollment ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct EnrollCodeResponse {
    pub code: String,
    pub expires_in_secs: u64,
}

pub async fn mint_enroll_code(State(state): State<BrokerState>) -> impl IntoResponse {
    let code = state.directory.mint_code(DEFAULT_CODE_TTL);
    Json(EnrollCodeResponse {
        code,
        expires_in_secs: DEFAULT_CODE_TTL.as_secs(),
    })
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub enroll_code: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub fingerprint: String,
}

pub async fn enroll_device(
    State(state): State<BrokerState>,
    Json(req): Json<EnrollRequest>,
) -> impl IntoResponse {
    match state
        .directory
        .enroll(&req.enroll_code, &req.device_name, &req.fingerprint)
    {
        Ok(record) => {
            state
                .audit
                .record_connection("enrolled", &record.device_id, Some(req.device_name));
            (
                StatusCode::CREATED,
                Json(json!({
                    "device_id": record.device_id,
                    "device_token": record.device_token,
                })),
            )
        }
        Err(reason) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": reason })),
        ),
    }
}
