//! Dispatch orchestration: authorize, route, await, audit.
//!
//! A dispatch is one linear task. The waiter store is the only
//! coordination primitive; transport and framing failures surface as
//! `ToolResult` values, never as panics or caller-visible errors.

use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::connections::ConnectionRegistry;
use super::waiters::{WaitOutcome, WaiterStore};
use crate::audit::{AuditEntry, AuditLog};
use crate::protocol::Frame;
use crate::security::{AuthzSignals, RiskLevel, Role, authorize};
use crate::tools::{ToolRegistry, ToolResult};

/// Out-of-band confirmation collaborator, consulted only for policies with
/// `requires_confirmation`.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, tool_name: &str, role: Role, risk_level: RiskLevel) -> bool;
}

/// Idle-state collaborator, consulted only for policies with `requires_idle`.
#[async_trait]
pub trait IdleProbe: Send + Sync {
    async fn is_user_idle(&self) -> Option<bool>;
}

/// One caller request, as handed to [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    /// Caller-chosen opaque id, echoed in audit records.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    pub role: Role,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    connections: Arc<ConnectionRegistry>,
    waiters: Arc<WaiterStore>,
    audit: Arc<AuditLog>,
    confirmer: Option<Arc<dyn Confirmer>>,
    idle_probe: Option<Arc<dyn IdleProbe>>,
    /// When set, `requires_confirmation` tools are denied if no confirmer
    /// is configured instead of proceeding.
    deny_unconfirmed: bool,
    call_seq: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        connections: Arc<ConnectionRegistry>,
        waiters: Arc<WaiterStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            connections,
            waiters,
            audit,
            confirmer: None,
            idle_probe: None,
            deny_unconfirmed: false,
            call_seq: AtomicU64::new(0),
        }
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn with_idle_probe(mut self, probe: Arc<dyn IdleProbe>) -> Self {
        self.idle_probe = Some(probe);
        self
    }

    pub fn deny_unconfirmed(mut self, deny: bool) -> Self {
        self.deny_unconfirmed = deny;
        self
    }

    /// Run one full dispatch cycle against `target_device_id` and return
    /// the caller's `ToolResult`. Exactly one audit record is written per
    /// call, whatever the outcome.
    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
        target_device_id: &str,
        mut signals: AuthzSignals,
    ) -> ToolResult {
        let started = Instant::now();
        log::info!(
            "dispatching '{}' to device '{target_device_id}' (id={}, role={})",
            invocation.name,
            invocation.id,
            invocation.role
        );

        let Some((_tool, policy)) = self.registry.lookup(&invocation.name) else {
            let result = ToolResult::failure(format!("tool '{}' not found", invocation.name));
            self.record(&invocation, target_device_id, false, &result, started);
            return result;
        };
        let policy = policy.clone();

        if policy.requires_idle && signals.is_user_idle.is_none() {
            if let Some(probe) = &self.idle_probe {
                signals.is_user_idle = probe.is_user_idle().await;
            }
        }

        let decision = authorize(&invocation.name, &policy, invocation.role, signals);
        self.audit
            .record_authorization(&invocation.name, invocation.role, &decision);
        if !decision.allowed {
            log::warn!("authorization denied for '{}': {}", invocation.name, decision.reason);
            let result = ToolResult::unauthorized(decision.reason);
            self.record(&invocation, target_device_id, false, &result, started);
            return result;
        }

        if policy.requires_confirmation {
            let confirmed = match &self.confirmer {
                Some(confirmer) => {
                    confirmer
                        .confirm(&invocation.name, invocation.role, policy.risk_level)
                        .await
                }
                None => !self.deny_unconfirmed,
            };
            if !confirmed {
                let result = ToolResult::unauthorized(format!(
                    "confirmation denied for '{}'",
                    invocation.name
                ));
                self.record(&invocation, target_device_id, false, &result, started);
                return result;
            }
        }

        let frame = |call_id: String| Frame::ToolCall {
            id: call_id,
            name: invocation.name.clone(),
            arguments: invocation.arguments.clone(),
            role: invocation.role,
        };
        let result = self
            .send_and_await(target_device_id, frame, policy.timeout_seconds)
            .await;
        self.record(&invocation, target_device_id, true, &result, started);
        result
    }

    /// Dispatch a raw command line to `target_device_id`. The endpoint runs
    /// it under its blocklist screen; the broker pre-checks only the role
    /// floor so unauthorized callers fail without a round trip.
    pub async fn dispatch_raw(
        &self,
        command: &str,
        timeout_secs: u64,
        role: Role,
        target_device_id: &str,
    ) -> ToolResult {
        let started = Instant::now();
        let invocation = ToolInvocation {
            id: String::new(),
            name: "execute_raw".to_string(),
            arguments: Value::Null,
            role,
        };

        if role < Role::HumanAgent {
            let result = ToolResult::unauthorized(format!(
                "raw command execution requires at least role {}, provided {role}",
                Role::HumanAgent
            ));
            self.record(&invocation, target_device_id, false, &result, started);
            return result;
        }

        let timeout_secs = if timeout_secs == 0 { 30 } else { timeout_secs };
        let command = command.to_string();
        let frame = |call_id: String| Frame::ExecuteRaw {
            id: call_id,
            command: command.clone(),
            timeout: timeout_secs,
            role,
        };
        let result = self
            .send_and_await(target_device_id, frame, timeout_secs)
            .await;
        self.record(&invocation, target_device_id, true, &result, started);
        result
    }

    async fn send_and_await(
        &self,
        device_id: &str,
        frame: impl FnOnce(String) -> Frame,
        timeout_secs: u64,
    ) -> ToolResult {
        let started = Instant::now();
        if !self.connections.is_connected(device_id) {
            return ToolResult::failure("device not connected");
        }

        let call_id = self.next_call_id();
        let handle = match self.waiters.register_call(
            &call_id,
            device_id,
            Duration::from_secs(timeout_secs),
        ) {
            Ok(handle) => handle,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        // A saturated outbound queue may block the send, but never past the
        // call's own deadline.
        let sent = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.connections.send_to(device_id, frame(call_id.clone())),
        )
        .await;
        match sent {
            Ok(true) => {}
            Ok(false) => {
                self.waiters.cancel(&call_id);
                return ToolResult::failure("device not connected");
            }
            Err(_) => {
                self.waiters.cancel(&call_id);
                return ToolResult::timeout(format!("no result in {timeout_secs}s"))
                    .with_elapsed_ms(started.elapsed().as_millis() as u64);
            }
        }

        match self.waiters.await_result(handle).await {
            WaitOutcome::Delivered(Frame::ToolResult { result, .. }) => result,
            WaitOutcome::Delivered(other) => {
                log::warn!(
                    "call '{call_id}' answered with unexpected '{}' frame",
                    other.frame_type()
                );
                ToolResult::failure("unexpected reply frame from device")
            }
            WaitOutcome::Timeout => ToolResult::timeout(format!("no result in {timeout_secs}s"))
                .with_elapsed_ms(started.elapsed().as_millis() as u64),
            WaitOutcome::Cancelled => ToolResult::failure("dispatch cancelled")
                .with_elapsed_ms(started.elapsed().as_millis() as u64),
        }
    }

    /// Unique, unguessable wire id for one in-flight call.
    fn next_call_id(&self) -> String {
        let seq = self.call_seq.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!("call_{seq}_{}", &suffix[..8])
    }

    fn record(
        &self,
        invocation: &ToolInvocation,
        device_id: &str,
        authorized: bool,
        result: &ToolResult,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_millis() as u64;
        self.audit.record_execution(AuditEntry {
            timestamp: Utc::now(),
            tool_name: invocation.name.clone(),
            role: invocation.role,
            authorized,
            status: result.status,
            execution_time_ms: result.execution_time_ms.max(elapsed),
            output: result.output.clone(),
            error: result.error.clone(),
            device_id: Some(device_id.to_string()),
            user_id: None,
        });
    }
}
