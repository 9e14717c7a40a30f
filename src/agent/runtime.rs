//! Endpoint agent runtime: the persistent WebSocket client.
//!
//! State machine: DISCONNECTED → CONNECTING → AUTHENTICATING → READY, with
//! BACKOFF between failed attempts. The first frame sent on a fresh socket
//! is `authenticate`; anything but `authenticated` back sends the runtime
//! into backoff. While READY, tool calls run on their own tasks so a slow
//! tool never blocks heartbeats, and results that finish after the socket
//! is gone are dropped, since the broker has already timed the call out.

use std::{
    ops::ControlFlow,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::audit::{AuditEntry, AuditLog};
use crate::config::EndpointConfig;
use crate::executor::Executor;
use crate::identity::{DeviceIdentity, machine_fingerprint};
use crate::protocol::{CodecError, Frame, decode, encode};
use crate::security::Role;
use crate::tools::builtins::hostname;
use crate::tools::ToolResult;

/// How long to wait for the socket to open and for the auth reply.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a served connection ended.
#[derive(Debug, PartialEq)]
enum ServeEnd {
    /// Broker sent `disconnect`; do not reconnect.
    Disconnect(String),
    AuthFailed,
    Transport(String),
}

/// Doubling reconnect delay with a cap, reset on every successful READY.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// The delay to sleep now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

pub struct AgentRuntime {
    identity: DeviceIdentity,
    executor: Arc<Executor>,
    audit: Arc<AuditLog>,
    config: EndpointConfig,
    started: Instant,
}

impl AgentRuntime {
    pub fn new(
        identity: DeviceIdentity,
        executor: Arc<Executor>,
        audit: Arc<AuditLog>,
        config: EndpointConfig,
    ) -> Self {
        Self {
            identity,
            executor,
            audit,
            config,
            started: Instant::now(),
        }
    }

    /// The device-scoped WebSocket URL derived from the enrolled broker URL.
    fn ws_url(&self) -> String {
        let base = self
            .identity
            .broker_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        let base = base.trim_end_matches('/');
        format!("{base}/ws/device/{}", self.identity.device_id)
    }

    /// Run until the broker orders a disconnect. Reconnects with doubling
    /// backoff on every transport or authentication failure.
    pub async fn run(&self) -> Result<(), String> {
        let mut backoff = Backoff::new(
            Duration::from_secs(self.config.reconnect_base_secs),
            Duration::from_secs(self.config.reconnect_cap_secs),
        );

        loop {
            match self.connect_and_serve(&mut backoff).await {
                ServeEnd::Disconnect(reason) => {
                    log::info!("broker requested disconnect: {reason}");
                    self.audit.record_connection(
                        "disconnected",
                        &self.identity.device_id,
                        Some(reason),
                    );
                    return Ok(());
                }
                ServeEnd::AuthFailed => {
                    log::error!("authentication failed; backing off");
                }
                ServeEnd::Transport(e) => {
                    log::warn!("connection lost: {e}");
                    self.audit
                        .record_connection("disconnected", &self.identity.device_id, Some(e));
                }
            }
            let delay = backoff.next_delay();
            log::info!("reconnecting in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_serve(&self, backoff: &mut Backoff) -> ServeEnd {
        let url = self.ws_url();
        log::info!("connecting to {url}");

        let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return ServeEnd::Transport(format!("connect failed: {e}")),
            Err(_) => {
                return ServeEnd::Transport(format!(
                    "connect timed out after {}s",
                    CONNECT_TIMEOUT.as_secs()
                ));
            }
        };
        let (mut sink, mut stream) = ws_stream.split();

        // ── AUTHENTICATING ──────────────────────────────────────────────
        let auth = Frame::Authenticate {
            device_id: self.identity.device_id.clone(),
            device_token: self.identity.device_token.clone(),
            fingerprint: machine_fingerprint(),
        };
        if let Err(e) = sink.send(Message::Text(encode(&auth))).await {
            return ServeEnd::Transport(format!("auth send failed: {e}"));
        }

        match tokio::time::timeout(CONNECT_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match decode(&text) {
                Ok(Frame::Authenticated) => {}
                Ok(Frame::Error { error }) => {
                    log::error!("broker rejected authentication: {error}");
                    self.audit
                        .record_connection("auth_failed", &self.identity.device_id, Some(error));
                    return ServeEnd::AuthFailed;
                }
                other => {
                    log::error!("unexpected auth reply: {other:?}");
                    return ServeEnd::AuthFailed;
                }
            },
            Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => return ServeEnd::AuthFailed,
            Err(_) => return ServeEnd::Transport("no auth reply".to_string()),
        }

        // ── READY ───────────────────────────────────────────────────────
        log::info!("authenticated; ready for tool calls");
        self.audit
            .record_connection("connected", &self.identity.device_id, None);
        backoff.reset();

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(32);
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs));
        // The first tick fires immediately; that doubles as a liveness probe.

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(Message::Text(encode(&Frame::Heartbeat))).await {
                        return ServeEnd::Transport(format!("heartbeat send failed: {e}"));
                    }
                }
                queued = out_rx.recv() => {
                    // The runtime holds out_tx, so recv() yields Some while
                    // this loop is alive.
                    if let Some(frame) = queued {
                        if let Err(e) = sink.send(Message::Text(encode(&frame))).await {
                            return ServeEnd::Transport(format!("send failed: {e}"));
                        }
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if let ControlFlow::Break(reason) = self.handle_text(&text, &out_tx) {
                                return ServeEnd::Disconnect(reason);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return ServeEnd::Transport("socket closed".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return ServeEnd::Transport(e.to_string()),
                    }
                }
            }
        }
    }

    /// Route one inbound text frame. Replies and results are queued on
    /// `out_tx`; a `Break` value carries the broker's disconnect reason.
    fn handle_text(&self, text: &str, out_tx: &mpsc::Sender<Frame>) -> ControlFlow<String> {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(CodecError::UnknownType(t)) => {
                log::warn!("unknown frame type '{t}' from broker; dropped");
                return ControlFlow::Continue(());
            }
            Err(e) => {
                log::warn!("bad frame from broker: {e}; dropped");
                return ControlFlow::Continue(());
            }
        };

        match frame {
            Frame::Ping => self.queue(out_tx, Frame::Pong),
            Frame::Heartbeat => self.queue(out_tx, Frame::HeartbeatAck),
            Frame::HeartbeatAck => log::debug!("heartbeat acknowledged"),
            Frame::ToolCall {
                id,
                name,
                arguments,
                role,
            } => {
                let executor = self.executor.clone();
                let audit = self.audit.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    // Second line of defence: the broker authorizes before
                    // sending, but the endpoint still refuses calls below
                    // the tool's role floor.
                    let (result, authorized) = match executor.registry().policy(&name) {
                        Some(policy) if role < policy.min_role => (
                            ToolResult::unauthorized(format!(
                                "insufficient privileges for '{name}': required {}, provided {role}",
                                policy.min_role
                            )),
                            false,
                        ),
                        _ => (executor.execute(&name, arguments).await, true),
                    };
                    record_execution(&audit, &name, role, authorized, &result);
                    let frame = Frame::ToolResult { id, result };
                    if out_tx.send(frame).await.is_err() {
                        // Socket is gone; the broker already timed out.
                        log::debug!("dropping result produced after socket loss");
                    }
                });
            }
            Frame::ExecuteRaw {
                id,
                command,
                timeout,
                role,
            } => {
                let executor = self.executor.clone();
                let audit = self.audit.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let result = executor.execute_raw(&command, timeout, role).await;
                    record_execution(&audit, "execute_raw", role, true, &result);
                    let frame = Frame::ToolResult { id, result };
                    if out_tx.send(frame).await.is_err() {
                        log::debug!("dropping result produced after socket loss");
                    }
                });
            }
            Frame::HealthCheck { id } => {
                let report = Frame::HealthReport {
                    id,
                    status: "healthy".to_string(),
                    hostname: hostname(),
                    os: std::env::consts::OS.to_string(),
                    agent_version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.started.elapsed().as_secs(),
                };
                self.queue(out_tx, report);
            }
            Frame::ListDiagnostics { id, role } => {
                let list = Frame::DiagnosticsList {
                    id,
                    tools: self.executor.registry().catalog_for(role),
                };
                self.queue(out_tx, list);
            }
            Frame::Disconnect { reason } => return ControlFlow::Break(reason),
            Frame::Authenticated => log::debug!("duplicate authenticated frame; ignored"),
            other => {
                log::warn!("unexpected '{}' frame from broker; dropped", other.frame_type());
            }
        }
        ControlFlow::Continue(())
    }

    fn queue(&self, out_tx: &mpsc::Sender<Frame>, frame: Frame) {
        if let Err(e) = out_tx.try_send(frame) {
            log::warn!("outbound queue full; dropping {e}");
        }
    }
}

fn record_execution(
    audit: &AuditLog,
    tool_name: &str,
    role: Role,
    authorized: bool,
    result: &ToolResult,
) {
    audit.record_execution(AuditEntry {
        timestamp: chrono::Utc::now(),
        tool_name: tool_name.to_string(),
        role,
        authorized,
        status: result.status,
        execution_time_ms: result.execution_time_ms,
        output: result.output.clone(),
        error: result.error.clone(),
        device_id: None,
        user_id: None,
    });
}
