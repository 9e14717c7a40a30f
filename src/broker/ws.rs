//! Device-facing WebSocket endpoint at `GET /ws/device/{device_id}`.
//!
//! The first frame after the socket opens must be `authenticate`; sockets
//! that fail to do so within the configured deadline are closed. After
//! authentication the socket loop pumps two directions in one task, so all
//! writes to a given socket are serialized: outbound frames drained from
//! the registry queue, and inbound frames routed to the waiter store.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use tokio::sync::mpsc;

use super::connections::{ConnectionRegistry, OUTBOUND_QUEUE_DEPTH};
use super::routes::BrokerState;
use super::waiters::WaiterStore;
use crate::protocol::{CodecError, Frame, decode, encode};

/// WebSocket upgrade handler.
pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<BrokerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_device_socket(socket, device_id, state))
}

async fn handle_device_socket(mut socket: WebSocket, device_id: String, state: BrokerState) {
    // ── Authentication phase ────────────────────────────────────────────
    let deadline = std::time::Duration::from_secs(state.config.auth_deadline_secs);
    let first = tokio::time::timeout(deadline, socket.recv()).await;

    let authenticated = match first {
        Ok(Some(Ok(Message::Text(text)))) => match decode(&text) {
            Ok(Frame::Authenticate {
                device_id: claimed,
                device_token,
                fingerprint: _,
            }) => claimed == device_id && state.directory.verify(&device_id, &device_token),
            Ok(other) => {
                log::warn!(
                    "device '{device_id}' sent '{}' before authenticating",
                    other.frame_type()
                );
                false
            }
            Err(e) => {
                log::warn!("device '{device_id}' sent an undecodable auth frame: {e}");
                false
            }
        },
        Ok(_) => false,
        Err(_) => {
            log::warn!("device '{device_id}' did not authenticate within {deadline:?}");
            false
        }
    };

    if !authenticated {
        state
            .audit
            .record_connection("auth_failed", &device_id, None);
        let frame = Frame::Error {
            error: "authentication failed".to_string(),
        };
        let _ = socket.send(Message::Text(encode(&frame))).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    if socket
        .send(Message::Text(encode(&Frame::Authenticated)))
        .await
        .is_err()
    {
        return;
    }

    // ── Registered phase ────────────────────────────────────────────────
    let (tx, mut outbound) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let epoch = state.connections.register(&device_id, None, tx);

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(frame) => {
                        if socket.send(Message::Text(encode(&frame))).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: this connection was replaced or the
                    // registry was cleared. Close the socket.
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_device_frame(&text, &device_id, &state.connections, &state.waiters)
                        {
                            if socket.send(Message::Text(encode(&reply))).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/protocol-level frames ignored
                    Some(Err(e)) => {
                        log::warn!("socket error for device '{device_id}': {e}");
                        break;
                    }
                }
            }
        }
    }

    // Only the current registration may tear down the entry; a replaced
    // socket's exit must not cancel its successor's calls.
    if state.connections.unregister(&device_id, epoch) {
        let cancelled = state.waiters.cancel_device(&device_id);
        if cancelled > 0 {
            log::info!("cancelled {cancelled} pending call(s) for departed device '{device_id}'");
        }
    }
}

/// Route one inbound text frame. Returns a reply frame to write back on
/// the same socket, if any. Malformed and unknown frames are logged and
/// dropped; the connection stays up.
pub(crate) fn handle_device_frame(
    text: &str,
    device_id: &str,
    connections: &Arc<ConnectionRegistry>,
    waiters: &Arc<WaiterStore>,
) -> Option<Frame> {
    let frame = match decode(text) {
        Ok(frame) => frame,
        Err(CodecError::UnknownType(t)) => {
            log::warn!("device '{device_id}' sent unknown frame type '{t}'; dropped");
            return None;
        }
        Err(e) => {
            log::warn!("device '{device_id}' sent a bad frame: {e}; dropped");
            return None;
        }
    };

    match frame {
        Frame::Heartbeat => {
            connections.mark_heartbeat(device_id);
            Some(Frame::HeartbeatAck)
        }
        Frame::Ping => Some(Frame::Pong),
        Frame::Pong => None,
        Frame::ToolResult { ref id, .. } => {
            let id = id.clone();
            if !waiters.deliver(&id, frame) {
                log::warn!("duplicate or stale result for call '{id}' from device '{device_id}'");
            }
            None
        }
        Frame::HealthReport { ref id, .. } | Frame::DiagnosticsList { ref id, .. } => {
            let id = id.clone();
            if !waiters.deliver(&id, frame) {
                log::warn!("unmatched reply for call '{id}' from device '{device_id}'");
            }
            None
        }
        Frame::Authenticate { .. } => {
            log::warn!("device '{device_id}' re-sent authenticate; ignored");
            None
        }
        other => {
            log::warn!(
                "device '{device_id}' sent unexpected '{}' frame; dropped",
                other.frame_type()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::tools::ToolResult;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        connections: Arc<ConnectionRegistry>,
        waiters: Arc<WaiterStore>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditLog::new(dir.path()).unwrap());
        Fixture {
            connections: Arc::new(ConnectionRegistry::new(audit)),
            waiters: Arc::new(WaiterStore::new()),
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn heartbeat_gets_an_ack() {
        let fx = fixture();
        let reply = handle_device_frame(
            &encode(&Frame::Heartbeat),
            "d1",
            &fx.connections,
            &fx.waiters,
        );
        assert_eq!(reply, Some(Frame::HeartbeatAck));
    }

    #[tokio::test]
    async fn ping_gets_a_pong() {
        let fx = fixture();
        let reply =
            handle_device_frame(&encode(&Frame::Ping), "d1", &fx.connections, &fx.waiters);
        assert_eq!(reply, Some(Frame::Pong));
    }

    #[tokio::test]
    async fn tool_result_reaches_its_waiter() {
        let fx = fixture();
        let handle = fx
            .waiters
            .register_call("c9", "d1", Duration::from_secs(5))
            .unwrap();

        let frame = Frame::ToolResult {
            id: "c9".into(),
            result: ToolResult::success("done"),
        };
        assert_eq!(
            handle_device_frame(&encode(&frame), "d1", &fx.connections, &fx.waiters),
            None
        );
        assert!(matches!(
            fx.waiters.await_result(handle).await,
            crate::broker::waiters::WaitOutcome::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_are_dropped_quietly() {
        let fx = fixture();
        assert_eq!(
            handle_device_frame(r#"{"type":"warp_drive"}"#, "d1", &fx.connections, &fx.waiters),
            None
        );
        assert_eq!(
            handle_device_frame("not json at all", "d1", &fx.connections, &fx.waiters),
            None
        );
    }

    #[tokio::test]
    async fn stale_result_is_dropped() {
        let fx = fixture();
        let frame = Frame::ToolResult {
            id: "ghost".into(),
            result: ToolResult::success("late"),
        };
        assert_eq!(
            handle_device_frame(&encode(&frame), "d1", &fx.connections, &fx.waiters),
            None
        );
        assert_eq!(fx.waiters.pending_count(), 0);
    }
}
