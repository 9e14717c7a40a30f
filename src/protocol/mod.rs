//! Wire codec for the broker <-> endpoint WebSocket protocol.
//!
//! One UTF-8 JSON frame per WebSocket text message, discriminated by a
//! `type` field. Internal code never touches raw JSON: frames are decoded
//! into [`Frame`] at the socket edge and encoded back on the way out, so
//! the "missing key" class of bugs cannot reach the dispatch path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::security::Role;
use crate::tools::{ToolInfo, ToolResult};

/// All frame types carried on a device socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame after the socket opens, endpoint -> broker.
    Authenticate {
        device_id: String,
        device_token: String,
        fingerprint: String,
    },
    /// Broker's positive reply to `authenticate`.
    Authenticated,
    /// Broker-side protocol error report.
    Error { error: String },
    Ping,
    Pong,
    Heartbeat,
    HeartbeatAck,
    /// Invoke a registered tool, broker -> endpoint.
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
        role: Role,
    },
    /// Invoke a raw command under the blocklist screen, broker -> endpoint.
    ExecuteRaw {
        id: String,
        command: String,
        timeout: u64,
        role: Role,
    },
    /// Result of a `tool_call` or `execute_raw`, endpoint -> broker.
    ToolResult {
        id: String,
        #[serde(flatten)]
        result: ToolResult,
    },
    /// Liveness probe of the endpoint process, broker -> endpoint.
    HealthCheck { id: String },
    HealthReport {
        id: String,
        status: String,
        hostname: String,
        os: String,
        agent_version: String,
        uptime_secs: u64,
    },
    /// Enumerate tools visible to `role`, broker -> endpoint.
    ListDiagnostics { id: String, role: Role },
    DiagnosticsList { id: String, tools: Vec<ToolInfo> },
    /// Orderly close; the endpoint must not reconnect.
    Disconnect { reason: String },
}

impl Frame {
    /// The wire `type` tag, for log lines.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Authenticated => "authenticated",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::ToolCall { .. } => "tool_call",
            Self::ExecuteRaw { .. } => "execute_raw",
            Self::ToolResult { .. } => "tool_result",
            Self::HealthCheck { .. } => "health_check",
            Self::HealthReport { .. } => "health_report",
            Self::ListDiagnostics { .. } => "list_diagnostics",
            Self::DiagnosticsList { .. } => "diagnostics_list",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "authenticate",
    "authenticated",
    "error",
    "ping",
    "pong",
    "heartbeat",
    "heartbeat_ack",
    "tool_call",
    "execute_raw",
    "tool_result",
    "health_check",
    "health_report",
    "list_diagnostics",
    "diagnostics_list",
    "disconnect",
];

#[derive(Debug, Error)]
pub enum CodecError {
    /// Not JSON, not an object, or no `type` field.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A `type` this codec does not know. Receivers log and drop these.
    #[error("unknown frame type '{0}'")]
    UnknownType(String),
    /// Known `type` but required fields absent or mistyped.
    #[error("invalid {frame_type} frame: {reason}")]
    InvalidFields {
        frame_type: String,
        reason: String,
    },
}

/// Encode a frame as a JSON text message.
pub fn encode(frame: &Frame) -> String {
    // Frame serialization cannot fail: every payload type is plain data.
    serde_json::to_string(frame).unwrap_or_else(|e| {
        log::error!("frame serialization failed: {e}");
        String::from("{\"type\":\"error\",\"error\":\"encode failure\"}")
    })
}

/// Decode one JSON text message into a frame.
pub fn decode(text: &str) -> Result<Frame, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed("no 'type' field".to_string()))?
        .to_string();

    if !KNOWN_TYPES.contains(&frame_type.as_str()) {
        return Err(CodecError::UnknownType(frame_type));
    }

    serde_json::from_value(value).map_err(|e| CodecError::InvalidFields {
        frame_type,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RiskLevel;
    use crate::tools::{ExecutionMetadata, ToolStatus};
    use serde_json::json;

    fn round_trip(frame: Frame) {
        let text = encode(&frame);
        let back = decode(&text).unwrap();
        assert_eq!(frame, back, "round trip failed for {text}");
    }

    #[test]
    fn all_simple_frames_round_trip() {
        round_trip(Frame::Authenticated);
        round_trip(Frame::Ping);
        round_trip(Frame::Pong);
        round_trip(Frame::Heartbeat);
        round_trip(Frame::HeartbeatAck);
        round_trip(Frame::Error { error: "bad token".into() });
        round_trip(Frame::Disconnect { reason: "shutting down".into() });
    }

    #[test]
    fn authenticate_round_trips() {
        round_trip(Frame::Authenticate {
            device_id: "d1".into(),
            device_token: "tok".into(),
            fingerprint: "ab12".into(),
        });
    }

    #[test]
    fn tool_call_round_trips_with_arguments() {
        round_trip(Frame::ToolCall {
            id: "call_1_x".into(),
            name: "echo".into(),
            arguments: json!({"message": "hi", "count": 2}),
            role: Role::HumanAgent,
        });
    }

    #[test]
    fn tool_result_flattens_result_fields() {
        let frame = Frame::ToolResult {
            id: "call_1_x".into(),
            result: ToolResult {
                status: ToolStatus::Success,
                output: "hi".into(),
                error: None,
                execution_time_ms: 12,
                metadata: ExecutionMetadata {
                    exit_code: Some(0),
                    truncated: false,
                    redactions: 0,
                },
            },
        };
        let text = encode(&frame);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["id"], "call_1_x");
        assert_eq!(value["status"], "success");
        assert_eq!(value["execution_time_ms"], 12);
        round_trip(frame);
    }

    #[test]
    fn execute_raw_round_trips() {
        round_trip(Frame::ExecuteRaw {
            id: "call_2_y".into(),
            command: "df -h".into(),
            timeout: 30,
            role: Role::HumanAgent,
        });
    }

    #[test]
    fn diagnostics_list_round_trips() {
        round_trip(Frame::DiagnosticsList {
            id: "call_3_z".into(),
            tools: vec![ToolInfo {
                name: "echo".into(),
                description: "Echo".into(),
                parameters: json!({"type": "object"}),
                risk_level: RiskLevel::Safe,
                min_role: Role::AiAgent,
            }],
        });
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = decode(r#"{"type": "warp_drive"}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(t) if t == "warp_drive"));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = decode(r#"{"type": "tool_call", "id": "c1"}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFields { frame_type, .. } if frame_type == "tool_call"));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(decode("not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn missing_arguments_decode_as_null() {
        // `arguments` is optional on the wire; absent decodes via Default.
        let frame = decode(
            r#"{"type": "tool_call", "id": "c1", "name": "echo", "role": "ai_agent"}"#,
        )
        .unwrap();
        match frame {
            Frame::ToolCall { arguments, .. } => assert!(arguments.is_null()),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
