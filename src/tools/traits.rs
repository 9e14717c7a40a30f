use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::security::{RiskLevel, Role};

/// Outcome classification of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
    Unauthorized,
    Timeout,
    InvalidArguments,
    Blocked,
}

impl ToolStatus {
    /// Wire string form, as carried in `tool_result` frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::InvalidArguments => "invalid_arguments",
            Self::Blocked => "blocked",
        }
    }
}

/// Execution metadata carried alongside a result (never folded into the
/// status): exit code, truncation, and redaction counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub redactions: usize,
}

impl ExecutionMetadata {
    pub fn is_empty(&self) -> bool {
        self.exit_code.is_none() && !self.truncated && self.redactions == 0
    }
}

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    /// Human-readable output (stdout, probe summary, etc.).
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "ExecutionMetadata::is_empty")]
    pub metadata: ExecutionMetadata,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            output: output.into(),
            error: None,
            execution_time_ms: 0,
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::status_error(ToolStatus::Failure, error)
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::status_error(ToolStatus::Unauthorized, reason)
    }

    pub fn timeout(error: impl Into<String>) -> Self {
        Self::status_error(ToolStatus::Timeout, error)
    }

    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::status_error(ToolStatus::InvalidArguments, reason)
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::status_error(ToolStatus::Blocked, reason)
    }

    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.execution_time_ms = elapsed_ms;
        self
    }

    fn status_error(status: ToolStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms: 0,
            metadata: ExecutionMetadata::default(),
        }
    }
}

/// Per-tool authorization and execution constraints, set at registration
/// and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub min_role: Role,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_idle: bool,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub requires_sudo: bool,
    pub timeout_seconds: u64,
}

impl ToolPolicy {
    pub fn new(min_role: Role, risk_level: RiskLevel, timeout_seconds: u64) -> Self {
        Self {
            min_role,
            risk_level,
            requires_idle: false,
            requires_confirmation: false,
            requires_sudo: false,
            timeout_seconds,
        }
    }

    pub fn requires_idle(mut self) -> Self {
        self.requires_idle = true;
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn requires_sudo(mut self) -> Self {
        self.requires_sudo = true;
        self
    }
}

/// A capability the fabric can invoke on an endpoint.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"echo"`.
    fn name(&self) -> &str;

    /// Human-readable description surfaced in the tool catalog.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with arguments already validated against
    /// [`Tool::parameters_schema`] by the executor.
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;
}

/// Summary of a registered tool, suitable for `diagnostics_list` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub risk_level: RiskLevel,
    pub min_role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_strings() {
        assert_eq!(ToolStatus::Success.as_str(), "success");
        assert_eq!(ToolStatus::InvalidArguments.as_str(), "invalid_arguments");
        let json = serde_json::to_string(&ToolStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
    }

    #[test]
    fn result_constructors_set_status() {
        let r = ToolResult::success("hi");
        assert_eq!(r.status, ToolStatus::Success);
        assert_eq!(r.output, "hi");
        assert!(r.error.is_none());

        let r = ToolResult::blocked("matched token 'mkfs'");
        assert_eq!(r.status, ToolStatus::Blocked);
        assert_eq!(r.error.as_deref(), Some("matched token 'mkfs'"));
    }

    #[test]
    fn empty_metadata_is_skipped_in_json() {
        let r = ToolResult::success("ok");
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("metadata").is_none());

        let r = r.with_metadata(ExecutionMetadata {
            exit_code: Some(0),
            truncated: true,
            redactions: 2,
        });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["metadata"]["truncated"], true);
    }

    #[test]
    fn policy_builders_flip_flags() {
        let p = ToolPolicy::new(Role::HumanAgent, RiskLevel::Elevated, 30)
            .requires_sudo()
            .requires_confirmation();
        assert!(p.requires_sudo);
        assert!(p.requires_confirmation);
        assert!(!p.requires_idle);
    }
}
