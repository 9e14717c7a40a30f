//! Built-in tools every endpoint carries.
//!
//! Domain catalogs (network resets, service restarts, …) are registered by
//! the embedding application; the fabric itself ships only `echo` for
//! connectivity checks and `host_info` for the health surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::registry::{RegistryError, ToolRegistry};
use super::traits::{Tool, ToolPolicy, ToolResult};
use crate::security::{RiskLevel, Role};

/// Round-trip probe: returns its `message` argument unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given message unchanged. Used to verify end-to-end connectivity."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to echo back."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("pong");
        Ok(ToolResult::success(message))
    }
}

/// Report static facts about the host: hostname, OS, agent version.
pub struct HostInfoTool;

#[async_trait]
impl Tool for HostInfoTool {
    fn name(&self) -> &str {
        "host_info"
    }

    fn description(&self) -> &str {
        "Report hostname, operating system, and agent version of this endpoint."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        let info = json!({
            "hostname": hostname(),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "agent_version": env!("CARGO_PKG_VERSION"),
        });
        Ok(ToolResult::success(info.to_string()))
    }
}

pub(crate) fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Register the built-in tools into `registry`.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        Arc::new(EchoTool),
        ToolPolicy::new(Role::AiAgent, RiskLevel::Safe, 10),
        false,
    )?;
    registry.register(
        Arc::new(HostInfoTool),
        ToolPolicy::new(Role::AiAgent, RiskLevel::Safe, 10),
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolStatus;

    #[tokio::test]
    async fn echo_returns_message() {
        let r = EchoTool
            .execute(json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(r.status, ToolStatus::Success);
        assert_eq!(r.output, "hi");
    }

    #[tokio::test]
    async fn echo_defaults_without_message() {
        let r = EchoTool.execute(json!({})).await.unwrap();
        assert_eq!(r.output, "pong");
    }

    #[tokio::test]
    async fn host_info_reports_os() {
        let r = HostInfoTool.execute(json!({})).await.unwrap();
        let v: Value = serde_json::from_str(&r.output).unwrap();
        assert_eq!(v["os"], std::env::consts::OS);
        assert!(v["agent_version"].is_string());
    }

    #[test]
    fn builtins_register_cleanly() {
        let mut reg = ToolRegistry::new();
        register_builtin_tools(&mut reg).unwrap();
        assert!(reg.contains("echo"));
        assert!(reg.contains("host_info"));
    }
}
