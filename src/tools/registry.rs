use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use super::traits::{Tool, ToolInfo, ToolPolicy};
use crate::security::Role;

/// Errors surfaced at tool registration time.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("invalid policy for tool '{0}': timeout_seconds must be > 0")]
    InvalidPolicy(String),
}

struct Entry {
    tool: Arc<dyn Tool>,
    policy: ToolPolicy,
}

/// Central registry of tools and their policies.
///
/// Registration happens once at startup; afterwards the registry is shared
/// as `Arc<ToolRegistry>` and every lookup is a plain read with no lock on
/// the hot path.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a tool with its policy.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] when the name is
    /// taken, unless `override_existing` is set; overrides are logged.
    pub fn register(
        &mut self,
        tool: Arc<dyn Tool>,
        policy: ToolPolicy,
        override_existing: bool,
    ) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if policy.timeout_seconds == 0 {
            return Err(RegistryError::InvalidPolicy(name));
        }
        if self.entries.contains_key(&name) {
            if !override_existing {
                return Err(RegistryError::AlreadyRegistered(name));
            }
            log::warn!("tool '{name}' re-registered with override");
        }
        log::info!(
            "registered tool '{name}' (min_role={}, risk={}, timeout={}s)",
            policy.min_role,
            policy.risk_level,
            policy.timeout_seconds
        );
        self.entries.insert(name, Entry { tool, policy });
        Ok(())
    }

    /// Look up a tool and its policy by name.
    pub fn lookup(&self, name: &str) -> Option<(Arc<dyn Tool>, &ToolPolicy)> {
        self.entries.get(name).map(|e| (e.tool.clone(), &e.policy))
    }

    pub fn policy(&self, name: &str) -> Option<&ToolPolicy> {
        self.entries.get(name).map(|e| &e.policy)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of tools whose policy admits `role`, sorted for stable output.
    pub fn tools_visible_to(&self, role: Role) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| role >= e.policy.min_role)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Catalog entries for tools visible to `role`.
    pub fn catalog_for(&self, role: Role) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .entries
            .values()
            .filter(|e| role >= e.policy.min_role)
            .map(|e| ToolInfo {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
                risk_level: e.policy.risk_level,
                min_role: e.policy.min_role,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RiskLevel;
    use crate::tools::traits::ToolResult;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct DummyTool(&'static str);

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "A test tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::success("done"))
        }
    }

    fn safe_policy() -> ToolPolicy {
        ToolPolicy::new(Role::AiAgent, RiskLevel::Safe, 30)
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("dummy")), safe_policy(), false)
            .unwrap();
        assert!(reg.lookup("dummy").is_some());
        assert!(reg.lookup("nonexistent").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("dummy")), safe_policy(), false)
            .unwrap();
        let err = reg
            .register(Arc::new(DummyTool("dummy")), safe_policy(), false)
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("dummy".into()));
    }

    #[test]
    fn explicit_override_replaces_entry() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("dummy")), safe_policy(), false)
            .unwrap();
        let elevated = ToolPolicy::new(Role::Admin, RiskLevel::Elevated, 10);
        reg.register(Arc::new(DummyTool("dummy")), elevated, true)
            .unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.policy("dummy").unwrap().min_role, Role::Admin);
    }

    #[test]
    fn zero_timeout_policy_is_rejected() {
        let mut reg = ToolRegistry::new();
        let bad = ToolPolicy::new(Role::AiAgent, RiskLevel::Safe, 0);
        let err = reg
            .register(Arc::new(DummyTool("dummy")), bad, false)
            .unwrap_err();
        assert_eq!(err, RegistryError::InvalidPolicy("dummy".into()));
        assert!(reg.is_empty());
    }

    #[test]
    fn visibility_filters_by_role_floor() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool("probe")), safe_policy(), false)
            .unwrap();
        reg.register(
            Arc::new(DummyTool("repair")),
            ToolPolicy::new(Role::HumanAgent, RiskLevel::Caution, 60),
            false,
        )
        .unwrap();
        reg.register(
            Arc::new(DummyTool("restart_host")),
            ToolPolicy::new(Role::Admin, RiskLevel::Elevated, 30),
            false,
        )
        .unwrap();

        assert_eq!(reg.tools_visible_to(Role::AiAgent), vec!["probe"]);
        assert_eq!(reg.tools_visible_to(Role::HumanAgent), vec!["probe", "repair"]);
        assert_eq!(
            reg.tools_visible_to(Role::Admin),
            vec!["probe", "repair", "restart_host"]
        );
    }

    #[test]
    fn catalog_carries_policy_metadata() {
        let mut reg = ToolRegistry::new();
        reg.register(
            Arc::new(DummyTool("repair")),
            ToolPolicy::new(Role::HumanAgent, RiskLevel::Caution, 60),
            false,
        )
        .unwrap();
        let catalog = reg.catalog_for(Role::Admin);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].risk_level, RiskLevel::Caution);
        assert_eq!(catalog[0].min_role, Role::HumanAgent);
    }
}
