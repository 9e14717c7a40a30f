pub mod authorization;
pub mod blocklist;
pub mod rate_limit;
pub mod sanitize;

use serde::{Deserialize, Serialize};

pub use authorization::{AuthorizationDecision, AuthzSignals, authorize};
pub use blocklist::screen_command;
pub use rate_limit::SlidingWindow;
pub use sanitize::{SanitizedOutput, sanitize_output};

/// Principal label attached to every invocation. Totally ordered:
/// `AiAgent < HumanAgent < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    AiAgent,
    HumanAgent,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiAgent => "ai_agent",
            Self::HumanAgent => "human_agent",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tier of a tool policy. Influences confirmation/notification
/// surfaces, not the allow decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Caution,
    Elevated,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Safe => "safe",
            Self::Caution => "caution",
            Self::Elevated => "elevated",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_is_total() {
        assert!(Role::AiAgent < Role::HumanAgent);
        assert!(Role::HumanAgent < Role::Admin);
        assert!(Role::Admin >= Role::AiAgent);
    }

    #[test]
    fn role_wire_form_is_snake_case() {
        assert_eq!(serde_json::to_string(&Role::HumanAgent).unwrap(), "\"human_agent\"");
        let r: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(r, Role::Admin);
    }
}
