//! Role/policy authorization for tool invocations.
//!
//! `authorize` is pure and deterministic: it performs no I/O and decides
//! from the policy, the caller's role, and the runtime signals alone.
//! The first failing check wins and its reason is user-actionable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::tools::ToolPolicy;

/// Runtime signals consulted during authorization.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthzSignals {
    /// Whether the device's user is currently idle. `None` means the idle
    /// collaborator could not answer.
    pub is_user_idle: Option<bool>,
}

/// The outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

impl AuthorizationDecision {
    fn allow(reason: String) -> Self {
        Self {
            allowed: true,
            reason,
            decided_at: Utc::now(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
            decided_at: Utc::now(),
        }
    }
}

/// Decide whether `role` may run `tool_name` under `policy`.
///
/// `requires_confirmation` does not deny here; it is surfaced to the
/// dispatcher as policy metadata for the out-of-band confirmation
/// collaborator. An unknown idle state counts as "not idle" (fail closed).
pub fn authorize(
    tool_name: &str,
    policy: &ToolPolicy,
    role: Role,
    signals: AuthzSignals,
) -> AuthorizationDecision {
    if role < policy.min_role {
        return AuthorizationDecision::deny(format!(
            "insufficient privileges for '{tool_name}': required {}, provided {}",
            policy.min_role, role
        ));
    }

    if policy.requires_idle && signals.is_user_idle != Some(true) {
        return AuthorizationDecision::deny(format!(
            "tool '{tool_name}' requires the user to be idle"
        ));
    }

    if policy.requires_confirmation {
        log::info!(
            "tool '{tool_name}' requires confirmation (risk={})",
            policy.risk_level
        );
    }

    AuthorizationDecision::allow(format!("authorized for role {role}"))
}
