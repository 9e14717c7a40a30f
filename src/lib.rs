#[cfg(feature = "agent")]
pub mod agent;
pub mod audit;
pub mod broker;
pub mod config;
pub mod executor;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod security;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types
/// across the opsclaw codebase.
///
/// ```rust
/// use opsclaw::prelude::*;
/// ```
pub mod prelude {
    // Tool system
    pub use crate::tools::{
        Tool, ToolPolicy, ToolRegistry, ToolResult, ToolStatus, register_builtin_tools,
    };

    // Security
    pub use crate::security::{AuthzSignals, RiskLevel, Role, authorize};

    // Broker fabric
    pub use crate::broker::{
        ConnectionRegistry, DeviceDirectory, Dispatcher, ToolInvocation, WaiterStore,
    };

    // Endpoint side
    #[cfg(feature = "agent")]
    pub use crate::agent::AgentRuntime;
    pub use crate::executor::{Executor, ExecutorConfig};
    pub use crate::identity::{DeviceIdentity, IdentityStore};

    // Wire protocol
    pub use crate::protocol::{Frame, decode, encode};

    // Audit
    pub use crate::audit::{AuditEntry, AuditLog};

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};
}
