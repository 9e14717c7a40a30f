pub mod builtins;
pub mod registry;
pub mod schema;
pub mod traits;

pub use builtins::{EchoTool, HostInfoTool, register_builtin_tools};
pub use registry::{RegistryError, ToolRegistry};
pub use schema::validate_arguments;
pub use traits::{ExecutionMetadata, Tool, ToolInfo, ToolPolicy, ToolResult, ToolStatus};
