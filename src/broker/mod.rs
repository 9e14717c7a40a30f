#[cfg(feature = "broker")]
pub mod auth;
pub mod connections;
#[cfg(feature = "broker")]
pub mod daemon;
pub mod directory;
pub mod dispatcher;
#[cfg(feature = "broker")]
pub mod routes;
pub mod waiters;
#[cfg(feature = "broker")]
pub mod ws;

pub use connections::{ConnectionInfo, ConnectionRegistry};
#[cfg(feature = "broker")]
pub use daemon::start_broker;
pub use directory::DeviceDirectory;
pub use dispatcher::{Confirmer, Dispatcher, IdleProbe, ToolInvocation};
pub use waiters::{WaitOutcome, WaiterError, WaiterStore};
