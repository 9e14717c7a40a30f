pub mod runtime;

pub use runtime::{AgentRuntime, Backoff};
