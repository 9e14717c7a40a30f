//! Diagnostic logging bootstrap for the binaries.
//!
//! Audit records are a separate concern (see [`crate::audit`]); this is
//! operator-facing stderr logging only.

/// Initialise the tracing subscriber.
///
/// Verbosity comes from `RUST_LOG` when set, otherwise from `level`
/// (typically the `logging.level` config key, overridable with
/// `OPSCLAW_LOG_LEVEL`). All existing `log::` call sites are forwarded
/// into the tracing pipeline via `LogTracer`.
pub fn init(level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();

    // Forward all log:: macro call sites into the tracing pipeline.
    tracing_log::LogTracer::init().ok();
}
