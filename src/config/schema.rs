//! TOML configuration schema for opsclaw.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.opsclaw/config.toml`:
//! ```toml
//! [broker]
//! host = "127.0.0.1"
//! port = 8788
//!
//! [endpoint]
//! broker_url = "ws://127.0.0.1:8788"
//!
//! [executor]
//! command_timeout_secs = 60
//! max_output_bytes = 65536
//!
//! [logging]
//! level = "info"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─── BrokerConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Sockets that have not authenticated within this window are closed.
    pub auth_deadline_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8788,
            auth_deadline_secs: 10,
            heartbeat_interval_secs: 30,
        }
    }
}

// ─── EndpointConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub broker_url: String,
    /// Initial reconnect delay; doubled per failure up to the cap.
    pub reconnect_base_secs: u64,
    pub reconnect_cap_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://127.0.0.1:8788".to_owned(),
            reconnect_base_secs: 5,
            reconnect_cap_secs: 60,
            heartbeat_interval_secs: 30,
        }
    }
}

// ─── ExecutorSection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSection {
    pub command_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            max_output_bytes: 64 * 1024,
            rate_limit_requests: 30,
            rate_limit_window_secs: 60,
        }
    }
}

// ─── LoggingConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Audit-log directory; `~` is expanded by the loader.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

// ─── IdentitySection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentitySection {
    /// Identity-file directory; defaults to the platform config dir.
    pub dir: Option<PathBuf>,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub endpoint: EndpointConfig,
    pub executor: ExecutorSection,
    pub logging: LoggingConfig,
    pub identity: IdentitySection,
}

impl AppConfig {
    /// Audit-log directory, resolved to a concrete path.
    pub fn log_dir(&self) -> PathBuf {
        self.logging.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("opsclaw")
                .join("logs")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = AppConfig::default();
        assert_eq!(c.broker.port, 8788);
        assert_eq!(c.endpoint.reconnect_base_secs, 5);
        assert_eq!(c.endpoint.reconnect_cap_secs, 60);
        assert_eq!(c.executor.max_output_bytes, 64 * 1024);
    }

    #[test]
    fn partial_toml_fills_with_defaults() {
        let c: AppConfig = toml::from_str("[broker]\nport = 9000\n").unwrap();
        assert_eq!(c.broker.port, 9000);
        assert_eq!(c.broker.host, "127.0.0.1");
        assert_eq!(c.executor.rate_limit_requests, 30);
    }

    #[test]
    fn empty_toml_is_valid() {
        let c: AppConfig = toml::from_str("").unwrap();
        assert_eq!(c, AppConfig::default());
    }
}
