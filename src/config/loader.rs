//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.opsclaw/config.toml` (or the path in `OPSCLAW_CONFIG`)
//! 2. Apply `OPSCLAW_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

/// Return the default config file path: `~/.opsclaw/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".opsclaw").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `OPSCLAW_CONFIG`).
pub fn load_default_config() -> AppConfig {
    let path = env::var("OPSCLAW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

/// Apply `OPSCLAW_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `OPSCLAW_BROKER_HOST`         → `broker.host`
/// - `OPSCLAW_BROKER_PORT`         → `broker.port`
/// - `OPSCLAW_BROKER_URL`          → `endpoint.broker_url`
/// - `OPSCLAW_COMMAND_TIMEOUT`     → `executor.command_timeout_secs`
/// - `OPSCLAW_MAX_OUTPUT_BYTES`    → `executor.max_output_bytes`
/// - `OPSCLAW_RATE_LIMIT_REQUESTS` → `executor.rate_limit_requests`
/// - `OPSCLAW_RATE_LIMIT_WINDOW`   → `executor.rate_limit_window_secs`
/// - `OPSCLAW_LOG_LEVEL`           → `logging.level`
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("OPSCLAW_BROKER_HOST") {
        config.broker.host = v;
    }
    if let Ok(v) = env::var("OPSCLAW_BROKER_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.broker.port = port;
        }
    }
    if let Ok(v) = env::var("OPSCLAW_BROKER_URL") {
        config.endpoint.broker_url = v;
    }
    if let Ok(v) = env::var("OPSCLAW_COMMAND_TIMEOUT") {
        if let Ok(secs) = v.parse::<u64>() {
            config.executor.command_timeout_secs = secs;
        }
    }
    if let Ok(v) = env::var("OPSCLAW_MAX_OUTPUT_BYTES") {
        if let Ok(bytes) = v.parse::<usize>() {
            config.executor.max_output_bytes = bytes;
        }
    }
    if let Ok(v) = env::var("OPSCLAW_RATE_LIMIT_REQUESTS") {
        if let Ok(n) = v.parse::<usize>() {
            config.executor.rate_limit_requests = n;
        }
    }
    if let Ok(v) = env::var("OPSCLAW_RATE_LIMIT_WINDOW") {
        if let Ok(secs) = v.parse::<u64>() {
            config.executor.rate_limit_window_secs = secs;
        }
    }
    if let Ok(v) = env::var("OPSCLAW_LOG_LEVEL") {
        config.logging.level = v;
    }
}

/// Atomically persist `config` to `path` (tmp file + rename), creating the
/// parent directory if needed.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), String> {
    let serialized =
        toml::to_string_pretty(config).map_err(|e| format!("failed to serialize config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, serialized).map_err(|e| format!("failed to write config: {e}"))?;
    fs::rename(&tmp, path).map_err(|e| format!("failed to move config into place: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is { not toml").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.broker.port = 9100;
        config.executor.rate_limit_requests = 5;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.broker.port, 9100);
        assert_eq!(loaded.executor.rate_limit_requests, 5);
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        save_config(&AppConfig::default(), &path).unwrap();
        assert!(path.exists());
    }
}
