//! Append-only audit sink.
//!
//! Three channels, each its own UTC-day-rotated file under the log dir:
//! `audit_YYYYMMDD.log` (tool execution outcomes), `authorization_YYYYMMDD.log`
//! (allow/deny decisions), and `connection_YYYYMMDD.log` (registry events).
//! One JSON record per line; writes are serialized by a single mutex and
//! files are created mode 0640.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::security::{AuthorizationDecision, Role};
use crate::tools::ToolStatus;

/// The audit-channel `output` field is capped to keep records greppable.
const OUTPUT_CAP_BYTES: usize = 500;

/// One tool-execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<Utc>,
    pub tool_name: String,
    pub role: Role,
    pub authorized: bool,
    pub status: ToolStatus,
    pub execution_time_ms: u64,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One connection-registry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub timestamp: chrono::DateTime<Utc>,
    pub event: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub struct AuditLog {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Open (creating the directory if needed) an audit log rooted at `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Record a tool execution outcome. The output field is truncated to
    /// [`OUTPUT_CAP_BYTES`] before writing.
    pub fn record_execution(&self, mut entry: AuditEntry) {
        if entry.output.len() > OUTPUT_CAP_BYTES {
            let mut cut = OUTPUT_CAP_BYTES;
            while cut > 0 && !entry.output.is_char_boundary(cut) {
                cut -= 1;
            }
            entry.output.truncate(cut);
        }
        self.append(&self.channel_path("audit"), &entry);
    }

    /// Record an authorization decision.
    pub fn record_authorization(&self, tool_name: &str, role: Role, decision: &AuthorizationDecision) {
        #[derive(Serialize)]
        struct AuthzRecord<'a> {
            timestamp: chrono::DateTime<Utc>,
            tool_name: &'a str,
            role: Role,
            allowed: bool,
            reason: &'a str,
        }
        let record = AuthzRecord {
            timestamp: decision.decided_at,
            tool_name,
            role,
            allowed: decision.allowed,
            reason: &decision.reason,
        };
        self.append(&self.channel_path("authorization"), &record);
    }

    /// Record a connection-registry event.
    pub fn record_connection(&self, event: &str, device_id: &str, details: Option<String>) {
        let record = ConnectionEvent {
            timestamp: Utc::now(),
            event: event.to_string(),
            device_id: device_id.to_string(),
            details,
        };
        self.append(&self.channel_path("connection"), &record);
    }

    /// Current file for a channel; the name rotates with the UTC date.
    fn channel_path(&self, channel: &str) -> PathBuf {
        let date = Utc::now().format("%Y%m%d");
        self.log_dir.join(format!("{channel}_{date}.log"))
    }

    fn append<T: Serialize>(&self, path: &Path, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                log::error!("audit record serialization failed: {e}");
                return;
            }
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let created = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path);
        match file {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    log::error!("audit write to {} failed: {e}", path.display());
                }
                if created {
                    restrict_mode(path);
                }
            }
            Err(e) => log::error!("audit open of {} failed: {e}", path.display()),
        }
    }
}

#[cfg(unix)]
fn restrict_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o640);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path) {}
