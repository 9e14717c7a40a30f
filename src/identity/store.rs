//! Persistent device identity.
//!
//! Two files under the config dir, both owner-read-write only:
//! `device.id` holds the stable device UUID (created once and reused across
//! re-enrollments), `auth.json` holds the enrollment credentials. Absence
//! of `auth.json` means "not enrolled".

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("device is not enrolled")]
    NotEnrolled,
    #[error("identity io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Enrollment credentials persisted on the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_token: String,
    pub broker_url: String,
    pub enrolled_at: DateTime<Utc>,
}

pub struct IdentityStore {
    config_dir: PathBuf,
}

impl IdentityStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Default location: `~/.config/opsclaw`.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("opsclaw")
    }

    fn auth_path(&self) -> PathBuf {
        self.config_dir.join("auth.json")
    }

    fn device_id_path(&self) -> PathBuf {
        self.config_dir.join("device.id")
    }

    /// The stable device id, minted on first call and reused afterwards.
    pub fn get_or_create_device_id(&self) -> Result<String, IdentityError> {
        let path = self.device_id_path();
        if let Ok(existing) = fs::read_to_string(&path) {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }

        fs::create_dir_all(&self.config_dir)?;
        let device_id = Uuid::new_v4().to_string();
        fs::write(&path, &device_id)?;
        set_owner_only(&path)?;
        Ok(device_id)
    }

    /// Load the enrollment credentials, or [`IdentityError::NotEnrolled`].
    pub fn load(&self) -> Result<DeviceIdentity, IdentityError> {
        let path = self.auth_path();
        if !path.exists() {
            return Err(IdentityError::NotEnrolled);
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Persist credentials with owner-only permissions.
    pub fn save(&self, identity: &DeviceIdentity) -> Result<(), IdentityError> {
        fs::create_dir_all(&self.config_dir)?;
        let path = self.auth_path();
        fs::write(&path, serde_json::to_string_pretty(identity)?)?;
        set_owner_only(&path)?;
        Ok(())
    }

    /// Remove the credentials (and the stable device id). After this the
    /// device reads as not enrolled.
    pub fn clear(&self) -> Result<(), IdentityError> {
        for path in [self.auth_path(), self.device_id_path()] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    pub fn is_enrolled(&self) -> bool {
        self.auth_path().exists()
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "d1".into(),
            device_token: "tok-abc".into(),
            broker_url: "ws://127.0.0.1:8788".into(),
            enrolled_at: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        store.save(&identity()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.device_id, "d1");
        assert_eq!(loaded.device_token, "tok-abc");
    }

    #[test]
    fn load_without_enrollment_errors() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        assert!(matches!(store.load(), Err(IdentityError::NotEnrolled)));
        assert!(!store.is_enrolled());
    }

    #[test]
    fn clear_removes_credentials() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        store.save(&identity()).unwrap();
        store.get_or_create_device_id().unwrap();
        store.clear().unwrap();
        assert!(!store.is_enrolled());
        assert!(matches!(store.load(), Err(IdentityError::NotEnrolled)));
    }

    #[test]
    fn device_id_is_stable_across_calls() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let first = store.get_or_create_device_id().unwrap();
        let second = store.get_or_create_device_id().unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn identity_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        store.save(&identity()).unwrap();
        store.get_or_create_device_id().unwrap();

        for name in ["auth.json", "device.id"] {
            let mode = fs::metadata(dir.path().join(name))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{name} must be owner-only");
        }
    }
}
