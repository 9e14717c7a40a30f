//! In-memory device directory and enrollment codes.
//!
//! The fabric deliberately keeps no durable user/device database; a broker
//! restart forgets enrollments. Codes are single-use and expire.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// How long a minted enrollment code stays redeemable.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_token: String,
    pub device_name: String,
    pub fingerprint: String,
    pub enrolled_at: DateTime<Utc>,
}

struct EnrollCode {
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct DeviceDirectory {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    codes: Mutex<HashMap<String, EnrollCode>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a single-use enrollment code valid for `ttl`.
    pub fn mint_code(&self, ttl: Duration) -> String {
        let code = Uuid::new_v4().to_string().replace('-', "");
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));
        self.codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code.clone(), EnrollCode { expires_at });
        code
    }

    /// Redeem `code`, registering a new device. The code is consumed even
    /// on the expiry path so it cannot be retried.
    pub fn enroll(
        &self,
        code: &str,
        device_name: &str,
        fingerprint: &str,
    ) -> Result<DeviceRecord, String> {
        let entry = self
            .codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(code);
        let Some(entry) = entry else {
            return Err("unknown enrollment code".to_string());
        };
        if entry.expires_at < Utc::now() {
            return Err("enrollment code expired".to_string());
        }

        let record = DeviceRecord {
            device_id: Uuid::new_v4().to_string(),
            device_token: Uuid::new_v4().to_string().replace('-', ""),
            device_name: device_name.to_string(),
            fingerprint: fingerprint.to_string(),
            enrolled_at: Utc::now(),
        };
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.device_id.clone(), record.clone());
        log::info!("enrolled device '{}' ({})", record.device_id, device_name);
        Ok(record)
    }

    /// Check the credentials an `authenticate` frame presented.
    pub fn verify(&self, device_id: &str, device_token: &str) -> bool {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .is_some_and(|record| record.device_token == device_token)
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_enroll_verify_round_trip() {
        let dir = DeviceDirectory::new();
        let code = dir.mint_code(DEFAULT_CODE_TTL);
        let record = dir.enroll(&code, "laptop-7", "fp").unwrap();
        assert!(dir.verify(&record.device_id, &record.device_token));
        assert!(!dir.verify(&record.device_id, "wrong-token"));
        assert!(!dir.verify("ghost", &record.device_token));
    }

    #[test]
    fn codes_are_single_use() {
        let dir = DeviceDirectory::new();
        let code = dir.mint_code(DEFAULT_CODE_TTL);
        dir.enroll(&code, "a", "fp").unwrap();
        assert!(dir.enroll(&code, "b", "fp").is_err());
    }

    #[test]
    fn unknown_code_is_rejected() {
        let dir = DeviceDirectory::new();
        assert!(dir.enroll("nope", "a", "fp").is_err());
        assert_eq!(dir.device_count(), 0);
    }

    #[test]
    fn expired_code_is_rejected_and_consumed() {
        let dir = DeviceDirectory::new();
        let code = dir.mint_code(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(dir.enroll(&code, "a", "fp").unwrap_err().contains("expired"));
        assert!(dir.enroll(&code, "a", "fp").unwrap_err().contains("unknown"));
    }
}
