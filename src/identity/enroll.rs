//! One-shot enrollment against the broker.
//!
//! `POST {broker http url}/api/v1/enroll` with the operator-supplied code;
//! a success response carries the device id and bearer token that the
//! runtime later presents in its `authenticate` frame.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::store::DeviceIdentity;
use crate::tools::builtins::hostname;

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),
    #[error("enrollment request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("enrollment rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Serialize)]
struct EnrollRequest<'a> {
    enroll_code: &'a str,
    device_name: String,
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct EnrollResponse {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    device_token: String,
    #[serde(default)]
    error: Option<String>,
}

/// A stable, non-reversible identifier for this machine, sent with both
/// enrollment and authentication so the broker can spot token reuse from a
/// different host.
pub fn machine_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname());
    hasher.update(std::env::consts::OS);
    hasher.update(std::env::consts::ARCH);
    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Convert the configured WebSocket broker URL into its HTTP base.
fn http_base(broker_url: &str) -> Result<String, EnrollError> {
    let mut url =
        url::Url::parse(broker_url).map_err(|e| EnrollError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(EnrollError::InvalidUrl(format!("unsupported scheme '{other}'"))),
    };
    // set_scheme only fails for special-scheme mismatches that cannot occur here.
    let _ = url.set_scheme(scheme);
    url.set_path("");
    Ok(url.to_string().trim_end_matches('/').to_string())
}

/// Exchange an enrollment code for a [`DeviceIdentity`].
pub async fn enroll(broker_url: &str, enroll_code: &str) -> Result<DeviceIdentity, EnrollError> {
    let base = http_base(broker_url)?;
    let request = EnrollRequest {
        enroll_code,
        device_name: hostname(),
        fingerprint: machine_fingerprint(),
    };

    log::info!("enrolling against {base}");
    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/enroll"))
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    let body: EnrollResponse = response.json().await?;

    if !status.is_success() || body.device_id.is_empty() || body.device_token.is_empty() {
        let reason = body
            .error
            .unwrap_or_else(|| format!("broker returned {status}"));
        return Err(EnrollError::Rejected(reason));
    }

    Ok(DeviceIdentity {
        device_id: body.device_id,
        device_token: body.device_token,
        broker_url: broker_url.to_string(),
        enrolled_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_hex() {
        let a = machine_fingerprint();
        let b = machine_fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ws_url_maps_to_http_base() {
        assert_eq!(http_base("ws://127.0.0.1:8788").unwrap(), "http://127.0.0.1:8788");
        assert_eq!(http_base("wss://broker.example.com").unwrap(), "https://broker.example.com");
        assert_eq!(http_base("http://broker:8788").unwrap(), "http://broker:8788");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(matches!(http_base("ftp://x"), Err(EnrollError::InvalidUrl(_))));
    }
}
