// ============================================
// File: crates/latchlink-daemon/src/cloud/models.rs
// ============================================
//! # Cloud API Data Models
//!
//! ## Main Data Structures
//! - `Envelope<T>`: `{result, success, errorMessages, statusCode}` wrapper
//!   every endpoint answers with
//! - `RegisterMobileRequest` / `RegisterMobileResult`: `POST /my/mobile`
//! - `CertificateResult`: `GET /my/devicecertificate/getformobile`
//! - `SignedTimeResult`: `GET /datetime/getsignedtime`
//! - `ActivityRecord`: `GET /my/deviceactivity`
//! - `DeviceDetailsResult`: `GET /my/device/details`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field names are camelCase on the wire
//! - Binary values (certificate, keys, signatures) travel as base64
//! - Activity records without a user are system actions and are skipped

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use latchlink_common::types::{ActorId, DeviceId};
use latchlink_core::crypto::{Certificate, IdentityPublicKey, SignedTimestamp, ED25519_SIGNATURE_SIZE};

use super::{ActivityEntry, CloudResult, IssuedCertificate, LockInfo};
use crate::error::CloudError;

/// `operatingSystem` value the service expects for this client type.
pub const OPERATING_SYSTEM_OTHER: u8 = 3;

// ============================================
// Envelope
// ============================================

/// Response wrapper.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Payload.
    pub result: Option<T>,
    /// Service-level success flag.
    #[serde(default)]
    pub success: bool,
    /// Error messages on failure.
    #[serde(default)]
    pub error_messages: Vec<String>,
    /// Echo of the HTTP status.
    #[serde(default)]
    pub status_code: u16,
}

impl<T> Envelope<T> {
    /// Unwraps a successful response.
    ///
    /// # Errors
    /// `Status` if the service reported failure, `InvalidResponse` if the
    /// payload is missing.
    pub fn into_result(self, http_status: u16) -> CloudResult<T> {
        if !self.success {
            return Err(CloudError::Status {
                status: if self.status_code == 0 { http_status } else { self.status_code },
                messages: self.error_messages,
            });
        }
        self.result
            .ok_or_else(|| CloudError::invalid("success without result"))
    }
}

// ============================================
// Registration
// ============================================

/// Body of `POST /my/mobile`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMobileRequest {
    /// Controller name shown in the vendor app.
    pub name: String,
    /// Client type.
    pub operating_system: u8,
    /// Device public key, base64.
    pub public_key: String,
}

impl RegisterMobileRequest {
    /// Builds the request for `public_key`.
    #[must_use]
    pub fn new(name: impl Into<String>, public_key: &IdentityPublicKey) -> Self {
        Self {
            name: name.into(),
            operating_system: OPERATING_SYSTEM_OTHER,
            public_key: BASE64.encode(public_key.as_bytes()),
        }
    }
}

/// Result of `POST /my/mobile`.
#[derive(Debug, Deserialize)]
pub struct RegisterMobileResult {
    /// Mobile id.
    pub id: u64,
}

// ============================================
// Certificate
// ============================================

/// Result of `GET /my/devicecertificate/getformobile`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResult {
    /// Certificate, base64.
    pub certificate: String,
    /// Expiry as reported by the service (informational).
    #[serde(default)]
    pub expiration_date: String,
    /// Lock identity key, base64.
    pub device_public_key: String,
}

impl CertificateResult {
    /// Decodes the binary fields.
    ///
    /// # Errors
    /// `InvalidResponse` on bad base64 or malformed key material.
    pub fn into_issued(self) -> CloudResult<IssuedCertificate> {
        let cert_bytes = BASE64
            .decode(&self.certificate)
            .map_err(|e| CloudError::invalid(format!("certificate: {e}")))?;
        let certificate = Certificate::from_bytes(&cert_bytes)
            .map_err(|e| CloudError::invalid(format!("certificate: {e}")))?;
        let key_bytes = BASE64
            .decode(&self.device_public_key)
            .map_err(|e| CloudError::invalid(format!("devicePublicKey: {e}")))?;
        let lock_key = IdentityPublicKey::from_slice(&key_bytes)
            .map_err(|e| CloudError::invalid(format!("devicePublicKey: {e}")))?;
        Ok(IssuedCertificate {
            certificate,
            lock_key,
        })
    }
}

// ============================================
// Signed Time
// ============================================

/// Result of `GET /datetime/getsignedtime`.
#[derive(Debug, Deserialize)]
pub struct SignedTimeResult {
    /// Unix milliseconds, decimal.
    pub datetime: String,
    /// Authority signature, base64.
    pub signature: String,
}

impl SignedTimeResult {
    /// Decodes into a signed timestamp.
    ///
    /// # Errors
    /// `InvalidResponse` if either field is malformed.
    pub fn into_signed(self) -> CloudResult<SignedTimestamp> {
        let millis: i64 = self
            .datetime
            .trim()
            .parse()
            .map_err(|e| CloudError::invalid(format!("datetime: {e}")))?;
        let signature = BASE64
            .decode(&self.signature)
            .map_err(|e| CloudError::invalid(format!("signature: {e}")))?;
        if signature.len() != ED25519_SIGNATURE_SIZE {
            return Err(CloudError::invalid(format!(
                "signature: expected {ED25519_SIGNATURE_SIZE} bytes, got {}",
                signature.len()
            )));
        }
        let mut wire = millis.to_be_bytes().to_vec();
        wire.extend_from_slice(&signature);
        SignedTimestamp::from_bytes(&wire).map_err(|e| CloudError::invalid(e.to_string()))
    }
}

// ============================================
// Activity
// ============================================

/// One record of `GET /my/deviceactivity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    /// Actor id, absent for system actions.
    #[serde(default)]
    pub user_id: Option<u32>,
    /// Display name.
    #[serde(default)]
    pub username: Option<String>,
}

impl ActivityRecord {
    /// Converts records naming a user.
    #[must_use]
    pub fn into_entry(self) -> Option<ActivityEntry> {
        match (self.user_id, self.username) {
            (Some(id), Some(name)) if id != 0 && !name.is_empty() => Some(ActivityEntry {
                actor: ActorId(id),
                name,
            }),
            _ => None,
        }
    }
}

// ============================================
// Device Details
// ============================================

/// Result of `GET /my/device/details`.
#[derive(Debug, Deserialize)]
pub struct DeviceDetailsResult {
    /// Locks on the account.
    #[serde(default)]
    pub locks: Vec<LockRecord>,
}

/// One lock in the device details.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Device id.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Serial number.
    #[serde(default)]
    pub serial_number: String,
}

impl From<LockRecord> for LockInfo {
    fn from(record: LockRecord) -> Self {
        Self {
            id: DeviceId(record.id),
            name: record.name,
            serial: record.serial_number,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use latchlink_common::time::Timestamp;
    use latchlink_core::crypto::IdentityKeyPair;

    #[test]
    fn test_envelope_failure() {
        let json = r#"{"result":null,"success":false,"errorMessages":["Invalid key"],"statusCode":401}"#;
        let envelope: Envelope<RegisterMobileResult> = serde_json::from_str(json).unwrap();
        match envelope.into_result(401) {
            Err(CloudError::Status { status, messages }) => {
                assert_eq!(status, 401);
                assert_eq!(messages, vec!["Invalid key".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_certificate_result() {
        let authority = IdentityKeyPair::generate();
        let device = IdentityKeyPair::generate();
        let lock = IdentityKeyPair::generate();
        let cert = Certificate::issue(
            &authority,
            device.public_key(),
            DeviceId(7),
            Timestamp::from_secs(1_700_000_000),
            Timestamp::from_secs(1_702_000_000),
        );
        let json = format!(
            r#"{{"result":{{"certificate":"{}","expirationDate":"2023-12-08T00:00:00Z","devicePublicKey":"{}"}},"success":true,"errorMessages":[],"statusCode":200}}"#,
            BASE64.encode(cert.to_bytes()),
            BASE64.encode(lock.public_key().as_bytes()),
        );
        let envelope: Envelope<CertificateResult> = serde_json::from_str(&json).unwrap();
        let issued = envelope.into_result(200).unwrap().into_issued().unwrap();
        assert_eq!(issued.certificate, cert);
        assert_eq!(issued.lock_key, lock.public_key());
    }

    #[test]
    fn test_signed_time_result() {
        let authority = IdentityKeyPair::generate();
        let signed = SignedTimestamp::issue(&authority, Timestamp::from_millis(1_700_000_000_123));
        let wire = signed.to_bytes();
        let result = SignedTimeResult {
            datetime: "1700000000123".into(),
            signature: BASE64.encode(&wire[8..]),
        };
        let decoded = result.into_signed().unwrap();
        assert_eq!(decoded, signed);
        assert!(decoded.verify(&authority.public_key()).is_ok());

        let short = SignedTimeResult {
            datetime: "1".into(),
            signature: BASE64.encode([0u8; 10]),
        };
        assert!(short.into_signed().is_err());
    }

    #[test]
    fn test_activity_records() {
        let json = r#"[
            {"userId": 11, "username": "Alice"},
            {"userId": null, "username": null},
            {"userId": 12, "username": "Bob", "event": 32}
        ]"#;
        let records: Vec<ActivityRecord> = serde_json::from_str(json).unwrap();
        let entries: Vec<_> = records.into_iter().filter_map(ActivityRecord::into_entry).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].actor, ActorId(12));
        assert_eq!(entries[1].name, "Bob");
    }

    #[test]
    fn test_register_request_shape() {
        let key = IdentityKeyPair::generate().public_key();
        let body = serde_json::to_value(RegisterMobileRequest::new("latchlink", &key)).unwrap();
        assert_eq!(body["operatingSystem"], 3);
        assert_eq!(body["name"], "latchlink");
        assert!(body["publicKey"].is_string());
    }
}
