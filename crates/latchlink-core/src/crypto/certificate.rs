// ============================================
// File: crates/latchlink-core/src/crypto/certificate.rs
// ============================================
//! # Certificates and Signed Time
//!
//! ## Creation Reason
//! The lock trusts exactly one key: the cloud authority. The controller
//! proves it may operate a lock by presenting a certificate the authority
//! issued for its device key, together with an authority-signed time
//! value proving the handshake is fresh.
//!
//! ## Main Functionality
//! - `Certificate`: Subject key + device id + validity window, signed by
//!   the authority
//! - `SignedTimestamp`: Wall-clock time signed by the authority
//!
//! ## Wire Format
//! ```text
//! Certificate (121 bytes)
//! ┌─────────┬──────────┬───────────┬────────────┬─────────────┬───────────┐
//! │ ver (1) │ key (32) │ device(8) │ from (8)   │ until (8)   │ sig (64)  │
//! └─────────┴──────────┴───────────┴────────────┴─────────────┴───────────┘
//! SignedTimestamp (72 bytes)
//! ┌────────────┬───────────┐
//! │ time (8)   │ sig (64)  │
//! └────────────┴───────────┘
//! ```
//! Integers are big-endian; times are Unix milliseconds.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Signatures cover a context string plus every field before `sig`
//! - Both types serialize as base64 of the wire bytes, which is also the
//!   form the cloud API returns
//!
//! ## Last Modified
//! v0.1.0 - Initial certificate format

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use latchlink_common::time::Timestamp;
use latchlink_common::types::DeviceId;

use super::keys::{IdentityKeyPair, IdentityPublicKey};
use super::{CERTIFICATE_CONTEXT, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, SIGNED_TIME_CONTEXT};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Current certificate format version.
pub const CERTIFICATE_VERSION: u8 = 1;

/// Size of an encoded certificate.
pub const CERTIFICATE_SIZE: usize = 1 + ED25519_PUBLIC_KEY_SIZE + 8 + 8 + 8 + ED25519_SIGNATURE_SIZE;

/// Size of an encoded signed timestamp.
pub const SIGNED_TIMESTAMP_SIZE: usize = 8 + ED25519_SIGNATURE_SIZE;

const CERTIFICATE_SIGNED_LEN: usize = CERTIFICATE_SIZE - ED25519_SIGNATURE_SIZE;

// ============================================
// Certificate
// ============================================

/// Authority-issued binding of a device key to one lock.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    subject: IdentityPublicKey,
    device_id: DeviceId,
    valid_from: Timestamp,
    valid_until: Timestamp,
    signature: [u8; ED25519_SIGNATURE_SIZE],
}

impl Certificate {
    /// Issues a certificate. Used by the cloud authority and the simulator.
    #[must_use]
    pub fn issue(
        authority: &IdentityKeyPair,
        subject: IdentityPublicKey,
        device_id: DeviceId,
        valid_from: Timestamp,
        valid_until: Timestamp,
    ) -> Self {
        let mut cert = Self {
            subject,
            device_id,
            valid_from,
            valid_until,
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        };
        cert.signature = authority.sign(&cert.signed_data());
        cert
    }

    /// Key this certificate vouches for.
    #[must_use]
    pub const fn subject(&self) -> &IdentityPublicKey {
        &self.subject
    }

    /// Lock this certificate grants access to.
    #[must_use]
    pub const fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Start of the validity window.
    #[must_use]
    pub const fn valid_from(&self) -> Timestamp {
        self.valid_from
    }

    /// End of the validity window.
    #[must_use]
    pub const fn expires_at(&self) -> Timestamp {
        self.valid_until
    }

    /// Returns `true` if `at` lies inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        at >= self.valid_from && at <= self.valid_until
    }

    /// Checks the validity window at `at`.
    ///
    /// # Errors
    /// `CertificateExpired` after the window, `CertificateInvalid` before it.
    pub fn check_valid_at(&self, at: Timestamp) -> Result<()> {
        if at > self.valid_until {
            return Err(CoreError::CertificateExpired {
                expired_at: self.valid_until,
            });
        }
        if at < self.valid_from {
            return Err(CoreError::certificate(format!(
                "not valid before {}",
                self.valid_from
            )));
        }
        Ok(())
    }

    /// Verifies the authority signature.
    ///
    /// # Errors
    /// Returns `CertificateInvalid` if the signature does not match.
    pub fn verify(&self, authority: &IdentityPublicKey) -> Result<()> {
        authority
            .verify(&self.signed_data(), &self.signature)
            .map_err(|_| CoreError::certificate("authority signature mismatch"))
    }

    /// Encodes the certificate to its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(CERTIFICATE_SIZE);
        self.put_unsigned(&mut buf);
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    /// Decodes a certificate from its wire form.
    ///
    /// # Errors
    /// Returns a protocol error on wrong length or version, or
    /// `InvalidKey` if the subject key is not a valid point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CERTIFICATE_SIZE {
            return Err(CoreError::malformed(format!(
                "certificate must be {CERTIFICATE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let version = buf.get_u8();
        if version != CERTIFICATE_VERSION {
            return Err(CoreError::UnsupportedVersion {
                got: version,
                expected: CERTIFICATE_VERSION,
            });
        }
        let subject = IdentityPublicKey::from_slice(&buf[..ED25519_PUBLIC_KEY_SIZE])?;
        buf.advance(ED25519_PUBLIC_KEY_SIZE);
        let device_id = DeviceId(buf.get_u64());
        let valid_from = Timestamp::from_millis(buf.get_i64());
        let valid_until = Timestamp::from_millis(buf.get_i64());
        let mut signature = [0u8; ED25519_SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);

        Ok(Self {
            subject,
            device_id,
            valid_from,
            valid_until,
            signature,
        })
    }

    fn put_unsigned(&self, buf: &mut BytesMut) {
        buf.put_u8(CERTIFICATE_VERSION);
        buf.put_slice(self.subject.as_bytes());
        buf.put_u64(self.device_id.get());
        buf.put_i64(self.valid_from.as_millis());
        buf.put_i64(self.valid_until.as_millis());
    }

    fn signed_data(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(CERTIFICATE_CONTEXT.len() + CERTIFICATE_SIGNED_LEN);
        buf.put_slice(CERTIFICATE_CONTEXT);
        self.put_unsigned(&mut buf);
        buf.to_vec()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("device_id", &self.device_id)
            .field("valid_from", &self.valid_from)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

impl Serialize for Certificate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Certificate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

// ============================================
// SignedTimestamp
// ============================================

/// Wall-clock time vouched for by the authority.
///
/// Fetched once per handshake; the lock rejects values outside its
/// freshness tolerance.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignedTimestamp {
    time: Timestamp,
    signature: [u8; ED25519_SIGNATURE_SIZE],
}

impl SignedTimestamp {
    /// Signs `time` with the authority key.
    #[must_use]
    pub fn issue(authority: &IdentityKeyPair, time: Timestamp) -> Self {
        Self {
            time,
            signature: authority.sign(&Self::signed_data(time)),
        }
    }

    /// The signed time.
    #[must_use]
    pub const fn time(&self) -> Timestamp {
        self.time
    }

    /// Verifies the authority signature.
    ///
    /// # Errors
    /// Returns `TimestampRejected` if the signature does not match.
    pub fn verify(&self, authority: &IdentityPublicKey) -> Result<()> {
        authority
            .verify(&Self::signed_data(self.time), &self.signature)
            .map_err(|_| CoreError::timestamp("authority signature mismatch"))
    }

    /// Encodes to the 72-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNED_TIMESTAMP_SIZE] {
        let mut out = [0u8; SIGNED_TIMESTAMP_SIZE];
        out[..8].copy_from_slice(&self.time.to_be_bytes());
        out[8..].copy_from_slice(&self.signature);
        out
    }

    /// Decodes from the 72-byte wire form.
    ///
    /// # Errors
    /// Returns `MessageTooShort` if `bytes` is short.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIGNED_TIMESTAMP_SIZE {
            return Err(CoreError::too_short(SIGNED_TIMESTAMP_SIZE, bytes.len()));
        }
        let mut time = [0u8; 8];
        time.copy_from_slice(&bytes[..8]);
        let mut signature = [0u8; ED25519_SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[8..SIGNED_TIMESTAMP_SIZE]);
        Ok(Self {
            time: Timestamp::from_be_bytes(time),
            signature,
        })
    }

    fn signed_data(time: Timestamp) -> Vec<u8> {
        let mut data = Vec::with_capacity(SIGNED_TIME_CONTEXT.len() + 8);
        data.extend_from_slice(SIGNED_TIME_CONTEXT);
        data.extend_from_slice(&time.to_be_bytes());
        data
    }
}

impl fmt::Debug for SignedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedTimestamp({})", self.time)
    }
}

impl Serialize for SignedTimestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for SignedTimestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(86_400);

    fn issue(authority: &IdentityKeyPair) -> Certificate {
        let start = Timestamp::from_secs(1_700_000_000);
        Certificate::issue(
            authority,
            IdentityKeyPair::generate().public_key(),
            DeviceId(4242),
            start,
            start + DAY * 30,
        )
    }

    #[test]
    fn test_certificate_verify() {
        let authority = IdentityKeyPair::generate();
        let cert = issue(&authority);
        assert!(cert.verify(&authority.public_key()).is_ok());

        let other = IdentityKeyPair::generate();
        assert!(matches!(
            cert.verify(&other.public_key()),
            Err(CoreError::CertificateInvalid { .. })
        ));
    }

    #[test]
    fn test_certificate_tamper_detected() {
        let authority = IdentityKeyPair::generate();
        let mut bytes = issue(&authority).to_bytes();
        // flip a bit in the device id
        bytes[1 + ED25519_PUBLIC_KEY_SIZE + 7] ^= 0x01;
        let tampered = Certificate::from_bytes(&bytes).unwrap();
        assert_eq!(tampered.device_id(), DeviceId(4243));
        assert!(tampered.verify(&authority.public_key()).is_err());
    }

    #[test]
    fn test_certificate_validity_window() {
        let authority = IdentityKeyPair::generate();
        let cert = issue(&authority);
        assert!(cert.is_valid_at(cert.valid_from() + DAY));
        assert!(matches!(
            cert.check_valid_at(cert.expires_at() + Duration::from_millis(1)),
            Err(CoreError::CertificateExpired { .. })
        ));
        assert!(cert
            .check_valid_at(cert.valid_from().saturating_sub(DAY))
            .is_err());
    }

    #[test]
    fn test_certificate_json_is_base64() {
        let authority = IdentityKeyPair::generate();
        let cert = issue(&authority);
        let json = serde_json::to_string(&cert).unwrap();
        assert!(json.starts_with('"'));
        let restored: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(cert, restored);
    }

    #[test]
    fn test_certificate_bad_version() {
        let authority = IdentityKeyPair::generate();
        let mut bytes = issue(&authority).to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            Certificate::from_bytes(&bytes),
            Err(CoreError::UnsupportedVersion { got: 9, .. })
        ));
    }

    #[test]
    fn test_signed_timestamp() {
        let authority = IdentityKeyPair::generate();
        let ts = SignedTimestamp::issue(&authority, Timestamp::from_secs(1_700_000_000));
        assert!(ts.verify(&authority.public_key()).is_ok());

        let decoded = SignedTimestamp::from_bytes(&ts.to_bytes()).unwrap();
        assert_eq!(decoded.time(), ts.time());

        let mut forged = ts.to_bytes();
        forged[7] ^= 0x01;
        let forged = SignedTimestamp::from_bytes(&forged).unwrap();
        assert!(matches!(
            forged.verify(&authority.public_key()),
            Err(CoreError::TimestampRejected { .. })
        ));
    }
}
