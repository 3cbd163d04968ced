// ============================================
// File: crates/latchlink-core/src/protocol/messages.rs
// ============================================
//! # Session-Layer Message Definitions
//!
//! ## Creation Reason
//! Defines the frames that travel over the handshake and data channels
//! below the command layer: hellos, alerts, handshake records and
//! encrypted data records.
//!
//! ## Main Functionality
//! - `FrameType`: First byte of every session-layer frame
//! - `AlertCode`: Reasons the lock aborts a handshake
//! - `ClientHello` / `ServerHello`: Cleartext hellos
//!
//! ## Message Sizes
//! | Message | Size (bytes) |
//! |---------|--------------|
//! | ClientHello | 67 |
//! | ServerHello | 66 |
//! | Alert | 2 |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field order is critical - DO NOT reorder without a version bump
//! - Both hellos share frame type 0x03; direction tells them apart
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Protocol version carried in both hellos.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Size of ClientHello in bytes.
pub const CLIENT_HELLO_SIZE: usize = 67;

/// Size of ServerHello in bytes.
pub const SERVER_HELLO_SIZE: usize = 66;

/// Size of an Alert frame in bytes.
pub const ALERT_SIZE: usize = 2;

/// Size of the random nonce in each hello.
pub const HELLO_RANDOM_SIZE: usize = 32;

// ============================================
// FrameType
// ============================================

/// Session-layer frame type.
///
/// # Values
/// | Value | Type |
/// |-------|------|
/// | 0x00 | PlainData (never accepted) |
/// | 0x01 | Encrypted |
/// | 0x03 | Hello |
/// | 0x04 | Alert |
/// | 0x05 | ServerVerify |
/// | 0x06 | ClientVerifyPart |
/// | 0x07 | ClientVerifyFinal |
/// | 0x08 | Initialized |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Unencrypted data; dropped on receipt.
    PlainData = 0x00,
    /// Encrypted application record.
    Encrypted = 0x01,
    /// Handshake hello (either direction).
    Hello = 0x03,
    /// Handshake abort.
    Alert = 0x04,
    /// Lock's encrypted transcript signature.
    ServerVerify = 0x05,
    /// Non-final fragment of ClientVerify.
    ClientVerifyPart = 0x06,
    /// Final (or only) fragment of ClientVerify.
    ClientVerifyFinal = 0x07,
    /// Lock's encrypted session id; handshake complete.
    Initialized = 0x08,
}

impl FrameType {
    /// Converts a byte to a `FrameType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::PlainData),
            0x01 => Some(Self::Encrypted),
            0x03 => Some(Self::Hello),
            0x04 => Some(Self::Alert),
            0x05 => Some(Self::ServerVerify),
            0x06 => Some(Self::ClientVerifyPart),
            0x07 => Some(Self::ClientVerifyFinal),
            0x08 => Some(Self::Initialized),
            _ => None,
        }
    }

    /// Converts the `FrameType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Checks if this frame belongs to the handshake.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::Hello
                | Self::Alert
                | Self::ServerVerify
                | Self::ClientVerifyPart
                | Self::ClientVerifyFinal
                | Self::Initialized
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_byte(value).ok_or(value)
    }
}

// ============================================
// AlertCode
// ============================================

/// Reason the lock aborted a handshake or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlertCode {
    /// No error.
    Ok = 0,
    /// Unspecified failure.
    Generic = 1,
    /// Lock has no trusted time or the signed time was rejected.
    NoTrustedTime = 2,
    /// Session timed out on the lock side.
    SessionTimeout = 3,
    /// Lock is disconnecting.
    Disconnected = 4,
    /// Certificate rejected.
    InvalidCertificate = 5,
    /// Device key not registered for this lock.
    Unregistered = 6,
}

impl AlertCode {
    /// Converts a byte; unknown codes map to `Generic`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            2 => Self::NoTrustedTime,
            3 => Self::SessionTimeout,
            4 => Self::Disconnected,
            5 => Self::InvalidCertificate,
            6 => Self::Unregistered,
            _ => Self::Generic,
        }
    }

    /// Converts to the wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Returns `true` if the alert means our credentials were refused.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::NoTrustedTime | Self::InvalidCertificate | Self::Unregistered
        )
    }

    /// Encodes a complete Alert frame.
    #[must_use]
    pub const fn to_frame(&self) -> [u8; ALERT_SIZE] {
        [FrameType::Alert as u8, *self as u8]
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Generic => "generic error",
            Self::NoTrustedTime => "no trusted time",
            Self::SessionTimeout => "session timeout",
            Self::Disconnected => "disconnected",
            Self::InvalidCertificate => "invalid certificate",
            Self::Unregistered => "device unregistered",
        };
        write!(f, "{name} ({})", self.as_byte())
    }
}

// ============================================
// ClientHello
// ============================================

/// Controller's opening handshake message.
///
/// # Wire Format (67 bytes)
/// ```text
/// ┌────────────────────────────────────────────┐
/// │ frame_type (1 byte)           │ 0x03       │
/// ├────────────────────────────────────────────┤
/// │ version (1 byte)              │ 0x02       │
/// ├────────────────────────────────────────────┤
/// │ mtu (1 byte)                  │ link MTU   │
/// ├────────────────────────────────────────────┤
/// │ random (32 bytes)             │            │
/// ├────────────────────────────────────────────┤
/// │ ephemeral_key (32 bytes)      │ X25519     │
/// └────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Protocol version.
    pub version: u8,
    /// Link MTU the controller will fragment to.
    pub mtu: u8,
    /// Fresh random bytes.
    pub random: [u8; HELLO_RANDOM_SIZE],
    /// Controller's X25519 ephemeral public key.
    pub ephemeral_key: [u8; 32],
}

impl ClientHello {
    /// Creates a hello with fresh random bytes.
    #[must_use]
    pub fn new(mtu: u8, ephemeral_key: [u8; 32]) -> Self {
        use rand::RngCore;
        let mut random = [0u8; HELLO_RANDOM_SIZE];
        rand::thread_rng().fill_bytes(&mut random);
        Self {
            version: PROTOCOL_VERSION,
            mtu,
            random,
            ephemeral_key,
        }
    }
}

// ============================================
// ServerHello
// ============================================

/// Lock's handshake response.
///
/// # Wire Format (66 bytes)
/// ```text
/// ┌────────────────────────────────────────────┐
/// │ frame_type (1 byte)           │ 0x03       │
/// ├────────────────────────────────────────────┤
/// │ version (1 byte)              │ 0x02       │
/// ├────────────────────────────────────────────┤
/// │ random (32 bytes)             │            │
/// ├────────────────────────────────────────────┤
/// │ ephemeral_key (32 bytes)      │ X25519     │
/// └────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Protocol version.
    pub version: u8,
    /// Fresh random bytes.
    pub random: [u8; HELLO_RANDOM_SIZE],
    /// Lock's X25519 ephemeral public key.
    pub ephemeral_key: [u8; 32],
}

impl ServerHello {
    /// Creates a hello with fresh random bytes.
    #[must_use]
    pub fn new(ephemeral_key: [u8; 32]) -> Self {
        use rand::RngCore;
        let mut random = [0u8; HELLO_RANDOM_SIZE];
        rand::thread_rng().fill_bytes(&mut random);
        Self {
            version: PROTOCOL_VERSION,
            random,
            ephemeral_key,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_bytes() {
        assert_eq!(FrameType::from_byte(0x07), Some(FrameType::ClientVerifyFinal));
        assert_eq!(FrameType::from_byte(0x02), None);
        assert_eq!(FrameType::try_from(0x09), Err(0x09));
        assert!(FrameType::Initialized.is_handshake());
        assert!(!FrameType::Encrypted.is_handshake());
    }

    #[test]
    fn test_alert_codes() {
        assert_eq!(AlertCode::from_byte(5), AlertCode::InvalidCertificate);
        assert_eq!(AlertCode::from_byte(0xEE), AlertCode::Generic);
        assert_eq!(AlertCode::Unregistered.to_frame(), [0x04, 6]);
        assert!(AlertCode::Unregistered.is_authentication_failure());
        assert!(!AlertCode::Disconnected.is_authentication_failure());
        assert!(AlertCode::NoTrustedTime.to_string().contains("trusted time"));
    }

    #[test]
    fn test_hello_randoms_differ() {
        let a = ClientHello::new(200, [1; 32]);
        let b = ClientHello::new(200, [1; 32]);
        assert_ne!(a.random, b.random);
        assert_eq!(a.version, PROTOCOL_VERSION);
    }
}
