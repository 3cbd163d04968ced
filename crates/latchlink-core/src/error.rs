// ============================================
// File: crates/latchlink-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to the handshake, the session cipher and
//! the command/notification codec.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Classifiers the lifecycle uses to decide between forced renewal,
//!   dropping a frame and tearing the link down
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `is_authentication_failure()` drives forced certificate renewal in
//!   the lifecycle; adding a variant there changes reconnect behaviour
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use latchlink_common::error::CommonError;
use latchlink_common::time::Timestamp;

use crate::protocol::messages::AlertCode;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Everything the handshake, cipher and codec can reject.
///
/// Messages never carry key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Key bytes have the wrong length or are not a curve point.
    #[error("Invalid key: {context}")]
    InvalidKey {
        /// Which key
        context: String,
    },

    /// An Ed25519 signature did not verify.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// X25519 produced a low-order shared secret.
    #[error("Key exchange failed: {reason}")]
    KeyExchange {
        /// Detail
        reason: String,
    },

    /// AEAD sealing failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// Frame being sealed
        context: String,
    },

    /// AEAD tag mismatch.
    #[error("Decryption failed: authentication error")]
    Decryption,

    /// HKDF expansion failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Detail
        reason: String,
    },

    // ========================================
    // Credential Errors
    // ========================================

    /// Certificate failed validation.
    #[error("Invalid certificate: {reason}")]
    CertificateInvalid {
        /// Detail
        reason: String,
    },

    /// Certificate is outside its validity window.
    #[error("Certificate expired at {expired_at}")]
    CertificateExpired {
        /// End of the validity window
        expired_at: Timestamp,
    },

    /// Signed timestamp failed validation.
    #[error("Signed timestamp rejected: {reason}")]
    TimestampRejected {
        /// Detail
        reason: String,
    },

    /// The lock aborted the handshake.
    #[error("Lock sent alert: {0}")]
    HandshakeAlert(AlertCode),

    // ========================================
    // Codec Errors
    // ========================================

    /// Opcode byte not in the command table.
    #[error("Unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Notification id not in the event table.
    #[error("Unknown event: 0x{0:02x}")]
    UnknownEvent(u8),

    /// A known frame arrived at the wrong point of the exchange.
    #[error("Unexpected frame: expected {expected}, got 0x{got:02x}")]
    UnexpectedFrame {
        /// Frame the exchange was waiting for
        expected: &'static str,
        /// Type byte received
        got: u8,
    },

    /// Peer speaks another protocol version.
    #[error("Unsupported protocol version: {got}, expected {expected}")]
    UnsupportedVersion {
        /// Version received
        got: u8,
        /// Version expected
        expected: u8,
    },

    /// Payload does not parse.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// Detail
        reason: String,
    },

    /// Payload is shorter than its fixed header.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum length
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Payload is longer than a frame may be.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Limit
        max: usize,
        /// Received length
        actual: usize,
    },

    /// Frame counter did not advance.
    #[error("Replay detected: counter {received} not greater than {last}")]
    ReplayDetected {
        /// Counter received
        received: u64,
        /// Last accepted counter
        last: u64,
    },

    /// Input fed to a state machine that already finished.
    #[error("{input} received after the {stage} was over")]
    OutOfOrder {
        /// What was fed in
        input: &'static str,
        /// Which exchange
        stage: &'static str,
    },

    /// Identifier parsing failed.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    /// Creates an `InvalidKey` error.
    pub fn invalid_key(context: impl Into<String>) -> Self {
        Self::InvalidKey {
            context: context.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Creates a `CertificateInvalid` error.
    pub fn certificate(reason: impl Into<String>) -> Self {
        Self::CertificateInvalid {
            reason: reason.into(),
        }
    }

    /// Creates a `TimestampRejected` error.
    pub fn timestamp(reason: impl Into<String>) -> Self {
        Self::TimestampRejected {
            reason: reason.into(),
        }
    }

    /// Creates a `ReplayDetected` error.
    #[must_use]
    pub const fn replay(received: u64, last: u64) -> Self {
        Self::ReplayDetected { received, last }
    }

    /// Creates an `UnexpectedFrame` error.
    #[must_use]
    pub const fn unexpected(expected: &'static str, got: u8) -> Self {
        Self::UnexpectedFrame { expected, got }
    }

    /// Creates an `OutOfOrder` error.
    #[must_use]
    pub const fn out_of_order(input: &'static str, stage: &'static str) -> Self {
        Self::OutOfOrder { input, stage }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Credentials were refused by the lock, or the lock or a frame
    /// failed to authenticate.
    ///
    /// During a handshake this forces a certificate renewal before the
    /// next attempt.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        match self {
            Self::HandshakeAlert(code) => code.is_authentication_failure(),
            Self::SignatureVerification
            | Self::Decryption
            | Self::CertificateInvalid { .. }
            | Self::CertificateExpired { .. }
            | Self::TimestampRejected { .. } => true,
            _ => false,
        }
    }

    /// Frame-level garbage: the frame is dropped and the session goes on.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode(_)
                | Self::UnknownEvent(_)
                | Self::UnexpectedFrame { .. }
                | Self::UnsupportedVersion { .. }
                | Self::MalformedMessage { .. }
                | Self::MessageTooShort { .. }
                | Self::MessageTooLarge { .. }
                | Self::ReplayDetected { .. }
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame_reports_both_lengths() {
        let msg = CoreError::too_short(12, 5).to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn bad_signature_forces_renewal_but_garbage_does_not() {
        assert!(CoreError::SignatureVerification.is_authentication_failure());
        assert!(!CoreError::SignatureVerification.is_protocol_error());

        assert!(CoreError::UnknownOpcode(0xFF).is_protocol_error());
        assert!(!CoreError::UnknownOpcode(0xFF).is_authentication_failure());
        assert!(CoreError::replay(5, 10).is_protocol_error());
        assert!(!CoreError::out_of_order("handshake frame", "handshake").is_protocol_error());
    }

    #[test]
    fn only_credential_alerts_are_authentication_failures() {
        assert!(CoreError::HandshakeAlert(AlertCode::InvalidCertificate).is_authentication_failure());
        assert!(CoreError::HandshakeAlert(AlertCode::NoTrustedTime).is_authentication_failure());
        assert!(!CoreError::HandshakeAlert(AlertCode::SessionTimeout).is_authentication_failure());
    }

    #[test]
    fn bad_serial_wraps_as_common() {
        let core: CoreError = CommonError::invalid_input("serial", "too short").into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
