// ============================================
// File: crates/latchlink-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types specific to radio transport operations, both for
//! the directly attached radio and for the network proxy.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Radio Errors**: Adapter off, device out of range, connect failures
//! 2. **Link Errors**: Writes on a dead link, unsupported channels
//! 3. **Proxy Errors**: Malformed proxy frames
//! 4. **System Errors**: Socket I/O, timeouts
//!
//! ## ⚠️ Important Note for Next Developer
//! - Almost everything here is transient: the lifecycle retries it under
//!   backoff without touching credentials
//! - A link that dies asynchronously is reported as
//!   `LinkEvent::Disconnected`, not as an error from `write`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;

use thiserror::Error;

use latchlink_common::error::CommonError;
use latchlink_common::types::DeviceAddress;

use crate::traits::Channel;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Radio Errors
    // ========================================

    /// Radio adapter is missing or powered off.
    #[error("Radio adapter unavailable: {reason}")]
    AdapterUnavailable {
        /// Why the adapter cannot be used
        reason: String,
    },

    /// Device did not answer; most likely out of range.
    #[error("Device {address} out of range")]
    OutOfRange {
        /// Device we tried to reach
        address: DeviceAddress,
    },

    /// Connection attempt failed.
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Device we tried to reach
        address: DeviceAddress,
        /// Why the attempt failed
        reason: String,
    },

    /// Scan could not be started.
    #[error("Scan failed: {reason}")]
    ScanFailed {
        /// Why scanning failed
        reason: String,
    },

    // ========================================
    // Link Errors
    // ========================================

    /// Link is not connected.
    #[error("Link not connected")]
    NotConnected,

    /// Channel cannot be written to.
    #[error("Channel {0} is not writable")]
    InvalidChannel(Channel),

    /// Write was refused by the radio stack.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Why the write failed
        reason: String,
    },

    // ========================================
    // Proxy Errors
    // ========================================

    /// Proxy peer violated the frame protocol.
    #[error("Proxy protocol error: {reason}")]
    Proxy {
        /// What was wrong
        reason: String,
    },

    // ========================================
    // System Errors
    // ========================================

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `AdapterUnavailable` error.
    pub fn adapter_unavailable(reason: impl Into<String>) -> Self {
        Self::AdapterUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(address: &DeviceAddress, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            address: address.clone(),
            reason: reason.into(),
        }
    }

    /// Creates a `WriteFailed` error.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `Proxy` error.
    pub fn proxy(reason: impl Into<String>) -> Self {
        Self::Proxy {
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if retrying the operation later may succeed.
    ///
    /// Only programming errors (bad channel, malformed proxy traffic)
    /// and common-crate validation errors are not retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidChannel(_) | Self::Proxy { .. } | Self::Common(_)
        )
    }

    /// Returns `true` if the error means the device or link is gone.
    #[must_use]
    pub const fn is_link_loss(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::NotConnected | Self::ConnectFailed { .. }
        )
    }

    /// Returns `true` if the local radio itself is the problem.
    #[must_use]
    pub const fn is_adapter_error(&self) -> bool {
        matches!(self, Self::AdapterUnavailable { .. })
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
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
    fn test_error_display() {
        let err = TransportError::connect_failed(&DeviceAddress::new("aa:bb"), "refused");
        assert!(err.to_string().contains("AA:BB"));
        assert!(err.to_string().contains("refused"));
        assert_eq!(
            TransportError::InvalidChannel(Channel::Notification).to_string(),
            "Channel notification is not writable"
        );
    }

    #[test]
    fn test_error_classification() {
        let gone = TransportError::OutOfRange {
            address: DeviceAddress::new("aa:bb"),
        };
        assert!(gone.is_retryable());
        assert!(gone.is_link_loss());

        let adapter = TransportError::adapter_unavailable("powered off");
        assert!(adapter.is_retryable());
        assert!(adapter.is_adapter_error());
        assert!(!adapter.is_link_loss());

        assert!(!TransportError::proxy("bad kind").is_retryable());
        assert!(!TransportError::InvalidChannel(Channel::Notification).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let transport_err: TransportError = io_err.into();
        assert!(transport_err.is_retryable());
        assert!(matches!(transport_err, TransportError::Io { .. }));
    }
}
