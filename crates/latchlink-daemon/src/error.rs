// ============================================
// File: crates/latchlink-daemon/src/error.rs
// ============================================
//! # Daemon Error Types
//!
//! ## Creation Reason
//! Gives the host layer one error type with a stable category, so it can
//! render an actionable message without matching on library internals.
//!
//! ## Error Taxonomy
//! | Kind | Recovery |
//! |------|----------|
//! | Transport | Retried under backoff, never fatal |
//! | Authentication | Forced renewal then retry; escalated after repeats |
//! | Protocol | Frame dropped and logged |
//! | Cloud / Renewal | Last good certificate used until expiry |
//! | Registration | Fatal to setup |
//! | Command | Surfaced to the caller, not retried |
//!
//! ## ⚠️ Important Note for Next Developer
//! - `CoreError` is split on the way in: authentication failures become
//!   `Authentication`, everything else `Protocol`. Keep that in the
//!   `From` impl, not at call sites
//!
//! ## Last Modified
//! v0.1.0 - Initial error taxonomy

use std::fmt;

use thiserror::Error;

use latchlink_common::error::CommonError;
use latchlink_core::error::CoreError;
use latchlink_core::protocol::{Opcode, ResultCode};
use latchlink_transport::error::TransportError;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

// ============================================
// CloudError
// ============================================

/// Failure talking to the cloud identity service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// Request never got an answer.
    #[error("Cloud request failed: {reason}")]
    Http {
        /// Transport-level cause
        reason: String,
    },

    /// Service answered with an error status.
    #[error("Cloud returned status {status}: {}", .messages.join("; "))]
    Status {
        /// HTTP status code
        status: u16,
        /// Messages from the response envelope
        messages: Vec<String>,
    },

    /// Access credential missing or lacking scopes.
    #[error("Cloud refused the access credential: {reason}")]
    Unauthorized {
        /// Why
        reason: String,
    },

    /// Response did not have the expected shape.
    #[error("Invalid cloud response: {reason}")]
    InvalidResponse {
        /// What was wrong
        reason: String,
    },

    /// Simulated or injected failure.
    #[error("Cloud unavailable: {reason}")]
    Unavailable {
        /// Why
        reason: String,
    },
}

impl CloudError {
    /// Creates an `Http` error.
    pub fn http(reason: impl ToString) -> Self {
        Self::Http {
            reason: reason.to_string(),
        }
    }

    /// Creates an `InvalidResponse` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates an `Unavailable` error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns `true` if a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Unavailable { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

// ============================================
// CommandError
// ============================================

/// Failure of a single lock command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Lock answered with a non-success result.
    #[error("Lock rejected {opcode}: {result}")]
    Rejected {
        /// Command
        opcode: Opcode,
        /// Lock-reported result
        result: ResultCode,
    },

    /// No response before the command timeout.
    #[error("No response to {opcode} in time")]
    Timeout {
        /// Command
        opcode: Opcode,
    },

    /// Unlock finished but the lock never reported unlocked.
    #[error("Lock did not reach the unlocked state")]
    NotUnlocked,
}

// ============================================
// ErrorKind
// ============================================

/// Stable error category for the host layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Radio or proxy problem.
    Transport,
    /// Credentials refused.
    Authentication,
    /// Malformed traffic.
    Protocol,
    /// Cloud call failed.
    Cloud,
    /// Setup could not register the device.
    Registration,
    /// Certificate renewal failed.
    Renewal,
    /// Lock refused or ignored a command.
    Command,
    /// Bad or missing configuration.
    Config,
    /// Local persistence failed.
    Storage,
    /// Engine already closed.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
            Self::Cloud => "cloud",
            Self::Registration => "registration",
            Self::Renewal => "renewal",
            Self::Command => "command",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================
// DaemonError
// ============================================

/// Daemon error types.
#[derive(Error, Debug)]
pub enum DaemonError {
    // ========================================
    // Session Errors
    // ========================================

    /// Radio or proxy failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Handshake or certificate refused.
    #[error("Authentication failed: {reason}")]
    Authentication {
        /// What was refused
        reason: String,
    },

    /// Malformed or unexpected traffic.
    #[error("Protocol error: {0}")]
    Protocol(CoreError),

    /// Lock-side command failure.
    #[error(transparent)]
    Command(#[from] CommandError),

    // ========================================
    // Cloud Errors
    // ========================================

    /// Cloud call failed (signed time, activity log).
    #[error(transparent)]
    Cloud(CloudError),

    /// Registration refused.
    #[error("Registration failed: {0}")]
    Registration(CloudError),

    /// Renewal failed.
    #[error("Certificate renewal failed: {0}")]
    Renewal(CloudError),

    // ========================================
    // Local Errors
    // ========================================

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File
        path: String,
        /// Why
        reason: String,
    },

    /// Configuration value out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Offending key
        field: String,
        /// Why
        reason: String,
    },

    /// No credential has been registered yet.
    #[error("Device is not registered; run `latchlink register` first")]
    NotRegistered,

    /// Persisted state could not be read or written.
    #[error("Storage error ({context}): {reason}")]
    Storage {
        /// File or operation
        context: String,
        /// Why
        reason: String,
    },

    /// Engine was closed.
    #[error("Lock connection is closed")]
    Closed,

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl DaemonError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `Authentication` error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Storage` error.
    pub fn storage(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Storage {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Stable category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Command(_) => ErrorKind::Command,
            Self::Cloud(_) => ErrorKind::Cloud,
            Self::Registration(_) => ErrorKind::Registration,
            Self::Renewal(_) => ErrorKind::Renewal,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::NotRegistered => {
                ErrorKind::Config
            }
            Self::Storage { .. } | Self::Common(_) => ErrorKind::Storage,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Returns `true` for credential refusals.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` for malformed traffic.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if the lifecycle recovers from this on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Protocol(_) | Self::Authentication { .. } => true,
            Self::Cloud(e) | Self::Renewal(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the process cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::ConfigInvalid { .. }
                | Self::NotRegistered
                | Self::Registration(_)
        )
    }
}

impl From<CoreError> for DaemonError {
    fn from(err: CoreError) -> Self {
        if err.is_authentication_failure() {
            Self::Authentication {
                reason: err.to_string(),
            }
        } else {
            Self::Protocol(err)
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use latchlink_core::protocol::AlertCode;

    #[test]
    fn test_core_errors_split_by_cause() {
        let err: DaemonError = CoreError::HandshakeAlert(AlertCode::InvalidCertificate).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err: DaemonError = CoreError::UnknownOpcode(0x99).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let err: DaemonError = CoreError::HandshakeAlert(AlertCode::SessionTimeout).into();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_error_classification() {
        let err = DaemonError::config_invalid("lifecycle.grace_secs", "must be > 0");
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = DaemonError::Renewal(CloudError::http("connection reset"));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());

        let err = DaemonError::Registration(CloudError::Unauthorized {
            reason: "missing scope".into(),
        });
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_command_error_display() {
        let err = DaemonError::from(CommandError::Rejected {
            opcode: Opcode::Unlock,
            result: ResultCode::Busy,
        });
        assert_eq!(err.kind(), ErrorKind::Command);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn test_cloud_status_retry() {
        let server = CloudError::Status {
            status: 503,
            messages: vec!["maintenance".into()],
        };
        assert!(server.is_retryable());
        assert!(server.to_string().contains("maintenance"));

        let client = CloudError::Status {
            status: 404,
            messages: vec![],
        };
        assert!(!client.is_retryable());
    }
}
