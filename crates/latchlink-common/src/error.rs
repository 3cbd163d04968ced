// ============================================
// File: crates/latchlink-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Identifier parsing (serial numbers, device ids, actor ids) is shared by
//! every crate; its failures need one error type the others can wrap.
//!
//! ## Main Functionality
//! - `CommonError`: Identifier and encoding failures
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put key material or access tokens in the `value` of an error
//! - Each crate wraps `CommonError` in its own error type via `#[from]`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Failures shared across latchlink crates.
///
/// # Example
/// ```
/// use latchlink_common::error::CommonError;
///
/// let err = CommonError::invalid_input("serial", "must be 14 digits");
/// assert!(err.to_string().contains("serial"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A field failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidInput {
        /// Which identifier or setting
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Text that should have been base64 was not.
    #[error("Malformed base64 in {field}: {reason}")]
    Base64 {
        /// Which identifier or setting
        field: String,
        /// Decoder message
        reason: String,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Name of the field that failed.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidInput { field, .. } | Self::Base64 { field, .. } => field,
        }
    }
}

impl From<base64::DecodeError> for CommonError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64 {
            field: "base64".into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_serial_names_the_field() {
        let err = CommonError::invalid_input("serial", "must be 14 digits");
        assert_eq!(err.field(), "serial");
        assert_eq!(err.to_string(), "Invalid serial: must be 14 digits");
    }

    #[test]
    fn base64_failure_converts() {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let err: CommonError = STANDARD.decode("***").unwrap_err().into();
        assert!(matches!(err, CommonError::Base64 { .. }));
    }
}
