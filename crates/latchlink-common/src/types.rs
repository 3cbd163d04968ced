// ============================================
// File: crates/latchlink-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers passed between the cloud client, the radio
//! layer and the session engine so that a cloud device id can never be
//! confused with an actor id or a radio address.
//!
//! ## Main Functionality
//! - `DeviceId`: Cloud identifier of a lock
//! - `MobileId`: Cloud identifier of this controller's registration
//! - `ActorId`: Numeric id of whoever triggered a lock state change
//! - `SessionId`: 4-byte id the lock assigns when a session is initialized
//! - `DeviceAddress`: Radio address (MAC or proxy-specific handle)
//! - `SerialNumber`: Lock serial, validated to 14 digits
//!
//! ## ⚠️ Important Note for Next Developer
//! - `ActorId(0)` means "no actor" on the wire; keep `is_none()` in sync
//! - Serialized forms are persisted in the credential file; keep them
//!   backward compatible
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of SessionId in bytes.
pub const SESSION_ID_SIZE: usize = 4;

/// Number of digits in a lock serial number (dashes removed).
pub const SERIAL_DIGITS: usize = 14;

// ============================================
// Numeric identifiers
// ============================================

/// Cloud identifier of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Returns the raw id.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloud identifier of this controller's mobile registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MobileId(pub u64);

impl fmt::Display for MobileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric id of the user or access method that triggered a state change.
///
/// Carried as a big-endian `u32` in lock notifications. Zero means the
/// change had no attributable actor (auto-lock, door sensor, button).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl ActorId {
    /// Returns `true` if no actor is attributed.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// SessionId
// ============================================

/// Identifier the lock assigns to an initialized session.
///
/// Not secret: it travels inside the encrypted `Initialized` message but
/// is only used for log correlation.
///
/// # Example
/// ```
/// use latchlink_common::types::SessionId;
///
/// let id = SessionId::generate();
/// let restored = SessionId::from_bytes(id.as_bytes()).unwrap();
/// assert_eq!(id, restored);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Creates a `SessionId` from raw bytes.
    ///
    /// Returns `None` if `bytes` is not exactly 4 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; SESSION_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Generates a random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BASE64.decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        Self::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::invalid_length(bytes.len(), &"4 bytes"))
    }
}

// ============================================
// DeviceAddress
// ============================================

/// Radio address of a lock.
///
/// For a directly attached radio this is the Bluetooth MAC
/// (`AA:BB:CC:DD:EE:FF`); a proxy may use the same notation. Stored in
/// upper case so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Creates an address, normalizing to upper case.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    /// Returns the address string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================
// SerialNumber
// ============================================

/// Lock serial number.
///
/// Printed on the device as `XXXXXXXX-XXXXXX`; stored without the dash.
///
/// # Example
/// ```
/// use latchlink_common::types::SerialNumber;
///
/// let serial: SerialNumber = "10530206-030484".parse().unwrap();
/// assert_eq!(serial.digits(), "10530206030484");
/// assert!("1234".parse::<SerialNumber>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Returns the 14 serial digits.
    #[must_use]
    pub fn digits(&self) -> &str {
        &self.0
    }
}

impl FromStr for SerialNumber {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.trim().chars().filter(|c| *c != '-').collect();
        if clean.len() != SERIAL_DIGITS || !clean.chars().all(|c| c.is_ascii_digit()) {
            return Err(CommonError::invalid_input(
                "serial",
                format!("must be {SERIAL_DIGITS} digits (dash optional), got '{s}'"),
            ));
        }
        Ok(Self(clean))
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SerialNumber> for String {
    fn from(serial: SerialNumber) -> Self {
        serial.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", &self.0[..8], &self.0[8..])
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_bytes() {
        assert!(SessionId::from_bytes(&[1, 2, 3, 4]).is_some());
        assert!(SessionId::from_bytes(&[1, 2, 3]).is_none());
        let id = SessionId::from_bytes(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(id.to_string(), "deadbeef");
    }

    #[test]
    fn test_session_id_serde() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let restored: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_device_address_normalized() {
        let a = DeviceAddress::new("aa:bb:cc:dd:ee:ff");
        let b = DeviceAddress::from(" AA:BB:CC:DD:EE:FF ");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_serial_parsing() {
        let serial: SerialNumber = "10530206-030484".parse().unwrap();
        assert_eq!(serial.digits(), "10530206030484");
        assert_eq!(serial.to_string(), "10530206-030484");

        assert!("1053020603048".parse::<SerialNumber>().is_err());
        assert!("1053020603048x".parse::<SerialNumber>().is_err());
    }

    #[test]
    fn test_serial_serde_validates() {
        let ok: SerialNumber = serde_json::from_str("\"10530206030484\"").unwrap();
        assert_eq!(ok.digits(), "10530206030484");
        assert!(serde_json::from_str::<SerialNumber>("\"12\"").is_err());
    }

    #[test]
    fn test_actor_none() {
        assert!(ActorId(0).is_none());
        assert!(!ActorId(42).is_none());
    }
}
