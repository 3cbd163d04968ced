// ============================================
// File: crates/latchlink-core/src/protocol/commands.rs
// ============================================
//! # Commands and Responses
//!
//! ## Creation Reason
//! Names the operations the controller can ask of a lock and the result
//! codes the lock reports back.
//!
//! ## Main Functionality
//! - `Opcode`: Operation identifiers
//! - `ResultCode`: Lock-reported outcome
//! - `Command`: Opcode + parameter bytes (tag is added by the codec)
//! - `Response`: Tagged reply with result and data
//! - `StateReport` / `BatteryReport`: Parsed response data
//!
//! ## ⚠️ Important Note for Next Developer
//! - `GET_STATE` doubles as the keep-alive probe
//! - Parameters are raw bytes; only the constructors here know layouts
//!
//! ## Last Modified
//! v0.1.0 - Initial command set

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::state::{DoorState, LockState};
use crate::crypto::certificate::SignedTimestamp;
use crate::error::{CoreError, Result};

// ============================================
// Opcode
// ============================================

/// Command operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Read battery level.
    GetBattery = 0x0C,
    /// Lock the bolt.
    Lock = 0x50,
    /// Unlock the bolt.
    Unlock = 0x51,
    /// Pull the latch.
    PullSpring = 0x52,
    /// Read lock state (also the keep-alive probe).
    GetState = 0x5A,
    /// Give the lock a cloud-signed wall-clock time.
    SetSignedDatetime = 0x71,
}

impl Opcode {
    /// Converts a byte to an `Opcode`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0C => Some(Self::GetBattery),
            0x50 => Some(Self::Lock),
            0x51 => Some(Self::Unlock),
            0x52 => Some(Self::PullSpring),
            0x5A => Some(Self::GetState),
            0x71 => Some(Self::SetSignedDatetime),
            _ => None,
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Returns `true` if this operation moves the motor.
    #[must_use]
    pub const fn is_actuation(&self) -> bool {
        matches!(self, Self::Lock | Self::Unlock | Self::PullSpring)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetBattery => "GET_BATTERY",
            Self::Lock => "LOCK",
            Self::Unlock => "UNLOCK",
            Self::PullSpring => "PULL_SPRING",
            Self::GetState => "GET_STATE",
            Self::SetSignedDatetime => "SET_SIGNED_DATETIME",
        };
        f.write_str(name)
    }
}

// ============================================
// ResultCode
// ============================================

/// Outcome the lock reports for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// Command accepted.
    Success,
    /// Parameters rejected.
    InvalidParam,
    /// Generic failure (e.g. jammed).
    Error,
    /// Lock busy with another operation.
    Busy,
    /// Lock not calibrated.
    NotCalibrated,
    /// Auto-unlock already performed this.
    AlreadyCalledByAutoUnlock,
    /// Feature not configured.
    NotConfigured,
    /// Lock dismounted from the door.
    Dismounted,
    /// Another operation already performed this.
    AlreadyCalledByOther,
    /// Code this build does not know.
    Other(u8),
}

impl ResultCode {
    /// Converts a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Success,
            0x01 => Self::InvalidParam,
            0x02 => Self::Error,
            0x03 => Self::Busy,
            0x05 => Self::NotCalibrated,
            0x06 => Self::AlreadyCalledByAutoUnlock,
            0x08 => Self::NotConfigured,
            0x09 => Self::Dismounted,
            0x0A => Self::AlreadyCalledByOther,
            other => Self::Other(other),
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::InvalidParam => 0x01,
            Self::Error => 0x02,
            Self::Busy => 0x03,
            Self::NotCalibrated => 0x05,
            Self::AlreadyCalledByAutoUnlock => 0x06,
            Self::NotConfigured => 0x08,
            Self::Dismounted => 0x09,
            Self::AlreadyCalledByOther => 0x0A,
            Self::Other(b) => *b,
        }
    }

    /// Returns `true` for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::InvalidParam => f.write_str("invalid parameter"),
            Self::Error => f.write_str("error"),
            Self::Busy => f.write_str("busy"),
            Self::NotCalibrated => f.write_str("not calibrated"),
            Self::AlreadyCalledByAutoUnlock => f.write_str("already done by auto-unlock"),
            Self::NotConfigured => f.write_str("not configured"),
            Self::Dismounted => f.write_str("dismounted"),
            Self::AlreadyCalledByOther => f.write_str("already done by another operation"),
            Self::Other(b) => write!(f, "unknown result 0x{b:02x}"),
        }
    }
}

// ============================================
// Modes
// ============================================

/// Parameter for `LOCK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Normal lock.
    #[default]
    Normal,
    /// Lock even if the door sensor reports open.
    Force,
}

/// Parameter for `UNLOCK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnlockMode {
    /// Normal unlock.
    #[default]
    Normal,
    /// Unlock issued by an auto-unlock rule.
    Auto,
    /// Unlock without the pull-spring step.
    Force,
}

// ============================================
// Command
// ============================================

/// Operation request without its correlation tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Operation.
    pub opcode: Opcode,
    /// Parameter bytes.
    pub params: Bytes,
}

impl Command {
    /// Creates a command with raw parameters.
    #[must_use]
    pub fn new(opcode: Opcode, params: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            params: params.into(),
        }
    }

    /// `GET_STATE`.
    #[must_use]
    pub fn get_state() -> Self {
        Self::new(Opcode::GetState, Bytes::new())
    }

    /// `GET_BATTERY`.
    #[must_use]
    pub fn get_battery() -> Self {
        Self::new(Opcode::GetBattery, Bytes::new())
    }

    /// `LOCK`.
    #[must_use]
    pub fn lock(mode: LockMode) -> Self {
        let param: u8 = match mode {
            LockMode::Normal => 0x00,
            LockMode::Force => 0x02,
        };
        Self::new(Opcode::Lock, vec![param])
    }

    /// `UNLOCK`.
    #[must_use]
    pub fn unlock(mode: UnlockMode) -> Self {
        let param: u8 = match mode {
            UnlockMode::Normal => 0x00,
            UnlockMode::Auto => 0x01,
            UnlockMode::Force => 0x02,
        };
        Self::new(Opcode::Unlock, vec![param])
    }

    /// `PULL_SPRING`.
    #[must_use]
    pub fn pull_spring() -> Self {
        Self::new(Opcode::PullSpring, Bytes::new())
    }

    /// `SET_SIGNED_DATETIME` carrying the authority-signed time.
    #[must_use]
    pub fn set_signed_datetime(time: &SignedTimestamp) -> Self {
        Self::new(Opcode::SetSignedDatetime, time.to_bytes().to_vec())
    }
}

// ============================================
// Response
// ============================================

/// Lock reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Tag copied from the command.
    pub tag: u8,
    /// Opcode copied from the command.
    pub opcode: Opcode,
    /// Outcome.
    pub result: ResultCode,
    /// Opcode-specific data.
    pub data: Bytes,
}

impl Response {
    /// Parses `GET_STATE` data.
    ///
    /// # Errors
    /// `UnexpectedFrame` for another opcode, `MessageTooShort` if the data
    /// is truncated.
    pub fn state_report(&self) -> Result<StateReport> {
        if self.opcode != Opcode::GetState {
            return Err(CoreError::unexpected("GET_STATE response", self.opcode.as_byte()));
        }
        StateReport::from_bytes(&self.data)
    }

    /// Parses `GET_BATTERY` data.
    ///
    /// # Errors
    /// `UnexpectedFrame` for another opcode, `MessageTooShort` if the data
    /// is truncated.
    pub fn battery_report(&self) -> Result<BatteryReport> {
        if self.opcode != Opcode::GetBattery {
            return Err(CoreError::unexpected("GET_BATTERY response", self.opcode.as_byte()));
        }
        BatteryReport::from_bytes(&self.data)
    }
}

/// `GET_STATE` data: `[state][status][door]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    /// Bolt state.
    pub state: LockState,
    /// Motor reported a jam.
    pub jammed: bool,
    /// Door sensor.
    pub door: DoorState,
}

impl StateReport {
    /// Size on the wire.
    pub const SIZE: usize = 3;

    /// Parses the report.
    ///
    /// # Errors
    /// Returns `MessageTooShort` if fewer than 3 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(CoreError::too_short(Self::SIZE, data.len()));
        }
        Ok(Self {
            state: LockState::from_byte(data[0]),
            jammed: data[1] == 1,
            door: DoorState::from_byte(data[2]),
        })
    }

    /// Encodes the report.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.state.as_byte(), u8::from(self.jammed), self.door.as_byte()]
    }
}

/// `GET_BATTERY` data: `[level][charging]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryReport {
    /// Charge percentage (0-100).
    pub level: u8,
    /// Charger connected.
    pub charging: bool,
}

impl BatteryReport {
    /// Size on the wire.
    pub const SIZE: usize = 2;

    /// Parses the report.
    ///
    /// # Errors
    /// `MessageTooShort` if truncated, `MalformedMessage` if the level is
    /// above 100.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(CoreError::too_short(Self::SIZE, data.len()));
        }
        if data[0] > 100 {
            return Err(CoreError::malformed(format!("battery level {}", data[0])));
        }
        Ok(Self {
            level: data[0],
            charging: data[1] == 1,
        })
    }

    /// Encodes the report.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.level, u8::from(self.charging)]
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_params() {
        assert_eq!(Command::lock(LockMode::Force).params.as_ref(), &[0x02]);
        assert_eq!(Command::unlock(UnlockMode::Auto).params.as_ref(), &[0x01]);
        assert!(Command::get_state().params.is_empty());
        assert!(Opcode::PullSpring.is_actuation());
        assert!(!Opcode::GetState.is_actuation());
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(ResultCode::from_byte(0x0A), ResultCode::AlreadyCalledByOther);
        assert_eq!(ResultCode::from_byte(0x04), ResultCode::Other(0x04));
        assert_eq!(ResultCode::Other(0x04).as_byte(), 0x04);
        assert!(ResultCode::Success.is_success());
    }

    #[test]
    fn test_state_report() {
        let report = StateReport::from_bytes(&[6, 0, 3]).unwrap();
        assert_eq!(report.state, LockState::Locked);
        assert!(!report.jammed);
        assert_eq!(report.door, DoorState::Closed);
        assert!(StateReport::from_bytes(&[6]).is_err());
    }

    #[test]
    fn test_battery_report() {
        let report = BatteryReport::from_bytes(&[87, 1]).unwrap();
        assert_eq!(report.level, 87);
        assert!(report.charging);
        assert!(BatteryReport::from_bytes(&[180, 0]).is_err());
    }

    #[test]
    fn test_response_helpers_check_opcode() {
        let response = Response {
            tag: 1,
            opcode: Opcode::Lock,
            result: ResultCode::Success,
            data: Bytes::from_static(&[6, 0, 3]),
        };
        assert!(response.state_report().is_err());
    }
}
