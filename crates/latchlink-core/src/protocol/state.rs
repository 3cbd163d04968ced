// ============================================
// File: crates/latchlink-core/src/protocol/state.rs
// ============================================
//! # Lock State Values
//!
//! Value tables shared by `GET_STATE` responses and status-change
//! notifications.
//!
//! Unknown door and trigger bytes decode leniently (firmware adds values
//! over time); an unknown lock state is reported as `LockState::Unknown`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================
// LockState
// ============================================

/// Mechanical state of the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockState {
    /// Never calibrated.
    Uncalibrated = 0,
    /// Calibration in progress.
    Calibration = 1,
    /// Fully unlocked.
    Unlocked = 2,
    /// Stopped between positions.
    PartiallyUnlocked = 3,
    /// Motor moving towards unlocked.
    Unlocking = 4,
    /// Motor moving towards locked.
    Locking = 5,
    /// Fully locked.
    Locked = 6,
    /// Latch held open.
    PullSpring = 7,
    /// Latch being pulled.
    Pulling = 8,
    /// State not known.
    Unknown = 9,
}

impl LockState {
    /// Converts a byte; out-of-range values become `Unknown`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Uncalibrated,
            1 => Self::Calibration,
            2 => Self::Unlocked,
            3 => Self::PartiallyUnlocked,
            4 => Self::Unlocking,
            5 => Self::Locking,
            6 => Self::Locked,
            7 => Self::PullSpring,
            8 => Self::Pulling,
            _ => Self::Unknown,
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Motor is moving.
    #[must_use]
    pub const fn is_moving(&self) -> bool {
        matches!(self, Self::Locking | Self::Unlocking | Self::Pulling)
    }

    /// Bolt retracted (latch may still be engaged).
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked | Self::PullSpring)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncalibrated => "uncalibrated",
            Self::Calibration => "calibrating",
            Self::Unlocked => "unlocked",
            Self::PartiallyUnlocked => "partially unlocked",
            Self::Unlocking => "unlocking",
            Self::Locking => "locking",
            Self::Locked => "locked",
            Self::PullSpring => "pull spring",
            Self::Pulling => "pulling",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ============================================
// DoorState
// ============================================

/// Door sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    /// No sensor or not reported.
    Unknown,
    /// Door open.
    Open,
    /// Door closed.
    Closed,
}

impl DoorState {
    /// Converts a byte; unrecognized values become `Unknown`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            2 => Self::Open,
            3 => Self::Closed,
            _ => Self::Unknown,
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Open => 2,
            Self::Closed => 3,
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

// ============================================
// Trigger
// ============================================

/// What caused a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Physical button on the lock.
    Button,
    /// Remote command (app, this controller, cloud).
    Remote,
    /// Auto-lock timer.
    AutoLock,
    /// Door sensor.
    DoorSensor,
    /// Anything else.
    Unknown,
}

impl Trigger {
    /// Converts a byte; unrecognized values become `Unknown`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Button,
            0x02 => Self::Remote,
            0x04 => Self::AutoLock,
            0x10 => Self::DoorSensor,
            _ => Self::Unknown,
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Button => 0x01,
            Self::Remote => 0x02,
            Self::AutoLock => 0x04,
            Self::DoorSensor => 0x10,
            Self::Unknown => 0x00,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Button => "button",
            Self::Remote => "remote",
            Self::AutoLock => "auto-lock",
            Self::DoorSensor => "door sensor",
            Self::Unknown => "unknown",
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_state_bytes() {
        for b in 0..=9u8 {
            assert_eq!(LockState::from_byte(b).as_byte(), b);
        }
        assert_eq!(LockState::from_byte(200), LockState::Unknown);
        assert!(LockState::Unlocking.is_moving());
        assert!(LockState::Unlocked.is_unlocked());
        assert!(!LockState::Locked.is_unlocked());
    }

    #[test]
    fn test_lenient_door_and_trigger() {
        assert_eq!(DoorState::from_byte(3), DoorState::Closed);
        assert_eq!(DoorState::from_byte(1), DoorState::Unknown);
        assert_eq!(Trigger::from_byte(0x04), Trigger::AutoLock);
        assert_eq!(Trigger::from_byte(0x80), Trigger::Unknown);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&LockState::PartiallyUnlocked).unwrap(),
            "\"partially_unlocked\""
        );
        assert_eq!(serde_json::to_string(&Trigger::AutoLock).unwrap(), "\"auto_lock\"");
    }
}
