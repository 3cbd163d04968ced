// ============================================
// File: crates/latchlink-core/src/protocol/events.rs
// ============================================
//! # Unsolicited Lock Notifications
//!
//! ## Creation Reason
//! The lock pushes state changes and requests on its own; these have no
//! correlation tag and must be told apart from command responses.
//!
//! ## Main Functionality
//! - `EventId`: Notification identifiers
//! - `Event`: Decoded notification
//! - `StatusChange`: Body of `LOCK_STATUS_CHANGE`
//! - `ChangeKind`: What a status change means for observers
//!
//! ## Last Modified
//! v0.1.0 - Initial notification set

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use latchlink_common::types::ActorId;

use super::commands::ResultCode;
use super::state::{DoorState, LockState, Trigger};
use crate::error::{CoreError, Result};

// ============================================
// EventId
// ============================================

/// Notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventId {
    /// Lock acknowledged a signed datetime.
    SignedDatetimeAck = 0x7B,
    /// Lock asks for a signed datetime.
    NeedDateTime = 0xA4,
    /// Lock or door state changed.
    LockStatusChange = 0xBA,
    /// Opaque statistics blob.
    DeviceStats = 0xE2,
}

impl EventId {
    /// Converts a byte to an `EventId`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7B => Some(Self::SignedDatetimeAck),
            0xA4 => Some(Self::NeedDateTime),
            0xBA => Some(Self::LockStatusChange),
            0xE2 => Some(Self::DeviceStats),
            _ => None,
        }
    }

    /// Wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

// ============================================
// StatusChange
// ============================================

/// Body of `LOCK_STATUS_CHANGE`.
///
/// ```text
/// [state][status][trigger][actor u32 BE][door]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Bolt state after the change.
    pub state: LockState,
    /// Motor reported a jam.
    pub jammed: bool,
    /// What caused the change.
    pub trigger: Trigger,
    /// Who caused it (0 when nobody is attributable).
    pub actor: ActorId,
    /// Door sensor after the change.
    pub door: DoorState,
}

impl StatusChange {
    /// Size on the wire.
    pub const SIZE: usize = 8;

    /// Shortest body a lock sends: state, status and trigger.
    pub const MIN_SIZE: usize = 3;

    /// Parses the body.
    ///
    /// Older firmware stops after the trigger byte. A missing actor reads
    /// as `ActorId(0)` and a missing door byte as `DoorState::Unknown`.
    ///
    /// # Errors
    /// Returns `MessageTooShort` if fewer than 3 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(CoreError::too_short(Self::MIN_SIZE, data.len()));
        }
        let actor = data
            .get(3..7)
            .map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        Ok(Self {
            state: LockState::from_byte(data[0]),
            jammed: data[1] == 1,
            trigger: Trigger::from_byte(data[2]),
            actor: ActorId(actor),
            door: data.get(7).map_or(DoorState::Unknown, |&b| DoorState::from_byte(b)),
        })
    }

    /// Encodes the body.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let actor = self.actor.0.to_be_bytes();
        [
            self.state.as_byte(),
            u8::from(self.jammed),
            self.trigger.as_byte(),
            actor[0],
            actor[1],
            actor[2],
            actor[3],
            self.door.as_byte(),
        ]
    }

    /// Observer-facing meaning of the change.
    ///
    /// A jam wins over everything; a door-sensor trigger reports the
    /// door; otherwise the bolt state decides.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        if self.jammed {
            return ChangeKind::Jammed;
        }
        if matches!(self.trigger, Trigger::DoorSensor) {
            return match self.door {
                DoorState::Open => ChangeKind::DoorOpen,
                DoorState::Closed => ChangeKind::DoorClosed,
                DoorState::Unknown => ChangeKind::Other,
            };
        }
        match self.state {
            LockState::Locked => ChangeKind::Locked,
            LockState::Locking => ChangeKind::Locking,
            LockState::Unlocking | LockState::Pulling => ChangeKind::Unlocking,
            LockState::Unlocked | LockState::PullSpring | LockState::PartiallyUnlocked => {
                ChangeKind::Unlocked
            }
            _ => ChangeKind::Other,
        }
    }
}

/// Observer-facing meaning of a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Bolt locked.
    Locked,
    /// Bolt unlocked.
    Unlocked,
    /// Bolt moving to locked.
    Locking,
    /// Bolt moving to unlocked.
    Unlocking,
    /// Motor jammed.
    Jammed,
    /// Door opened.
    DoorOpen,
    /// Door closed.
    DoorClosed,
    /// Calibration and other states.
    Other,
}

// ============================================
// Event
// ============================================

/// Decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Lock or door state changed.
    StatusChange(StatusChange),
    /// Result of `SET_SIGNED_DATETIME`.
    SignedDatetimeAck(ResultCode),
    /// Lock has no trusted time and asks for one.
    NeedDateTime,
    /// Opaque statistics.
    DeviceStats(Bytes),
}

impl Event {
    /// Identifier of this event.
    #[must_use]
    pub const fn id(&self) -> EventId {
        match self {
            Self::StatusChange(_) => EventId::LockStatusChange,
            Self::SignedDatetimeAck(_) => EventId::SignedDatetimeAck,
            Self::NeedDateTime => EventId::NeedDateTime,
            Self::DeviceStats(_) => EventId::DeviceStats,
        }
    }

    /// Parses an event body.
    ///
    /// # Errors
    /// `UnknownEvent` for unrecognized ids, `MessageTooShort` for
    /// truncated bodies.
    pub fn parse(id: u8, data: &[u8]) -> Result<Self> {
        match EventId::from_byte(id) {
            Some(EventId::LockStatusChange) => Ok(Self::StatusChange(StatusChange::from_bytes(data)?)),
            Some(EventId::SignedDatetimeAck) => {
                let result = data.first().ok_or(CoreError::too_short(1, 0))?;
                Ok(Self::SignedDatetimeAck(ResultCode::from_byte(*result)))
            }
            Some(EventId::NeedDateTime) => Ok(Self::NeedDateTime),
            Some(EventId::DeviceStats) => Ok(Self::DeviceStats(Bytes::copy_from_slice(data))),
            None => Err(CoreError::UnknownEvent(id)),
        }
    }

    /// Encodes the event body (without id).
    #[must_use]
    pub fn body(&self) -> Bytes {
        match self {
            Self::StatusChange(change) => Bytes::copy_from_slice(&change.to_bytes()),
            Self::SignedDatetimeAck(result) => Bytes::copy_from_slice(&[result.as_byte()]),
            Self::NeedDateTime => Bytes::new(),
            Self::DeviceStats(data) => data.clone(),
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
    fn test_status_change_parse() {
        let data = [6, 0, 0x02, 0x00, 0x00, 0x30, 0x39, 3];
        let change = StatusChange::from_bytes(&data).unwrap();
        assert_eq!(change.state, LockState::Locked);
        assert_eq!(change.trigger, Trigger::Remote);
        assert_eq!(change.actor, ActorId(12345));
        assert_eq!(change.door, DoorState::Closed);
        assert_eq!(change.kind(), ChangeKind::Locked);
        assert_eq!(change.to_bytes(), data);
    }

    #[test]
    fn test_status_change_without_door_byte() {
        let change = StatusChange::from_bytes(&[2, 0, 0x02, 0x00, 0x00, 0x00, 0x07]).unwrap();
        assert_eq!(change.actor, ActorId(7));
        assert_eq!(change.door, DoorState::Unknown);

        // a partial actor field is not an actor
        let change = StatusChange::from_bytes(&[2, 0, 0x02, 0x00, 0x07]).unwrap();
        assert!(change.actor.is_none());
    }

    #[test]
    fn test_change_kind_priority() {
        let mut change = StatusChange::from_bytes(&[4, 0, 0x01, 0, 0, 0, 0, 3]).unwrap();
        assert_eq!(change.kind(), ChangeKind::Unlocking);

        change.jammed = true;
        assert_eq!(change.kind(), ChangeKind::Jammed);

        change.jammed = false;
        change.trigger = Trigger::DoorSensor;
        change.door = DoorState::Open;
        assert_eq!(change.kind(), ChangeKind::DoorOpen);
    }

    #[test]
    fn test_event_parse() {
        assert_eq!(Event::parse(0xA4, &[]).unwrap(), Event::NeedDateTime);
        assert_eq!(
            Event::parse(0x7B, &[0x00]).unwrap(),
            Event::SignedDatetimeAck(ResultCode::Success)
        );
        assert!(matches!(Event::parse(0x7B, &[]), Err(CoreError::MessageTooShort { .. })));
        assert!(matches!(Event::parse(0x99, &[1, 2]), Err(CoreError::UnknownEvent(0x99))));
        assert!(matches!(
            Event::parse(0xBA, &[6, 0, 1]),
            Err(CoreError::MessageTooShort { .. })
        ));
    }
}
