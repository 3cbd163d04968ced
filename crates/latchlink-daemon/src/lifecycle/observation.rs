// ============================================
// File: crates/latchlink-daemon/src/lifecycle/observation.rs
// ============================================
//! # Observer-Facing Updates
//!
//! What the host layer sees of a lock: availability, a state snapshot,
//! attributed activity and persistent errors. Delivered on a broadcast
//! channel; a slow observer lags, it never blocks the connection.

use serde::Serialize;

use latchlink_common::time::Timestamp;
use latchlink_common::types::ActorId;
use latchlink_core::protocol::{ChangeKind, DoorState, LockState, StatusChange, Trigger};

use crate::error::ErrorKind;
use crate::resolver::Resolved;

/// Current knowledge about a lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    /// Connection usable as far as observers are concerned.
    pub available: bool,
    /// Bolt state.
    pub lock_state: Option<LockState>,
    /// Motor reported a jam.
    pub jammed: bool,
    /// Door sensor.
    pub door_state: Option<DoorState>,
    /// Battery percentage.
    pub battery_level: Option<u8>,
    /// Charger attached.
    pub battery_charging: Option<bool>,
    /// Cause of the last state change.
    pub last_trigger: Option<Trigger>,
    /// Name (or id) of whoever caused the last change.
    pub last_user: Option<String>,
}

impl LockSnapshot {
    /// Folds a status change into the snapshot.
    pub fn apply_change(&mut self, change: &StatusChange, user: &Resolved) {
        self.lock_state = Some(change.state);
        self.jammed = change.jammed;
        if change.door != DoorState::Unknown || change.trigger == Trigger::DoorSensor {
            self.door_state = Some(change.door);
        }
        self.last_trigger = Some(change.trigger);
        self.last_user = user.label();
    }
}

/// One attributed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    /// Observer-facing meaning.
    pub kind: ChangeKind,
    /// Bolt state after the change.
    pub state: LockState,
    /// What caused it.
    pub trigger: Trigger,
    /// Raw actor id.
    pub actor: ActorId,
    /// Resolved actor.
    pub user: Resolved,
    /// Receive time on the controller clock.
    pub at: Timestamp,
}

/// Update delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Lock reachable again (or for the first time).
    Available,
    /// Lock unreachable for longer than the grace window.
    Unavailable,
    /// Snapshot changed.
    Snapshot(LockSnapshot),
    /// Lock reported a state change.
    Activity(ActivityEvent),
    /// Recovery is not making progress; needs attention.
    PersistentError(ErrorKind, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_change_keeps_unknown_door() {
        let mut snapshot = LockSnapshot {
            door_state: Some(DoorState::Closed),
            ..LockSnapshot::default()
        };
        let change = StatusChange {
            state: LockState::Unlocked,
            jammed: false,
            trigger: Trigger::Remote,
            actor: ActorId(7),
            door: DoorState::Unknown,
        };
        snapshot.apply_change(&change, &Resolved::Name("Alice".into()));
        assert_eq!(snapshot.lock_state, Some(LockState::Unlocked));
        assert_eq!(snapshot.door_state, Some(DoorState::Closed));
        assert_eq!(snapshot.last_user.as_deref(), Some("Alice"));

        let door = StatusChange {
            trigger: Trigger::DoorSensor,
            door: DoorState::Open,
            actor: ActorId(0),
            ..change
        };
        snapshot.apply_change(&door, &Resolved::Unattributed);
        assert_eq!(snapshot.door_state, Some(DoorState::Open));
        assert_eq!(snapshot.last_user, None);
    }
}
