// ============================================
// File: crates/latchlink-transport/src/gatt/mod.rs
// ============================================
//! # GATT Radio Module
//!
//! ## Creation Reason
//! Provides the directly attached radio transport. The lock exposes one
//! GATT service whose characteristics carry the logical channels.
//!
//! ## Main Functionality
//! - Service and characteristic UUIDs
//! - Serial number → advertised service UUID
//! - `direct`: `DirectRadio` over the platform's GATT stack
//! - `btle`: Platform Bluetooth host (`ble` feature)
//! - `mock`: In-memory GATT host for tests and the simulator
//!
//! ## Channel Mapping
//! ```text
//! ┌──────────────┬─────────────────┬────────────────────────────┐
//! │ Channel      │ Characteristic  │ Direction                  │
//! ├──────────────┼─────────────────┼────────────────────────────┤
//! │ Notification │ 00000101        │ lock → controller (notify) │
//! │ Handshake    │ 00000301        │ lock → controller (notify) │
//! │ Handshake    │ 00000401        │ controller → lock (write)  │
//! │ Command      │ 00000501        │ both (write / indicate)    │
//! └──────────────┴─────────────────┴────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handshake writes go without response; command writes with response
//! - UUIDs are compared case-insensitively, stored lowercase
//!
//! ## Last Modified
//! v0.1.0 - Initial GATT module structure

pub mod direct;

#[cfg(feature = "ble")]
pub mod btle;

// Mock implementation for testing and simulation
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use direct::{DirectRadio, GattCallback, GattEvent, GattSession, HostRadio};

#[cfg(feature = "ble")]
pub use btle::BtleHost;

#[cfg(any(test, feature = "mock"))]
pub use mock::{GattWrite, MockHost, MockPeripheral, PeripheralLink};

use latchlink_common::types::SerialNumber;

use crate::traits::Channel;

// ============================================
// Constants
// ============================================

/// Lock GATT service.
pub const SERVICE_UUID: &str = "00000002-4899-489f-a301-fbee544b1db0";

/// Notification characteristic (lock → controller).
pub const CHAR_NOTIFICATIONS: &str = "00000101-4899-489f-a301-fbee544b1db0";

/// Handshake characteristic the lock notifies on.
pub const CHAR_HANDSHAKE_TX: &str = "00000301-4899-489f-a301-fbee544b1db0";

/// Handshake characteristic the controller writes to.
pub const CHAR_HANDSHAKE_RX: &str = "00000401-4899-489f-a301-fbee544b1db0";

/// Command characteristic (write with response, indicate).
pub const CHAR_COMMANDS: &str = "00000501-4899-489f-a301-fbee544b1db0";

/// Largest MTU a link reports.
pub const MAX_MTU: u16 = 255;

// ============================================
// UUID helpers
// ============================================

/// Advertised service UUID of the lock with `serial`.
///
/// Digits `[0..4]`, `[4..8]`, `[8..12]` and `[12..14]` of the dashless
/// serial are spliced into a fixed template.
///
/// # Example
/// ```
/// use latchlink_common::types::SerialNumber;
/// use latchlink_transport::gatt::service_uuid_for_serial;
///
/// let serial: SerialNumber = "12345678-901234".parse().unwrap();
/// assert_eq!(
///     service_uuid_for_serial(&serial),
///     "12340000-5678-9012-3400-000000000000"
/// );
/// ```
#[must_use]
pub fn service_uuid_for_serial(serial: &SerialNumber) -> String {
    let d = serial.digits();
    format!(
        "{}0000-{}-{}-{}00-000000000000",
        &d[0..4],
        &d[4..8],
        &d[8..12],
        &d[12..14]
    )
}

/// Characteristic a channel writes to, if writable.
#[must_use]
pub const fn write_characteristic(channel: Channel) -> Option<&'static str> {
    match channel {
        Channel::Handshake => Some(CHAR_HANDSHAKE_RX),
        Channel::Command => Some(CHAR_COMMANDS),
        Channel::Notification => None,
    }
}

/// Channel an inbound characteristic value belongs to.
#[must_use]
pub fn channel_for_characteristic(characteristic: &str) -> Option<Channel> {
    [
        (CHAR_HANDSHAKE_TX, Channel::Handshake),
        (CHAR_COMMANDS, Channel::Command),
        (CHAR_NOTIFICATIONS, Channel::Notification),
    ]
    .into_iter()
    .find(|(uuid, _)| uuid.eq_ignore_ascii_case(characteristic))
    .map(|(_, channel)| channel)
}

/// Characteristic the lock sends a channel's frames on.
#[must_use]
pub const fn notify_characteristic(channel: Channel) -> &'static str {
    match channel {
        Channel::Handshake => CHAR_HANDSHAKE_TX,
        Channel::Command => CHAR_COMMANDS,
        Channel::Notification => CHAR_NOTIFICATIONS,
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid_for_serial() {
        let serial: SerialNumber = "10460103-000111".parse().unwrap();
        assert_eq!(
            service_uuid_for_serial(&serial),
            "10460000-0103-0001-1100-000000000000"
        );
    }

    #[test]
    fn test_channel_mapping() {
        assert_eq!(write_characteristic(Channel::Handshake), Some(CHAR_HANDSHAKE_RX));
        assert_eq!(write_characteristic(Channel::Notification), None);
        assert_eq!(
            channel_for_characteristic(&CHAR_COMMANDS.to_uppercase()),
            Some(Channel::Command)
        );
        assert_eq!(channel_for_characteristic(CHAR_HANDSHAKE_RX), None);
        for channel in [Channel::Handshake, Channel::Command, Channel::Notification] {
            assert_eq!(
                channel_for_characteristic(notify_characteristic(channel)),
                Some(channel)
            );
        }
    }
}
