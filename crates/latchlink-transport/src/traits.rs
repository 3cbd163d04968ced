// ============================================
// File: crates/latchlink-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the capability set every way of reaching a lock shares, so
//! the connection lifecycle does not care whether the radio is attached
//! locally or sits behind a network proxy.
//!
//! ## Main Functionality
//! - `RadioTransport`: Scan and connect
//! - `RadioLink`: One open link: write, subscribe, disconnect
//! - `LinkEvent`: Inbound frames and the terminal disconnect signal
//! - `ScanFilter` / `ScanStream`: Lazy, finite discovery
//!
//! ## Design Philosophy
//! - Traits enable mock implementations for testing
//! - Async-first design with `async_trait`
//! - Inbound data is pushed into an unbounded channel so radio callbacks
//!   never block and arrive in delivery order
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync for use in async contexts
//! - Link loss is a `LinkEvent::Disconnected` on the sink and is always
//!   the last event a sink receives
//! - `connect` does not authenticate; the handshake runs on top
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use latchlink_common::types::{DeviceAddress, SerialNumber};

use crate::error::Result;
use crate::gatt::service_uuid_for_serial;

// ============================================
// Constants
// ============================================

/// MTU used when the radio does not report one.
pub const DEFAULT_MTU: u8 = 200;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================
// Channel
// ============================================

/// Logical channel of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Handshake frames, both directions.
    Handshake,
    /// Encrypted commands out, responses in.
    Command,
    /// Unsolicited notifications (inbound only).
    Notification,
}

impl Channel {
    /// Wire byte used by the proxy protocol.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Handshake => 0,
            Self::Command => 1,
            Self::Notification => 2,
        }
    }

    /// Converts a proxy wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Handshake),
            1 => Some(Self::Command),
            2 => Some(Self::Notification),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Command => "command",
            Self::Notification => "notification",
        })
    }
}

// ============================================
// LinkEvent
// ============================================

/// Event delivered to a link subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Raw bytes arrived on a channel.
    Frame {
        /// Channel the bytes arrived on.
        channel: Channel,
        /// Frame bytes.
        data: Bytes,
    },
    /// Link is gone. Terminal: nothing follows.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

/// Sink receiving inbound link events.
pub type LinkEventSink = mpsc::UnboundedSender<LinkEvent>;

// ============================================
// Discovery
// ============================================

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Radio address.
    pub address: DeviceAddress,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Advertised service UUIDs (lowercase).
    pub service_uuids: Vec<String>,
}

/// What a scan looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only devices advertising this service.
    pub service_uuid: Option<String>,
    /// Only this address.
    pub address: Option<DeviceAddress>,
    /// How long the scan runs.
    pub timeout: Duration,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            service_uuid: None,
            address: None,
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ScanFilter {
    /// Matches everything for `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Matches the lock with the given serial number.
    #[must_use]
    pub fn for_serial(serial: &SerialNumber, timeout: Duration) -> Self {
        Self {
            service_uuid: Some(service_uuid_for_serial(serial)),
            timeout,
            ..Self::default()
        }
    }

    /// Restricts the scan to one address.
    #[must_use]
    pub fn with_address(mut self, address: DeviceAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Returns `true` if `advert` passes the filter.
    #[must_use]
    pub fn matches(&self, advert: &Advertisement) -> bool {
        if let Some(address) = &self.address {
            if &advert.address != address {
                return false;
            }
        }
        match &self.service_uuid {
            Some(uuid) => advert
                .service_uuids
                .iter()
                .any(|u| u.eq_ignore_ascii_case(uuid)),
            None => true,
        }
    }
}

/// Lazy, finite sequence of discovered devices.
///
/// Ends when the backend reports completion or the deadline passes,
/// whichever comes first. Duplicate addresses are reported once.
///
/// # Example
/// ```
/// use latchlink_transport::traits::{Advertisement, ScanFilter, ScanStream};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (tx, mut stream) = ScanStream::channel(ScanFilter::new(Duration::from_secs(1)));
/// tx.send(Advertisement {
///     address: "AA:BB".into(),
///     name: None,
///     rssi: -60,
///     service_uuids: vec![],
/// })
/// .await
/// .unwrap();
/// drop(tx);
/// assert!(stream.next().await.is_some());
/// assert!(stream.next().await.is_none());
/// # }
/// ```
#[derive(Debug)]
pub struct ScanStream {
    rx: mpsc::Receiver<Advertisement>,
    filter: ScanFilter,
    deadline: Instant,
    seen: Vec<DeviceAddress>,
}

impl ScanStream {
    /// Wraps a receiver fed by a backend.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Advertisement>, filter: ScanFilter) -> Self {
        let deadline = Instant::now() + filter.timeout;
        Self {
            rx,
            filter,
            deadline,
            seen: Vec::new(),
        }
    }

    /// Creates a stream and the sender a backend feeds.
    #[must_use]
    pub fn channel(filter: ScanFilter) -> (mpsc::Sender<Advertisement>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (tx, Self::new(rx, filter))
    }

    /// Next matching device, or `None` once the scan is over.
    pub async fn next(&mut self) -> Option<Advertisement> {
        loop {
            let advert = tokio::time::timeout_at(self.deadline, self.rx.recv())
                .await
                .ok()
                .flatten()?;
            if !self.filter.matches(&advert) || self.seen.contains(&advert.address) {
                continue;
            }
            self.seen.push(advert.address.clone());
            return Some(advert);
        }
    }

    /// Drains the scan.
    pub async fn collect(mut self) -> Vec<Advertisement> {
        let mut all = Vec::new();
        while let Some(advert) = self.next().await {
            all.push(advert);
        }
        all
    }
}

// ============================================
// RadioTransport Trait
// ============================================

/// A way of reaching locks.
///
/// # Example
/// ```ignore
/// let mut scan = transport.scan(ScanFilter::for_serial(&serial, timeout)).await?;
/// let advert = scan.next().await.ok_or(NotFound)?;
/// let link = transport.connect(&advert.address).await?;
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// link.subscribe(tx)?;
/// link.write(Channel::Handshake, &hello).await?;
/// ```
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Short name for logs ("direct", "proxy").
    fn kind(&self) -> &'static str;

    /// Starts discovery.
    ///
    /// # Errors
    /// `AdapterUnavailable` or `ScanFailed` if discovery cannot start.
    async fn scan(&self, filter: ScanFilter) -> Result<ScanStream>;

    /// Opens a link to `address`.
    ///
    /// # Errors
    /// `AdapterUnavailable`, `OutOfRange` or `ConnectFailed`.
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn RadioLink>>;
}

// ============================================
// RadioLink Trait
// ============================================

/// One open link to a lock.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Remote address.
    fn address(&self) -> &DeviceAddress;

    /// Largest frame the link carries.
    fn mtu(&self) -> u8;

    /// Returns `false` once the link is gone.
    fn is_connected(&self) -> bool;

    /// Writes one frame.
    ///
    /// # Errors
    /// `NotConnected`, `InvalidChannel` or `WriteFailed`. A link that dies
    /// later is reported on the sink instead.
    async fn write(&self, channel: Channel, data: &[u8]) -> Result<()>;

    /// Routes inbound frames and the disconnect event to `sink`.
    ///
    /// # Errors
    /// `NotConnected` if the link is already gone.
    fn subscribe(&self, sink: LinkEventSink) -> Result<()>;

    /// Closes the link. Idempotent.
    ///
    /// # Errors
    /// Only on I/O failure while closing; the link is unusable either way.
    async fn disconnect(&self) -> Result<()>;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(address: &str, uuid: &str) -> Advertisement {
        Advertisement {
            address: DeviceAddress::new(address),
            name: Some("Lock".into()),
            rssi: -70,
            service_uuids: vec![uuid.into()],
        }
    }

    #[test]
    fn test_channel_bytes() {
        for channel in [Channel::Handshake, Channel::Command, Channel::Notification] {
            assert_eq!(Channel::from_byte(channel.as_byte()), Some(channel));
        }
        assert_eq!(Channel::from_byte(9), None);
    }

    #[test]
    fn test_filter_matches() {
        let serial: SerialNumber = "12345678-901234".parse().unwrap();
        let filter = ScanFilter::for_serial(&serial, Duration::from_secs(1));
        let uuid = service_uuid_for_serial(&serial);
        assert!(filter.matches(&advert("aa:bb", &uuid)));
        assert!(filter.matches(&advert("aa:bb", &uuid.to_uppercase())));
        assert!(!filter.matches(&advert("aa:bb", "00000000-0000-0000-0000-000000000000")));

        let filter = ScanFilter::new(Duration::from_secs(1)).with_address("AA:CC".into());
        assert!(!filter.matches(&advert("aa:bb", &uuid)));
        assert!(filter.matches(&advert("aa:cc", &uuid)));
    }

    #[tokio::test]
    async fn test_scan_stream_deduplicates_and_ends() {
        let (tx, stream) = ScanStream::channel(ScanFilter::new(Duration::from_secs(5)));
        tx.send(advert("aa:01", "x")).await.unwrap();
        tx.send(advert("aa:01", "x")).await.unwrap();
        tx.send(advert("aa:02", "x")).await.unwrap();
        drop(tx);
        let all = stream.collect().await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stream_times_out() {
        let (tx, mut stream) = ScanStream::channel(ScanFilter::new(Duration::from_secs(3)));
        let started = Instant::now();
        assert!(stream.next().await.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        drop(tx);
    }
}
