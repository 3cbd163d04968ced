// ============================================
// File: crates/latchlink-transport/src/gatt/mock.rs
// ============================================
//! # Mock GATT Host Implementation
//!
//! ## Creation Reason
//! Provides an in-memory GATT host for tests and for the lock simulator,
//! without radio hardware.
//!
//! ## Main Functionality
//! - Programmable peripherals (address, name, services, MTU)
//! - Range and adapter power toggling
//! - Connection-attempt log with timestamps
//! - Peripheral-side handle (`PeripheralLink`) to read the controller's
//!   writes, push notifications and drop the link
//!
//! ## Usage in Tests
//! ```
//! use std::sync::Arc;
//! use latchlink_transport::gatt::{DirectRadio, MockHost};
//! use latchlink_transport::traits::{Channel, RadioTransport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let host = MockHost::new();
//! let mut peripheral = host.add_peripheral("AA:01", "Lock", vec![]);
//! let radio = DirectRadio::new(Arc::new(host.clone()));
//!
//! let link = radio.connect(&"AA:01".into()).await.unwrap();
//! let mut lock_side = peripheral.accept().await.unwrap();
//! link.write(Channel::Command, b"ping").await.unwrap();
//! assert_eq!(&lock_side.next_write().await.unwrap().data[..], b"ping");
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing and simulation only - do not use in production
//! - Timestamps use `tokio::time::Instant` so paused-clock tests see
//!   exact backoff delays
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use latchlink_common::types::DeviceAddress;

use super::direct::{GattCallback, GattEvent, GattSession, HostRadio};
use crate::error::{Result, TransportError};
use crate::traits::Advertisement;

// ============================================
// Host state
// ============================================

struct PeripheralEntry {
    advert: Advertisement,
    in_range: bool,
    mtu: Option<u16>,
    accept: mpsc::UnboundedSender<PeripheralLink>,
    active: Option<Arc<Connection>>,
}

struct HostState {
    powered: bool,
    peripherals: HashMap<DeviceAddress, PeripheralEntry>,
    attempts: Vec<(DeviceAddress, Instant)>,
    fail_next: usize,
}

// ============================================
// MockHost
// ============================================

/// In-memory GATT host.
///
/// Clones share state: keep one clone for the test and hand another to
/// [`DirectRadio`](super::DirectRadio).
#[derive(Clone)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// Creates a powered host with no peripherals.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                powered: true,
                peripherals: HashMap::new(),
                attempts: Vec::new(),
                fail_next: 0,
            })),
        }
    }

    /// Adds an advertising peripheral in range.
    pub fn add_peripheral(
        &self,
        address: &str,
        name: &str,
        service_uuids: Vec<String>,
    ) -> MockPeripheral {
        let address = DeviceAddress::new(address);
        let (accept, incoming) = mpsc::unbounded_channel();
        let advert = Advertisement {
            address: address.clone(),
            name: Some(name.to_string()),
            rssi: -60,
            service_uuids: service_uuids.into_iter().map(|u| u.to_lowercase()).collect(),
        };
        self.state.lock().peripherals.insert(
            address.clone(),
            PeripheralEntry {
                advert,
                in_range: true,
                mtu: None,
                accept,
                active: None,
            },
        );
        MockPeripheral {
            address,
            host: self.clone(),
            incoming,
        }
    }

    /// Powers the adapter on or off. Powering off drops every link.
    pub fn set_powered(&self, powered: bool) {
        let dropped: Vec<_> = {
            let mut state = self.state.lock();
            state.powered = powered;
            if powered {
                Vec::new()
            } else {
                state
                    .peripherals
                    .values_mut()
                    .filter_map(|p| p.active.take())
                    .collect()
            }
        };
        for connection in dropped {
            connection.drop_remote("adapter powered off");
        }
    }

    /// Moves a peripheral in or out of range. Out of range drops its link.
    pub fn set_in_range(&self, address: &DeviceAddress, in_range: bool) {
        let dropped = {
            let mut state = self.state.lock();
            state.peripherals.get_mut(address).and_then(|p| {
                p.in_range = in_range;
                if in_range {
                    None
                } else {
                    p.active.take()
                }
            })
        };
        if let Some(connection) = dropped {
            connection.drop_remote("out of range");
        }
    }

    /// Sets the MTU a peripheral negotiates.
    pub fn set_mtu(&self, address: &DeviceAddress, mtu: Option<u16>) {
        if let Some(p) = self.state.lock().peripherals.get_mut(address) {
            p.mtu = mtu;
        }
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Every connection attempt so far, with its time.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<(DeviceAddress, Instant)> {
        self.state.lock().attempts.clone()
    }
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockHost")
            .field("powered", &state.powered)
            .field("peripherals", &state.peripherals.len())
            .field("attempts", &state.attempts.len())
            .finish()
    }
}

#[async_trait]
impl HostRadio for MockHost {
    fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    async fn start_scan(&self, service_uuid: Option<&str>) -> Result<mpsc::Receiver<Advertisement>> {
        let adverts: Vec<Advertisement> = {
            let state = self.state.lock();
            if !state.powered {
                return Err(TransportError::ScanFailed {
                    reason: "adapter powered off".into(),
                });
            }
            state
                .peripherals
                .values()
                .filter(|p| p.in_range)
                .filter(|p| {
                    service_uuid.map_or(true, |uuid| {
                        p.advert.service_uuids.iter().any(|u| u.eq_ignore_ascii_case(uuid))
                    })
                })
                .map(|p| p.advert.clone())
                .collect()
        };
        let (tx, rx) = mpsc::channel(adverts.len().max(1));
        for advert in adverts {
            // capacity covers every advert
            let _ = tx.try_send(advert);
        }
        Ok(rx)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattSession>> {
        let mut state = self.state.lock();
        state.attempts.push((address.clone(), Instant::now()));
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::connect_failed(address, "injected failure"));
        }
        let entry = state
            .peripherals
            .get_mut(address)
            .filter(|p| p.in_range)
            .ok_or_else(|| TransportError::OutOfRange {
                address: address.clone(),
            })?;

        let (writes, write_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            connected: AtomicBool::new(true),
            writes: Mutex::new(Some(writes)),
            callback: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            subscribed: Mutex::new(HashSet::new()),
            mtu: entry.mtu,
        });
        let link = PeripheralLink {
            writes: write_rx,
            connection: Arc::clone(&connection),
        };
        if entry.accept.send(link).is_err() {
            return Err(TransportError::connect_failed(address, "peripheral not responding"));
        }
        if let Some(previous) = entry.active.replace(Arc::clone(&connection)) {
            previous.drop_remote("superseded by new connection");
        }
        debug!(%address, "Mock connection opened");
        Ok(Box::new(MockSession(connection)))
    }
}

// ============================================
// Connection (shared by both ends)
// ============================================

struct Connection {
    connected: AtomicBool,
    writes: Mutex<Option<mpsc::UnboundedSender<GattWrite>>>,
    callback: Mutex<Option<GattCallback>>,
    pending: Mutex<Vec<GattEvent>>,
    subscribed: Mutex<HashSet<String>>,
    mtu: Option<u16>,
}

impl Connection {
    fn deliver(&self, event: GattEvent) {
        let callback = self.callback.lock();
        match callback.as_ref() {
            Some(cb) => cb(event),
            None => self.pending.lock().push(event),
        }
    }

    /// Remote side (peripheral, range, adapter) ended the connection.
    fn drop_remote(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.writes.lock().take();
            self.deliver(GattEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }
}

struct MockSession(Arc<Connection>);

#[async_trait]
impl GattSession for MockSession {
    fn mtu(&self) -> Option<u16> {
        self.0.mtu
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    async fn enable_notify(&self, characteristic: &str) -> Result<()> {
        self.0.subscribed.lock().insert(characteristic.to_lowercase());
        Ok(())
    }

    fn set_callback(&self, callback: GattCallback) {
        let mut slot = self.0.callback.lock();
        for event in self.0.pending.lock().drain(..) {
            callback(event);
        }
        *slot = Some(callback);
    }

    async fn write(&self, characteristic: &str, data: &[u8], with_response: bool) -> Result<()> {
        let writes = self.0.writes.lock();
        let sender = writes.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(GattWrite {
                characteristic: characteristic.to_lowercase(),
                data: Bytes::copy_from_slice(data),
                with_response,
            })
            .map_err(|_| TransportError::write_failed("peripheral gone"))
    }

    async fn disconnect(&self) -> Result<()> {
        self.0.connected.store(false, Ordering::SeqCst);
        self.0.writes.lock().take();
        Ok(())
    }
}

// ============================================
// Peripheral side
// ============================================

/// A write the controller made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattWrite {
    /// Target characteristic (lowercase).
    pub characteristic: String,
    /// Written bytes.
    pub data: Bytes,
    /// Write with response.
    pub with_response: bool,
}

/// Peripheral registered on a [`MockHost`]; yields incoming connections.
pub struct MockPeripheral {
    address: DeviceAddress,
    host: MockHost,
    incoming: mpsc::UnboundedReceiver<PeripheralLink>,
}

impl MockPeripheral {
    /// Peripheral address.
    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Host the peripheral lives on.
    #[must_use]
    pub fn host(&self) -> &MockHost {
        &self.host
    }

    /// Waits for the controller to connect.
    pub async fn accept(&mut self) -> Option<PeripheralLink> {
        self.incoming.recv().await
    }
}

impl std::fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Peripheral end of one connection.
pub struct PeripheralLink {
    writes: mpsc::UnboundedReceiver<GattWrite>,
    connection: Arc<Connection>,
}

impl PeripheralLink {
    /// Next controller write; `None` once the controller disconnected.
    pub async fn next_write(&mut self) -> Option<GattWrite> {
        self.writes.recv().await
    }

    /// Sends a value if the controller enabled notifications on it.
    /// Returns `false` if it could not be delivered.
    pub fn notify(&self, characteristic: &str, data: &[u8]) -> bool {
        let characteristic = characteristic.to_lowercase();
        if !self.is_connected() || !self.connection.subscribed.lock().contains(&characteristic) {
            return false;
        }
        self.connection.deliver(GattEvent::Value {
            characteristic,
            data: Bytes::copy_from_slice(data),
        });
        true
    }

    /// Drops the connection from the lock side.
    pub fn drop_link(&self, reason: &str) {
        self.connection.drop_remote(reason);
    }

    /// Returns `false` once either side disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PeripheralLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralLink")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_out_of_range_connect_fails() {
        let host = MockHost::new();
        let _p = host.add_peripheral("aa:01", "Lock", vec![]);
        host.set_in_range(&"aa:01".into(), false);
        assert!(matches!(
            host.connect(&"aa:01".into()).await,
            Err(TransportError::OutOfRange { .. })
        ));
        assert!(matches!(
            host.connect(&"aa:99".into()).await,
            Err(TransportError::OutOfRange { .. })
        ));
        assert_eq!(host.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let host = MockHost::new();
        let _p = host.add_peripheral("aa:01", "Lock", vec![]);
        host.fail_next_connects(1);
        assert!(host.connect(&"aa:01".into()).await.is_err());
        assert!(host.connect(&"aa:01".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_events_buffered_until_callback() {
        let host = MockHost::new();
        let mut p = host.add_peripheral("aa:01", "Lock", vec![]);
        let session = host.connect(&"aa:01".into()).await.unwrap();
        session.enable_notify("ABC").await.unwrap();
        let lock_side = p.accept().await.unwrap();
        assert!(lock_side.notify("abc", b"early"));
        assert!(!lock_side.notify("def", b"unsubscribed"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_callback(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        assert!(matches!(rx.recv().await.unwrap(), GattEvent::Value { .. }));
    }

    #[tokio::test]
    async fn test_controller_disconnect_ends_writes() {
        let host = MockHost::new();
        let mut p = host.add_peripheral("aa:01", "Lock", vec![]);
        let session = host.connect(&"aa:01".into()).await.unwrap();
        let mut lock_side = p.accept().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(lock_side.next_write().await.is_none());
        assert!(!lock_side.is_connected());
    }
}
