// ============================================
// File: crates/latchlink-transport/src/gatt/btle.rs
// ============================================
//! # Platform Bluetooth Host
//!
//! ## Creation Reason
//! `DirectRadio` only needs a [`HostRadio`]. This module provides one on
//! top of `btleplug`, which drives BlueZ on Linux, CoreBluetooth on macOS
//! and WinRT on Windows.
//!
//! ## Main Functionality
//! - `BtleHost`: First adapter reported by the platform manager
//! - `BtleSession`: Connected peripheral with a notification pump
//!
//! ## Event Pump
//! ```text
//! peripheral.notifications() ──► GattEvent::Value
//! adapter DeviceDisconnected ──► GattEvent::Disconnected (pump ends)
//!           │
//!           ▼
//!   callback, or buffer until set_callback
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only compiled with the `ble` feature; on Linux it links libdbus
//! - macOS hides MACs: peripherals are also matched by their platform id
//! - The platform owns MTU negotiation and does not report it, so links
//!   fall back to the default MTU
//!
//! ## Last Modified
//! v0.1.0 - btleplug host

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as PlatformScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use latchlink_common::types::DeviceAddress;

use super::direct::{GattCallback, GattEvent, GattSession, HostRadio};
use crate::error::{Result, TransportError};
use crate::traits::Advertisement;

/// Buffered adverts between the platform event stream and the scan.
const SCAN_BUFFER: usize = 64;

// ============================================
// BtleHost
// ============================================

/// Radio host over the platform Bluetooth stack.
///
/// # Example
/// ```ignore
/// let host = BtleHost::new().await?;
/// let radio = DirectRadio::new(Arc::new(host));
/// ```
#[derive(Clone)]
pub struct BtleHost {
    adapter: Adapter,
    name: String,
}

impl BtleHost {
    /// Opens the first adapter the platform reports.
    ///
    /// # Errors
    /// `AdapterUnavailable` if the stack cannot be reached or has no
    /// adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(adapter_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(adapter_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::adapter_unavailable("no Bluetooth adapter found"))?;
        let name = adapter.adapter_info().await.unwrap_or_else(|_| "unknown".into());
        info!(adapter = %name, "Bluetooth adapter opened");
        Ok(Self { adapter, name })
    }

    async fn find(&self, address: &DeviceAddress) -> Result<Peripheral> {
        let peripherals = self.adapter.peripherals().await.map_err(adapter_error)?;
        peripherals
            .into_iter()
            .find(|p| {
                DeviceAddress::new(p.address().to_string()) == *address
                    || DeviceAddress::new(p.id().to_string()) == *address
            })
            .ok_or_else(|| TransportError::OutOfRange {
                address: address.clone(),
            })
    }
}

impl std::fmt::Debug for BtleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleHost").field("adapter", &self.name).finish()
    }
}

#[async_trait]
impl HostRadio for BtleHost {
    fn is_powered(&self) -> bool {
        // construction fails without an adapter; power loss surfaces as
        // scan and connect errors
        true
    }

    async fn start_scan(&self, service_uuid: Option<&str>) -> Result<mpsc::Receiver<Advertisement>> {
        let wanted = service_uuid
            .map(|uuid| {
                Uuid::parse_str(uuid).map_err(|e| TransportError::ScanFailed {
                    reason: format!("bad service uuid {uuid}: {e}"),
                })
            })
            .transpose()?;

        let mut events = self.adapter.events().await.map_err(scan_error)?;
        self.adapter
            .start_scan(PlatformScanFilter {
                services: wanted.into_iter().collect(),
            })
            .await
            .map_err(scan_error)?;

        let (tx, rx) = mpsc::channel(SCAN_BUFFER);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            loop {
                let id = tokio::select! {
                    () = tx.closed() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    },
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                if !offers_service(&props.services, wanted.as_ref()) {
                    continue;
                }
                let advert = advertisement(
                    &props.address.to_string(),
                    props.local_name,
                    props.rssi,
                    &props.services,
                );
                if tx.send(advert).await.is_err() {
                    break;
                }
            }
            if let Err(e) = adapter.stop_scan().await {
                debug!(error = %e, "Stopping scan failed");
            }
        });
        Ok(rx)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattSession>> {
        let peripheral = self.find(address).await?;
        let fail = |e: btleplug::Error| TransportError::connect_failed(address, e.to_string());

        if !peripheral.is_connected().await.map_err(fail)? {
            peripheral.connect().await.map_err(fail)?;
        }
        peripheral.discover_services().await.map_err(fail)?;
        let characteristics = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid.to_string(), c))
            .collect::<HashMap<_, _>>();

        // both streams are opened before any subscription so no value is lost
        let notifications = peripheral.notifications().await.map_err(fail)?;
        let adapter_events = self.adapter.events().await.map_err(fail)?;

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            callback: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        });
        let id = peripheral.id();
        let pump = {
            let shared = Arc::clone(&shared);
            let mut notifications = notifications;
            let mut adapter_events = adapter_events;
            tokio::spawn(async move {
                let reason = loop {
                    tokio::select! {
                        value = notifications.next() => match value {
                            Some(n) => shared.deliver(GattEvent::Value {
                                characteristic: n.uuid.to_string(),
                                data: Bytes::from(n.value),
                            }),
                            None => break "notification stream ended",
                        },
                        event = adapter_events.next() => match event {
                            Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                                break "peripheral disconnected";
                            }
                            Some(_) => {}
                            None => break "adapter event stream ended",
                        },
                    }
                };
                shared.drop_remote(reason);
            })
        };

        debug!(%address, characteristics = characteristics.len(), "GATT services discovered");
        Ok(Box::new(BtleSession {
            peripheral,
            characteristics,
            shared,
            pump: Mutex::new(Some(pump)),
        }))
    }
}

// ============================================
// BtleSession
// ============================================

struct Shared {
    connected: AtomicBool,
    callback: Mutex<Option<GattCallback>>,
    pending: Mutex<Vec<GattEvent>>,
}

impl Shared {
    fn deliver(&self, event: GattEvent) {
        let callback = self.callback.lock();
        match callback.as_ref() {
            Some(cb) => cb(event),
            None => self.pending.lock().push(event),
        }
    }

    fn drop_remote(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.deliver(GattEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }
}

struct BtleSession {
    peripheral: Peripheral,
    characteristics: HashMap<String, Characteristic>,
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleSession {
    fn characteristic(&self, uuid: &str) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid.to_lowercase())
            .ok_or_else(|| TransportError::write_failed(format!("characteristic {uuid} not offered")))
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl GattSession for BtleSession {
    fn mtu(&self) -> Option<u16> {
        None
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn enable_notify(&self, characteristic: &str) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(target)
            .await
            .map_err(|e| TransportError::write_failed(format!("subscribe {characteristic}: {e}")))
    }

    fn set_callback(&self, callback: GattCallback) {
        let mut slot = self.shared.callback.lock();
        for event in self.shared.pending.lock().drain(..) {
            callback(event);
        }
        *slot = Some(callback);
    }

    async fn write(&self, characteristic: &str, data: &[u8], with_response: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let target = self.characteristic(characteristic)?;
        let kind = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(target, data, kind)
            .await
            .map_err(|e| TransportError::write_failed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.stop_pump();
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, "Bluetooth disconnect failed");
            return Err(TransportError::adapter_unavailable(e.to_string()));
        }
        Ok(())
    }
}

impl Drop for BtleSession {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

// ============================================
// Helpers
// ============================================

fn adapter_error(err: btleplug::Error) -> TransportError {
    TransportError::adapter_unavailable(err.to_string())
}

fn scan_error(err: btleplug::Error) -> TransportError {
    TransportError::ScanFailed {
        reason: err.to_string(),
    }
}

/// An advert without a service list passes only an unfiltered scan.
fn offers_service(services: &[Uuid], wanted: Option<&Uuid>) -> bool {
    wanted.map_or(true, |uuid| services.contains(uuid))
}

fn advertisement(address: &str, name: Option<String>, rssi: Option<i16>, services: &[Uuid]) -> Advertisement {
    Advertisement {
        address: DeviceAddress::new(address),
        name,
        rssi: rssi.unwrap_or(i16::MIN),
        service_uuids: services.iter().map(Uuid::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::{channel_for_characteristic, CHAR_COMMANDS, SERVICE_UUID};
    use crate::traits::Channel;

    #[test]
    fn test_platform_uuids_map_to_channels() {
        // the pump reports characteristic uuids in their Display form
        let uuid = Uuid::parse_str(CHAR_COMMANDS).unwrap();
        assert_eq!(channel_for_characteristic(&uuid.to_string()), Some(Channel::Command));
    }

    #[test]
    fn test_service_filter() {
        let lock = Uuid::parse_str(SERVICE_UUID).unwrap();
        let other = Uuid::parse_str("0000180f-0000-1000-8000-00805f9b34fb").unwrap();

        assert!(offers_service(&[other, lock], Some(&lock)));
        assert!(!offers_service(&[other], Some(&lock)));
        assert!(!offers_service(&[], Some(&lock)));
        assert!(offers_service(&[], None));
    }

    #[test]
    fn test_advertisement_normalizes_address() {
        let lock = Uuid::parse_str(SERVICE_UUID).unwrap();
        let advert = advertisement("aa:bb:cc:dd:ee:ff", Some("Front door".into()), None, &[lock]);

        assert_eq!(advert.address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(advert.rssi, i16::MIN);
        assert_eq!(advert.service_uuids, vec![SERVICE_UUID.to_string()]);
    }
}
