// ============================================
// File: crates/latchlink-transport/src/lib.rs
// ============================================
//! # Latchlink Transport - Radio Link Layer
//!
//! ## Creation Reason
//! Provides the ways of reaching a lock: a radio attached to this host,
//! or a radio on another machine reached through a TCP proxy. Both are
//! exposed behind the same traits so the session layer never knows the
//! difference.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `RadioTransport` / `RadioLink` abstractions
//! - [`gatt`]: Direct transport over a GATT host stack
//! - [`proxy`]: Network proxy client and bridge server
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              latchlink-daemon                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   latchlink-core       latchlink-transport          │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             latchlink-common                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//!   session engine
//!        │  write(Channel, bytes)        ▲ LinkEvent
//!        ▼                               │
//!   ┌──────────────┐   or   ┌─────────────────────────┐
//!   │ DirectRadio  │        │ ProxyRadio ══TCP══ ProxyServer → DirectRadio
//!   └──────┬───────┘        └─────────────────────────┘
//!          ▼
//!     GATT host stack ~~~ radio ~~~ lock
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing here authenticates; the handshake runs on top
//! - Link loss always surfaces as `LinkEvent::Disconnected`
//! - The in-memory host (`gatt::MockHost`) is available with the `mock`
//!   feature, the platform Bluetooth host (`gatt::BtleHost`) with `ble`
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod gatt;
pub mod proxy;
pub mod traits;

// Re-export primary types
pub use error::{Result, TransportError};
pub use gatt::{DirectRadio, HostRadio};

#[cfg(feature = "ble")]
pub use gatt::BtleHost;
pub use proxy::{ProxyRadio, ProxyServer};
pub use traits::{
    Advertisement, Channel, LinkEvent, LinkEventSink, RadioLink, RadioTransport, ScanFilter,
    ScanStream, DEFAULT_MTU,
};
