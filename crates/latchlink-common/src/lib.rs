// ============================================
// File: crates/latchlink-common/src/lib.rs
// ============================================
//! # latchlink Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides the identifiers, wall-clock abstraction and base errors shared
//! by every latchlink crate, so the protocol, transport and daemon layers
//! agree on how a lock, a mobile registration or an actor is named.
//!
//! ## Main Functionality
//! - [`types`]: Identifiers (`DeviceId`, `MobileId`, `ActorId`, `SessionId`,
//!   `DeviceAddress`, `SerialNumber`)
//! - [`time`]: `Timestamp` (Unix milliseconds) and the `Clock` trait with a
//!   system and a manually driven implementation
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              latchlink-daemon                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   latchlink-core      latchlink-transport           │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            latchlink-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal
//! - Certificate expiry and signed-time checks must go through a `Clock`,
//!   never `SystemTime::now()` directly, or the expiry tests cannot run
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{ActorId, DeviceAddress, DeviceId, MobileId, SerialNumber, SessionId};
