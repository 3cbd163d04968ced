// ============================================
// File: crates/latchlink-daemon/src/lib.rs
// ============================================
//! # latchlink Daemon Library
//!
//! ## Creation Reason
//! Keeps an authenticated session to one smart lock alive on behalf of a
//! host application: credentials, reconnects, commands and attributed
//! activity, behind a single [`LockHandle`].
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML configuration
//! - [`cloud`]: Cloud identity service (`CloudService`, `HttpCloud`)
//! - [`store`]: Credential record, renewal, signed time
//! - [`resolver`]: Actor id to user name
//! - [`lifecycle`]: Connection state machine and its driver task
//! - [`handle`]: Host-facing `LockHandle`
//! - [`simulator`]: In-process cloud and lock for tests and demos
//! - [`error`]: Error taxonomy
//!
//! ## Architecture Overview
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Host application                      │
//! └───────────────┬───────────────────────────────▲──────────────┘
//!                 │ commands                      │ observations
//!          ┌──────▼──────┐                        │
//!          │ LockHandle  │── mpsc ──► ┌───────────┴───────────┐
//!          └─────────────┘            │     Driver task       │
//!                                     │  (Lifecycle machine)  │
//!   ┌─────────────────┐   credential  └──┬──────────────┬─────┘
//!   │ CredentialStore │◄─────────────────┘              │ session
//!   └────────┬────────┘                         ┌───────▼───────┐
//!            │ renewals  ┌──────────────────┐   │ RadioTransport│
//!            └──────────►│ ActivityResolver │   │ direct / proxy│
//!                        └──────────────────┘   └───────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One driver task per lock; it owns the link, session and timers
//! - Every module shares the `Clock` it is given; tests use `ManualClock`
//!   plus a paused tokio runtime
//!
//! ## Last Modified
//! v0.1.0 - Initial daemon library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cloud;
pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod resolver;
pub mod simulator;
pub mod store;

// Re-export primary types
pub use cloud::{CloudService, HttpCloud};
pub use config::{DaemonConfig, LifecycleConfig};
pub use error::{DaemonError, ErrorKind, Result};
pub use handle::{LockHandle, LockSetup};
pub use lifecycle::{ConnectionState, LockSnapshot, Observation};
pub use resolver::{ActivityResolver, Resolved};
pub use store::CredentialStore;
