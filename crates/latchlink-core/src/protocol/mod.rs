// ============================================
// File: crates/latchlink-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol spoken with a lock: the session-layer
//! frames of the handshake and the command layer carried inside
//! encrypted records.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: Frame types, alerts and the two hellos
//! - [`commands`]: Opcodes, result codes, commands and responses
//! - [`events`]: Unsolicited lock notifications
//! - [`state`]: Lock, door and trigger value tables
//! - [`codec`]: Binary serialization/deserialization
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │                                                             │
//! │  Controller ──── Hello (67 bytes) ─────────────────► Lock   │
//! │  Controller ◄─── Hello (66 bytes) ────────────────── Lock   │
//! │  Controller ◄─── ServerVerify / ──► ClientVerify ... Lock   │
//! │  Controller ◄─── Initialized (session id) ────────── Lock   │
//! │                                                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Session Phase                            │
//! │                                                             │
//! │  Controller ═══ [01] seal([10][tag][opcode][params]) ═► Lock │
//! │  Controller ◄══ [01] seal([11][tag][opcode][result]) ══ Lock │
//! │  Controller ◄══ [01] seal([12][event id][data]) ═══════ Lock │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian byte order for multi-byte integers
//! - Record counters are explicit; nonces are derived from them
//! - Unknown lock, door and trigger values decode leniently
//!
//! ## ⚠️ Important Note for Next Developer
//! - ANY protocol change requires a version bump
//! - Responses and events are told apart by their payload type only
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod commands;
pub mod events;
pub mod messages;
pub mod state;

// Re-export primary types
pub use codec::{Codec, CommandFrame, FrameCodec, Inbound};
pub use commands::{
    BatteryReport, Command, LockMode, Opcode, Response, ResultCode, StateReport, UnlockMode,
};
pub use events::{ChangeKind, Event, EventId, StatusChange};
pub use messages::{AlertCode, ClientHello, FrameType, ServerHello, PROTOCOL_VERSION};
pub use state::{DoorState, LockState, Trigger};
