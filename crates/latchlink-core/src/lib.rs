// ============================================
// File: crates/latchlink-core/src/lib.rs
// ============================================
//! # latchlink Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Provides the lock protocol definitions and the cryptography of the
//! session handshake. This crate knows nothing about radios, clouds or
//! timers; it turns bytes into typed frames and back.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Session-layer frames (hellos, alerts, handshake records)
//! - Commands, responses and events carried in encrypted records
//! - Binary codec for the wire format
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`IdentityKeyPair`, `EphemeralKeyPair`, `TrafficKey`)
//! - Certificates and signed timestamps issued by the cloud authority
//! - Handshake (controller and lock sides)
//! - Record cipher (ChaCha20-Poly1305) with replay rejection
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              latchlink-daemon                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   latchlink-core      latchlink-transport           │
//! │   You are here                │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            latchlink-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: ChaCha20-Poly1305 authenticated encryption
//! - **Authenticity**: Ed25519 signatures from both lock and controller
//! - **Forward Secrecy**: X25519 ephemeral key exchange per session
//! - **Replay Protection**: Strictly increasing record counters
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto / dalek implementations
//! - ALL keys MUST implement Zeroize for secure cleanup
//! - Protocol changes MUST bump `PROTOCOL_VERSION`
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use crypto::{
    Certificate, ClientCredentials, ClientHandshake, ClientStep, IdentityKeyPair,
    IdentityPublicKey, LockHandshake, LockIdentity, LockStep, Session, SignedTimestamp,
};
pub use error::{CoreError, Result};
pub use protocol::{
    AlertCode, ChangeKind, Command, Event, Inbound, LockState, Opcode, Response, ResultCode,
    StatusChange,
};
