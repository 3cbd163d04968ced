// ============================================
// File: crates/latchlink-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes the cryptographic operations of the lock session, using
//! audited RustCrypto and dalek implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Key types and generation (Ed25519, X25519)
//! - [`certificate`]: Cloud-issued certificates and signed timestamps
//! - [`kdf`]: Transcript hash and traffic key derivation (HKDF-SHA256)
//! - [`cipher`]: Record protection (ChaCha20-Poly1305) with replay rejection
//! - [`handshake`]: Controller and lock sides of the session handshake
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │  Controller                                        Lock     │
//! │    │  Hello (X25519 ephemeral) ────────────────────► │      │
//! │    │ ◄──────────────────── Hello (X25519 ephemeral)  │      │
//! │    │        shared secret + transcript → hs keys     │      │
//! │    │ ◄──────────── ServerVerify (lock signature)     │      │
//! │    │  ClientVerify (cert, signed time, signature) ─► │      │
//! │    │ ◄──────────────────── Initialized (session id)  │      │
//! │    │        shared secret + transcript → app keys    │      │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Session Phase                            │
//! │   Traffic Key + Counter ──► ChaCha20-Poly1305 ──► Record    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER roll your own crypto
//! - ALL symmetric keys implement Zeroize
//! - The byte layout here is our own; real hardware compatibility is
//!   validated separately
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod certificate;
pub mod cipher;
pub mod handshake;
pub mod kdf;
pub mod keys;

// Re-export primary types at module level
pub use certificate::{Certificate, SignedTimestamp};
pub use cipher::{Session, SessionCipher};
pub use handshake::{ClientCredentials, ClientHandshake, ClientStep, LockHandshake, LockIdentity, LockStep};
pub use keys::{EphemeralKeyPair, IdentityKeyPair, IdentityPublicKey, TrafficKey};

// ============================================
// Constants
// ============================================

/// Size of Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of X25519 public key in bytes.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 key in bytes.
pub const CHACHA20_KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 nonce in bytes.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of Poly1305 authentication tag in bytes.
pub const POLY1305_TAG_SIZE: usize = 16;

/// HKDF salt for all traffic key derivation.
pub const HKDF_SALT: &[u8] = b"latchlink-v2";

/// HKDF label for controller → lock handshake traffic.
pub const LABEL_CLIENT_HANDSHAKE: &[u8] = b"c hs traffic";

/// HKDF label for lock → controller handshake traffic.
pub const LABEL_SERVER_HANDSHAKE: &[u8] = b"s hs traffic";

/// HKDF label for controller → lock application traffic.
pub const LABEL_CLIENT_APPLICATION: &[u8] = b"c ap traffic";

/// HKDF label for lock → controller application traffic.
pub const LABEL_SERVER_APPLICATION: &[u8] = b"s ap traffic";

/// Signature context for the lock's transcript signature.
pub const LOCK_VERIFY_CONTEXT: &[u8] = b"latchlink lock verify";

/// Signature context for the controller's transcript signature.
pub const CLIENT_VERIFY_CONTEXT: &[u8] = b"latchlink client verify";

/// Signature context for certificates issued by the cloud authority.
pub const CERTIFICATE_CONTEXT: &[u8] = b"latchlink certificate";

/// Signature context for signed timestamps issued by the cloud authority.
pub const SIGNED_TIME_CONTEXT: &[u8] = b"latchlink signed time";
