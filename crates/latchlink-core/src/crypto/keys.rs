// ============================================
// File: crates/latchlink-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! The lock protocol juggles three kinds of key: long-lived Ed25519
//! identities, one-shot X25519 secrets and the per-direction session keys
//! derived from them. Each gets its own type so they cannot be mixed up.
//!
//! ## Main Functionality
//! - `IdentityKeyPair`: Long-term Ed25519 keys (controller device key,
//!   lock identity, cloud authority)
//! - `IdentityPublicKey`: Shareable half, used to verify signatures
//! - `EphemeralKeyPair`: Per-handshake X25519 key exchange keys
//! - `TrafficKey`: Derived symmetric key for one direction of traffic
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  IdentityKeyPair (Long-term)                               │
//! │  ├─ Generated once at registration, persisted 0600         │
//! │  └─ Signs the handshake transcript                         │
//! │                                                            │
//! │  EphemeralKeyPair (Per-handshake)                          │
//! │  ├─ Generated fresh for each connection attempt            │
//! │  └─ Consumed by the X25519 exchange                        │
//! │                                                            │
//! │  TrafficKey (Per-session, per-direction)                   │
//! │  ├─ Derived from shared secret + transcript hash           │
//! │  └─ Zeroized when the session is dropped                   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Log `fingerprint()`, never key bytes
//! - `TrafficKey` equality is constant time
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CHACHA20_KEY_SIZE, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Ed25519 signing identity.
///
/// The controller's device key, the lock's identity and the cloud
/// authority are all represented by this type.
///
/// # Example
/// ```
/// use latchlink_core::crypto::IdentityKeyPair;
///
/// let identity = IdentityKeyPair::generate();
/// let signature = identity.sign(b"hello lock");
/// assert!(identity.public_key().verify(b"hello lock", &signature).is_ok());
/// ```
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Fresh identity from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores an identity from its 32-byte seed.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut seed: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "identity seed is {} bytes, need 32",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Verifying half.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Ed25519 signature over `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Seed for the credential file. Zeroize the copy once written.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Verifying key of an identity. Displays as base64.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Parses a compressed Edwards point.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are not a valid point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CoreError::invalid_key("identity key is not a curve point"))?;
        Ok(Self(key))
    }

    /// Like [`from_bytes`](Self::from_bytes) for a slice of unknown length.
    ///
    /// # Errors
    /// Returns `InvalidKey` on wrong length or invalid point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "identity key is {} bytes, need 32",
                bytes.len()
            ))
        })?;
        Self::from_bytes(&arr)
    }

    /// Borrowed key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Owned key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// First six bytes in hex, for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0.as_bytes()[..6])
    }

    /// Checks `signature` over `message`.
    ///
    /// # Errors
    /// `SignatureVerification` on mismatch.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify(message, &sig)
            .map_err(|_| CoreError::SignatureVerification)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({}...)", self.fingerprint())
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0.as_bytes()))
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(self.0.as_bytes()))
        } else {
            serializer.serialize_bytes(self.0.as_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BASE64.decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

// ============================================
// EphemeralKeyPair (X25519)
// ============================================

/// One handshake's X25519 secret. `exchange` consumes it.
///
/// # Example
/// ```
/// use latchlink_core::crypto::EphemeralKeyPair;
///
/// let controller = EphemeralKeyPair::generate();
/// let lock = EphemeralKeyPair::generate();
/// let controller_pub = controller.public_key_bytes();
/// let lock_pub = lock.public_key_bytes();
///
/// let a = controller.exchange(&lock_pub).unwrap();
/// let b = lock.exchange(&controller_pub).unwrap();
/// assert_eq!(a, b);
/// ```
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Fresh secret from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Bytes sent in the hello frame.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Diffie-Hellman with the peer's hello key.
    ///
    /// # Errors
    /// `KeyExchange` if the peer key is a low-order point.
    pub fn exchange(self, peer_public: &[u8; X25519_PUBLIC_KEY_SIZE]) -> Result<[u8; 32]> {
        let peer_key = X25519PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_key);
        if !shared.was_contributory() {
            return Err(CoreError::KeyExchange {
                reason: "peer ephemeral key is low order".into(),
            });
        }
        Ok(*shared.as_bytes())
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(&self.public.as_bytes()[..4]))
            .finish_non_exhaustive()
    }
}

// ============================================
// TrafficKey
// ============================================

/// ChaCha20-Poly1305 key for one direction of a session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TrafficKey([u8; CHACHA20_KEY_SIZE]);

impl TrafficKey {
    /// Wraps derived key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; CHACHA20_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Key bytes for the AEAD.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHACHA20_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for TrafficKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrafficKey([REDACTED])")
    }
}

impl PartialEq for TrafficKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for TrafficKey {}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_binds_message() {
        let lock = IdentityKeyPair::generate();
        let signature = lock.sign(b"unlock 0x82");
        assert!(lock.public_key().verify(b"unlock 0x82", &signature).is_ok());
        assert!(matches!(
            lock.public_key().verify(b"unlock 0x83", &signature),
            Err(CoreError::SignatureVerification)
        ));
    }

    #[test]
    fn seed_restores_same_identity() {
        let device = IdentityKeyPair::generate();
        let reloaded = IdentityKeyPair::from_bytes(&device.to_bytes()).unwrap();
        assert_eq!(reloaded.public_key(), device.public_key());
        assert!(matches!(
            IdentityKeyPair::from_bytes(&[7u8; 16]),
            Err(CoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn zero_peer_key_is_refused() {
        let result = EphemeralKeyPair::generate().exchange(&[0u8; 32]);
        assert!(matches!(result, Err(CoreError::KeyExchange { .. })));
    }

    #[test]
    fn public_key_is_base64_in_json() {
        let public = IdentityKeyPair::generate().public_key();
        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{public}\""));
        let back: IdentityPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, public);
        assert!(IdentityPublicKey::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn traffic_key_never_prints_bytes() {
        let key = TrafficKey::from_bytes([0x5a; 32]);
        assert!(!format!("{key:?}").contains("5a"));
        assert_ne!(key, TrafficKey::from_bytes([0x5b; 32]));
    }
}
