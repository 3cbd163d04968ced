// ============================================
// File: crates/latchlink-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Creation Reason
//! Binds every traffic key to both the X25519 shared secret and the
//! exact bytes exchanged so far, so a tampered handshake message yields
//! keys the peer cannot use.
//!
//! ## Main Functionality
//! - `Transcript`: Running SHA-256 over handshake messages
//! - `derive_traffic_key`: HKDF-SHA256 with label and transcript hash
//! - `hkdf_expand`: General HKDF helper
//!
//! ## Last Modified
//! v0.1.0 - Initial key derivation

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::{CHACHA20_KEY_SIZE, HKDF_SALT};
use crate::crypto::keys::TrafficKey;
use crate::error::{CoreError, Result};

// ============================================
// Transcript
// ============================================

/// Running hash of all handshake messages in order.
#[derive(Clone, Default)]
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one handshake message exactly as it went over the wire.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Returns the hash of everything absorbed so far.
    #[must_use]
    pub fn current_hash(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transcript({})", hex::encode(&self.current_hash()[..4]))
    }
}

// ============================================
// Key Derivation
// ============================================

/// Derives a single-direction traffic key.
///
/// ```text
/// key = HKDF-SHA256(ikm: shared_secret, salt: HKDF_SALT,
///                   info: label || transcript_hash)
/// ```
///
/// # Errors
/// Returns `KeyDerivation` if HKDF expansion fails.
pub fn derive_traffic_key(
    shared_secret: &[u8; 32],
    label: &[u8],
    transcript_hash: &[u8; 32],
) -> Result<TrafficKey> {
    let mut info = Vec::with_capacity(label.len() + transcript_hash.len());
    info.extend_from_slice(label);
    info.extend_from_slice(transcript_hash);

    let mut okm = hkdf_expand(shared_secret, HKDF_SALT, &info, CHACHA20_KEY_SIZE)?;
    let mut key_bytes = [0u8; CHACHA20_KEY_SIZE];
    key_bytes.copy_from_slice(&okm);
    okm.zeroize();
    info.zeroize();

    Ok(TrafficKey::from_bytes(key_bytes))
}

/// Expands input keying material to `output_len` bytes.
///
/// # Errors
/// Returns `KeyDerivation` if `output_len` exceeds the HKDF-SHA256 limit
/// (255 * 32 bytes).
pub fn hkdf_expand(
    input_key_material: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), input_key_material);

    let mut output = vec![0u8; output_len];
    hk.expand(info, &mut output)
        .map_err(|_| CoreError::KeyDerivation {
            reason: format!("HKDF expansion failed for {output_len} bytes"),
        })?;

    Ok(output)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{LABEL_CLIENT_HANDSHAKE, LABEL_SERVER_HANDSHAKE};

    #[test]
    fn test_derive_deterministic() {
        let secret = [0x42u8; 32];
        let th = [0x01u8; 32];
        let k1 = derive_traffic_key(&secret, LABEL_CLIENT_HANDSHAKE, &th).unwrap();
        let k2 = derive_traffic_key(&secret, LABEL_CLIENT_HANDSHAKE, &th).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_labels_separate_directions() {
        let secret = [0x42u8; 32];
        let th = [0x01u8; 32];
        let c = derive_traffic_key(&secret, LABEL_CLIENT_HANDSHAKE, &th).unwrap();
        let s = derive_traffic_key(&secret, LABEL_SERVER_HANDSHAKE, &th).unwrap();
        assert_ne!(c, s);
    }

    #[test]
    fn test_transcript_binds_keys() {
        let secret = [0x42u8; 32];
        let mut a = Transcript::new();
        a.update(b"hello");
        let mut b = a.clone();
        b.update(b"tampered");

        let ka = derive_traffic_key(&secret, LABEL_CLIENT_HANDSHAKE, &a.current_hash()).unwrap();
        let kb = derive_traffic_key(&secret, LABEL_CLIENT_HANDSHAKE, &b.current_hash()).unwrap();
        assert_ne!(ka, kb);
    }

    #[test]
    fn test_hkdf_expand_limit() {
        assert_eq!(hkdf_expand(&[1u8; 32], b"salt", b"info", 64).unwrap().len(), 64);
        assert!(hkdf_expand(&[1u8; 32], b"salt", b"info", 255 * 32 + 1).is_err());
    }
}
