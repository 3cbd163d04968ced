// ============================================
// File: crates/latchlink-core/src/crypto/cipher.rs
// ============================================
//! # Session Cipher
//!
//! ## Creation Reason
//! Protects every frame after the hellos with ChaCha20-Poly1305 under a
//! per-direction key, and refuses frames whose counter does not advance.
//!
//! ## Main Functionality
//! - `seal_record` / `open_record`: Stateless record protection
//! - `SessionCipher`: Counter-tracking wrapper (used for both the
//!   handshake and the application phase)
//! - `Session`: Authenticated session (id + application cipher)
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬───────────────────┬──────────────────────────────┐
//! │ header (1)   │ counter (8, BE)   │ ciphertext || tag (16)       │
//! └──────────────┴───────────────────┴──────────────────────────────┘
//!  └──────── AAD (authenticated) ────┘
//! ```
//!
//! ## Nonce Construction
//! ```text
//! nonce (12 bytes) = counter (8 bytes LE) || 0x00000000 (4 bytes)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Counters start at 0 for each key; a fresh handshake means fresh keys
//! - Never reuse a (key, counter) pair
//! - `open` only advances the receive counter after the tag verified,
//!   so a forged frame cannot push the window forward
//!
//! ## Last Modified
//! v0.1.0 - Initial session cipher

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use latchlink_common::types::SessionId;

use super::keys::TrafficKey;
use super::{CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::messages::FrameType;

// ============================================
// Constants
// ============================================

/// Bytes before the ciphertext: header + counter.
pub const RECORD_HEADER_SIZE: usize = 9;

/// Smallest valid record (empty plaintext).
pub const MIN_RECORD_SIZE: usize = RECORD_HEADER_SIZE + POLY1305_TAG_SIZE;

// ============================================
// Stateless record protection
// ============================================

fn make_nonce(counter: u64) -> Nonce {
    let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    Nonce::from(nonce)
}

/// Seals `plaintext` into a record with the given header and counter.
///
/// # Errors
/// Returns `Encryption` if the AEAD rejects the input.
pub fn seal_record(key: &TrafficKey, header: u8, counter: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + plaintext.len() + POLY1305_TAG_SIZE);
    record.push(header);
    record.extend_from_slice(&counter.to_be_bytes());

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CoreError::Encryption {
        context: "Failed to create cipher".into(),
    })?;
    let ciphertext = cipher
        .encrypt(
            &make_nonce(counter),
            Payload {
                msg: plaintext,
                aad: &record[..RECORD_HEADER_SIZE],
            },
        )
        .map_err(|_| CoreError::Encryption {
            context: "ChaCha20-Poly1305 encryption failed".into(),
        })?;
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Reads the counter of a record without decrypting it.
///
/// # Errors
/// Returns `MessageTooShort` if the record cannot hold a header and tag.
pub fn record_counter(record: &[u8]) -> Result<u64> {
    if record.len() < MIN_RECORD_SIZE {
        return Err(CoreError::too_short(MIN_RECORD_SIZE, record.len()));
    }
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&record[1..RECORD_HEADER_SIZE]);
    Ok(u64::from_be_bytes(counter))
}

/// Opens a record, returning `(header, counter, plaintext)`.
///
/// # Errors
/// `MessageTooShort` for truncated records, `Decryption` if the tag does
/// not verify.
pub fn open_record(key: &TrafficKey, record: &[u8]) -> Result<(u8, u64, Vec<u8>)> {
    let counter = record_counter(record)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CoreError::Decryption)?;
    let plaintext = cipher
        .decrypt(
            &make_nonce(counter),
            Payload {
                msg: &record[RECORD_HEADER_SIZE..],
                aad: &record[..RECORD_HEADER_SIZE],
            },
        )
        .map_err(|_| CoreError::Decryption)?;
    Ok((record[0], counter, plaintext))
}

// ============================================
// SessionCipher
// ============================================

/// Counter-tracking record cipher for one key pair.
///
/// # Example
/// ```
/// use latchlink_core::crypto::{SessionCipher, TrafficKey};
///
/// let a = TrafficKey::from_bytes([1; 32]);
/// let b = TrafficKey::from_bytes([2; 32]);
/// let mut controller = SessionCipher::new(a.clone(), b.clone());
/// let mut lock = SessionCipher::new(b, a);
///
/// let record = controller.seal(0x01, b"ping").unwrap();
/// let (_, plaintext) = lock.open(&record).unwrap();
/// assert_eq!(plaintext, b"ping");
/// // same record again is a replay
/// assert!(lock.open(&record).is_err());
/// ```
#[derive(Debug)]
pub struct SessionCipher {
    send_key: TrafficKey,
    recv_key: TrafficKey,
    next_send: u64,
    last_received: Option<u64>,
}

impl SessionCipher {
    /// Creates a cipher with both counters at their initial value.
    #[must_use]
    pub fn new(send_key: TrafficKey, recv_key: TrafficKey) -> Self {
        Self {
            send_key,
            recv_key,
            next_send: 0,
            last_received: None,
        }
    }

    /// Counter the next sealed record will carry.
    #[must_use]
    pub const fn next_send_counter(&self) -> u64 {
        self.next_send
    }

    /// Highest counter accepted so far, if any.
    #[must_use]
    pub const fn last_received_counter(&self) -> Option<u64> {
        self.last_received
    }

    /// Seals one record and advances the send counter.
    ///
    /// # Errors
    /// Returns `Encryption` when the counter space is exhausted.
    pub fn seal(&mut self, header: u8, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.next_send == u64::MAX {
            return Err(CoreError::Encryption {
                context: "send counter exhausted".into(),
            });
        }
        let record = seal_record(&self.send_key, header, self.next_send, plaintext)?;
        self.next_send += 1;
        Ok(record)
    }

    /// Opens one record, rejecting counters at or below the last accepted.
    ///
    /// # Errors
    /// `ReplayDetected`, `Decryption` or `MessageTooShort`. The receive
    /// counter is unchanged on error.
    pub fn open(&mut self, record: &[u8]) -> Result<(u8, Vec<u8>)> {
        let counter = record_counter(record)?;
        if let Some(last) = self.last_received {
            if counter <= last {
                return Err(CoreError::replay(counter, last));
            }
        }
        let (header, _, plaintext) = open_record(&self.recv_key, record)?;
        self.last_received = Some(counter);
        Ok((header, plaintext))
    }
}

// ============================================
// Session
// ============================================

/// Authenticated session with a lock.
///
/// Dropping it zeroizes the traffic keys.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    cipher: SessionCipher,
}

impl Session {
    /// Wraps an application cipher.
    #[must_use]
    pub fn new(id: SessionId, cipher: SessionCipher) -> Self {
        Self { id, cipher }
    }

    /// Lock-assigned session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Read access to the counters.
    #[must_use]
    pub const fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    /// Seals an application payload as an encrypted data record.
    ///
    /// # Errors
    /// See [`SessionCipher::seal`].
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.seal(FrameType::Encrypted.as_byte(), plaintext)
    }

    /// Opens an encrypted data record.
    ///
    /// # Errors
    /// `UnexpectedFrame` for anything but an encrypted data record (plain
    /// data frames included), otherwise see [`SessionCipher::open`].
    pub fn open(&mut self, record: &[u8]) -> Result<Vec<u8>> {
        match record.first() {
            Some(&b) if b == FrameType::Encrypted.as_byte() => {}
            Some(&b) => return Err(CoreError::unexpected("encrypted data", b)),
            None => return Err(CoreError::too_short(1, 0)),
        }
        let (_, plaintext) = self.cipher.open(record)?;
        Ok(plaintext)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SessionCipher, SessionCipher) {
        let a = TrafficKey::from_bytes([0x42; 32]);
        let b = TrafficKey::from_bytes([0x43; 32]);
        (SessionCipher::new(a.clone(), b.clone()), SessionCipher::new(b, a))
    }

    #[test]
    fn test_seal_open() {
        let (mut tx, mut rx) = pair();
        let record = tx.seal(0x01, b"Hello, lock!").unwrap();
        assert_eq!(record.len(), RECORD_HEADER_SIZE + 12 + POLY1305_TAG_SIZE);
        assert_eq!(record_counter(&record).unwrap(), 0);

        let (header, plaintext) = rx.open(&record).unwrap();
        assert_eq!(header, 0x01);
        assert_eq!(plaintext, b"Hello, lock!");
        assert_eq!(rx.last_received_counter(), Some(0));
    }

    #[test]
    fn test_replay_rejected() {
        let (mut tx, mut rx) = pair();
        let first = tx.seal(0x01, b"one").unwrap();
        let second = tx.seal(0x01, b"two").unwrap();

        rx.open(&first).unwrap();
        rx.open(&second).unwrap();
        assert!(matches!(
            rx.open(&first),
            Err(CoreError::ReplayDetected { received: 0, last: 1 })
        ));
        assert!(matches!(rx.open(&second), Err(CoreError::ReplayDetected { .. })));
    }

    #[test]
    fn test_gap_accepted() {
        let (mut tx, mut rx) = pair();
        let _lost = tx.seal(0x01, b"lost").unwrap();
        let later = tx.seal(0x01, b"later").unwrap();
        assert!(rx.open(&later).is_ok());
        assert_eq!(rx.last_received_counter(), Some(1));
    }

    #[test]
    fn test_tampered_header_fails() {
        let (mut tx, mut rx) = pair();
        let mut record = tx.seal(0x01, b"data").unwrap();
        record[0] = 0x02;
        assert!(matches!(rx.open(&record), Err(CoreError::Decryption)));
        // window unchanged by the forgery
        assert_eq!(rx.last_received_counter(), None);
    }

    #[test]
    fn test_forged_counter_does_not_advance_window() {
        let (mut tx, mut rx) = pair();
        let good = tx.seal(0x01, b"data").unwrap();
        let mut forged = good.clone();
        forged[1..9].copy_from_slice(&100u64.to_be_bytes());
        assert!(rx.open(&forged).is_err());
        assert!(rx.open(&good).is_ok());
    }

    #[test]
    fn test_wrong_key_fails() {
        let (mut tx, _) = pair();
        let mut other = SessionCipher::new(
            TrafficKey::from_bytes([0; 32]),
            TrafficKey::from_bytes([0x99; 32]),
        );
        let record = tx.seal(0x01, b"data").unwrap();
        assert!(matches!(other.open(&record), Err(CoreError::Decryption)));
    }

    #[test]
    fn test_truncated_record() {
        let (_, mut rx) = pair();
        assert!(matches!(
            rx.open(&[0x01, 0, 0]),
            Err(CoreError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_session_rejects_plain_frames() {
        let (tx, _) = pair();
        let mut session = Session::new(SessionId::generate(), tx);
        let result = session.open(&[0x00, 0x10, 0x01, 0x5A]);
        assert!(matches!(result, Err(CoreError::UnexpectedFrame { got: 0x00, .. })));
    }

    #[test]
    fn test_nonce_construction() {
        let nonce = make_nonce(1);
        let expected: [u8; 12] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(nonce.as_slice(), &expected);
    }
}
