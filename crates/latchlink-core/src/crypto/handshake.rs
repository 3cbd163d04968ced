// ============================================
// File: crates/latchlink-core/src/crypto/handshake.rs
// ============================================
//! # Session Handshake
//!
//! ## Creation Reason
//! Establishes an authenticated, encrypted session between the controller
//! and a lock. Both sides are implemented here as frame-in/frames-out
//! state machines so the connection driver and the lock simulator share
//! one implementation and neither needs to know about the radio.
//!
//! ## Main Functionality
//! - `ClientHandshake`: Controller side
//! - `LockHandshake`: Lock side (simulator and tests)
//! - `ClientStep` / `LockStep`: What the caller must do next
//!
//! ## Handshake Flow
//! ```text
//! Controller                                          Lock
//!   │                                                   │
//!   │  Hello [03][ver][mtu][random][eph] ─────────────► │
//!   │                                                   │
//!   │ ◄───────────────────── Hello [03][ver][random][eph]
//!   │        th1 = H(hellos), hs keys = HKDF(dh, th1)   │
//!   │                                                   │
//!   │ ◄──────── ServerVerify [05] seal(sig_lock(th1))   │
//!   │  verify with lock key, th2 = H(.. ServerVerify)   │
//!   │                                                   │
//!   │  ClientVerify [06]* [07] ───────────────────────► │
//!   │   seal(cert ‖ signed time ‖ sig_device(th2))      │
//!   │                       verify cert, time, sig      │
//!   │                       th3 = H(.. ClientVerify)    │
//!   │                                                   │
//!   │ ◄────────────────── Initialized [08] seal(sid)    │
//!   │        app keys = HKDF(dh, th3), counters at 0    │
//!   │                                                   │
//!   │ ═══════════════ Encrypted Session ═══════════════ │
//! ```
//!
//! Any lock-side failure is answered with an Alert `[04][code]`; the
//! controller surfaces it as [`CoreError::HandshakeAlert`].
//!
//! ## ⚠️ Important Note for Next Developer
//! - The transcript absorbs every handshake frame exactly as sent; a
//!   single byte of difference makes both sides derive different keys
//! - Handshake records use their own counters (lock: 0 and 1,
//!   controller: 0); application counters start fresh at 0
//! - ClientVerify is fragmented to the link MTU; the frame header byte
//!   is not part of the fragment payload
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake implementation

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use latchlink_common::time::Clock;
use latchlink_common::types::{DeviceId, SessionId, SESSION_ID_SIZE};

use crate::crypto::certificate::{
    Certificate, SignedTimestamp, CERTIFICATE_SIZE, SIGNED_TIMESTAMP_SIZE,
};
use crate::crypto::cipher::{open_record, seal_record, Session, SessionCipher};
use crate::crypto::kdf::{derive_traffic_key, Transcript};
use crate::crypto::keys::{EphemeralKeyPair, IdentityKeyPair, IdentityPublicKey, TrafficKey};
use crate::crypto::{
    CLIENT_VERIFY_CONTEXT, ED25519_SIGNATURE_SIZE, LABEL_CLIENT_APPLICATION,
    LABEL_CLIENT_HANDSHAKE, LABEL_SERVER_APPLICATION, LABEL_SERVER_HANDSHAKE, LOCK_VERIFY_CONTEXT,
};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{
    decode_client_hello, decode_server_hello, encode_client_hello, encode_server_hello,
};
use crate::protocol::messages::{AlertCode, ClientHello, FrameType, ServerHello};

// ============================================
// Constants
// ============================================

/// Smallest MTU the handshake fragments to.
pub const MIN_HANDSHAKE_MTU: u8 = 20;

/// Largest reassembled ClientVerify the lock accepts.
pub const MAX_CLIENT_VERIFY_SIZE: usize = 1024;

/// Lock-side counter of ServerVerify.
const SERVER_VERIFY_COUNTER: u64 = 0;

/// Lock-side counter of Initialized.
const INITIALIZED_COUNTER: u64 = 1;

/// Controller-side counter of ClientVerify.
const CLIENT_VERIFY_COUNTER: u64 = 0;

// ============================================
// Shared helpers
// ============================================

type SharedSecret = Zeroizing<[u8; 32]>;

fn derive_pair(
    shared: &SharedSecret,
    transcript_hash: &[u8; 32],
    client_label: &[u8],
    server_label: &[u8],
) -> Result<(TrafficKey, TrafficKey)> {
    let client = derive_traffic_key(shared, client_label, transcript_hash)?;
    let server = derive_traffic_key(shared, server_label, transcript_hash)?;
    Ok((client, server))
}

fn signed_message(context: &[u8], transcript_hash: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(context.len() + transcript_hash.len());
    message.extend_from_slice(context);
    message.extend_from_slice(transcript_hash);
    message
}

fn frame_type(frame: &[u8]) -> Result<u8> {
    frame.first().copied().ok_or(CoreError::too_short(1, 0))
}

/// Fails with `HandshakeAlert` if `frame` is an Alert.
fn check_alert(frame: &[u8]) -> Result<()> {
    if frame.first() == Some(&FrameType::Alert.as_byte()) {
        let code = AlertCode::from_byte(frame.get(1).copied().unwrap_or(AlertCode::Generic.as_byte()));
        warn!(alert = %code, "Lock aborted handshake");
        return Err(CoreError::HandshakeAlert(code));
    }
    Ok(())
}

// ============================================
// Controller side
// ============================================

/// Credentials the controller presents to the lock.
#[derive(Debug, Clone, Copy)]
pub struct ClientCredentials<'a> {
    /// Device identity key the certificate was issued for.
    pub identity: &'a IdentityKeyPair,
    /// Cloud-issued certificate.
    pub certificate: &'a Certificate,
    /// Lock's public key, used to check ServerVerify.
    pub lock_key: IdentityPublicKey,
    /// Fresh cloud-signed time.
    pub signed_time: SignedTimestamp,
}

/// What the controller must do after feeding a frame.
#[derive(Debug)]
pub enum ClientStep {
    /// Write these frames to the handshake channel, in order.
    Send(Vec<Vec<u8>>),
    /// Nothing to send; wait for the next frame.
    Wait,
    /// Handshake finished.
    Established(Session),
}

enum ClientState {
    AwaitServerHello {
        ephemeral: EphemeralKeyPair,
    },
    AwaitServerVerify {
        shared: SharedSecret,
        client_key: TrafficKey,
        server_key: TrafficKey,
        th1: [u8; 32],
    },
    AwaitInitialized {
        shared: SharedSecret,
        server_key: TrafficKey,
        th3: [u8; 32],
    },
    Finished,
}

/// Controller side of the handshake.
///
/// # Example
/// ```ignore
/// let (mut handshake, hello) = ClientHandshake::new(creds, link.mtu());
/// link.write(Channel::Handshake, &hello).await?;
/// loop {
///     match handshake.on_frame(&next_frame().await?)? {
///         ClientStep::Send(frames) => write_all(frames).await?,
///         ClientStep::Wait => {}
///         ClientStep::Established(session) => break session,
///     }
/// }
/// ```
pub struct ClientHandshake<'a> {
    credentials: ClientCredentials<'a>,
    mtu: u8,
    transcript: Transcript,
    state: ClientState,
}

impl<'a> ClientHandshake<'a> {
    /// Starts a handshake and returns the Hello frame to send.
    ///
    /// `mtu` below [`MIN_HANDSHAKE_MTU`] is raised to it.
    #[must_use]
    pub fn new(credentials: ClientCredentials<'a>, mtu: u8) -> (Self, Vec<u8>) {
        let mtu = mtu.max(MIN_HANDSHAKE_MTU);
        let ephemeral = EphemeralKeyPair::generate();
        let hello = encode_client_hello(&ClientHello::new(mtu, ephemeral.public_key_bytes())).to_vec();

        let mut transcript = Transcript::new();
        transcript.update(&hello);
        trace!(mtu, "ClientHello prepared");

        (
            Self {
                credentials,
                mtu,
                transcript,
                state: ClientState::AwaitServerHello { ephemeral },
            },
            hello,
        )
    }

    /// Feeds one frame received on the handshake channel.
    ///
    /// # Errors
    /// - `HandshakeAlert` if the lock sent an Alert
    /// - `SignatureVerification` if the lock's signature does not verify
    ///   against the expected lock key
    /// - `Decryption`, `UnexpectedFrame` or decode errors for malformed input
    /// - `OutOfOrder` after the handshake finished or failed
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<ClientStep> {
        check_alert(frame)?;
        let state = std::mem::replace(&mut self.state, ClientState::Finished);
        match state {
            ClientState::AwaitServerHello { ephemeral } => self.on_server_hello(ephemeral, frame),
            ClientState::AwaitServerVerify {
                shared,
                client_key,
                server_key,
                th1,
            } => self.on_server_verify(shared, &client_key, server_key, &th1, frame),
            ClientState::AwaitInitialized {
                shared,
                server_key,
                th3,
            } => Self::on_initialized(&shared, &server_key, &th3, frame),
            ClientState::Finished => Err(CoreError::out_of_order("handshake frame", "handshake")),
        }
    }

    fn on_server_hello(&mut self, ephemeral: EphemeralKeyPair, frame: &[u8]) -> Result<ClientStep> {
        let hello: ServerHello = decode_server_hello(frame)?;
        self.transcript.update(frame);

        let shared = Zeroizing::new(ephemeral.exchange(&hello.ephemeral_key)?);
        let th1 = self.transcript.current_hash();
        let (client_key, server_key) =
            derive_pair(&shared, &th1, LABEL_CLIENT_HANDSHAKE, LABEL_SERVER_HANDSHAKE)?;
        debug!("Handshake keys derived");

        self.state = ClientState::AwaitServerVerify {
            shared,
            client_key,
            server_key,
            th1,
        };
        Ok(ClientStep::Wait)
    }

    fn on_server_verify(
        &mut self,
        shared: SharedSecret,
        client_key: &TrafficKey,
        server_key: TrafficKey,
        th1: &[u8; 32],
        frame: &[u8],
    ) -> Result<ClientStep> {
        let header = frame_type(frame)?;
        if header != FrameType::ServerVerify.as_byte() {
            return Err(CoreError::unexpected("ServerVerify", header));
        }
        let (_, counter, plaintext) = open_record(&server_key, frame)?;
        if counter != SERVER_VERIFY_COUNTER {
            return Err(CoreError::malformed(format!("ServerVerify counter {counter}")));
        }
        let signature: [u8; ED25519_SIGNATURE_SIZE] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::too_short(ED25519_SIGNATURE_SIZE, plaintext.len()))?;
        self.credentials
            .lock_key
            .verify(&signed_message(LOCK_VERIFY_CONTEXT, th1), &signature)?;
        self.transcript.update(frame);
        let th2 = self.transcript.current_hash();

        let creds = self.credentials;
        let cert_bytes = creds.certificate.to_bytes();
        let mut body = BytesMut::with_capacity(
            2 + cert_bytes.len() + SIGNED_TIMESTAMP_SIZE + ED25519_SIGNATURE_SIZE,
        );
        let cert_len = u16::try_from(cert_bytes.len())
            .map_err(|_| CoreError::malformed("certificate too large"))?;
        body.put_u16(cert_len);
        body.put_slice(&cert_bytes);
        body.put_slice(&creds.signed_time.to_bytes());
        body.put_slice(&creds.identity.sign(&signed_message(CLIENT_VERIFY_CONTEXT, &th2)));

        let record = seal_record(
            client_key,
            FrameType::ClientVerifyFinal.as_byte(),
            CLIENT_VERIFY_COUNTER,
            &body,
        )?;
        self.transcript.update(&record);
        let th3 = self.transcript.current_hash();

        let frames = fragment(&record[1..], self.mtu);
        debug!(fragments = frames.len(), "Sending ClientVerify");

        self.state = ClientState::AwaitInitialized {
            shared,
            server_key,
            th3,
        };
        Ok(ClientStep::Send(frames))
    }

    fn on_initialized(
        shared: &SharedSecret,
        server_key: &TrafficKey,
        th3: &[u8; 32],
        frame: &[u8],
    ) -> Result<ClientStep> {
        let header = frame_type(frame)?;
        if header != FrameType::Initialized.as_byte() {
            return Err(CoreError::unexpected("Initialized", header));
        }
        let (_, counter, plaintext) = open_record(server_key, frame)?;
        if counter != INITIALIZED_COUNTER {
            return Err(CoreError::malformed(format!("Initialized counter {counter}")));
        }
        let id = SessionId::from_bytes(&plaintext)
            .ok_or(CoreError::too_short(SESSION_ID_SIZE, plaintext.len()))?;

        let (send, recv) = derive_pair(shared, th3, LABEL_CLIENT_APPLICATION, LABEL_SERVER_APPLICATION)?;
        debug!(session_id = %id, "Session established");
        Ok(ClientStep::Established(Session::new(id, SessionCipher::new(send, recv))))
    }
}

impl std::fmt::Debug for ClientHandshake<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            ClientState::AwaitServerHello { .. } => "await_server_hello",
            ClientState::AwaitServerVerify { .. } => "await_server_verify",
            ClientState::AwaitInitialized { .. } => "await_initialized",
            ClientState::Finished => "finished",
        };
        f.debug_struct("ClientHandshake")
            .field("mtu", &self.mtu)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

/// Splits the ClientVerify record body (header stripped) into frames.
fn fragment(body: &[u8], mtu: u8) -> Vec<Vec<u8>> {
    let chunk = usize::from(mtu) - 1;
    let count = body.len().div_ceil(chunk);
    body.chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            let header = if i + 1 == count {
                FrameType::ClientVerifyFinal
            } else {
                FrameType::ClientVerifyPart
            };
            let mut frame = Vec::with_capacity(part.len() + 1);
            frame.push(header.as_byte());
            frame.extend_from_slice(part);
            frame
        })
        .collect()
}

// ============================================
// Lock side
// ============================================

/// Everything the lock needs to authenticate a controller.
#[derive(Debug, Clone)]
pub struct LockIdentity {
    /// Lock's own signing key.
    pub identity: Arc<IdentityKeyPair>,
    /// Cloud authority key certificates and signed times are checked against.
    pub authority: IdentityPublicKey,
    /// This lock's id; certificates for other locks are refused.
    pub device_id: DeviceId,
    /// Lock's wall clock.
    pub clock: Arc<dyn Clock>,
    /// How far a signed time may be from the lock clock.
    pub freshness: Duration,
}

/// What the lock must do after feeding a frame.
#[derive(Debug)]
pub enum LockStep {
    /// Send these frames, in order.
    Send(Vec<Vec<u8>>),
    /// Nothing to send.
    Wait,
    /// Controller authenticated; send `send` and switch to the session.
    Established {
        /// Lock-side session.
        session: Session,
        /// Frames to send (Initialized).
        send: Vec<Vec<u8>>,
    },
    /// Controller refused; send the alert and drop the link.
    Rejected {
        /// Alert frame.
        alert: Vec<u8>,
        /// Reason.
        code: AlertCode,
    },
}

enum LockState {
    AwaitClientHello,
    AwaitClientVerify {
        shared: SharedSecret,
        client_key: TrafficKey,
        server_key: TrafficKey,
        th2: [u8; 32],
        buffer: Vec<u8>,
    },
    Finished,
}

/// Lock side of the handshake.
pub struct LockHandshake {
    identity: LockIdentity,
    transcript: Transcript,
    state: LockState,
}

impl LockHandshake {
    /// Prepares to receive a ClientHello.
    #[must_use]
    pub fn new(identity: LockIdentity) -> Self {
        Self {
            identity,
            transcript: Transcript::new(),
            state: LockState::AwaitClientHello,
        }
    }

    /// Feeds one frame written by the controller.
    ///
    /// # Errors
    /// Decode errors for frames that are not handshake frames at all;
    /// credential problems are reported as [`LockStep::Rejected`].
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<LockStep> {
        let state = std::mem::replace(&mut self.state, LockState::Finished);
        match state {
            LockState::AwaitClientHello => self.on_client_hello(frame),
            LockState::AwaitClientVerify {
                shared,
                client_key,
                server_key,
                th2,
                mut buffer,
            } => {
                let header = frame_type(frame)?;
                if header != FrameType::ClientVerifyPart.as_byte()
                    && header != FrameType::ClientVerifyFinal.as_byte()
                {
                    return Err(CoreError::unexpected("ClientVerify", header));
                }
                buffer.extend_from_slice(&frame[1..]);
                if buffer.len() > MAX_CLIENT_VERIFY_SIZE {
                    return Ok(reject(AlertCode::Generic));
                }
                if header == FrameType::ClientVerifyPart.as_byte() {
                    self.state = LockState::AwaitClientVerify {
                        shared,
                        client_key,
                        server_key,
                        th2,
                        buffer,
                    };
                    return Ok(LockStep::Wait);
                }

                let mut record = Vec::with_capacity(buffer.len() + 1);
                record.push(FrameType::ClientVerifyFinal.as_byte());
                record.extend_from_slice(&buffer);
                self.on_client_verify(&shared, &client_key, &server_key, &th2, &record)
            }
            LockState::Finished => Err(CoreError::out_of_order("handshake frame", "handshake")),
        }
    }

    fn on_client_hello(&mut self, frame: &[u8]) -> Result<LockStep> {
        let hello = decode_client_hello(frame)?;
        self.transcript.update(frame);

        let ephemeral = EphemeralKeyPair::generate();
        let server_hello = encode_server_hello(&ServerHello::new(ephemeral.public_key_bytes())).to_vec();
        self.transcript.update(&server_hello);

        let shared = Zeroizing::new(ephemeral.exchange(&hello.ephemeral_key)?);
        let th1 = self.transcript.current_hash();
        let (client_key, server_key) =
            derive_pair(&shared, &th1, LABEL_CLIENT_HANDSHAKE, LABEL_SERVER_HANDSHAKE)?;

        let signature = self
            .identity
            .identity
            .sign(&signed_message(LOCK_VERIFY_CONTEXT, &th1));
        let server_verify = seal_record(
            &server_key,
            FrameType::ServerVerify.as_byte(),
            SERVER_VERIFY_COUNTER,
            &signature,
        )?;
        self.transcript.update(&server_verify);
        let th2 = self.transcript.current_hash();
        trace!(mtu = hello.mtu, "ClientHello accepted");

        self.state = LockState::AwaitClientVerify {
            shared,
            client_key,
            server_key,
            th2,
            buffer: Vec::new(),
        };
        Ok(LockStep::Send(vec![server_hello, server_verify]))
    }

    fn on_client_verify(
        &mut self,
        shared: &SharedSecret,
        client_key: &TrafficKey,
        server_key: &TrafficKey,
        th2: &[u8; 32],
        record: &[u8],
    ) -> Result<LockStep> {
        let Ok((_, _, plaintext)) = open_record(client_key, record) else {
            return Ok(reject(AlertCode::Generic));
        };
        if let Err(code) = self.check_client_verify(&plaintext, th2) {
            return Ok(reject(code));
        }
        self.transcript.update(record);
        let th3 = self.transcript.current_hash();

        let id = SessionId::generate();
        let initialized = seal_record(
            server_key,
            FrameType::Initialized.as_byte(),
            INITIALIZED_COUNTER,
            id.as_bytes(),
        )?;
        let (recv, send) = derive_pair(shared, &th3, LABEL_CLIENT_APPLICATION, LABEL_SERVER_APPLICATION)?;
        debug!(session_id = %id, "Controller authenticated");

        Ok(LockStep::Established {
            session: Session::new(id, SessionCipher::new(send, recv)),
            send: vec![initialized],
        })
    }

    /// Validates ClientVerify, returning the alert to send on failure.
    fn check_client_verify(&self, plaintext: &[u8], th2: &[u8; 32]) -> std::result::Result<(), AlertCode> {
        let mut buf = plaintext;
        if buf.remaining() < 2 {
            return Err(AlertCode::Generic);
        }
        let cert_len = usize::from(buf.get_u16());
        if cert_len != CERTIFICATE_SIZE
            || buf.remaining() != cert_len + SIGNED_TIMESTAMP_SIZE + ED25519_SIGNATURE_SIZE
        {
            return Err(AlertCode::Generic);
        }
        let certificate =
            Certificate::from_bytes(&buf[..cert_len]).map_err(|_| AlertCode::InvalidCertificate)?;
        buf.advance(cert_len);
        let signed_time = SignedTimestamp::from_bytes(&buf[..SIGNED_TIMESTAMP_SIZE])
            .map_err(|_| AlertCode::NoTrustedTime)?;
        buf.advance(SIGNED_TIMESTAMP_SIZE);
        let mut signature = [0u8; ED25519_SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);

        let id = &self.identity;
        if let Err(e) = certificate.verify(&id.authority) {
            debug!(error = %e, "Certificate rejected");
            return Err(AlertCode::InvalidCertificate);
        }
        if certificate.device_id() != id.device_id {
            debug!(cert_device = %certificate.device_id(), "Certificate for another lock");
            return Err(AlertCode::Unregistered);
        }
        if signed_time.verify(&id.authority).is_err()
            || !signed_time.time().is_within(id.clock.now(), id.freshness)
        {
            debug!(signed = %signed_time.time(), "Signed time rejected");
            return Err(AlertCode::NoTrustedTime);
        }
        if certificate.check_valid_at(signed_time.time()).is_err() {
            debug!(expires_at = %certificate.expires_at(), "Certificate outside validity");
            return Err(AlertCode::InvalidCertificate);
        }
        certificate
            .subject()
            .verify(&signed_message(CLIENT_VERIFY_CONTEXT, th2), &signature)
            .map_err(|_| AlertCode::InvalidCertificate)
    }
}

impl std::fmt::Debug for LockHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            LockState::AwaitClientHello => "await_client_hello",
            LockState::AwaitClientVerify { .. } => "await_client_verify",
            LockState::Finished => "finished",
        };
        f.debug_struct("LockHandshake")
            .field("device_id", &self.identity.device_id)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

fn reject(code: AlertCode) -> LockStep {
    warn!(alert = %code, "Rejecting controller");
    LockStep::Rejected {
        alert: code.to_frame().to_vec(),
        code,
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use latchlink_common::time::{ManualClock, Timestamp};

    const DAY: Duration = Duration::from_secs(86_400);

    struct Fixture {
        authority: IdentityKeyPair,
        device: IdentityKeyPair,
        lock: Arc<IdentityKeyPair>,
        clock: ManualClock,
        certificate: Certificate,
    }

    impl Fixture {
        fn new() -> Self {
            let authority = IdentityKeyPair::generate();
            let device = IdentityKeyPair::generate();
            let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
            let certificate = Certificate::issue(
                &authority,
                device.public_key(),
                DeviceId(42),
                clock.now().saturating_sub(DAY),
                clock.now() + DAY * 30,
            );
            Self {
                authority,
                device,
                lock: Arc::new(IdentityKeyPair::generate()),
                clock,
                certificate,
            }
        }

        fn lock_identity(&self) -> LockIdentity {
            LockIdentity {
                identity: Arc::clone(&self.lock),
                authority: self.authority.public_key(),
                device_id: DeviceId(42),
                clock: Arc::new(self.clock.clone()),
                freshness: Duration::from_secs(300),
            }
        }

        fn credentials(&self) -> ClientCredentials<'_> {
            ClientCredentials {
                identity: &self.device,
                certificate: &self.certificate,
                lock_key: self.lock.public_key(),
                signed_time: SignedTimestamp::issue(&self.authority, self.clock.now()),
            }
        }
    }

    /// Runs both sides to completion, returning either the pair of
    /// sessions or the controller-side error.
    fn run(
        creds: ClientCredentials<'_>,
        identity: LockIdentity,
        mtu: u8,
    ) -> Result<(Session, Session, usize)> {
        let (mut client, hello) = ClientHandshake::new(creds, mtu);
        let mut lock = LockHandshake::new(identity);
        let mut to_lock = vec![hello];
        let mut lock_session = None;
        let mut client_frames = 0;

        loop {
            let mut to_client = Vec::new();
            for frame in to_lock.drain(..) {
                client_frames += 1;
                if frame[0] != FrameType::Hello.as_byte() {
                    assert!(frame.len() <= usize::from(mtu.max(MIN_HANDSHAKE_MTU)));
                }
                match lock.on_frame(&frame)? {
                    LockStep::Send(frames) => to_client.extend(frames),
                    LockStep::Wait => {}
                    LockStep::Established { session, send } => {
                        lock_session = Some(session);
                        to_client.extend(send);
                    }
                    LockStep::Rejected { alert, .. } => to_client.push(alert),
                }
            }
            for frame in to_client {
                match client.on_frame(&frame)? {
                    ClientStep::Send(frames) => to_lock.extend(frames),
                    ClientStep::Wait => {}
                    ClientStep::Established(session) => {
                        let lock_session = lock_session.take().expect("lock established first");
                        return Ok((session, lock_session, client_frames));
                    }
                }
            }
        }
    }

    #[test]
    fn test_full_handshake() {
        let fx = Fixture::new();
        let (mut client, mut lock, _) = run(fx.credentials(), fx.lock_identity(), 200).unwrap();

        assert_eq!(client.id(), lock.id());
        assert_eq!(client.cipher().next_send_counter(), 0);
        assert_eq!(client.cipher().last_received_counter(), None);
        assert_eq!(lock.cipher().next_send_counter(), 0);

        let record = client.seal(b"command").unwrap();
        assert_eq!(lock.open(&record).unwrap(), b"command");
        let reply = lock.seal(b"response").unwrap();
        assert_eq!(client.open(&reply).unwrap(), b"response");
    }

    #[test]
    fn test_client_verify_fragmented_to_mtu() {
        let fx = Fixture::new();
        let (_, _, frames) = run(fx.credentials(), fx.lock_identity(), 20).unwrap();
        // hello plus many ClientVerify fragments
        assert!(frames > 10);

        let body = vec![0u8; 40];
        let parts = fragment(&body, 20);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0][0], 0x06);
        assert_eq!(parts[1][0], 0x06);
        assert_eq!(parts[2][0], 0x07);
        assert_eq!(parts[2].len(), 3);
    }

    #[test]
    fn test_foreign_authority_rejected() {
        let fx = Fixture::new();
        let rogue = IdentityKeyPair::generate();
        let certificate = Certificate::issue(
            &rogue,
            fx.device.public_key(),
            DeviceId(42),
            fx.clock.now(),
            fx.clock.now() + DAY,
        );
        let creds = ClientCredentials {
            certificate: &certificate,
            ..fx.credentials()
        };
        let err = run(creds, fx.lock_identity(), 200).unwrap_err();
        assert!(matches!(err, CoreError::HandshakeAlert(AlertCode::InvalidCertificate)));
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_certificate_for_other_lock_rejected() {
        let fx = Fixture::new();
        let mut identity = fx.lock_identity();
        identity.device_id = DeviceId(43);
        let err = run(fx.credentials(), identity, 200).unwrap_err();
        assert!(matches!(err, CoreError::HandshakeAlert(AlertCode::Unregistered)));
    }

    #[test]
    fn test_stale_signed_time_rejected() {
        let fx = Fixture::new();
        let creds = fx.credentials();
        fx.clock.advance(Duration::from_secs(3600));
        let err = run(creds, fx.lock_identity(), 200).unwrap_err();
        assert!(matches!(err, CoreError::HandshakeAlert(AlertCode::NoTrustedTime)));
    }

    #[test]
    fn test_expired_certificate_rejected() {
        let fx = Fixture::new();
        fx.clock.advance(DAY * 31);
        let err = run(fx.credentials(), fx.lock_identity(), 200).unwrap_err();
        assert!(matches!(err, CoreError::HandshakeAlert(AlertCode::InvalidCertificate)));
    }

    #[test]
    fn test_wrong_device_key_rejected() {
        let fx = Fixture::new();
        let impostor = IdentityKeyPair::generate();
        let creds = ClientCredentials {
            identity: &impostor,
            ..fx.credentials()
        };
        let err = run(creds, fx.lock_identity(), 200).unwrap_err();
        assert!(matches!(err, CoreError::HandshakeAlert(AlertCode::InvalidCertificate)));
    }

    #[test]
    fn test_impostor_lock_detected() {
        let fx = Fixture::new();
        let creds = ClientCredentials {
            lock_key: IdentityKeyPair::generate().public_key(),
            ..fx.credentials()
        };
        let err = run(creds, fx.lock_identity(), 200).unwrap_err();
        assert!(matches!(err, CoreError::SignatureVerification));
    }

    #[test]
    fn test_unexpected_frames() {
        let fx = Fixture::new();
        let (mut client, _) = ClientHandshake::new(fx.credentials(), 200);
        assert!(client.on_frame(&[0x01, 0, 0]).is_err());
        // failed handshake cannot be resumed
        assert!(matches!(
            client.on_frame(&[0x03; 66]),
            Err(CoreError::OutOfOrder { .. })
        ));

        let mut lock = LockHandshake::new(fx.lock_identity());
        assert!(lock.on_frame(&[0x07, 1, 2, 3]).is_err());
    }
}
