// ============================================
// File: crates/latchlink-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Provides binary encoding and decoding for the hellos and for the
//! plaintext carried inside encrypted records (commands, responses and
//! events).
//!
//! ## Main Functionality
//! - `Codec` trait: Generic encode/decode interface
//! - `FrameCodec`: Implementation for all frame types
//! - `CommandFrame`: Command plus correlation tag
//! - `Inbound`: What the lock can send: a response or an event
//!
//! ## Plaintext Layout
//! ```text
//! Command   [0x10][tag][opcode][params...]
//! Response  [0x11][tag][opcode][result][data...]
//! Event     [0x12][event id][data...]
//! ```
//!
//! ## Parsing Strategy
//! 1. Check minimum message length
//! 2. Read the payload type byte
//! 3. Dispatch to type-specific parser
//! 4. Validate all fields
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate buffer lengths before reading
//! - Decode errors are protocol errors: the caller drops the frame and
//!   keeps the session
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::commands::{Command, Opcode, Response, ResultCode};
use super::events::Event;
use super::messages::{
    ClientHello, FrameType, ServerHello, CLIENT_HELLO_SIZE, HELLO_RANDOM_SIZE, PROTOCOL_VERSION,
    SERVER_HELLO_SIZE,
};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Payload type of a command.
pub const PAYLOAD_COMMAND: u8 = 0x10;

/// Payload type of a command response.
pub const PAYLOAD_RESPONSE: u8 = 0x11;

/// Payload type of an event.
pub const PAYLOAD_EVENT: u8 = 0x12;

/// Largest plaintext the codec accepts.
pub const MAX_PAYLOAD_SIZE: usize = 512;

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding protocol messages.
///
/// # Type Parameters
/// * `T` - The message type to encode/decode
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message from bytes.
    ///
    /// # Errors
    /// Returns a protocol error if the bytes are not a valid `T`.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

// ============================================
// Frame types carried by the codec
// ============================================

/// A command with its correlation tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Correlation tag echoed in the response.
    pub tag: u8,
    /// The command.
    pub command: Command,
}

/// Decoded lock → controller plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Reply to a pending command.
    Response(Response),
    /// Unsolicited notification.
    Event(Event),
}

// ============================================
// FrameCodec
// ============================================

/// Codec implementation for all frame types.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn check_len(buf: &Bytes, min: usize) -> Result<()> {
        if buf.len() < min {
            return Err(CoreError::too_short(min, buf.len()));
        }
        if buf.len() > MAX_PAYLOAD_SIZE {
            return Err(CoreError::MessageTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    fn expect_hello(buf: &mut Bytes, size: usize) -> Result<()> {
        Self::check_len(buf, size)?;
        let frame_type = buf.get_u8();
        if frame_type != FrameType::Hello.as_byte() {
            return Err(CoreError::unexpected("Hello", frame_type));
        }
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(CoreError::UnsupportedVersion {
                got: version,
                expected: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }
}

// ============================================
// Hello Codecs
// ============================================

impl Codec<ClientHello> for FrameCodec {
    fn encode(&self, msg: &ClientHello, buf: &mut BytesMut) {
        buf.reserve(CLIENT_HELLO_SIZE);
        buf.put_u8(FrameType::Hello.as_byte());
        buf.put_u8(msg.version);
        buf.put_u8(msg.mtu);
        buf.put_slice(&msg.random);
        buf.put_slice(&msg.ephemeral_key);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<ClientHello> {
        Self::expect_hello(buf, CLIENT_HELLO_SIZE)?;
        let version = PROTOCOL_VERSION;
        let mtu = buf.get_u8();
        let mut random = [0u8; HELLO_RANDOM_SIZE];
        buf.copy_to_slice(&mut random);
        let mut ephemeral_key = [0u8; 32];
        buf.copy_to_slice(&mut ephemeral_key);

        Ok(ClientHello {
            version,
            mtu,
            random,
            ephemeral_key,
        })
    }
}

impl Codec<ServerHello> for FrameCodec {
    fn encode(&self, msg: &ServerHello, buf: &mut BytesMut) {
        buf.reserve(SERVER_HELLO_SIZE);
        buf.put_u8(FrameType::Hello.as_byte());
        buf.put_u8(msg.version);
        buf.put_slice(&msg.random);
        buf.put_slice(&msg.ephemeral_key);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<ServerHello> {
        Self::expect_hello(buf, SERVER_HELLO_SIZE)?;
        let mut random = [0u8; HELLO_RANDOM_SIZE];
        buf.copy_to_slice(&mut random);
        let mut ephemeral_key = [0u8; 32];
        buf.copy_to_slice(&mut ephemeral_key);

        Ok(ServerHello {
            version: PROTOCOL_VERSION,
            random,
            ephemeral_key,
        })
    }
}

// ============================================
// Command Codec
// ============================================

impl Codec<CommandFrame> for FrameCodec {
    fn encode(&self, msg: &CommandFrame, buf: &mut BytesMut) {
        buf.reserve(3 + msg.command.params.len());
        buf.put_u8(PAYLOAD_COMMAND);
        buf.put_u8(msg.tag);
        buf.put_u8(msg.command.opcode.as_byte());
        buf.put_slice(&msg.command.params);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<CommandFrame> {
        Self::check_len(buf, 3)?;
        let payload_type = buf.get_u8();
        if payload_type != PAYLOAD_COMMAND {
            return Err(CoreError::unexpected("command", payload_type));
        }
        let tag = buf.get_u8();
        let opcode_byte = buf.get_u8();
        let opcode = Opcode::from_byte(opcode_byte).ok_or(CoreError::UnknownOpcode(opcode_byte))?;
        let params = buf.split_to(buf.len());

        Ok(CommandFrame {
            tag,
            command: Command { opcode, params },
        })
    }
}

// ============================================
// Inbound Codec
// ============================================

impl Codec<Inbound> for FrameCodec {
    fn encode(&self, msg: &Inbound, buf: &mut BytesMut) {
        match msg {
            Inbound::Response(response) => {
                buf.reserve(4 + response.data.len());
                buf.put_u8(PAYLOAD_RESPONSE);
                buf.put_u8(response.tag);
                buf.put_u8(response.opcode.as_byte());
                buf.put_u8(response.result.as_byte());
                buf.put_slice(&response.data);
            }
            Inbound::Event(event) => {
                let body = event.body();
                buf.reserve(2 + body.len());
                buf.put_u8(PAYLOAD_EVENT);
                buf.put_u8(event.id().as_byte());
                buf.put_slice(&body);
            }
        }
    }

    fn decode(&self, buf: &mut Bytes) -> Result<Inbound> {
        Self::check_len(buf, 2)?;
        match buf.get_u8() {
            PAYLOAD_RESPONSE => {
                if buf.len() < 3 {
                    return Err(CoreError::too_short(4, buf.len() + 1));
                }
                let tag = buf.get_u8();
                let opcode_byte = buf.get_u8();
                let opcode =
                    Opcode::from_byte(opcode_byte).ok_or(CoreError::UnknownOpcode(opcode_byte))?;
                let result = ResultCode::from_byte(buf.get_u8());
                let data = buf.split_to(buf.len());
                Ok(Inbound::Response(Response {
                    tag,
                    opcode,
                    result,
                    data,
                }))
            }
            PAYLOAD_EVENT => {
                let id = buf.get_u8();
                let event = Event::parse(id, buf)?;
                buf.advance(buf.len());
                Ok(Inbound::Event(event))
            }
            other => Err(CoreError::unexpected("response or event", other)),
        }
    }
}

// ============================================
// Convenience Functions
// ============================================

/// Encodes a ClientHello to bytes.
#[must_use]
pub fn encode_client_hello(msg: &ClientHello) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CLIENT_HELLO_SIZE);
    FrameCodec.encode(msg, &mut buf);
    buf
}

/// Decodes a ClientHello from bytes.
///
/// # Errors
/// See [`Codec::decode`].
pub fn decode_client_hello(buf: &[u8]) -> Result<ClientHello> {
    FrameCodec.decode(&mut Bytes::copy_from_slice(buf))
}

/// Encodes a ServerHello to bytes.
#[must_use]
pub fn encode_server_hello(msg: &ServerHello) -> BytesMut {
    let mut buf = BytesMut::with_capacity(SERVER_HELLO_SIZE);
    FrameCodec.encode(msg, &mut buf);
    buf
}

/// Decodes a ServerHello from bytes.
///
/// # Errors
/// See [`Codec::decode`].
pub fn decode_server_hello(buf: &[u8]) -> Result<ServerHello> {
    FrameCodec.decode(&mut Bytes::copy_from_slice(buf))
}

/// Encodes a tagged command to plaintext.
#[must_use]
pub fn encode_command(tag: u8, command: &Command) -> BytesMut {
    let mut buf = BytesMut::new();
    FrameCodec.encode(
        &CommandFrame {
            tag,
            command: command.clone(),
        },
        &mut buf,
    );
    buf
}

/// Decodes a tagged command from plaintext.
///
/// # Errors
/// See [`Codec::decode`].
pub fn decode_command(buf: &[u8]) -> Result<CommandFrame> {
    FrameCodec.decode(&mut Bytes::copy_from_slice(buf))
}

/// Encodes a response or event to plaintext.
#[must_use]
pub fn encode_inbound(msg: &Inbound) -> BytesMut {
    let mut buf = BytesMut::new();
    FrameCodec.encode(msg, &mut buf);
    buf
}

/// Decodes a response or event from plaintext.
///
/// # Errors
/// See [`Codec::decode`].
pub fn decode_inbound(buf: &[u8]) -> Result<Inbound> {
    FrameCodec.decode(&mut Bytes::copy_from_slice(buf))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{LockMode, StateReport};
    use crate::protocol::events::StatusChange;
    use crate::protocol::state::{DoorState, LockState, Trigger};
    use latchlink_common::types::ActorId;

    #[test]
    fn test_client_hello_layout() {
        let hello = ClientHello::new(200, [0x02; 32]);
        let encoded = encode_client_hello(&hello);
        assert_eq!(encoded.len(), CLIENT_HELLO_SIZE);
        assert_eq!(&encoded[..3], &[0x03, PROTOCOL_VERSION, 200]);
        assert_eq!(decode_client_hello(&encoded).unwrap(), hello);
    }

    #[test]
    fn test_server_hello_version_checked() {
        let hello = ServerHello::new([0x05; 32]);
        let mut encoded = encode_server_hello(&hello);
        assert_eq!(decode_server_hello(&encoded).unwrap(), hello);

        encoded[1] = 0x01;
        assert!(matches!(
            decode_server_hello(&encoded),
            Err(CoreError::UnsupportedVersion { got: 0x01, .. })
        ));
    }

    #[test]
    fn test_command_layout() {
        let encoded = encode_command(7, &Command::lock(LockMode::Normal));
        assert_eq!(encoded.as_ref(), &[0x10, 7, 0x50, 0x00]);
        let decoded = decode_command(&encoded).unwrap();
        assert_eq!(decoded.tag, 7);
        assert_eq!(decoded.command.opcode, Opcode::Lock);
    }

    #[test]
    fn test_response_decode() {
        let inbound = decode_inbound(&[0x11, 3, 0x5A, 0x00, 6, 0, 3]).unwrap();
        let Inbound::Response(response) = inbound else {
            panic!("expected response");
        };
        assert_eq!(response.tag, 3);
        assert!(response.result.is_success());
        assert_eq!(
            response.state_report().unwrap(),
            StateReport {
                state: LockState::Locked,
                jammed: false,
                door: DoorState::Closed
            }
        );
    }

    #[test]
    fn test_rejected_response_keeps_result() {
        let inbound = decode_inbound(&[0x11, 9, 0x51, 0x02]).unwrap();
        assert!(matches!(
            inbound,
            Inbound::Response(Response { result: ResultCode::Error, .. })
        ));
    }

    #[test]
    fn test_event_encode_decode() {
        let change = StatusChange {
            state: LockState::Unlocking,
            jammed: false,
            trigger: Trigger::Remote,
            actor: ActorId(77),
            door: DoorState::Closed,
        };
        let encoded = encode_inbound(&Inbound::Event(Event::StatusChange(change)));
        assert_eq!(&encoded[..2], &[0x12, 0xBA]);
        assert_eq!(
            decode_inbound(&encoded).unwrap(),
            Inbound::Event(Event::StatusChange(change))
        );
    }

    #[test]
    fn test_short_status_change_accepted() {
        let inbound = decode_inbound(&[0x12, 0xBA, 6, 0, 0x01]).unwrap();
        let Inbound::Event(Event::StatusChange(change)) = inbound else {
            panic!("not a status change: {inbound:?}");
        };
        assert_eq!(change.state, LockState::Locked);
        assert!(!change.jammed);
        assert_eq!(change.trigger, Trigger::Button);
        assert_eq!(change.actor, ActorId(0));
        assert_eq!(change.door, DoorState::Unknown);

        assert!(matches!(
            decode_inbound(&[0x12, 0xBA, 6, 0]),
            Err(CoreError::MessageTooShort { .. })
        ));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_inbound(&[0x11]), Err(CoreError::MessageTooShort { .. })));
        assert!(matches!(decode_inbound(&[0x11, 1, 0x5A]), Err(CoreError::MessageTooShort { .. })));
        assert!(matches!(decode_inbound(&[0x11, 1, 0xEE, 0]), Err(CoreError::UnknownOpcode(0xEE))));
        assert!(matches!(decode_inbound(&[0x12, 0x01]), Err(CoreError::UnknownEvent(0x01))));
        assert!(matches!(decode_inbound(&[0x55, 0x01]), Err(CoreError::UnexpectedFrame { .. })));
        assert!(matches!(
            decode_inbound(&vec![0x12; MAX_PAYLOAD_SIZE + 1]),
            Err(CoreError::MessageTooLarge { .. })
        ));
        for err in [
            decode_inbound(&[0x11]).unwrap_err(),
            decode_inbound(&[0x12, 0x01]).unwrap_err(),
        ] {
            assert!(err.is_protocol_error());
        }
    }
}
