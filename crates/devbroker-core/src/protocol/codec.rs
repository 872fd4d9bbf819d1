// ============================================
// File: crates/devbroker-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Provides binary serialization and deserialization for protocol
//! messages, plus frame-boundary detection on a byte stream.
//!
//! ## Main Functionality
//! - `Codec` trait: Generic encode/decode interface
//! - `ProtocolCodec`: Implementation for `Message`
//! - `MessageCodec`: `tokio_util` adapter for `Framed` streams
//!
//! ## Wire Format
//! All integers are big-endian `u32`.
//!
//! ## Parsing Strategy
//! 1. Wait for the 8-byte header
//! 2. Validate the type and the argument count
//! 3. Walk the length prefixes, rejecting any oversized declaration before
//!    its bytes arrive
//! 4. Decode the complete frame and check UTF-8
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate buffer lengths before reading
//! - A limit violation means the stream is unusable; callers must close it
//! - `check_complete` never allocates; keep it that way, it runs on every
//!   partial read
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::{CoreError, Result};
use crate::protocol::messages::{
    Message, MessageType, HEADER_SIZE, LEN_PREFIX_SIZE, MAX_ARG_COUNT, MAX_ARG_LEN, MAX_DATA_LEN,
};

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding protocol messages.
///
/// # Type Parameters
/// * `T` - The message type to encode/decode
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    ///
    /// # Errors
    /// Fails without writing anything if the message violates a limit.
    fn encode(&self, msg: &T, buf: &mut BytesMut) -> Result<()>;

    /// Decodes one message from the front of `buf`.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

// ============================================
// ProtocolCodec
// ============================================

/// Codec implementation for protocol messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolCodec;

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + LEN_PREFIX_SIZE)?;
    let mut raw = [0u8; LEN_PREFIX_SIZE];
    raw.copy_from_slice(bytes);
    Some(u32::from_be_bytes(raw))
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn put_len(buf: &mut BytesMut, len: usize) {
    // Callers validate against the field limits first.
    buf.put_u32(len as u32);
}

impl ProtocolCodec {
    /// Creates a new protocol codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Identifies the message type from a buffer without consuming it.
    pub fn peek_message_type(buf: &[u8]) -> Result<MessageType> {
        let raw = read_u32(buf, 0).ok_or(CoreError::too_short(LEN_PREFIX_SIZE, buf.len()))?;
        MessageType::from_u32(raw).ok_or(CoreError::UnknownMessageType(raw))
    }

    /// Checks if the buffer starts with a complete message.
    ///
    /// # Returns
    /// - `Ok(Some(len))` - Complete message of `len` bytes
    /// - `Ok(None)` - Incomplete message, need more data
    /// - `Err(_)` - Unknown type or a declared length over its limit
    pub fn check_complete(buf: &[u8]) -> Result<Option<usize>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        Self::peek_message_type(buf)?;

        let arg_count = read_u32(buf, LEN_PREFIX_SIZE).unwrap_or_default() as usize;
        if arg_count > MAX_ARG_COUNT {
            return Err(CoreError::too_large("argCount", MAX_ARG_COUNT, arg_count));
        }

        let mut offset = HEADER_SIZE;
        for _ in 0..arg_count {
            let Some(len) = read_u32(buf, offset) else {
                return Ok(None);
            };
            let len = len as usize;
            if len > MAX_ARG_LEN {
                return Err(CoreError::too_large("arg", MAX_ARG_LEN, len));
            }
            offset += LEN_PREFIX_SIZE + len;
        }

        let Some(data_len) = read_u32(buf, offset) else {
            return Ok(None);
        };
        let data_len = data_len as usize;
        if data_len > MAX_DATA_LEN {
            return Err(CoreError::too_large("data", MAX_DATA_LEN, data_len));
        }

        let total = offset + LEN_PREFIX_SIZE + data_len;
        Ok((buf.len() >= total).then_some(total))
    }

    fn read_string(buf: &mut Bytes, field: &'static str, max: usize) -> Result<String> {
        if buf.remaining() < LEN_PREFIX_SIZE {
            return Err(CoreError::too_short(LEN_PREFIX_SIZE, buf.remaining()));
        }
        let len = buf.get_u32() as usize;
        if len > max {
            return Err(CoreError::too_large(field, max, len));
        }
        if buf.remaining() < len {
            return Err(CoreError::too_short(len, buf.remaining()));
        }
        let raw = buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| CoreError::malformed(format!("{field} is not valid UTF-8")))
    }
}

// ============================================
// Message Codec
// ============================================

impl Codec<Message> for ProtocolCodec {
    fn encode(&self, msg: &Message, buf: &mut BytesMut) -> Result<()> {
        msg.validate()?;

        buf.reserve(msg.wire_size());
        buf.put_u32(msg.msg_type.as_u32());
        put_len(buf, msg.args.len());
        for arg in &msg.args {
            put_len(buf, arg.len());
            buf.put_slice(arg.as_bytes());
        }
        put_len(buf, msg.data.len());
        buf.put_slice(msg.data.as_bytes());
        Ok(())
    }

    fn decode(&self, buf: &mut Bytes) -> Result<Message> {
        if buf.remaining() < HEADER_SIZE {
            return Err(CoreError::too_short(HEADER_SIZE, buf.remaining()));
        }

        let raw_type = buf.get_u32();
        let msg_type =
            MessageType::from_u32(raw_type).ok_or(CoreError::UnknownMessageType(raw_type))?;

        let arg_count = buf.get_u32() as usize;
        if arg_count > MAX_ARG_COUNT {
            return Err(CoreError::too_large("argCount", MAX_ARG_COUNT, arg_count));
        }

        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            args.push(Self::read_string(buf, "arg", MAX_ARG_LEN)?);
        }
        let data = Self::read_string(buf, "data", MAX_DATA_LEN)?;

        Ok(Message {
            msg_type,
            data,
            args,
        })
    }
}

// ============================================
// tokio-util Adapter
// ============================================

/// Framing codec for `tokio_util::codec::Framed`.
///
/// Frames are located with [`ProtocolCodec::check_complete`] so an
/// oversized declaration is rejected before the peer sends its bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new framing codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let complete = match ProtocolCodec::check_complete(src) {
            Ok(complete) => complete,
            Err(e) => {
                debug!(buffered = src.len(), error = %e, "Rejected frame header");
                return Err(e);
            }
        };

        match complete {
            Some(len) => {
                let mut frame = src.split_to(len).freeze();
                let msg = ProtocolCodec.decode(&mut frame)?;
                trace!(msg_type = %msg.msg_type, frame_len = len, "Decoded frame");
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CoreError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        ProtocolCodec.encode(&item, dst)
    }
}

// ============================================
// Convenience Functions
// ============================================

/// Encodes a message to bytes.
pub fn encode_message(msg: &Message) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(msg.wire_size());
    ProtocolCodec.encode(msg, &mut buf)?;
    Ok(buf)
}

/// Decodes exactly one message from bytes.
pub fn decode_message(buf: &[u8]) -> Result<Message> {
    let mut bytes = Bytes::copy_from_slice(buf);
    let msg = ProtocolCodec.decode(&mut bytes)?;
    if bytes.has_remaining() {
        return Err(CoreError::malformed(format!(
            "{} trailing bytes after message",
            bytes.remaining()
        )));
    }
    Ok(msg)
}

// ============================================
// Tests
// ============================================
