//! Message codec for the byte + length-sentinel boundary.
//!
//! # Wire convention
//!
//! The engine only understands a data pointer and a signed length:
//! - binary payloads carry their true byte length (zero included)
//! - text payloads are NUL-terminated and carry [`TEXT_SIZE_SENTINEL`]
//! - a null data pointer on the receive path means the peer closed the channel
//!
//! No other module looks at raw sizes; everything above this layer works with
//! [`Message`] and [`Decoded`].

use std::ffi::{c_char, c_int, CStr, CString};

use bytes::Bytes;

use crate::error::{Result, RtcError};

/// Size value marking a NUL-terminated text payload.
pub const TEXT_SIZE_SENTINEL: c_int = -1;

/// Largest binary payload the length field can describe.
pub const MAX_BINARY_SIZE: usize = c_int::MAX as usize;

/// A message exchanged over a channel: either binary or text, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raw bytes.
    Binary(Bytes),
    /// UTF-8 text.
    Text(String),
}

impl Message {
    /// Returns true for binary messages.
    #[inline]
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns true for text messages.
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Binary(data) => data.len(),
            Message::Text(text) => text.len(),
        }
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The binary payload, if this is a binary message.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Message::Binary(data) => Some(data),
            Message::Text(_) => None,
        }
    }

    /// The text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Binary(_) => None,
            Message::Text(text) => Some(text),
        }
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Message::Binary(Bytes::copy_from_slice(data))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

#[derive(Debug)]
enum Payload {
    Binary(Bytes),
    Text(CString),
}

/// A message laid out for the engine: a pointer, a size, and the buffer
/// backing the pointer.
#[derive(Debug)]
pub struct EncodedMessage {
    payload: Payload,
}

impl EncodedMessage {
    /// Encode a message for `send_message`.
    ///
    /// Fails for text containing a NUL byte, which the sentinel convention
    /// cannot carry, and for binary payloads larger than [`MAX_BINARY_SIZE`].
    pub fn encode(message: &Message) -> Result<Self> {
        let payload = match message {
            Message::Binary(data) => {
                if data.len() > MAX_BINARY_SIZE {
                    return Err(RtcError::MessageTooLarge {
                        size: data.len(),
                        max: MAX_BINARY_SIZE,
                    });
                }
                Payload::Binary(data.clone())
            }
            Message::Text(text) => Payload::Text(CString::new(text.as_str())?),
        };
        Ok(Self { payload })
    }

    /// Encode a borrowed binary payload.
    pub fn binary(data: &[u8]) -> Result<Self> {
        Self::encode(&Message::Binary(Bytes::copy_from_slice(data)))
    }

    /// Pointer to the first byte. Never null, even for an empty payload.
    pub fn as_ptr(&self) -> *const c_char {
        match &self.payload {
            Payload::Binary(data) => {
                if data.is_empty() {
                    // An empty `Bytes` may point anywhere; hand the engine a
                    // stable non-null address instead.
                    EMPTY.as_ptr().cast()
                } else {
                    data.as_ptr().cast()
                }
            }
            Payload::Text(text) => text.as_ptr(),
        }
    }

    /// Size field for the ABI: byte length, or [`TEXT_SIZE_SENTINEL`] for text.
    pub fn size(&self) -> c_int {
        match &self.payload {
            // Bounded by MAX_BINARY_SIZE in `encode`.
            Payload::Binary(data) => data.len() as c_int,
            Payload::Text(_) => TEXT_SIZE_SENTINEL,
        }
    }

    /// Whether the payload is NUL-terminated text.
    pub fn is_text(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }

    /// The payload bytes, excluding the text terminator.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Binary(data) => data,
            Payload::Text(text) => text.as_bytes(),
        }
    }
}

static EMPTY: [u8; 1] = [0];

/// What a message notification carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The peer closed the channel; not a message.
    Closed,
    /// A binary or text message.
    Message(Message),
}

/// Decode the arguments of a message notification.
///
/// A null `data` is a closure signal, a non-negative `size` is a binary
/// message of exactly that length, and a negative `size` is NUL-terminated
/// text.
///
/// # Safety
///
/// When `data` is non-null it must point to `size` readable bytes (binary) or
/// to a NUL-terminated buffer (text), valid for the duration of the call.
pub unsafe fn decode(data: *const c_char, size: c_int) -> Decoded {
    if data.is_null() {
        return Decoded::Closed;
    }

    if size >= 0 {
        let bytes = std::slice::from_raw_parts(data.cast::<u8>(), size as usize);
        Decoded::Message(Message::Binary(Bytes::copy_from_slice(bytes)))
    } else {
        let text = CStr::from_ptr(data).to_string_lossy().into_owned();
        Decoded::Message(Message::Text(text))
    }
}
