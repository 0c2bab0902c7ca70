//! Error types for the engine ABI and the channel façade.

use thiserror::Error;

/// Error type covering every locally detectable failure.
///
/// Engine-reported outcomes (remote errors, connection failures) never show up
/// here; they are delivered through the matching event callback.
#[derive(Debug, Error)]
pub enum RtcError {
    // Host capability errors
    /// The engine could not allocate a handle; the host lacks the capability.
    #[error("{0} not supported by the host engine")]
    Unsupported(&'static str),

    // Configuration errors
    /// Both `max_packet_life_time` and `max_retransmits` were set.
    #[error("invalid reliability: max_packet_life_time and max_retransmits are mutually exclusive")]
    ConflictingReliability,

    /// A port or service string could not be parsed as a port number.
    #[error("invalid ICE server port: {0}")]
    InvalidPort(String),

    /// A string bound for the ABI contains a NUL byte.
    #[error("string contains an interior NUL byte at position {position}")]
    InteriorNul {
        /// Byte offset of the first NUL.
        position: usize,
    },

    // Registry errors
    /// The handle is already bound to another live owner.
    #[error("handle {handle} is already bound to another {kind}")]
    AlreadyBound {
        /// The raw handle value.
        handle: i32,
        /// Kind of object the registry tracks.
        kind: &'static str,
    },

    // Send errors
    /// The channel has no engine handle any more.
    #[error("channel is closed")]
    ChannelClosed,

    /// The engine refused the message.
    #[error("engine rejected message on handle {handle} (code {code})")]
    SendRejected {
        /// The raw handle value.
        handle: i32,
        /// The negative code returned by the engine.
        code: i32,
    },

    /// The message cannot be described by the ABI length field.
    #[error("message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum encodable size.
        max: usize,
    },

    /// The transport does not support the requested operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Result type alias for façade operations.
pub type Result<T> = std::result::Result<T, RtcError>;

impl From<std::ffi::NulError> for RtcError {
    fn from(err: std::ffi::NulError) -> Self {
        RtcError::InteriorNul {
            position: err.nul_position(),
        }
    }
}
