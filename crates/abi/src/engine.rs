//! The engine ABI as a Rust trait.
//!
//! Each method corresponds to one entry point of the external engine. Methods
//! that create resources return the raw handle, with `0` meaning the engine
//! could not allocate one. Event setters take plain function pointers; the
//! engine hands the user pointer installed with `set_user_pointer` (or
//! `ws_set_user_pointer`) back to every callback.
//!
//! Implementations must deliver callbacks serially, never concurrently with
//! one another, and must not hold internal locks while a callback runs.
//!
//! Handles form a single namespace per process. Callbacks carry nothing but
//! the handle, so the façade resolves them through process-wide registries:
//! every engine in the process must hand out distinct values for live
//! resources, whether it is one instance or several. A handle that is still
//! live is never issued again.

use std::ffi::{c_int, c_void, CStr};

use crate::codec::EncodedMessage;
use crate::sys::{
    CandidateCallback, DataChannelCallback, DescriptionCallback, EngineString, ErrorCallback,
    Handle, MessageCallback, ReliabilityFlags, StateCallback, VoidCallback,
};

/// The handle-based communication engine.
pub trait Engine: Send + Sync {
    // Peer connections

    /// Create a peer connection using the given ICE server URLs.
    fn create_peer_connection(&self, ice_servers: &[&CStr]) -> c_int;

    /// Release a peer connection. Its callbacks stop firing.
    fn delete_peer_connection(&self, pc: Handle);

    /// The SDP of the current local description, if any.
    fn local_description_sdp(&self, pc: Handle) -> Option<EngineString>;

    /// The type of the current local description, if any.
    fn local_description_type(&self, pc: Handle) -> Option<EngineString>;

    /// Apply a remote description.
    fn set_remote_description(&self, pc: Handle, sdp: &CStr, kind: &CStr);

    /// Add a remote ICE candidate.
    fn add_remote_candidate(&self, pc: Handle, candidate: &CStr, mid: &CStr);

    /// Register the remote data channel callback.
    fn set_data_channel_callback(&self, pc: Handle, callback: DataChannelCallback);

    /// Register the local description callback.
    fn set_local_description_callback(&self, pc: Handle, callback: DescriptionCallback);

    /// Register the local candidate callback.
    fn set_local_candidate_callback(&self, pc: Handle, callback: CandidateCallback);

    /// Register the connection state callback.
    fn set_state_change_callback(&self, pc: Handle, callback: StateCallback);

    /// Register the ICE gathering state callback.
    fn set_gathering_state_change_callback(&self, pc: Handle, callback: StateCallback);

    /// Register the signaling state callback.
    fn set_signaling_state_change_callback(&self, pc: Handle, callback: StateCallback);

    // Data channels

    /// Create a locally initiated data channel on `pc`.
    fn create_data_channel(&self, pc: Handle, label: &CStr, reliability: ReliabilityFlags)
        -> c_int;

    /// Release a data channel. Its callbacks stop firing.
    fn delete_data_channel(&self, dc: Handle);

    /// Copy the label into `buffer` (NUL-terminated, truncated to fit) and
    /// return its full length in bytes.
    fn data_channel_label(&self, dc: Handle, buffer: &mut [u8]) -> c_int;

    /// Bytes queued for sending. Negative values mean unknown.
    fn buffered_amount(&self, dc: Handle) -> c_int;

    /// Set the threshold below which buffered-amount-low fires.
    fn set_buffered_amount_low_threshold(&self, dc: Handle, amount: c_int);

    /// Send a message. Negative results mean the engine rejected it.
    fn send_message(&self, dc: Handle, message: &EncodedMessage) -> c_int;

    /// Install the user pointer for a peer connection or data channel.
    fn set_user_pointer(&self, handle: Handle, user: *mut c_void);

    /// Register the open callback of a data channel.
    fn set_open_callback(&self, dc: Handle, callback: VoidCallback);

    /// Register the error callback of a data channel.
    fn set_error_callback(&self, dc: Handle, callback: ErrorCallback);

    /// Register the message callback of a data channel.
    fn set_message_callback(&self, dc: Handle, callback: MessageCallback);

    /// Register the buffered-amount-low callback of a data channel.
    fn set_buffered_amount_low_callback(&self, dc: Handle, callback: VoidCallback);

    // Web sockets

    /// Open a web socket to `url`.
    fn ws_create(&self, url: &CStr) -> c_int;

    /// Release a web socket. Its callbacks stop firing.
    fn ws_delete(&self, ws: Handle);

    /// Send a message. Negative results mean the engine rejected it.
    fn ws_send_message(&self, ws: Handle, message: &EncodedMessage) -> c_int;

    /// Install the user pointer for a web socket.
    fn ws_set_user_pointer(&self, ws: Handle, user: *mut c_void);

    /// Register the open callback of a web socket.
    fn ws_set_open_callback(&self, ws: Handle, callback: VoidCallback);

    /// Register the error callback of a web socket.
    fn ws_set_error_callback(&self, ws: Handle, callback: ErrorCallback);

    /// Register the message callback of a web socket.
    fn ws_set_message_callback(&self, ws: Handle, callback: MessageCallback);
}
