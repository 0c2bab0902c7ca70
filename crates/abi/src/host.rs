//! Bindings to the host engine's `extern "C"` entry points.
//!
//! The host (for example an Emscripten JS library wrapping the browser's
//! `RTCPeerConnection` and `WebSocket`) exports the functions declared here.

use std::ffi::{c_char, c_int, c_void, CStr};

use crate::codec::EncodedMessage;
use crate::engine::Engine;
use crate::sys::{
    CandidateCallback, DataChannelCallback, DescriptionCallback, EngineString, ErrorCallback,
    Handle, MessageCallback, ReliabilityFlags, StateCallback, VoidCallback,
};

extern "C" {
    fn rtcCreatePeerConnection(ice_servers: *const *const c_char, count: c_int) -> c_int;
    fn rtcDeletePeerConnection(pc: c_int);
    fn rtcLocalDescriptionSdp(pc: c_int) -> *mut c_char;
    fn rtcLocalDescriptionType(pc: c_int) -> *mut c_char;
    fn rtcSetRemoteDescription(pc: c_int, sdp: *const c_char, kind: *const c_char);
    fn rtcAddRemoteCandidate(pc: c_int, candidate: *const c_char, mid: *const c_char);
    fn rtcSetDataChannelCallback(pc: c_int, cb: DataChannelCallback);
    fn rtcSetLocalDescriptionCallback(pc: c_int, cb: DescriptionCallback);
    fn rtcSetLocalCandidateCallback(pc: c_int, cb: CandidateCallback);
    fn rtcSetStateChangeCallback(pc: c_int, cb: StateCallback);
    fn rtcSetGatheringStateChangeCallback(pc: c_int, cb: StateCallback);
    fn rtcSetSignalingStateChangeCallback(pc: c_int, cb: StateCallback);

    fn rtcCreateDataChannel(
        pc: c_int,
        label: *const c_char,
        unordered: c_int,
        max_packet_life_time: c_int,
        max_retransmits: c_int,
    ) -> c_int;
    fn rtcDeleteDataChannel(dc: c_int);
    fn rtcGetDataChannelLabel(dc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetBufferedAmount(dc: c_int) -> c_int;
    fn rtcSetBufferedAmountLowThreshold(dc: c_int, amount: c_int);
    fn rtcSendMessage(dc: c_int, buffer: *const c_char, size: c_int) -> c_int;
    fn rtcSetUserPointer(handle: c_int, user: *mut c_void);
    fn rtcSetOpenCallback(dc: c_int, cb: VoidCallback);
    fn rtcSetErrorCallback(dc: c_int, cb: ErrorCallback);
    fn rtcSetMessageCallback(dc: c_int, cb: MessageCallback);
    fn rtcSetBufferedAmountLowCallback(dc: c_int, cb: VoidCallback);

    fn wsCreateWebSocket(url: *const c_char) -> c_int;
    fn wsDeleteWebSocket(ws: c_int);
    fn wsSendMessage(ws: c_int, buffer: *const c_char, size: c_int) -> c_int;
    fn wsSetUserPointer(ws: c_int, user: *mut c_void);
    fn wsSetOpenCallback(ws: c_int, cb: VoidCallback);
    fn wsSetErrorCallback(ws: c_int, cb: ErrorCallback);
    fn wsSetMessageCallback(ws: c_int, cb: MessageCallback);

    fn free(ptr: *mut c_void);
}

unsafe fn release_host_string(ptr: *mut c_char) {
    free(ptr.cast());
}

/// The engine provided by the host environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostEngine;

impl HostEngine {
    /// Create a handle to the host engine.
    pub fn new() -> Self {
        Self
    }
}

impl Engine for HostEngine {
    fn create_peer_connection(&self, ice_servers: &[&CStr]) -> c_int {
        let mut ptrs: Vec<*const c_char> = ice_servers.iter().map(|s| s.as_ptr()).collect();
        let count = c_int::try_from(ptrs.len()).unwrap_or(c_int::MAX);
        ptrs.push(std::ptr::null());
        unsafe { rtcCreatePeerConnection(ptrs.as_ptr(), count) }
    }

    fn delete_peer_connection(&self, pc: Handle) {
        unsafe { rtcDeletePeerConnection(pc.as_raw()) }
    }

    fn local_description_sdp(&self, pc: Handle) -> Option<EngineString> {
        // SAFETY: the host allocates the string with malloc and transfers
        // ownership to the caller.
        unsafe { EngineString::from_raw(rtcLocalDescriptionSdp(pc.as_raw()), release_host_string) }
    }

    fn local_description_type(&self, pc: Handle) -> Option<EngineString> {
        // SAFETY: see `local_description_sdp`.
        unsafe { EngineString::from_raw(rtcLocalDescriptionType(pc.as_raw()), release_host_string) }
    }

    fn set_remote_description(&self, pc: Handle, sdp: &CStr, kind: &CStr) {
        unsafe { rtcSetRemoteDescription(pc.as_raw(), sdp.as_ptr(), kind.as_ptr()) }
    }

    fn add_remote_candidate(&self, pc: Handle, candidate: &CStr, mid: &CStr) {
        unsafe { rtcAddRemoteCandidate(pc.as_raw(), candidate.as_ptr(), mid.as_ptr()) }
    }

    fn set_data_channel_callback(&self, pc: Handle, callback: DataChannelCallback) {
        unsafe { rtcSetDataChannelCallback(pc.as_raw(), callback) }
    }

    fn set_local_description_callback(&self, pc: Handle, callback: DescriptionCallback) {
        unsafe { rtcSetLocalDescriptionCallback(pc.as_raw(), callback) }
    }

    fn set_local_candidate_callback(&self, pc: Handle, callback: CandidateCallback) {
        unsafe { rtcSetLocalCandidateCallback(pc.as_raw(), callback) }
    }

    fn set_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        unsafe { rtcSetStateChangeCallback(pc.as_raw(), callback) }
    }

    fn set_gathering_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        unsafe { rtcSetGatheringStateChangeCallback(pc.as_raw(), callback) }
    }

    fn set_signaling_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        unsafe { rtcSetSignalingStateChangeCallback(pc.as_raw(), callback) }
    }

    fn create_data_channel(
        &self,
        pc: Handle,
        label: &CStr,
        reliability: ReliabilityFlags,
    ) -> c_int {
        unsafe {
            rtcCreateDataChannel(
                pc.as_raw(),
                label.as_ptr(),
                reliability.unordered,
                reliability.max_packet_life_time,
                reliability.max_retransmits,
            )
        }
    }

    fn delete_data_channel(&self, dc: Handle) {
        unsafe { rtcDeleteDataChannel(dc.as_raw()) }
    }

    fn data_channel_label(&self, dc: Handle, buffer: &mut [u8]) -> c_int {
        let size = c_int::try_from(buffer.len()).unwrap_or(c_int::MAX);
        unsafe { rtcGetDataChannelLabel(dc.as_raw(), buffer.as_mut_ptr().cast(), size) }
    }

    fn buffered_amount(&self, dc: Handle) -> c_int {
        unsafe { rtcGetBufferedAmount(dc.as_raw()) }
    }

    fn set_buffered_amount_low_threshold(&self, dc: Handle, amount: c_int) {
        unsafe { rtcSetBufferedAmountLowThreshold(dc.as_raw(), amount) }
    }

    fn send_message(&self, dc: Handle, message: &EncodedMessage) -> c_int {
        unsafe { rtcSendMessage(dc.as_raw(), message.as_ptr(), message.size()) }
    }

    fn set_user_pointer(&self, handle: Handle, user: *mut c_void) {
        unsafe { rtcSetUserPointer(handle.as_raw(), user) }
    }

    fn set_open_callback(&self, dc: Handle, callback: VoidCallback) {
        unsafe { rtcSetOpenCallback(dc.as_raw(), callback) }
    }

    fn set_error_callback(&self, dc: Handle, callback: ErrorCallback) {
        unsafe { rtcSetErrorCallback(dc.as_raw(), callback) }
    }

    fn set_message_callback(&self, dc: Handle, callback: MessageCallback) {
        unsafe { rtcSetMessageCallback(dc.as_raw(), callback) }
    }

    fn set_buffered_amount_low_callback(&self, dc: Handle, callback: VoidCallback) {
        unsafe { rtcSetBufferedAmountLowCallback(dc.as_raw(), callback) }
    }

    fn ws_create(&self, url: &CStr) -> c_int {
        unsafe { wsCreateWebSocket(url.as_ptr()) }
    }

    fn ws_delete(&self, ws: Handle) {
        unsafe { wsDeleteWebSocket(ws.as_raw()) }
    }

    fn ws_send_message(&self, ws: Handle, message: &EncodedMessage) -> c_int {
        unsafe { wsSendMessage(ws.as_raw(), message.as_ptr(), message.size()) }
    }

    fn ws_set_user_pointer(&self, ws: Handle, user: *mut c_void) {
        unsafe { wsSetUserPointer(ws.as_raw(), user) }
    }

    fn ws_set_open_callback(&self, ws: Handle, callback: VoidCallback) {
        unsafe { wsSetOpenCallback(ws.as_raw(), callback) }
    }

    fn ws_set_error_callback(&self, ws: Handle, callback: ErrorCallback) {
        unsafe { wsSetErrorCallback(ws.as_raw(), callback) }
    }

    fn ws_set_message_callback(&self, ws: Handle, callback: MessageCallback) {
        unsafe { wsSetMessageCallback(ws.as_raw(), callback) }
    }
}
