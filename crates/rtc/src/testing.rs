//! A recording engine for unit tests.
//!
//! Records every mutating ABI call and stores the registered callbacks so that
//! tests can fire engine notifications directly, one at a time, on the test
//! thread.

use std::collections::HashMap;
use std::ffi::{c_int, c_void, CStr, CString};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rtc_abi::sys::{
    CandidateCallback, DataChannelCallback, DescriptionCallback, ErrorCallback, MessageCallback,
    StateCallback, VoidCallback,
};
use rtc_abi::{EncodedMessage, Engine, EngineString, Handle, ReliabilityFlags};

use crate::datachannel::copy_label;

/// Handles start high so they never collide with the loopback engine's.
static NEXT_HANDLE: AtomicI32 = AtomicI32::new(1 << 20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    CreatePeerConnection(Vec<String>),
    DeletePeerConnection(c_int),
    SetRemoteDescription { sdp: String, kind: String },
    AddRemoteCandidate { candidate: String, mid: String },
    CreateDataChannel {
        pc: c_int,
        label: String,
        flags: ReliabilityFlags,
    },
    DeleteDataChannel(c_int),
    SetThreshold(c_int, c_int),
    Send { handle: c_int, data: Vec<u8>, size: c_int },
    WsCreate(String),
    WsDelete(c_int),
}

#[derive(Default)]
struct Recorded {
    calls: Vec<EngineCall>,
    labels: HashMap<c_int, String>,
    users: HashMap<c_int, usize>,
    open: HashMap<c_int, VoidCallback>,
    error: HashMap<c_int, ErrorCallback>,
    message: HashMap<c_int, MessageCallback>,
    buffered_amount_low: HashMap<c_int, VoidCallback>,
    data_channel: HashMap<c_int, DataChannelCallback>,
    description: HashMap<c_int, DescriptionCallback>,
    candidate: HashMap<c_int, CandidateCallback>,
    state: HashMap<c_int, StateCallback>,
    gathering: HashMap<c_int, StateCallback>,
    signaling: HashMap<c_int, StateCallback>,
    local_sdp: Option<String>,
    local_type: Option<String>,
    send_result: c_int,
    buffered_amount: c_int,
    fail_creation: bool,
    reissue: Option<c_int>,
}

pub(crate) struct RecordingEngine {
    recorded: Mutex<Recorded>,
}

impl RecordingEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            recorded: Mutex::new(Recorded::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap()
    }

    fn allocate(&self) -> c_int {
        let mut recorded = self.lock();
        if recorded.fail_creation {
            return 0;
        }
        if let Some(raw) = recorded.reissue.take() {
            return raw;
        }
        NEXT_HANDLE.fetch_add(1, Ordering::SeqCst)
    }

    /// Makes the next creation return `handle` again, as a misbehaving
    /// engine sharing the handle namespace would.
    pub(crate) fn reissue(&self, handle: Handle) {
        self.lock().reissue = Some(handle.as_raw());
    }

    /// Allocates a data channel handle with a label, as the engine would for a
    /// remote channel.
    pub(crate) fn allocate_channel(&self, label: &str) -> Handle {
        let raw = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
        self.lock().labels.insert(raw, label.to_string());
        Handle::from_raw(raw).unwrap()
    }

    pub(crate) fn fail_creation(&self, fail: bool) {
        self.lock().fail_creation = fail;
    }

    pub(crate) fn set_send_result(&self, result: c_int) {
        self.lock().send_result = result;
    }

    pub(crate) fn set_buffered_amount(&self, amount: c_int) {
        self.lock().buffered_amount = amount;
    }

    pub(crate) fn set_local_description(&self, sdp: Option<&str>, kind: Option<&str>) {
        let mut recorded = self.lock();
        recorded.local_sdp = sdp.map(str::to_string);
        recorded.local_type = kind.map(str::to_string);
    }

    pub(crate) fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|&c| predicate(c)).count()
    }

    /// Payloads and size fields sent on `handle`, in order.
    pub(crate) fn sent(&self, handle: Handle) -> Vec<(Vec<u8>, c_int)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Send { handle: h, data, size } if *h == handle.as_raw() => {
                    Some((data.clone(), *size))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
    }

    /// Looks up a callback and the user pointer for `handle` without holding
    /// the lock while the callback runs.
    fn lookup<F: Copy>(
        &self,
        handle: Handle,
        select: impl Fn(&Recorded) -> &HashMap<c_int, F>,
    ) -> Option<(F, *mut c_void)> {
        let recorded = self.lock();
        let callback = *select(&*recorded).get(&handle.as_raw())?;
        let user = recorded.users.get(&handle.as_raw()).copied().unwrap_or(0);
        Some((callback, user as *mut c_void))
    }

    pub(crate) fn fire_open(&self, handle: Handle) {
        if let Some((callback, user)) = self.lookup(handle, |r| &r.open) {
            unsafe { callback(user) }
        }
    }

    pub(crate) fn fire_error(&self, handle: Handle, reason: Option<&str>) {
        let reason = reason.map(|r| CString::new(r).unwrap());
        let ptr = reason.as_ref().map_or(std::ptr::null(), |r| r.as_ptr());
        if let Some((callback, user)) = self.lookup(handle, |r| &r.error) {
            unsafe { callback(ptr, user) }
        }
    }

    pub(crate) fn fire_binary(&self, handle: Handle, data: &[u8]) {
        let encoded = EncodedMessage::binary(data).unwrap();
        if let Some((callback, user)) = self.lookup(handle, |r| &r.message) {
            unsafe { callback(encoded.as_ptr(), encoded.size(), user) }
        }
    }

    pub(crate) fn fire_text(&self, handle: Handle, text: &str) {
        let text = CString::new(text).unwrap();
        if let Some((callback, user)) = self.lookup(handle, |r| &r.message) {
            unsafe { callback(text.as_ptr(), -1, user) }
        }
    }

    /// Fires the message callback with a null pointer.
    pub(crate) fn fire_closure(&self, handle: Handle) {
        if let Some((callback, user)) = self.lookup(handle, |r| &r.message) {
            unsafe { callback(std::ptr::null(), 0, user) }
        }
    }

    pub(crate) fn fire_buffered_amount_low(&self, handle: Handle) {
        if let Some((callback, user)) = self.lookup(handle, |r| &r.buffered_amount_low) {
            unsafe { callback(user) }
        }
    }

    pub(crate) fn fire_data_channel(&self, pc: Handle, dc: Handle) {
        if let Some((callback, user)) = self.lookup(pc, |r| &r.data_channel) {
            unsafe { callback(dc.as_raw(), user) }
        }
    }

    pub(crate) fn fire_description(&self, pc: Handle, sdp: &str, kind: &str) {
        let sdp = CString::new(sdp).unwrap();
        let kind = CString::new(kind).unwrap();
        if let Some((callback, user)) = self.lookup(pc, |r| &r.description) {
            unsafe { callback(sdp.as_ptr(), kind.as_ptr(), user) }
        }
    }

    pub(crate) fn fire_candidate(&self, pc: Handle, candidate: &str, mid: Option<&str>) {
        let candidate = CString::new(candidate).unwrap();
        let mid = mid.map(|m| CString::new(m).unwrap());
        let mid_ptr = mid.as_ref().map_or(std::ptr::null(), |m| m.as_ptr());
        if let Some((callback, user)) = self.lookup(pc, |r| &r.candidate) {
            unsafe { callback(candidate.as_ptr(), mid_ptr, user) }
        }
    }

    pub(crate) fn fire_state(&self, pc: Handle, raw: c_int) {
        if let Some((callback, user)) = self.lookup(pc, |r| &r.state) {
            unsafe { callback(raw, user) }
        }
    }

    pub(crate) fn fire_gathering(&self, pc: Handle, raw: c_int) {
        if let Some((callback, user)) = self.lookup(pc, |r| &r.gathering) {
            unsafe { callback(raw, user) }
        }
    }

    pub(crate) fn fire_signaling(&self, pc: Handle, raw: c_int) {
        if let Some((callback, user)) = self.lookup(pc, |r| &r.signaling) {
            unsafe { callback(raw, user) }
        }
    }
}

fn owned(s: &CStr) -> String {
    s.to_string_lossy().into_owned()
}

impl Engine for RecordingEngine {
    fn create_peer_connection(&self, ice_servers: &[&CStr]) -> c_int {
        self.record(EngineCall::CreatePeerConnection(
            ice_servers.iter().map(|s| owned(s)).collect(),
        ));
        self.allocate()
    }

    fn delete_peer_connection(&self, pc: Handle) {
        self.record(EngineCall::DeletePeerConnection(pc.as_raw()));
    }

    fn local_description_sdp(&self, _pc: Handle) -> Option<EngineString> {
        let sdp = self.lock().local_sdp.clone()?;
        EngineString::from_string(&sdp)
    }

    fn local_description_type(&self, _pc: Handle) -> Option<EngineString> {
        let kind = self.lock().local_type.clone()?;
        EngineString::from_string(&kind)
    }

    fn set_remote_description(&self, _pc: Handle, sdp: &CStr, kind: &CStr) {
        self.record(EngineCall::SetRemoteDescription {
            sdp: owned(sdp),
            kind: owned(kind),
        });
    }

    fn add_remote_candidate(&self, _pc: Handle, candidate: &CStr, mid: &CStr) {
        self.record(EngineCall::AddRemoteCandidate {
            candidate: owned(candidate),
            mid: owned(mid),
        });
    }

    fn set_data_channel_callback(&self, pc: Handle, callback: DataChannelCallback) {
        self.lock().data_channel.insert(pc.as_raw(), callback);
    }

    fn set_local_description_callback(&self, pc: Handle, callback: DescriptionCallback) {
        self.lock().description.insert(pc.as_raw(), callback);
    }

    fn set_local_candidate_callback(&self, pc: Handle, callback: CandidateCallback) {
        self.lock().candidate.insert(pc.as_raw(), callback);
    }

    fn set_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        self.lock().state.insert(pc.as_raw(), callback);
    }

    fn set_gathering_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        self.lock().gathering.insert(pc.as_raw(), callback);
    }

    fn set_signaling_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        self.lock().signaling.insert(pc.as_raw(), callback);
    }

    fn create_data_channel(&self, pc: Handle, label: &CStr, reliability: ReliabilityFlags) -> c_int {
        self.record(EngineCall::CreateDataChannel {
            pc: pc.as_raw(),
            label: owned(label),
            flags: reliability,
        });
        let raw = self.allocate();
        if raw > 0 {
            self.lock().labels.insert(raw, owned(label));
        }
        raw
    }

    fn delete_data_channel(&self, dc: Handle) {
        self.record(EngineCall::DeleteDataChannel(dc.as_raw()));
    }

    fn data_channel_label(&self, dc: Handle, buffer: &mut [u8]) -> c_int {
        match self.lock().labels.get(&dc.as_raw()) {
            Some(label) => copy_label(label, buffer),
            None => -1,
        }
    }

    fn buffered_amount(&self, _dc: Handle) -> c_int {
        self.lock().buffered_amount
    }

    fn set_buffered_amount_low_threshold(&self, dc: Handle, amount: c_int) {
        self.record(EngineCall::SetThreshold(dc.as_raw(), amount));
    }

    fn send_message(&self, dc: Handle, message: &EncodedMessage) -> c_int {
        self.record(EngineCall::Send {
            handle: dc.as_raw(),
            data: message.as_bytes().to_vec(),
            size: message.size(),
        });
        self.lock().send_result
    }

    fn set_user_pointer(&self, handle: Handle, user: *mut c_void) {
        self.lock().users.insert(handle.as_raw(), user as usize);
    }

    fn set_open_callback(&self, dc: Handle, callback: VoidCallback) {
        self.lock().open.insert(dc.as_raw(), callback);
    }

    fn set_error_callback(&self, dc: Handle, callback: ErrorCallback) {
        self.lock().error.insert(dc.as_raw(), callback);
    }

    fn set_message_callback(&self, dc: Handle, callback: MessageCallback) {
        self.lock().message.insert(dc.as_raw(), callback);
    }

    fn set_buffered_amount_low_callback(&self, dc: Handle, callback: VoidCallback) {
        self.lock().buffered_amount_low.insert(dc.as_raw(), callback);
    }

    fn ws_create(&self, url: &CStr) -> c_int {
        self.record(EngineCall::WsCreate(owned(url)));
        self.allocate()
    }

    fn ws_delete(&self, ws: Handle) {
        self.record(EngineCall::WsDelete(ws.as_raw()));
    }

    fn ws_send_message(&self, ws: Handle, message: &EncodedMessage) -> c_int {
        self.send_message(ws, message)
    }

    fn ws_set_user_pointer(&self, ws: Handle, user: *mut c_void) {
        self.set_user_pointer(ws, user);
    }

    fn ws_set_open_callback(&self, ws: Handle, callback: VoidCallback) {
        self.set_open_callback(ws, callback);
    }

    fn ws_set_error_callback(&self, ws: Handle, callback: ErrorCallback) {
        self.set_error_callback(ws, callback);
    }

    fn ws_set_message_callback(&self, ws: Handle, callback: MessageCallback) {
        self.set_message_callback(ws, callback);
    }
}
