//! An in-process engine.
//!
//! [`LoopbackEngine`] implements the full engine ABI without any network:
//! peer connections created on the same engine negotiate with each other
//! through the descriptions they exchange, data channels deliver to their
//! remote counterpart, and web sockets to `ws://`/`wss://` URLs echo every
//! message back.
//!
//! Notifications are queued and delivered one at a time, in order, by
//! [`LoopbackEngine::run_until_idle`] on the calling thread. No lock is held
//! while a callback runs, so callbacks may call back into the engine.

use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rtc_abi::sys::{
    CandidateCallback, DataChannelCallback, DescriptionCallback, ErrorCallback, MessageCallback,
    StateCallback, VoidCallback,
};
use rtc_abi::{EncodedMessage, Engine, EngineString, Handle, ReliabilityFlags, TEXT_SIZE_SENTINEL};

use crate::datachannel::copy_label;
use crate::peerconnection::{GatheringState, SignalingState, State as ConnectionState};

/// Handles are unique across every loopback engine in the process.
static NEXT_HANDLE: AtomicI32 = AtomicI32::new(1);

fn next_handle() -> c_int {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// The in-process engine. See the module documentation.
#[derive(Default)]
pub struct LoopbackEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    peers: HashMap<c_int, PeerRecord>,
    channels: HashMap<c_int, ChannelRecord>,
    sockets: HashMap<c_int, SocketRecord>,
    queue: VecDeque<Event>,
    unsupported: bool,
}

#[derive(Default)]
struct PeerRecord {
    user: usize,
    ice_servers: Vec<String>,
    /// Local description as `(sdp, type)`.
    local: Option<(String, String)>,
    remote: Option<c_int>,
    connected: bool,
    channels: Vec<c_int>,
    remote_candidates: usize,
    on_data_channel: Option<DataChannelCallback>,
    on_description: Option<DescriptionCallback>,
    on_candidate: Option<CandidateCallback>,
    on_state: Option<StateCallback>,
    on_gathering: Option<StateCallback>,
    on_signaling: Option<StateCallback>,
}

struct ChannelRecord {
    user: usize,
    pc: c_int,
    label: String,
    reliability: ReliabilityFlags,
    /// The counterpart channel on the remote peer, once announced.
    peer: Option<c_int>,
    open: bool,
    buffered: usize,
    threshold: usize,
    on_open: Option<VoidCallback>,
    on_error: Option<ErrorCallback>,
    on_message: Option<MessageCallback>,
    on_buffered_amount_low: Option<VoidCallback>,
}

impl ChannelRecord {
    fn new(pc: c_int, label: String, reliability: ReliabilityFlags, peer: Option<c_int>) -> Self {
        Self {
            user: 0,
            pc,
            label,
            reliability,
            peer,
            open: false,
            buffered: 0,
            threshold: 0,
            on_open: None,
            on_error: None,
            on_message: None,
            on_buffered_amount_low: None,
        }
    }
}

#[derive(Default)]
struct SocketRecord {
    user: usize,
    url: String,
    open: bool,
    on_open: Option<VoidCallback>,
    on_error: Option<ErrorCallback>,
    on_message: Option<MessageCallback>,
}

/// A copied message payload.
#[derive(Debug, Clone)]
enum Payload {
    Binary(Vec<u8>),
    Text(CString),
}

impl Payload {
    fn copy_of(message: &EncodedMessage) -> Self {
        if message.is_text() {
            Payload::Text(cstring(&String::from_utf8_lossy(message.as_bytes())))
        } else {
            Payload::Binary(message.as_bytes().to_vec())
        }
    }

    fn len(&self) -> usize {
        match self {
            Payload::Binary(data) => data.len(),
            Payload::Text(text) => text.as_bytes().len(),
        }
    }
}

#[derive(Debug)]
enum Event {
    Signaling { pc: c_int, state: SignalingState },
    Gathering { pc: c_int, state: GatheringState },
    Connection { pc: c_int, state: ConnectionState },
    Description { pc: c_int, sdp: String, kind: String },
    Candidate { pc: c_int, candidate: String, mid: String },
    DataChannel { pc: c_int, dc: c_int },
    ChannelOpen { dc: c_int },
    ChannelError { dc: c_int, reason: String },
    Deliver { from: c_int, to: c_int, payload: Payload },
    ChannelClosed { dc: c_int },
    BufferedAmountLow { dc: c_int },
    SocketOpen { ws: c_int },
    SocketEcho { ws: c_int, payload: Payload },
    SocketError { ws: c_int, reason: String },
    SocketClosed { ws: c_int },
}

/// A callback ready to run, with owned copies of its arguments.
enum Call {
    Void(VoidCallback, usize),
    Error(ErrorCallback, CString, usize),
    Message(MessageCallback, Option<Payload>, usize),
    DataChannel(DataChannelCallback, c_int, usize),
    Description(DescriptionCallback, CString, CString, usize),
    Candidate(CandidateCallback, CString, CString, usize),
    State(StateCallback, c_int, usize),
}

impl Call {
    /// Runs the callback.
    ///
    /// # Safety
    ///
    /// The callback must accept the user pointer it was registered with.
    unsafe fn invoke(self) {
        match self {
            Call::Void(callback, user) => callback(user as *mut c_void),
            Call::Error(callback, reason, user) => callback(reason.as_ptr(), user as *mut c_void),
            Call::Message(callback, Some(Payload::Binary(data)), user) => {
                let size = c_int::try_from(data.len()).unwrap_or(c_int::MAX);
                callback(data.as_ptr().cast::<c_char>(), size, user as *mut c_void)
            }
            Call::Message(callback, Some(Payload::Text(text)), user) => {
                callback(text.as_ptr(), TEXT_SIZE_SENTINEL, user as *mut c_void)
            }
            Call::Message(callback, None, user) => {
                callback(std::ptr::null(), 0, user as *mut c_void)
            }
            Call::DataChannel(callback, dc, user) => callback(dc, user as *mut c_void),
            Call::Description(callback, sdp, kind, user) => {
                callback(sdp.as_ptr(), kind.as_ptr(), user as *mut c_void)
            }
            Call::Candidate(callback, candidate, mid, user) => {
                callback(candidate.as_ptr(), mid.as_ptr(), user as *mut c_void)
            }
            Call::State(callback, state, user) => callback(state, user as *mut c_void),
        }
    }
}

/// Strings produced by this engine never contain NUL; anything that does is
/// cut at the first NUL.
fn cstring(value: &str) -> CString {
    let end = value.find('\0').unwrap_or(value.len());
    CString::new(&value[..end]).unwrap_or_default()
}

fn owned(value: &CStr) -> String {
    value.to_string_lossy().into_owned()
}

/// The opaque SDP for `pc`. The origin line carries the handle so that the
/// answering side can find the offerer.
fn session_description(pc: c_int) -> String {
    format!(
        "v=0\r\n\
         o=- {pc} 0 IN IP4 127.0.0.1\r\n\
         s=-\r\n\
         t=0 0\r\n\
         m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=mid:0\r\n\
         a=sctp-port:5000\r\n"
    )
}

fn parse_origin(sdp: &str) -> Option<c_int> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o="))
        .and_then(|origin| origin.split_whitespace().nth(1))
        .and_then(|session| session.parse().ok())
}

impl State {
    fn push(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Queues the host candidate gathering sequence for `pc`.
    fn gather(&mut self, pc: c_int) {
        let port = 50_000 + pc.rem_euclid(10_000);
        self.push(Event::Gathering {
            pc,
            state: GatheringState::InProgress,
        });
        self.push(Event::Candidate {
            pc,
            candidate: format!("candidate:1 1 UDP 2122252543 127.0.0.1 {port} typ host"),
            mid: "0".to_string(),
        });
        self.push(Event::Gathering {
            pc,
            state: GatheringState::Complete,
        });
    }

    fn create_offer(&mut self, pc: c_int) {
        let sdp = session_description(pc);
        if let Some(peer) = self.peers.get_mut(&pc) {
            peer.local = Some((sdp.clone(), "offer".to_string()));
        }
        self.push(Event::Signaling {
            pc,
            state: SignalingState::HaveLocalOffer,
        });
        self.push(Event::Description {
            pc,
            sdp,
            kind: "offer".to_string(),
        });
        self.gather(pc);
    }

    fn accept_offer(&mut self, pc: c_int, remote: c_int) {
        let sdp = session_description(pc);
        if let Some(peer) = self.peers.get_mut(&pc) {
            peer.remote = Some(remote);
            peer.local = Some((sdp.clone(), "answer".to_string()));
        }
        self.push(Event::Signaling {
            pc,
            state: SignalingState::HaveRemoteOffer,
        });
        self.push(Event::Signaling {
            pc,
            state: SignalingState::Stable,
        });
        self.push(Event::Description {
            pc,
            sdp,
            kind: "answer".to_string(),
        });
        self.gather(pc);
        self.push(Event::Connection {
            pc,
            state: ConnectionState::Connecting,
        });
    }

    fn accept_answer(&mut self, pc: c_int, remote: c_int) {
        self.push(Event::Signaling {
            pc,
            state: SignalingState::Stable,
        });
        self.push(Event::Connection {
            pc,
            state: ConnectionState::Connecting,
        });

        for (this, other) in [(pc, remote), (remote, pc)] {
            if let Some(peer) = self.peers.get_mut(&this) {
                peer.remote = Some(other);
                peer.connected = true;
            }
            self.push(Event::Connection {
                pc: this,
                state: ConnectionState::Connected,
            });
        }

        let pending: Vec<c_int> = [pc, remote]
            .iter()
            .filter_map(|p| self.peers.get(p))
            .flat_map(|peer| peer.channels.iter().copied())
            .filter(|dc| self.channels.get(dc).is_some_and(|c| c.peer.is_none()))
            .collect();
        for dc in pending {
            self.announce(dc);
        }
    }

    /// Creates the remote counterpart of `dc` and queues its announcement.
    fn announce(&mut self, dc: c_int) {
        let Some(channel) = self.channels.get(&dc) else {
            return;
        };
        let Some(remote_pc) = self.peers.get(&channel.pc).and_then(|p| p.remote) else {
            return;
        };
        if !self.peers.contains_key(&remote_pc) {
            return;
        }

        let remote_dc = next_handle();
        let record = ChannelRecord::new(
            remote_pc,
            channel.label.clone(),
            channel.reliability,
            Some(dc),
        );
        self.channels.insert(remote_dc, record);
        if let Some(channel) = self.channels.get_mut(&dc) {
            channel.peer = Some(remote_dc);
        }
        if let Some(peer) = self.peers.get_mut(&remote_pc) {
            peer.channels.push(remote_dc);
        }

        tracing::trace!(dc, remote_dc, remote_pc, "Announcing data channel");
        self.push(Event::DataChannel {
            pc: remote_pc,
            dc: remote_dc,
        });
        self.push(Event::ChannelOpen { dc });
        self.push(Event::ChannelOpen { dc: remote_dc });
    }

    fn remove_channel(&mut self, dc: c_int) {
        let Some(channel) = self.channels.remove(&dc) else {
            return;
        };
        if let Some(peer) = self.peers.get_mut(&channel.pc) {
            peer.channels.retain(|&c| c != dc);
        }
        if let Some(counterpart) = channel.peer {
            if let Some(other) = self.channels.get_mut(&counterpart) {
                other.peer = None;
                self.queue.push_back(Event::ChannelClosed { dc: counterpart });
            }
        }
    }

    /// Applies the side effects of `event` and prepares its callback, if the
    /// target still exists and has one registered.
    fn dispatch(&mut self, event: Event) -> Option<Call> {
        match event {
            Event::Signaling { pc, state } => {
                let peer = self.peers.get(&pc)?;
                Some(Call::State(peer.on_signaling?, state.as_raw(), peer.user))
            }
            Event::Gathering { pc, state } => {
                let peer = self.peers.get(&pc)?;
                Some(Call::State(peer.on_gathering?, state.as_raw(), peer.user))
            }
            Event::Connection { pc, state } => {
                let peer = self.peers.get(&pc)?;
                Some(Call::State(peer.on_state?, state.as_raw(), peer.user))
            }
            Event::Description { pc, sdp, kind } => {
                let peer = self.peers.get(&pc)?;
                Some(Call::Description(
                    peer.on_description?,
                    cstring(&sdp),
                    cstring(&kind),
                    peer.user,
                ))
            }
            Event::Candidate { pc, candidate, mid } => {
                let peer = self.peers.get(&pc)?;
                Some(Call::Candidate(
                    peer.on_candidate?,
                    cstring(&candidate),
                    cstring(&mid),
                    peer.user,
                ))
            }
            Event::DataChannel { pc, dc } => {
                if !self.channels.contains_key(&dc) {
                    return None;
                }
                let peer = self.peers.get(&pc)?;
                Some(Call::DataChannel(peer.on_data_channel?, dc, peer.user))
            }
            Event::ChannelOpen { dc } => {
                let channel = self.channels.get_mut(&dc)?;
                channel.open = true;
                Some(Call::Void(channel.on_open?, channel.user))
            }
            Event::ChannelError { dc, reason } => {
                let channel = self.channels.get(&dc)?;
                Some(Call::Error(channel.on_error?, cstring(&reason), channel.user))
            }
            Event::Deliver { from, to, payload } => {
                if let Some(sender) = self.channels.get_mut(&from) {
                    let before = sender.buffered;
                    sender.buffered = before.saturating_sub(payload.len());
                    let crossed = before > sender.threshold && sender.buffered <= sender.threshold;
                    if crossed {
                        self.queue.push_back(Event::BufferedAmountLow { dc: from });
                    }
                }
                let target = self.channels.get(&to)?;
                Some(Call::Message(target.on_message?, Some(payload), target.user))
            }
            Event::ChannelClosed { dc } => {
                let channel = self.channels.get_mut(&dc)?;
                channel.open = false;
                Some(Call::Message(channel.on_message?, None, channel.user))
            }
            Event::BufferedAmountLow { dc } => {
                let channel = self.channels.get(&dc)?;
                Some(Call::Void(channel.on_buffered_amount_low?, channel.user))
            }
            Event::SocketOpen { ws } => {
                let socket = self.sockets.get_mut(&ws)?;
                socket.open = true;
                Some(Call::Void(socket.on_open?, socket.user))
            }
            Event::SocketEcho { ws, payload } => {
                let socket = self.sockets.get(&ws)?;
                Some(Call::Message(socket.on_message?, Some(payload), socket.user))
            }
            Event::SocketError { ws, reason } => {
                let socket = self.sockets.get(&ws)?;
                Some(Call::Error(socket.on_error?, cstring(&reason), socket.user))
            }
            Event::SocketClosed { ws } => {
                let socket = self.sockets.get_mut(&ws)?;
                socket.open = false;
                Some(Call::Message(socket.on_message?, None, socket.user))
            }
        }
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every creation call fail, as on a host without WebRTC or
    /// WebSocket support.
    pub fn set_unsupported(&self, unsupported: bool) {
        self.lock().unsupported = unsupported;
    }

    /// Number of queued notifications.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Delivers queued notifications until the queue is empty, including
    /// notifications queued by the callbacks themselves. Returns the number of
    /// callbacks run.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while self.step() {
            delivered += 1;
        }
        delivered
    }

    /// Delivers the next notification that has a callback. Returns false once
    /// the queue is empty.
    pub fn step(&self) -> bool {
        let call = {
            let mut state = self.lock();
            let mut call = None;
            while let Some(event) = state.queue.pop_front() {
                call = state.dispatch(event);
                if call.is_some() {
                    break;
                }
            }
            call
        };

        match call {
            Some(call) => {
                // SAFETY: every callback was registered through the engine
                // ABI together with the user pointer stored next to it.
                unsafe { call.invoke() };
                true
            }
            None => false,
        }
    }

    /// Queues an error notification for a data channel or web socket.
    /// Returns false for an unknown handle.
    pub fn inject_error(&self, handle: Handle, reason: &str) -> bool {
        let raw = handle.as_raw();
        let mut state = self.lock();
        let event = if state.channels.contains_key(&raw) {
            Event::ChannelError {
                dc: raw,
                reason: reason.to_string(),
            }
        } else if state.sockets.contains_key(&raw) {
            Event::SocketError {
                ws: raw,
                reason: reason.to_string(),
            }
        } else {
            return false;
        };
        state.push(event);
        true
    }

    /// Queues a remote close for a web socket. Returns false for an unknown
    /// handle.
    pub fn disconnect_socket(&self, handle: Handle) -> bool {
        let ws = handle.as_raw();
        let mut state = self.lock();
        if !state.sockets.contains_key(&ws) {
            return false;
        }
        state.push(Event::SocketClosed { ws });
        true
    }

    /// The ICE server URLs a peer connection was created with.
    pub fn ice_servers(&self, pc: Handle) -> Vec<String> {
        self.lock()
            .peers
            .get(&pc.as_raw())
            .map(|peer| peer.ice_servers.clone())
            .unwrap_or_default()
    }

    /// Number of remote candidates added to a peer connection.
    pub fn remote_candidate_count(&self, pc: Handle) -> usize {
        self.lock()
            .peers
            .get(&pc.as_raw())
            .map_or(0, |peer| peer.remote_candidates)
    }

    /// Whether the engine still holds a resource for `handle`.
    pub fn is_live(&self, handle: Handle) -> bool {
        let raw = handle.as_raw();
        let state = self.lock();
        state.peers.contains_key(&raw)
            || state.channels.contains_key(&raw)
            || state.sockets.contains_key(&raw)
    }
}

impl Engine for LoopbackEngine {
    fn create_peer_connection(&self, ice_servers: &[&CStr]) -> c_int {
        let mut state = self.lock();
        if state.unsupported {
            return 0;
        }
        let pc = next_handle();
        state.peers.insert(
            pc,
            PeerRecord {
                ice_servers: ice_servers.iter().map(|s| owned(s)).collect(),
                ..PeerRecord::default()
            },
        );
        tracing::debug!(pc, "Loopback peer connection created");
        pc
    }

    fn delete_peer_connection(&self, pc: Handle) {
        let pc = pc.as_raw();
        let mut state = self.lock();
        let Some(peer) = state.peers.remove(&pc) else {
            return;
        };
        for dc in peer.channels {
            state.remove_channel(dc);
        }
        if let Some(remote) = peer.remote {
            let notify = match state.peers.get_mut(&remote) {
                Some(other) if other.remote == Some(pc) => {
                    other.remote = None;
                    other.connected = false;
                    true
                }
                _ => false,
            };
            if notify {
                state.push(Event::Connection {
                    pc: remote,
                    state: ConnectionState::Disconnected,
                });
            }
        }
        tracing::debug!(pc, "Loopback peer connection deleted");
    }

    fn local_description_sdp(&self, pc: Handle) -> Option<EngineString> {
        let state = self.lock();
        let (sdp, _) = state.peers.get(&pc.as_raw())?.local.as_ref()?;
        EngineString::from_string(sdp)
    }

    fn local_description_type(&self, pc: Handle) -> Option<EngineString> {
        let state = self.lock();
        let (_, kind) = state.peers.get(&pc.as_raw())?.local.as_ref()?;
        EngineString::from_string(kind)
    }

    fn set_remote_description(&self, pc: Handle, sdp: &CStr, kind: &CStr) {
        let pc = pc.as_raw();
        let sdp = owned(sdp);
        let mut state = self.lock();

        let Some(remote) = parse_origin(&sdp) else {
            tracing::warn!(pc, "Remote description has no loopback origin");
            return;
        };
        if remote == pc || !state.peers.contains_key(&pc) || !state.peers.contains_key(&remote) {
            tracing::trace!(pc, remote, "Ignoring description for unknown peers");
            return;
        }

        match kind.to_bytes() {
            b"offer" => state.accept_offer(pc, remote),
            b"answer" => state.accept_answer(pc, remote),
            other => {
                tracing::trace!(pc, kind = %String::from_utf8_lossy(other), "Ignoring description type");
            }
        }
    }

    fn add_remote_candidate(&self, pc: Handle, candidate: &CStr, _mid: &CStr) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.remote_candidates += 1;
            tracing::trace!(pc = %pc, candidate = %candidate.to_string_lossy(), "Remote candidate added");
        }
    }

    fn set_data_channel_callback(&self, pc: Handle, callback: DataChannelCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_data_channel = Some(callback);
        }
    }

    fn set_local_description_callback(&self, pc: Handle, callback: DescriptionCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_description = Some(callback);
        }
    }

    fn set_local_candidate_callback(&self, pc: Handle, callback: CandidateCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_candidate = Some(callback);
        }
    }

    fn set_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_state = Some(callback);
        }
    }

    fn set_gathering_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_gathering = Some(callback);
        }
    }

    fn set_signaling_state_change_callback(&self, pc: Handle, callback: StateCallback) {
        if let Some(peer) = self.lock().peers.get_mut(&pc.as_raw()) {
            peer.on_signaling = Some(callback);
        }
    }

    fn create_data_channel(&self, pc: Handle, label: &CStr, reliability: ReliabilityFlags) -> c_int {
        let pc = pc.as_raw();
        let mut state = self.lock();
        if state.unsupported {
            return 0;
        }
        let Some(peer) = state.peers.get_mut(&pc) else {
            return 0;
        };

        let dc = next_handle();
        peer.channels.push(dc);
        let connected = peer.connected;
        let needs_offer = peer.local.is_none();
        state
            .channels
            .insert(dc, ChannelRecord::new(pc, owned(label), reliability, None));

        if connected {
            state.announce(dc);
        } else if needs_offer {
            state.create_offer(pc);
        }
        dc
    }

    fn delete_data_channel(&self, dc: Handle) {
        self.lock().remove_channel(dc.as_raw());
    }

    fn data_channel_label(&self, dc: Handle, buffer: &mut [u8]) -> c_int {
        match self.lock().channels.get(&dc.as_raw()) {
            Some(channel) => copy_label(&channel.label, buffer),
            None => -1,
        }
    }

    fn buffered_amount(&self, dc: Handle) -> c_int {
        match self.lock().channels.get(&dc.as_raw()) {
            Some(channel) => c_int::try_from(channel.buffered).unwrap_or(c_int::MAX),
            None => -1,
        }
    }

    fn set_buffered_amount_low_threshold(&self, dc: Handle, amount: c_int) {
        if let Some(channel) = self.lock().channels.get_mut(&dc.as_raw()) {
            channel.threshold = usize::try_from(amount).unwrap_or(0);
        }
    }

    fn send_message(&self, dc: Handle, message: &EncodedMessage) -> c_int {
        let from = dc.as_raw();
        let mut state = self.lock();
        let Some(channel) = state.channels.get_mut(&from) else {
            return -1;
        };
        let Some(to) = channel.peer.filter(|_| channel.open) else {
            return -1;
        };

        let payload = Payload::copy_of(message);
        let size = payload.len();
        channel.buffered += size;
        state.push(Event::Deliver { from, to, payload });
        c_int::try_from(size).unwrap_or(c_int::MAX)
    }

    fn set_user_pointer(&self, handle: Handle, user: *mut c_void) {
        let raw = handle.as_raw();
        let mut state = self.lock();
        if let Some(peer) = state.peers.get_mut(&raw) {
            peer.user = user as usize;
        } else if let Some(channel) = state.channels.get_mut(&raw) {
            channel.user = user as usize;
        }
    }

    fn set_open_callback(&self, dc: Handle, callback: VoidCallback) {
        if let Some(channel) = self.lock().channels.get_mut(&dc.as_raw()) {
            channel.on_open = Some(callback);
        }
    }

    fn set_error_callback(&self, dc: Handle, callback: ErrorCallback) {
        if let Some(channel) = self.lock().channels.get_mut(&dc.as_raw()) {
            channel.on_error = Some(callback);
        }
    }

    fn set_message_callback(&self, dc: Handle, callback: MessageCallback) {
        if let Some(channel) = self.lock().channels.get_mut(&dc.as_raw()) {
            channel.on_message = Some(callback);
        }
    }

    fn set_buffered_amount_low_callback(&self, dc: Handle, callback: VoidCallback) {
        if let Some(channel) = self.lock().channels.get_mut(&dc.as_raw()) {
            channel.on_buffered_amount_low = Some(callback);
        }
    }

    fn ws_create(&self, url: &CStr) -> c_int {
        let mut state = self.lock();
        if state.unsupported {
            return 0;
        }
        let url = owned(url);
        match url::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {}
            _ => {
                tracing::debug!(%url, "Loopback web socket refused URL");
                return 0;
            }
        }

        let ws = next_handle();
        state.sockets.insert(
            ws,
            SocketRecord {
                url,
                ..SocketRecord::default()
            },
        );
        state.push(Event::SocketOpen { ws });
        ws
    }

    fn ws_delete(&self, ws: Handle) {
        if let Some(socket) = self.lock().sockets.remove(&ws.as_raw()) {
            tracing::debug!(ws = %ws, url = %socket.url, "Loopback web socket deleted");
        }
    }

    fn ws_send_message(&self, ws: Handle, message: &EncodedMessage) -> c_int {
        let ws = ws.as_raw();
        let mut state = self.lock();
        if !state.sockets.get(&ws).is_some_and(|s| s.open) {
            return -1;
        }
        let payload = Payload::copy_of(message);
        let size = payload.len();
        state.push(Event::SocketEcho { ws, payload });
        c_int::try_from(size).unwrap_or(c_int::MAX)
    }

    fn ws_set_user_pointer(&self, ws: Handle, user: *mut c_void) {
        if let Some(socket) = self.lock().sockets.get_mut(&ws.as_raw()) {
            socket.user = user as usize;
        }
    }

    fn ws_set_open_callback(&self, ws: Handle, callback: VoidCallback) {
        if let Some(socket) = self.lock().sockets.get_mut(&ws.as_raw()) {
            socket.on_open = Some(callback);
        }
    }

    fn ws_set_error_callback(&self, ws: Handle, callback: ErrorCallback) {
        if let Some(socket) = self.lock().sockets.get_mut(&ws.as_raw()) {
            socket.on_error = Some(callback);
        }
    }

    fn ws_set_message_callback(&self, ws: Handle, callback: MessageCallback) {
        if let Some(socket) = self.lock().sockets.get_mut(&ws.as_raw()) {
            socket.on_message = Some(callback);
        }
    }
}
