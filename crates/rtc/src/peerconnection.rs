//! Peer connections and their signaling, gathering and connection state.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use rtc_abi::sys::string_arg;
use rtc_abi::{Engine, Handle, Result, RtcError};

use crate::candidate::Candidate;
use crate::channel::Slot;
use crate::configuration::Configuration;
use crate::datachannel::DataChannel;
use crate::description::Description;
use crate::registry::HandleRegistry;
use crate::reliability::Reliability;

static PEER_CONNECTIONS: LazyLock<HandleRegistry<Inner>> =
    LazyLock::new(|| HandleRegistry::new("peer connection"));

/// Connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    New = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
    Failed = 4,
    Closed = 5,
}

/// ICE gathering state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GatheringState {
    #[default]
    New = 0,
    InProgress = 1,
    Complete = 2,
}

/// Signaling state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalingState {
    #[default]
    Stable = 0,
    HaveLocalOffer = 1,
    HaveRemoteOffer = 2,
    HaveLocalPranswer = 3,
    HaveRemotePranswer = 4,
}

impl State {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => State::New,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Disconnected,
            4 => State::Failed,
            5 => State::Closed,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

impl GatheringState {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => GatheringState::New,
            1 => GatheringState::InProgress,
            2 => GatheringState::Complete,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

impl SignalingState {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => SignalingState::Stable,
            1 => SignalingState::HaveLocalOffer,
            2 => SignalingState::HaveRemoteOffer,
            3 => SignalingState::HaveLocalPranswer,
            4 => SignalingState::HaveRemotePranswer,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::New => "new",
            State::Connecting => "connecting",
            State::Connected => "connected",
            State::Disconnected => "disconnected",
            State::Failed => "failed",
            State::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatheringState::New => "new",
            GatheringState::InProgress => "in-progress",
            GatheringState::Complete => "complete",
        };
        f.write_str(s)
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct States {
    connection: State,
    gathering: GatheringState,
    signaling: SignalingState,
}

type DataChannelFn = dyn Fn(DataChannel) + Send + Sync;
type DescriptionFn = dyn Fn(Description) + Send + Sync;
type CandidateFn = dyn Fn(Candidate) + Send + Sync;
type StateFn = dyn Fn(State) + Send + Sync;
type GatheringStateFn = dyn Fn(GatheringState) + Send + Sync;
type SignalingStateFn = dyn Fn(SignalingState) + Send + Sync;

/// A connection to one remote peer.
///
/// Owns its engine handle for its whole lifetime: dropping the connection
/// stops its callbacks and releases the handle.
pub struct PeerConnection {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    handle: Handle,
    /// Cleared when the handle turned out to belong to another connection.
    owned: AtomicBool,
    states: Mutex<States>,
    on_data_channel: Slot<DataChannelFn>,
    on_local_description: Slot<DescriptionFn>,
    on_local_candidate: Slot<CandidateFn>,
    on_state_change: Slot<StateFn>,
    on_gathering_state_change: Slot<GatheringStateFn>,
    on_signaling_state_change: Slot<SignalingStateFn>,
}

impl PeerConnection {
    /// Creates a peer connection.
    ///
    /// Fails with [`RtcError::Unsupported`] when the engine has no WebRTC
    /// support, and with [`RtcError::InteriorNul`] for an ICE server URL the
    /// ABI cannot carry.
    pub fn new(engine: Arc<dyn Engine>, config: &Configuration) -> Result<Self> {
        let urls = config
            .ice_server_urls()
            .into_iter()
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let url_args: Vec<&CStr> = urls.iter().map(CString::as_c_str).collect();

        let handle = Handle::from_raw(engine.create_peer_connection(&url_args))
            .ok_or(RtcError::Unsupported("WebRTC"))?;

        let inner = Arc::new(Inner {
            engine,
            handle,
            owned: AtomicBool::new(true),
            states: Mutex::new(States::default()),
            on_data_channel: Slot::new(),
            on_local_description: Slot::new(),
            on_local_candidate: Slot::new(),
            on_state_change: Slot::new(),
            on_gathering_state_change: Slot::new(),
            on_signaling_state_change: Slot::new(),
        });

        if let Err(err) = PEER_CONNECTIONS.bind(handle, Arc::downgrade(&inner)) {
            // Deleting would release the live owner's connection instead.
            tracing::warn!(
                %handle,
                "Engine reissued a live peer connection handle; leaking it"
            );
            inner.owned.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let engine = &inner.engine;
        engine.set_user_pointer(handle, handle.as_user_pointer());
        engine.set_data_channel_callback(handle, data_channel_trampoline);
        engine.set_local_description_callback(handle, local_description_trampoline);
        engine.set_local_candidate_callback(handle, local_candidate_trampoline);
        engine.set_state_change_callback(handle, state_change_trampoline);
        engine.set_gathering_state_change_callback(handle, gathering_state_change_trampoline);
        engine.set_signaling_state_change_callback(handle, signaling_state_change_trampoline);

        tracing::debug!(
            %handle,
            ice_servers = config.ice_servers.len(),
            "Peer connection created"
        );
        Ok(Self { inner })
    }

    /// The engine handle.
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Creates a reliable, ordered data channel.
    pub fn create_data_channel(&self, label: &str) -> Result<DataChannel> {
        self.create_data_channel_with(label, Reliability::reliable())
    }

    /// Creates a data channel with the given reliability.
    ///
    /// The channel is returned immediately and opens once the engine reports
    /// it open.
    pub fn create_data_channel_with(
        &self,
        label: &str,
        reliability: Reliability,
    ) -> Result<DataChannel> {
        let label_arg = CString::new(label)?;
        let engine = &self.inner.engine;
        let raw = engine.create_data_channel(self.inner.handle, &label_arg, reliability.to_flags());
        let handle = Handle::from_raw(raw).ok_or(RtcError::Unsupported("data channel"))?;
        DataChannel::from_handle(Arc::clone(engine), handle, reliability)
    }

    /// Applies a remote description. Outcomes arrive through callbacks.
    pub fn set_remote_description(&self, description: &Description) {
        let (Ok(sdp), Ok(kind)) = (
            CString::new(description.sdp()),
            CString::new(description.type_string()),
        ) else {
            tracing::warn!(handle = %self.inner.handle, "Dropping remote description with NUL byte");
            return;
        };
        self.inner
            .engine
            .set_remote_description(self.inner.handle, &sdp, &kind);
    }

    /// Adds a remote ICE candidate. Outcomes arrive through callbacks.
    pub fn add_remote_candidate(&self, candidate: &Candidate) {
        let (Ok(line), Ok(mid)) = (
            CString::new(candidate.candidate()),
            CString::new(candidate.mid()),
        ) else {
            tracing::warn!(handle = %self.inner.handle, "Dropping remote candidate with NUL byte");
            return;
        };
        self.inner
            .engine
            .add_remote_candidate(self.inner.handle, &line, &mid);
    }

    /// The current local description, if the engine has both its SDP and type.
    pub fn local_description(&self) -> Option<Description> {
        let engine = &self.inner.engine;
        let sdp = engine.local_description_sdp(self.inner.handle);
        let kind = engine.local_description_type(self.inner.handle);
        match (sdp, kind) {
            (Some(sdp), Some(kind)) => Some(Description::with_type_string(
                sdp.to_string_lossy(),
                kind.to_string_lossy(),
            )),
            _ => None,
        }
    }

    /// The last connection state reported by the engine.
    pub fn state(&self) -> State {
        self.inner.states().connection
    }

    /// The last ICE gathering state reported by the engine.
    pub fn gathering_state(&self) -> GatheringState {
        self.inner.states().gathering
    }

    /// The last signaling state reported by the engine.
    pub fn signaling_state(&self) -> SignalingState {
        self.inner.states().signaling
    }

    /// Receives data channels opened by the remote peer.
    ///
    /// Remote channels announced while no callback is registered are closed.
    pub fn on_data_channel(&self, callback: impl Fn(DataChannel) + Send + Sync + 'static) {
        self.inner.on_data_channel.set(Arc::new(callback));
    }

    /// Receives local descriptions to forward to the remote peer.
    pub fn on_local_description(&self, callback: impl Fn(Description) + Send + Sync + 'static) {
        self.inner.on_local_description.set(Arc::new(callback));
    }

    /// Receives local candidates to forward to the remote peer.
    pub fn on_local_candidate(&self, callback: impl Fn(Candidate) + Send + Sync + 'static) {
        self.inner.on_local_candidate.set(Arc::new(callback));
    }

    pub fn on_state_change(&self, callback: impl Fn(State) + Send + Sync + 'static) {
        self.inner.on_state_change.set(Arc::new(callback));
    }

    pub fn on_gathering_state_change(
        &self,
        callback: impl Fn(GatheringState) + Send + Sync + 'static,
    ) {
        self.inner.on_gathering_state_change.set(Arc::new(callback));
    }

    pub fn on_signaling_state_change(
        &self,
        callback: impl Fn(SignalingState) + Send + Sync + 'static,
    ) {
        self.inner.on_signaling_state_change.set(Arc::new(callback));
    }
}

impl Inner {
    fn states(&self) -> MutexGuard<'_, States> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.owned.load(Ordering::SeqCst) {
            PEER_CONNECTIONS.unbind(self.handle);
            self.engine.delete_peer_connection(self.handle);
            tracing::debug!(handle = %self.handle, "Peer connection deleted");
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states = *self.inner.states();
        f.debug_struct("PeerConnection")
            .field("handle", &self.inner.handle)
            .field("state", &states.connection)
            .field("gathering_state", &states.gathering)
            .field("signaling_state", &states.signaling)
            .finish()
    }
}

fn resolve(user: *mut c_void) -> Option<Arc<Inner>> {
    let handle = Handle::from_user_pointer(user)?;
    let pc = PEER_CONNECTIONS.resolve(handle);
    if pc.is_none() {
        tracing::trace!(%handle, "Dropping callback for unbound peer connection");
    }
    pc
}

unsafe extern "C" fn data_channel_trampoline(dc: c_int, user: *mut c_void) {
    let Some(pc) = resolve(user) else { return };
    let Some(dc) = Handle::from_raw(dc) else {
        tracing::warn!(pc = %pc.handle, raw = dc, "Ignoring remote data channel without handle");
        return;
    };

    let channel = match DataChannel::from_handle(Arc::clone(&pc.engine), dc, Reliability::default()) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::warn!(pc = %pc.handle, %dc, error = %err, "Failed to wrap remote data channel");
            return;
        }
    };

    match pc.on_data_channel.get() {
        Some(callback) => callback(channel),
        None => tracing::debug!(pc = %pc.handle, %dc, "No data channel callback; closing channel"),
    }
}

unsafe extern "C" fn local_description_trampoline(
    sdp: *const c_char,
    kind: *const c_char,
    user: *mut c_void,
) {
    let Some(pc) = resolve(user) else { return };
    let (Some(sdp), Some(kind)) = (string_arg(sdp), string_arg(kind)) else {
        tracing::warn!(handle = %pc.handle, "Ignoring incomplete local description");
        return;
    };
    if let Some(callback) = pc.on_local_description.get() {
        callback(Description::with_type_string(sdp, kind));
    }
}

unsafe extern "C" fn local_candidate_trampoline(
    candidate: *const c_char,
    mid: *const c_char,
    user: *mut c_void,
) {
    let Some(pc) = resolve(user) else { return };
    let Some(candidate) = string_arg(candidate) else {
        tracing::warn!(handle = %pc.handle, "Ignoring local candidate without candidate line");
        return;
    };
    let mid = string_arg(mid).unwrap_or_default();
    if let Some(callback) = pc.on_local_candidate.get() {
        callback(Candidate::new(candidate, mid));
    }
}

unsafe extern "C" fn state_change_trampoline(raw: c_int, user: *mut c_void) {
    let Some(pc) = resolve(user) else { return };
    let Some(state) = State::from_raw(raw) else {
        tracing::warn!(handle = %pc.handle, raw, "Unknown connection state");
        return;
    };
    pc.states().connection = state;
    tracing::debug!(handle = %pc.handle, %state, "Connection state changed");
    if let Some(callback) = pc.on_state_change.get() {
        callback(state);
    }
}

unsafe extern "C" fn gathering_state_change_trampoline(raw: c_int, user: *mut c_void) {
    let Some(pc) = resolve(user) else { return };
    let Some(state) = GatheringState::from_raw(raw) else {
        tracing::warn!(handle = %pc.handle, raw, "Unknown gathering state");
        return;
    };
    pc.states().gathering = state;
    if let Some(callback) = pc.on_gathering_state_change.get() {
        callback(state);
    }
}

unsafe extern "C" fn signaling_state_change_trampoline(raw: c_int, user: *mut c_void) {
    let Some(pc) = resolve(user) else { return };
    let Some(state) = SignalingState::from_raw(raw) else {
        tracing::warn!(handle = %pc.handle, raw, "Unknown signaling state");
        return;
    };
    pc.states().signaling = state;
    if let Some(callback) = pc.on_signaling_state_change.get() {
        callback(state);
    }
}
