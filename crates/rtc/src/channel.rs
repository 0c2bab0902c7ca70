//! The channel capability shared by data channels and web sockets.
//!
//! Every concrete channel embeds an [`EventSink`] holding at most one callback
//! per event kind, and implements the small [`Channel`] trait for the parts
//! that differ per transport (sending, closing, backpressure).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use rtc_abi::{Handle, Message, Result};

type VoidFn = dyn Fn() + Send + Sync;
type ErrorFn = dyn Fn(String) + Send + Sync;
type MessageFn = dyn Fn(Message) + Send + Sync;

/// One replaceable callback.
pub(crate) struct Slot<F: ?Sized>(Mutex<Option<Arc<F>>>);

impl<F: ?Sized> Slot<F> {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<F>>> {
        // The slot only holds an `Option<Arc<_>>`, which a panicking callback
        // cannot leave half-written.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, callback: Arc<F>) {
        *self.lock() = Some(callback);
    }

    /// Clones the callback out so it runs without the lock held.
    pub(crate) fn get(&self) -> Option<Arc<F>> {
        self.lock().clone()
    }

    pub(crate) fn clear(&self) {
        *self.lock() = None;
    }
}

/// Event callbacks of a channel.
///
/// Registering a callback replaces the previous one for that event. Triggers
/// are synchronous and silently do nothing when no callback is registered.
/// A callback may register callbacks, close its channel, or trigger further
/// events while it runs.
pub struct EventSink {
    open: Slot<VoidFn>,
    closed: Slot<VoidFn>,
    error: Slot<ErrorFn>,
    message: Slot<MessageFn>,
    buffered_amount_low: Slot<VoidFn>,
}

impl EventSink {
    /// Creates a sink with no callbacks.
    pub fn new() -> Self {
        Self {
            open: Slot::new(),
            closed: Slot::new(),
            error: Slot::new(),
            message: Slot::new(),
            buffered_amount_low: Slot::new(),
        }
    }

    /// Sets the open callback.
    pub fn set_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.open.set(Arc::new(callback));
    }

    /// Sets the closed callback.
    pub fn set_closed(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.closed.set(Arc::new(callback));
    }

    /// Sets the error callback.
    pub fn set_error(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        self.error.set(Arc::new(callback));
    }

    /// Sets the message callback.
    pub fn set_message(&self, callback: impl Fn(Message) + Send + Sync + 'static) {
        self.message.set(Arc::new(callback));
    }

    /// Sets one callback for binary and one for text messages.
    ///
    /// Both are wrapped into a single message callback; exactly one of them
    /// runs per message.
    pub fn set_binary_or_text(
        &self,
        on_binary: impl Fn(Bytes) + Send + Sync + 'static,
        on_text: impl Fn(String) + Send + Sync + 'static,
    ) {
        self.set_message(move |message| match message {
            Message::Binary(data) => on_binary(data),
            Message::Text(text) => on_text(text),
        });
    }

    /// Sets the buffered-amount-low callback.
    pub fn set_buffered_amount_low(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.buffered_amount_low.set(Arc::new(callback));
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.open.clear();
        self.closed.clear();
        self.error.clear();
        self.message.clear();
        self.buffered_amount_low.clear();
    }

    /// Runs the open callback.
    pub fn trigger_open(&self) {
        if let Some(callback) = self.open.get() {
            callback();
        }
    }

    /// Runs the closed callback.
    pub fn trigger_closed(&self) {
        if let Some(callback) = self.closed.get() {
            callback();
        }
    }

    /// Runs the error callback.
    pub fn trigger_error(&self, error: String) {
        if let Some(callback) = self.error.get() {
            callback(error);
        }
    }

    /// Runs the message callback.
    pub fn trigger_message(&self, message: Message) {
        if let Some(callback) = self.message.get() {
            callback(message);
        }
    }

    /// Runs the buffered-amount-low callback.
    pub fn trigger_buffered_amount_low(&self) {
        if let Some(callback) = self.buffered_amount_low.get() {
            callback();
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Lifecycle of a channel bound to one engine handle.
///
/// Transitions only move forward: Idle → Open → Closed, or Idle → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Created, waiting for the engine to report open.
    #[default]
    Idle,
    /// The engine reported the channel open.
    Open,
    /// Closed locally or by the peer; the handle is released.
    Closed,
}

/// The engine handle of a channel together with its lifecycle state.
///
/// Shared by the concrete channels so that the state and the handle always
/// change together under one lock.
#[derive(Debug, Default)]
pub(crate) struct HandleState(Mutex<Binding>);

#[derive(Debug, Default)]
struct Binding {
    handle: Option<Handle>,
    state: ChannelState,
}

impl HandleState {
    pub(crate) fn bound(handle: Handle) -> Self {
        Self(Mutex::new(Binding {
            handle: Some(handle),
            state: ChannelState::Idle,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Binding> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.lock().handle
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.lock().state
    }

    /// Starts a fresh Idle lifecycle on `handle`.
    pub(crate) fn rebind(&self, handle: Handle) {
        *self.lock() = Binding {
            handle: Some(handle),
            state: ChannelState::Idle,
        };
    }

    /// Idle → Open. Returns false if the channel was not idle.
    pub(crate) fn mark_open(&self) -> bool {
        let mut binding = self.lock();
        if binding.state != ChannelState::Idle {
            return false;
        }
        binding.state = ChannelState::Open;
        true
    }

    /// Moves to Closed and hands out the handle, at most once per binding.
    pub(crate) fn take_for_close(&self) -> Option<Handle> {
        let mut binding = self.lock();
        binding.state = ChannelState::Closed;
        binding.handle.take()
    }
}

/// A bidirectional message channel.
pub trait Channel {
    /// The channel's event callbacks.
    fn events(&self) -> &EventSink;

    /// Sends a message.
    ///
    /// Returns [`rtc_abi::RtcError::ChannelClosed`] when the channel has no
    /// handle, and [`rtc_abi::RtcError::SendRejected`] when the engine refuses
    /// the message. Nothing is buffered or retried.
    fn send(&self, message: Message) -> Result<()>;

    /// Closes the channel and releases its engine handle. Idempotent.
    fn close(&self);

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Returns true once the engine reported the channel open, until it closes.
    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Returns true once the channel is closed.
    fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Bytes queued in the engine. Transports without backpressure report 0.
    fn buffered_amount(&self) -> usize {
        0
    }

    /// Sets the buffered-amount-low threshold. No-op without backpressure.
    fn set_buffered_amount_low_threshold(&self, _amount: usize) {}

    /// Sends a binary message.
    fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(Message::from(data))
    }

    /// Sends a text message.
    fn send_text(&self, text: &str) -> Result<()> {
        self.send(Message::from(text))
    }

    /// Registers the open callback.
    fn on_open(&self, callback: impl Fn() + Send + Sync + 'static)
    where
        Self: Sized,
    {
        self.events().set_open(callback);
    }

    /// Registers the closed callback.
    fn on_closed(&self, callback: impl Fn() + Send + Sync + 'static)
    where
        Self: Sized,
    {
        self.events().set_closed(callback);
    }

    /// Registers the error callback.
    fn on_error(&self, callback: impl Fn(String) + Send + Sync + 'static)
    where
        Self: Sized,
    {
        self.events().set_error(callback);
    }

    /// Registers the message callback.
    fn on_message(&self, callback: impl Fn(Message) + Send + Sync + 'static)
    where
        Self: Sized,
    {
        self.events().set_message(callback);
    }

    /// Registers separate binary and text message callbacks.
    fn on_binary_or_text(
        &self,
        on_binary: impl Fn(Bytes) + Send + Sync + 'static,
        on_text: impl Fn(String) + Send + Sync + 'static,
    ) where
        Self: Sized,
    {
        self.events().set_binary_or_text(on_binary, on_text);
    }

    /// Registers the buffered-amount-low callback.
    fn on_buffered_amount_low(&self, callback: impl Fn() + Send + Sync + 'static)
    where
        Self: Sized,
    {
        self.events().set_buffered_amount_low(callback);
    }
}
