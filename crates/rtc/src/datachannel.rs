//! Data channels bound to an engine handle.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;
use std::sync::{Arc, LazyLock};

use rtc_abi::codec::{decode, Decoded};
use rtc_abi::sys::string_arg;
use rtc_abi::{EncodedMessage, Engine, Handle, Message, Result, RtcError};

use crate::channel::{Channel, ChannelState, EventSink, HandleState};
use crate::registry::HandleRegistry;
use crate::reliability::Reliability;

/// Initial buffer size for label queries.
const LABEL_BUFFER_SIZE: usize = 256;

static DATA_CHANNELS: LazyLock<HandleRegistry<Inner>> =
    LazyLock::new(|| HandleRegistry::new("data channel"));

/// A message channel multiplexed over a peer connection.
///
/// Cloning is cheap and yields another reference to the same channel. The
/// channel is closed when the last clone is dropped. A callback that captures
/// a clone of its own channel keeps the channel alive until it is closed.
#[derive(Clone)]
pub struct DataChannel {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    binding: HandleState,
    label: String,
    reliability: Reliability,
    events: EventSink,
}

impl DataChannel {
    /// Wraps an engine handle, binding it and installing the callbacks.
    ///
    /// Used both for channels created locally and for channels announced by
    /// the remote peer.
    pub(crate) fn from_handle(
        engine: Arc<dyn Engine>,
        handle: Handle,
        reliability: Reliability,
    ) -> Result<Self> {
        let label = fetch_label(engine.as_ref(), handle);
        let inner = Arc::new(Inner {
            engine,
            binding: HandleState::bound(handle),
            label,
            reliability,
            events: EventSink::new(),
        });

        if let Err(err) = DATA_CHANNELS.bind(handle, Arc::downgrade(&inner)) {
            // The handle belongs to someone else; never release it from here.
            tracing::warn!(
                %handle,
                label = %inner.label,
                "Data channel handle already bound; leaking it"
            );
            let _ = inner.binding.take_for_close();
            return Err(err);
        }

        let engine = &inner.engine;
        engine.set_user_pointer(handle, handle.as_user_pointer());
        engine.set_open_callback(handle, open_trampoline);
        engine.set_error_callback(handle, error_trampoline);
        engine.set_message_callback(handle, message_trampoline);
        engine.set_buffered_amount_low_callback(handle, buffered_amount_low_trampoline);

        tracing::debug!(%handle, label = %inner.label, "Data channel created");
        Ok(Self { inner })
    }

    /// The label given at creation.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The reliability requested at creation. Remote channels report the
    /// default.
    pub fn reliability(&self) -> Reliability {
        self.inner.reliability
    }

    /// The engine handle, while the channel is not closed.
    pub fn handle(&self) -> Option<Handle> {
        self.inner.binding.handle()
    }
}

impl Inner {
    fn close(&self) {
        if let Some(handle) = self.binding.take_for_close() {
            DATA_CHANNELS.unbind(handle);
            self.engine.delete_data_channel(handle);
            tracing::debug!(%handle, label = %self.label, "Data channel closed");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Channel for DataChannel {
    fn events(&self) -> &EventSink {
        &self.inner.events
    }

    fn send(&self, message: Message) -> Result<()> {
        let handle = self.inner.binding.handle().ok_or(RtcError::ChannelClosed)?;
        let encoded = EncodedMessage::encode(&message)?;

        let code = self.inner.engine.send_message(handle, &encoded);
        if code < 0 {
            return Err(RtcError::SendRejected {
                handle: handle.as_raw(),
                code,
            });
        }

        tracing::trace!(%handle, size = message.len(), text = encoded.is_text(), "Sent message");
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }

    fn state(&self) -> ChannelState {
        self.inner.binding.state()
    }

    fn buffered_amount(&self) -> usize {
        match self.inner.binding.handle() {
            Some(handle) => usize::try_from(self.inner.engine.buffered_amount(handle)).unwrap_or(0),
            None => 0,
        }
    }

    fn set_buffered_amount_low_threshold(&self, amount: usize) {
        if let Some(handle) = self.inner.binding.handle() {
            let amount = c_int::try_from(amount).unwrap_or(c_int::MAX);
            self.inner
                .engine
                .set_buffered_amount_low_threshold(handle, amount);
        }
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("handle", &self.inner.binding.handle())
            .field("label", &self.inner.label)
            .field("state", &self.inner.binding.state())
            .finish()
    }
}

/// Reads the label, retrying once if the first buffer was too small.
fn fetch_label(engine: &dyn Engine, handle: Handle) -> String {
    let mut buffer = vec![0u8; LABEL_BUFFER_SIZE];
    let mut length = engine.data_channel_label(handle, &mut buffer);

    if let Ok(full) = usize::try_from(length) {
        if full >= buffer.len() {
            buffer = vec![0u8; full + 1];
            length = engine.data_channel_label(handle, &mut buffer);
        }
    }

    let Ok(length) = usize::try_from(length) else {
        tracing::warn!(%handle, "Engine did not report a data channel label");
        return String::new();
    };
    let end = buffer
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(buffer.len())
        .min(length);
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

fn resolve(user: *mut c_void) -> Option<Arc<Inner>> {
    let handle = Handle::from_user_pointer(user)?;
    let channel = DATA_CHANNELS.resolve(handle);
    if channel.is_none() {
        tracing::trace!(%handle, "Dropping callback for unbound data channel");
    }
    channel
}

unsafe extern "C" fn open_trampoline(user: *mut c_void) {
    let Some(channel) = resolve(user) else { return };
    if channel.binding.mark_open() {
        channel.events.trigger_open();
    }
}

unsafe extern "C" fn error_trampoline(error: *const c_char, user: *mut c_void) {
    let Some(channel) = resolve(user) else { return };
    let reason = string_arg(error).unwrap_or_else(|| "unknown".to_string());
    tracing::debug!(label = %channel.label, %reason, "Data channel error");
    channel.events.trigger_error(reason);
}

unsafe extern "C" fn message_trampoline(data: *const c_char, size: c_int, user: *mut c_void) {
    let Some(channel) = resolve(user) else { return };
    match decode(data, size) {
        Decoded::Closed => {
            channel.close();
            channel.events.trigger_closed();
        }
        Decoded::Message(message) => {
            tracing::trace!(label = %channel.label, size = message.len(), "Received message");
            channel.events.trigger_message(message);
        }
    }
}

unsafe extern "C" fn buffered_amount_low_trampoline(user: *mut c_void) {
    let Some(channel) = resolve(user) else { return };
    channel.events.trigger_buffered_amount_low();
}

/// Label helper shared with engines implemented in Rust: copies `label` into
/// `buffer` NUL-terminated and truncated, and returns its full length.
pub(crate) fn copy_label(label: &str, buffer: &mut [u8]) -> c_int {
    if let Some(capacity) = buffer.len().checked_sub(1) {
        let n = label.len().min(capacity);
        buffer[..n].copy_from_slice(&label.as_bytes()[..n]);
        buffer[n] = 0;
    }
    c_int::try_from(label.len()).unwrap_or(c_int::MAX)
}
