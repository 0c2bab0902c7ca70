//! WebSocket channels bound to an engine handle.
//!
//! A [`WebSocket`] carries binary messages only, reliably and in order. It has
//! no partial reliability and reports no backpressure.

use std::ffi::{c_char, c_int, c_void, CString};
use std::fmt;
use std::sync::{Arc, LazyLock};

use rtc_abi::codec::{decode, Decoded};
use rtc_abi::sys::string_arg;
use rtc_abi::{EncodedMessage, Engine, Handle, Message, Result, RtcError};

use crate::channel::{Channel, ChannelState, EventSink, HandleState};
use crate::registry::HandleRegistry;

static WEB_SOCKETS: LazyLock<HandleRegistry<Inner>> =
    LazyLock::new(|| HandleRegistry::new("web socket"));

/// A binary-only socket channel.
///
/// Clones share the same socket; it is closed when the last clone drops.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    binding: HandleState,
    events: EventSink,
}

impl WebSocket {
    /// Creates an idle socket with no engine handle.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                binding: HandleState::default(),
                events: EventSink::new(),
            }),
        }
    }

    /// Connects to `url`, closing any previous connection first.
    ///
    /// Each call starts a new Idle → Open → Closed lifecycle. Fails with
    /// [`RtcError::Unsupported`] when the engine cannot create a socket.
    pub fn open(&self, url: &str) -> Result<()> {
        self.close();

        let url_arg = CString::new(url)?;
        let engine = &self.inner.engine;
        let handle =
            Handle::from_raw(engine.ws_create(&url_arg)).ok_or(RtcError::Unsupported("WebSocket"))?;

        if let Err(err) = WEB_SOCKETS.bind(handle, Arc::downgrade(&self.inner)) {
            tracing::warn!(%handle, %url, "Engine reissued a live web socket handle; leaking it");
            return Err(err);
        }
        self.inner.binding.rebind(handle);

        engine.ws_set_user_pointer(handle, handle.as_user_pointer());
        engine.ws_set_open_callback(handle, open_trampoline);
        engine.ws_set_error_callback(handle, error_trampoline);
        engine.ws_set_message_callback(handle, message_trampoline);

        tracing::debug!(%handle, %url, "Web socket opening");
        Ok(())
    }

    /// The engine handle of the current connection, if any.
    pub fn handle(&self) -> Option<Handle> {
        self.inner.binding.handle()
    }
}

impl Inner {
    fn close(&self) {
        if let Some(handle) = self.binding.take_for_close() {
            WEB_SOCKETS.unbind(handle);
            self.engine.ws_delete(handle);
            tracing::debug!(%handle, "Web socket closed");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Channel for WebSocket {
    fn events(&self) -> &EventSink {
        &self.inner.events
    }

    fn send(&self, message: Message) -> Result<()> {
        if message.is_text() {
            return Err(RtcError::UnsupportedOperation(
                "text messages over WebSocket".to_string(),
            ));
        }
        let handle = self.inner.binding.handle().ok_or(RtcError::ChannelClosed)?;
        let encoded = EncodedMessage::encode(&message)?;

        let code = self.inner.engine.ws_send_message(handle, &encoded);
        if code < 0 {
            return Err(RtcError::SendRejected {
                handle: handle.as_raw(),
                code,
            });
        }

        tracing::trace!(%handle, size = message.len(), "Sent message");
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }

    fn state(&self) -> ChannelState {
        self.inner.binding.state()
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("handle", &self.inner.binding.handle())
            .field("state", &self.inner.binding.state())
            .finish()
    }
}

fn resolve(user: *mut c_void) -> Option<Arc<Inner>> {
    let handle = Handle::from_user_pointer(user)?;
    let socket = WEB_SOCKETS.resolve(handle);
    if socket.is_none() {
        tracing::trace!(%handle, "Dropping callback for unbound web socket");
    }
    socket
}

unsafe extern "C" fn open_trampoline(user: *mut c_void) {
    let Some(socket) = resolve(user) else { return };
    if socket.binding.mark_open() {
        socket.events.trigger_open();
    }
}

unsafe extern "C" fn error_trampoline(error: *const c_char, user: *mut c_void) {
    let Some(socket) = resolve(user) else { return };
    let reason = string_arg(error).unwrap_or_else(|| "unknown".to_string());
    socket.events.trigger_error(reason);
}

unsafe extern "C" fn message_trampoline(data: *const c_char, size: c_int, user: *mut c_void) {
    let Some(socket) = resolve(user) else { return };
    match decode(data, size) {
        Decoded::Closed => {
            socket.close();
            socket.events.trigger_closed();
        }
        Decoded::Message(message) => socket.events.trigger_message(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, RecordingEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_new_socket_is_idle_without_handle() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        assert_eq!(ws.state(), ChannelState::Idle);
        assert_eq!(ws.handle(), None);
        assert!(matches!(ws.send_binary(b"x"), Err(RtcError::ChannelClosed)));
    }

    #[test]
    fn test_open_binds_and_notifies() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        ws.on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ws.open("ws://localhost:8080/echo").unwrap();
        let handle = ws.handle().unwrap();
        assert!(!ws.is_open());
        assert_eq!(
            engine.count(|c| *c == EngineCall::WsCreate("ws://localhost:8080/echo".to_string())),
            1
        );

        engine.fire_open(handle);
        assert!(ws.is_open());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_unsupported() {
        let engine = RecordingEngine::new();
        engine.fail_creation(true);
        let ws = WebSocket::new(engine.clone());

        let err = ws.open("ws://localhost").unwrap_err();
        assert!(matches!(err, RtcError::Unsupported("WebSocket")));
        assert_eq!(ws.handle(), None);
    }

    #[test]
    fn test_text_send_is_unsupported_without_engine_call() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        ws.open("ws://localhost").unwrap();
        let handle = ws.handle().unwrap();
        engine.fire_open(handle);

        let err = ws.send_text("hello").unwrap_err();
        assert!(matches!(err, RtcError::UnsupportedOperation(_)));
        assert!(engine.sent(handle).is_empty());

        ws.send_binary(b"hello").unwrap();
        assert_eq!(engine.sent(handle), vec![(b"hello".to_vec(), 5)]);
    }

    #[test]
    fn test_reopen_closes_previous_handle() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());

        ws.open("ws://first").unwrap();
        let first = ws.handle().unwrap();
        engine.fire_open(first);
        assert!(ws.is_open());

        ws.open("wss://second").unwrap();
        let second = ws.handle().unwrap();
        assert_ne!(first, second);
        assert_eq!(ws.state(), ChannelState::Idle);
        assert_eq!(engine.count(|c| *c == EngineCall::WsDelete(first.as_raw())), 1);

        // Late callbacks for the old handle are ignored.
        engine.fire_closure(first);
        assert_eq!(ws.state(), ChannelState::Idle);

        engine.fire_open(second);
        assert!(ws.is_open());
    }

    #[test]
    fn test_remote_close_emits_closed_once() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        ws.on_closed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ws.open("ws://localhost").unwrap();
        let handle = ws.handle().unwrap();
        engine.fire_open(handle);
        engine.fire_closure(handle);
        engine.fire_closure(handle);

        assert!(ws.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.count(|c| *c == EngineCall::WsDelete(handle.as_raw())), 1);
    }

    #[test]
    fn test_closed_handler_sees_released_handle() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        let seen = Arc::new(Mutex::new(None));
        let log = Arc::clone(&seen);
        let observed = ws.clone();
        ws.on_closed(move || {
            *log.lock().unwrap() = Some((observed.handle(), observed.is_closed()));
        });

        ws.open("ws://localhost").unwrap();
        let handle = ws.handle().unwrap();
        engine.fire_open(handle);
        engine.fire_closure(handle);

        assert_eq!(*seen.lock().unwrap(), Some((None, true)));
        assert!(!WEB_SOCKETS.is_bound(handle));
        ws.events().clear();
    }

    #[test]
    fn test_reissued_live_handle_is_rejected_and_kept() {
        let engine = RecordingEngine::new();
        let first = WebSocket::new(engine.clone());
        first.open("ws://first").unwrap();
        let handle = first.handle().unwrap();

        let second = WebSocket::new(engine.clone());
        engine.reissue(handle);
        let err = second.open("ws://second").unwrap_err();
        assert!(matches!(err, RtcError::AlreadyBound { .. }));
        assert_eq!(second.handle(), None);

        assert_eq!(engine.count(|c| *c == EngineCall::WsDelete(handle.as_raw())), 0);
        engine.fire_open(handle);
        assert!(first.is_open());
        assert!(!second.is_open());
    }

    #[test]
    fn test_binary_messages_delivered() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        ws.on_binary_or_text(
            move |data| log.lock().unwrap().push(data.to_vec()),
            |_| panic!("no text expected"),
        );

        ws.open("ws://localhost").unwrap();
        let handle = ws.handle().unwrap();
        engine.fire_binary(handle, &[1, 2, 3]);
        engine.fire_binary(handle, &[]);

        assert_eq!(*received.lock().unwrap(), vec![vec![1u8, 2, 3], vec![]]);
    }

    #[test]
    fn test_drop_releases_handle() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        ws.open("ws://localhost").unwrap();
        let handle = ws.handle().unwrap();

        drop(ws);

        assert!(!WEB_SOCKETS.is_bound(handle));
        assert_eq!(engine.count(|c| *c == EngineCall::WsDelete(handle.as_raw())), 1);
    }

    #[test]
    fn test_no_backpressure() {
        let engine = RecordingEngine::new();
        let ws = WebSocket::new(engine.clone());
        ws.open("ws://localhost").unwrap();
        ws.set_buffered_amount_low_threshold(10);
        assert_eq!(ws.buffered_amount(), 0);
        assert_eq!(engine.count(|c| matches!(c, EngineCall::SetThreshold(..))), 0);
    }
}
