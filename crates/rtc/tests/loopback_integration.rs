//! End-to-end tests against the in-process loopback engine.
//!
//! These tests drive complete flows through the public API:
//! - Offer/answer negotiation and state reporting
//! - Data channel messaging, backpressure and closure
//! - Web socket echo
//! - Hosts without WebRTC or WebSocket support

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use rtc::{
    Candidate, Channel, ChannelState, Configuration, DataChannel, DescriptionType,
    GatheringState, IceServer, LoopbackEngine, Message, PeerConnection, Reliability, RtcError,
    SignalingState, State, WebSocket,
};

/// Two negotiated peers with an open channel pair.
struct Connected {
    engine: Arc<LoopbackEngine>,
    offerer: PeerConnection,
    answerer: PeerConnection,
    local: DataChannel,
    remote: DataChannel,
}

fn peer(engine: &Arc<LoopbackEngine>) -> PeerConnection {
    PeerConnection::new(engine.clone(), &Configuration::new()).unwrap()
}

/// Negotiates by copying local descriptions across, as a signaling relay would.
fn negotiate(engine: &LoopbackEngine, offerer: &PeerConnection, answerer: &PeerConnection) {
    engine.run_until_idle();
    let offer = offerer.local_description().expect("offer after channel creation");
    answerer.set_remote_description(&offer);
    engine.run_until_idle();

    let answer = answerer.local_description().expect("answer after remote offer");
    offerer.set_remote_description(&answer);
    engine.run_until_idle();
}

fn connect_with(label: &str, reliability: Reliability) -> Connected {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let answerer = peer(&engine);

    let announced = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&announced);
    answerer.on_data_channel(move |channel| *slot.lock().unwrap() = Some(channel));

    let local = offerer.create_data_channel_with(label, reliability).unwrap();
    negotiate(&engine, &offerer, &answerer);

    let remote = announced.lock().unwrap().take().expect("remote data channel");
    Connected {
        engine,
        offerer,
        answerer,
        local,
        remote,
    }
}

fn connect() -> Connected {
    connect_with("chat", Reliability::reliable())
}

fn record_messages<C: Channel>(channel: &C) -> Arc<Mutex<Vec<Message>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    channel.on_message(move |message| sink.lock().unwrap().push(message));
    log
}

fn count<F>(register: F) -> Arc<AtomicUsize>
where
    F: FnOnce(Box<dyn Fn() + Send + Sync>),
{
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    register(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    counter
}

// =============================================================================
// Negotiation
// =============================================================================

#[test]
fn test_no_local_description_before_negotiation() {
    let engine = Arc::new(LoopbackEngine::new());
    let pc = peer(&engine);
    assert!(pc.local_description().is_none());
    assert_eq!(pc.state(), State::New);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
}

#[test]
fn test_ice_servers_reach_engine() {
    let engine = Arc::new(LoopbackEngine::new());
    let configuration = Configuration::new()
        .with_ice_server(IceServer::stun("stun.example.org", 3478))
        .with_ice_server(IceServer::url("turn:relay.example.org:3478"));
    let pc = PeerConnection::new(engine.clone(), &configuration).unwrap();

    assert_eq!(
        engine.ice_servers(pc.handle()),
        vec![
            "stun:stun.example.org:3478".to_string(),
            "turn:relay.example.org:3478".to_string(),
        ]
    );
}

#[test]
fn test_offer_answer_state_sequences() {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let answerer = peer(&engine);

    let states = Arc::new(Mutex::new(Vec::new()));
    let signaling = Arc::new(Mutex::new(Vec::new()));
    let gathering = Arc::new(Mutex::new(Vec::new()));
    let answerer_signaling = Arc::new(Mutex::new(Vec::new()));
    {
        let states = Arc::clone(&states);
        offerer.on_state_change(move |s| states.lock().unwrap().push(s));
        let signaling = Arc::clone(&signaling);
        offerer.on_signaling_state_change(move |s| signaling.lock().unwrap().push(s));
        let gathering = Arc::clone(&gathering);
        offerer.on_gathering_state_change(move |s| gathering.lock().unwrap().push(s));
        let answerer_signaling = Arc::clone(&answerer_signaling);
        answerer.on_signaling_state_change(move |s| answerer_signaling.lock().unwrap().push(s));
    }

    let descriptions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&descriptions);
    offerer.on_local_description(move |d| sink.lock().unwrap().push(d.description_type()));

    let _channel = offerer.create_data_channel("chat").unwrap();
    negotiate(&engine, &offerer, &answerer);

    assert_eq!(*descriptions.lock().unwrap(), vec![DescriptionType::Offer]);
    assert_eq!(
        *signaling.lock().unwrap(),
        vec![SignalingState::HaveLocalOffer, SignalingState::Stable]
    );
    assert_eq!(
        *answerer_signaling.lock().unwrap(),
        vec![SignalingState::HaveRemoteOffer, SignalingState::Stable]
    );
    assert_eq!(
        *gathering.lock().unwrap(),
        vec![GatheringState::InProgress, GatheringState::Complete]
    );
    assert_eq!(*states.lock().unwrap(), vec![State::Connecting, State::Connected]);

    assert_eq!(offerer.state(), State::Connected);
    assert_eq!(answerer.state(), State::Connected);
    assert_eq!(offerer.gathering_state(), GatheringState::Complete);
    assert_eq!(
        answerer.local_description().unwrap().description_type(),
        DescriptionType::Answer
    );
}

#[test]
fn test_local_candidates_relay_to_remote() {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let answerer = peer(&engine);

    let candidates: Arc<Mutex<Vec<Candidate>>> = Arc::default();
    let sink = Arc::clone(&candidates);
    offerer.on_local_candidate(move |c| sink.lock().unwrap().push(c));

    let _channel = offerer.create_data_channel("chat").unwrap();
    engine.run_until_idle();

    let candidates = candidates.lock().unwrap().clone();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].mid(), "0");
    assert!(candidates[0].to_string().starts_with("a=candidate:"));

    for candidate in &candidates {
        answerer.add_remote_candidate(candidate);
    }
    assert_eq!(engine.remote_candidate_count(answerer.handle()), 1);
}

#[test]
fn test_remote_channel_announced_and_open() {
    let pair = connect_with("telemetry", Reliability::unordered());

    assert_eq!(pair.remote.label(), "telemetry");
    assert_eq!(pair.local.label(), "telemetry");
    assert!(pair.local.reliability().is_unordered());
    assert!(pair.local.is_open());
    assert!(pair.remote.is_open());
}

#[test]
fn test_channel_created_after_connect_is_announced() {
    let pair = connect();
    let announced = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&announced);
    pair.answerer
        .on_data_channel(move |channel| sink.lock().unwrap().push(channel));

    let second = pair.offerer.create_data_channel("files").unwrap();
    assert_eq!(second.state(), ChannelState::Idle);
    pair.engine.run_until_idle();

    let announced = announced.lock().unwrap();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].label(), "files");
    assert!(second.is_open());
    assert!(announced[0].is_open());
}

#[test]
fn test_unhandled_remote_channel_is_released() {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let answerer = peer(&engine);

    let local = offerer.create_data_channel("chat").unwrap();
    let closed = count(|f| local.on_closed(f));
    negotiate(&engine, &offerer, &answerer);

    // Nobody kept the remote end, so the local end sees it go away.
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(local.is_closed());
}

// =============================================================================
// Messaging
// =============================================================================

#[test]
fn test_messages_delivered_in_order_both_ways() {
    let pair = connect();
    let at_remote = record_messages(&pair.remote);
    let at_local = record_messages(&pair.local);

    pair.local.send_text("one").unwrap();
    pair.local.send_binary(&[1, 2, 3]).unwrap();
    pair.local.send_text("three").unwrap();
    pair.remote.send_text("reply").unwrap();
    pair.engine.run_until_idle();

    assert_eq!(
        *at_remote.lock().unwrap(),
        vec![
            Message::from("one"),
            Message::from(vec![1u8, 2, 3]),
            Message::from("three"),
        ]
    );
    assert_eq!(*at_local.lock().unwrap(), vec![Message::from("reply")]);
}

#[test]
fn test_empty_messages_survive() {
    let pair = connect();
    let binary = Arc::new(Mutex::new(Vec::new()));
    let text = Arc::new(Mutex::new(Vec::new()));
    let (b, t) = (Arc::clone(&binary), Arc::clone(&text));
    pair.remote.on_binary_or_text(
        move |data: Bytes| b.lock().unwrap().push(data),
        move |s: String| t.lock().unwrap().push(s),
    );

    pair.local.send_binary(&[]).unwrap();
    pair.local.send_text("").unwrap();
    pair.engine.run_until_idle();

    assert_eq!(*binary.lock().unwrap(), vec![Bytes::new()]);
    assert_eq!(*text.lock().unwrap(), vec![String::new()]);
}

#[test]
fn test_text_with_nul_is_rejected_before_engine() {
    let pair = connect();
    let at_remote = record_messages(&pair.remote);

    let err = pair.local.send_text("a\0b").unwrap_err();
    assert!(matches!(err, RtcError::InteriorNul { position: 1 }));
    pair.engine.run_until_idle();
    assert!(at_remote.lock().unwrap().is_empty());
}

#[test]
fn test_send_before_open_is_rejected() {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let channel = offerer.create_data_channel("chat").unwrap();

    let err = channel.send_text("too early").unwrap_err();
    assert!(matches!(err, RtcError::SendRejected { code: -1, .. }));
}

#[test]
fn test_send_from_other_threads() {
    let pair = connect();
    let at_remote = record_messages(&pair.remote);

    let senders: Vec<_> = (0..4)
        .map(|n| {
            let channel = pair.local.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    channel.send_text(&format!("{n}:{i}")).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }
    pair.engine.run_until_idle();

    let received = at_remote.lock().unwrap();
    assert_eq!(received.len(), 100);
    // Per-sender order is preserved.
    for n in 0..4 {
        let prefix = format!("{n}:");
        let sequence: Vec<usize> = received
            .iter()
            .filter_map(|m| m.as_text())
            .filter_map(|t| t.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(sequence, (0..25).collect::<Vec<_>>());
    }
}

// =============================================================================
// Backpressure
// =============================================================================

#[test]
fn test_buffered_amount_tracks_pending_bytes() {
    let pair = connect();
    pair.local.send_binary(&[0u8; 100]).unwrap();
    pair.local.send_binary(&[0u8; 50]).unwrap();
    assert_eq!(pair.local.buffered_amount(), 150);

    pair.engine.run_until_idle();
    assert_eq!(pair.local.buffered_amount(), 0);
}

#[test]
fn test_buffered_amount_low_fires_on_crossing() {
    let pair = connect();
    pair.local.set_buffered_amount_low_threshold(10);
    let low = count(|f| pair.local.on_buffered_amount_low(f));

    for _ in 0..3 {
        pair.local.send_binary(&[7u8; 8]).unwrap();
    }
    pair.engine.run_until_idle();

    // 24 -> 16 -> 8 -> 0 crosses the threshold once.
    assert_eq!(low.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Closure and errors
// =============================================================================

#[test]
fn test_remote_close_reaches_peer_once() {
    let pair = connect();
    let remote_closed = count(|f| pair.remote.on_closed(f));
    let local_closed = count(|f| pair.local.on_closed(f));
    let at_remote = record_messages(&pair.remote);

    let handle = pair.local.handle().unwrap();
    pair.local.close();
    pair.local.close();
    pair.engine.run_until_idle();

    assert!(pair.local.is_closed());
    assert!(pair.remote.is_closed());
    assert_eq!(remote_closed.load(Ordering::SeqCst), 1);
    assert_eq!(local_closed.load(Ordering::SeqCst), 0);
    assert!(at_remote.lock().unwrap().is_empty());
    assert!(!pair.engine.is_live(handle));
    assert!(matches!(
        pair.remote.send_text("gone"),
        Err(RtcError::ChannelClosed)
    ));
}

#[test]
fn test_dropping_last_clone_releases_channel() {
    let pair = connect();
    let handle = pair.local.handle().unwrap();
    let clone = pair.local.clone();
    let Connected {
        engine,
        remote,
        local,
        offerer: _offerer,
        answerer: _answerer,
    } = pair;

    drop(local);
    assert!(engine.is_live(handle));
    drop(clone);
    assert!(!engine.is_live(handle));

    engine.run_until_idle();
    assert!(remote.is_closed());
}

#[test]
fn test_peer_deletion_disconnects_remote() {
    let engine = Arc::new(LoopbackEngine::new());
    let offerer = peer(&engine);
    let answerer = peer(&engine);
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    answerer.on_state_change(move |s| sink.lock().unwrap().push(s));
    answerer.on_data_channel(|_| {});

    let _channel = offerer.create_data_channel("chat").unwrap();
    negotiate(&engine, &offerer, &answerer);
    drop(offerer);
    engine.run_until_idle();

    let states = states.lock().unwrap();
    assert_eq!(
        states[states.len() - 2..],
        [State::Connected, State::Disconnected]
    );
    assert_eq!(answerer.state(), State::Disconnected);
}

#[test]
fn test_engine_errors_reach_channel() {
    let pair = connect();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    pair.local.on_error(move |e| sink.lock().unwrap().push(e));

    assert!(pair
        .engine
        .inject_error(pair.local.handle().unwrap(), "SCTP association lost"));
    pair.engine.run_until_idle();

    assert_eq!(*errors.lock().unwrap(), vec!["SCTP association lost".to_string()]);
    assert!(pair.local.is_open());
}

#[test]
fn test_callback_may_close_its_own_channel() {
    let pair = connect();
    let channel = pair.remote.clone();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    pair.remote.on_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        channel.close();
    });

    pair.local.send_text("first").unwrap();
    pair.local.send_text("second").unwrap();
    pair.engine.run_until_idle();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(pair.remote.is_closed());
    // Break the cycle between the channel and its own callback.
    pair.remote.events().clear();
}

// =============================================================================
// Web sockets
// =============================================================================

#[test]
fn test_websocket_echo() {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());
    let opened = count(|f| socket.on_open(f));
    let echoed = record_messages(&socket);

    socket.open("wss://echo.example.org/socket").unwrap();
    assert_eq!(socket.state(), ChannelState::Idle);
    engine.run_until_idle();
    assert!(socket.is_open());
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    socket.send_binary(b"ping").unwrap();
    socket.send_binary(&[]).unwrap();
    engine.run_until_idle();

    assert_eq!(
        *echoed.lock().unwrap(),
        vec![Message::from(&b"ping"[..]), Message::from(Vec::new())]
    );
}

#[test]
fn test_websocket_text_is_unsupported() {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());
    socket.open("ws://localhost:9000").unwrap();
    engine.run_until_idle();

    let err = socket.send_text("hello").unwrap_err();
    assert!(matches!(err, RtcError::UnsupportedOperation(_)));
    assert_eq!(engine.pending(), 0);
}

#[test]
fn test_websocket_rejects_invalid_url() {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());

    let err = socket.open("http://example.org").unwrap_err();
    assert!(matches!(err, RtcError::Unsupported("WebSocket")));
    assert_eq!(socket.handle(), None);
}

#[test]
fn test_websocket_remote_disconnect() {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());
    let closed = count(|f| socket.on_closed(f));
    let messages = record_messages(&socket);

    socket.open("ws://localhost:9000").unwrap();
    engine.run_until_idle();
    let handle = socket.handle().unwrap();

    assert!(engine.disconnect_socket(handle));
    engine.run_until_idle();

    assert!(socket.is_closed());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(messages.lock().unwrap().is_empty());
    assert!(!engine.is_live(handle));
}

#[test]
fn test_websocket_reopen_starts_new_lifecycle() {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());
    let opened = count(|f| socket.on_open(f));

    socket.open("ws://first.example").unwrap();
    engine.run_until_idle();
    let first = socket.handle().unwrap();

    socket.open("ws://second.example").unwrap();
    engine.run_until_idle();

    assert!(!engine.is_live(first));
    assert_ne!(socket.handle(), Some(first));
    assert!(socket.is_open());
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Unsupported hosts
// =============================================================================

#[test]
fn test_unsupported_host() {
    let engine = Arc::new(LoopbackEngine::new());
    engine.set_unsupported(true);

    let err = PeerConnection::new(engine.clone(), &Configuration::with_default_stun()).unwrap_err();
    assert!(matches!(err, RtcError::Unsupported("WebRTC")));

    let socket = WebSocket::new(engine.clone());
    assert!(matches!(
        socket.open("ws://localhost"),
        Err(RtcError::Unsupported("WebSocket"))
    ));
}

#[test]
fn test_data_channel_unsupported() {
    let engine = Arc::new(LoopbackEngine::new());
    let pc = peer(&engine);
    engine.set_unsupported(true);

    let err = pc.create_data_channel("chat").unwrap_err();
    assert!(matches!(err, RtcError::Unsupported("data channel")));
}
