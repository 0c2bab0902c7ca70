//! # rtc
//!
//! Typed, callback-driven access to a handle-based WebRTC/WebSocket engine.
//!
//! ## Overview
//!
//! The engine exposes every resource as an integer handle and reports events
//! through C callbacks carrying a user pointer. This crate turns that surface
//! into owned Rust values:
//!
//! - **PeerConnection**: signaling, candidate exchange and connection state
//! - **DataChannel**: labelled message channels with partial reliability and
//!   backpressure
//! - **WebSocket**: binary message channels to a URL
//! - **LoopbackEngine**: an in-process engine for tests and demos
//! - **Config**: TOML configuration with environment overrides
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   PeerConnection · DataChannel · WebSocket   │  owned values, Fn callbacks
//! ├──────────────────────────────────────────────┤
//! │    EventSink · HandleRegistry · codec        │  dispatch, handle lookup
//! ├──────────────────────────────────────────────┤
//! │          Engine trait (rtc-abi)              │  integer handles, C callbacks
//! ├──────────────────────────────────────────────┤
//! │      HostEngine  |  LoopbackEngine           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use rtc::{Channel, Configuration, LoopbackEngine, Message, PeerConnection};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(LoopbackEngine::new());
//! let offerer = PeerConnection::new(engine.clone(), &Configuration::new())?;
//! let answerer = PeerConnection::new(engine.clone(), &Configuration::new())?;
//!
//! let remote = Arc::new(Mutex::new(None));
//! let slot = Arc::clone(&remote);
//! answerer.on_data_channel(move |channel| *slot.lock().unwrap() = Some(channel));
//!
//! let channel = offerer.create_data_channel("chat")?;
//! engine.run_until_idle();
//!
//! let offer = offerer.local_description().ok_or("no offer")?;
//! answerer.set_remote_description(&offer);
//! engine.run_until_idle();
//!
//! let answer = answerer.local_description().ok_or("no answer")?;
//! offerer.set_remote_description(&answer);
//! engine.run_until_idle();
//! assert!(channel.is_open());
//!
//! let received = Arc::new(Mutex::new(Vec::new()));
//! let log = Arc::clone(&received);
//! let remote = remote.lock().unwrap().take().ok_or("no remote channel")?;
//! remote.on_message(move |message| log.lock().unwrap().push(message));
//!
//! channel.send_text("hello")?;
//! engine.run_until_idle();
//! assert_eq!(*received.lock().unwrap(), vec![Message::from("hello")]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! Callbacks run on whatever thread the engine delivers them on, one at a
//! time. Handlers must be `Send + Sync`. No internal lock is held while a
//! handler runs, so handlers may call back into the object that invoked them,
//! including dropping it.

pub mod candidate;
pub mod channel;
pub mod config;
pub mod configuration;
pub mod datachannel;
pub mod description;
pub mod loopback;
pub mod peerconnection;
pub mod registry;
pub mod reliability;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use candidate::Candidate;
pub use channel::{Channel, ChannelState, EventSink};
pub use config::{default_config_path, Config, ConfigError};
pub use configuration::{Configuration, IceServer, RelayType, DEFAULT_STUN_SERVERS};
pub use datachannel::DataChannel;
pub use description::{Description, DescriptionType};
pub use loopback::LoopbackEngine;
pub use peerconnection::{GatheringState, PeerConnection, SignalingState, State};
pub use reliability::Reliability;
pub use websocket::WebSocket;

pub use rtc_abi::{Engine, Handle, Message, Result, RtcError};

#[cfg(feature = "host")]
pub use rtc_abi::HostEngine;
