//! # rtc-abi
//!
//! The boundary between rtc-bridge and the external communication engine.
//!
//! ## Overview
//!
//! The engine (a browser's WebRTC/WebSocket stack behind a JS shim, or a native
//! library) is reachable only through small integer handles, NUL-terminated
//! strings and function-pointer callbacks. This crate describes that surface:
//!
//! - **Handles and callbacks**: [`Handle`] and the `extern "C"` callback types
//! - **Engine**: the [`Engine`] trait, one method per ABI entry point
//! - **Message codec**: [`Message`] and the length-sentinel encoding
//! - **Errors**: [`RtcError`], the synchronous error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   PeerConnection / DataChannel / WS     │  crate `rtc`
//! ├─────────────────────────────────────────┤
//! │   Engine trait + Message codec          │  this crate
//! ├─────────────────────────────────────────┤
//! │   Host engine (extern "C")              │  feature `host`
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use rtc_abi::codec::{decode, Decoded, EncodedMessage};
//! use rtc_abi::Message;
//!
//! let encoded = EncodedMessage::encode(&Message::from("hello")).unwrap();
//! assert_eq!(encoded.size(), -1);
//!
//! let decoded = unsafe { decode(encoded.as_ptr(), encoded.size()) };
//! assert_eq!(decoded, Decoded::Message(Message::from("hello")));
//! ```
//!
//! ## Modules
//!
//! - [`sys`]: handles, callback signatures, engine-owned strings
//! - [`engine`]: the engine trait
//! - [`codec`]: message union and sentinel convention
//! - [`error`]: error types

pub mod codec;
pub mod engine;
pub mod error;
#[cfg(feature = "host")]
pub mod host;
pub mod sys;

pub use codec::{Decoded, EncodedMessage, Message, MAX_BINARY_SIZE, TEXT_SIZE_SENTINEL};
pub use engine::Engine;
pub use error::{Result, RtcError};
#[cfg(feature = "host")]
pub use host::HostEngine;
pub use sys::{EngineString, Handle, ReliabilityFlags, RELIABILITY_UNSET};
