//! # Realtime Relay
//!
//! Per-connection relay between the client WebSocket and a backend adapter.
//!
//! - [`buffer`]: ordered base64 fragments of the current utterance
//! - [`envelope`]: client and relay message formats
//! - [`session`]: per-connection state and the live session registry
//! - [`dispatcher`]: the relay loop and teardown

pub mod buffer;
pub mod dispatcher;
pub mod envelope;
pub mod session;
