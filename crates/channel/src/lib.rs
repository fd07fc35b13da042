//! Streaming event channel for the medley job-tracking engine.
//!
//! Provides typed wire-message parsing, a WebSocket client with the
//! subscribe handshake, bounded reconnection, handler dispatch with
//! panic isolation, and the per-scope connection multiplexer
//! ([`ChannelMultiplexer`](multiplexer::ChannelMultiplexer)).

pub mod client;
pub mod dispatch;
pub mod messages;
pub mod multiplexer;
mod processor;
pub mod reconnect;
