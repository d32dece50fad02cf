//! Realtime pub/sub notifications.
//!
//! The [`RealtimeClient`] hub owns a single [`RealtimeTransport`] connection and multiplexes named channels over it.
//! Event bindings live in the hub rather than in the transport, so a callback can be bound to a channel at any time,
//! regardless of which transport is in use.
mod client;
mod errors;
mod loopback;
mod pusher;
mod transport;

pub use client::{BindingId, ChannelHandle, RealtimeClient};
pub use errors::RealtimeError;
pub use loopback::LoopbackTransport;
pub use pusher::{PusherConfig, PusherTransport};
pub use transport::{ChannelEvent, EventSink, RealtimeTransport};
