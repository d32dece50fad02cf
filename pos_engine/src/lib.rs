//! Point-of-sale payment engine
//!
//! This library turns the REST client in `pos_api_client` into a live view of an order's payment status.
//!
//! It is divided into three sections:
//! 1. Realtime notifications ([`mod@realtime`]). A [`RealtimeClient`] multiplexes named pub/sub channels over one
//!    transport connection. Transports are pluggable: [`PusherTransport`] speaks the Pusher Channels protocol over a
//!    WebSocket, and [`LoopbackTransport`] keeps everything in-process. Channel subscriptions are reference counted,
//!    so two sessions watching orders of the same merchant never unsubscribe each other.
//! 2. Payment status tracking ([`mod@tracker`]). A [`PaymentTracker`] reconciles realtime `payment_completed` hints
//!    with authoritative order fetches into a single [`TrackedStatus`].
//! 3. Events ([`mod@events`]). Terminal status changes are published to hooks, so that front ends can react (receipt,
//!    confirmation screen) without polling the tracker.
mod config;

pub mod events;
pub mod realtime;
pub mod tracker;

pub use config::{RealtimeConfig, TransportKind};
pub use events::{EventHandlers, EventHooks, EventProducers, PaymentStatusEvent, StatusSource};
pub use realtime::{
    ChannelEvent,
    ChannelHandle,
    LoopbackTransport,
    PusherConfig,
    PusherTransport,
    RealtimeClient,
    RealtimeError,
    RealtimeTransport,
};
pub use tracker::{Activation, PaymentTracker, TrackedStatus, TrackerError, PAYMENT_COMPLETED_EVENT};
