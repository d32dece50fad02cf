use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::realtime::RealtimeError;

/// A named event that arrived on a channel. `data` has already been decoded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

impl ChannelEvent {
    pub fn new<C: Into<String>, E: Into<String>>(channel: C, event: E, data: Value) -> Self {
        Self { channel: channel.into(), event: event.into(), data }
    }
}

pub type EventSink = mpsc::Sender<ChannelEvent>;

/// A pub/sub transport. Implementations only manage channel membership on the wire and forward incoming channel
/// events to the sink handed to them in [`RealtimeTransport::connect`]. Reference counting and event bindings are the
/// hub's job.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the connection. Events for subscribed channels are forwarded to `sink` until the transport disconnects.
    async fn connect(&self, sink: EventSink) -> Result<(), RealtimeError>;

    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError>;

    async fn disconnect(&self) -> Result<(), RealtimeError>;
}
