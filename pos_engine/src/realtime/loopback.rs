use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use log::*;
use parking_lot::Mutex;
use serde_json::Value;

use crate::realtime::{ChannelEvent, EventSink, RealtimeError, RealtimeTransport};

#[derive(Default)]
struct LoopbackState {
    sink: Option<EventSink>,
    channels: HashSet<String>,
    operations: Vec<String>,
    connects: usize,
    refuse_subscriptions: bool,
}

/// An in-process transport. Whatever is [`published`](LoopbackTransport::publish) on a subscribed channel is delivered
/// to the hub; everything else is dropped, just like a real broker would.
///
/// Every membership change is recorded, which makes the transport useful as a test double as well as for offline use.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event. Returns `true` if a connected hub is subscribed to `channel` and received it.
    pub async fn publish(&self, channel: &str, event: &str, data: Value) -> bool {
        let sink = {
            let state = self.state.lock();
            if !state.channels.contains(channel) {
                trace!("📡️ Loopback: nobody is listening on {channel}. Dropping {event}");
                return false;
            }
            state.sink.clone()
        };
        match sink {
            Some(sink) => sink.send(ChannelEvent::new(channel, event, data)).await.is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state.lock().channels.contains(channel)
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels = self.state.lock().channels.iter().cloned().collect::<Vec<_>>();
        channels.sort();
        channels
    }

    /// Membership changes in the order they happened, e.g. `subscribe:m1`, `unsubscribe:m1`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }

    pub fn subscribe_count(&self, channel: &str) -> usize {
        self.count_ops(&format!("subscribe:{channel}"))
    }

    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.count_ops(&format!("unsubscribe:{channel}"))
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// Make subsequent subscriptions fail, as a broker rejecting the channel would.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.state.lock().refuse_subscriptions = refuse;
    }

    /// Lose the connection without being asked to, as a dropped socket would. The broker forgets every subscription.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.sink = None;
        state.channels.clear();
        state.operations.push("connection_lost".to_string());
        debug!("📡️ Loopback transport lost its connection");
    }

    fn count_ops(&self, op: &str) -> usize {
        self.state.lock().operations.iter().filter(|o| o.as_str() == op).count()
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn connect(&self, sink: EventSink) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        state.sink = Some(sink);
        state.connects += 1;
        debug!("📡️ Loopback transport connected");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return Err(RealtimeError::NotConnected);
        }
        if state.refuse_subscriptions {
            return Err(RealtimeError::Protocol(format!("Subscription to {channel} was refused")));
        }
        state.operations.push(format!("subscribe:{channel}"));
        state.channels.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        state.operations.push(format!("unsubscribe:{channel}"));
        state.channels.remove(channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        state.sink = None;
        state.channels.clear();
        state.operations.push("disconnect".to_string());
        debug!("📡️ Loopback transport disconnected");
        Ok(())
    }
}
