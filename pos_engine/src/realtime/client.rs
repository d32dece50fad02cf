use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    time::Duration,
};

use log::*;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};

use crate::{
    events::Handler,
    realtime::{ChannelEvent, RealtimeError, RealtimeTransport},
};

const DEFAULT_BUFFER_SIZE: usize = 64;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

impl Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

struct Binding {
    id: BindingId,
    holder: u64,
    event: String,
    handler: Handler<ChannelEvent>,
}

struct ChannelState {
    /// Distinguishes this subscription from any earlier or later subscription to the same channel name
    generation: u64,
    holders: HashSet<u64>,
    bindings: Vec<Binding>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, ChannelState>,
    last_id: u64,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

struct HubInner {
    transport: Arc<dyn RealtimeTransport>,
    state: Mutex<HubState>,
    /// Serialises changes to transport-level channel membership
    membership: AsyncMutex<()>,
    dispatcher: AsyncMutex<Option<JoinHandle<()>>>,
    buffer_size: usize,
    /// First back-off step after the transport drops the connection on its own
    reconnect_delay: Duration,
}

impl HubInner {
    /// Remove a holder and its bindings. Returns true if it was the last holder, in which case the channel has been
    /// forgotten and the transport should be unsubscribed.
    fn detach(&self, channel: &str, generation: u64, holder: u64) -> bool {
        let mut state = self.state.lock();
        let Some(ch) = state.channels.get_mut(channel) else {
            return false;
        };
        if ch.generation != generation || !ch.holders.remove(&holder) {
            return false;
        }
        ch.bindings.retain(|b| b.holder != holder);
        if ch.holders.is_empty() {
            state.channels.remove(channel);
            true
        } else {
            false
        }
    }

    fn handlers_for(&self, ev: &ChannelEvent) -> Vec<Handler<ChannelEvent>> {
        let state = self.state.lock();
        state
            .channels
            .get(&ev.channel)
            .map(|ch| ch.bindings.iter().filter(|b| b.event == ev.event).map(|b| Arc::clone(&b.handler)).collect())
            .unwrap_or_default()
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

async fn dispatch(hub: Weak<HubInner>, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(ev) = events.recv().await {
        let handlers = match hub.upgrade() {
            Some(hub) => hub.handlers_for(&ev),
            None => break,
        };
        if handlers.is_empty() {
            trace!("📡️ No bindings for {} on {}", ev.event, ev.channel);
        }
        for handler in handlers {
            (handler)(ev.clone()).await;
        }
    }
    // disconnect() aborts the dispatcher, so getting here means the transport dropped its sink
    debug!("📡️ Realtime dispatcher has stopped");
    let held = hub.upgrade().is_some_and(|h| !h.state.lock().channels.is_empty());
    if held {
        warn!("📡️ Realtime connection lost while channels are still held. Reconnecting in the background");
        tokio::spawn(reconnect(hub));
    }
}

/// Reconnect with exponential back-off until it works, or until nobody holds a channel any more.
fn reconnect(hub: Weak<HubInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(mut delay) = hub.upgrade().map(|h| h.reconnect_delay) else {
            return;
        };
        loop {
            tokio::time::sleep(delay).await;
            let Some(inner) = hub.upgrade() else {
                return;
            };
            let idle = inner.state.lock().channels.is_empty();
            if idle {
                debug!("📡️ No channels are held any more. Not reconnecting");
                return;
            }
            let client = RealtimeClient { inner };
            let result = {
                let _membership = client.inner.membership.lock().await;
                client.ensure_connected().await
            };
            match result {
                Ok(()) => {
                    info!("📡️ Realtime connection restored");
                    return;
                },
                Err(e) => {
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    warn!("📡️ Reconnecting failed. {e}. Trying again in {}s", delay.as_secs());
                },
            }
        }
    })
}

/// The realtime hub.
///
/// One hub owns one transport connection, which is opened lazily on the first subscription. Clones share the same
/// connection and channel table.
///
/// Subscriptions are reference counted per channel. Each call to [`RealtimeClient::subscribe_to_channel`] returns a
/// [`ChannelHandle`], and the transport only leaves the channel once the last handle has been released (or dropped).
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<HubInner>,
}

impl RealtimeClient {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self::with_buffer_size(transport, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(transport: Arc<dyn RealtimeTransport>, buffer_size: usize) -> Self {
        let inner = HubInner {
            transport,
            state: Mutex::new(HubState::default()),
            membership: AsyncMutex::new(()),
            dispatcher: AsyncMutex::new(None),
            buffer_size: buffer_size.max(1),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Set the first back-off step used when the transport loses its connection. Only takes effect before the client
    /// is cloned.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.reconnect_delay = delay,
            None => warn!("📡️ The realtime client is already shared. Keeping the current reconnect delay"),
        }
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.dispatcher.lock().await.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Join `channel`, connecting first if needed. The transport subscription is only issued for the first holder.
    ///
    /// If both `event` and `callback` are given, the callback is bound to that event for the lifetime of the returned
    /// handle. More bindings can be added with [`ChannelHandle::bind`] at any time.
    pub async fn subscribe_to_channel(
        &self,
        channel: &str,
        event: Option<&str>,
        callback: Option<Handler<ChannelEvent>>,
    ) -> Result<ChannelHandle, RealtimeError> {
        let _membership = self.inner.membership.lock().await;
        self.ensure_connected().await?;
        let needs_transport = !self.inner.state.lock().channels.contains_key(channel);
        if needs_transport {
            self.inner.transport.subscribe(channel).await?;
            info!("📡️ Subscribed to channel {channel} on {}", self.inner.transport.name());
        }
        let mut state = self.inner.state.lock();
        let holder = state.next_id();
        let generation = state.next_id();
        let binding_id = BindingId(state.next_id());
        let ch = state.channels.entry(channel.to_string()).or_insert_with(|| ChannelState {
            generation,
            holders: HashSet::new(),
            bindings: Vec::new(),
        });
        ch.holders.insert(holder);
        if let (Some(event), Some(handler)) = (event, callback) {
            ch.bindings.push(Binding { id: binding_id, holder, event: event.to_string(), handler });
        }
        debug!("📡️ Channel {channel} now has {} holder(s)", ch.holders.len());
        Ok(ChannelHandle {
            hub: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            generation: ch.generation,
            holder,
            released: false,
        })
    }

    /// Leave `channel` regardless of how many handles hold it. Outstanding handles become inert. Leaving a channel that
    /// is not subscribed is a no-op.
    pub async fn unsubscribe_from_channel(&self, channel: &str) -> Result<(), RealtimeError> {
        let _membership = self.inner.membership.lock().await;
        let removed = self.inner.state.lock().channels.remove(channel).is_some();
        if !removed {
            debug!("📡️ Not subscribed to {channel}. Nothing to do");
            return Ok(());
        }
        info!("📡️ Leaving channel {channel}");
        self.inner.transport.unsubscribe(channel).await
    }

    /// Leave every channel and close the transport. The next subscription reconnects.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        let _membership = self.inner.membership.lock().await;
        let dropped = {
            let mut state = self.inner.state.lock();
            let n = state.channels.len();
            state.channels.clear();
            n
        };
        let dispatcher = self.inner.dispatcher.lock().await.take();
        let Some(dispatcher) = dispatcher else {
            debug!("📡️ Realtime client is not connected. Nothing to do");
            return Ok(());
        };
        dispatcher.abort();
        info!("📡️ Disconnecting {} transport. {dropped} channel(s) dropped", self.inner.transport.name());
        self.inner.transport.disconnect().await
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.state.lock().channels.contains_key(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels = self.inner.state.lock().channels.keys().cloned().collect::<Vec<_>>();
        channels.sort();
        channels
    }

    pub fn holder_count(&self, channel: &str) -> usize {
        self.inner.state.lock().channels.get(channel).map(|ch| ch.holders.len()).unwrap_or_default()
    }

    pub fn binding_count(&self, channel: &str) -> usize {
        self.inner.state.lock().channels.get(channel).map(|ch| ch.bindings.len()).unwrap_or_default()
    }

    pub fn total_bindings(&self) -> usize {
        self.inner.state.lock().channels.values().map(|ch| ch.bindings.len()).sum()
    }

    // Callers must hold the membership lock
    async fn ensure_connected(&self) -> Result<(), RealtimeError> {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let reconnecting = dispatcher.is_some();
        let (sink, events) = mpsc::channel(self.inner.buffer_size);
        self.inner.transport.connect(sink).await?;
        info!("📡️ Realtime client connected over {}", self.inner.transport.name());
        *dispatcher = Some(tokio::spawn(dispatch(Arc::downgrade(&self.inner), events)));
        if reconnecting {
            let channels = self.inner.state.lock().channels.keys().cloned().collect::<Vec<_>>();
            for channel in channels {
                if let Err(e) = self.inner.transport.subscribe(&channel).await {
                    warn!("📡️ Could not restore subscription to {channel} after reconnecting. {e}");
                }
            }
        }
        Ok(())
    }
}

/// One holder's claim on a channel subscription.
///
/// Bindings made through a handle belong to it and disappear when it is released. Call [`ChannelHandle::release`] to
/// leave the channel and learn about transport errors; dropping the handle releases it in the background.
pub struct ChannelHandle {
    hub: Weak<HubInner>,
    channel: String,
    generation: u64,
    holder: u64,
    released: bool,
}

impl ChannelHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// False once the handle has been released, or the channel was forcibly left or disconnected.
    pub fn is_active(&self) -> bool {
        let Some(hub) = self.hub.upgrade() else {
            return false;
        };
        let state = hub.state.lock();
        state
            .channels
            .get(&self.channel)
            .is_some_and(|ch| ch.generation == self.generation && ch.holders.contains(&self.holder))
    }

    pub fn bind(&self, event: &str, handler: Handler<ChannelEvent>) -> Result<BindingId, RealtimeError> {
        let hub = self.hub.upgrade().ok_or_else(|| RealtimeError::NotSubscribed(self.channel.clone()))?;
        let mut state = hub.state.lock();
        let id = BindingId(state.next_id());
        let ch = state
            .channels
            .get_mut(&self.channel)
            .filter(|ch| ch.generation == self.generation && ch.holders.contains(&self.holder))
            .ok_or_else(|| RealtimeError::NotSubscribed(self.channel.clone()))?;
        ch.bindings.push(Binding { id, holder: self.holder, event: event.to_string(), handler });
        trace!("📡️ Bound {event} on {} as {id}", self.channel);
        Ok(id)
    }

    /// Remove a binding made through this handle. Returns false if there was no such binding.
    pub fn unbind(&self, id: BindingId) -> bool {
        let Some(hub) = self.hub.upgrade() else {
            return false;
        };
        let mut state = hub.state.lock();
        let Some(ch) = state.channels.get_mut(&self.channel).filter(|ch| ch.generation == self.generation) else {
            return false;
        };
        let before = ch.bindings.len();
        ch.bindings.retain(|b| !(b.id == id && b.holder == self.holder));
        before != ch.bindings.len()
    }

    /// Give up this claim on the channel. The transport leaves the channel if this was the last holder.
    pub async fn release(mut self) -> Result<(), RealtimeError> {
        self.released = true;
        let Some(hub) = self.hub.upgrade() else {
            return Ok(());
        };
        let _membership = hub.membership.lock().await;
        if hub.detach(&self.channel, self.generation, self.holder) {
            info!("📡️ Last holder released {}. Leaving the channel", self.channel);
            hub.transport.unsubscribe(&self.channel).await?;
        }
        Ok(())
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        if !hub.detach(&self.channel, self.generation, self.holder) {
            return;
        }
        let channel = std::mem::take(&mut self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _membership = hub.membership.lock().await;
                    // Someone may have joined again since the handle was dropped
                    let rejoined = hub.state.lock().channels.contains_key(&channel);
                    if rejoined {
                        return;
                    }
                    debug!("📡️ Dropped handle was the last holder of {channel}. Leaving the channel");
                    if let Err(e) = hub.transport.unsubscribe(&channel).await {
                        warn!("📡️ Could not leave {channel}. {e}");
                    }
                });
            },
            Err(_) => warn!("📡️ No async runtime is available to leave {channel}. The subscription will linger"),
        }
    }
}
