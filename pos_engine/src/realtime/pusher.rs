//! A [`RealtimeTransport`] that speaks version 7 of the Pusher Channels protocol over a WebSocket.
//!
//! Only the public-channel subset of the protocol is implemented: connection handshake, subscribe/unsubscribe,
//! application-level ping/pong and error frames. A subscription only succeeds once the server confirms it. Application events are forwarded to the hub with their `data` decoded,
//! whether the server sent it as a JSON string (the usual case) or as an embedded object.
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use log::*;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{oneshot, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::realtime::{ChannelEvent, EventSink, RealtimeError, RealtimeTransport};

const PROTOCOL_VERSION: &str = "7";
const CLIENT_NAME: &str = "pos-rs";
/// Covers the TCP and TLS connection as well as the Pusher handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type SharedWriter = Arc<AsyncMutex<Option<WsWriter>>>;
type PendingSubscriptions = Arc<parking_lot::Mutex<HashMap<String, oneshot::Sender<Result<(), RealtimeError>>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherConfig {
    pub app_key: String,
    pub cluster: String,
    /// Overrides the cluster's default host, e.g. for a self-hosted, Pusher-compatible server. May include a port.
    pub host: Option<String>,
    pub use_tls: bool,
}

impl PusherConfig {
    pub fn new<K: Into<String>, C: Into<String>>(app_key: K, cluster: C) -> Self {
        Self { app_key: app_key.into(), cluster: cluster.into(), host: None, use_tls: true }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.app_key.trim().is_empty() {
            return Err(RealtimeError::Configuration("The Pusher app key is not set".into()));
        }
        let has_host = self.host.as_ref().is_some_and(|h| !h.trim().is_empty());
        if self.cluster.trim().is_empty() && !has_host {
            return Err(RealtimeError::Configuration("Neither a Pusher cluster nor a host is set".into()));
        }
        Ok(())
    }

    pub fn socket_url(&self) -> Result<Url, RealtimeError> {
        self.validate()?;
        let host = match self.host.as_ref().filter(|h| !h.trim().is_empty()) {
            Some(host) => host.trim().to_string(),
            None => format!("ws-{}.pusher.com", self.cluster.trim()),
        };
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{host}"))
            .map_err(|e| RealtimeError::Configuration(format!("{host} is not a valid Pusher host. {e}")))?;
        url.set_path(&format!("/app/{}", self.app_key.trim()));
        url.query_pairs_mut()
            .append_pair("protocol", PROTOCOL_VERSION)
            .append_pair("client", CLIENT_NAME)
            .append_pair("version", env!("CARGO_PKG_VERSION"))
            .append_pair("flash", "false");
        Ok(url)
    }
}

//--------------------------------------     Wire frames       ---------------------------------------------------------
#[derive(Debug, Deserialize)]
struct PusherFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Established { socket_id: String },
    Ping,
    Error { code: Option<i64>, message: String },
    SubscriptionSucceeded(String),
    SubscriptionError { channel: Option<String>, code: Option<i64>, message: String },
    Event(ChannelEvent),
    Ignored(String),
}

/// Pusher double-encodes `data` as a JSON string. Some servers embed the object directly, so accept both.
fn decode_data(data: Value) -> Value {
    match data {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v) => v,
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

fn parse_frame(text: &str) -> Result<Inbound, RealtimeError> {
    let frame = serde_json::from_str::<PusherFrame>(text)
        .map_err(|e| RealtimeError::Protocol(format!("Could not parse frame. {e}")))?;
    let data = decode_data(frame.data);
    let inbound = match (frame.event.as_str(), frame.channel) {
        ("pusher:connection_established", _) => {
            let socket_id = data
                .get("socket_id")
                .and_then(Value::as_str)
                .ok_or_else(|| RealtimeError::Protocol("Handshake frame has no socket_id".into()))?;
            Inbound::Established { socket_id: socket_id.to_string() }
        },
        ("pusher:ping", _) => Inbound::Ping,
        ("pusher:error", _) => Inbound::Error { code: error_code(&data), message: error_message(&data) },
        ("pusher:subscription_error", channel) => {
            Inbound::SubscriptionError { channel, code: error_code(&data), message: error_message(&data) }
        },
        ("pusher_internal:subscription_succeeded", Some(channel)) => Inbound::SubscriptionSucceeded(channel),
        (event, Some(channel)) if !event.starts_with("pusher") => Inbound::Event(ChannelEvent::new(channel, event, data)),
        (event, _) => Inbound::Ignored(event.to_string()),
    };
    Ok(inbound)
}

fn error_code(data: &Value) -> Option<i64> {
    data.get("code").or_else(|| data.get("status")).and_then(Value::as_i64)
}

fn error_message(data: &Value) -> String {
    data.get("message").or_else(|| data.get("error")).and_then(Value::as_str).unwrap_or("unknown error").to_string()
}

/// Hand the server's verdict on `channel` to whoever is waiting in [`PusherTransport::subscribe`].
fn resolve_subscription(pending: &PendingSubscriptions, channel: &str, result: Result<(), RealtimeError>) {
    match pending.lock().remove(channel) {
        Some(waiter) => {
            let _ = waiter.send(result);
        },
        None => trace!("📡️ Nobody is waiting on a subscription to {channel}"),
    }
}

async fn send_frame(writer: &SharedWriter, event: &str, data: Value) -> Result<(), RealtimeError> {
    let payload = json!({ "event": event, "data": data }).to_string();
    let mut guard = writer.lock().await;
    let ws = guard.as_mut().ok_or(RealtimeError::NotConnected)?;
    ws.send(Message::Text(payload)).await.map_err(|e| RealtimeError::Send(e.to_string()))
}

async fn wait_for_handshake(reader: &mut WsReader) -> Result<String, RealtimeError> {
    while let Some(msg) = reader.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                return Err(RealtimeError::Connection(format!("Server closed the connection during handshake. {frame:?}")))
            },
            Ok(_) => continue,
            Err(e) => return Err(RealtimeError::Connection(e.to_string())),
        };
        match parse_frame(&text)? {
            Inbound::Established { socket_id } => return Ok(socket_id),
            Inbound::Error { code, message } => {
                return Err(RealtimeError::Connection(format!("Pusher refused the connection ({code:?}). {message}")))
            },
            other => trace!("📡️ Ignoring {other:?} before handshake"),
        }
    }
    Err(RealtimeError::Connection("Connection closed before the handshake completed".into()))
}

async fn open_socket(url: &Url) -> Result<(WsWriter, WsReader, String), RealtimeError> {
    let (stream, _) = connect_async(url.as_str()).await.map_err(|e| RealtimeError::Connection(e.to_string()))?;
    let (writer, mut reader) = stream.split();
    let socket_id = wait_for_handshake(&mut reader).await?;
    Ok((writer, reader, socket_id))
}

async fn read_loop(mut reader: WsReader, writer: SharedWriter, pending: PendingSubscriptions, sink: EventSink) {
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Text(text)) => match parse_frame(&text) {
                Ok(Inbound::Event(ev)) => {
                    trace!("📡️ {} on {}", ev.event, ev.channel);
                    if sink.send(ev).await.is_err() {
                        debug!("📡️ Event sink has closed. Stopping the Pusher reader");
                        break;
                    }
                },
                Ok(Inbound::Ping) => {
                    if let Err(e) = send_frame(&writer, "pusher:pong", json!({})).await {
                        warn!("📡️ Could not answer a Pusher ping. {e}");
                    }
                },
                Ok(Inbound::Error { code, message }) => warn!("📡️ Pusher error ({code:?}): {message}"),
                Ok(Inbound::SubscriptionSucceeded(channel)) => {
                    debug!("📡️ Subscribed to {channel}");
                    resolve_subscription(&pending, &channel, Ok(()));
                },
                Ok(Inbound::SubscriptionError { channel: Some(channel), code, message }) => {
                    warn!("📡️ Pusher refused the subscription to {channel} ({code:?}). {message}");
                    let err = RealtimeError::Protocol(format!("Subscription to {channel} was refused. {message}"));
                    resolve_subscription(&pending, &channel, Err(err));
                },
                Ok(Inbound::SubscriptionError { channel: None, code, message }) => {
                    warn!("📡️ Pusher refused a subscription ({code:?}). {message}");
                },
                Ok(Inbound::Established { socket_id }) => debug!("📡️ Connection re-established as {socket_id}"),
                Ok(Inbound::Ignored(event)) => trace!("📡️ Ignoring {event}"),
                Err(e) => warn!("📡️ {e}"),
            },
            Ok(Message::Close(frame)) => {
                info!("📡️ Pusher closed the connection. {frame:?}");
                break;
            },
            Ok(_) => {},
            Err(e) => {
                error!("📡️ Pusher connection failed. {e}");
                break;
            },
        }
    }
    writer.lock().await.take();
    // Waiters see their sender dropped and report NotConnected
    pending.lock().clear();
    debug!("📡️ Pusher reader has stopped");
}

//--------------------------------------   PusherTransport     ---------------------------------------------------------
pub struct PusherTransport {
    config: PusherConfig,
    writer: SharedWriter,
    pending: PendingSubscriptions,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    socket_id: parking_lot::Mutex<Option<String>>,
}

impl PusherTransport {
    /// Fails if the configuration is incomplete, rather than connecting to a broken URL later.
    pub fn new(config: PusherConfig) -> Result<Self, RealtimeError> {
        config.validate()?;
        Ok(Self {
            config,
            writer: Arc::new(AsyncMutex::new(None)),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            reader: parking_lot::Mutex::new(None),
            socket_id: parking_lot::Mutex::new(None),
        })
    }

    pub fn socket_id(&self) -> Option<String> {
        self.socket_id.lock().clone()
    }
}

#[async_trait]
impl RealtimeTransport for PusherTransport {
    fn name(&self) -> &'static str {
        "pusher"
    }

    async fn connect(&self, sink: EventSink) -> Result<(), RealtimeError> {
        let url = self.config.socket_url()?;
        info!("📡️ Connecting to {}", url.host_str().unwrap_or_default());
        let (writer, reader, socket_id) = tokio::time::timeout(CONNECT_TIMEOUT, open_socket(&url))
            .await
            .map_err(|_| RealtimeError::Connection(format!("Timed out connecting to {url}")))??;
        info!("📡️ Connected to Pusher as {socket_id}");
        *self.socket_id.lock() = Some(socket_id);
        *self.writer.lock().await = Some(writer);
        let handle = tokio::spawn(read_loop(reader, Arc::clone(&self.writer), Arc::clone(&self.pending), sink));
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        debug!("📡️ Subscribing to {channel}");
        let (waiter, verdict) = oneshot::channel();
        self.pending.lock().insert(channel.to_string(), waiter);
        if let Err(e) = send_frame(&self.writer, "pusher:subscribe", json!({ "channel": channel })).await {
            self.pending.lock().remove(channel);
            return Err(e);
        }
        let result = match tokio::time::timeout(SUBSCRIBE_TIMEOUT, verdict).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::NotConnected),
            Err(_) => Err(RealtimeError::Connection(format!("Pusher did not confirm the subscription to {channel}"))),
        };
        if result.is_err() {
            self.pending.lock().remove(channel);
        }
        result
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        debug!("📡️ Unsubscribing from {channel}");
        send_frame(&self.writer, "pusher:unsubscribe", json!({ "channel": channel })).await
    }

    async fn disconnect(&self) -> Result<(), RealtimeError> {
        let writer = self.writer.lock().await.take();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.socket_id.lock().take();
        self.pending.lock().clear();
        match writer {
            Some(mut ws) => {
                info!("📡️ Disconnecting from Pusher");
                ws.close().await.map_err(|e| RealtimeError::Send(e.to_string()))
            },
            None => Ok(()),
        }
    }
}
