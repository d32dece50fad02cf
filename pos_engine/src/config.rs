use std::{fmt::Display, str::FromStr, sync::Arc};

use log::*;
use pos_common::{env_flag, env_or_default};

use crate::realtime::{LoopbackTransport, PusherConfig, PusherTransport, RealtimeError, RealtimeTransport};

/// Which [`RealtimeTransport`] adapter to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Pusher,
    Loopback,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Pusher => write!(f, "pusher"),
            TransportKind::Loopback => write!(f, "loopback"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pusher" => Ok(Self::Pusher),
            "loopback" | "local" => Ok(Self::Loopback),
            other => Err(format!("{other} is not a known realtime transport.")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub transport: TransportKind,
    pub pusher: PusherConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self { transport: TransportKind::Pusher, pusher: PusherConfig::new("", "") }
    }
}

impl RealtimeConfig {
    pub fn loopback() -> Self {
        Self { transport: TransportKind::Loopback, ..Default::default() }
    }

    pub fn new_from_env_or_default() -> Self {
        let transport = env_or_default("POS_REALTIME_TRANSPORT", TransportKind::Pusher);
        let app_key = std::env::var("POS_PUSHER_KEY").unwrap_or_else(|_| {
            if transport == TransportKind::Pusher {
                warn!("🪛️ POS_PUSHER_KEY is not set. The Pusher transport cannot connect without it.");
            }
            String::default()
        });
        let cluster = std::env::var("POS_PUSHER_CLUSTER").unwrap_or_default();
        let host = std::env::var("POS_PUSHER_HOST").ok().filter(|h| !h.trim().is_empty());
        if let Some(host) = &host {
            info!("🪛️ Using {host} as the Pusher host");
        }
        let use_tls = env_flag("POS_PUSHER_TLS", true);
        let pusher = PusherConfig { app_key, cluster, host, use_tls };
        Self { transport, pusher }
    }

    /// Build the transport adapter this configuration selects.
    pub fn build_transport(&self) -> Result<Arc<dyn RealtimeTransport>, RealtimeError> {
        info!("🪛️ Using the {} realtime transport", self.transport);
        match self.transport {
            TransportKind::Pusher => Ok(Arc::new(PusherTransport::new(self.pusher.clone())?)),
            TransportKind::Loopback => Ok(Arc::new(LoopbackTransport::new())),
        }
    }
}
