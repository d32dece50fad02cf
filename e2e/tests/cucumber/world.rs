use std::{fmt::Debug, sync::Arc};

use cucumber::World;
use e2e::{MockBackend, MockServer};
use log::*;
use pos_api_client::{Order, OrderHistory, OrderQuery, PosApi, PosApiError, StaticTokenStore};
use pos_engine::{LoopbackTransport, PaymentTracker, RealtimeClient};

pub const MERCHANT_ID: &str = "m1";
pub const ACCESS_TOKEN: &str = "cashier-token";

#[derive(World)]
pub struct PosWorld {
    pub backend: MockBackend,
    pub server: Option<MockServer>,
    pub tokens: Arc<StaticTokenStore>,
    pub transport: LoopbackTransport,
    pub realtime: RealtimeClient,
    pub api: Option<Arc<PosApi>>,
    pub tracker: Option<PaymentTracker<PosApi>>,
    pub orders: Vec<Order>,
    pub history: Option<OrderHistory>,
    pub query: Option<OrderQuery<PosApi>>,
    pub last_error: Option<PosApiError>,
}

impl Debug for PosWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosWorld")
            .field("server", &self.server.as_ref().map(|s| s.url.as_str()))
            .field("orders", &self.orders.len())
            .field("tracking", &self.tracker.as_ref().and_then(|t| t.tracked_order()))
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Default for PosWorld {
    fn default() -> Self {
        let _ = env_logger::try_init().ok();
        let backend = MockBackend::new(MERCHANT_ID).with_merchant_profile("Corner Cafe");
        backend.accept_token(ACCESS_TOKEN);
        let transport = LoopbackTransport::new();
        let realtime = RealtimeClient::new(Arc::new(transport.clone()));
        Self {
            backend,
            server: None,
            tokens: Arc::new(StaticTokenStore::new(ACCESS_TOKEN)),
            transport,
            realtime,
            api: None,
            tracker: None,
            orders: Vec::new(),
            history: None,
            query: None,
            last_error: None,
        }
    }
}

impl PosWorld {
    pub async fn start_server(&mut self) {
        let server = MockServer::start(self.backend.clone()).await.expect("Error starting mock backend");
        info!("🌍️ Mock backend started at {}", server.url);
        let api = PosApi::new(server.api_config(), self.tokens.clone()).expect("Error creating API client");
        self.api = Some(Arc::new(api));
        self.server = Some(server);
    }

    pub fn api(&self) -> Arc<PosApi> {
        self.api.clone().expect("Server not started")
    }

    pub fn order(&self, index: usize) -> &Order {
        self.orders.get(index).expect("No such order")
    }

    pub fn tracker(&self) -> &PaymentTracker<PosApi> {
        self.tracker.as_ref().expect("No tracker")
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut tracker) = self.tracker.take() {
            tracker.close().await;
        }
        let _ = self.realtime.disconnect().await;
        if let Some(server) = self.server.take() {
            info!("🚀️ Stopping server");
            server.stop().await;
            info!("🚀️ Server stopped");
        }
    }
}
