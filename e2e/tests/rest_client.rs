use std::{sync::Arc, time::Duration};

use chrono::Utc;
use e2e::{helpers::json_is_subset_of, MockBackend, MockServer};
use pos_api_client::{
    CreateDepositRequest,
    CreateMerchantRequest,
    CreateOrderRequest,
    MerchantProfileCache,
    OrderHistory,
    OrderId,
    OrderStatus,
    PosApi,
    PosApiError,
    ReportGrouping,
    ReportParams,
    StaticTokenStore,
    UpdateWalletRequest,
};
use pos_engine::{
    Activation,
    EventHandlers,
    EventHooks,
    LoopbackTransport,
    PaymentTracker,
    RealtimeClient,
    TrackedStatus,
    PAYMENT_COMPLETED_EVENT,
};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

const TOKEN: &str = "token-a";

async fn setup(backend: MockBackend) -> (MockServer, PosApi, Arc<StaticTokenStore>) {
    let _ = env_logger::try_init();
    backend.accept_token(TOKEN);
    let server = MockServer::start(backend).await.expect("mock backend did not start");
    let tokens = Arc::new(StaticTokenStore::new(TOKEN));
    let api = PosApi::new(server.api_config(), tokens.clone()).unwrap();
    (server, api, tokens)
}

#[tokio::test]
async fn create_and_fetch_order() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let order = api.create_order(&CreateOrderRequest::new(dec!(12.50), "USD").with_description("Flat white")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.qrcode.is_some());
    let fetched = api.get_order(&order.order_id).await.unwrap();
    assert_eq!(fetched, order);
    let json = serde_json::to_value(&fetched).unwrap();
    assert!(json_is_subset_of(r#"{"status": "PENDING", "description": "Flat white"}"#, &json), "{json}");
    server.stop().await;
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let order = server.backend.seed_orders(1).remove(0);
    server.backend.fail_next(1);
    let fetched = api.get_order(&order.order_id).await.unwrap();
    assert_eq!(fetched.order_id, order.order_id);
    assert_eq!(server.backend.request_count(&format!("GET /orders/{}", order.order_id.as_str())), 2);
    server.stop().await;
}

#[tokio::test]
async fn persistent_failure_gives_up_after_two_attempts() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let order = server.backend.seed_orders(1).remove(0);
    server.backend.fail_next(5);
    let err = api.get_order(&order.order_id).await.unwrap_err();
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(err.to_string(), "Query failed. Error 503. Injected failure");
    assert_eq!(server.backend.request_count(&format!("GET /orders/{}", order.order_id.as_str())), 2);
    server.stop().await;
}

#[tokio::test]
async fn unauthorised_requests_are_retried_and_reported() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    server.backend.revoke_token(TOKEN);
    let err = api.list_orders(&Default::default()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert!(err.to_string().contains("Invalid or missing token"), "{err}");
    assert_eq!(server.backend.request_count("GET /orders"), 2);
    server.stop().await;
}

#[tokio::test]
async fn missing_order_carries_server_body() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let err = api.get_order(&OrderId::new("nope")).await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(err.server_data().unwrap()["message"], "Order not found");
    server.stop().await;
}

#[tokio::test]
async fn rotated_tokens_are_used_immediately() {
    let (server, api, tokens) = setup(MockBackend::new("m1")).await;
    server.backend.accept_token("token-b");
    api.list_orders(&Default::default()).await.unwrap();
    tokens.set_token("token-b");
    api.list_orders(&Default::default()).await.unwrap();
    assert_eq!(server.backend.tokens_seen(), vec![TOKEN.to_string(), "token-b".to_string()]);
    server.stop().await;
}

#[tokio::test]
async fn missing_token_never_reaches_the_server() {
    let (server, api, tokens) = setup(MockBackend::new("m1")).await;
    tokens.clear();
    let err = api.list_orders(&Default::default()).await.unwrap_err();
    assert!(matches!(err, PosApiError::MissingToken), "{err}");
    assert_eq!(server.backend.total_requests(), 0);
    server.stop().await;
}

#[tokio::test]
async fn invalid_forms_are_rejected_locally() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let err = api.create_order(&CreateOrderRequest::new(dec!(0), "dollars")).await.unwrap_err();
    let PosApiError::Validation(errors) = err else { panic!("Expected a validation error, got {err}") };
    assert!(errors.field("display_amount").is_some());
    assert!(errors.field("display_currency").is_some());
    let update = UpdateWalletRequest { wallet_address: "0x1234".into(), chain: None };
    assert!(matches!(api.update_wallet("main", &update).await, Err(PosApiError::Validation(_))));
    assert_eq!(server.backend.total_requests(), 0);
    server.stop().await;
}

#[tokio::test]
async fn history_pages_are_newest_first_and_filtered() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let orders = server.backend.seed_orders(7);
    server.backend.set_order_status(&orders[1].order_id, OrderStatus::Completed);
    server.backend.set_order_status(&orders[4].order_id, OrderStatus::Completed);
    let mut history = OrderHistory::new(3);
    history.fetch_all(&api, 10).await.unwrap();
    assert_eq!(history.len(), 7);
    assert_eq!(history.orders()[0].order_id, orders[6].order_id);
    assert!(history.is_exhausted());
    // 3 + 3 + 1
    assert_eq!(server.backend.request_count("GET /orders"), 3);

    let mut completed = OrderHistory::new(20).with_status(OrderStatus::Completed);
    completed.fetch_all(&api, 10).await.unwrap();
    let ids = completed.orders().iter().map(|o| o.order_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec![orders[4].order_id.clone(), orders[1].order_id.clone()]);
    server.stop().await;
}

#[tokio::test]
async fn merchant_profile_is_fetched_once() {
    let (server, api, _) = setup(MockBackend::new("m1").with_merchant_profile("Corner Cafe")).await;
    let cache = MerchantProfileCache::new(api.clone());
    let first = cache.profile().await.unwrap();
    let second = cache.profile().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.display_name.as_deref(), Some("Corner Cafe"));
    assert_eq!(server.backend.request_count("GET /merchants"), 1);

    let stellar = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";
    let update = UpdateWalletRequest { wallet_address: stellar.into(), chain: Some("stellar".into()) };
    let merchant = api.update_wallet("main", &update).await.unwrap();
    assert_eq!(merchant.stellar_address.as_deref(), Some(stellar));
    cache.invalidate().await;
    assert_eq!(cache.profile().await.unwrap().stellar_address.as_deref(), Some(stellar));
    assert_eq!(server.backend.request_count("GET /merchants"), 2);
    server.stop().await;
}

#[tokio::test]
async fn merchant_sign_up() {
    let (server, api, _) = setup(MockBackend::new("m7")).await;
    let err = api.fetch_merchant().await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    let req = CreateMerchantRequest { display_name: Some("Night Market".into()), ..Default::default() };
    let merchant = api.create_merchant(&req).await.unwrap();
    assert_eq!(merchant.merchant_id.as_str(), "m7");
    assert_eq!(merchant.default_currency, "USD");
    assert_eq!(api.fetch_merchant().await.unwrap(), merchant);
    server.stop().await;
}

#[tokio::test]
async fn deposits() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let deposit = api.create_deposit(&CreateDepositRequest { amount: dec!(250), currency: "USDC".into() }).await.unwrap();
    assert_eq!(deposit.status, OrderStatus::Pending);
    assert!(deposit.payment_url.is_some());
    assert_eq!(api.get_deposit(&deposit.deposit_id).await.unwrap(), deposit);
    assert_eq!(api.list_deposits().await.unwrap(), vec![deposit]);
    server.stop().await;
}

#[tokio::test]
async fn daily_report() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let orders = server.backend.seed_orders(3);
    server.backend.set_order_status(&orders[2].order_id, OrderStatus::Completed);
    let today = Utc::now().date_naive();
    let params = ReportParams { from: today.pred_opt().unwrap(), to: today.succ_opt().unwrap(), group_by: ReportGrouping::Day };
    let report = api.fetch_report(&params).await.unwrap();
    assert_eq!(report.summary.total_orders, 3);
    assert_eq!(report.summary.completed_orders, 1);
    // Seeded amounts are 1, 2 and 3
    assert_eq!(report.summary.total_amount_usd, dec!(6));
    let total = report.groups.iter().map(|g| g.total_orders).sum::<u64>();
    assert_eq!(total, 3);
    server.stop().await;
}

#[tokio::test]
async fn tracker_confirms_payment_against_the_backend() {
    let (server, api, _) = setup(MockBackend::new("m1")).await;
    let api = Arc::new(api);
    let order = api.create_order(&CreateOrderRequest::new(dec!(4.20), "USD")).await.unwrap();
    let transport = LoopbackTransport::new();
    let realtime = RealtimeClient::new(Arc::new(transport.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut hooks = EventHooks::default();
    hooks.on_payment_status(move |ev| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev);
        })
    });
    let handlers = EventHandlers::new(8, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let mut tracker = PaymentTracker::new(realtime.clone(), api.clone(), producers);
    let activation = tracker.track(Some(order.merchant_id.clone()), Some(order.order_id.clone())).await;
    assert_eq!(activation, Activation::Realtime);

    let event = server.backend.complete_order(&order.order_id).unwrap();
    assert!(transport.publish("m1", PAYMENT_COMPLETED_EVENT, event).await);
    let status = tokio::time::timeout(Duration::from_secs(3), tracker.wait_for_terminal()).await.unwrap();
    assert_eq!(status, TrackedStatus::Completed);
    let settled = tracker.settled_order(Duration::from_secs(3)).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Completed);
    assert_eq!(settled.display_amount, dec!(4.20));
    assert_eq!(server.backend.request_count(&format!("GET /orders/{}", order.order_id.as_str())), 1);

    let ev = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
    assert_eq!(ev.order_id, order.order_id);
    assert_eq!(ev.status, TrackedStatus::Completed);

    tracker.close().await;
    assert!(!transport.is_subscribed("m1"));
    realtime.disconnect().await.unwrap();
    server.stop().await;
}
