use std::{str::FromStr, time::Duration};

use cucumber::{given, then, when};
use e2e::helpers::eventually;
use log::*;
use pos_api_client::{CreateOrderRequest, OrderHistory, OrderQuery, OrderStatus};
use pos_common::AbortSignal;
use pos_engine::{Activation, EventProducers, PaymentTracker, PAYMENT_COMPLETED_EVENT};
use rust_decimal::Decimal;

use crate::cucumber::{
    world::{ACCESS_TOKEN, MERCHANT_ID},
    PosWorld,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

fn order_route(world: &PosWorld, n: usize) -> String {
    format!("GET /orders/{}", world.order(n - 1).order_id.as_str())
}

//--------------------------------------        Backend        ---------------------------------------------------------
#[given("a running backend")]
async fn running_backend(world: &mut PosWorld) {
    world.start_server().await;
}

#[given(expr = "a pending order for {word} {word}")]
async fn pending_order(world: &mut PosWorld, amount: String, currency: String) {
    let amount = Decimal::from_str(&amount).expect("Invalid amount");
    let order = world.api().create_order(&CreateOrderRequest::new(amount, currency)).await.expect("Order not created");
    assert_eq!(order.status, OrderStatus::Pending);
    debug!("🌍️ Created order {}", order.order_id);
    world.orders.push(order);
}

#[given(expr = "the merchant has {int} orders")]
fn seed_orders(world: &mut PosWorld, n: usize) {
    world.orders.extend(world.backend.seed_orders(n));
}

#[given(expr = "the merchant has {int} more orders")]
fn seed_more_orders(world: &mut PosWorld, n: usize) {
    seed_orders(world, n);
}

#[given("the backend fails the next request")]
fn fail_next_request(world: &mut PosWorld) {
    world.backend.fail_next(1);
}

#[given("the access token has been revoked")]
fn revoke_token(world: &mut PosWorld) {
    world.backend.revoke_token(ACCESS_TOKEN);
}

#[when(expr = "the payment for order {int} is completed")]
async fn complete_payment(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    let event = world.backend.complete_order(&order_id).expect("Unknown order");
    // Nobody may be listening, e.g. when the cashier is tracking another merchant
    let delivered = world.transport.publish(MERCHANT_ID, PAYMENT_COMPLETED_EVENT, event).await;
    debug!("🌍️ Payment notification for {order_id} delivered: {delivered}");
}

#[when(expr = "the payment for order {int} is completed without a notification")]
fn complete_payment_silently(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    world.backend.complete_order(&order_id).expect("Unknown order");
}

#[when(expr = "the notification for order {int} is sent again")]
async fn resend_notification(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    let event = world.backend.complete_order(&order_id).expect("Unknown order");
    assert!(world.transport.publish(MERCHANT_ID, PAYMENT_COMPLETED_EVENT, event).await);
}

#[when(expr = "the payment for order {int} fails")]
fn fail_payment(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    world.backend.set_order_status(&order_id, OrderStatus::Failed).expect("Unknown order");
}

//--------------------------------------       Tracking        ---------------------------------------------------------
#[when(expr = "the cashier tracks order {int}")]
async fn track_order(world: &mut PosWorld, n: usize) {
    let order = world.order(n - 1).clone();
    let mut tracker = PaymentTracker::new(world.realtime.clone(), world.api(), EventProducers::default());
    let activation = tracker.track(Some(order.merchant_id), Some(order.order_id)).await;
    assert_eq!(activation, Activation::Realtime);
    world.tracker = Some(tracker);
}

#[when(expr = "the cashier tracks order {int} without realtime updates")]
async fn track_order_pull_only(world: &mut PosWorld, n: usize) {
    let order = world.order(n - 1).clone();
    world.transport.refuse_subscriptions(true);
    let mut tracker = PaymentTracker::new(world.realtime.clone(), world.api(), EventProducers::default())
        .with_poll_interval(Duration::from_millis(50));
    let activation = tracker.track(Some(order.merchant_id), Some(order.order_id)).await;
    assert!(matches!(activation, Activation::PullOnly(_)), "Expected pull-only tracking, got {activation:?}");
    world.tracker = Some(tracker);
}

#[when("the cashier checks the payment status")]
async fn check_payment_status(world: &mut PosWorld) {
    let order = world.tracker().check_payment_status().await.expect("Status check failed");
    debug!("🌍️ Order {} is {}", order.order_id, order.status);
}

#[when("the cashier stops tracking")]
async fn stop_tracking(world: &mut PosWorld) {
    let tracker = world.tracker.as_mut().expect("No tracker");
    tracker.close().await;
}

#[then(expr = "the tracked status becomes {string}")]
async fn status_becomes(world: &mut PosWorld, expected: String) {
    let tracker = world.tracker();
    let wanted = expected.as_str();
    let settled =
        eventually(SETTLE_TIMEOUT, move || async move { tracker.status().to_string().eq_ignore_ascii_case(wanted) }).await;
    assert!(settled, "Expected status {expected}, but it is {}", tracker.status());
}

#[then(expr = "the tracked status is still {string}")]
async fn status_unchanged(world: &mut PosWorld, expected: String) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = world.tracker().status();
    assert!(status.to_string().eq_ignore_ascii_case(&expected), "Expected status {expected}, but it is {status}");
}

#[then(expr = "the merchant channel has {int} holder(s)")]
fn channel_holders(world: &mut PosWorld, n: usize) {
    assert_eq!(world.realtime.holder_count(MERCHANT_ID), n);
    assert!(world.transport.is_subscribed(MERCHANT_ID));
}

#[then("the merchant channel has been left")]
async fn channel_left(world: &mut PosWorld) {
    let transport = &world.transport;
    let left = eventually(SETTLE_TIMEOUT, move || async move { !transport.is_subscribed(MERCHANT_ID) }).await;
    assert!(left, "Still subscribed to {MERCHANT_ID}");
    assert_eq!(world.transport.unsubscribe_count(MERCHANT_ID), 1);
    assert_eq!(world.realtime.total_bindings(), 0);
}

//--------------------------------------        History        ---------------------------------------------------------
#[when(expr = "the merchant loads a page of {int} orders")]
async fn load_first_page(world: &mut PosWorld, limit: u32) {
    let mut history = OrderHistory::new(limit);
    history.fetch_next_page(world.api().as_ref()).await.expect("Page not loaded");
    world.history = Some(history);
}

#[when("the merchant loads the next page")]
async fn load_next_page(world: &mut PosWorld) {
    let api = world.api();
    let history = world.history.as_mut().expect("No history");
    history.fetch_next_page(api.as_ref()).await.expect("Page not loaded");
}

#[then(expr = "the history holds {int} orders")]
fn history_size(world: &mut PosWorld, n: usize) {
    assert_eq!(world.history.as_ref().expect("No history").len(), n);
}

#[then(expr = "the history holds {int} unique orders")]
fn history_unique(world: &mut PosWorld, n: usize) {
    let history = world.history.as_ref().expect("No history");
    let mut ids = history.orders().iter().map(|o| o.order_id.clone()).collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    assert_eq!(history.len(), n);
    assert_eq!(ids.len(), n);
}

#[then("the history is exhausted")]
fn history_exhausted(world: &mut PosWorld) {
    assert!(world.history.as_ref().expect("No history").is_exhausted());
}

//--------------------------------------        Queries        ---------------------------------------------------------
#[when(expr = "the merchant opens a disabled query for order {int}")]
async fn open_query(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    let mut query = OrderQuery::new(world.api(), order_id);
    let loaded = query.load(&AbortSignal::new()).await.expect("Load failed");
    assert!(loaded.is_none());
    world.query = Some(query);
}

#[when("the merchant refetches the query")]
async fn refetch_query(world: &mut PosWorld) {
    let query = world.query.as_mut().expect("No query");
    query.refetch(&AbortSignal::new()).await.expect("Refetch failed");
}

#[then(expr = "the query holds order {int}")]
fn query_holds(world: &mut PosWorld, n: usize) {
    let expected = world.order(n - 1).order_id.clone();
    let data = world.query.as_ref().and_then(|q| q.data()).expect("Query has no data");
    assert_eq!(data.order_id, expected);
}

#[when(expr = "the merchant refetches order {int}")]
async fn refetch_order(world: &mut PosWorld, n: usize) {
    let order_id = world.order(n - 1).order_id.clone();
    world.last_error = world.api().get_order(&order_id).await.err();
}

#[then("the request succeeded")]
fn request_succeeded(world: &mut PosWorld) {
    assert!(world.last_error.is_none(), "Request failed: {:?}", world.last_error);
}

#[then(expr = "the request failed with status {int} and the message {string}")]
fn request_failed(world: &mut PosWorld, status: u16, message: String) {
    let err = world.last_error.take().expect("The request did not fail");
    assert_eq!(err.status_code(), Some(status), "{err}");
    assert!(err.to_string().contains(&message), "Expected '{message}' in '{err}'");
}

#[then(expr = "order {int} was fetched {int} time(s)")]
fn fetch_count(world: &mut PosWorld, n: usize, count: usize) {
    let route = order_route(world, n);
    assert_eq!(world.backend.request_count(&route), count, "Unexpected request count for {route}");
}
