use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use log::*;
use pos_api_client::{MerchantId, OrderId, PosApi};
use pos_common::env_or_default;
use pos_engine::{
    events::{EventHandlers, EventHooks, PaymentStatusEvent},
    Activation,
    LoopbackTransport,
    PaymentTracker,
    RealtimeClient,
    RealtimeConfig,
    RealtimeTransport,
    TrackedStatus,
};

use crate::{command_def::WatchOptions, formatting::format_order};

const DEFAULT_POLL_SECS: u64 = 5;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

fn realtime_transport() -> Arc<dyn RealtimeTransport> {
    let config = RealtimeConfig::new_from_env_or_default();
    config.build_transport().unwrap_or_else(|e| {
        warn!("📡️ {e} Falling back to polling only.");
        eprintln!("Realtime updates are unavailable ({e}). Payments will be detected by polling.");
        Arc::new(LoopbackTransport::new())
    })
}

fn poll_interval(opts: &WatchOptions) -> Option<Duration> {
    let secs = opts.poll_secs.unwrap_or_else(|| env_or_default("POS_POLL_INTERVAL_SECS", DEFAULT_POLL_SECS));
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn print_receipt(ev: &PaymentStatusEvent) {
    match ev.status {
        TrackedStatus::Completed => println!("✅ Payment received for order {} ({} update)", ev.order_id, ev.source),
        TrackedStatus::Failed => println!("❌ Payment for order {} failed", ev.order_id),
        TrackedStatus::Discrepancy => {
            println!("⚠️  Order {} received a payment that does not match the amount due", ev.order_id)
        },
        TrackedStatus::Pending => {},
    }
}

/// Block until the order settles, the timeout expires, or the user hits Ctrl-C. Returns the last known status.
pub async fn watch_order(api: PosApi, merchant_id: MerchantId, order_id: OrderId, opts: &WatchOptions) -> Result<TrackedStatus> {
    let mut hooks = EventHooks::default();
    hooks.on_payment_status(|ev| {
        print_receipt(&ev);
        Box::pin(async {})
    });
    let handlers = EventHandlers::new(8, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let realtime = RealtimeClient::new(realtime_transport());
    let mut tracker = PaymentTracker::new(realtime.clone(), Arc::new(api), producers);
    if let Some(period) = poll_interval(opts) {
        tracker = tracker.with_poll_interval(period);
    }
    match tracker.track(Some(merchant_id.clone()), Some(order_id.clone())).await {
        Activation::Realtime => {
            println!("Waiting for payment of order {order_id} (live updates on {})", realtime.transport_name())
        },
        Activation::PullOnly(e) => println!("Waiting for payment of order {order_id} (polling only: {e})"),
        Activation::Inactive => bail!("Cannot track order {order_id} without a merchant"),
    }
    // The order may already have been paid before we started listening
    if let Err(e) = tracker.check_payment_status().await {
        warn!("🔎️ Initial status check failed. {e}");
    }

    let timeout = tokio::time::sleep(Duration::from_secs(opts.timeout_secs));
    let status = tokio::select! {
        status = tracker.wait_for_terminal() => status,
        _ = timeout => {
            println!("Gave up waiting after {}s", opts.timeout_secs);
            tracker.status()
        },
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted");
            tracker.status()
        },
    };
    if status.is_terminal() {
        // Show the backend's record, not the notification
        match tracker.settled_order(SETTLE_TIMEOUT).await {
            Ok(order) => println!("{}", format_order(&order)?),
            Err(e) => warn!("🔎️ Could not load the settled order. {e}"),
        }
    } else if let Some(order) = tracker.latest_order() {
        println!("{}", format_order(&order)?);
    }
    tracker.close().await;
    if let Err(e) = realtime.disconnect().await {
        debug!("📡️ Disconnect failed. {e}");
    }
    Ok(status)
}
