use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use log::*;
use pos_api_client::{MerchantId, Order, OrderId, OrderQuery, OrderSource, PaymentCompletedEvent, PosApiError};
use pos_common::AbortSignal;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

use crate::{
    events::{EventProducers, Handler, PaymentStatusEvent, StatusSource},
    realtime::{ChannelEvent, ChannelHandle, RealtimeClient, RealtimeError},
    tracker::{TrackedStatus, TrackerError},
};

/// The realtime event the merchant channel carries for completed payments.
pub const PAYMENT_COMPLETED_EVENT: &str = "payment_completed";
const COMMAND_BUFFER: usize = 16;

/// How a call to [`PaymentTracker::track`] left the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The merchant or order id was missing. Nothing is tracked.
    Inactive,
    /// Subscribed to the merchant channel. Push and pull are both active.
    Realtime,
    /// The realtime subscription failed. The session still answers status checks and polls, if configured.
    PullOnly(RealtimeError),
}

enum Command {
    Push(PaymentCompletedEvent),
    Refetch(oneshot::Sender<Result<Order, PosApiError>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    merchant_id: MerchantId,
    order_id: OrderId,
}

//--------------------------------------      StatusCell       ---------------------------------------------------------
#[derive(Clone)]
struct StatusCell {
    status: Arc<watch::Sender<TrackedStatus>>,
    latest: Arc<watch::Sender<Option<Order>>>,
}

impl StatusCell {
    fn new() -> Self {
        let (status, _) = watch::channel(TrackedStatus::Pending);
        let (latest, _) = watch::channel(None);
        Self { status: Arc::new(status), latest: Arc::new(latest) }
    }

    fn current(&self) -> TrackedStatus {
        *self.status.borrow()
    }

    /// Pending -> Completed. Returns false if the status was already anything else.
    fn mark_completed(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == TrackedStatus::Pending {
                *status = TrackedStatus::Completed;
                true
            } else {
                false
            }
        })
    }

    /// Record an authoritative order. Returns the new status if the order changed it.
    fn apply_order(&self, order: &Order) -> Option<TrackedStatus> {
        self.latest.send_replace(Some(order.clone()));
        let next = TrackedStatus::from_order_status(order.status)?;
        let changed = self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
        changed.then_some(next)
    }

    fn reset(&self) {
        self.status.send_if_modified(|status| std::mem::take(status) != TrackedStatus::Pending);
        self.latest.send_if_modified(|order| order.take().is_some());
    }
}

async fn publish_status(
    producers: &EventProducers,
    target: &Target,
    status: TrackedStatus,
    source: StatusSource,
    order: Option<Order>,
) {
    if !status.is_terminal() {
        return;
    }
    let mut event = PaymentStatusEvent::new(target.merchant_id.clone(), target.order_id.clone(), status, source);
    if let Some(order) = order {
        event = event.with_order(order);
    }
    producers.publish_payment_status(event).await;
}

//--------------------------------------    Session task       ---------------------------------------------------------
struct SessionContext<S: ?Sized> {
    target: Target,
    source: Arc<S>,
    cell: StatusCell,
    producers: EventProducers,
    abort: AbortSignal,
    poll_interval: Option<Duration>,
}

impl<S: OrderSource + ?Sized + 'static> SessionContext<S> {
    async fn refetch(&self, query: &mut OrderQuery<S>) -> Result<Order, PosApiError> {
        let fetched = match self.abort.run(query.refetch(&self.abort)).await {
            Ok(result) => result.cloned(),
            Err(_) => Err(PosApiError::Cancelled),
        };
        match &fetched {
            Ok(order) => {
                if let Some(status) = self.cell.apply_order(order) {
                    info!("🔎️ Order {} is now {status} (fetched {})", self.target.order_id, order.status);
                    publish_status(&self.producers, &self.target, status, StatusSource::Pull, Some(order.clone())).await;
                }
            },
            Err(PosApiError::Cancelled) => debug!("🔎️ Fetch of order {} was cancelled", self.target.order_id),
            Err(e) => warn!("🔎️ Could not fetch order {}. {e}", self.target.order_id),
        }
        fetched
    }

    async fn on_payment_notification(&self, payment: &PaymentCompletedEvent) {
        if self.cell.mark_completed() {
            info!("🔎️ Order {} was paid (realtime notification)", payment.order_id);
            publish_status(&self.producers, &self.target, TrackedStatus::Completed, StatusSource::Push, None).await;
        }
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending::<()>().await,
    }
}

async fn run_session<S: OrderSource + ?Sized + 'static>(ctx: SessionContext<S>, mut commands: mpsc::Receiver<Command>) {
    debug!("🔎️ Tracking order {} of merchant {}", ctx.target.order_id, ctx.target.merchant_id);
    let mut query = OrderQuery::new(Arc::clone(&ctx.source), ctx.target.order_id.clone());
    let mut refetched_after_push = false;
    let mut poll = ctx.poll_interval.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut polling = poll.is_some();
    loop {
        tokio::select! {
            biased;
            _ = ctx.abort.aborted() => break,
            cmd = commands.recv() => match cmd {
                Some(Command::Push(payment)) => {
                    ctx.on_payment_notification(&payment).await;
                    if refetched_after_push {
                        trace!("🔎️ Duplicate payment notification for order {}", payment.order_id);
                    } else {
                        refetched_after_push = true;
                        let _ = ctx.refetch(&mut query).await;
                    }
                },
                Some(Command::Refetch(reply)) => {
                    let result = ctx.refetch(&mut query).await;
                    let _ = reply.send(result);
                },
                None => break,
            },
            _ = next_tick(&mut poll), if polling => {
                if ctx.cell.current().is_terminal() {
                    debug!("🔎️ Order {} has settled. Polling stops", ctx.target.order_id);
                    polling = false;
                } else {
                    trace!("🔎️ Polling order {}", ctx.target.order_id);
                    let _ = ctx.refetch(&mut query).await;
                }
            },
        }
    }
    debug!("🔎️ Stopped tracking order {}", ctx.target.order_id);
}

fn payment_notification_handler(order_id: OrderId, commands: mpsc::Sender<Command>) -> Handler<ChannelEvent> {
    Arc::new(move |ev: ChannelEvent| {
        let order_id = order_id.clone();
        let commands = commands.clone();
        Box::pin(async move {
            match serde_json::from_value::<PaymentCompletedEvent>(ev.data) {
                Ok(payment) if payment.order_id == order_id => {
                    if commands.send(Command::Push(payment)).await.is_err() {
                        trace!("🔎️ Session for order {order_id} has ended. Dropping payment notification");
                    }
                },
                Ok(payment) => trace!("🔎️ Ignoring payment notification for order {}", payment.order_id),
                Err(e) => warn!("🔎️ Malformed payment notification on channel {}. {e}", ev.channel),
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}

//--------------------------------------    PaymentTracker     ---------------------------------------------------------
struct Session {
    target: Target,
    activation: Activation,
    handle: Option<ChannelHandle>,
    commands: mpsc::Sender<Command>,
    abort: AbortSignal,
    task: JoinHandle<()>,
}

/// Tracks the payment status of one order at a time.
///
/// The realtime hub is shared: several trackers (e.g. one per open checkout screen) can watch orders of the same
/// merchant over a single channel subscription without interfering with each other.
pub struct PaymentTracker<S: OrderSource + ?Sized + 'static = dyn OrderSource> {
    realtime: RealtimeClient,
    source: Arc<S>,
    producers: EventProducers,
    poll_interval: Option<Duration>,
    cell: StatusCell,
    session: Option<Session>,
}

impl<S: OrderSource + ?Sized + 'static> PaymentTracker<S> {
    pub fn new(realtime: RealtimeClient, source: Arc<S>, producers: EventProducers) -> Self {
        Self { realtime, source, producers, poll_interval: None, cell: StatusCell::new(), session: None }
    }

    /// Also refetch the order every `period` until it reaches a terminal status. Applies to sessions started after
    /// this call.
    pub fn with_poll_interval(mut self, period: Duration) -> Self {
        self.poll_interval = Some(period);
        self
    }

    pub fn status(&self) -> TrackedStatus {
        self.cell.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrackedStatus> {
        self.cell.status.subscribe()
    }

    /// The most recent authoritative order record, if one has been fetched or observed in this session.
    pub fn latest_order(&self) -> Option<Order> {
        self.cell.latest.borrow().clone()
    }

    pub fn tracked_order(&self) -> Option<&OrderId> {
        self.session.as_ref().map(|s| &s.target.order_id)
    }

    pub fn tracked_merchant(&self) -> Option<&MerchantId> {
        self.session.as_ref().map(|s| &s.target.merchant_id)
    }

    pub fn activation(&self) -> Activation {
        self.session.as_ref().map(|s| s.activation.clone()).unwrap_or(Activation::Inactive)
    }

    /// Point the tracker at an order.
    ///
    /// Any previous session is torn down first, and its channel released before the new subscription is made. If either
    /// id is missing, the tracker is left idle with a pending status. Tracking the same order again is a no-op.
    pub async fn track(&mut self, merchant_id: Option<MerchantId>, order_id: Option<OrderId>) -> Activation {
        if let (Some(merchant_id), Some(order_id), Some(session)) = (&merchant_id, &order_id, &self.session) {
            if &session.target.merchant_id == merchant_id && &session.target.order_id == order_id {
                return session.activation.clone();
            }
        }
        self.close().await;
        let (Some(merchant_id), Some(order_id)) = (merchant_id, order_id) else {
            debug!("🔎️ Merchant or order is unknown. Not tracking anything");
            return Activation::Inactive;
        };
        let target = Target { merchant_id, order_id };
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let handler = payment_notification_handler(target.order_id.clone(), commands.clone());
        let subscription = self
            .realtime
            .subscribe_to_channel(target.merchant_id.as_str(), Some(PAYMENT_COMPLETED_EVENT), Some(handler))
            .await;
        let (handle, activation) = match subscription {
            Ok(handle) => (Some(handle), Activation::Realtime),
            Err(e) => {
                warn!("🔎️ Realtime updates for merchant {} are unavailable. {e}", target.merchant_id);
                (None, Activation::PullOnly(e))
            },
        };
        let abort = AbortSignal::new();
        let ctx = SessionContext {
            target: target.clone(),
            source: Arc::clone(&self.source),
            cell: self.cell.clone(),
            producers: self.producers.clone(),
            abort: abort.clone(),
            poll_interval: self.poll_interval,
        };
        let task = tokio::spawn(run_session(ctx, receiver));
        self.session = Some(Session { target, activation: activation.clone(), handle, commands, abort, task });
        activation
    }

    /// End the current session: release the channel, cancel in-flight fetches and reset the status to pending.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!("🔎️ Closing tracking session for order {}", session.target.order_id);
        session.abort.abort();
        if let Some(handle) = session.handle {
            if let Err(e) = handle.release().await {
                warn!("🔎️ Could not release channel {}. {e}", session.target.merchant_id);
            }
        }
        drop(session.commands);
        if let Err(e) = session.task.await {
            warn!("🔎️ Tracking task for order {} ended abnormally. {e}", session.target.order_id);
        }
        self.cell.reset();
    }

    /// Fetch the order now and fold the result into the tracked status.
    pub async fn check_payment_status(&self) -> Result<Order, TrackerError> {
        let session = self.session.as_ref().ok_or(TrackerError::Inactive)?;
        let (reply, response) = oneshot::channel();
        session.commands.send(Command::Refetch(reply)).await.map_err(|_| TrackerError::SessionClosed)?;
        let order = response.await.map_err(|_| TrackerError::SessionClosed)??;
        Ok(order)
    }

    /// Fold an order record the caller already holds into the tracked status. Returns true if the status changed.
    /// Records for other orders are ignored.
    pub async fn observe_order(&self, order: &Order) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if order.order_id != session.target.order_id {
            trace!("🔎️ Ignoring observed order {}", order.order_id);
            return false;
        }
        match self.cell.apply_order(order) {
            Some(status) => {
                info!("🔎️ Order {} is now {status} (observed {})", order.order_id, order.status);
                publish_status(&self.producers, &session.target, status, StatusSource::Pull, Some(order.clone())).await;
                true
            },
            None => false,
        }
    }

    /// Resolves once the status is terminal.
    pub async fn wait_for_terminal(&self) -> TrackedStatus {
        let mut status = self.cell.status.subscribe();
        let settled = status.wait_for(TrackedStatus::is_terminal).await.map(|s| *s);
        settled.unwrap_or_else(|_| self.cell.current())
    }

    /// The authoritative order record for the current session.
    ///
    /// A payment notification settles the status before the refetch it triggers has returned. This waits up to
    /// `timeout` for that record to arrive, and asks the backend directly if it does not.
    pub async fn settled_order(&self, timeout: Duration) -> Result<Order, TrackerError> {
        if self.session.is_none() {
            return Err(TrackerError::Inactive);
        }
        let mut latest = self.cell.latest.subscribe();
        if let Ok(Ok(order)) = tokio::time::timeout(timeout, latest.wait_for(Option::is_some)).await {
            if let Some(order) = order.as_ref() {
                return Ok(order.clone());
            }
        }
        debug!("🔎️ No order record arrived within {}ms. Fetching it now", timeout.as_millis());
        self.check_payment_status().await
    }
}

impl<S: OrderSource + ?Sized + 'static> Drop for PaymentTracker<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort.abort();
            session.task.abort();
            // The channel handle leaves the channel in the background when it is dropped here
        }
    }
}
