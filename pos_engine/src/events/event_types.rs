use std::fmt::Display;

use pos_api_client::{MerchantId, Order, OrderId};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackedStatus;

/// Where a status change was first learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// A realtime `payment_completed` hint on the merchant channel
    Push,
    /// An authoritative fetch of the order record
    Pull,
}

impl Display for StatusSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusSource::Push => write!(f, "push"),
            StatusSource::Pull => write!(f, "pull"),
        }
    }
}

/// Emitted whenever a tracking session moves to a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusEvent {
    pub merchant_id: MerchantId,
    pub order_id: OrderId,
    pub status: TrackedStatus,
    pub source: StatusSource,
    /// The order record, when the change came from a fetch
    pub order: Option<Order>,
}

impl PaymentStatusEvent {
    pub fn new(merchant_id: MerchantId, order_id: OrderId, status: TrackedStatus, source: StatusSource) -> Self {
        Self { merchant_id, order_id, status, source, order: None }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }
}
