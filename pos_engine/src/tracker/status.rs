use std::fmt::Display;

use pos_api_client::OrderStatus;
use serde::{Deserialize, Serialize};

/// The payment status as the point of sale sees it.
///
/// Unlike [`OrderStatus`], this only has one non-terminal state. Intermediate server states are all "still waiting"
/// from the cashier's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Discrepancy,
}

impl TrackedStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The tracked status an order record implies. Non-terminal server states imply nothing.
    pub fn from_order_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Completed => Some(Self::Completed),
            OrderStatus::Failed => Some(Self::Failed),
            OrderStatus::Discrepancy => Some(Self::Discrepancy),
            OrderStatus::Pending | OrderStatus::Processing => None,
        }
    }
}

impl Display for TrackedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackedStatus::Pending => write!(f, "Pending"),
            TrackedStatus::Completed => write!(f, "Completed"),
            TrackedStatus::Failed => write!(f, "Failed"),
            TrackedStatus::Discrepancy => write!(f, "Discrepancy"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_states_map_to_tracked_states() {
        assert_eq!(TrackedStatus::from_order_status(OrderStatus::Pending), None);
        assert_eq!(TrackedStatus::from_order_status(OrderStatus::Processing), None);
        assert_eq!(TrackedStatus::from_order_status(OrderStatus::Completed), Some(TrackedStatus::Completed));
        assert_eq!(TrackedStatus::from_order_status(OrderStatus::Failed), Some(TrackedStatus::Failed));
        assert_eq!(TrackedStatus::from_order_status(OrderStatus::Discrepancy), Some(TrackedStatus::Discrepancy));
        assert!(!TrackedStatus::default().is_terminal());
    }
}
