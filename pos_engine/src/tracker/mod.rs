//! Payment status tracking.
//!
//! A [`PaymentTracker`] watches one order at a time. It combines two sources of truth:
//! * **push**: `payment_completed` notifications on the merchant's realtime channel, filtered down to the tracked order.
//!   These are hints. The first one flips the status to completed and triggers a single authoritative refetch.
//! * **pull**: fetches of the order record, on demand ([`PaymentTracker::check_payment_status`]), from records the
//!   caller already holds ([`PaymentTracker::observe_order`]), or on a timer ([`PaymentTracker::with_poll_interval`]).
//!
//! Push and pull are unordered. Both only ever move the status towards a terminal state, so the outcome does not depend
//! on which arrives first.
mod errors;
mod session;
mod status;


pub use errors::TrackerError;
pub use session::{Activation, PaymentTracker, PAYMENT_COMPLETED_EVENT};
pub use status::TrackedStatus;
