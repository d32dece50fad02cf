use pos_api_client::PosApiError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    #[error("No order is being tracked")]
    Inactive,
    #[error("Could not fetch the order. {0}")]
    Api(#[from] PosApiError),
    #[error("The tracking session has ended")]
    SessionClosed,
}
