use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("Realtime transport is misconfigured. {0}")]
    Configuration(String),
    #[error("Could not connect to the realtime service. {0}")]
    Connection(String),
    #[error("Unexpected realtime protocol message. {0}")]
    Protocol(String),
    #[error("Could not send a message to the realtime service. {0}")]
    Send(String),
    #[error("The realtime transport is not connected")]
    NotConnected,
    #[error("This handle no longer holds a subscription to {0}")]
    NotSubscribed(String),
}
