use serde_json::Value;
use thiserror::Error;

use crate::validation::ValidationErrors;

#[derive(Debug, Clone, Error)]
pub enum PosApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    InvalidRequest(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Query failed. Error {status}. {message}")]
    Query { status: u16, message: String, data: Option<Value> },
    #[error("Could not deserialize JSON: {0}")]
    Json(String),
    #[error("No access token is available. Log in first.")]
    MissingToken,
    #[error("Could not read the access token. {0}")]
    TokenStore(String),
    #[error("The request was cancelled")]
    Cancelled,
    #[error("Invalid input. {0}")]
    Validation(#[from] ValidationErrors),
}

impl PosApiError {
    /// The HTTP status code returned by the server, if the request got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Query { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The JSON body the server sent along with an error response, if any.
    pub fn server_data(&self) -> Option<&Value> {
        match self {
            Self::Query { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Network failures and non-2xx responses get one more attempt. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Query { .. })
    }

    pub(crate) fn from_error_body(status: u16, body: &str) -> Self {
        let data = serde_json::from_str::<Value>(body).ok();
        let message = data
            .as_ref()
            .and_then(|v| v["message"].as_str().or_else(|| v["error"].as_str()))
            .map(String::from)
            .unwrap_or_else(|| body.trim().to_string());
        Self::Query { status, message, data }
    }
}
