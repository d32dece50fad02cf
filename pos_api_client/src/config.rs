use std::{env, time::Duration};

use log::*;
use pos_common::env_or_default;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:54321";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u8 = 1;

#[derive(Debug, Clone)]
pub struct PosApiConfig {
    /// The backend root, e.g. `https://xyz.supabase.co`. Resource paths are appended under `/functions/v1`.
    pub base_url: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// How many times a failed request is retried before the error is returned to the caller
    pub retries: u8,
    pub user_agent: String,
}

impl Default for PosApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            user_agent: format!("pos_api_client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl PosApiConfig {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), ..Default::default() }
    }

    pub fn new_from_env_or_default() -> Self {
        let base_url = env::var("POS_API_BASE_URL").unwrap_or_else(|_| {
            warn!("🪛️ POS_API_BASE_URL not set, using {DEFAULT_API_BASE_URL} (probably only useful for local testing)");
            DEFAULT_API_BASE_URL.to_string()
        });
        let timeout = Duration::from_secs(env_or_default("POS_API_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS));
        let retries = env_or_default("POS_API_RETRIES", DEFAULT_RETRIES);
        Self { timeout, retries, ..Self::new(&base_url) }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/functions/v1{path}", self.base_url)
    }
}
