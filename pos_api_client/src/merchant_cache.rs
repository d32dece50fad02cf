use log::*;
use tokio::sync::RwLock;

use crate::{data_objects::Merchant, PosApi, PosApiError};

/// The merchant profile (default currency, language, token and wallet) is fetched once per session and served from
/// memory afterwards.
pub struct MerchantProfileCache {
    api: PosApi,
    profile: RwLock<Option<Merchant>>,
}

impl MerchantProfileCache {
    pub fn new(api: PosApi) -> Self {
        Self { api, profile: RwLock::new(None) }
    }

    pub async fn profile(&self) -> Result<Merchant, PosApiError> {
        if let Some(profile) = self.profile.read().await.as_ref() {
            return Ok(profile.clone());
        }
        let mut guard = self.profile.write().await;
        // Another caller may have filled the cache while we waited for the lock
        if let Some(profile) = guard.as_ref() {
            return Ok(profile.clone());
        }
        let profile = self.api.fetch_merchant().await?;
        debug!("🧾️ Cached merchant profile {}", profile.merchant_id);
        Ok(guard.insert(profile).clone())
    }

    pub async fn cached(&self) -> Option<Merchant> {
        self.profile.read().await.clone()
    }

    pub async fn invalidate(&self) {
        self.profile.write().await.take();
    }
}
