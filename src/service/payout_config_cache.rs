use crate::domain::payout_config::OrganizerPayoutConfig;
use crate::error::Result;
use crate::repo::PayoutConfigStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct PayoutConfigCache {
    pub store: Arc<dyn PayoutConfigStore>,
    inner: Arc<RwLock<HashMap<String, (Instant, Option<OrganizerPayoutConfig>)>>>,
    ttl: Duration,
}

impl PayoutConfigCache {
    pub fn new(store: Arc<dyn PayoutConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, organizer_id: &str) -> Result<Option<OrganizerPayoutConfig>> {
        {
            let read = self.inner.read().await;
            if let Some((loaded_at, config)) = read.get(organizer_id) {
                if loaded_at.elapsed() <= self.ttl {
                    return Ok(config.clone());
                }
            }
        }

        let config = self.store.get(organizer_id).await?;
        let mut write = self.inner.write().await;
        write.insert(organizer_id.to_string(), (Instant::now(), config.clone()));
        Ok(config)
    }

    pub async fn invalidate(&self, organizer_id: &str) {
        self.inner.write().await.remove(organizer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payout_config::OnboardingStatus;
    use crate::repo::memory::InMemoryStore;

    #[tokio::test]
    async fn serves_cached_value_until_invalidated() {
        let store = InMemoryStore::new();
        let cache = PayoutConfigCache::new(Arc::new(store.clone()), Duration::from_secs(60));
        assert!(cache.get("org1").await.unwrap().is_none());

        store
            .put_payout_config(OrganizerPayoutConfig {
                organizer_id: "org1".to_string(),
                onboarding_status: OnboardingStatus::Activated,
                commission_rate_bps: Some(700),
                linked_account_id: Some("acc_1".to_string()),
            })
            .unwrap();
        assert!(cache.get("org1").await.unwrap().is_none());

        cache.invalidate("org1").await;
        let cfg = cache.get("org1").await.unwrap().unwrap();
        assert_eq!(cfg.commission_rate_bps, Some(700));
    }
}
