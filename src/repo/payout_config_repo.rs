use crate::domain::payout_config::{OnboardingStatus, OrganizerPayoutConfig};
use crate::error::Result;
use crate::repo::orders_repo::corrupt;
use crate::repo::PayoutConfigStore;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Read-only view of the onboarding service's payout settings.
#[derive(Clone)]
pub struct PayoutConfigRepo {
    pub pool: PgPool,
}

#[async_trait]
impl PayoutConfigStore for PayoutConfigRepo {
    async fn get(&self, organizer_id: &str) -> Result<Option<OrganizerPayoutConfig>> {
        let row = sqlx::query(
            "SELECT organizer_id, onboarding_status, commission_rate_bps, linked_account_id FROM organizer_payout_configs WHERE organizer_id = $1",
        )
        .bind(organizer_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let status: String = r.try_get("onboarding_status")?;
        Ok(Some(OrganizerPayoutConfig {
            organizer_id: r.try_get("organizer_id")?,
            onboarding_status: OnboardingStatus::parse(&status)
                .ok_or_else(|| corrupt("onboarding status", &status))?,
            commission_rate_bps: r.try_get("commission_rate_bps")?,
            linked_account_id: r.try_get("linked_account_id")?,
        }))
    }
}
