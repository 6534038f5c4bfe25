use crate::domain::event::PaymentEvent;
use crate::error::Result;
use crate::repo::PaymentEventStore;
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PaymentEventsRepo {
    pub pool: PgPool,
}

#[async_trait]
impl PaymentEventStore for PaymentEventsRepo {
    async fn exists(&self, event_id: &str, source: &str) -> Result<bool> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM payment_events WHERE event_id = $1 AND source = $2")
                .bind(event_id)
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    async fn record(&self, event: &PaymentEvent) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO payment_events (event_id, source, event_type, outcome, processed_at, raw_payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id, source) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.source)
        .bind(&event.event_type)
        .bind(&event.outcome)
        .bind(event.processed_at)
        .bind(&event.raw_payload)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
