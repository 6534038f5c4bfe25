use crate::error::Result;
use crate::repo::{RetryJob, RetryQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct RetryJobsRepo {
    pub pool: PgPool,
}

#[async_trait]
impl RetryQueue for RetryJobsRepo {
    async fn enqueue(
        &self,
        event_id: &str,
        source: &str,
        event_type: &str,
        envelope: serde_json::Value,
        last_error: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO webhook_retry_jobs (event_id, source, event_type, envelope, status, attempts, last_error, next_attempt_at)
            VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, now())
            ON CONFLICT (event_id, source) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(source)
        .bind(event_type)
        .bind(envelope)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn lock_due(&self, limit: i64) -> Result<Vec<RetryJob>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, source, event_type, envelope, attempts, last_error
            FROM webhook_retry_jobs
            WHERE status = 'PENDING' AND next_attempt_at <= now()
            ORDER BY next_attempt_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(tx.as_mut())
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<std::result::Result<_, _>>()?;
        sqlx::query("UPDATE webhook_retry_jobs SET status = 'PROCESSING', updated_at = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;

        rows.into_iter()
            .map(|r| {
                Ok(RetryJob {
                    job_id: r.try_get("id")?,
                    event_id: r.try_get("event_id")?,
                    source: r.try_get("source")?,
                    event_type: r.try_get("event_type")?,
                    envelope: r.try_get("envelope")?,
                    attempts: r.try_get("attempts")?,
                    last_error: r.try_get("last_error")?,
                })
            })
            .collect()
    }

    async fn mark_done(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE webhook_retry_jobs SET status = 'DONE', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        job_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_retry_jobs SET status = 'PENDING', attempts = $2, next_attempt_at = $3, last_error = $4, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dead(&self, job_id: i64, attempts: i32, last_error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_retry_jobs SET status = 'DEAD', attempts = $2, last_error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(attempts)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
