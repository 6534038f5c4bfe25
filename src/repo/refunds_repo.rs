use crate::domain::refund::{Refund, RefundStatus};
use crate::error::{LedgerError, Result};
use crate::repo::orders_repo::corrupt;
use crate::repo::{RefundReservation, RefundStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const REFUND_COLUMNS: &str = "refund_id, order_id, payment_id, gateway_refund_id, amount, currency, reason, \
     actor_id, reversed_transfer, status, created_at, processed_at";

#[derive(Clone)]
pub struct RefundsRepo {
    pub pool: PgPool,
}

#[async_trait]
impl RefundStore for RefundsRepo {
    async fn reserve(&self, refund: &Refund) -> Result<RefundReservation> {
        let mut tx = self.pool.begin().await?;

        // Refunds for one order queue on the order row until the holder commits.
        let order_amount: Option<i64> = sqlx::query_scalar("SELECT amount FROM orders WHERE order_id = $1 FOR UPDATE")
            .bind(refund.order_id)
            .fetch_optional(tx.as_mut())
            .await?;
        let Some(order_amount) = order_amount else {
            tx.rollback().await?;
            return Err(LedgerError::not_found("order", refund.order_id));
        };

        if let Some(gateway_id) = &refund.gateway_refund_id {
            let known: Option<Uuid> = sqlx::query_scalar("SELECT refund_id FROM refunds WHERE gateway_refund_id = $1")
                .bind(gateway_id)
                .fetch_optional(tx.as_mut())
                .await?;
            if known.is_some() {
                tx.rollback().await?;
                return Ok(RefundReservation::Duplicate);
            }
        }

        let committed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM refunds WHERE order_id = $1 AND status = ANY($2)",
        )
        .bind(refund.order_id)
        .bind(vec![RefundStatus::Pending.as_str(), RefundStatus::Processed.as_str()])
        .fetch_one(tx.as_mut())
        .await?;

        let available = order_amount - committed;
        if refund.amount > available {
            tx.rollback().await?;
            return Ok(RefundReservation::Exceeds { available });
        }

        let res = sqlx::query(
            r#"
            INSERT INTO refunds (
                refund_id, order_id, payment_id, gateway_refund_id, amount, currency, reason,
                actor_id, reversed_transfer, status, created_at, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (gateway_refund_id) DO NOTHING
            "#,
        )
        .bind(refund.refund_id)
        .bind(refund.order_id)
        .bind(&refund.payment_id)
        .bind(&refund.gateway_refund_id)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(&refund.reason)
        .bind(&refund.actor_id)
        .bind(refund.reversed_transfer)
        .bind(refund.status.as_str())
        .bind(refund.created_at)
        .bind(refund.processed_at)
        .execute(tx.as_mut())
        .await?;

        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(RefundReservation::Duplicate);
        }
        tx.commit().await?;
        Ok(RefundReservation::Reserved { committed })
    }

    async fn set_reversed_transfer(&self, refund_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE refunds SET reversed_transfer = TRUE WHERE refund_id = $1")
            .bind(refund_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, refund_id: Uuid) -> Result<Option<Refund>> {
        let row = sqlx::query(&format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE refund_id = $1"))
            .bind(refund_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_refund(&r)).transpose()
    }

    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        let row = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE gateway_refund_id = $1"
        ))
        .bind(gateway_refund_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_refund(&r)).transpose()
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>> {
        let rows = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_refund).collect()
    }

    async fn total_for_order(&self, order_id: Uuid, statuses: &[RefundStatus]) -> Result<i64> {
        let statuses: Vec<&str> = statuses.iter().map(RefundStatus::as_str).collect();
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM refunds WHERE order_id = $1 AND status = ANY($2)",
        )
        .bind(order_id)
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn transition(
        &self,
        refund_id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
        gateway_refund_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(RefundStatus::as_str).collect();
        let res = sqlx::query(
            r#"
            UPDATE refunds
            SET status = $3,
                gateway_refund_id = COALESCE(gateway_refund_id, $4),
                processed_at = COALESCE($5, processed_at)
            WHERE refund_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(refund_id)
        .bind(&from)
        .bind(to.as_str())
        .bind(gateway_refund_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

fn map_refund(r: &PgRow) -> Result<Refund> {
    let status: String = r.try_get("status")?;
    Ok(Refund {
        refund_id: r.try_get("refund_id")?,
        order_id: r.try_get("order_id")?,
        payment_id: r.try_get("payment_id")?,
        gateway_refund_id: r.try_get("gateway_refund_id")?,
        amount: r.try_get("amount")?,
        currency: r.try_get("currency")?,
        reason: r.try_get("reason")?,
        actor_id: r.try_get("actor_id")?,
        reversed_transfer: r.try_get("reversed_transfer")?,
        status: RefundStatus::parse(&status).ok_or_else(|| corrupt("refund status", &status))?,
        created_at: r.try_get("created_at")?,
        processed_at: r.try_get("processed_at")?,
    })
}
