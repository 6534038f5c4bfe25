use crate::domain::transfer::{Transfer, TransferPatch, TransferStatus};
use crate::error::Result;
use crate::repo::orders_repo::corrupt;
use crate::repo::TransferStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const TRANSFER_COLUMNS: &str = "transfer_id, order_id, organizer_id, payment_id, linked_account_id, \
     gateway_transfer_id, amount, commission_amount, gateway_fee_amount, payout_amount, currency, status, \
     hold_until, processed_at, reversed_amount, failure_reason, created_at, updated_at";

#[derive(Clone)]
pub struct TransfersRepo {
    pub pool: PgPool,
}

#[async_trait]
impl TransferStore for TransfersRepo {
    async fn insert(&self, t: &Transfer) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO transfers (
                transfer_id, order_id, organizer_id, payment_id, linked_account_id, gateway_transfer_id,
                amount, commission_amount, gateway_fee_amount, payout_amount, currency, status,
                hold_until, processed_at, reversed_amount, failure_reason, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18
            )
            ON CONFLICT (order_id) WHERE status IN ('pending', 'initiated', 'processed') DO NOTHING
            "#,
        )
        .bind(t.transfer_id)
        .bind(t.order_id)
        .bind(&t.organizer_id)
        .bind(&t.payment_id)
        .bind(&t.linked_account_id)
        .bind(&t.gateway_transfer_id)
        .bind(t.amount)
        .bind(t.commission_amount)
        .bind(t.gateway_fee_amount)
        .bind(t.payout_amount)
        .bind(&t.currency)
        .bind(t.status.as_str())
        .bind(t.hold_until)
        .bind(t.processed_at)
        .bind(t.reversed_amount)
        .bind(&t.failure_reason)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn get(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE transfer_id = $1"
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_transfer(&r)).transpose()
    }

    async fn find_by_gateway_id(&self, gateway_transfer_id: &str) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE gateway_transfer_id = $1"
        ))
        .bind(gateway_transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_transfer(&r)).transpose()
    }

    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE order_id = $1 AND status IN ('pending', 'initiated', 'processed')"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_transfer(&r)).transpose()
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_transfer).collect()
    }

    async fn transition(
        &self,
        transfer_id: Uuid,
        from: &[TransferStatus],
        to: TransferStatus,
        patch: &TransferPatch,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(TransferStatus::as_str).collect();
        let res = sqlx::query(
            r#"
            UPDATE transfers
            SET status = $3,
                gateway_transfer_id = COALESCE($4, gateway_transfer_id),
                processed_at = COALESCE($5, processed_at),
                reversed_amount = COALESCE($6, reversed_amount),
                failure_reason = COALESCE($7, failure_reason),
                updated_at = now()
            WHERE transfer_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(transfer_id)
        .bind(&from)
        .bind(to.as_str())
        .bind(&patch.gateway_transfer_id)
        .bind(patch.processed_at)
        .bind(patch.reversed_amount)
        .bind(&patch.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

fn map_transfer(r: &PgRow) -> Result<Transfer> {
    let status: String = r.try_get("status")?;
    Ok(Transfer {
        transfer_id: r.try_get("transfer_id")?,
        order_id: r.try_get("order_id")?,
        organizer_id: r.try_get("organizer_id")?,
        payment_id: r.try_get("payment_id")?,
        linked_account_id: r.try_get("linked_account_id")?,
        gateway_transfer_id: r.try_get("gateway_transfer_id")?,
        amount: r.try_get("amount")?,
        commission_amount: r.try_get("commission_amount")?,
        gateway_fee_amount: r.try_get("gateway_fee_amount")?,
        payout_amount: r.try_get("payout_amount")?,
        currency: r.try_get("currency")?,
        status: TransferStatus::parse(&status).ok_or_else(|| corrupt("transfer status", &status))?,
        hold_until: r.try_get("hold_until")?,
        processed_at: r.try_get("processed_at")?,
        reversed_amount: r.try_get("reversed_amount")?,
        failure_reason: r.try_get("failure_reason")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}
