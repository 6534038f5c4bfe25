use crate::domain::order::{Order, OrderPurpose, OrderRefundStatus, OrderStatus, SplitStatus};
use crate::error::{LedgerError, Result};
use crate::repo::OrderStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "order_id, buyer_id, organizer_id, trip_ref, purpose, amount, currency, status, \
     commission_rate_bps, commission_amount, gateway_fee_amount, organizer_payout_amount, payout_anomaly, \
     split_status, refund_status, refunded_amount, gateway_order_id, payment_id, notes, created_at, updated_at";

#[derive(Clone)]
pub struct OrdersRepo {
    pub pool: PgPool,
}

#[async_trait]
impl OrderStore for OrdersRepo {
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, buyer_id, organizer_id, trip_ref, purpose, amount, currency, status,
                commission_rate_bps, commission_amount, gateway_fee_amount, organizer_payout_amount,
                payout_anomaly, split_status, refund_status, refunded_amount, gateway_order_id,
                payment_id, notes, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                $9, $10, $11, $12,
                $13, $14, $15, $16, $17,
                $18, $19, $20, $21
            )
            "#,
        )
        .bind(order.order_id)
        .bind(&order.buyer_id)
        .bind(&order.organizer_id)
        .bind(&order.trip_ref)
        .bind(serde_json::to_value(&order.purpose)?)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(order.commission_rate_bps)
        .bind(order.commission_amount)
        .bind(order.gateway_fee_amount)
        .bind(order.organizer_payout_amount)
        .bind(order.payout_anomaly)
        .bind(order.split_status.as_str())
        .bind(order.refund_status.as_str())
        .bind(order.refunded_amount)
        .bind(&order.gateway_order_id)
        .bind(&order.payment_id)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE gateway_order_id = $1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_id = $1"))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_order(&r)).transpose()
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        payment_id: Option<&str>,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(OrderStatus::as_str).collect();
        let res = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_id = COALESCE($4, payment_id), updated_at = now()
            WHERE order_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(order_id)
        .bind(&from)
        .bind(to.as_str())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn transition_split(&self, order_id: Uuid, from: SplitStatus, to: SplitStatus) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE orders SET split_status = $3, updated_at = now() WHERE order_id = $1 AND split_status = $2",
        )
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn apply_refund_total(
        &self,
        order_id: Uuid,
        refunded_amount: i64,
        status: OrderStatus,
        refund_status: OrderRefundStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE orders
            SET refunded_amount = $2, status = $3, refund_status = $4, updated_at = now()
            WHERE order_id = $1
              AND status IN ('paid', 'partial_refund')
              AND refunded_amount <= $2
              AND $2 <= amount
            "#,
        )
        .bind(order_id)
        .bind(refunded_amount)
        .bind(status.as_str())
        .bind(refund_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

fn map_order(r: &PgRow) -> Result<Order> {
    let status: String = r.try_get("status")?;
    let split_status: String = r.try_get("split_status")?;
    let refund_status: String = r.try_get("refund_status")?;
    let purpose: serde_json::Value = r.try_get("purpose")?;

    Ok(Order {
        order_id: r.try_get("order_id")?,
        buyer_id: r.try_get("buyer_id")?,
        organizer_id: r.try_get("organizer_id")?,
        trip_ref: r.try_get("trip_ref")?,
        purpose: serde_json::from_value::<OrderPurpose>(purpose).map_err(|e| LedgerError::Persistence {
            message: format!("bad order purpose: {e}"),
        })?,
        amount: r.try_get("amount")?,
        currency: r.try_get("currency")?,
        status: OrderStatus::parse(&status).ok_or_else(|| corrupt("order status", &status))?,
        commission_rate_bps: r.try_get("commission_rate_bps")?,
        commission_amount: r.try_get("commission_amount")?,
        gateway_fee_amount: r.try_get("gateway_fee_amount")?,
        organizer_payout_amount: r.try_get("organizer_payout_amount")?,
        payout_anomaly: r.try_get("payout_anomaly")?,
        split_status: SplitStatus::parse(&split_status).ok_or_else(|| corrupt("split status", &split_status))?,
        refund_status: OrderRefundStatus::parse(&refund_status)
            .ok_or_else(|| corrupt("refund status", &refund_status))?,
        refunded_amount: r.try_get("refunded_amount")?,
        gateway_order_id: r.try_get("gateway_order_id")?,
        payment_id: r.try_get("payment_id")?,
        notes: r.try_get("notes")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

pub(crate) fn corrupt(what: &str, value: &str) -> LedgerError {
    LedgerError::Persistence {
        message: format!("unrecognised {what} '{value}'"),
    }
}
