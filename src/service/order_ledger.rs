use crate::domain::audit::AuditRecord;
use crate::domain::order::{CreateOrderRequest, Order, OrderRefundStatus, OrderStatus, SplitStatus};
use crate::error::{LedgerError, Result};
use crate::gateways::{self, call_with_retry, PayoutGateway, RetryPolicy};
use crate::repo::OrderStore;
use crate::service::audit::AuditLogger;
use crate::service::payout_config_cache::PayoutConfigCache;
use crate::split::{compute_split, platform_revenue_split, MAX_COMMISSION_BPS};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SplitSettings {
    pub default_commission_bps: i32,
    pub gateway_fee_bps: i32,
    pub settlement_currency: String,
}

impl SplitSettings {
    pub fn from_percent(commission_percent: u32, gateway_fee_bps: u32, currency: &str) -> Self {
        let commission = i32::try_from(commission_percent.saturating_mul(100)).unwrap_or(MAX_COMMISSION_BPS);
        Self {
            default_commission_bps: commission.min(MAX_COMMISSION_BPS),
            gateway_fee_bps: i32::try_from(gateway_fee_bps).unwrap_or(i32::MAX),
            settlement_currency: currency.to_uppercase(),
        }
    }
}

#[derive(Clone)]
pub struct OrderLedger {
    pub orders: Arc<dyn OrderStore>,
    pub payout_configs: PayoutConfigCache,
    pub gateway: Arc<dyn PayoutGateway>,
    pub audit: Arc<dyn AuditLogger>,
    pub retry: RetryPolicy,
    pub settings: SplitSettings,
}

impl OrderLedger {
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<Order> {
        validate_create(&req, &self.settings.settlement_currency)?;

        let (commission_rate_bps, split) = if req.purpose.is_payout_eligible() {
            let config = self
                .payout_configs
                .get(&req.organizer_id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotOnboarded {
                    organizer_id: req.organizer_id.clone(),
                    reason: "no payout configuration".to_string(),
                })?;
            let bps = config
                .commission_rate_bps
                .unwrap_or(self.settings.default_commission_bps)
                .clamp(0, MAX_COMMISSION_BPS);
            (bps, compute_split(req.amount, bps, self.settings.gateway_fee_bps))
        } else {
            (0, platform_revenue_split(req.amount, self.settings.gateway_fee_bps))
        };

        if split.insufficient_payout {
            tracing::warn!(
                organizer_id = %req.organizer_id,
                amount = req.amount,
                commission = split.commission_amount,
                fee = split.gateway_fee_amount,
                "split leaves no organizer payout"
            );
        }

        let order_id = Uuid::new_v4();
        let mut notes = match req.notes {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => json!({}),
        };
        notes["order_ref"] = json!(order_id.to_string());
        notes["purpose"] = json!(req.purpose.label());

        let gateway_request = gateways::CreateOrderRequest {
            amount: req.amount,
            currency: self.settings.settlement_currency.clone(),
            receipt: order_id.simple().to_string(),
            notes: notes.clone(),
        };
        let gateway_order = call_with_retry(self.retry, "create_order", || {
            self.gateway.create_order(&gateway_request)
        })
        .await?;

        let now = Utc::now();
        let order = Order {
            order_id,
            buyer_id: req.buyer_id,
            organizer_id: req.organizer_id,
            trip_ref: req.trip_ref,
            split_status: if req.purpose.is_payout_eligible() {
                SplitStatus::Pending
            } else {
                SplitStatus::NotApplicable
            },
            purpose: req.purpose,
            amount: req.amount,
            currency: self.settings.settlement_currency.clone(),
            status: OrderStatus::Created,
            commission_rate_bps,
            commission_amount: split.commission_amount,
            gateway_fee_amount: split.gateway_fee_amount,
            organizer_payout_amount: split.payout_amount,
            payout_anomaly: split.insufficient_payout,
            refund_status: OrderRefundStatus::None,
            refunded_amount: 0,
            gateway_order_id: Some(gateway_order.id),
            payment_id: None,
            notes,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(&order).await?;

        tracing::info!(
            order_id = %order.order_id,
            organizer_id = %order.organizer_id,
            amount = order.amount,
            payout = order.organizer_payout_amount,
            purpose = order.purpose.label(),
            "order created"
        );
        self.audit
            .log(
                AuditRecord::success("order.create", "order", order.order_id)
                    .by(order.buyer_id.clone())
                    .with_metadata(json!({
                        "amount": order.amount,
                        "commission_amount": order.commission_amount,
                        "gateway_fee_amount": order.gateway_fee_amount,
                        "payout_amount": order.organizer_payout_amount,
                        "payout_anomaly": order.payout_anomaly,
                    })),
            )
            .await;

        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("order", order_id))
    }

    pub async fn find_for_payment(&self, gateway_order_id: Option<&str>, order_ref: Option<&str>) -> Result<Order> {
        if let Some(gateway_order_id) = gateway_order_id {
            if let Some(order) = self.orders.find_by_gateway_order_id(gateway_order_id).await? {
                return Ok(order);
            }
        }
        if let Some(id) = order_ref.and_then(|r| Uuid::parse_str(r).ok()) {
            if let Some(order) = self.orders.get(id).await? {
                return Ok(order);
            }
        }
        Err(LedgerError::not_found(
            "order",
            gateway_order_id.or(order_ref).unwrap_or("unknown"),
        ))
    }

    pub async fn mark_paid(&self, order_id: Uuid, payment_id: &str) -> Result<Order> {
        let order = self.get(order_id).await?;
        if order.status.is_captured() {
            tracing::debug!(order_id = %order_id, status = order.status.as_str(), "order already captured");
            return Ok(order);
        }

        let moved = self
            .orders
            .transition(
                order_id,
                &[OrderStatus::Created, OrderStatus::Failed],
                OrderStatus::Paid,
                Some(payment_id),
            )
            .await?;
        let current = self.get(order_id).await?;
        if !moved && !current.status.is_captured() {
            return Err(LedgerError::invalid_transition(
                "order",
                order_id,
                current.status.as_str(),
                OrderStatus::Paid.as_str(),
            ));
        }

        if moved {
            tracing::info!(order_id = %order_id, payment_id, from = order.status.as_str(), "order paid");
            self.audit
                .log(
                    AuditRecord::success("order.mark_paid", "order", order_id)
                        .with_metadata(json!({ "payment_id": payment_id, "from": order.status.as_str() })),
                )
                .await;
        }
        Ok(current)
    }

    pub async fn mark_failed(&self, order_id: Uuid) -> Result<Order> {
        let order = self.get(order_id).await?;
        match order.status {
            OrderStatus::Failed => return Ok(order),
            OrderStatus::Created => {}
            other => {
                return Err(LedgerError::invalid_transition(
                    "order",
                    order_id,
                    other.as_str(),
                    OrderStatus::Failed.as_str(),
                ))
            }
        }

        if !self
            .orders
            .transition(order_id, &[OrderStatus::Created], OrderStatus::Failed, None)
            .await?
        {
            let current = self.get(order_id).await?;
            if current.status == OrderStatus::Failed {
                return Ok(current);
            }
            return Err(LedgerError::invalid_transition(
                "order",
                order_id,
                current.status.as_str(),
                OrderStatus::Failed.as_str(),
            ));
        }

        tracing::info!(order_id = %order_id, "order failed");
        self.audit
            .log(AuditRecord::success("order.mark_failed", "order", order_id))
            .await;
        self.get(order_id).await
    }

    pub async fn mark_split_processed(&self, order_id: Uuid) -> Result<bool> {
        self.orders
            .transition_split(order_id, SplitStatus::Pending, SplitStatus::Processed)
            .await
    }

    pub async fn apply_refund(&self, order_id: Uuid, refunded_amount: i64) -> Result<Order> {
        let order = self.get(order_id).await?;
        if !order.status.is_captured() {
            return Err(LedgerError::invalid_transition(
                "order",
                order_id,
                order.status.as_str(),
                OrderStatus::PartialRefund.as_str(),
            ));
        }
        if refunded_amount > order.amount {
            return Err(LedgerError::RefundExceedsAvailable {
                order_id: order_id.to_string(),
                requested: refunded_amount,
                available: order.amount,
            });
        }
        if refunded_amount <= order.refunded_amount {
            tracing::debug!(order_id = %order_id, refunded_amount, "refund total already applied");
            return Ok(order);
        }

        let (status, refund_status) = if refunded_amount < order.amount {
            (OrderStatus::PartialRefund, OrderRefundStatus::Partial)
        } else {
            (OrderStatus::Refunded, OrderRefundStatus::Full)
        };

        if !self
            .orders
            .apply_refund_total(order_id, refunded_amount, status, refund_status)
            .await?
        {
            let current = self.get(order_id).await?;
            if current.refunded_amount >= refunded_amount {
                return Ok(current);
            }
            return Err(LedgerError::PersistenceConflict {
                entity: "order".to_string(),
                id: order_id.to_string(),
            });
        }

        tracing::info!(order_id = %order_id, refunded_amount, status = status.as_str(), "order refund applied");
        self.audit
            .log(
                AuditRecord::success("order.apply_refund", "order", order_id)
                    .with_metadata(json!({ "refunded_amount": refunded_amount, "status": status.as_str() })),
            )
            .await;
        self.get(order_id).await
    }
}

fn validate_create(req: &CreateOrderRequest, settlement_currency: &str) -> Result<()> {
    if req.amount <= 0 {
        return Err(LedgerError::validation("amount must be positive"));
    }
    if req.buyer_id.trim().is_empty() || req.organizer_id.trim().is_empty() {
        return Err(LedgerError::validation("buyer_id and organizer_id are required"));
    }
    if !req.currency.eq_ignore_ascii_case(settlement_currency) {
        return Err(LedgerError::validation(format!(
            "currency {} is not supported, orders settle in {settlement_currency}",
            req.currency
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_convert_percent_to_bps() {
        let s = SplitSettings::from_percent(5, 180, "inr");
        assert_eq!(s.default_commission_bps, 500);
        assert_eq!(s.gateway_fee_bps, 180);
        assert_eq!(s.settlement_currency, "INR");

        let capped = SplitSettings::from_percent(80, 180, "INR");
        assert_eq!(capped.default_commission_bps, MAX_COMMISSION_BPS);
    }
}
