use crate::domain::audit::AuditRecord;
use crate::domain::ledger::EntrySource;
use crate::domain::order::Order;
use crate::domain::refund::{InitiateRefundRequest, Refund, RefundStatus};
use crate::domain::transfer::TransferStatus;
use crate::error::{LedgerError, Result};
use crate::gateways::{call_with_retry, CreateRefundRequest, PayoutGateway, RetryPolicy};
use crate::repo::{RefundReservation, RefundStore};
use crate::service::audit::AuditLogger;
use crate::service::order_ledger::OrderLedger;
use crate::service::transfer_manager::TransferManager;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const COMMITTED: [RefundStatus; 2] = [RefundStatus::Pending, RefundStatus::Processed];

#[derive(Debug, Clone)]
pub struct RefundNotice {
    pub gateway_refund_id: String,
    pub payment_id: Option<String>,
    pub amount: i64,
    pub refund_ref: Option<String>,
    pub order_ref: Option<String>,
}

#[derive(Clone)]
pub struct RefundManager {
    pub orders: OrderLedger,
    pub transfers: TransferManager,
    pub refunds: Arc<dyn RefundStore>,
    pub gateway: Arc<dyn PayoutGateway>,
    pub audit: Arc<dyn AuditLogger>,
    pub retry: RetryPolicy,
}

impl RefundManager {
    pub async fn get(&self, refund_id: Uuid) -> Result<Refund> {
        self.refunds
            .get(refund_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("refund", refund_id))
    }

    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>> {
        self.refunds.list_for_order(order_id).await
    }

    pub async fn initiate_refund(&self, order_id: Uuid, req: InitiateRefundRequest) -> Result<Refund> {
        if req.amount <= 0 {
            return Err(LedgerError::validation("refund amount must be positive"));
        }
        if req.actor_id.trim().is_empty() {
            return Err(LedgerError::validation("actor_id is required"));
        }

        let order = self.orders.get(order_id).await?;
        if !order.status.is_captured() {
            return Err(LedgerError::invalid_transition(
                "order",
                order_id,
                order.status.as_str(),
                "refund",
            ));
        }
        let payment_id = order
            .payment_id
            .clone()
            .ok_or_else(|| LedgerError::validation(format!("order {order_id} has no captured payment")))?;

        let refund = Refund {
            refund_id: Uuid::new_v4(),
            order_id,
            payment_id: payment_id.clone(),
            gateway_refund_id: None,
            amount: req.amount,
            currency: order.currency.clone(),
            reason: req.reason.clone(),
            actor_id: Some(req.actor_id.clone()),
            reversed_transfer: false,
            status: RefundStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        };

        // The pending row holds its share of the order before any money moves.
        let committed = match self.refunds.reserve(&refund).await? {
            RefundReservation::Reserved { committed } => committed,
            RefundReservation::Exceeds { available } => {
                self.audit
                    .log(
                        AuditRecord::failure("refund.initiate", "order", order_id)
                            .by(req.actor_id.clone())
                            .with_metadata(json!({ "requested": req.amount, "available": available })),
                    )
                    .await;
                return Err(LedgerError::RefundExceedsAvailable {
                    order_id: order_id.to_string(),
                    requested: req.amount,
                    available,
                });
            }
            RefundReservation::Duplicate => {
                return Err(LedgerError::PersistenceConflict {
                    entity: "refund".to_string(),
                    id: refund.refund_id.to_string(),
                })
            }
        };

        let reversed_transfer = match self
            .claw_back_transfer(&order, committed + req.amount, &req.actor_id)
            .await
        {
            Ok(reversed) => reversed,
            Err(e) => {
                self.release(&refund, &req.actor_id, false, &e).await?;
                return Err(e);
            }
        };
        if reversed_transfer {
            self.refunds.set_reversed_transfer(refund.refund_id).await?;
        }

        let request = CreateRefundRequest {
            payment_id,
            amount: req.amount,
            notes: json!({
                "refund_ref": refund.refund_id.to_string(),
                "order_ref": order_id.to_string(),
                "reason": req.reason,
            }),
            idempotency_key: refund.refund_id.to_string(),
        };
        let created = match call_with_retry(self.retry, "create_refund", || self.gateway.create_refund(&request)).await {
            Ok(created) => created,
            Err(e) => {
                self.release(&refund, &req.actor_id, reversed_transfer, &e).await?;
                return Err(e);
            }
        };

        let settled = self.settle(&refund, Some(&created.id)).await?;
        self.audit
            .log(
                AuditRecord::success("refund.initiate", "refund", refund.refund_id)
                    .by(req.actor_id)
                    .with_metadata(json!({
                        "order_id": order_id,
                        "amount": refund.amount,
                        "gateway_refund_id": created.id,
                        "reversed_transfer": reversed_transfer,
                    })),
            )
            .await;
        Ok(settled)
    }

    async fn release(&self, refund: &Refund, actor_id: &str, reversed_transfer: bool, error: &LedgerError) -> Result<()> {
        self.refunds
            .transition(refund.refund_id, &[RefundStatus::Pending], RefundStatus::Failed, None, None)
            .await?;
        if reversed_transfer {
            tracing::error!(
                refund_id = %refund.refund_id,
                order_id = %refund.order_id,
                error = %error,
                "refund failed after its transfer was reversed"
            );
        }
        self.audit
            .log(
                AuditRecord::failure("refund.initiate", "refund", refund.refund_id)
                    .by(actor_id)
                    .with_metadata(json!({
                        "order_id": refund.order_id,
                        "amount": refund.amount,
                        "reversed_transfer": reversed_transfer,
                        "error": error.to_string(),
                    })),
            )
            .await;
        Ok(())
    }

    pub async fn confirm_processed(&self, notice: &RefundNotice) -> Result<Refund> {
        if let Some(existing) = self.find_for_notice(notice).await? {
            if existing.status == RefundStatus::Failed {
                self.ensure_within_bound(existing.order_id, existing.amount).await?;
            }
            return self.settle(&existing, Some(&notice.gateway_refund_id)).await;
        }

        let order = self.order_for_notice(notice).await?;
        let payment_id = notice
            .payment_id
            .clone()
            .or_else(|| order.payment_id.clone())
            .unwrap_or_default();

        let refund = Refund {
            refund_id: Uuid::new_v4(),
            order_id: order.order_id,
            payment_id,
            gateway_refund_id: Some(notice.gateway_refund_id.clone()),
            amount: notice.amount,
            currency: order.currency.clone(),
            reason: Some("gateway initiated".to_string()),
            actor_id: None,
            reversed_transfer: false,
            status: RefundStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        };
        let refund = match self.refunds.reserve(&refund).await? {
            RefundReservation::Reserved { .. } => {
                tracing::info!(refund_id = %refund.refund_id, gateway_refund_id = %notice.gateway_refund_id, "refund recorded from webhook");
                refund
            }
            RefundReservation::Duplicate => self
                .refunds
                .find_by_gateway_id(&notice.gateway_refund_id)
                .await?
                .ok_or_else(|| LedgerError::PersistenceConflict {
                    entity: "refund".to_string(),
                    id: notice.gateway_refund_id.clone(),
                })?,
            RefundReservation::Exceeds { available } => {
                return Err(LedgerError::RefundExceedsAvailable {
                    order_id: order.order_id.to_string(),
                    requested: notice.amount,
                    available,
                })
            }
        };
        self.settle(&refund, Some(&notice.gateway_refund_id)).await
    }

    pub async fn mark_failed(&self, notice: &RefundNotice) -> Result<Refund> {
        let refund = self
            .find_for_notice(notice)
            .await?
            .ok_or_else(|| LedgerError::not_found("refund", &notice.gateway_refund_id))?;
        match refund.status {
            RefundStatus::Failed => return Ok(refund),
            RefundStatus::Processed => {
                return Err(LedgerError::invalid_transition(
                    "refund",
                    refund.refund_id,
                    refund.status.as_str(),
                    RefundStatus::Failed.as_str(),
                ))
            }
            RefundStatus::Pending => {}
        }

        if !self
            .refunds
            .transition(
                refund.refund_id,
                &[RefundStatus::Pending],
                RefundStatus::Failed,
                Some(&notice.gateway_refund_id),
                None,
            )
            .await?
        {
            let current = self.get(refund.refund_id).await?;
            if current.status != RefundStatus::Failed {
                return Err(LedgerError::invalid_transition(
                    "refund",
                    refund.refund_id,
                    current.status.as_str(),
                    RefundStatus::Failed.as_str(),
                ));
            }
            return Ok(current);
        }

        tracing::warn!(refund_id = %refund.refund_id, order_id = %refund.order_id, "refund failed at gateway");
        self.audit
            .log(
                AuditRecord::failure("refund.failed", "refund", refund.refund_id)
                    .with_metadata(json!({ "gateway_refund_id": notice.gateway_refund_id })),
            )
            .await;
        self.get(refund.refund_id).await
    }

    async fn claw_back_transfer(&self, order: &Order, refunded_total: i64, actor_id: &str) -> Result<bool> {
        let Some(transfer) = self.transfers.active_for_order(order.order_id).await? else {
            return Ok(false);
        };

        if refunded_total >= order.amount && transfer.status == TransferStatus::Processed {
            self.transfers
                .reverse(transfer.transfer_id, None, Some(actor_id))
                .await?;
            return Ok(true);
        }

        tracing::info!(
            order_id = %order.order_id,
            transfer_id = %transfer.transfer_id,
            transfer_status = transfer.status.as_str(),
            "refund leaves transfer in place"
        );
        self.audit
            .log(
                AuditRecord::success("transfer.partial_hold", "transfer", transfer.transfer_id)
                    .by(actor_id)
                    .with_metadata(json!({
                        "order_id": order.order_id,
                        "refunded_total": refunded_total,
                        "order_amount": order.amount,
                    })),
            )
            .await;
        Ok(false)
    }

    // Safe to repeat: the debit is keyed by refund id and order totals
    // never decrease.
    async fn settle(&self, refund: &Refund, gateway_refund_id: Option<&str>) -> Result<Refund> {
        let moved = self
            .refunds
            .transition(
                refund.refund_id,
                &[RefundStatus::Pending, RefundStatus::Failed],
                RefundStatus::Processed,
                gateway_refund_id,
                Some(Utc::now()),
            )
            .await?;
        let current = self.get(refund.refund_id).await?;
        if current.status != RefundStatus::Processed {
            return Err(LedgerError::invalid_transition(
                "refund",
                refund.refund_id,
                current.status.as_str(),
                RefundStatus::Processed.as_str(),
            ));
        }

        let order = self.orders.get(current.order_id).await?;
        if order.purpose.is_payout_eligible() {
            // Reversals on the order may already cover part of it.
            self.transfers
                .book_order_debit(
                    order.order_id,
                    &order.organizer_id,
                    &current.currency,
                    EntrySource::Refund,
                    &current.refund_id.to_string(),
                )
                .await?;
        }

        let processed_total = self
            .refunds
            .total_for_order(current.order_id, &[RefundStatus::Processed])
            .await?;
        self.orders.apply_refund(current.order_id, processed_total).await?;

        if moved {
            tracing::info!(
                refund_id = %current.refund_id,
                order_id = %current.order_id,
                amount = current.amount,
                "refund processed"
            );
        } else {
            tracing::debug!(refund_id = %current.refund_id, "refund already processed");
        }
        Ok(current)
    }

    async fn find_for_notice(&self, notice: &RefundNotice) -> Result<Option<Refund>> {
        if let Some(r) = self.refunds.find_by_gateway_id(&notice.gateway_refund_id).await? {
            return Ok(Some(r));
        }
        match notice.refund_ref.as_deref().and_then(|r| Uuid::parse_str(r).ok()) {
            Some(id) => self.refunds.get(id).await,
            None => Ok(None),
        }
    }

    async fn order_for_notice(&self, notice: &RefundNotice) -> Result<Order> {
        if let Some(id) = notice.order_ref.as_deref().and_then(|r| Uuid::parse_str(r).ok()) {
            if let Some(order) = self.orders.orders.get(id).await? {
                return Ok(order);
            }
        }
        if let Some(payment_id) = notice.payment_id.as_deref() {
            if let Some(order) = self.orders.orders.find_by_payment_id(payment_id).await? {
                return Ok(order);
            }
        }
        Err(LedgerError::not_found(
            "order",
            notice.payment_id.as_deref().unwrap_or(&notice.gateway_refund_id),
        ))
    }

    async fn ensure_within_bound(&self, order_id: Uuid, amount: i64) -> Result<()> {
        let order = self.orders.get(order_id).await?;
        let committed = self.refunds.total_for_order(order_id, &COMMITTED).await?;
        let available = order.amount - committed;
        if amount > available {
            return Err(LedgerError::RefundExceedsAvailable {
                order_id: order_id.to_string(),
                requested: amount,
                available,
            });
        }
        Ok(())
    }
}
