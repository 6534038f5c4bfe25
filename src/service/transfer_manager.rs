use crate::domain::audit::AuditRecord;
use crate::domain::ledger::{EntrySource, EntryType};
use crate::domain::order::{OrderStatus, SplitStatus};
use crate::domain::refund::RefundStatus;
use crate::domain::transfer::{Transfer, TransferPatch, TransferStatus};
use crate::error::{LedgerError, Result};
use crate::gateways::{call_with_retry, CreateTransferRequest, PayoutGateway, RetryPolicy, ReverseTransferRequest};
use crate::repo::{RefundStore, TransferStore};
use crate::service::audit::AuditLogger;
use crate::service::order_ledger::OrderLedger;
use crate::service::payout_config_cache::PayoutConfigCache;
use crate::service::payout_ledger::PayoutLedger;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct TransferManager {
    pub orders: OrderLedger,
    pub transfers: Arc<dyn TransferStore>,
    pub refunds: Arc<dyn RefundStore>,
    pub payout_configs: PayoutConfigCache,
    pub ledger: PayoutLedger,
    pub gateway: Arc<dyn PayoutGateway>,
    pub audit: Arc<dyn AuditLogger>,
    pub retry: RetryPolicy,
    pub hold_days: Option<i64>,
}

impl TransferManager {
    pub async fn get(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.transfers
            .get(transfer_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transfer", transfer_id))
    }

    pub async fn active_for_order(&self, order_id: Uuid) -> Result<Option<Transfer>> {
        self.transfers.active_for_order(order_id).await
    }

    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Transfer>> {
        self.transfers.list_for_order(order_id).await
    }

    pub async fn find_for_webhook(&self, gateway_transfer_id: Option<&str>, transfer_ref: Option<&str>) -> Result<Transfer> {
        if let Some(id) = gateway_transfer_id {
            if let Some(t) = self.transfers.find_by_gateway_id(id).await? {
                return Ok(t);
            }
        }
        if let Some(id) = transfer_ref.and_then(|r| Uuid::parse_str(r).ok()) {
            if let Some(t) = self.transfers.get(id).await? {
                return Ok(t);
            }
        }
        Err(LedgerError::not_found(
            "transfer",
            gateway_transfer_id.or(transfer_ref).unwrap_or("unknown"),
        ))
    }

    pub async fn create_transfer(&self, order_id: Uuid, payment_id: &str) -> Result<Transfer> {
        let order = self.orders.get(order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(LedgerError::invalid_transition(
                "order",
                order_id,
                order.status.as_str(),
                "transfer",
            ));
        }
        if !order.purpose.is_payout_eligible() {
            return Err(LedgerError::validation(format!(
                "order {order_id} is {} revenue and has no organizer payout",
                order.purpose.label()
            )));
        }
        if let Some(active) = self.transfers.active_for_order(order_id).await? {
            return Err(duplicate(order_id, &active));
        }

        let config = self.payout_configs.get(&order.organizer_id).await?;
        let linked_account = config
            .as_ref()
            .and_then(|c| c.payout_account())
            .ok_or_else(|| LedgerError::AccountNotOnboarded {
                organizer_id: order.organizer_id.clone(),
                reason: match &config {
                    None => "no payout configuration".to_string(),
                    Some(c) => format!("onboarding status {}", c.onboarding_status.as_str()),
                },
            })?
            .to_string();

        if order.organizer_payout_amount <= 0 {
            return Err(LedgerError::InsufficientPayoutAmount {
                gross: order.amount,
                commission: order.commission_amount,
                fee: order.gateway_fee_amount,
            });
        }

        let now = Utc::now();
        let hold_until = self.hold_days.map(|d| now + Duration::days(d));
        let transfer = Transfer {
            transfer_id: Uuid::new_v4(),
            order_id,
            organizer_id: order.organizer_id.clone(),
            payment_id: payment_id.to_string(),
            linked_account_id: linked_account.clone(),
            gateway_transfer_id: None,
            amount: order.amount,
            commission_amount: order.commission_amount,
            gateway_fee_amount: order.gateway_fee_amount,
            payout_amount: order.organizer_payout_amount,
            currency: order.currency.clone(),
            status: TransferStatus::Pending,
            hold_until,
            processed_at: None,
            reversed_amount: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        if !self.transfers.insert(&transfer).await? {
            let active = self.transfers.active_for_order(order_id).await?;
            return Err(match active {
                Some(active) => duplicate(order_id, &active),
                None => LedgerError::PersistenceConflict {
                    entity: "transfer".to_string(),
                    id: order_id.to_string(),
                },
            });
        }

        let request = CreateTransferRequest {
            payment_id: payment_id.to_string(),
            linked_account_id: linked_account,
            amount: transfer.payout_amount,
            currency: transfer.currency.clone(),
            on_hold_until: hold_until.map(|h| h.timestamp()),
            notes: json!({
                "order_ref": order_id.to_string(),
                "transfer_ref": transfer.transfer_id.to_string(),
            }),
            idempotency_key: transfer.transfer_id.to_string(),
        };
        let created = match call_with_retry(self.retry, "create_transfer", || self.gateway.create_transfer(&request)).await {
            Ok(created) => created,
            Err(e) => {
                let patch = TransferPatch {
                    failure_reason: Some(e.to_string()),
                    ..TransferPatch::default()
                };
                self.transfers
                    .transition(transfer.transfer_id, &[TransferStatus::Pending], TransferStatus::Failed, &patch)
                    .await?;
                self.audit
                    .log(
                        AuditRecord::failure("transfer.create", "transfer", transfer.transfer_id)
                            .with_metadata(json!({ "order_id": order_id, "error": e.to_string() })),
                    )
                    .await;
                return Err(e);
            }
        };

        let patch = TransferPatch {
            gateway_transfer_id: Some(created.id.clone()),
            ..TransferPatch::default()
        };
        let moved = self
            .transfers
            .transition(transfer.transfer_id, &[TransferStatus::Pending], TransferStatus::Initiated, &patch)
            .await?;
        if !moved {
            // A transfer.processed webhook can finalise the row before the
            // gateway call returns here.
            let current = self.get(transfer.transfer_id).await?;
            if !current.status.is_active() {
                return Err(LedgerError::PersistenceConflict {
                    entity: "transfer".to_string(),
                    id: transfer.transfer_id.to_string(),
                });
            }
            tracing::debug!(transfer_id = %transfer.transfer_id, status = current.status.as_str(), "transfer advanced concurrently");
        }
        self.orders.mark_split_processed(order_id).await?;

        tracing::info!(
            transfer_id = %transfer.transfer_id,
            order_id = %order_id,
            gateway_transfer_id = %created.id,
            payout = transfer.payout_amount,
            "transfer initiated"
        );
        self.audit
            .log(
                AuditRecord::success("transfer.create", "transfer", transfer.transfer_id).with_metadata(json!({
                    "order_id": order_id,
                    "gateway_transfer_id": created.id,
                    "payout_amount": transfer.payout_amount,
                })),
            )
            .await;

        self.get(transfer.transfer_id).await
    }

    pub async fn confirm_processed(&self, transfer_id: Uuid, gateway_transfer_id: Option<&str>) -> Result<Transfer> {
        let transfer = self.get(transfer_id).await?;
        match transfer.status {
            TransferStatus::Processed => {
                self.credit_payout(&transfer).await?;
                tracing::debug!(transfer_id = %transfer_id, "transfer already processed");
                return Ok(transfer);
            }
            TransferStatus::Reversed => {
                tracing::debug!(transfer_id = %transfer_id, "transfer already reversed, ignoring processed");
                return Ok(transfer);
            }
            TransferStatus::Failed => {
                return Err(LedgerError::invalid_transition(
                    "transfer",
                    transfer_id,
                    transfer.status.as_str(),
                    TransferStatus::Processed.as_str(),
                ))
            }
            TransferStatus::Pending | TransferStatus::Initiated => {}
        }

        let patch = TransferPatch {
            gateway_transfer_id: gateway_transfer_id.map(str::to_string),
            processed_at: Some(Utc::now()),
            ..TransferPatch::default()
        };
        let moved = self
            .transfers
            .transition(
                transfer_id,
                &[TransferStatus::Pending, TransferStatus::Initiated],
                TransferStatus::Processed,
                &patch,
            )
            .await?;
        let current = self.get(transfer_id).await?;
        if !moved && current.status != TransferStatus::Processed {
            return Err(LedgerError::invalid_transition(
                "transfer",
                transfer_id,
                current.status.as_str(),
                TransferStatus::Processed.as_str(),
            ));
        }

        self.credit_payout(&current).await?;
        if moved {
            tracing::info!(transfer_id = %transfer_id, order_id = %current.order_id, "transfer processed");
            self.audit
                .log(
                    AuditRecord::success("transfer.processed", "transfer", transfer_id)
                        .with_metadata(json!({ "payout_amount": current.payout_amount })),
                )
                .await;
        }
        Ok(current)
    }

    pub async fn mark_failed(&self, transfer_id: Uuid, reason: &str) -> Result<Transfer> {
        let transfer = self.get(transfer_id).await?;
        if transfer.status == TransferStatus::Failed {
            return Ok(transfer);
        }

        let patch = TransferPatch {
            failure_reason: Some(reason.to_string()),
            ..TransferPatch::default()
        };
        if !self
            .transfers
            .transition(
                transfer_id,
                &[TransferStatus::Pending, TransferStatus::Initiated],
                TransferStatus::Failed,
                &patch,
            )
            .await?
        {
            let current = self.get(transfer_id).await?;
            if current.status == TransferStatus::Failed {
                return Ok(current);
            }
            return Err(LedgerError::invalid_transition(
                "transfer",
                transfer_id,
                current.status.as_str(),
                TransferStatus::Failed.as_str(),
            ));
        }

        self.orders
            .orders
            .transition_split(transfer.order_id, SplitStatus::Processed, SplitStatus::Pending)
            .await?;

        tracing::warn!(transfer_id = %transfer_id, order_id = %transfer.order_id, reason, "transfer failed");
        self.audit
            .log(
                AuditRecord::failure("transfer.failed", "transfer", transfer_id)
                    .with_metadata(json!({ "reason": reason })),
            )
            .await;
        self.get(transfer_id).await
    }

    pub async fn reverse(&self, transfer_id: Uuid, amount: Option<i64>, actor_id: Option<&str>) -> Result<Transfer> {
        let transfer = self.get(transfer_id).await?;
        match transfer.status {
            TransferStatus::Processed => {}
            TransferStatus::Reversed => return Ok(transfer),
            other => {
                return Err(LedgerError::invalid_transition(
                    "transfer",
                    transfer_id,
                    other.as_str(),
                    TransferStatus::Reversed.as_str(),
                ))
            }
        }

        let amount = amount.unwrap_or(transfer.payout_amount);
        if amount <= 0 || amount > transfer.payout_amount {
            return Err(LedgerError::validation(format!(
                "reversal amount {amount} must be within 1..={}",
                transfer.payout_amount
            )));
        }
        let gateway_transfer_id = transfer
            .gateway_transfer_id
            .clone()
            .ok_or_else(|| LedgerError::validation(format!("transfer {transfer_id} has no gateway id")))?;

        let request = ReverseTransferRequest {
            gateway_transfer_id,
            amount,
            idempotency_key: format!("{transfer_id}:reverse"),
        };
        let reversal = match call_with_retry(self.retry, "reverse_transfer", || self.gateway.reverse_transfer(&request)).await {
            Ok(r) => r,
            Err(e) => {
                let mut record = AuditRecord::failure("transfer.reverse", "transfer", transfer_id)
                    .with_metadata(json!({ "amount": amount, "error": e.to_string() }));
                if let Some(actor) = actor_id {
                    record = record.by(actor);
                }
                self.audit.log(record).await;
                return Err(e);
            }
        };

        self.apply_reversal(&transfer, amount, actor_id, Some(&reversal.id)).await
    }

    pub async fn confirm_reversed(&self, transfer_id: Uuid, amount: Option<i64>) -> Result<Transfer> {
        let transfer = self.get(transfer_id).await?;
        if transfer.status == TransferStatus::Reversed {
            return Ok(transfer);
        }
        let amount = amount.unwrap_or(transfer.payout_amount).clamp(0, transfer.payout_amount);
        self.apply_reversal(&transfer, amount, None, None).await
    }

    async fn apply_reversal(
        &self,
        transfer: &Transfer,
        amount: i64,
        actor_id: Option<&str>,
        reversal_id: Option<&str>,
    ) -> Result<Transfer> {
        let patch = TransferPatch {
            reversed_amount: Some(amount),
            ..TransferPatch::default()
        };
        if !self
            .transfers
            .transition(transfer.transfer_id, &[TransferStatus::Processed], TransferStatus::Reversed, &patch)
            .await?
        {
            let current = self.get(transfer.transfer_id).await?;
            if current.status == TransferStatus::Reversed {
                self.debit_reversal(&current).await?;
                return Ok(current);
            }
            return Err(LedgerError::invalid_transition(
                "transfer",
                transfer.transfer_id,
                current.status.as_str(),
                TransferStatus::Reversed.as_str(),
            ));
        }

        let current = self.get(transfer.transfer_id).await?;
        self.debit_reversal(&current).await?;
        tracing::info!(transfer_id = %transfer.transfer_id, amount, "transfer reversed");
        let mut record = AuditRecord::success("transfer.reverse", "transfer", transfer.transfer_id)
            .with_metadata(json!({ "amount": amount, "reversal_id": reversal_id }));
        if let Some(actor) = actor_id {
            record = record.by(actor);
        }
        self.audit.log(record).await;
        Ok(current)
    }

    async fn debit_reversal(&self, transfer: &Transfer) -> Result<()> {
        self.book_order_debit(
            transfer.order_id,
            &transfer.organizer_id,
            &transfer.currency,
            EntrySource::Transfer,
            &transfer.transfer_id.to_string(),
        )
        .await
    }

    // Debits an order's losses, max(refunded, reversed), less what is already booked.
    pub async fn book_order_debit(
        &self,
        order_id: Uuid,
        organizer_id: &str,
        currency: &str,
        source: EntrySource,
        reference_id: &str,
    ) -> Result<()> {
        if self
            .ledger
            .store
            .find(source, reference_id, EntryType::Debit)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let transfers = self.transfers.list_for_order(order_id).await?;
        let refunds = self.refunds.list_for_order(order_id).await?;
        let reversed: i64 = transfers
            .iter()
            .filter(|t| t.status == TransferStatus::Reversed)
            .map(|t| t.reversed_amount)
            .sum();
        let refunded: i64 = refunds
            .iter()
            .filter(|r| r.status == RefundStatus::Processed)
            .map(|r| r.amount)
            .sum();

        let earlier: Vec<(EntrySource, String)> = transfers
            .iter()
            .map(|t| (EntrySource::Transfer, t.transfer_id.to_string()))
            .chain(refunds.iter().map(|r| (EntrySource::Refund, r.refund_id.to_string())))
            .filter(|(s, r)| !(*s == source && r == reference_id))
            .collect();
        let already = self.ledger.debited(&earlier).await?;

        let amount = reversed.max(refunded) - already;
        if amount <= 0 {
            tracing::debug!(order_id = %order_id, reference_id, already, "order losses already debited");
            return Ok(());
        }
        self.ledger
            .append(organizer_id, EntryType::Debit, source, reference_id, amount, currency)
            .await?;
        Ok(())
    }

    async fn credit_payout(&self, transfer: &Transfer) -> Result<()> {
        self.ledger
            .append(
                &transfer.organizer_id,
                EntryType::Credit,
                EntrySource::Transfer,
                &transfer.transfer_id.to_string(),
                transfer.payout_amount,
                &transfer.currency,
            )
            .await?;
        Ok(())
    }
}

fn duplicate(order_id: Uuid, active: &Transfer) -> LedgerError {
    LedgerError::DuplicateTransfer {
        order_id: order_id.to_string(),
        transfer_id: active.transfer_id.to_string(),
    }
}
