//! In-memory implementations of every store trait.
//!
//! Backed by a single lock so multi-row operations (ledger append, the
//! active-transfer check) are atomic the same way their Postgres
//! counterparts are inside a transaction.

use crate::domain::audit::AuditRecord;
use crate::domain::event::PaymentEvent;
use crate::domain::ledger::{AppendOutcome, EntrySource, EntryType, LedgerEntry, NewLedgerEntry};
use crate::domain::order::{Order, OrderRefundStatus, OrderStatus, SplitStatus};
use crate::domain::payout_config::OrganizerPayoutConfig;
use crate::domain::refund::{Refund, RefundStatus};
use crate::domain::transfer::{Transfer, TransferPatch, TransferStatus};
use crate::error::{LedgerError, Result};
use crate::repo::{
    AuditStore, LedgerStore, OrderStore, PaymentEventStore, PayoutConfigStore, RefundReservation, RefundStore,
    RetryJob, RetryJobStatus, RetryQueue, TransferStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    transfers: Vec<Transfer>,
    refunds: Vec<Refund>,
    ledger: Vec<LedgerEntry>,
    balances: HashMap<String, i64>,
    events: HashMap<(String, String), PaymentEvent>,
    payout_configs: HashMap<String, OrganizerPayoutConfig>,
    retry_jobs: Vec<StoredJob>,
    audit: Vec<AuditRecord>,
}

#[derive(Clone)]
struct StoredJob {
    job: RetryJob,
    status: RetryJobStatus,
    next_attempt_at: DateTime<Utc>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.inner.read().map_err(|_| LedgerError::Persistence {
            message: "in-memory store lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.inner.write().map_err(|_| LedgerError::Persistence {
            message: "in-memory store lock poisoned".to_string(),
        })
    }

    /// Seed or replace an organizer's payout settings.
    pub fn put_payout_config(&self, config: OrganizerPayoutConfig) -> Result<()> {
        self.write()?
            .payout_configs
            .insert(config.organizer_id.clone(), config);
        Ok(())
    }

    /// Current running balance, zero if the organizer has no entries.
    pub fn balance(&self, organizer_id: &str) -> Result<i64> {
        Ok(self.read()?.balances.get(organizer_id).copied().unwrap_or(0))
    }

    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.ledger.clone())
    }

    pub fn payment_events(&self) -> Result<Vec<PaymentEvent>> {
        Ok(self.read()?.events.values().cloned().collect())
    }

    pub fn audit_records(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.read()?.audit.clone())
    }

    pub fn retry_jobs(&self) -> Result<Vec<(RetryJob, RetryJobStatus)>> {
        Ok(self
            .read()?
            .retry_jobs
            .iter()
            .map(|s| (s.job.clone(), s.status))
            .collect())
    }

    /// Make every pending retry job due now.
    pub fn expedite_retries(&self) -> Result<()> {
        let now = Utc::now();
        for stored in self.write()?.retry_jobs.iter_mut() {
            stored.next_attempt_at = now;
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut state = self.write()?;
        if state.orders.contains_key(&order.order_id) {
            return Err(LedgerError::PersistenceConflict {
                entity: "order".to_string(),
                id: order.order_id.to_string(),
            });
        }
        state.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.read()?.orders.get(&order_id).cloned())
    }

    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> Result<Option<Order>> {
        Ok(self
            .read()?
            .orders
            .values()
            .find(|o| o.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>> {
        Ok(self
            .read()?
            .orders
            .values()
            .find(|o| o.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        payment_id: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if !from.contains(&order.status) {
            return Ok(false);
        }
        order.status = to;
        if let Some(payment_id) = payment_id {
            order.payment_id = Some(payment_id.to_string());
        }
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_split(&self, order_id: Uuid, from: SplitStatus, to: SplitStatus) -> Result<bool> {
        let mut state = self.write()?;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.split_status == from => {
                order.split_status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_refund_total(
        &self,
        order_id: Uuid,
        refunded_amount: i64,
        status: OrderStatus,
        refund_status: OrderRefundStatus,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        let applicable = matches!(order.status, OrderStatus::Paid | OrderStatus::PartialRefund)
            && order.refunded_amount <= refunded_amount
            && refunded_amount <= order.amount;
        if !applicable {
            return Ok(false);
        }
        order.refunded_amount = refunded_amount;
        order.status = status;
        order.refund_status = refund_status;
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl TransferStore for InMemoryStore {
    async fn insert(&self, transfer: &Transfer) -> Result<bool> {
        let mut state = self.write()?;
        let clash = state
            .transfers
            .iter()
            .any(|t| t.order_id == transfer.order_id && t.status.is_active());
        if clash && transfer.status.is_active() {
            return Ok(false);
        }
        if let Some(gateway_id) = &transfer.gateway_transfer_id {
            if state
                .transfers
                .iter()
                .any(|t| t.gateway_transfer_id.as_ref() == Some(gateway_id))
            {
                return Err(LedgerError::PersistenceConflict {
                    entity: "transfer".to_string(),
                    id: gateway_id.clone(),
                });
            }
        }
        state.transfers.push(transfer.clone());
        Ok(true)
    }

    async fn get(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        Ok(self
            .read()?
            .transfers
            .iter()
            .find(|t| t.transfer_id == transfer_id)
            .cloned())
    }

    async fn find_by_gateway_id(&self, gateway_transfer_id: &str) -> Result<Option<Transfer>> {
        Ok(self
            .read()?
            .transfers
            .iter()
            .find(|t| t.gateway_transfer_id.as_deref() == Some(gateway_transfer_id))
            .cloned())
    }

    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<Transfer>> {
        Ok(self
            .read()?
            .transfers
            .iter()
            .find(|t| t.order_id == order_id && t.status.is_active())
            .cloned())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Transfer>> {
        Ok(self
            .read()?
            .transfers
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        transfer_id: Uuid,
        from: &[TransferStatus],
        to: TransferStatus,
        patch: &TransferPatch,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let Some(t) = state.transfers.iter_mut().find(|t| t.transfer_id == transfer_id) else {
            return Ok(false);
        };
        if !from.contains(&t.status) {
            return Ok(false);
        }
        t.status = to;
        if let Some(id) = &patch.gateway_transfer_id {
            t.gateway_transfer_id = Some(id.clone());
        }
        if let Some(at) = patch.processed_at {
            t.processed_at = Some(at);
        }
        if let Some(amount) = patch.reversed_amount {
            t.reversed_amount = amount;
        }
        if let Some(reason) = &patch.failure_reason {
            t.failure_reason = Some(reason.clone());
        }
        t.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl RefundStore for InMemoryStore {
    async fn reserve(&self, refund: &Refund) -> Result<RefundReservation> {
        let mut state = self.write()?;
        let order_amount = state
            .orders
            .get(&refund.order_id)
            .map(|o| o.amount)
            .ok_or_else(|| LedgerError::not_found("order", refund.order_id))?;
        if let Some(gateway_id) = &refund.gateway_refund_id {
            if state
                .refunds
                .iter()
                .any(|r| r.gateway_refund_id.as_ref() == Some(gateway_id))
            {
                return Ok(RefundReservation::Duplicate);
            }
        }

        let committed: i64 = state
            .refunds
            .iter()
            .filter(|r| {
                r.order_id == refund.order_id && matches!(r.status, RefundStatus::Pending | RefundStatus::Processed)
            })
            .map(|r| r.amount)
            .sum();
        let available = order_amount - committed;
        if refund.amount > available {
            return Ok(RefundReservation::Exceeds { available });
        }

        state.refunds.push(refund.clone());
        Ok(RefundReservation::Reserved { committed })
    }

    async fn set_reversed_transfer(&self, refund_id: Uuid) -> Result<()> {
        if let Some(r) = self.write()?.refunds.iter_mut().find(|r| r.refund_id == refund_id) {
            r.reversed_transfer = true;
        }
        Ok(())
    }

    async fn get(&self, refund_id: Uuid) -> Result<Option<Refund>> {
        Ok(self
            .read()?
            .refunds
            .iter()
            .find(|r| r.refund_id == refund_id)
            .cloned())
    }

    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        Ok(self
            .read()?
            .refunds
            .iter()
            .find(|r| r.gateway_refund_id.as_deref() == Some(gateway_refund_id))
            .cloned())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>> {
        Ok(self
            .read()?
            .refunds
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn total_for_order(&self, order_id: Uuid, statuses: &[RefundStatus]) -> Result<i64> {
        Ok(self
            .read()?
            .refunds
            .iter()
            .filter(|r| r.order_id == order_id && statuses.contains(&r.status))
            .map(|r| r.amount)
            .sum())
    }

    async fn transition(
        &self,
        refund_id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
        gateway_refund_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let Some(r) = state.refunds.iter_mut().find(|r| r.refund_id == refund_id) else {
            return Ok(false);
        };
        if !from.contains(&r.status) {
            return Ok(false);
        }
        r.status = to;
        if r.gateway_refund_id.is_none() {
            r.gateway_refund_id = gateway_refund_id.map(str::to_string);
        }
        if processed_at.is_some() {
            r.processed_at = processed_at;
        }
        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        let mut state = self.write()?;
        if let Some(existing) = state.ledger.iter().find(|e| {
            e.source == entry.source && e.reference_id == entry.reference_id && e.entry_type == entry.entry_type
        }) {
            return Ok(AppendOutcome::Existing(existing.clone()));
        }

        let balance = state.balances.entry(entry.organizer_id.clone()).or_insert(0);
        *balance += entry.entry_type.delta(entry.amount);
        let balance_after = *balance;

        let appended = LedgerEntry {
            entry_id: Uuid::new_v4(),
            organizer_id: entry.organizer_id.clone(),
            entry_type: entry.entry_type,
            source: entry.source,
            reference_id: entry.reference_id.clone(),
            amount: entry.amount,
            currency: entry.currency.clone(),
            balance_after,
            created_at: Utc::now(),
        };
        state.ledger.push(appended.clone());
        Ok(AppendOutcome::Appended(appended))
    }

    async fn latest(&self, organizer_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .rev()
            .find(|e| e.organizer_id == organizer_id)
            .cloned())
    }

    async fn history(&self, organizer_id: &str, limit: i64) -> Result<Vec<LedgerEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .read()?
            .ledger
            .iter()
            .rev()
            .filter(|e| e.organizer_id == organizer_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find(
        &self,
        source: EntrySource,
        reference_id: &str,
        entry_type: EntryType,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .find(|e| e.source == source && e.reference_id == reference_id && e.entry_type == entry_type)
            .cloned())
    }
}

#[async_trait]
impl PaymentEventStore for InMemoryStore {
    async fn exists(&self, event_id: &str, source: &str) -> Result<bool> {
        Ok(self
            .read()?
            .events
            .contains_key(&(event_id.to_string(), source.to_string())))
    }

    async fn record(&self, event: &PaymentEvent) -> Result<bool> {
        let mut state = self.write()?;
        let key = (event.event_id.clone(), event.source.clone());
        if state.events.contains_key(&key) {
            return Ok(false);
        }
        state.events.insert(key, event.clone());
        Ok(true)
    }
}

#[async_trait]
impl PayoutConfigStore for InMemoryStore {
    async fn get(&self, organizer_id: &str) -> Result<Option<OrganizerPayoutConfig>> {
        Ok(self.read()?.payout_configs.get(organizer_id).cloned())
    }
}

#[async_trait]
impl RetryQueue for InMemoryStore {
    async fn enqueue(
        &self,
        event_id: &str,
        source: &str,
        event_type: &str,
        envelope: serde_json::Value,
        last_error: &str,
    ) -> Result<bool> {
        let mut state = self.write()?;
        if state
            .retry_jobs
            .iter()
            .any(|s| s.job.event_id == event_id && s.job.source == source)
        {
            return Ok(false);
        }
        let job_id = state.retry_jobs.len() as i64 + 1;
        state.retry_jobs.push(StoredJob {
            job: RetryJob {
                job_id,
                event_id: event_id.to_string(),
                source: source.to_string(),
                event_type: event_type.to_string(),
                envelope,
                attempts: 0,
                last_error: Some(last_error.to_string()),
            },
            status: RetryJobStatus::Pending,
            next_attempt_at: Utc::now(),
        });
        Ok(true)
    }

    async fn lock_due(&self, limit: i64) -> Result<Vec<RetryJob>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let now = Utc::now();
        let mut state = self.write()?;
        let mut claimed = Vec::new();
        for stored in state.retry_jobs.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            if stored.status == RetryJobStatus::Pending && stored.next_attempt_at <= now {
                stored.status = RetryJobStatus::Processing;
                claimed.push(stored.job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_done(&self, job_id: i64) -> Result<()> {
        if let Some(stored) = self.write()?.retry_jobs.iter_mut().find(|s| s.job.job_id == job_id) {
            stored.status = RetryJobStatus::Done;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        job_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        if let Some(stored) = self.write()?.retry_jobs.iter_mut().find(|s| s.job.job_id == job_id) {
            stored.status = RetryJobStatus::Pending;
            stored.job.attempts = attempts;
            stored.job.last_error = Some(last_error.to_string());
            stored.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }

    async fn mark_dead(&self, job_id: i64, attempts: i32, last_error: &str) -> Result<()> {
        if let Some(stored) = self.write()?.retry_jobs.iter_mut().find(|s| s.job.job_id == job_id) {
            stored.status = RetryJobStatus::Dead;
            stored.job.attempts = attempts;
            stored.job.last_error = Some(last_error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn insert(&self, record: &AuditRecord) -> Result<()> {
        self.write()?.audit.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(org: &str, reference: &str, amount: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            organizer_id: org.to_string(),
            entry_type: EntryType::Credit,
            source: EntrySource::Transfer,
            reference_id: reference.to_string(),
            amount,
            currency: "INR".to_string(),
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_per_reference() {
        let store = InMemoryStore::new();
        let first = store.append(&credit("org1", "t1", 100)).await.unwrap();
        let again = store.append(&credit("org1", "t1", 100)).await.unwrap();

        assert!(first.is_new());
        assert!(!again.is_new());
        assert_eq!(first.entry().entry_id, again.entry().entry_id);
        assert_eq!(store.balance("org1").unwrap(), 100);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_a_consistent_chain() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(&credit("org1", &format!("t{i}"), 10)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let history = store.history("org1", 100).await.unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].balance_after, 200);
        let mut balances: Vec<i64> = history.iter().map(|e| e.balance_after).collect();
        balances.sort();
        assert_eq!(balances, (1..=20).map(|n| n * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn retry_jobs_are_claimed_once() {
        let store = InMemoryStore::new();
        assert!(store
            .enqueue("evt_1", "razorpay", "transfer.processed", serde_json::json!({}), "not found")
            .await
            .unwrap());
        assert!(!store
            .enqueue("evt_1", "razorpay", "transfer.processed", serde_json::json!({}), "again")
            .await
            .unwrap());

        let claimed = store.lock_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(store.lock_due(10).await.unwrap().is_empty());

        store.mark_done(claimed[0].job_id).await.unwrap();
        assert_eq!(store.retry_jobs().unwrap()[0].1, RetryJobStatus::Done);
    }
}
