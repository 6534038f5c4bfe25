//! Persistence seams.
//!
//! Each trait has a Postgres repository next to it and an in-memory
//! implementation in [`memory`] for tests. Status changes are conditional:
//! every `transition` names the states it may leave from and reports whether
//! the row actually moved, so duplicate and out-of-order deliveries never
//! overwrite newer state.

use crate::domain::audit::AuditRecord;
use crate::domain::event::PaymentEvent;
use crate::domain::ledger::{AppendOutcome, EntrySource, EntryType, LedgerEntry, NewLedgerEntry};
use crate::domain::order::{Order, OrderRefundStatus, OrderStatus, SplitStatus};
use crate::domain::payout_config::OrganizerPayoutConfig;
use crate::domain::refund::{Refund, RefundStatus};
use crate::domain::transfer::{Transfer, TransferPatch, TransferStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod audit_repo;
pub mod ledger_repo;
pub mod memory;
pub mod orders_repo;
pub mod payment_events_repo;
pub mod payout_config_repo;
pub mod refunds_repo;
pub mod retry_jobs_repo;
pub mod transfers_repo;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>>;

    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> Result<Option<Order>>;

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Order>>;

    /// Move `status` to `to` if it is currently one of `from`. A given
    /// `payment_id` is stored with the move.
    async fn transition(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        payment_id: Option<&str>,
    ) -> Result<bool>;

    async fn transition_split(&self, order_id: Uuid, from: SplitStatus, to: SplitStatus) -> Result<bool>;

    /// Record a new cumulative refunded amount. Only applies to captured
    /// orders and never lowers the stored total.
    async fn apply_refund_total(
        &self,
        order_id: Uuid,
        refunded_amount: i64,
        status: OrderStatus,
        refund_status: OrderRefundStatus,
    ) -> Result<bool>;
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new transfer. Returns `false` when the order already has an
    /// active (pending, initiated or processed) transfer.
    async fn insert(&self, transfer: &Transfer) -> Result<bool>;

    async fn get(&self, transfer_id: Uuid) -> Result<Option<Transfer>>;

    async fn find_by_gateway_id(&self, gateway_transfer_id: &str) -> Result<Option<Transfer>>;

    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<Transfer>>;

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Transfer>>;

    async fn transition(
        &self,
        transfer_id: Uuid,
        from: &[TransferStatus],
        to: TransferStatus,
        patch: &TransferPatch,
    ) -> Result<bool>;
}

/// Outcome of checking a refund against its order's refundable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReservation {
    /// Inserted. `committed` is what pending and processed refunds already
    /// held before this one.
    Reserved { committed: i64 },
    Exceeds { available: i64 },
    /// Its gateway refund id is already recorded.
    Duplicate,
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Lock the order, check `refund.amount` against what its pending and
    /// processed refunds leave, and insert in the same step.
    async fn reserve(&self, refund: &Refund) -> Result<RefundReservation>;

    async fn set_reversed_transfer(&self, refund_id: Uuid) -> Result<()>;

    async fn get(&self, refund_id: Uuid) -> Result<Option<Refund>>;

    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>>;

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Refund>>;

    /// Sum of refunds in any of `statuses` for the order.
    async fn total_for_order(&self, order_id: Uuid, statuses: &[RefundStatus]) -> Result<i64>;

    async fn transition(
        &self,
        refund_id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
        gateway_refund_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically compute `balance_after` from the organizer's current
    /// balance and append the entry. Concurrent appends for one organizer
    /// are serialised; an entry already written for the same
    /// `(source, reference_id, entry_type)` is returned unchanged.
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome>;

    async fn latest(&self, organizer_id: &str) -> Result<Option<LedgerEntry>>;

    /// Most recent first.
    async fn history(&self, organizer_id: &str, limit: i64) -> Result<Vec<LedgerEntry>>;

    async fn find(
        &self,
        source: EntrySource,
        reference_id: &str,
        entry_type: EntryType,
    ) -> Result<Option<LedgerEntry>>;
}

#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    async fn exists(&self, event_id: &str, source: &str) -> Result<bool>;

    /// Returns `false` if the `(event_id, source)` pair was already recorded.
    async fn record(&self, event: &PaymentEvent) -> Result<bool>;
}

#[async_trait]
pub trait PayoutConfigStore: Send + Sync {
    async fn get(&self, organizer_id: &str) -> Result<Option<OrganizerPayoutConfig>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryJob {
    pub job_id: i64,
    pub event_id: String,
    pub source: String,
    pub event_type: String,
    pub envelope: serde_json::Value,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryJobStatus {
    Pending,
    Processing,
    Done,
    Dead,
}

impl RetryJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Dead => "DEAD",
        }
    }
}

#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Schedule a re-dispatch. One job per `(event_id, source)`; returns
    /// `false` if it already exists.
    async fn enqueue(
        &self,
        event_id: &str,
        source: &str,
        event_type: &str,
        envelope: serde_json::Value,
        last_error: &str,
    ) -> Result<bool>;

    /// Claim up to `limit` due jobs, moving them to `PROCESSING`.
    async fn lock_due(&self, limit: i64) -> Result<Vec<RetryJob>>;

    async fn mark_done(&self, job_id: i64) -> Result<()>;

    async fn mark_retry(
        &self,
        job_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    async fn mark_dead(&self, job_id: i64, attempts: i32, last_error: &str) -> Result<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, record: &AuditRecord) -> Result<()>;
}
