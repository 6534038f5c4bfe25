use crate::domain::ledger::{AppendOutcome, EntrySource, EntryType, LedgerEntry, NewLedgerEntry};
use crate::error::{LedgerError, Result};
use crate::repo::LedgerStore;
use std::sync::Arc;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct PayoutLedger {
    pub store: Arc<dyn LedgerStore>,
}

impl PayoutLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn append(
        &self,
        organizer_id: &str,
        entry_type: EntryType,
        source: EntrySource,
        reference_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<AppendOutcome> {
        if amount < 0 {
            return Err(LedgerError::validation(format!(
                "ledger amount must be non-negative, got {amount}"
            )));
        }

        let outcome = self
            .store
            .append(&NewLedgerEntry {
                organizer_id: organizer_id.to_string(),
                entry_type,
                source,
                reference_id: reference_id.to_string(),
                amount,
                currency: currency.to_string(),
            })
            .await?;

        let entry = outcome.entry();
        if outcome.is_new() {
            tracing::info!(
                organizer_id,
                entry_type = entry_type.as_str(),
                source = source.as_str(),
                reference_id,
                amount,
                balance_after = entry.balance_after,
                "ledger entry appended"
            );
        } else {
            tracing::debug!(organizer_id, reference_id, "ledger entry already present");
        }
        Ok(outcome)
    }

    pub async fn balance_of(&self, organizer_id: &str) -> Result<i64> {
        Ok(self
            .store
            .latest(organizer_id)
            .await?
            .map(|e| e.balance_after)
            .unwrap_or(0))
    }

    pub async fn debited(&self, references: &[(EntrySource, String)]) -> Result<i64> {
        let mut total = 0;
        for (source, reference_id) in references {
            if let Some(entry) = self.store.find(*source, reference_id, EntryType::Debit).await? {
                total += entry.amount;
            }
        }
        Ok(total)
    }

    pub async fn history(&self, organizer_id: &str, limit: Option<i64>) -> Result<Vec<LedgerEntry>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        self.store.history(organizer_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::InMemoryStore;

    #[tokio::test]
    async fn balance_follows_credits_and_debits() {
        let ledger = PayoutLedger::new(Arc::new(InMemoryStore::new()));
        assert_eq!(ledger.balance_of("org1").await.unwrap(), 0);

        ledger
            .append("org1", EntryType::Credit, EntrySource::Transfer, "t1", 46_600, "INR")
            .await
            .unwrap();
        ledger
            .append("org1", EntryType::Debit, EntrySource::Refund, "r1", 20_000, "INR")
            .await
            .unwrap();

        assert_eq!(ledger.balance_of("org1").await.unwrap(), 26_600);
        let history = ledger.history("org1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, EntrySource::Refund);
        assert_eq!(history[1].balance_after, 46_600);
    }

    #[tokio::test]
    async fn rejects_negative_amounts() {
        let ledger = PayoutLedger::new(Arc::new(InMemoryStore::new()));
        let err = ledger
            .append("org1", EntryType::Credit, EntrySource::Adjustment, "a1", -5, "INR")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }
}
