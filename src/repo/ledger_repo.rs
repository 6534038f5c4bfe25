use crate::domain::ledger::{AppendOutcome, EntrySource, EntryType, LedgerEntry, NewLedgerEntry};
use crate::error::Result;
use crate::repo::orders_repo::corrupt;
use crate::repo::LedgerStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ENTRY_COLUMNS: &str =
    "entry_id, organizer_id, entry_type, source, reference_id, amount, currency, balance_after, created_at";

#[derive(Clone)]
pub struct LedgerRepo {
    pub pool: PgPool,
}

#[async_trait]
impl LedgerStore for LedgerRepo {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        if let Some(existing) = self
            .find(entry.source, &entry.reference_id, entry.entry_type)
            .await?
        {
            return Ok(AppendOutcome::Existing(existing));
        }

        let mut tx = self.pool.begin().await?;

        // The upsert takes the row lock on the organizer's balance, so writers
        // for one organizer queue here until the holder commits.
        let balance_after: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO organizer_balances (organizer_id, balance, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (organizer_id) DO UPDATE
                SET balance = organizer_balances.balance + EXCLUDED.balance, updated_at = now()
            RETURNING balance
            "#,
        )
        .bind(&entry.organizer_id)
        .bind(entry.entry_type.delta(entry.amount))
        .fetch_one(tx.as_mut())
        .await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO ledger_entries (
                entry_id, organizer_id, entry_type, source, reference_id, amount, currency, balance_after
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source, reference_id, entry_type) DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&entry.organizer_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.source.as_str())
        .bind(&entry.reference_id)
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(balance_after)
        .fetch_optional(tx.as_mut())
        .await?;

        match inserted {
            Some(row) => {
                let appended = map_entry(&row)?;
                tx.commit().await?;
                Ok(AppendOutcome::Appended(appended))
            }
            None => {
                // A concurrent writer recorded the same completion first.
                tx.rollback().await?;
                let existing = self
                    .find(entry.source, &entry.reference_id, entry.entry_type)
                    .await?
                    .ok_or_else(|| crate::error::LedgerError::PersistenceConflict {
                        entity: "ledger_entry".to_string(),
                        id: entry.reference_id.clone(),
                    })?;
                Ok(AppendOutcome::Existing(existing))
            }
        }
    }

    async fn latest(&self, organizer_id: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE organizer_id = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(organizer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_entry(&r)).transpose()
    }

    async fn history(&self, organizer_id: &str, limit: i64) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE organizer_id = $1 ORDER BY seq DESC LIMIT $2"
        ))
        .bind(organizer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_entry).collect()
    }

    async fn find(
        &self,
        source: EntrySource,
        reference_id: &str,
        entry_type: EntryType,
    ) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE source = $1 AND reference_id = $2 AND entry_type = $3"
        ))
        .bind(source.as_str())
        .bind(reference_id)
        .bind(entry_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_entry(&r)).transpose()
    }
}

fn map_entry(r: &PgRow) -> Result<LedgerEntry> {
    let entry_type: String = r.try_get("entry_type")?;
    let source: String = r.try_get("source")?;
    Ok(LedgerEntry {
        entry_id: r.try_get("entry_id")?,
        organizer_id: r.try_get("organizer_id")?,
        entry_type: EntryType::parse(&entry_type).ok_or_else(|| corrupt("entry type", &entry_type))?,
        source: EntrySource::parse(&source).ok_or_else(|| corrupt("entry source", &source))?,
        reference_id: r.try_get("reference_id")?,
        amount: r.try_get("amount")?,
        currency: r.try_get("currency")?,
        balance_after: r.try_get("balance_after")?,
        created_at: r.try_get("created_at")?,
    })
}
