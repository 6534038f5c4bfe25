use crate::domain::audit::{AuditRecord, AuditStatus};
use crate::repo::AuditStore;
use async_trait::async_trait;
use std::sync::Arc;

// An audit write never fails the operation being audited.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, record: AuditRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, record: AuditRecord) {
        trace_record(&record);
    }
}

#[derive(Clone)]
pub struct StoreAuditLogger {
    pub store: Arc<dyn AuditStore>,
}

impl StoreAuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditLogger for StoreAuditLogger {
    async fn log(&self, record: AuditRecord) {
        trace_record(&record);
        // The insert runs detached from the caller.
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert(&record).await {
                tracing::warn!(action = %record.action, resource_id = %record.resource_id, error = %e, "audit write failed");
            }
        });
    }
}

fn trace_record(record: &AuditRecord) {
    match record.status {
        AuditStatus::Success => tracing::info!(
            target: "audit",
            action = %record.action,
            resource = %record.resource,
            resource_id = %record.resource_id,
            user_id = record.user_id.as_deref().unwrap_or("system"),
            metadata = %record.metadata,
            "audit"
        ),
        AuditStatus::Failure => tracing::warn!(
            target: "audit",
            action = %record.action,
            resource = %record.resource,
            resource_id = %record.resource_id,
            user_id = record.user_id.as_deref().unwrap_or("system"),
            metadata = %record.metadata,
            "audit failure"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::InMemoryStore;

    #[tokio::test]
    async fn store_logger_persists_records() {
        let store = InMemoryStore::new();
        let logger = StoreAuditLogger::new(Arc::new(store.clone()));

        logger
            .log(AuditRecord::failure("transfer.create", "transfer", "t1").by("admin_1"))
            .await;

        let mut records = store.audit_records().unwrap();
        for _ in 0..50 {
            if !records.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
            records = store.audit_records().unwrap();
        }
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Failure);
        assert_eq!(records[0].user_id.as_deref(), Some("admin_1"));
    }
}
