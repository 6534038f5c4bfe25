use crate::domain::audit::AuditRecord;
use crate::error::Result;
use crate::repo::AuditStore;
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AuditRepo {
    pub pool: PgPool,
}

#[async_trait]
impl AuditStore for AuditRepo {
    async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, resource, resource_id, metadata, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.action)
        .bind(&record.resource)
        .bind(&record.resource_id)
        .bind(&record.metadata)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
