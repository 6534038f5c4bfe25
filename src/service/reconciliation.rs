use crate::domain::audit::AuditRecord;
use crate::error::Result;
use crate::repo::RetryQueue;
use crate::service::audit::AuditLogger;
use crate::service::webhook_gateway::WebhookGateway;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

pub const BATCH_SIZE: i64 = 50;

pub fn backoff_seconds(attempts: i32) -> i64 {
    i64::min(300, 2_i64.pow(attempts.clamp(0, 9) as u32))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub done: usize,
    pub rescheduled: usize,
    pub dead: usize,
}

#[derive(Clone)]
pub struct ReconciliationWorker {
    pub queue: Arc<dyn RetryQueue>,
    pub webhooks: WebhookGateway,
    pub audit: Arc<dyn AuditLogger>,
    pub max_attempts: i32,
    pub poll_interval: std::time::Duration,
}

impl ReconciliationWorker {
    pub async fn run(self) {
        loop {
            match self.tick().await {
                Ok(summary) if summary != TickSummary::default() => {
                    tracing::info!(
                        done = summary.done,
                        rescheduled = summary.rescheduled,
                        dead = summary.dead,
                        "reconciliation tick"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "reconciliation worker error"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn tick(&self) -> Result<TickSummary> {
        let mut summary = TickSummary::default();
        let batch = self.queue.lock_due(BATCH_SIZE).await?;

        for job in batch {
            match self.webhooks.redispatch(&job).await {
                Ok(outcome) => {
                    self.queue.mark_done(job.job_id).await?;
                    tracing::info!(job_id = job.job_id, event_id = %job.event_id, outcome = %outcome, "retry job done");
                    summary.done += 1;
                }
                Err(e) => {
                    let attempts = job.attempts + 1;
                    if !e.is_retryable() || attempts >= self.max_attempts {
                        self.queue.mark_dead(job.job_id, attempts, &e.to_string()).await?;
                        tracing::error!(job_id = job.job_id, event_id = %job.event_id, attempts, error = %e, "retry job dead");
                        self.audit
                            .log(
                                AuditRecord::failure("webhook.retry", "payment_event", &job.event_id).with_metadata(
                                    json!({ "attempts": attempts, "code": e.code(), "error": e.to_string() }),
                                ),
                            )
                            .await;
                        summary.dead += 1;
                    } else {
                        let next_attempt_at = Utc::now() + Duration::seconds(backoff_seconds(attempts));
                        self.queue
                            .mark_retry(job.job_id, attempts, next_attempt_at, &e.to_string())
                            .await?;
                        tracing::warn!(job_id = job.job_id, event_id = %job.event_id, attempts, error = %e, "retry job rescheduled");
                        summary.rescheduled += 1;
                    }
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_seconds(1), 2);
        assert_eq!(backoff_seconds(4), 16);
        assert_eq!(backoff_seconds(8), 256);
        assert_eq!(backoff_seconds(9), 300);
        assert_eq!(backoff_seconds(40), 300);
    }
}
