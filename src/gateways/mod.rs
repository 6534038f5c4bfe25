use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub mod mock;
pub mod razorpay;

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTransferRequest {
    pub payment_id: String,
    pub linked_account_id: String,
    pub amount: i64,
    pub currency: String,
    /// Unix seconds; the gateway keeps the funds on hold until then.
    pub on_hold_until: Option<i64>,
    pub notes: serde_json::Value,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTransfer {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReverseTransferRequest {
    pub gateway_transfer_id: String,
    pub amount: i64,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReversal {
    pub id: String,
    pub transfer_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRefundRequest {
    pub payment_id: String,
    pub amount: i64,
    pub notes: serde_json::Value,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway answered HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }

    /// Attach the operation name. Transient failures become
    /// `GatewayUnavailable`, definite answers `GatewayRejected`.
    pub fn into_ledger_error(self, operation: &str) -> LedgerError {
        if self.is_retryable() {
            return LedgerError::GatewayUnavailable {
                operation: operation.to_string(),
                message: self.to_string(),
            };
        }
        let http_status = match &self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        };
        LedgerError::GatewayRejected {
            operation: operation.to_string(),
            message: self.to_string(),
            http_status,
        }
    }
}

/// Outbound payment-gateway operations. Every call returns the
/// gateway-assigned id the caller persists as a correlation key.
/// Money-moving calls carry an idempotency key so a retry after a lost
/// response is answered with the original result.
#[async_trait::async_trait]
pub trait PayoutGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_order(&self, request: &CreateOrderRequest) -> Result<GatewayOrder, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError>;

    async fn create_transfer(&self, request: &CreateTransferRequest) -> Result<GatewayTransfer, GatewayError>;

    async fn reverse_transfer(&self, request: &ReverseTransferRequest) -> Result<GatewayReversal, GatewayError>;

    async fn create_refund(&self, request: &CreateRefundRequest) -> Result<GatewayRefund, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(base_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2_u32.pow(attempt.saturating_sub(1).min(6))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 200)
    }
}

/// Run a gateway call with bounded retries. Only transient failures are
/// retried; the last error is mapped into the ledger taxonomy.
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(operation, attempt, error = %e, "gateway call failed, retrying");
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(e) => {
                tracing::error!(operation, attempt, error = %e, "gateway call failed");
                return Err(e.into_ledger_error(operation));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classifies_http_statuses() {
        let busy = GatewayError::Http { status: 429, body: String::new() };
        let down = GatewayError::Http { status: 503, body: String::new() };
        let bad = GatewayError::Http { status: 400, body: "bad".into() };
        assert!(busy.is_retryable());
        assert!(down.is_retryable());
        assert!(!bad.is_retryable());
        assert!(matches!(
            bad.into_ledger_error("create_refund"),
            LedgerError::GatewayRejected { http_status: Some(400), .. }
        ));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let out = call_with_retry(RetryPolicy::new(3, 1), "create_transfer", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GatewayError::Timeout)
            } else {
                Ok("trf_1")
            }
        })
        .await;
        assert_eq!(out.unwrap(), "trf_1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = call_with_retry(RetryPolicy::new(2, 1), "create_transfer", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Network("reset".into()))
        })
        .await;
        assert!(matches!(out, Err(LedgerError::GatewayUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = call_with_retry(RetryPolicy::new(5, 1), "create_refund", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Http { status: 400, body: "bad".into() })
        })
        .await;
        assert!(matches!(out, Err(LedgerError::GatewayRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
