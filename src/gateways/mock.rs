use crate::gateways::{
    CreateOrderRequest, CreateRefundRequest, CreateTransferRequest, GatewayError, GatewayOrder, GatewayPayment,
    GatewayRefund, GatewayReversal, GatewayTransfer, PayoutGateway, ReverseTransferRequest,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    AlwaysFailure,
    AlwaysTimeout,
    /// Time out this many times, then succeed.
    TimeoutTimes(u32),
    /// Accept the request but lose the response this many times.
    DropResponseTimes(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub reference: String,
    pub amount: i64,
    pub idempotency_key: Option<String>,
}

enum Verdict {
    Accept,
    AcceptAndDrop,
    Reject(GatewayError),
}

/// Deterministic stand-in for the real gateway. Ids are sequential per
/// instance, every call is logged, and a repeated idempotency key is
/// answered with the id minted for its first accepted call.
#[derive(Default)]
pub struct MockGateway {
    behaviors: Mutex<HashMap<&'static str, MockBehavior>>,
    latency: Mutex<HashMap<&'static str, Duration>>,
    accepted: Mutex<HashMap<(&'static str, String), String>>,
    calls: Mutex<Vec<MockCall>>,
    seq: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour for one operation (`create_order`, `create_transfer`, ...).
    pub fn set_behavior(&self, operation: &'static str, behavior: MockBehavior) {
        if let Ok(mut b) = self.behaviors.lock() {
            b.insert(operation, behavior);
        }
    }

    /// Delay every call to `operation` before it is answered.
    pub fn set_latency(&self, operation: &'static str, delay: Duration) {
        if let Ok(mut l) = self.latency.lock() {
            l.insert(operation, delay);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.operation == operation).count()
    }

    /// Distinct requests the gateway acted on for `operation`.
    pub fn effects_of(&self, operation: &str) -> usize {
        self.accepted
            .lock()
            .map(|a| a.keys().filter(|(op, _)| *op == operation).count())
            .unwrap_or_default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_mock_{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn pause(&self, operation: &'static str) {
        let delay = self.latency.lock().ok().and_then(|l| l.get(operation).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn verdict(&self, operation: &'static str) -> Result<Verdict, GatewayError> {
        let mut behaviors = self
            .behaviors
            .lock()
            .map_err(|_| GatewayError::Network("mock state poisoned".to_string()))?;
        let verdict = match behaviors.get(operation).copied().unwrap_or(MockBehavior::Succeed) {
            MockBehavior::Succeed => Verdict::Accept,
            MockBehavior::AlwaysFailure => Verdict::Reject(GatewayError::Http {
                status: 400,
                body: "mock decline".to_string(),
            }),
            MockBehavior::AlwaysTimeout => Verdict::Reject(GatewayError::Timeout),
            MockBehavior::TimeoutTimes(0) | MockBehavior::DropResponseTimes(0) => {
                behaviors.insert(operation, MockBehavior::Succeed);
                Verdict::Accept
            }
            MockBehavior::TimeoutTimes(n) => {
                behaviors.insert(operation, MockBehavior::TimeoutTimes(n - 1));
                Verdict::Reject(GatewayError::Timeout)
            }
            MockBehavior::DropResponseTimes(n) => {
                behaviors.insert(operation, MockBehavior::DropResponseTimes(n - 1));
                Verdict::AcceptAndDrop
            }
        };
        Ok(verdict)
    }

    /// Log the call, apply the configured behaviour and return the id the
    /// gateway answers with.
    async fn handle(
        &self,
        operation: &'static str,
        prefix: &str,
        reference: &str,
        amount: i64,
        idempotency_key: Option<&str>,
    ) -> Result<String, GatewayError> {
        self.pause(operation).await;
        if let Ok(mut c) = self.calls.lock() {
            c.push(MockCall {
                operation,
                reference: reference.to_string(),
                amount,
                idempotency_key: idempotency_key.map(str::to_string),
            });
        }

        let drop_response = match self.verdict(operation)? {
            Verdict::Reject(e) => return Err(e),
            Verdict::Accept => false,
            Verdict::AcceptAndDrop => true,
        };

        let id = match idempotency_key {
            Some(key) => {
                let mut accepted = self
                    .accepted
                    .lock()
                    .map_err(|_| GatewayError::Network("mock state poisoned".to_string()))?;
                accepted
                    .entry((operation, key.to_string()))
                    .or_insert_with(|| self.next_id(prefix))
                    .clone()
            }
            None => self.next_id(prefix),
        };

        if drop_response {
            return Err(GatewayError::Timeout);
        }
        Ok(id)
    }
}

#[async_trait::async_trait]
impl PayoutGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> Result<GatewayOrder, GatewayError> {
        let id = self
            .handle("create_order", "order", &request.receipt, request.amount, None)
            .await?;
        Ok(GatewayOrder {
            id,
            status: "created".to_string(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.handle("fetch_payment", "pay", payment_id, 0, None).await?;
        Ok(GatewayPayment {
            id: payment_id.to_string(),
            order_id: None,
            amount: 0,
            currency: "INR".to_string(),
            status: "captured".to_string(),
        })
    }

    async fn create_transfer(&self, request: &CreateTransferRequest) -> Result<GatewayTransfer, GatewayError> {
        let id = self
            .handle(
                "create_transfer",
                "trf",
                &request.payment_id,
                request.amount,
                Some(&request.idempotency_key),
            )
            .await?;
        Ok(GatewayTransfer {
            id,
            status: "created".to_string(),
        })
    }

    async fn reverse_transfer(&self, request: &ReverseTransferRequest) -> Result<GatewayReversal, GatewayError> {
        let id = self
            .handle(
                "reverse_transfer",
                "rvrsl",
                &request.gateway_transfer_id,
                request.amount,
                Some(&request.idempotency_key),
            )
            .await?;
        Ok(GatewayReversal {
            id,
            transfer_id: request.gateway_transfer_id.clone(),
            amount: request.amount,
        })
    }

    async fn create_refund(&self, request: &CreateRefundRequest) -> Result<GatewayRefund, GatewayError> {
        let id = self
            .handle(
                "create_refund",
                "rfnd",
                &request.payment_id,
                request.amount,
                Some(&request.idempotency_key),
            )
            .await?;
        Ok(GatewayRefund {
            id,
            status: "processed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reversal(key: &str) -> ReverseTransferRequest {
        ReverseTransferRequest {
            gateway_transfer_id: "trf_1".to_string(),
            amount: 10,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn timeout_times_recovers() {
        let gw = MockGateway::new();
        gw.set_behavior("reverse_transfer", MockBehavior::TimeoutTimes(1));

        assert_eq!(gw.reverse_transfer(&reversal("k1")).await, Err(GatewayError::Timeout));
        let ok = gw.reverse_transfer(&reversal("k1")).await.unwrap();
        assert_eq!(ok.transfer_id, "trf_1");
        assert_eq!(gw.calls_to("reverse_transfer"), 2);
        assert_eq!(gw.effects_of("reverse_transfer"), 1);
    }

    #[tokio::test]
    async fn lost_response_is_replayed_for_the_same_key() {
        let gw = MockGateway::new();
        gw.set_behavior("reverse_transfer", MockBehavior::DropResponseTimes(1));

        assert_eq!(gw.reverse_transfer(&reversal("k1")).await, Err(GatewayError::Timeout));
        let first = gw.reverse_transfer(&reversal("k1")).await.unwrap();
        let again = gw.reverse_transfer(&reversal("k1")).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(gw.effects_of("reverse_transfer"), 1);

        let other = gw.reverse_transfer(&reversal("k2")).await.unwrap();
        assert_ne!(other.id, first.id);
        assert_eq!(gw.effects_of("reverse_transfer"), 2);
    }
}
