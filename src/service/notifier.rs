use crate::config::AppConfig;
use crate::domain::order::{Order, OrderPurpose};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub payment_id: Option<String>,
    pub order_id: Uuid,
    pub amount: i64,
    pub outcome: String,
    pub event_type: String,
    pub purpose: OrderPurpose,
    pub context_notes: serde_json::Value,
}

impl PaymentOutcome {
    pub fn for_order(order: &Order, outcome: &str, event_type: &str) -> Self {
        Self {
            payment_id: order.payment_id.clone(),
            order_id: order.order_id,
            amount: order.amount,
            outcome: outcome.to_string(),
            event_type: event_type.to_string(),
            purpose: order.purpose.clone(),
            context_notes: order.notes.clone(),
        }
    }
}

#[async_trait]
pub trait OutcomeNotifier: Send + Sync {
    async fn notify(&self, outcome: &PaymentOutcome) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisStreamNotifier {
    pub redis_client: redis::Client,
    pub stream_key: String,
}

#[async_trait]
impl OutcomeNotifier for RedisStreamNotifier {
    async fn notify(&self, outcome: &PaymentOutcome) -> Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(outcome)?;
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(1_000_000)
            .arg("*")
            .arg("event")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct HttpReconciler {
    pub url: String,
    pub client: reqwest::Client,
}

#[async_trait]
impl OutcomeNotifier for HttpReconciler {
    async fn notify(&self, outcome: &PaymentOutcome) -> Result<()> {
        self.client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Type", &outcome.event_type)
            .json(outcome)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct OutcomeRouter {
    pub stream: Option<Arc<dyn OutcomeNotifier>>,
    pub booking: Option<Arc<dyn OutcomeNotifier>>,
    pub subscription: Option<Arc<dyn OutcomeNotifier>>,
}

impl OutcomeRouter {
    pub fn from_config(cfg: &AppConfig, redis_client: redis::Client) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.gateway_timeout_ms))
            .build()
            .unwrap_or_default();
        let reconciler = |url: &Option<String>| {
            url.as_ref().map(|url| {
                Arc::new(HttpReconciler {
                    url: url.clone(),
                    client: client.clone(),
                }) as Arc<dyn OutcomeNotifier>
            })
        };

        Self {
            stream: Some(Arc::new(RedisStreamNotifier {
                redis_client,
                stream_key: cfg.notify_stream_key.clone(),
            })),
            booking: reconciler(&cfg.booking_reconciler_url),
            subscription: reconciler(&cfg.subscription_reconciler_url),
        }
    }

    pub async fn publish(&self, outcome: &PaymentOutcome) {
        let reconciler = match outcome.purpose {
            OrderPurpose::Booking { .. } => self.booking.as_ref(),
            OrderPurpose::Subscription { .. } => self.subscription.as_ref(),
            OrderPurpose::Direct => None,
        };

        for (target, notifier) in [("stream", self.stream.as_ref()), ("reconciler", reconciler)] {
            let Some(notifier) = notifier else { continue };
            if let Err(e) = notifier.notify(outcome).await {
                tracing::warn!(
                    target_kind = target,
                    order_id = %outcome.order_id,
                    outcome = %outcome.outcome,
                    error = %e,
                    "outcome notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl OutcomeNotifier for Recorder {
        async fn notify(&self, outcome: &PaymentOutcome) -> Result<()> {
            self.0.lock().unwrap().push(outcome.outcome.clone());
            Ok(())
        }
    }

    fn outcome(purpose: OrderPurpose) -> PaymentOutcome {
        PaymentOutcome {
            payment_id: Some("pay_1".to_string()),
            order_id: Uuid::new_v4(),
            amount: 1_000,
            outcome: "captured".to_string(),
            event_type: "payment.captured".to_string(),
            purpose,
            context_notes: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn routes_by_purpose() {
        let booking = Arc::new(Recorder::default());
        let subscription = Arc::new(Recorder::default());
        let router = OutcomeRouter {
            stream: None,
            booking: Some(booking.clone()),
            subscription: Some(subscription.clone()),
        };

        router
            .publish(&outcome(OrderPurpose::Subscription {
                subscription_id: "sub_1".to_string(),
            }))
            .await;
        router.publish(&outcome(OrderPurpose::Direct)).await;

        assert!(booking.0.lock().unwrap().is_empty());
        assert_eq!(subscription.0.lock().unwrap().len(), 1);
    }
}
