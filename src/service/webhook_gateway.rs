use crate::domain::audit::AuditRecord;
use crate::domain::event::{EventKind, PaymentEvent, WebhookEnvelope};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::transfer::Transfer;
use crate::error::{LedgerError, Result};
use crate::repo::{PaymentEventStore, RetryJob, RetryQueue};
use crate::service::audit::AuditLogger;
use crate::service::notifier::{OutcomeRouter, PaymentOutcome};
use crate::service::order_ledger::OrderLedger;
use crate::service::refund_manager::{RefundManager, RefundNotice};
use crate::service::transfer_manager::TransferManager;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| LedgerError::Configuration {
        message: format!("unusable webhook secret: {e}"),
    })?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(secret: &[u8], body: &[u8], provided: &str) -> Result<()> {
    let expected = hex::decode(sign(secret, body)?).map_err(|_| LedgerError::SignatureInvalid)?;
    let provided = hex::decode(provided.trim()).map_err(|_| LedgerError::SignatureInvalid)?;
    if expected.ct_eq(&provided).unwrap_u8() != 1 {
        return Err(LedgerError::SignatureInvalid);
    }
    Ok(())
}

pub fn check_replay(created_at: i64, now: i64, max_age_secs: i64, max_skew_secs: i64) -> Result<()> {
    let age = now - created_at;
    if age > max_age_secs || -age > max_skew_secs {
        return Err(LedgerError::ReplaySuspected { age_seconds: age });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub source: String,
    pub replay_check: bool,
    pub max_age_secs: i64,
    pub max_skew_secs: i64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            source: "razorpay".to_string(),
            replay_check: true,
            max_age_secs: 300,
            max_skew_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookAck {
    fn ok(event_id: String, outcome: String) -> Self {
        Self {
            status: "ok",
            event_id: Some(event_id),
            already_processed: false,
            outcome: Some(outcome),
            message: None,
        }
    }

    fn duplicate(event_id: String) -> Self {
        Self {
            status: "ok",
            event_id: Some(event_id),
            already_processed: true,
            outcome: None,
            message: None,
        }
    }

    fn error(event_id: String, message: String) -> Self {
        Self {
            status: "error",
            event_id: Some(event_id),
            already_processed: false,
            outcome: None,
            message: Some(message),
        }
    }
}

struct Dispatched {
    outcome: String,
    notify: Option<PaymentOutcome>,
    // Follow-up work that failed after the event itself was applied.
    payout_error: Option<LedgerError>,
}

impl Dispatched {
    fn quiet(outcome: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            notify: None,
            payout_error: None,
        }
    }

    fn notifying(outcome: &str, notify: PaymentOutcome) -> Self {
        Self {
            outcome: outcome.to_string(),
            notify: Some(notify),
            payout_error: None,
        }
    }
}

#[derive(Clone)]
pub struct WebhookGateway {
    pub secret: Option<SecretString>,
    pub settings: WebhookSettings,
    pub events: Arc<dyn PaymentEventStore>,
    pub retry_queue: Arc<dyn RetryQueue>,
    pub orders: OrderLedger,
    pub transfers: TransferManager,
    pub refunds: RefundManager,
    pub notifier: OutcomeRouter,
    pub audit: Arc<dyn AuditLogger>,
}

impl WebhookGateway {
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
        header_event_id: Option<&str>,
    ) -> Result<WebhookAck> {
        let secret = self.secret.as_ref().ok_or_else(|| LedgerError::Configuration {
            message: "webhook secret is not configured".to_string(),
        })?;

        let Some(signature) = signature else {
            tracing::warn!("webhook rejected: missing signature header");
            return Err(LedgerError::SignatureInvalid);
        };
        if let Err(e) = verify_signature(secret.expose_secret().as_bytes(), body, signature) {
            tracing::warn!(body_len = body.len(), "webhook rejected: signature mismatch");
            return Err(e);
        }

        let raw: serde_json::Value = serde_json::from_slice(body)?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone())?;

        if self.settings.replay_check {
            if let Some(created_at) = envelope.created_at {
                if let Err(e) = check_replay(
                    created_at,
                    Utc::now().timestamp(),
                    self.settings.max_age_secs,
                    self.settings.max_skew_secs,
                ) {
                    tracing::warn!(event = %envelope.event, created_at, "webhook rejected: outside replay window");
                    return Err(e);
                }
            }
        }

        let Some(event_id) = envelope.event_id(header_event_id) else {
            tracing::warn!(event = %envelope.event, "webhook rejected: no event id");
            return Err(LedgerError::UnknownEventId);
        };

        let source = self.settings.source.as_str();
        match self.events.exists(&event_id, source).await {
            Ok(true) => {
                tracing::debug!(event_id = %event_id, "webhook already processed");
                return Ok(WebhookAck::duplicate(event_id));
            }
            Ok(false) => {}
            // Dispatch is idempotent; a failed lookup only risks a repeat.
            Err(e) => tracing::warn!(event_id = %event_id, error = %e, "dedupe lookup failed, dispatching anyway"),
        }

        let ack = match self.dispatch(&envelope).await {
            Ok(done) => {
                tracing::info!(event_id = %event_id, event = %envelope.event, outcome = %done.outcome, "webhook dispatched");
                self.record(&event_id, &envelope.event, &done.outcome, raw.clone()).await;
                if let Some(outcome) = &done.notify {
                    self.notifier.publish(outcome).await;
                }
                if let Some(e) = &done.payout_error {
                    self.on_dispatch_failure("webhook.payout", &event_id, &envelope.event, e, &raw)
                        .await;
                }
                WebhookAck::ok(event_id, done.outcome)
            }
            Err(e) => {
                self.on_dispatch_failure("webhook.dispatch", &event_id, &envelope.event, &e, &raw)
                    .await;
                self.record(&event_id, &envelope.event, &format!("error:{}", e.code()), raw)
                    .await;
                WebhookAck::error(event_id, e.to_string())
            }
        };
        Ok(ack)
    }

    pub async fn redispatch(&self, job: &RetryJob) -> Result<String> {
        let envelope: WebhookEnvelope = serde_json::from_value(job.envelope.clone())?;
        let done = self.dispatch(&envelope).await?;
        if let Some(e) = done.payout_error {
            return Err(e);
        }
        if let Some(outcome) = &done.notify {
            self.notifier.publish(outcome).await;
        }
        Ok(done.outcome)
    }

    async fn record(&self, event_id: &str, event_type: &str, outcome: &str, raw: serde_json::Value) {
        let recorded = self
            .events
            .record(&PaymentEvent {
                event_id: event_id.to_string(),
                source: self.settings.source.clone(),
                event_type: event_type.to_string(),
                outcome: outcome.to_string(),
                processed_at: Utc::now(),
                raw_payload: raw,
            })
            .await;
        match recorded {
            Ok(true) => {}
            Ok(false) => tracing::debug!(event_id, "event recorded by a concurrent delivery"),
            Err(e) => tracing::error!(event_id, outcome, error = %e, "could not record webhook event"),
        }
    }

    async fn on_dispatch_failure(
        &self,
        action: &str,
        event_id: &str,
        event_type: &str,
        err: &LedgerError,
        raw: &serde_json::Value,
    ) {
        tracing::error!(event_id, event = event_type, action, code = err.code(), error = %err, "webhook follow-up failed");

        let mut queued = false;
        if err.is_retryable() {
            match self
                .retry_queue
                .enqueue(event_id, &self.settings.source, event_type, raw.clone(), &err.to_string())
                .await
            {
                Ok(q) => queued = q,
                Err(qe) => tracing::error!(event_id, error = %qe, "could not enqueue webhook retry"),
            }
        }

        self.audit
            .log(
                AuditRecord::failure(action, "payment_event", event_id).with_metadata(json!({
                    "event": event_type,
                    "code": err.code(),
                    "error": err.to_string(),
                    "retry_enqueued": queued,
                })),
            )
            .await;
    }

    async fn dispatch(&self, env: &WebhookEnvelope) -> Result<Dispatched> {
        match EventKind::from_event(&env.event) {
            EventKind::PaymentCaptured | EventKind::OrderPaid => self.on_payment_captured(env).await,
            EventKind::PaymentFailed => self.on_payment_failed(env).await,
            EventKind::TransferProcessed => {
                let transfer = self.transfer_for(env).await?;
                self.transfers
                    .confirm_processed(transfer.transfer_id, env.entity_str("transfer", "id"))
                    .await?;
                Ok(Dispatched::quiet("transfer_processed"))
            }
            EventKind::TransferFailed => {
                let transfer = self.transfer_for(env).await?;
                let reason = env
                    .entity("transfer")
                    .and_then(|t| t.get("error"))
                    .and_then(|e| e.get("description"))
                    .and_then(|d| d.as_str())
                    .unwrap_or("reported failed by gateway");
                self.transfers.mark_failed(transfer.transfer_id, reason).await?;
                Ok(Dispatched::quiet("transfer_failed"))
            }
            EventKind::TransferReversed => {
                let transfer = self.transfer_for(env).await?;
                self.transfers
                    .confirm_reversed(transfer.transfer_id, env.entity_i64("transfer", "amount_reversed"))
                    .await?;
                Ok(Dispatched::quiet("transfer_reversed"))
            }
            EventKind::RefundProcessed => {
                let refund = self.refunds.confirm_processed(&refund_notice(env)?).await?;
                let order = self.orders.get(refund.order_id).await?;
                Ok(Dispatched::notifying(
                    "refund_processed",
                    PaymentOutcome::for_order(&order, "refunded", &env.event),
                ))
            }
            EventKind::RefundFailed => {
                self.refunds.mark_failed(&refund_notice(env)?).await?;
                Ok(Dispatched::quiet("refund_failed"))
            }
            EventKind::Unknown => {
                tracing::debug!(event = %env.event, "ignoring unhandled webhook type");
                Ok(Dispatched::quiet("ignored"))
            }
        }
    }

    async fn on_payment_captured(&self, env: &WebhookEnvelope) -> Result<Dispatched> {
        let payment_id = env
            .entity_str("payment", "id")
            .ok_or_else(|| LedgerError::validation("payment entity has no id"))?;
        let order = self
            .orders
            .find_for_payment(
                env.entity_str("payment", "order_id")
                    .or_else(|| env.entity_str("order", "id")),
                env.entity_note("payment", "order_ref"),
            )
            .await?;

        let first_capture = !order.status.is_captured();
        let order = self.orders.mark_paid(order.order_id, payment_id).await?;

        let mut done = if first_capture {
            Dispatched::notifying("captured", PaymentOutcome::for_order(&order, "captured", &env.event))
        } else {
            Dispatched::quiet("captured")
        };
        if let Err(e) = self.start_payout(&order, payment_id).await {
            done.payout_error = Some(e);
        }
        Ok(done)
    }

    async fn start_payout(&self, order: &Order, payment_id: &str) -> Result<()> {
        if !order.purpose.is_payout_eligible() || order.status != OrderStatus::Paid {
            return Ok(());
        }
        if self.transfers.active_for_order(order.order_id).await?.is_some() {
            return Ok(());
        }
        let transfer_payment = order.payment_id.as_deref().unwrap_or(payment_id);
        self.transfers.create_transfer(order.order_id, transfer_payment).await?;
        Ok(())
    }

    async fn on_payment_failed(&self, env: &WebhookEnvelope) -> Result<Dispatched> {
        let order = self
            .orders
            .find_for_payment(
                env.entity_str("payment", "order_id"),
                env.entity_note("payment", "order_ref"),
            )
            .await?;

        match self.orders.mark_failed(order.order_id).await {
            Ok(order) => Ok(Dispatched::notifying(
                "failed",
                PaymentOutcome::for_order(&order, "failed", &env.event),
            )),
            // A failed attempt reported after a successful capture.
            Err(LedgerError::InvalidTransition { from, .. }) => {
                tracing::info!(order_id = %order.order_id, status = %from, "ignoring payment.failed for captured order");
                Ok(Dispatched::quiet("ignored_stale"))
            }
            Err(e) => Err(e),
        }
    }

    async fn transfer_for(&self, env: &WebhookEnvelope) -> Result<Transfer> {
        self.transfers
            .find_for_webhook(
                env.entity_str("transfer", "id"),
                env.entity_note("transfer", "transfer_ref"),
            )
            .await
    }
}

fn refund_notice(env: &WebhookEnvelope) -> Result<RefundNotice> {
    let gateway_refund_id = env
        .entity_str("refund", "id")
        .ok_or_else(|| LedgerError::validation("refund entity has no id"))?;
    let amount = env
        .entity_i64("refund", "amount")
        .filter(|a| *a > 0)
        .ok_or_else(|| LedgerError::validation("refund entity has no positive amount"))?;
    Ok(RefundNotice {
        gateway_refund_id: gateway_refund_id.to_string(),
        payment_id: env.entity_str("refund", "payment_id").map(str::to_string),
        amount,
        refund_ref: env.entity_note("refund", "refund_ref").map(str::to_string),
        order_ref: env.entity_note("refund", "order_ref").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip_and_tamper() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign(b"whsec", body).unwrap();
        assert!(verify_signature(b"whsec", body, &sig).is_ok());

        let mut tampered = body.to_vec();
        tampered[3] ^= 0x01;
        assert_eq!(
            verify_signature(b"whsec", &tampered, &sig),
            Err(LedgerError::SignatureInvalid)
        );
        assert_eq!(
            verify_signature(b"whsec", body, "not-hex"),
            Err(LedgerError::SignatureInvalid)
        );
    }

    #[test]
    fn replay_window_bounds() {
        let now = 1_700_000_000;
        assert!(check_replay(now - 300, now, 300, 60).is_ok());
        assert!(check_replay(now + 60, now, 300, 60).is_ok());
        assert_eq!(
            check_replay(now - 301, now, 300, 60),
            Err(LedgerError::ReplaySuspected { age_seconds: 301 })
        );
        assert!(check_replay(now + 61, now, 300, 60).is_err());
    }
}
