#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use marketplace_ledger::domain::audit::AuditRecord;
use marketplace_ledger::domain::order::{CreateOrderRequest, Order, OrderPurpose};
use marketplace_ledger::domain::payout_config::{OnboardingStatus, OrganizerPayoutConfig};
use marketplace_ledger::domain::transfer::Transfer;
use marketplace_ledger::error::Result;
use marketplace_ledger::gateways::mock::MockGateway;
use marketplace_ledger::gateways::RetryPolicy;
use marketplace_ledger::repo::memory::InMemoryStore;
use marketplace_ledger::repo::AuditStore;
use marketplace_ledger::service::audit::AuditLogger;
use marketplace_ledger::service::notifier::{OutcomeNotifier, OutcomeRouter, PaymentOutcome};
use marketplace_ledger::service::order_ledger::SplitSettings;
use marketplace_ledger::service::webhook_gateway::{sign, WebhookAck, WebhookSettings};
use marketplace_ledger::{Engine, EngineSettings, Stores};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "whsec_test_secret";
pub const ORGANIZER: &str = "org_hills";
pub const LINKED_ACCOUNT: &str = "acc_hills";

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: Arc<MockGateway>,
    pub booking: Arc<Outcomes>,
    pub engine: Engine,
}

/// Writes audit records in line so assertions can read them back at once.
pub struct InlineAudit(pub InMemoryStore);

#[async_trait]
impl AuditLogger for InlineAudit {
    async fn log(&self, record: AuditRecord) {
        self.0.insert(&record).await.unwrap();
    }
}

#[derive(Default)]
pub struct Outcomes(Mutex<Vec<PaymentOutcome>>);

impl Outcomes {
    pub fn received(&self) -> Vec<PaymentOutcome> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeNotifier for Outcomes {
    async fn notify(&self, outcome: &PaymentOutcome) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

pub fn settings(secret: Option<&str>) -> EngineSettings {
    EngineSettings {
        split: SplitSettings::from_percent(5, 180, "INR"),
        webhook: WebhookSettings::default(),
        webhook_secret: secret.map(|s| SecretString::from(s.to_string())),
        gateway_retry: RetryPolicy::new(2, 1),
        transfer_hold_days: None,
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings(Some(SECRET)))
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::with_stores(settings, |_| {})
    }

    /// Swap individual stores before the engine is wired.
    pub fn with_stores(settings: EngineSettings, customize: impl FnOnce(&mut Stores)) -> Self {
        let store = InMemoryStore::new();
        store
            .put_payout_config(OrganizerPayoutConfig {
                organizer_id: ORGANIZER.to_string(),
                onboarding_status: OnboardingStatus::Activated,
                commission_rate_bps: None,
                linked_account_id: Some(LINKED_ACCOUNT.to_string()),
            })
            .unwrap();

        let gateway = Arc::new(MockGateway::new());
        let booking = Arc::new(Outcomes::default());
        let mut stores = Stores::in_memory(&store);
        customize(&mut stores);
        let engine = Engine::build(
            &stores,
            settings,
            gateway.clone(),
            Arc::new(InlineAudit(store.clone())),
            OutcomeRouter {
                stream: None,
                booking: Some(booking.clone()),
                subscription: None,
            },
        );

        Self {
            store,
            gateway,
            booking,
            engine,
        }
    }

    pub async fn booking_order(&self, amount: i64) -> Order {
        self.engine
            .orders
            .create_order(CreateOrderRequest {
                buyer_id: "buyer_1".to_string(),
                organizer_id: ORGANIZER.to_string(),
                amount,
                currency: "INR".to_string(),
                trip_ref: Some("trip_kedarkantha".to_string()),
                purpose: OrderPurpose::Booking {
                    booking_id: "bk_1".to_string(),
                },
                notes: Value::Null,
            })
            .await
            .unwrap()
    }

    pub async fn deliver(&self, body: &Value) -> Result<WebhookAck> {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = sign(SECRET.as_bytes(), &raw).unwrap();
        self.engine.webhooks.handle(&raw, Some(&signature), None).await
    }

    /// Order created, captured, and its transfer confirmed by the gateway.
    pub async fn settled_order(&self, amount: i64) -> (Order, Transfer) {
        let order = self.booking_order(amount).await;
        self.deliver(&payment_captured("evt_cap", &order, "pay_1"))
            .await
            .unwrap();
        let transfer = self
            .engine
            .transfers
            .active_for_order(order.order_id)
            .await
            .unwrap()
            .unwrap();
        self.deliver(&transfer_processed("evt_trf", &transfer))
            .await
            .unwrap();
        let order = self.engine.orders.get(order.order_id).await.unwrap();
        let transfer = self.engine.transfers.get(transfer.transfer_id).await.unwrap();
        (order, transfer)
    }
}

pub fn envelope(event_id: &str, event: &str, kind: &str, entity: Value) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert(kind.to_string(), json!({ "entity": entity }));
    json!({
        "id": event_id,
        "event": event,
        "created_at": Utc::now().timestamp(),
        "payload": payload,
    })
}

pub fn payment_captured(event_id: &str, order: &Order, payment_id: &str) -> Value {
    envelope(
        event_id,
        "payment.captured",
        "payment",
        json!({
            "id": payment_id,
            "order_id": order.gateway_order_id,
            "amount": order.amount,
            "currency": order.currency,
            "status": "captured",
            "notes": { "order_ref": order.order_id.to_string() },
        }),
    )
}

pub fn payment_failed(event_id: &str, order: &Order, payment_id: &str) -> Value {
    envelope(
        event_id,
        "payment.failed",
        "payment",
        json!({
            "id": payment_id,
            "order_id": order.gateway_order_id,
            "amount": order.amount,
            "status": "failed",
        }),
    )
}

pub fn transfer_processed(event_id: &str, transfer: &Transfer) -> Value {
    envelope(
        event_id,
        "transfer.processed",
        "transfer",
        json!({
            "id": transfer.gateway_transfer_id,
            "amount": transfer.payout_amount,
            "notes": { "transfer_ref": transfer.transfer_id.to_string() },
        }),
    )
}

pub fn refund_processed(event_id: &str, gateway_refund_id: &str, order: &Order, amount: i64) -> Value {
    envelope(
        event_id,
        "refund.processed",
        "refund",
        json!({
            "id": gateway_refund_id,
            "payment_id": order.payment_id,
            "amount": amount,
            "notes": { "order_ref": order.order_id.to_string() },
        }),
    )
}
