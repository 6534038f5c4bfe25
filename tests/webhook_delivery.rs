mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use marketplace_ledger::domain::event::PaymentEvent;
use marketplace_ledger::domain::ledger::EntryType;
use marketplace_ledger::domain::order::OrderStatus;
use marketplace_ledger::domain::transfer::TransferStatus;
use marketplace_ledger::error::{LedgerError, Result};
use marketplace_ledger::gateways::mock::MockBehavior;
use marketplace_ledger::repo::PaymentEventStore;
use marketplace_ledger::service::webhook_gateway::sign;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct UnreachableEvents;

#[async_trait]
impl PaymentEventStore for UnreachableEvents {
    async fn exists(&self, _event_id: &str, _source: &str) -> Result<bool> {
        Err(LedgerError::Persistence {
            message: "connection refused".to_string(),
        })
    }

    async fn record(&self, _event: &PaymentEvent) -> Result<bool> {
        Err(LedgerError::Persistence {
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn duplicate_delivery_has_no_second_effect() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;
    let captured = payment_captured("evt_dup", &order, "pay_1");

    let first = h.deliver(&captured).await.unwrap();
    assert!(!first.already_processed);

    let second = h.deliver(&captured).await.unwrap();
    assert_eq!(second.status, "ok");
    assert!(second.already_processed);

    assert_eq!(h.gateway.calls_to("create_transfer"), 1);
    assert_eq!(
        h.engine.transfers.list_for_order(order.order_id).await.unwrap().len(),
        1
    );
    assert_eq!(h.store.payment_events().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_transfer_confirmation_credits_once() {
    let h = Harness::new();
    let (_, transfer) = h.settled_order(50_000).await;

    // Same gateway notification redelivered under a fresh event id.
    h.deliver(&transfer_processed("evt_trf_again", &transfer)).await.unwrap();

    let credits = h.store.ledger_entries().unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(h.engine.ledger.balance_of(ORGANIZER).await.unwrap(), 46_600);
}

#[tokio::test]
async fn tampered_body_is_rejected_without_side_effects() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;

    let raw = serde_json::to_vec(&payment_captured("evt_t", &order, "pay_1")).unwrap();
    let signature = sign(SECRET.as_bytes(), &raw).unwrap();
    let mut tampered = raw.clone();
    let last = tampered.len() - 2;
    tampered[last] = b' ';

    let err = h
        .engine
        .webhooks
        .handle(&tampered, Some(&signature), None)
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::SignatureInvalid);

    let err = h.engine.webhooks.handle(&raw, None, None).await.unwrap_err();
    assert_eq!(err, LedgerError::SignatureInvalid);

    assert!(h.store.payment_events().unwrap().is_empty());
    assert_eq!(
        h.engine.orders.get(order.order_id).await.unwrap().status,
        OrderStatus::Created
    );
    assert_eq!(h.gateway.calls_to("create_transfer"), 0);
}

#[tokio::test]
async fn missing_secret_is_a_configuration_error() {
    let h = Harness::with_settings(settings(None));
    let raw = br#"{"id":"evt_1","event":"payment.captured","payload":{}}"#;

    let err = h
        .engine
        .webhooks
        .handle(raw, Some("deadbeef"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Configuration { .. }));
    assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn stale_event_is_rejected_as_replay() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;

    let mut body = payment_captured("evt_old", &order, "pay_1");
    body["created_at"] = json!(Utc::now().timestamp() - 3_600);

    let err = h.deliver(&body).await.unwrap_err();
    assert!(matches!(err, LedgerError::ReplaySuspected { .. }));
    assert!(h.store.payment_events().unwrap().is_empty());
}

#[tokio::test]
async fn event_id_falls_back_to_entity_id() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;

    let mut body = payment_captured("ignored", &order, "pay_77");
    body.as_object_mut().unwrap().remove("id");

    let ack = h.deliver(&body).await.unwrap();
    assert_eq!(ack.event_id.as_deref(), Some("payment.captured:pay_77"));

    let again = h.deliver(&body).await.unwrap();
    assert!(again.already_processed);
}

#[tokio::test]
async fn event_without_any_id_is_rejected() {
    let h = Harness::new();
    let body = json!({
        "event": "payment.captured",
        "created_at": Utc::now().timestamp(),
        "payload": { "payment": { "entity": { "amount": 100 } } },
    });

    let err = h.deliver(&body).await.unwrap_err();
    assert_eq!(err, LedgerError::UnknownEventId);
    assert!(h.store.payment_events().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_event_types_are_recorded_and_ignored() {
    let h = Harness::new();
    let body = envelope("evt_x", "payment.dispute.created", "dispute", json!({ "id": "disp_1" }));

    let ack = h.deliver(&body).await.unwrap();
    assert_eq!(ack.outcome.as_deref(), Some("ignored"));

    let events = h.store.payment_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, "ignored");
}

#[tokio::test]
async fn dispatch_failure_is_acknowledged_and_recorded() {
    let h = Harness::new();
    let body = envelope(
        "evt_orphan",
        "transfer.processed",
        "transfer",
        json!({ "id": "trf_nobody_knows" }),
    );

    let ack = h.deliver(&body).await.unwrap();
    assert_eq!(ack.status, "error");
    assert!(ack.message.is_some());

    let events = h.store.payment_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, "error:NOT_FOUND");

    assert!(h
        .store
        .audit_records()
        .unwrap()
        .iter()
        .any(|r| r.action == "webhook.dispatch"));
}

#[tokio::test]
async fn capture_is_published_when_payout_creation_fails() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;
    h.gateway.set_behavior("create_transfer", MockBehavior::AlwaysFailure);

    let ack = h
        .deliver(&payment_captured("evt_cap", &order, "pay_1"))
        .await
        .unwrap();
    assert_eq!(ack.status, "ok");
    assert_eq!(ack.outcome.as_deref(), Some("captured"));

    assert_eq!(
        h.engine.orders.get(order.order_id).await.unwrap().status,
        OrderStatus::Paid
    );
    let published = h.booking.received();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].outcome, "captured");
    assert_eq!(published[0].order_id, order.order_id);

    // A declined payout is audited but never retried on its own.
    assert!(h.store.retry_jobs().unwrap().is_empty());
    assert!(h
        .store
        .audit_records()
        .unwrap()
        .iter()
        .any(|r| r.action == "webhook.payout"));
    assert_eq!(h.store.payment_events().unwrap()[0].outcome, "captured");
}

#[tokio::test]
async fn processed_notice_for_pending_transfer_resolves_by_reference() {
    let h = Harness::new();
    let order = h.booking_order(50_000).await;
    h.gateway.set_latency("create_transfer", Duration::from_millis(50));

    let early_confirmation = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = h
            .engine
            .transfers
            .active_for_order(order.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.status, TransferStatus::Pending);
        assert!(pending.gateway_transfer_id.is_none());

        let body = envelope(
            "evt_trf",
            "transfer.processed",
            "transfer",
            json!({
                "id": "trf_mock_2",
                "amount": pending.payout_amount,
                "notes": { "transfer_ref": pending.transfer_id.to_string() },
            }),
        );
        h.deliver(&body).await.unwrap()
    };
    let captured_body = payment_captured("evt_cap", &order, "pay_1");
    let (captured, confirmed) = tokio::join!(
        h.deliver(&captured_body),
        early_confirmation,
    );
    assert_eq!(captured.unwrap().outcome.as_deref(), Some("captured"));
    assert_eq!(confirmed.outcome.as_deref(), Some("transfer_processed"));

    let transfer = h
        .engine
        .transfers
        .active_for_order(order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Processed);
    assert_eq!(transfer.gateway_transfer_id.as_deref(), Some("trf_mock_2"));

    let credits: Vec<i64> = h
        .store
        .ledger_entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Credit)
        .map(|e| e.amount)
        .collect();
    assert_eq!(credits, vec![46_600]);
}

#[tokio::test]
async fn unreachable_event_store_still_acknowledges() {
    let h = Harness::with_stores(settings(Some(SECRET)), |stores| {
        stores.events = Arc::new(UnreachableEvents);
    });
    let order = h.booking_order(50_000).await;

    let ack = h
        .deliver(&payment_captured("evt_cap", &order, "pay_1"))
        .await
        .unwrap();
    assert_eq!(ack.status, "ok");
    assert_eq!(ack.outcome.as_deref(), Some("captured"));
    assert_eq!(
        h.engine.orders.get(order.order_id).await.unwrap().status,
        OrderStatus::Paid
    );
}
