mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use marketplace_ledger::http::routes::router;
use marketplace_ledger::service::webhook_gateway::sign;
use marketplace_ledger::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_KEY: &str = "test-admin-key";

fn app(h: &Harness) -> Router {
    router(AppState::new(&h.engine), ADMIN_KEY.to_string())
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn webhook_request(raw: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        req = req.header("x-razorpay-signature", sig);
    }
    req.body(Body::from(raw)).unwrap()
}

#[tokio::test]
async fn webhook_with_bad_signature_is_400() {
    let h = Harness::new();
    let order = h.booking_order(1_000).await;
    let raw = serde_json::to_vec(&payment_captured("evt_1", &order, "pay_1")).unwrap();

    let resp = app(&h)
        .oneshot(webhook_request(raw, Some("00ff".to_string())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "SIGNATURE_INVALID");
}

#[tokio::test]
async fn webhook_without_secret_is_500() {
    let h = Harness::with_settings(settings(None));
    let raw = br#"{"id":"evt_1","event":"payment.captured","payload":{}}"#.to_vec();

    let resp = app(&h)
        .oneshot(webhook_request(raw, Some("00ff".to_string())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn webhook_acknowledges_handled_and_failed_dispatch_with_200() {
    let h = Harness::new();
    let order = h.booking_order(1_000).await;

    let raw = serde_json::to_vec(&payment_captured("evt_ok", &order, "pay_1")).unwrap();
    let sig = sign(SECRET.as_bytes(), &raw).unwrap();
    let resp = app(&h).oneshot(webhook_request(raw, Some(sig))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");

    let orphan = envelope("evt_bad", "transfer.failed", "transfer", json!({ "id": "trf_none" }));
    let raw = serde_json::to_vec(&orphan).unwrap();
    let sig = sign(SECRET.as_bytes(), &raw).unwrap();
    let resp = app(&h).oneshot(webhook_request(raw, Some(sig))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn create_and_read_order() {
    let h = Harness::new();

    let req = Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "buyer_id": "buyer_9",
                "organizer_id": ORGANIZER,
                "amount": 50_000,
                "currency": "INR",
                "trip_ref": "trip_1",
                "purpose": { "kind": "booking", "booking_id": "bk_9" },
            })
            .to_string(),
        ))
        .unwrap();
    let resp = app(&h).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["organizer_payout_amount"], 46_600);
    assert_eq!(created["status"], "created");

    let uri = format!("/orders/{}", created["order_id"].as_str().unwrap());
    let resp = app(&h)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let view = body_json(resp).await;
    assert_eq!(view["order"]["order_id"], created["order_id"]);
    assert_eq!(view["transfers"], json!([]));
    assert_eq!(view["refunds"], json!([]));
}

#[tokio::test]
async fn unknown_order_is_404() {
    let h = Harness::new();
    let uri = format!("/orders/{}", uuid::Uuid::new_v4());
    let resp = app(&h)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn balance_and_history() {
    let h = Harness::new();
    h.settled_order(50_000).await;

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .uri(format!("/organizers/{ORGANIZER}/balance"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["balance"], 46_600);

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .uri(format!("/organizers/{ORGANIZER}/ledger?limit=10"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    assert_eq!(body["entries"][0]["entry_type"], "credit");
}

#[tokio::test]
async fn admin_routes_require_api_key() {
    let h = Harness::new();
    let (order, _) = h.settled_order(50_000).await;
    let refund_body = json!({ "amount": 1_000, "actor_id": "ops_1" }).to_string();
    let uri = format!("/admin/orders/{}/refunds", order.order_id);

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .header("content-type", "application/json")
                .body(Body::from(refund_body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"]["code"], "UNAUTHORIZED");

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .header("content-type", "application/json")
                .header("X-Internal-Api-Key", ADMIN_KEY)
                .body(Body::from(refund_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(body_json(resp).await["status"], "processed");
}

#[tokio::test]
async fn admin_refund_over_available_is_422() {
    let h = Harness::new();
    let (order, _) = h.settled_order(5_000).await;

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/orders/{}/refunds", order.order_id))
                .header("content-type", "application/json")
                .header("X-Internal-Api-Key", ADMIN_KEY)
                .body(Body::from(json!({ "amount": 9_000, "actor_id": "ops_1" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["error"]["code"], "REFUND_EXCEEDS_AVAILABLE");
}

#[tokio::test]
async fn admin_reverse_transfer() {
    let h = Harness::new();
    let (_, transfer) = h.settled_order(50_000).await;

    let resp = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/admin/transfers/{}/reverse", transfer.transfer_id))
                .header("content-type", "application/json")
                .header("X-Internal-Api-Key", ADMIN_KEY)
                .body(Body::from(json!({ "amount": 10_000, "actor_id": "ops_1" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "reversed");
    assert_eq!(body["reversed_amount"], 10_000);
}

#[tokio::test]
async fn liveness_and_readiness_without_backends() {
    let h = Harness::new();

    let resp = app(&h)
        .oneshot(Request::builder().uri("/ops/liveness").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app(&h)
        .oneshot(Request::builder().uri("/ops/readiness").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["webhook_secret"], true);
}
