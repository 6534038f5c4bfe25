use crate::http::handlers::{admin, ledger, ops, orders, webhooks};
use crate::http::middleware::admin_auth::require_internal_api_key;
use crate::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

pub fn router(state: AppState, admin_key: String) -> Router {
    let admin_routes = Router::new()
        .route("/admin/orders/:order_id/refunds", post(admin::initiate_refund))
        .route("/admin/orders/:order_id/transfer", post(admin::retry_transfer))
        .route("/admin/transfers/:transfer_id/reverse", post(admin::reverse_transfer))
        .layer(from_fn_with_state(admin_key, require_internal_api_key));

    Router::new()
        .route("/webhooks/payments", post(webhooks::receive))
        .route("/orders", post(orders::create_order))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/organizers/:organizer_id/balance", get(ledger::balance))
        .route("/organizers/:organizer_id/ledger", get(ledger::history))
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .merge(admin_routes)
        .with_state(state)
}
