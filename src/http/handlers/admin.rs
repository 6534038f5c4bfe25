use crate::domain::refund::InitiateRefundRequest;
use crate::error::LedgerError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

pub async fn initiate_refund(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<InitiateRefundRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let refund = state.refunds.initiate_refund(order_id, req).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// Manual retry of an order's payout after a failed or missing transfer.
pub async fn retry_transfer(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let order = state.orders.get(order_id).await?;
    let payment_id = order
        .payment_id
        .ok_or_else(|| LedgerError::validation(format!("order {order_id} has no captured payment")))?;
    let transfer = state.transfers.create_transfer(order_id, &payment_id).await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

#[derive(Debug, Deserialize)]
pub struct ReverseTransferRequest {
    pub amount: Option<i64>,
    pub actor_id: String,
}

pub async fn reverse_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<Uuid>,
    Json(req): Json<ReverseTransferRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let transfer = state
        .transfers
        .reverse(transfer_id, req.amount, Some(&req.actor_id))
        .await?;
    Ok(Json(transfer))
}
