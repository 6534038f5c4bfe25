use crate::domain::order::{CreateOrderRequest, Order};
use crate::domain::refund::Refund;
use crate::domain::transfer::Transfer;
use crate::error::LedgerError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub transfers: Vec<Transfer>,
    pub refunds: Vec<Refund>,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let order = state.orders.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let order = state.orders.get(order_id).await?;
    let transfers = state.transfers.list_for_order(order_id).await?;
    let refunds = state.refunds.list_for_order(order_id).await?;
    Ok(Json(OrderView {
        order,
        transfers,
        refunds,
    }))
}
