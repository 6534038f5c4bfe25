use crate::error::LedgerError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn balance(
    State(state): State<AppState>,
    Path(organizer_id): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let balance = state.ledger.balance_of(&organizer_id).await?;
    Ok(Json(json!({
        "organizer_id": organizer_id,
        "balance": balance,
    })))
}

pub async fn history(
    State(state): State<AppState>,
    Path(organizer_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, LedgerError> {
    let entries = state.ledger.history(&organizer_id, q.limit).await?;
    Ok(Json(json!({
        "organizer_id": organizer_id,
        "entries": entries,
    })))
}
