use crate::error::LedgerError;
use crate::service::webhook_gateway::{EVENT_ID_HEADER, SIGNATURE_HEADER};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

/// `POST /webhooks/payments`. The body is taken as raw bytes so the
/// signature is checked over exactly what the gateway sent.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, LedgerError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    let event_id = headers.get(EVENT_ID_HEADER).and_then(|h| h.to_str().ok());

    let ack = state.webhooks.handle(&body, signature, event_id).await?;
    Ok((StatusCode::OK, Json(ack)))
}
