use crate::error::ErrorEnvelope;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "X-Internal-Api-Key";

/// Guards the operator routes (manual refunds, transfer retry, reversal).
pub async fn require_internal_api_key(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    let authorized = !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if !authorized {
        tracing::warn!(path = %request.uri().path(), "admin request rejected");
        return (StatusCode::UNAUTHORIZED, Json(ErrorEnvelope::unauthorized())).into_response();
    }

    next.run(request).await
}
