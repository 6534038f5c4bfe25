//! Error taxonomy for the reconciliation engine.
//!
//! Every fallible operation in the crate returns [`LedgerError`]. Variants
//! classify themselves so the HTTP layer and the webhook gateway can decide
//! between rejecting, acknowledging, and scheduling a retry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("webhook signature is invalid")]
    SignatureInvalid,

    #[error("webhook timestamp outside replay window ({age_seconds}s old)")]
    ReplaySuspected { age_seconds: i64 },

    #[error("webhook carries no usable event id")]
    UnknownEventId,

    #[error("organizer '{organizer_id}' has no usable payout account: {reason}")]
    AccountNotOnboarded { organizer_id: String, reason: String },

    #[error("split leaves no payout for gross {gross} (commission {commission}, fee {fee})")]
    InsufficientPayoutAmount { gross: i64, commission: i64, fee: i64 },

    #[error("refund of {requested} exceeds refundable balance {available} on order {order_id}")]
    RefundExceedsAvailable {
        order_id: String,
        requested: i64,
        available: i64,
    },

    #[error("order {order_id} already has an active transfer {transfer_id}")]
    DuplicateTransfer { order_id: String, transfer_id: String },

    #[error("payment gateway unavailable during '{operation}': {message}")]
    GatewayUnavailable { operation: String, message: String },

    #[error("payment gateway rejected '{operation}': {message}")]
    GatewayRejected {
        operation: String,
        message: String,
        http_status: Option<u16>,
    },

    #[error("concurrent update on {entity} {id}, retry the operation")]
    PersistenceConflict { entity: String, id: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    #[error("invalid request: {message}")]
    Validation { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl LedgerError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_transition(entity: &str, id: impl ToString, from: &str, to: &str) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::ReplaySuspected { .. } => "REPLAY_SUSPECTED",
            Self::UnknownEventId => "UNKNOWN_EVENT_ID",
            Self::AccountNotOnboarded { .. } => "ACCOUNT_NOT_ONBOARDED",
            Self::InsufficientPayoutAmount { .. } => "INSUFFICIENT_PAYOUT_AMOUNT",
            Self::RefundExceedsAvailable { .. } => "REFUND_EXCEEDS_AVAILABLE",
            Self::DuplicateTransfer { .. } => "DUPLICATE_TRANSFER",
            Self::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            Self::GatewayRejected { .. } => "GATEWAY_REJECTED",
            Self::PersistenceConflict { .. } => "PERSISTENCE_CONFLICT",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Validation { .. } => "INVALID_REQUEST",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SignatureInvalid
            | Self::ReplaySuspected { .. }
            | Self::UnknownEventId
            | Self::Validation { .. }
            | Self::InsufficientPayoutAmount { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RefundExceedsAvailable { .. }
            | Self::AccountNotOnboarded { .. }
            | Self::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DuplicateTransfer { .. } | Self::PersistenceConflict { .. } => StatusCode::CONFLICT,
            Self::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayRejected { .. } => StatusCode::BAD_GATEWAY,
            Self::Persistence { .. } | Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether running the same operation again later can succeed.
    ///
    /// `NotFound` counts as retryable because webhooks arrive out of order: a
    /// `transfer.processed` can land before the transfer row is written.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable { .. }
                | Self::PersistenceConflict { .. }
                | Self::Persistence { .. }
                | Self::NotFound { .. }
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::PersistenceConflict {
                entity: db.table().unwrap_or("row").to_string(),
                id: db.constraint().unwrap_or("unique").to_string(),
            },
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            _ => Self::Persistence {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            message: format!("malformed json: {err}"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<&LedgerError> for ErrorEnvelope {
    fn from(err: &LedgerError) -> Self {
        Self {
            error: ErrorPayload {
                code: err.code().to_string(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl ErrorEnvelope {
    pub fn unauthorized() -> Self {
        Self {
            error: ErrorPayload {
                code: "UNAUTHORIZED".to_string(),
                message: "missing or invalid internal api key".to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        (self.status_code(), Json(ErrorEnvelope::from(&self))).into_response()
    }
}
