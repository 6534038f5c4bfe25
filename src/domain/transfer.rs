use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Initiated,
    Processed,
    Failed,
    Reversed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initiated => "initiated",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "initiated" => Some(Self::Initiated),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "reversed" => Some(Self::Reversed),
            _ => None,
        }
    }

    /// At most one transfer per order may be in one of these states.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Initiated | Self::Processed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub transfer_id: Uuid,
    pub order_id: Uuid,
    pub organizer_id: String,
    pub payment_id: String,
    pub linked_account_id: String,
    pub gateway_transfer_id: Option<String>,
    pub amount: i64,
    pub commission_amount: i64,
    pub gateway_fee_amount: i64,
    pub payout_amount: i64,
    pub currency: String,
    pub status: TransferStatus,
    pub hold_until: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reversed_amount: i64,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field changes applied together with a conditional status move.
#[derive(Debug, Clone, Default)]
pub struct TransferPatch {
    pub gateway_transfer_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reversed_amount: Option<i64>,
    pub failure_reason: Option<String>,
}
