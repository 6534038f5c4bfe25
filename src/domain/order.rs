use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Failed,
    PartialRefund,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::PartialRefund => "partial_refund",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "partial_refund" => Some(Self::PartialRefund),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Money has been captured for the order at some point.
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Paid | Self::PartialRefund | Self::Refunded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitStatus {
    Pending,
    Processed,
    NotApplicable,
}

impl SplitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::NotApplicable => "not_applicable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "not_applicable" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderRefundStatus {
    None,
    Partial,
    Full,
}

impl OrderRefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "partial" => Some(Self::Partial),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// What a payment is for. Fixed when the order is created and never
/// re-derived from gateway notes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderPurpose {
    Direct,
    Booking { booking_id: String },
    Subscription { subscription_id: String },
}

impl OrderPurpose {
    /// Orders whose gross is split with an organizer and paid out.
    pub fn is_payout_eligible(&self) -> bool {
        !matches!(self, Self::Subscription { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Booking { .. } => "booking",
            Self::Subscription { .. } => "subscription",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub order_id: Uuid,
    pub buyer_id: String,
    pub organizer_id: String,
    pub trip_ref: Option<String>,
    pub purpose: OrderPurpose,
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub commission_rate_bps: i32,
    pub commission_amount: i64,
    pub gateway_fee_amount: i64,
    pub organizer_payout_amount: i64,
    pub payout_anomaly: bool,
    pub split_status: SplitStatus,
    pub refund_status: OrderRefundStatus,
    pub refunded_amount: i64,
    pub gateway_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub notes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn refundable_amount(&self) -> i64 {
        (self.amount - self.refunded_amount).max(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub buyer_id: String,
    pub organizer_id: String,
    pub amount: i64,
    pub currency: String,
    pub trip_ref: Option<String>,
    #[serde(default = "default_purpose")]
    pub purpose: OrderPurpose,
    #[serde(default)]
    pub notes: serde_json::Value,
}

fn default_purpose() -> OrderPurpose {
    OrderPurpose::Direct
}
