use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound gateway notification body.
///
/// `{id, event, created_at, payload: {<entity-kind>: {entity: {...}}}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEnvelope {
    pub fn entity(&self, kind: &str) -> Option<&serde_json::Value> {
        self.payload.get(kind).and_then(|k| k.get("entity"))
    }

    pub fn entity_str(&self, kind: &str, field: &str) -> Option<&str> {
        self.entity(kind)
            .and_then(|e| e.get(field))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn entity_i64(&self, kind: &str, field: &str) -> Option<i64> {
        self.entity(kind).and_then(|e| e.get(field)).and_then(|v| v.as_i64())
    }

    /// A string from the entity's `notes` map, as set when the gateway
    /// object was created.
    pub fn entity_note(&self, kind: &str, key: &str) -> Option<&str> {
        self.entity(kind)
            .and_then(|e| e.get("notes"))
            .and_then(|n| n.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Envelope id, or the id of the entity the event is about.
    pub fn event_id(&self, header_event_id: Option<&str>) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        if let Some(id) = header_event_id.filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        let entity_id = match EventKind::from_event(&self.event).entity() {
            Some(entity) => self.entity_str(entity, "id"),
            None => ["refund", "transfer", "payment", "order"]
                .into_iter()
                .find_map(|entity| self.entity_str(entity, "id")),
        };
        entity_id.map(|id| format!("{}:{}", self.event, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentCaptured,
    OrderPaid,
    PaymentFailed,
    TransferProcessed,
    TransferFailed,
    TransferReversed,
    RefundProcessed,
    RefundFailed,
    Unknown,
}

impl EventKind {
    pub fn from_event(event: &str) -> Self {
        match event {
            "payment.captured" => Self::PaymentCaptured,
            "order.paid" => Self::OrderPaid,
            "payment.failed" => Self::PaymentFailed,
            "transfer.processed" => Self::TransferProcessed,
            "transfer.failed" => Self::TransferFailed,
            "transfer.reversed" => Self::TransferReversed,
            "refund.processed" => Self::RefundProcessed,
            "refund.failed" => Self::RefundFailed,
            _ => Self::Unknown,
        }
    }

    /// Which payload entity carries the id for this event.
    pub fn entity(&self) -> Option<&'static str> {
        match self {
            Self::PaymentCaptured | Self::OrderPaid | Self::PaymentFailed => Some("payment"),
            Self::TransferProcessed | Self::TransferFailed | Self::TransferReversed => Some("transfer"),
            Self::RefundProcessed | Self::RefundFailed => Some("refund"),
            Self::Unknown => None,
        }
    }
}

/// Record of a handled webhook. `(event_id, source)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub source: String,
    pub event_type: String,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn prefers_envelope_id() {
        let env = envelope(serde_json::json!({
            "id": "evt_1",
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1"}}}
        }));
        assert_eq!(env.event_id(Some("hdr_1")).as_deref(), Some("evt_1"));
    }

    #[test]
    fn falls_back_to_header_then_entity_id() {
        let env = envelope(serde_json::json!({
            "event": "transfer.processed",
            "payload": {"transfer": {"entity": {"id": "trf_9"}}}
        }));
        assert_eq!(env.event_id(Some("hdr_1")).as_deref(), Some("hdr_1"));
        assert_eq!(env.event_id(None).as_deref(), Some("transfer.processed:trf_9"));
    }

    #[test]
    fn missing_ids_yield_none() {
        let env = envelope(serde_json::json!({"event": "refund.processed", "payload": {}}));
        assert!(env.event_id(None).is_none());
    }
}
