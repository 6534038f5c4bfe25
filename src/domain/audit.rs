use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// One state transition, successful or not, as seen by the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub user_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub metadata: serde_json::Value,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn success(action: &str, resource: &str, resource_id: impl ToString) -> Self {
        Self {
            user_id: None,
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: resource_id.to_string(),
            metadata: serde_json::Value::Null,
            status: AuditStatus::Success,
            created_at: Utc::now(),
        }
    }

    pub fn failure(action: &str, resource: &str, resource_id: impl ToString) -> Self {
        Self {
            status: AuditStatus::Failure,
            ..Self::success(action, resource, resource_id)
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
