use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    NotStarted,
    Pending,
    Connected,
    Activated,
    Suspended,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Activated => "activated",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "pending" => Some(Self::Pending),
            "connected" => Some(Self::Connected),
            "activated" => Some(Self::Activated),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Organizer payout settings, owned by the onboarding service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizerPayoutConfig {
    pub organizer_id: String,
    pub onboarding_status: OnboardingStatus,
    pub commission_rate_bps: Option<i32>,
    pub linked_account_id: Option<String>,
}

impl OrganizerPayoutConfig {
    /// The linked account that can receive transfers, if any.
    pub fn payout_account(&self) -> Option<&str> {
        match self.onboarding_status {
            OnboardingStatus::Connected | OnboardingStatus::Activated => {
                self.linked_account_id.as_deref().filter(|a| !a.is_empty())
            }
            _ => None,
        }
    }
}
