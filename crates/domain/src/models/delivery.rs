//! Delivery tracking models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::invitation::InvitationRole;

/// Default number of dispatch attempts before delivery is abandoned.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// Default backoff before the first retry.
pub const DEFAULT_RETRY_BASE_SECS: i64 = 60;

/// Default ceiling on the retry backoff.
pub const DEFAULT_RETRY_CAP_SECS: i64 = 3600;

/// Outcome reported by the mail collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Delivered,
    Bounced,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "bounced" => Ok(DeliveryStatus::Bounced),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("Unknown delivery status: {}", other)),
        }
    }
}

/// Exponential retry schedule for failed dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_secs: i64,
    pub cap_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            base_secs: DEFAULT_RETRY_BASE_SECS,
            cap_secs: DEFAULT_RETRY_CAP_SECS,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th failure: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = (attempt.max(1) - 1).min(30) as u32;
        let secs = self
            .base_secs
            .saturating_mul(2i64.saturating_pow(exponent))
            .min(self.cap_secs);
        Duration::seconds(secs)
    }

    /// Whether `attempts` failures exhaust the policy.
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Changes applied to an invitation after a dispatch attempt or status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUpdate {
    pub delivery_status: DeliveryStatus,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failed_permanently: bool,
}

/// Result of a dispatch, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryResult {
    pub invitation_id: Uuid,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub failed_permanently: bool,
    /// True when no dispatch was attempted and the recorded outcome was returned.
    pub cached: bool,
}

/// Template context handed to the mail collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MailContext {
    pub invitation_id: Uuid,
    pub school_name: String,
    pub role: InvitationRole,
    pub invite_url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Asynchronous status callback from the mail provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryEvent {
    pub invitation_id: Uuid,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(120));
        assert_eq!(policy.backoff(3), Duration::seconds(240));
        assert_eq!(policy.backoff(4), Duration::seconds(480));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(7), Duration::seconds(3600));
        assert_eq!(policy.backoff(40), Duration::seconds(3600));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn test_delivery_status_parsing() {
        assert_eq!(
            "bounced".parse::<DeliveryStatus>().unwrap(),
            DeliveryStatus::Bounced
        );
        assert!("lost".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn test_delivery_event_deserialization() {
        let event: DeliveryEvent = serde_json::from_str(
            r#"{"invitation_id":"00000000-0000-0000-0000-000000000000","status":"delivered"}"#,
        )
        .unwrap();
        assert_eq!(event.status, DeliveryStatus::Delivered);
        assert!(event.error.is_none());
    }
}
