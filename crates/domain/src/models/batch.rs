//! Bulk invitation models.
//!
//! A batch groups invitations created from one bulk request. Per-status counts
//! are derived from the invitations themselves and never stored on the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delivery::DeliveryStatus;
use super::invitation::{InvitationRole, InvitationStatus};
use crate::errors::ErrorDetail;

/// Default maximum recipients per bulk request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Persisted batch header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationBatch {
    pub id: Uuid,
    pub school_id: Uuid,
    pub requested_by: Uuid,
    pub total_count: i32,
    pub created_at: DateTime<Utc>,
}

/// One recipient in a bulk request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BulkInvitationItem {
    pub email: String,
    pub role: InvitationRole,
    pub message: Option<String>,
}

/// Request to invite many recipients to one school.
///
/// Size and expiry bounds are checked by the bulk processor, so an oversized
/// batch is reported as `batch_too_large` rather than a validation error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BulkInvitationRequest {
    pub school_id: Uuid,
    pub invitations: Vec<BulkInvitationItem>,
    pub expires_in_days: Option<i64>,
}

/// Per-recipient outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Succeeded {
        invitation_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivery_status: Option<DeliveryStatus>,
    },
    Failed {
        #[serde(flatten)]
        error: ErrorDetail,
    },
    Skipped {
        reason: String,
    },
}

/// Result for one recipient, in request order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchItemResult {
    pub index: usize,
    pub email: String,
    #[serde(flatten)]
    pub outcome: BatchItemOutcome,
}

/// Result of a bulk request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    pub fn from_items(batch_id: Uuid, items: Vec<BatchItemResult>) -> Self {
        let mut result = Self {
            batch_id,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            items: Vec::new(),
        };
        for item in &items {
            match item.outcome {
                BatchItemOutcome::Succeeded { .. } => result.succeeded += 1,
                BatchItemOutcome::Failed { .. } => result.failed += 1,
                BatchItemOutcome::Skipped { .. } => result.skipped += 1,
            }
        }
        result.items = items;
        result
    }
}

/// Per-status counts of a batch's invitations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusCounts {
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub viewed: i64,
    pub accepted: i64,
    pub declined: i64,
    pub expired: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn from_rows(rows: &[(InvitationStatus, i64)]) -> Self {
        let mut counts = Self::default();
        for (status, count) in rows {
            let slot = match status {
                InvitationStatus::Pending => &mut counts.pending,
                InvitationStatus::Sent => &mut counts.sent,
                InvitationStatus::Delivered => &mut counts.delivered,
                InvitationStatus::Viewed => &mut counts.viewed,
                InvitationStatus::Accepted => &mut counts.accepted,
                InvitationStatus::Declined => &mut counts.declined,
                InvitationStatus::Expired => &mut counts.expired,
                InvitationStatus::Cancelled => &mut counts.cancelled,
            };
            *slot += count;
        }
        counts
    }

    pub fn total(&self) -> i64 {
        self.pending
            + self.sent
            + self.delivered
            + self.viewed
            + self.accepted
            + self.declined
            + self.expired
            + self.cancelled
    }
}

/// Aggregated counts returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub by_status: Vec<(InvitationStatus, i64)>,
    pub delivery_failed_permanently: i64,
}

/// Derived summary of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub school_id: Uuid,
    pub requested_by: Uuid,
    pub total_count: i32,
    pub created: i64,
    pub created_at: DateTime<Utc>,
    pub status_counts: StatusCounts,
    pub delivery_failed_permanently: i64,
}
