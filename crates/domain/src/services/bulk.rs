//! Bulk invitation processing.
//!
//! A batch is one logical request, not one transaction: every recipient runs
//! through the issuance pipeline on its own and failures stay attached to that
//! recipient's entry.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::issuance::{expiry_for, InvitationIssuer, IssueCommand};
use super::store::InvitationStore;
use crate::errors::InvitationError;
use crate::models::{
    BatchItemOutcome, BatchItemResult, BatchResult, BatchSummary, BulkInvitationRequest,
    InvitationBatch, StatusCounts,
};
use shared::validation::normalize_email;

/// Reason reported for recipients repeated within one request.
pub const SKIP_DUPLICATE_IN_REQUEST: &str = "duplicate_in_request";

pub struct BulkInvitationProcessor {
    store: Arc<dyn InvitationStore>,
    issuer: Arc<InvitationIssuer>,
    max_batch_size: usize,
    default_expiry_days: i64,
}

impl BulkInvitationProcessor {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        issuer: Arc<InvitationIssuer>,
        max_batch_size: usize,
        default_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            issuer,
            max_batch_size,
            default_expiry_days,
        }
    }

    /// Processes a bulk request. Only request-level problems (size, school,
    /// permission) fail the call; everything else is reported per recipient.
    pub async fn submit(
        &self,
        actor: Uuid,
        source_addr: &str,
        request: &BulkInvitationRequest,
    ) -> Result<BatchResult, InvitationError> {
        let got = request.invitations.len();
        if got > self.max_batch_size {
            return Err(InvitationError::BatchTooLarge {
                max: self.max_batch_size,
                got,
            });
        }
        if got == 0 {
            return Err(InvitationError::Validation(
                "At least one recipient is required".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = expiry_for(now, request.expires_in_days, self.default_expiry_days)?;
        self.issuer
            .authorize_inviter(actor, request.school_id)
            .await?;

        let batch = self
            .store
            .create_batch(&InvitationBatch {
                id: Uuid::new_v4(),
                school_id: request.school_id,
                requested_by: actor,
                total_count: got as i32,
                created_at: now,
            })
            .await?;

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(got);
        for (index, item) in request.invitations.iter().enumerate() {
            let outcome = if !seen.insert((normalize_email(&item.email), item.role)) {
                BatchItemOutcome::Skipped {
                    reason: SKIP_DUPLICATE_IN_REQUEST.to_string(),
                }
            } else {
                let command = IssueCommand {
                    email: item.email.clone(),
                    school_id: request.school_id,
                    role: item.role,
                    message: item.message.clone(),
                    batch_id: Some(batch.id),
                    expires_at,
                };
                match self.issuer.issue(actor, source_addr, command).await {
                    Ok(issued) => BatchItemOutcome::Succeeded {
                        invitation_id: issued.invitation.id,
                        delivery_status: issued.delivery.map(|d| d.status),
                    },
                    Err(e) => BatchItemOutcome::Failed { error: e.detail() },
                }
            };
            items.push(BatchItemResult {
                index,
                email: item.email.clone(),
                outcome,
            });
        }

        let result = BatchResult::from_items(batch.id, items);
        info!(
            batch_id = %batch.id,
            school_id = %batch.school_id,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            "Bulk invitation batch processed"
        );
        Ok(result)
    }

    /// Derived per-status counts for a batch. Visible to the requester and
    /// school administrators.
    pub async fn batch_summary(
        &self,
        batch_id: Uuid,
        actor: Uuid,
    ) -> Result<BatchSummary, InvitationError> {
        let batch = self
            .store
            .find_batch(batch_id)
            .await?
            .ok_or(InvitationError::BatchNotFound)?;
        if batch.requested_by != actor && !self.store.is_school_admin(batch.school_id, actor).await?
        {
            return Err(InvitationError::NotPermitted(
                "Only the requester or a school administrator can view this batch".to_string(),
            ));
        }

        let counts = self.store.batch_counts(batch_id).await?;
        let status_counts = StatusCounts::from_rows(&counts.by_status);
        Ok(BatchSummary {
            batch_id: batch.id,
            school_id: batch.school_id,
            requested_by: batch.requested_by,
            total_count: batch.total_count,
            created: status_counts.total(),
            created_at: batch.created_at,
            status_counts,
            delivery_failed_permanently: counts.delivery_failed_permanently,
        })
    }
}
