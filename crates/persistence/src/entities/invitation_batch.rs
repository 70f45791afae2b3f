//! Invitation batch entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::InvitationBatch;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the invitation_batches table.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationBatchEntity {
    pub id: Uuid,
    pub school_id: Uuid,
    pub requested_by: Uuid,
    pub total_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<InvitationBatchEntity> for InvitationBatch {
    fn from(e: InvitationBatchEntity) -> Self {
        Self {
            id: e.id,
            school_id: e.school_id,
            requested_by: e.requested_by,
            total_count: e.total_count,
            created_at: e.created_at,
        }
    }
}

/// Aggregated row for batch summaries.
#[derive(Debug, Clone, FromRow)]
pub struct BatchStatusCountEntity {
    pub status: String,
    pub count: i64,
    pub failed_permanently: i64,
}
