//! Storage seams of the invitation engine.
//!
//! The engine talks to persistence only through these traits. The PostgreSQL
//! repositories implement them in production; [`super::memory::InMemoryInvitationStore`]
//! implements them for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    BatchCounts, DeliveryUpdate, Invitation, InvitationBatch, InvitationRole, InvitationStatus,
    MembershipRole, OnboardingSignal, School, SchoolMembership,
};

/// Unique index over active invitations per (lower(email), school, role).
pub const ACTIVE_INVITATION_CONSTRAINT: &str = "invitations_active_unique";

/// Unique constraint on the invitation token.
pub const INVITATION_TOKEN_CONSTRAINT: &str = "invitations_token_key";

/// Forward-only status change: applied only while the current status is in `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAdvance {
    pub from: Vec<InvitationStatus>,
    pub to: InvitationStatus,
}

/// Terminal response recorded by a guarded compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Declined { reason: Option<String> },
    Cancelled { by: Uuid },
}

impl Response {
    pub fn status(&self) -> InvitationStatus {
        match self {
            Response::Declined { .. } => InvitationStatus::Declined,
            Response::Cancelled { .. } => InvitationStatus::Cancelled,
        }
    }
}

/// Everything acceptance writes in one transaction.
#[derive(Debug, Clone)]
pub struct AcceptInvitation {
    pub invitation_id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub roles: Vec<MembershipRole>,
    pub signal: OnboardingSignal,
    pub now: DateTime<Utc>,
}

/// Result of the acceptance transaction.
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    Accepted {
        invitation: Invitation,
        memberships: Vec<SchoolMembership>,
        signal: OnboardingSignal,
    },
    /// The guarded update matched no row; nothing was written.
    NotActive,
}

/// Keyset position for listing, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListPosition {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Persistence for invitations, batches, and the reference data they need.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Cheap connectivity check for health probes.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_school(&self, school_id: Uuid) -> Result<Option<School>, StoreError>;

    async fn is_school_admin(&self, school_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;

    /// Inserts a new invitation. Unique violations are reported with their
    /// constraint name and never overwrite an existing row.
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<Invitation, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError>;

    async fn find_active(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Most recent decline for the tuple, if any.
    async fn last_declined_at(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Applies a forward-only status change. Returns false when the current
    /// status is not in `advance.from` or the invitation is past expiry.
    async fn advance_status(
        &self,
        id: Uuid,
        advance: &StatusAdvance,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Flips an active invitation to expired. Returns false if it was not active.
    async fn mark_expired(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Flips every active invitation past expiry to expired, up to `limit`.
    async fn expire_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, StoreError>;

    /// Records a terminal response while the invitation is active and unexpired.
    /// Returns `None` when the guard matched no row.
    async fn respond(
        &self,
        id: Uuid,
        response: &Response,
        responded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Runs acceptance atomically: guarded status change, membership grants,
    /// and the onboarding outbox row. Any failure leaves nothing written.
    async fn accept(&self, command: &AcceptInvitation) -> Result<AcceptOutcome, StoreError>;

    /// Records a dispatch outcome, advancing the lifecycle status if `advance`
    /// still applies.
    async fn record_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        advance: Option<&StatusAdvance>,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Clears delivery failure state ahead of a resend.
    async fn reset_delivery(&self, id: Uuid) -> Result<Option<Invitation>, StoreError>;

    /// Active invitations whose retry is due, oldest first.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError>;

    async fn create_batch(&self, batch: &InvitationBatch) -> Result<InvitationBatch, StoreError>;

    async fn find_batch(&self, id: Uuid) -> Result<Option<InvitationBatch>, StoreError>;

    async fn batch_counts(&self, batch_id: Uuid) -> Result<BatchCounts, StoreError>;

    async fn list_by_school(
        &self,
        school_id: Uuid,
        status: Option<InvitationStatus>,
        after: Option<ListPosition>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError>;
}

/// Outbox of onboarding signals awaiting dispatch.
#[async_trait]
pub trait OnboardingOutbox: Send + Sync {
    async fn pending_signals(&self, limit: i64) -> Result<Vec<OnboardingSignal>, StoreError>;

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_dispatch_failure(&self, id: Uuid, error: &str) -> Result<(), StoreError>;
}
