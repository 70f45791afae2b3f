//! Invitation lifecycle rules.
//!
//! ```text
//! pending -> sent -> delivered -> viewed -> accepted | declined | expired | cancelled
//! ```
//!
//! Intermediate states are optional and only move forward. Terminal states admit
//! no further transition. Expiry is enforced lazily: any transition attempted
//! after `expires_at` flips the record to `expired`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{InvitationStore, StatusAdvance};
use crate::errors::InvitationError;
use crate::models::{Invitation, InvitationStatus};

/// Guards and applies lifecycle transitions.
pub struct InvitationStateMachine {
    store: Arc<dyn InvitationStore>,
}

impl InvitationStateMachine {
    pub fn new(store: Arc<dyn InvitationStore>) -> Self {
        Self { store }
    }

    /// Position of an intermediate status along the forward path.
    fn rank(status: InvitationStatus) -> Option<u8> {
        match status {
            InvitationStatus::Pending => Some(0),
            InvitationStatus::Sent => Some(1),
            InvitationStatus::Delivered => Some(2),
            InvitationStatus::Viewed => Some(3),
            _ => None,
        }
    }

    /// Active statuses that may advance to `to`.
    pub fn predecessors(to: InvitationStatus) -> Vec<InvitationStatus> {
        let Some(target) = Self::rank(to) else {
            return Vec::new();
        };
        InvitationStatus::ACTIVE
            .into_iter()
            .filter(|s| Self::rank(*s).is_some_and(|r| r < target))
            .collect()
    }

    /// Forward move from `from` to the intermediate status `to`, or `None` when
    /// the move would not advance (out-of-order feedback, terminal records).
    pub fn forward(from: InvitationStatus, to: InvitationStatus) -> Option<StatusAdvance> {
        match (Self::rank(from), Self::rank(to)) {
            (Some(current), Some(target)) if target > current => Some(StatusAdvance {
                from: Self::predecessors(to),
                to,
            }),
            _ => None,
        }
    }

    /// Error reported when a response is attempted on a terminal record.
    pub fn terminal_error(status: InvitationStatus) -> InvitationError {
        if status == InvitationStatus::Expired {
            InvitationError::TokenExpired
        } else {
            InvitationError::AlreadyResponded
        }
    }

    /// Checks that `invitation` can still be responded to at `now`.
    ///
    /// An active invitation past its expiry is flipped to `expired`.
    pub async fn ensure_open(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), InvitationError> {
        if invitation.status.is_terminal() {
            return Err(Self::terminal_error(invitation.status));
        }
        if invitation.is_past_expiry(now) {
            self.expire(invitation.id).await?;
            return Err(InvitationError::TokenExpired);
        }
        Ok(())
    }

    /// Explains why a guarded update matched no row.
    pub async fn classify_conflict(&self, id: Uuid, now: DateTime<Utc>) -> InvitationError {
        let current = match self.store.find_by_id(id).await {
            Ok(Some(current)) => current,
            Ok(None) => return InvitationError::TokenInvalid,
            Err(e) => return e.into(),
        };
        match self.ensure_open(&current, now).await {
            Err(e) => e,
            // Guard missed yet the row reads as open: treat as a lost race.
            Ok(()) => InvitationError::AlreadyResponded,
        }
    }

    /// Cancellation is reserved for the inviter and school administrators.
    pub fn authorize_cancel(
        invitation: &Invitation,
        actor: Uuid,
        actor_is_admin: bool,
    ) -> Result<(), InvitationError> {
        if invitation.invited_by == actor || actor_is_admin {
            Ok(())
        } else {
            Err(InvitationError::NotPermitted(
                "Only the inviter or a school administrator can cancel an invitation".to_string(),
            ))
        }
    }

    /// Moves an open invitation to `viewed`. Returns true if the status changed.
    pub async fn mark_viewed(
        &self,
        invitation: &Invitation,
        now: DateTime<Utc>,
    ) -> Result<bool, InvitationError> {
        let Some(advance) = Self::forward(invitation.status, InvitationStatus::Viewed) else {
            return Ok(false);
        };
        let changed = self.store.advance_status(invitation.id, &advance, now).await?;
        if changed {
            debug!(invitation_id = %invitation.id, "Invitation viewed");
        }
        Ok(changed)
    }

    async fn expire(&self, id: Uuid) -> Result<(), InvitationError> {
        if self.store.mark_expired(id).await? {
            info!(invitation_id = %id, "Invitation expired on access");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvitationRole, NewInvitation};
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;

    async fn seed(store: &InMemoryInvitationStore, expires_at: DateTime<Utc>) -> Invitation {
        let new = NewInvitation {
            email: "teacher@example.com".to_string(),
            school_id: Uuid::new_v4(),
            role: InvitationRole::Teacher,
            invited_by: Uuid::new_v4(),
            message: None,
            batch_id: None,
            expires_at,
        };
        store
            .insert_invitation(&new.with_token(shared::crypto::generate_invitation_token(), Utc::now()))
            .await
            .unwrap()
    }

    #[test]
    fn test_forward_only_moves() {
        use InvitationStatus::*;

        assert!(InvitationStateMachine::forward(Pending, Sent).is_some());
        assert!(InvitationStateMachine::forward(Pending, Viewed).is_some());
        assert!(InvitationStateMachine::forward(Delivered, Viewed).is_some());
        assert!(InvitationStateMachine::forward(Delivered, Sent).is_none());
        assert!(InvitationStateMachine::forward(Viewed, Delivered).is_none());
        assert!(InvitationStateMachine::forward(Sent, Sent).is_none());
        assert!(InvitationStateMachine::forward(Accepted, Viewed).is_none());
        assert!(InvitationStateMachine::forward(Pending, Accepted).is_none());
    }

    #[test]
    fn test_predecessors() {
        use InvitationStatus::*;

        assert_eq!(InvitationStateMachine::predecessors(Sent), vec![Pending]);
        assert_eq!(
            InvitationStateMachine::predecessors(Viewed),
            vec![Pending, Sent, Delivered]
        );
        assert!(InvitationStateMachine::predecessors(Accepted).is_empty());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(matches!(
            InvitationStateMachine::terminal_error(InvitationStatus::Expired),
            InvitationError::TokenExpired
        ));
        assert!(matches!(
            InvitationStateMachine::terminal_error(InvitationStatus::Declined),
            InvitationError::AlreadyResponded
        ));
    }

    #[tokio::test]
    async fn test_ensure_open_flips_expired_record() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let machine = InvitationStateMachine::new(store.clone());
        let inv = seed(&store, Utc::now() + Duration::days(1)).await;

        let later = Utc::now() + Duration::days(2);
        let result = machine.ensure_open(&inv, later).await;
        assert!(matches!(result, Err(InvitationError::TokenExpired)));

        let stored = store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
        let again = machine.ensure_open(&stored, later).await;
        assert!(matches!(again, Err(InvitationError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_mark_viewed_is_idempotent() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let machine = InvitationStateMachine::new(store.clone());
        let inv = seed(&store, Utc::now() + Duration::days(7)).await;

        assert!(machine.mark_viewed(&inv, Utc::now()).await.unwrap());
        let viewed = store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(viewed.status, InvitationStatus::Viewed);
        assert!(viewed.viewed_at.is_some());
        assert!(!machine.mark_viewed(&viewed, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_authorization() {
        let store = InMemoryInvitationStore::new();
        let inv = seed(&store, Utc::now() + Duration::days(7)).await;

        assert!(InvitationStateMachine::authorize_cancel(&inv, inv.invited_by, false).is_ok());
        assert!(InvitationStateMachine::authorize_cancel(&inv, Uuid::new_v4(), true).is_ok());
        assert!(matches!(
            InvitationStateMachine::authorize_cancel(&inv, Uuid::new_v4(), false),
            Err(InvitationError::NotPermitted(_))
        ));
    }
}
