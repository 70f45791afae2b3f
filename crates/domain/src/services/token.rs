//! Invitation token issuance and validation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::{InvitationStore, ACTIVE_INVITATION_CONSTRAINT, INVITATION_TOKEN_CONSTRAINT};
use crate::errors::{InvitationError, StoreError};
use crate::models::{Invitation, InvitationStatus, NewInvitation};

/// Default number of fresh tokens tried before issuance gives up.
pub const DEFAULT_TOKEN_ATTEMPTS: u32 = 3;

/// Issues and resolves invitation tokens.
pub struct TokenService {
    store: Arc<dyn InvitationStore>,
    max_attempts: u32,
}

impl TokenService {
    pub fn new(store: Arc<dyn InvitationStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Produces a fresh, unpredictable token.
    pub fn issue(&self) -> String {
        shared::crypto::generate_invitation_token()
    }

    /// Resolves a token to its invitation without any side effect.
    ///
    /// Expired records, and records past their expiry instant, yield `TokenExpired`.
    pub async fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Invitation, InvitationError> {
        let invitation = self.lookup(token).await?;
        if invitation.status == InvitationStatus::Expired || invitation.is_past_expiry(now) {
            return Err(InvitationError::TokenExpired);
        }
        Ok(invitation)
    }

    /// Resolves a token regardless of status or expiry.
    pub async fn lookup(&self, token: &str) -> Result<Invitation, InvitationError> {
        if !shared::crypto::is_well_formed_token(token) {
            return Err(InvitationError::TokenInvalid);
        }
        self.store
            .find_by_token(token)
            .await?
            .ok_or(InvitationError::TokenInvalid)
    }

    /// Persists a new invitation under a freshly issued token.
    ///
    /// A token collision retries with a new token. A collision with an active
    /// invitation for the same tuple reports that invitation; if it has already
    /// passed expiry it is flipped to expired and the insert is retried once.
    pub async fn persist(
        &self,
        new: &NewInvitation,
        now: DateTime<Utc>,
    ) -> Result<Invitation, InvitationError> {
        let mut token_attempts = 0;
        let mut reclaimed_stale = false;

        loop {
            let candidate = new.with_token(self.issue(), now);
            match self.store.insert_invitation(&candidate).await {
                Ok(invitation) => return Ok(invitation),
                Err(StoreError::UniqueViolation { constraint })
                    if constraint == INVITATION_TOKEN_CONSTRAINT =>
                {
                    token_attempts += 1;
                    warn!(attempt = token_attempts, "Invitation token collision");
                    if token_attempts >= self.max_attempts {
                        return Err(InvitationError::Store(StoreError::UniqueViolation {
                            constraint,
                        }));
                    }
                }
                Err(StoreError::UniqueViolation { constraint })
                    if constraint == ACTIVE_INVITATION_CONSTRAINT =>
                {
                    let existing = self
                        .store
                        .find_active(&new.email, new.school_id, new.role)
                        .await?;
                    match existing {
                        Some(existing) if existing.is_past_expiry(now) && !reclaimed_stale => {
                            debug!(
                                invitation_id = %existing.id,
                                "Expiring stale invitation blocking a new one"
                            );
                            self.store.mark_expired(existing.id).await?;
                            reclaimed_stale = true;
                        }
                        Some(existing) => {
                            return Err(InvitationError::DuplicateActiveInvitation {
                                existing_invitation_id: existing.id,
                            })
                        }
                        // The blocking row left the active set meanwhile.
                        None if !reclaimed_stale => reclaimed_stale = true,
                        None => {
                            return Err(InvitationError::Store(StoreError::UniqueViolation {
                                constraint,
                            }))
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvitationRole;
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;
    use uuid::Uuid;

    fn new_invitation(school_id: Uuid, expires_at: DateTime<Utc>) -> NewInvitation {
        NewInvitation {
            email: "teacher@example.com".to_string(),
            school_id,
            role: InvitationRole::Teacher,
            invited_by: Uuid::new_v4(),
            message: None,
            batch_id: None,
            expires_at,
        }
    }

    fn service(store: Arc<InMemoryInvitationStore>) -> TokenService {
        TokenService::new(store, DEFAULT_TOKEN_ATTEMPTS)
    }

    #[test]
    fn test_issue_produces_distinct_tokens() {
        let tokens = service(Arc::new(InMemoryInvitationStore::new()));
        let a = tokens.issue();
        let b = tokens.issue();
        assert_ne!(a, b);
        assert!(shared::crypto::is_well_formed_token(&a));
    }

    #[tokio::test]
    async fn test_malformed_token_is_invalid() {
        let tokens = service(Arc::new(InMemoryInvitationStore::new()));
        let result = tokens.validate("short", Utc::now()).await;
        assert!(matches!(result, Err(InvitationError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let tokens = service(Arc::new(InMemoryInvitationStore::new()));
        let unknown = tokens.issue();
        let result = tokens.validate(&unknown, Utc::now()).await;
        assert!(matches!(result, Err(InvitationError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_validate_after_expiry_is_expired_without_side_effects() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let tokens = service(store.clone());
        let now = Utc::now();
        let inv = tokens
            .persist(&new_invitation(Uuid::new_v4(), now + Duration::days(1)), now)
            .await
            .unwrap();

        let later = now + Duration::days(2);
        for _ in 0..2 {
            let result = tokens.validate(&inv.token, later).await;
            assert!(matches!(result, Err(InvitationError::TokenExpired)));
        }
        let stored = store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn test_persist_reports_duplicate_active_invitation() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let tokens = service(store);
        let now = Utc::now();
        let school_id = Uuid::new_v4();

        let first = tokens
            .persist(&new_invitation(school_id, now + Duration::days(7)), now)
            .await
            .unwrap();
        let second = tokens
            .persist(&new_invitation(school_id, now + Duration::days(7)), now)
            .await;

        match second {
            Err(InvitationError::DuplicateActiveInvitation {
                existing_invitation_id,
            }) => assert_eq!(existing_invitation_id, first.id),
            other => panic!("Expected DuplicateActiveInvitation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_persist_reclaims_stale_active_invitation() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let tokens = service(store.clone());
        let now = Utc::now();
        let school_id = Uuid::new_v4();

        let stale = tokens
            .persist(
                &new_invitation(school_id, now - Duration::hours(1)),
                now - Duration::days(7),
            )
            .await
            .unwrap();
        let fresh = tokens
            .persist(&new_invitation(school_id, now + Duration::days(7)), now)
            .await
            .unwrap();

        assert_ne!(stale.id, fresh.id);
        let stale = store.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, InvitationStatus::Expired);
    }

    #[tokio::test]
    async fn test_token_collisions_retry_then_fail_closed() {
        let store = Arc::new(InMemoryInvitationStore::new());
        store.inject_token_collisions(2);
        let tokens = service(store.clone());
        let now = Utc::now();

        let inv = tokens
            .persist(&new_invitation(Uuid::new_v4(), now + Duration::days(7)), now)
            .await;
        assert!(inv.is_ok());

        store.inject_token_collisions(3);
        let result = tokens
            .persist(&new_invitation(Uuid::new_v4(), now + Duration::days(7)), now)
            .await;
        assert!(matches!(
            result,
            Err(InvitationError::Store(StoreError::UniqueViolation { .. }))
        ));
    }
}
