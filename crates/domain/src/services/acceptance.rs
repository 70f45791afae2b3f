//! Acceptance, decline, and cancellation.
//!
//! Acceptance commits the invitation, the membership grants, and the onboarding
//! outbox row in one store transaction. The onboarding collaborator is signalled
//! only after commit; signals it misses stay in the outbox for the dispatch job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::state_machine::InvitationStateMachine;
use super::store::{AcceptInvitation, AcceptOutcome, InvitationStore, OnboardingOutbox, Response};
use super::token::TokenService;
use crate::errors::InvitationError;
use crate::metrics;
use crate::models::{
    AcceptanceResult, Invitation, OnboardingRequest, OnboardingSignal, RespondingIdentity,
};
use shared::validation::{emails_match, MAX_DECLINE_REASON_LENGTH};

/// Failure reported by the onboarding collaborator.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Onboarding signal failed: {0}")]
    Failed(String),
}

/// Profile-completion collaborator.
#[async_trait]
pub trait OnboardingSignaler: Send + Sync {
    /// Begin onboarding for (identity, school, roles).
    async fn begin_onboarding(&self, request: &OnboardingRequest) -> Result<(), SignalError>;
}

/// Mock onboarding signaler for development and testing.
#[derive(Default)]
pub struct MockOnboardingSignaler {
    simulate_failure: AtomicBool,
    received: Mutex<Vec<OnboardingRequest>>,
}

impl MockOnboardingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.simulate_failure.store(failing, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<OnboardingRequest> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl OnboardingSignaler for MockOnboardingSignaler {
    async fn begin_onboarding(&self, request: &OnboardingRequest) -> Result<(), SignalError> {
        if self.simulate_failure.load(Ordering::SeqCst) {
            tracing::warn!(
                signal_id = %request.signal_id,
                "Mock onboarding signaler simulating failure"
            );
            return Err(SignalError::Failed("Simulated failure".to_string()));
        }
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }
}

/// Turns a token plus a verified identity into a membership grant.
pub struct AcceptanceOrchestrator {
    store: Arc<dyn InvitationStore>,
    outbox: Arc<dyn OnboardingOutbox>,
    tokens: Arc<TokenService>,
    machine: Arc<InvitationStateMachine>,
    signaler: Arc<dyn OnboardingSignaler>,
}

impl AcceptanceOrchestrator {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        outbox: Arc<dyn OnboardingOutbox>,
        tokens: Arc<TokenService>,
        machine: Arc<InvitationStateMachine>,
        signaler: Arc<dyn OnboardingSignaler>,
    ) -> Self {
        Self {
            store,
            outbox,
            tokens,
            machine,
            signaler,
        }
    }

    /// Accepts the invitation behind `token` on behalf of `identity`.
    pub async fn accept(
        &self,
        token: &str,
        identity: &RespondingIdentity,
    ) -> Result<AcceptanceResult, InvitationError> {
        let now = Utc::now();
        let invitation = self.tokens.lookup(token).await?;
        self.machine.ensure_open(&invitation, now).await?;

        if !emails_match(&invitation.email, &identity.email) {
            warn!(
                security_event = "invitation_identity_mismatch",
                invitation_id = %invitation.id,
                school_id = %invitation.school_id,
                user_id = %identity.user_id,
                "Invitation accept attempted by a different account"
            );
            return Err(InvitationError::IdentityMismatch);
        }

        let command = AcceptInvitation {
            invitation_id: invitation.id,
            user_id: identity.user_id,
            school_id: invitation.school_id,
            roles: invitation.granted_roles.clone(),
            signal: OnboardingSignal::new(
                identity.user_id,
                invitation.school_id,
                invitation.granted_roles.clone(),
                invitation.id,
                now,
            ),
            now,
        };

        let (accepted, memberships, signal) = match self.store.accept(&command).await {
            Ok(AcceptOutcome::Accepted {
                invitation,
                memberships,
                signal,
            }) => (invitation, memberships, signal),
            Ok(AcceptOutcome::NotActive) => {
                return Err(self.machine.classify_conflict(invitation.id, now).await)
            }
            Err(e) => {
                error!(
                    invitation_id = %invitation.id,
                    error = %e,
                    "Acceptance transaction failed"
                );
                return Err(e.into());
            }
        };

        metrics::record_invitation_accepted();
        info!(
            invitation_id = %accepted.id,
            school_id = %accepted.school_id,
            user_id = %identity.user_id,
            roles = ?accepted.granted_roles,
            "Invitation accepted"
        );

        let onboarding_dispatched = self.dispatch_signal(&signal).await;

        Ok(AcceptanceResult {
            invitation_id: accepted.id,
            school_id: accepted.school_id,
            user_id: identity.user_id,
            memberships,
            onboarding_signal_id: signal.id,
            onboarding_dispatched,
        })
    }

    /// Declines the invitation behind `token`. The reason is optional.
    pub async fn decline(
        &self,
        token: &str,
        reason: Option<String>,
    ) -> Result<Invitation, InvitationError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if reason
            .as_ref()
            .is_some_and(|r| r.chars().count() > MAX_DECLINE_REASON_LENGTH)
        {
            return Err(InvitationError::Validation(format!(
                "Reason must be at most {} characters",
                MAX_DECLINE_REASON_LENGTH
            )));
        }

        let now = Utc::now();
        let invitation = self.tokens.lookup(token).await?;
        self.machine.ensure_open(&invitation, now).await?;

        let declined = self
            .respond(&invitation, Response::Declined { reason }, None, now)
            .await?;
        info!(
            invitation_id = %declined.id,
            school_id = %declined.school_id,
            "Invitation declined"
        );
        Ok(declined)
    }

    /// Cancels the invitation behind `token`. Only the inviter or a school
    /// administrator may cancel.
    pub async fn cancel(&self, token: &str, actor: Uuid) -> Result<Invitation, InvitationError> {
        let now = Utc::now();
        let invitation = self.tokens.lookup(token).await?;

        let actor_is_admin = invitation.invited_by != actor
            && self
                .store
                .is_school_admin(invitation.school_id, actor)
                .await?;
        InvitationStateMachine::authorize_cancel(&invitation, actor, actor_is_admin)?;
        self.machine.ensure_open(&invitation, now).await?;

        let cancelled = self
            .respond(&invitation, Response::Cancelled { by: actor }, Some(actor), now)
            .await?;
        info!(
            invitation_id = %cancelled.id,
            school_id = %cancelled.school_id,
            cancelled_by = %actor,
            "Invitation cancelled"
        );
        Ok(cancelled)
    }

    /// Retries onboarding signals left in the outbox. Returns the number dispatched.
    pub async fn dispatch_pending(&self, limit: i64) -> Result<usize, InvitationError> {
        let pending = self.outbox.pending_signals(limit).await?;
        let mut dispatched = 0;
        for signal in &pending {
            if self.dispatch_signal(signal).await {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn respond(
        &self,
        invitation: &Invitation,
        response: Response,
        responded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Invitation, InvitationError> {
        match self
            .store
            .respond(invitation.id, &response, responded_by, now)
            .await?
        {
            Some(updated) => Ok(updated),
            None => Err(self.machine.classify_conflict(invitation.id, now).await),
        }
    }

    async fn dispatch_signal(&self, signal: &OnboardingSignal) -> bool {
        match self.signaler.begin_onboarding(&signal.request()).await {
            Ok(()) => {
                if let Err(e) = self.outbox.mark_dispatched(signal.id, Utc::now()).await {
                    error!(signal_id = %signal.id, error = %e, "Failed to mark onboarding signal dispatched");
                }
                true
            }
            Err(e) => {
                warn!(
                    signal_id = %signal.id,
                    invitation_id = %signal.invitation_id,
                    error = %e,
                    "Onboarding signal deferred to outbox"
                );
                if let Err(e) = self
                    .outbox
                    .record_dispatch_failure(signal.id, &e.to_string())
                    .await
                {
                    error!(signal_id = %signal.id, error = %e, "Failed to record onboarding failure");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvitationRole, InvitationStatus, MembershipRole, NewInvitation};
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;

    struct Fixture {
        store: Arc<InMemoryInvitationStore>,
        signaler: Arc<MockOnboardingSignaler>,
        orchestrator: AcceptanceOrchestrator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryInvitationStore::new());
        let signaler = Arc::new(MockOnboardingSignaler::new());
        let orchestrator = AcceptanceOrchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(TokenService::new(store.clone(), 3)),
            Arc::new(InvitationStateMachine::new(store.clone())),
            signaler.clone(),
        );
        Fixture {
            store,
            signaler,
            orchestrator,
        }
    }

    async fn seed(store: &InMemoryInvitationStore, role: InvitationRole) -> Invitation {
        let new = NewInvitation {
            email: "tutor@example.com".to_string(),
            school_id: Uuid::new_v4(),
            role,
            invited_by: Uuid::new_v4(),
            message: None,
            batch_id: None,
            expires_at: Utc::now() + Duration::days(7),
        };
        store
            .insert_invitation(&new.with_token(shared::crypto::generate_invitation_token(), Utc::now()))
            .await
            .unwrap()
    }

    fn tutor() -> RespondingIdentity {
        RespondingIdentity {
            user_id: Uuid::new_v4(),
            email: "Tutor@Example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_independent_tutor_gets_both_roles() {
        let f = fixture();
        let inv = seed(&f.store, InvitationRole::IndependentTutor).await;
        let identity = tutor();

        let result = f.orchestrator.accept(&inv.token, &identity).await.unwrap();

        let mut roles: Vec<_> = result.memberships.iter().map(|m| m.role).collect();
        roles.sort_by_key(|r| r.as_str());
        assert_eq!(roles, vec![MembershipRole::PracticeOwner, MembershipRole::Teacher]);
        assert_eq!(f.store.memberships_of(identity.user_id, inv.school_id).len(), 2);
        assert_eq!(f.signaler.received()[0].roles.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_nothing_behind() {
        let f = fixture();
        let inv = seed(&f.store, InvitationRole::Teacher).await;
        let identity = tutor();
        f.store.fail_next_accept();

        let result = f.orchestrator.accept(&inv.token, &identity).await;
        assert!(matches!(result, Err(InvitationError::Store(_))));

        let stored = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
        assert!(f.store.memberships_of(identity.user_id, inv.school_id).is_empty());
        assert!(f.store.signals().is_empty());

        // The invitation is still open, so a retry succeeds.
        assert!(f.orchestrator.accept(&inv.token, &identity).await.is_ok());
    }

    #[tokio::test]
    async fn test_signal_left_in_outbox_is_dispatched_later() {
        let f = fixture();
        let inv = seed(&f.store, InvitationRole::Teacher).await;
        f.signaler.set_failing(true);

        let result = f.orchestrator.accept(&inv.token, &tutor()).await.unwrap();
        assert!(!result.onboarding_dispatched);
        assert!(f.signaler.received().is_empty());

        f.signaler.set_failing(false);
        assert_eq!(f.orchestrator.dispatch_pending(10).await.unwrap(), 1);
        assert_eq!(f.signaler.received().len(), 1);
        assert_eq!(f.orchestrator.dispatch_pending(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decline_rejects_long_reason() {
        let f = fixture();
        let inv = seed(&f.store, InvitationRole::Teacher).await;
        let reason = "x".repeat(MAX_DECLINE_REASON_LENGTH + 1);

        let result = f.orchestrator.decline(&inv.token, Some(reason)).await;
        assert!(matches!(result, Err(InvitationError::Validation(_))));

        let declined = f.orchestrator.decline(&inv.token, Some("  ".into())).await.unwrap();
        assert_eq!(declined.status, InvitationStatus::Declined);
        assert!(declined.decline_reason.is_none());
    }

    #[tokio::test]
    async fn test_cancel_requires_inviter_or_admin() {
        let f = fixture();
        let inv = seed(&f.store, InvitationRole::Teacher).await;

        let stranger = f.orchestrator.cancel(&inv.token, Uuid::new_v4()).await;
        assert!(matches!(stranger, Err(InvitationError::NotPermitted(_))));

        let admin = Uuid::new_v4();
        f.store.seed_admin(inv.school_id, admin);
        let cancelled = f.orchestrator.cancel(&inv.token, admin).await.unwrap();
        assert_eq!(cancelled.status, InvitationStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(admin));

        let again = f.orchestrator.cancel(&inv.token, inv.invited_by).await;
        assert!(matches!(again, Err(InvitationError::AlreadyResponded)));
    }
}
