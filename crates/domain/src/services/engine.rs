//! The invitation lifecycle engine.
//!
//! Wires the components together and exposes the operations the HTTP layer
//! and background jobs call.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::acceptance::{AcceptanceOrchestrator, OnboardingSignaler};
use super::bulk::BulkInvitationProcessor;
use super::delivery::{DeliveryTracker, MailTransport, DEFAULT_TEMPLATE_ID};
use super::issuance::{expiry_for, InvitationIssuer, IssueCommand};
use super::rate_limiter::{
    RateLimitStore, RateLimiter, DEFAULT_PER_ACTOR_PER_HOUR, DEFAULT_PER_ADDRESS_PER_HOUR,
};
use super::state_machine::InvitationStateMachine;
use super::store::{InvitationStore, ListPosition, OnboardingOutbox};
use super::token::{TokenService, DEFAULT_TOKEN_ATTEMPTS};
use crate::errors::{InvitationError, StoreError};
use crate::models::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::models::invitation::{
    CreateInvitationRequest, CreateInvitationResponse, InvitationResponse, InvitationView,
    ListInvitationsQuery, ListInvitationsResponse, DEFAULT_EXPIRATION_DAYS,
};
use crate::models::{
    AcceptanceResult, BatchResult, BatchSummary, BulkInvitationRequest, DeliveryEvent,
    DeliveryResult, Invitation, InvitationStatus, RateLimitRule, RespondingIdentity, RetryPolicy,
};
use shared::pagination::PageCursor;

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub expiry_days: i64,
    pub max_batch_size: usize,
    pub token_attempts: u32,
    /// Hours after a decline before the same tuple can be re-invited. Zero disables.
    pub reinvite_cooldown_hours: i64,
    pub per_actor: RateLimitRule,
    pub per_address: RateLimitRule,
    pub retry_policy: RetryPolicy,
    /// Base URL of the recipient-facing site; tokens are appended to it.
    pub invite_base_url: String,
    pub mail_template_id: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            expiry_days: DEFAULT_EXPIRATION_DAYS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            token_attempts: DEFAULT_TOKEN_ATTEMPTS,
            reinvite_cooldown_hours: 0,
            per_actor: RateLimitRule::per_hour(DEFAULT_PER_ACTOR_PER_HOUR),
            per_address: RateLimitRule::per_hour(DEFAULT_PER_ADDRESS_PER_HOUR),
            retry_policy: RetryPolicy::default(),
            invite_base_url: "http://localhost:3000".to_string(),
            mail_template_id: DEFAULT_TEMPLATE_ID.to_string(),
        }
    }
}

/// External collaborators and storage backends.
#[derive(Clone)]
pub struct EngineCollaborators {
    pub store: Arc<dyn InvitationStore>,
    pub outbox: Arc<dyn OnboardingOutbox>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub mail: Arc<dyn MailTransport>,
    pub onboarding: Arc<dyn OnboardingSignaler>,
}

pub struct InvitationEngine {
    settings: EngineSettings,
    store: Arc<dyn InvitationStore>,
    tokens: Arc<TokenService>,
    machine: Arc<InvitationStateMachine>,
    delivery: Arc<DeliveryTracker>,
    rate_limiter: Arc<RateLimiter>,
    issuer: Arc<InvitationIssuer>,
    bulk: BulkInvitationProcessor,
    acceptance: AcceptanceOrchestrator,
}

impl InvitationEngine {
    pub fn new(settings: EngineSettings, collaborators: EngineCollaborators) -> Self {
        let EngineCollaborators {
            store,
            outbox,
            rate_limits,
            mail,
            onboarding,
        } = collaborators;

        let tokens = Arc::new(TokenService::new(store.clone(), settings.token_attempts));
        let machine = Arc::new(InvitationStateMachine::new(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            rate_limits,
            settings.per_actor,
            settings.per_address,
        ));
        let delivery = Arc::new(
            DeliveryTracker::new(
                store.clone(),
                mail,
                settings.retry_policy,
                settings.invite_base_url.clone(),
            )
            .with_template(settings.mail_template_id.clone()),
        );
        let issuer = Arc::new(InvitationIssuer::new(
            store.clone(),
            rate_limiter.clone(),
            tokens.clone(),
            delivery.clone(),
            Duration::hours(settings.reinvite_cooldown_hours),
        ));
        let bulk = BulkInvitationProcessor::new(
            store.clone(),
            issuer.clone(),
            settings.max_batch_size,
            settings.expiry_days,
        );
        let acceptance = AcceptanceOrchestrator::new(
            store.clone(),
            outbox,
            tokens.clone(),
            machine.clone(),
            onboarding,
        );

        Self {
            settings,
            store,
            tokens,
            machine,
            delivery,
            rate_limiter,
            issuer,
            bulk,
            acceptance,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Creates and dispatches one invitation.
    pub async fn create(
        &self,
        actor: Uuid,
        source_addr: &str,
        request: CreateInvitationRequest,
    ) -> Result<CreateInvitationResponse, InvitationError> {
        let expires_at = expiry_for(Utc::now(), request.expires_in_days, self.settings.expiry_days)?;
        self.issuer
            .authorize_inviter(actor, request.school_id)
            .await?;

        let issued = self
            .issuer
            .issue(
                actor,
                source_addr,
                IssueCommand {
                    email: request.email,
                    school_id: request.school_id,
                    role: request.role,
                    message: request.message,
                    batch_id: None,
                    expires_at,
                },
            )
            .await?;

        let inv = issued.invitation;
        Ok(CreateInvitationResponse {
            id: inv.id,
            invite_url: self.delivery.invite_url(&inv.token),
            email: inv.email,
            school_id: inv.school_id,
            role: inv.role,
            status: inv.status,
            token: inv.token,
            expires_at: inv.expires_at,
            created_at: inv.created_at,
            delivery_status: inv.delivery_status,
            delivery_failed_permanently: inv.delivery_failed_permanently,
        })
    }

    /// Creates a batch of invitations.
    pub async fn create_bulk(
        &self,
        actor: Uuid,
        source_addr: &str,
        request: &BulkInvitationRequest,
    ) -> Result<BatchResult, InvitationError> {
        self.bulk.submit(actor, source_addr, request).await
    }

    /// Display fields for the holder of `token`, as they were before this view.
    /// Marks the invitation viewed.
    pub async fn view(&self, token: &str) -> Result<InvitationView, InvitationError> {
        let now = Utc::now();
        let invitation = self.tokens.lookup(token).await?;
        if invitation.status.is_active() {
            self.machine.ensure_open(&invitation, now).await?;
            self.machine.mark_viewed(&invitation, now).await?;
        } else if invitation.status == InvitationStatus::Expired {
            return Err(InvitationError::TokenExpired);
        }

        let school = self
            .store
            .find_school(invitation.school_id)
            .await?
            .ok_or(InvitationError::SchoolNotFound)?;

        Ok(InvitationView {
            status: invitation.status,
            email: invitation.email,
            school_id: school.id,
            school_name: school.name,
            role: invitation.role,
            granted_roles: invitation.granted_roles,
            expires_at: invitation.expires_at,
            message: invitation.message,
        })
    }

    pub async fn accept(
        &self,
        token: &str,
        identity: &RespondingIdentity,
    ) -> Result<AcceptanceResult, InvitationError> {
        self.acceptance.accept(token, identity).await
    }

    pub async fn decline(
        &self,
        token: &str,
        reason: Option<String>,
    ) -> Result<Invitation, InvitationError> {
        self.acceptance.decline(token, reason).await
    }

    pub async fn cancel(&self, token: &str, actor: Uuid) -> Result<Invitation, InvitationError> {
        self.acceptance.cancel(token, actor).await
    }

    /// Re-dispatches an unexpired, non-terminal invitation after clearing its
    /// delivery failure state. Inviter or school administrator only.
    pub async fn resend(&self, token: &str, actor: Uuid) -> Result<DeliveryResult, InvitationError> {
        let invitation = self.tokens.lookup(token).await?;
        if invitation.invited_by != actor
            && !self
                .store
                .is_school_admin(invitation.school_id, actor)
                .await?
        {
            return Err(InvitationError::NotPermitted(
                "Only the inviter or a school administrator can resend an invitation".to_string(),
            ));
        }
        self.machine.ensure_open(&invitation, Utc::now()).await?;
        self.delivery.resend(&invitation).await
    }

    pub async fn batch_summary(
        &self,
        batch_id: Uuid,
        actor: Uuid,
    ) -> Result<BatchSummary, InvitationError> {
        self.bulk.batch_summary(batch_id, actor).await
    }

    /// One page of a school's invitations, newest first. Administrators only.
    pub async fn list_for_school(
        &self,
        school_id: Uuid,
        actor: Uuid,
        query: &ListInvitationsQuery,
    ) -> Result<ListInvitationsResponse, InvitationError> {
        if self.store.find_school(school_id).await?.is_none() {
            return Err(InvitationError::SchoolNotFound);
        }
        if !self.store.is_school_admin(school_id, actor).await? {
            return Err(InvitationError::NotPermitted(
                "Only school administrators can list invitations".to_string(),
            ));
        }

        let after = match query.cursor.as_deref() {
            Some(cursor) => {
                let position = PageCursor::decode(cursor)
                    .map_err(|e| InvitationError::Validation(e.to_string()))?;
                Some(ListPosition {
                    created_at: position.created_at,
                    id: position.id,
                })
            }
            None => None,
        };
        let limit = query.limit();
        let mut rows = self
            .store
            .list_by_school(school_id, query.status, after, limit + 1)
            .await?;

        let next_cursor = if rows.len() as i64 > limit {
            rows.truncate(limit as usize);
            rows.last()
                .map(|last| PageCursor::new(last.created_at, last.id).encode())
        } else {
            None
        };

        Ok(ListInvitationsResponse {
            invitations: rows.iter().map(InvitationResponse::from).collect(),
            next_cursor,
        })
    }

    /// Applies a delivery status callback from the mail provider.
    pub async fn record_delivery_event(
        &self,
        event: DeliveryEvent,
    ) -> Result<DeliveryResult, InvitationError> {
        self.delivery
            .record_status(event.invitation_id, event.status, event.error)
            .await
    }

    /// Flips overdue active invitations to expired.
    pub async fn expire_overdue(&self, limit: i64) -> Result<u64, InvitationError> {
        let expired = self.store.expire_overdue(Utc::now(), limit).await?;
        if expired > 0 {
            info!(expired, "Expired overdue invitations");
        }
        Ok(expired)
    }

    /// Drops rate-limit counters whose window has closed.
    pub async fn purge_rate_limits(&self) -> Result<u64, InvitationError> {
        self.rate_limiter.purge_expired(Utc::now()).await
    }

    /// Re-dispatches invitations whose retry is due.
    pub async fn retry_deliveries(&self, limit: i64) -> Result<usize, InvitationError> {
        self.delivery.retry_due(limit).await
    }

    /// Dispatches onboarding signals still waiting in the outbox.
    pub async fn dispatch_onboarding(&self, limit: i64) -> Result<usize, InvitationError> {
        self.acceptance.dispatch_pending(limit).await
    }
}
