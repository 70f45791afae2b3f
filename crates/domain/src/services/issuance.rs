//! Per-recipient invitation pipeline shared by single and bulk creation.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::delivery::DeliveryTracker;
use super::rate_limiter::RateLimiter;
use super::store::InvitationStore;
use super::token::TokenService;
use crate::errors::InvitationError;
use crate::metrics;
use crate::models::invitation::{MAX_EXPIRATION_DAYS, MIN_EXPIRATION_DAYS};
use crate::models::{DeliveryResult, Invitation, InvitationRole, NewInvitation, School};
use shared::validation::{normalize_email, validate_email_address, validate_invitation_message};

/// Expiry instant for an invitation created at `now`.
pub fn expiry_for(
    now: DateTime<Utc>,
    requested_days: Option<i64>,
    default_days: i64,
) -> Result<DateTime<Utc>, InvitationError> {
    let days = requested_days.unwrap_or(default_days);
    if !(MIN_EXPIRATION_DAYS..=MAX_EXPIRATION_DAYS).contains(&days) {
        return Err(InvitationError::Validation(format!(
            "Expiration must be between {} and {} days",
            MIN_EXPIRATION_DAYS, MAX_EXPIRATION_DAYS
        )));
    }
    Ok(now + Duration::days(days))
}

/// One recipient to invite.
#[derive(Debug, Clone)]
pub struct IssueCommand {
    pub email: String,
    pub school_id: Uuid,
    pub role: InvitationRole,
    pub message: Option<String>,
    pub batch_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// A persisted invitation and the outcome of its first dispatch.
#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub delivery: Option<DeliveryResult>,
}

/// Runs RateLimiter, TokenService, InvitationStore, and DeliveryTracker for one recipient.
pub struct InvitationIssuer {
    store: Arc<dyn InvitationStore>,
    rate_limiter: Arc<RateLimiter>,
    tokens: Arc<TokenService>,
    delivery: Arc<DeliveryTracker>,
    reinvite_cooldown: Duration,
}

impl InvitationIssuer {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        rate_limiter: Arc<RateLimiter>,
        tokens: Arc<TokenService>,
        delivery: Arc<DeliveryTracker>,
        reinvite_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            tokens,
            delivery,
            reinvite_cooldown,
        }
    }

    /// Checks that `actor` may invite people to `school_id`.
    pub async fn authorize_inviter(
        &self,
        actor: Uuid,
        school_id: Uuid,
    ) -> Result<School, InvitationError> {
        let school = self
            .store
            .find_school(school_id)
            .await?
            .ok_or(InvitationError::SchoolNotFound)?;
        if !self.store.is_school_admin(school_id, actor).await? {
            return Err(InvitationError::NotPermitted(
                "Only school administrators can invite members".to_string(),
            ));
        }
        Ok(school)
    }

    /// Validates, rate-limits, persists, and dispatches one invitation.
    ///
    /// Delivery problems are recorded on the invitation and never fail the create.
    pub async fn issue(
        &self,
        actor: Uuid,
        source_addr: &str,
        command: IssueCommand,
    ) -> Result<IssuedInvitation, InvitationError> {
        let now = Utc::now();

        validate_email_address(&command.email).map_err(|e| {
            InvitationError::InvalidEmail(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| command.email.clone()),
            )
        })?;
        let email = normalize_email(&command.email);

        let message = command
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if let Some(ref message) = message {
            validate_invitation_message(message).map_err(|e| {
                InvitationError::Validation(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Invalid message".to_string()),
                )
            })?;
        }
        if command.expires_at <= now {
            return Err(InvitationError::Validation(
                "Expiry must be in the future".to_string(),
            ));
        }

        self.check_cooldown(&email, command.school_id, command.role, now)
            .await?;
        self.rate_limiter.allow_request(actor, source_addr).await?;

        let new = NewInvitation {
            email,
            school_id: command.school_id,
            role: command.role,
            invited_by: actor,
            message,
            batch_id: command.batch_id,
            expires_at: command.expires_at,
        };
        let invitation = self.tokens.persist(&new, now).await?;
        metrics::record_invitation_created(if invitation.batch_id.is_some() {
            "bulk"
        } else {
            "single"
        });
        info!(
            invitation_id = %invitation.id,
            school_id = %invitation.school_id,
            batch_id = ?invitation.batch_id,
            role = %invitation.role,
            invited_by = %actor,
            "Invitation created"
        );

        let delivery = match self.delivery.dispatch(&invitation).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(invitation_id = %invitation.id, error = %e, "Initial dispatch failed");
                None
            }
        };
        let invitation = self
            .store
            .find_by_id(invitation.id)
            .await?
            .unwrap_or(invitation);

        Ok(IssuedInvitation {
            invitation,
            delivery,
        })
    }

    async fn check_cooldown(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
        now: DateTime<Utc>,
    ) -> Result<(), InvitationError> {
        if self.reinvite_cooldown <= Duration::zero() {
            return Ok(());
        }
        if let Some(declined_at) = self.store.last_declined_at(email, school_id, role).await? {
            let available_at = declined_at + self.reinvite_cooldown;
            if now < available_at {
                return Err(InvitationError::Validation(format!(
                    "Recipient declined recently; they can be re-invited after {}",
                    available_at.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}
