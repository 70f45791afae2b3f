//! Onboarding signal models.
//!
//! Acceptance writes an [`OnboardingSignal`] in the same transaction that grants
//! the membership. The signal is handed to the profile-completion collaborator
//! after commit and retried by a background job until it is dispatched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::membership::MembershipRole;

/// Outbox row asking the onboarding collaborator to start profile completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingSignal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub roles: Vec<MembershipRole>,
    pub invitation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OnboardingSignal {
    pub fn new(
        user_id: Uuid,
        school_id: Uuid,
        roles: Vec<MembershipRole>,
        invitation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            school_id,
            roles,
            invitation_id,
            created_at: now,
            dispatched_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Payload sent to the collaborator.
    pub fn request(&self) -> OnboardingRequest {
        OnboardingRequest {
            signal_id: self.id,
            user_id: self.user_id,
            school_id: self.school_id,
            roles: self.roles.clone(),
            invitation_id: self.invitation_id,
        }
    }
}

/// "Begin onboarding for (identity, school, roles)".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OnboardingRequest {
    pub signal_id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub roles: Vec<MembershipRole>,
    pub invitation_id: Uuid,
}
