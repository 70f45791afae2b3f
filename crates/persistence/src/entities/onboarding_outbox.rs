//! Onboarding outbox entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::OnboardingSignal;
use domain::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

use super::invitation::parse_roles;

/// Database row mapping for the onboarding_outbox table.
#[derive(Debug, Clone, FromRow)]
pub struct OnboardingOutboxEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub roles: Vec<String>,
    pub invitation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl TryFrom<OnboardingOutboxEntity> for OnboardingSignal {
    type Error = StoreError;

    fn try_from(e: OnboardingOutboxEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: e.id,
            user_id: e.user_id,
            school_id: e.school_id,
            roles: parse_roles(&e.roles)?,
            invitation_id: e.invitation_id,
            created_at: e.created_at,
            dispatched_at: e.dispatched_at,
            attempts: e.attempts,
            last_error: e.last_error,
        })
    }
}
