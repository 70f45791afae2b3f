//! Repository implementations for database operations.
//!
//! Each repository implements one of the storage traits the invitation
//! engine is written against.

pub mod invitation;
pub mod onboarding_outbox;
pub mod rate_limit;

pub use invitation::InvitationRepository;
pub use onboarding_outbox::OnboardingOutboxRepository;
pub use rate_limit::RateLimitRepository;

use domain::StoreError;

const UNIQUE_VIOLATION: &str = "23505";

/// Maps a sqlx error onto the engine's store error, keeping the name of a
/// violated unique constraint.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or_default().to_string(),
            }
        }
        _ => StoreError::Database(err.to_string()),
    }
}
