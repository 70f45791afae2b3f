//! Error taxonomy for the invitation lifecycle engine.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write. Carries the constraint name so
    /// callers can tell token collisions from duplicate active invitations.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),
}

/// Errors surfaced by the invitation engine.
#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("Invitation token is invalid")]
    TokenInvalid,

    #[error("Invitation has expired")]
    TokenExpired,

    #[error("Invitation has already been responded to")]
    AlreadyResponded,

    #[error("Signed-in account does not match the invited email address")]
    IdentityMismatch,

    #[error("Rate limit exceeded, retry in {retry_after_secs} seconds")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("An active invitation already exists for this recipient")]
    DuplicateActiveInvitation { existing_invitation_id: Uuid },

    #[error("Batch of {got} recipients exceeds the maximum of {max}")]
    BatchTooLarge { max: usize, got: usize },

    #[error("Delivery failed permanently, resend the invitation")]
    DeliveryFailedPermanently,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("School not found")]
    SchoolNotFound,

    #[error("Batch not found")]
    BatchNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InvitationError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            InvitationError::TokenInvalid => "token_invalid",
            InvitationError::TokenExpired => "token_expired",
            InvitationError::AlreadyResponded => "already_responded",
            InvitationError::IdentityMismatch => "identity_mismatch",
            InvitationError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            InvitationError::DuplicateActiveInvitation { .. } => "duplicate_active_invitation",
            InvitationError::BatchTooLarge { .. } => "batch_too_large",
            InvitationError::DeliveryFailedPermanently => "delivery_failed_permanently",
            InvitationError::InvalidEmail(_) => "invalid_email",
            InvitationError::Validation(_) => "validation_error",
            InvitationError::NotPermitted(_) => "not_permitted",
            InvitationError::SchoolNotFound => "school_not_found",
            InvitationError::BatchNotFound => "batch_not_found",
            InvitationError::Store(_) => "store_error",
        }
    }

    /// Seconds the caller should wait before retrying, when retrying can help.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            InvitationError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Existing invitation that blocked a create, if any.
    pub fn existing_invitation_id(&self) -> Option<Uuid> {
        match self {
            InvitationError::DuplicateActiveInvitation {
                existing_invitation_id,
            } => Some(*existing_invitation_id),
            _ => None,
        }
    }

    /// Message safe to show to callers. Store details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            InvitationError::Store(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Serializable form, used for per-recipient bulk results.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            error: self.kind().to_string(),
            message: self.public_message(),
            retry_after: self.retry_after_secs(),
            existing_invitation_id: self.existing_invitation_id(),
        }
    }
}

/// Wire shape of an engine error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_invitation_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(InvitationError::TokenInvalid.kind(), "token_invalid");
        assert_eq!(InvitationError::TokenExpired.kind(), "token_expired");
        assert_eq!(
            InvitationError::BatchTooLarge { max: 100, got: 101 }.kind(),
            "batch_too_large"
        );
        assert_eq!(
            InvitationError::Store(StoreError::NotFound).kind(),
            "store_error"
        );
    }

    #[test]
    fn test_retry_hint_only_for_rate_limit() {
        let err = InvitationError::RateLimitExceeded {
            retry_after_secs: 42,
        };
        assert_eq!(err.retry_after_secs(), Some(42));
        assert_eq!(InvitationError::TokenExpired.retry_after_secs(), None);
    }

    #[test]
    fn test_detail_includes_existing_invitation() {
        let id = Uuid::new_v4();
        let detail = InvitationError::DuplicateActiveInvitation {
            existing_invitation_id: id,
        }
        .detail();

        assert_eq!(detail.error, "duplicate_active_invitation");
        assert_eq!(detail.existing_invitation_id, Some(id));
        let json = serde_json::to_value(&detail).unwrap();
        assert!(json.get("retry_after").is_none());
    }

    #[test]
    fn test_store_error_message_is_hidden() {
        let err = InvitationError::Store(StoreError::Database("connection refused".into()));
        assert_eq!(err.public_message(), "An internal error occurred");
    }

    #[test]
    fn test_batch_too_large_message() {
        let err = InvitationError::BatchTooLarge { max: 100, got: 150 };
        assert_eq!(
            err.to_string(),
            "Batch of 150 recipients exceeds the maximum of 100"
        );
    }
}
