//! Common validation utilities.

use validator::{ValidateEmail, ValidationError};

/// Maximum length of an email address accepted for invitations.
pub const MAX_EMAIL_LENGTH: usize = 255;

/// Maximum length of a custom invitation message.
pub const MAX_INVITATION_MESSAGE_LENGTH: usize = 1000;

/// Maximum length of a decline reason.
pub const MAX_DECLINE_REASON_LENGTH: usize = 500;

/// Normalises an email address for storage and comparison.
///
/// Trims surrounding whitespace and lowercases the whole address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Returns true if two addresses refer to the same mailbox after normalisation.
pub fn emails_match(a: &str, b: &str) -> bool {
    normalize_email(a) == normalize_email(b)
}

/// Validates an email address (after trimming).
pub fn validate_email_address(email: &str) -> Result<(), ValidationError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("email_required");
        err.message = Some("Email address is required".into());
        return Err(err);
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        let mut err = ValidationError::new("email_length");
        err.message = Some("Email must be at most 255 characters".into());
        return Err(err);
    }
    if !trimmed.validate_email() {
        let mut err = ValidationError::new("email_format");
        err.message = Some("Invalid email address".into());
        return Err(err);
    }
    Ok(())
}

/// Validates the optional custom message attached to an invitation.
pub fn validate_invitation_message(message: &str) -> Result<(), ValidationError> {
    if message.chars().count() > MAX_INVITATION_MESSAGE_LENGTH {
        let mut err = ValidationError::new("message_length");
        err.message = Some("Message must be at most 1000 characters".into());
        return Err(err);
    }
    Ok(())
}
