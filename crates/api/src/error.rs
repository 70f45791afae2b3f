use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::errors::ErrorDetail;
use domain::InvitationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Invitation(#[from] InvitationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// HTTP status for an engine error.
pub fn invitation_status(err: &InvitationError) -> StatusCode {
    match err {
        InvitationError::TokenInvalid
        | InvitationError::SchoolNotFound
        | InvitationError::BatchNotFound => StatusCode::NOT_FOUND,
        InvitationError::TokenExpired => StatusCode::GONE,
        InvitationError::AlreadyResponded
        | InvitationError::DuplicateActiveInvitation { .. }
        | InvitationError::DeliveryFailedPermanently => StatusCode::CONFLICT,
        InvitationError::IdentityMismatch | InvitationError::NotPermitted(_) => {
            StatusCode::FORBIDDEN
        }
        InvitationError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        InvitationError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        InvitationError::InvalidEmail(_) | InvitationError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        InvitationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn simple_detail(error: &str, message: String) -> ErrorDetail {
    ErrorDetail {
        error: error.to_string(),
        message,
        retry_after: None,
        existing_invitation_id: None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Invitation(err) => {
                if let InvitationError::Store(store) = err {
                    tracing::error!(error = %store, "Invitation store failure");
                }
                (invitation_status(err), err.detail())
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                simple_detail("unauthorized", msg.clone()),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                simple_detail("not_found", msg.clone()),
            ),
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                simple_detail("validation_error", msg.clone()),
            ),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    simple_detail("internal_error", "An internal error occurred".into()),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                simple_detail("service_unavailable", msg.clone()),
            ),
        };

        let retry_after = body.retry_after;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();

        let message = match messages.as_slice() {
            [single] => single.clone(),
            _ => format!("{} validation errors", messages.len()),
        };

        ApiError::Validation(message)
    }
}
