//! Mail provider status callbacks.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use domain::models::{DeliveryEvent, DeliveryResult};
use shared::crypto::verify_hmac_sha256;
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;

/// Header carrying `sha256=<hex>` HMAC of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// POST /api/v1/delivery-events
///
/// The body is verified against `security.delivery_callback_secret` before it
/// is parsed.
pub async fn record_delivery_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryResult>, ApiError> {
    let secret = &state.config.security.delivery_callback_secret;
    if secret.is_empty() {
        return Err(ApiError::ServiceUnavailable(
            "Delivery callbacks are not configured".to_string(),
        ));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing signature".to_string()))?;

    if !verify_hmac_sha256(secret, &body, signature) {
        warn!(security_event = true, "Rejected delivery callback with bad signature");
        return Err(ApiError::Unauthorized("Invalid signature".to_string()));
    }

    let event: DeliveryEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid delivery event: {}", e)))?;

    Ok(Json(state.engine.record_delivery_event(event).await?))
}
