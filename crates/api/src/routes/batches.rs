//! Batch summary route.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::models::BatchSummary;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

/// GET /api/v1/batches/:batch_id
///
/// Counts are derived from the batch's invitations at read time.
pub async fn get_batch(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchSummary>, ApiError> {
    Ok(Json(state.engine.batch_summary(batch_id, auth.user_id).await?))
}
