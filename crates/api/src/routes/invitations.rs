//! Invitation routes.
//!
//! Creation, bulk creation, listing, resend, and cancel require a bearer
//! token. Viewing and declining are public: the invitation token itself is the
//! credential. Accepting requires a bearer token whose verified email matches
//! the invitation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::invitation::{
    CreateInvitationRequest, CreateInvitationResponse, DeclineInvitationRequest,
    InvitationResponse, InvitationView, ListInvitationsQuery, ListInvitationsResponse,
};
use domain::models::{AcceptanceResult, BatchResult, BulkInvitationRequest, DeliveryResult};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{ClientAddr, UserAuth};

/// POST /api/v1/invitations
pub async fn create_invitation(
    State(state): State<AppState>,
    auth: UserAuth,
    ClientAddr(addr): ClientAddr,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreateInvitationResponse>), ApiError> {
    request.validate()?;

    let response = state.engine.create(auth.user_id, &addr, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/invitations/bulk
pub async fn create_bulk_invitations(
    State(state): State<AppState>,
    auth: UserAuth,
    ClientAddr(addr): ClientAddr,
    Json(request): Json<BulkInvitationRequest>,
) -> Result<(StatusCode, Json<BatchResult>), ApiError> {
    // Size and per-item checks happen in the engine so oversized batches
    // surface as BatchTooLarge and item errors stay per item.
    let result = state
        .engine
        .create_bulk(auth.user_id, &addr, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/v1/invitations/:token
pub async fn view_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<InvitationView>, ApiError> {
    Ok(Json(state.engine.view(&token).await?))
}

/// POST /api/v1/invitations/:token/accept
pub async fn accept_invitation(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(token): Path<String>,
) -> Result<Json<AcceptanceResult>, ApiError> {
    let result = state.engine.accept(&token, &auth.identity()).await?;
    Ok(Json(result))
}

/// POST /api/v1/invitations/:token/decline
pub async fn decline_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<Json<DeclineInvitationRequest>>,
) -> Result<Json<InvitationResponse>, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    request.validate()?;

    let reason = request
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let invitation = state.engine.decline(&token, reason).await?;
    Ok(Json(InvitationResponse::from(&invitation)))
}

/// POST /api/v1/invitations/:token/resend
pub async fn resend_invitation(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(token): Path<String>,
) -> Result<Json<DeliveryResult>, ApiError> {
    Ok(Json(state.engine.resend(&token, auth.user_id).await?))
}

/// POST /api/v1/invitations/:token/cancel
pub async fn cancel_invitation(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(token): Path<String>,
) -> Result<Json<InvitationResponse>, ApiError> {
    let invitation = state.engine.cancel(&token, auth.user_id).await?;
    Ok(Json(InvitationResponse::from(&invitation)))
}

/// GET /api/v1/schools/:school_id/invitations
pub async fn list_school_invitations(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(school_id): Path<Uuid>,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Json<ListInvitationsResponse>, ApiError> {
    let page = state
        .engine
        .list_for_school(school_id, auth.user_id, &query)
        .await?;
    Ok(Json(page))
}
