//! Invitation domain models.
//!
//! An invitation is a single offer to join a school in a given role. The same
//! record carries its lifecycle status and its delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::delivery::DeliveryStatus;
use super::membership::MembershipRole;

/// Default expiration days for invitations.
pub const DEFAULT_EXPIRATION_DAYS: i64 = 7;

/// Maximum expiration days for invitations.
pub const MAX_EXPIRATION_DAYS: i64 = 30;

/// Minimum expiration days for invitations.
pub const MIN_EXPIRATION_DAYS: i64 = 1;

/// Lifecycle status of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Sent,
    Delivered,
    Viewed,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    /// Statuses counted by the active-invitation uniqueness rule.
    pub const ACTIVE: [InvitationStatus; 4] = [
        InvitationStatus::Pending,
        InvitationStatus::Sent,
        InvitationStatus::Delivered,
        InvitationStatus::Viewed,
    ];

    pub const ALL: [InvitationStatus; 8] = [
        InvitationStatus::Pending,
        InvitationStatus::Sent,
        InvitationStatus::Delivered,
        InvitationStatus::Viewed,
        InvitationStatus::Accepted,
        InvitationStatus::Declined,
        InvitationStatus::Expired,
        InvitationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Sent => "sent",
            InvitationStatus::Delivered => "delivered",
            InvitationStatus::Viewed => "viewed",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown invitation status: {}", s))
    }
}

/// Role offered by an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationRole {
    Teacher,
    Admin,
    IndependentTutor,
}

impl InvitationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRole::Teacher => "teacher",
            InvitationRole::Admin => "admin",
            InvitationRole::IndependentTutor => "independent_tutor",
        }
    }

    /// Membership roles granted when an offer of this role is accepted.
    pub fn granted_roles(&self) -> Vec<MembershipRole> {
        match self {
            InvitationRole::Teacher => vec![MembershipRole::Teacher],
            InvitationRole::Admin => vec![MembershipRole::Admin],
            InvitationRole::IndependentTutor => {
                vec![MembershipRole::PracticeOwner, MembershipRole::Teacher]
            }
        }
    }
}

impl fmt::Display for InvitationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(InvitationRole::Teacher),
            "admin" => Ok(InvitationRole::Admin),
            "independent_tutor" => Ok(InvitationRole::IndependentTutor),
            other => Err(format!("Unknown invitation role: {}", other)),
        }
    }
}

/// A persisted invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: Uuid,
    pub token: String,
    pub email: String,
    pub school_id: Uuid,
    pub role: InvitationRole,
    pub granted_roles: Vec<MembershipRole>,
    pub invited_by: Uuid,
    pub message: Option<String>,
    pub batch_id: Option<Uuid>,
    pub status: InvitationStatus,
    pub delivery_status: Option<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<Uuid>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_delivery_error: Option<String>,
    pub delivery_failed_permanently: bool,
    pub decline_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
}

impl Invitation {
    /// Whether the invitation is past its expiry instant at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the invitation can still be responded to at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && !self.is_past_expiry(now)
    }
}

/// Data for inserting a new invitation. The token is assigned at insert time.
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub school_id: Uuid,
    pub role: InvitationRole,
    pub invited_by: Uuid,
    pub message: Option<String>,
    pub batch_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl NewInvitation {
    /// Attaches a token, producing the full insert row.
    pub fn with_token(&self, token: String, now: DateTime<Utc>) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            token,
            email: self.email.clone(),
            school_id: self.school_id,
            role: self.role,
            granted_roles: self.role.granted_roles(),
            invited_by: self.invited_by,
            message: self.message.clone(),
            batch_id: self.batch_id,
            status: InvitationStatus::Pending,
            delivery_status: None,
            created_at: now,
            expires_at: self.expires_at,
            viewed_at: None,
            responded_at: None,
            responded_by: None,
            retry_count: 0,
            next_retry_at: None,
            last_delivery_error: None,
            delivery_failed_permanently: false,
            decline_reason: None,
            cancelled_by: None,
        }
    }
}

/// Request to create a single invitation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateInvitationRequest {
    /// School the recipient is invited to.
    pub school_id: Uuid,

    /// Email address of the invitee.
    #[validate(length(min = 1, max = 255, message = "Email must be 1-255 characters"))]
    pub email: String,

    /// Role offered to the invitee.
    pub role: InvitationRole,

    /// Optional personal message shown on the invitation page.
    #[validate(length(max = 1000, message = "Message must be at most 1000 characters"))]
    pub message: Option<String>,

    /// Days until expiration (1-30, default: 7).
    #[validate(range(
        min = 1,
        max = 30,
        message = "Expiration must be between 1 and 30 days"
    ))]
    pub expires_in_days: Option<i64>,
}

/// Response after creating an invitation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateInvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub school_id: Uuid,
    pub role: InvitationRole,
    pub status: InvitationStatus,
    pub token: String,
    pub invite_url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    pub delivery_failed_permanently: bool,
}

/// Public view of an invitation, shown to whoever holds the token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationView {
    pub status: InvitationStatus,
    pub email: String,
    pub school_id: Uuid,
    pub school_name: String,
    pub role: InvitationRole,
    pub granted_roles: Vec<MembershipRole>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Invitation as seen by school administrators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub school_id: Uuid,
    pub role: InvitationRole,
    pub status: InvitationStatus,
    pub invited_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    pub delivery_failed_permanently: bool,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

impl From<&Invitation> for InvitationResponse {
    fn from(inv: &Invitation) -> Self {
        Self {
            id: inv.id,
            email: inv.email.clone(),
            school_id: inv.school_id,
            role: inv.role,
            status: inv.status,
            invited_by: inv.invited_by,
            batch_id: inv.batch_id,
            delivery_status: inv.delivery_status,
            delivery_failed_permanently: inv.delivery_failed_permanently,
            retry_count: inv.retry_count,
            created_at: inv.created_at,
            expires_at: inv.expires_at,
            viewed_at: inv.viewed_at,
            responded_at: inv.responded_at,
            decline_reason: inv.decline_reason.clone(),
        }
    }
}

/// Request to decline an invitation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct DeclineInvitationRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

/// Query parameters for listing a school's invitations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListInvitationsQuery {
    /// Filter by status (default: all statuses).
    pub status: Option<InvitationStatus>,

    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,

    /// Items per page (default: 50, max: 100).
    pub limit: Option<i64>,
}

impl ListInvitationsQuery {
    /// Get items per page (clamped to 1-100).
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }
}

/// One page of invitations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListInvitationsResponse {
    pub invitations: Vec<InvitationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
