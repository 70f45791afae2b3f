//! School membership models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role held by a member of a school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Teacher,
    Admin,
    PracticeOwner,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Teacher => "teacher",
            MembershipRole::Admin => "admin",
            MembershipRole::PracticeOwner => "practice_owner",
        }
    }
}

impl fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(MembershipRole::Teacher),
            "admin" => Ok(MembershipRole::Admin),
            "practice_owner" => Ok(MembershipRole::PracticeOwner),
            other => Err(format!("Unknown membership role: {}", other)),
        }
    }
}

/// A user's membership of a school in one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SchoolMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: MembershipRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_invitation_id: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
}

/// Identity of the person responding to an invitation, as verified by the
/// authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespondingIdentity {
    pub user_id: Uuid,
    pub email: String,
}

/// Outcome of a successful acceptance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AcceptanceResult {
    pub invitation_id: Uuid,
    pub school_id: Uuid,
    pub user_id: Uuid,
    pub memberships: Vec<SchoolMembership>,
    pub onboarding_signal_id: Uuid,
    /// False when the onboarding signal is queued for the dispatch job.
    pub onboarding_dispatched: bool,
}
