//! School and membership entities (database row mappings).

use chrono::{DateTime, Utc};
use domain::models::{School, SchoolMembership};
use domain::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

use super::invitation::parse_column;

/// Database row mapping for the schools table.
#[derive(Debug, Clone, FromRow)]
pub struct SchoolEntity {
    pub id: Uuid,
    pub name: String,
}

impl From<SchoolEntity> for School {
    fn from(e: SchoolEntity) -> Self {
        Self {
            id: e.id,
            name: e.name,
        }
    }
}

/// Database row mapping for the school_memberships table.
#[derive(Debug, Clone, FromRow)]
pub struct SchoolMembershipEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: String,
    pub source_invitation_id: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
}

impl TryFrom<SchoolMembershipEntity> for SchoolMembership {
    type Error = StoreError;

    fn try_from(e: SchoolMembershipEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: e.id,
            user_id: e.user_id,
            school_id: e.school_id,
            role: parse_column("role", &e.role)?,
            source_invitation_id: e.source_invitation_id,
            granted_at: e.granted_at,
        })
    }
}
