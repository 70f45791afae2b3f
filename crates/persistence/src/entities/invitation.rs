//! Invitation entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{Invitation, MembershipRole};
use domain::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

/// Column list shared by every invitation query.
pub const INVITATION_COLUMNS: &str = r#"
    id, token, email, school_id, role, granted_roles, invited_by, message, batch_id,
    status, delivery_status, created_at, expires_at, viewed_at, responded_at,
    responded_by, retry_count, next_retry_at, last_delivery_error,
    delivery_failed_permanently, decline_reason, cancelled_by
"#;

/// Database row mapping for the invitations table.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationEntity {
    pub id: Uuid,
    pub token: String,
    pub email: String,
    pub school_id: Uuid,
    pub role: String,
    pub granted_roles: Vec<String>,
    pub invited_by: Uuid,
    pub message: Option<String>,
    pub batch_id: Option<Uuid>,
    pub status: String,
    pub delivery_status: Option<String>,
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

/// Converts a stored enum string, reporting unknown values as a store error.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| StoreError::Database(format!("{}: {}", column, e)))
}

pub(crate) fn parse_roles(values: &[String]) -> Result<Vec<MembershipRole>, StoreError> {
    values
        .iter()
        .map(|r| parse_column("granted_roles", r))
        .collect()
}

pub(crate) fn role_strings(roles: &[MembershipRole]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

impl TryFrom<InvitationEntity> for Invitation {
    type Error = StoreError;

    fn try_from(e: InvitationEntity) -> Result<Self, Self::Error> {
        Ok(Invitation {
            id: e.id,
            token: e.token,
            email: e.email,
            school_id: e.school_id,
            role: parse_column("role", &e.role)?,
            granted_roles: parse_roles(&e.granted_roles)?,
            invited_by: e.invited_by,
            message: e.message,
            batch_id: e.batch_id,
            status: parse_column("status", &e.status)?,
            delivery_status: e
                .delivery_status
                .as_deref()
                .map(|s| parse_column("delivery_status", s))
                .transpose()?,
            created_at: e.created_at,
            expires_at: e.expires_at,
            viewed_at: e.viewed_at,
            responded_at: e.responded_at,
            responded_by: e.responded_by,
            retry_count: e.retry_count,
            next_retry_at: e.next_retry_at,
            last_delivery_error: e.last_delivery_error,
            delivery_failed_permanently: e.delivery_failed_permanently,
            decline_reason: e.decline_reason,
            cancelled_by: e.cancelled_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::models::{DeliveryStatus, InvitationRole, InvitationStatus};

    fn create_test_entity() -> InvitationEntity {
        InvitationEntity {
            id: Uuid::new_v4(),
            token: "a".repeat(43),
            email: "tutor@example.com".to_string(),
            school_id: Uuid::new_v4(),
            role: "independent_tutor".to_string(),
            granted_roles: vec!["practice_owner".to_string(), "teacher".to_string()],
            invited_by: Uuid::new_v4(),
            message: None,
            batch_id: None,
            status: "sent".to_string(),
            delivery_status: Some("queued".to_string()),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(7),
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

    #[test]
    fn test_entity_converts_to_domain() {
        let invitation = Invitation::try_from(create_test_entity()).unwrap();
        assert_eq!(invitation.role, InvitationRole::IndependentTutor);
        assert_eq!(invitation.status, InvitationStatus::Sent);
        assert_eq!(invitation.delivery_status, Some(DeliveryStatus::Queued));
        assert_eq!(
            invitation.granted_roles,
            vec![MembershipRole::PracticeOwner, MembershipRole::Teacher]
        );
    }

    #[test]
    fn test_unknown_status_is_a_store_error() {
        let mut entity = create_test_entity();
        entity.status = "archived".to_string();
        assert!(matches!(
            Invitation::try_from(entity),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_role_strings() {
        assert_eq!(
            role_strings(&[MembershipRole::PracticeOwner, MembershipRole::Teacher]),
            vec!["practice_owner", "teacher"]
        );
    }
}
