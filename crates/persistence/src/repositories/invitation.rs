//! Invitation repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    BatchCounts, DeliveryUpdate, Invitation, InvitationBatch, InvitationRole, InvitationStatus,
    School, SchoolMembership,
};
use domain::services::store::{
    AcceptInvitation, AcceptOutcome, InvitationStore, ListPosition, Response, StatusAdvance,
};
use domain::StoreError;
use sqlx::PgPool;
use uuid::Uuid;

use super::store_error;
use crate::entities::invitation::{parse_column, role_strings};
use crate::entities::{
    BatchStatusCountEntity, InvitationBatchEntity, InvitationEntity, SchoolEntity,
    SchoolMembershipEntity, INVITATION_COLUMNS,
};
use crate::metrics::QueryTimer;

fn status_strings(statuses: &[InvitationStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn active_statuses() -> Vec<String> {
    status_strings(&InvitationStatus::ACTIVE)
}

fn into_domain(entity: Option<InvitationEntity>) -> Result<Option<Invitation>, StoreError> {
    entity.map(Invitation::try_from).transpose()
}

/// Repository for invitations, batches, and the school data they reference.
#[derive(Clone)]
pub struct InvitationRepository {
    pool: PgPool,
}

impl InvitationRepository {
    /// Creates a new InvitationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InvitationStore for InvitationRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn find_school(&self, school_id: Uuid) -> Result<Option<School>, StoreError> {
        let timer = QueryTimer::new("find_school");
        let result = sqlx::query_as::<_, SchoolEntity>("SELECT id, name FROM schools WHERE id = $1")
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        Ok(result.map_err(store_error)?.map(School::from))
    }

    async fn is_school_admin(&self, school_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("is_school_admin");
        let result = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM school_memberships
                WHERE school_id = $1 AND user_id = $2 AND role = 'admin' AND revoked_at IS NULL
            )
            "#,
        )
        .bind(school_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result.map_err(store_error)
    }

    async fn insert_invitation(&self, inv: &Invitation) -> Result<Invitation, StoreError> {
        let timer = QueryTimer::new("insert_invitation");
        let sql = format!(
            r#"
            INSERT INTO invitations (
                id, token, email, school_id, role, granted_roles, invited_by, message,
                batch_id, status, delivery_status, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(inv.id)
            .bind(&inv.token)
            .bind(&inv.email)
            .bind(inv.school_id)
            .bind(inv.role.as_str())
            .bind(role_strings(&inv.granted_roles))
            .bind(inv.invited_by)
            .bind(&inv.message)
            .bind(inv.batch_id)
            .bind(inv.status.as_str())
            .bind(inv.delivery_status.map(|s| s.as_str()))
            .bind(inv.created_at)
            .bind(inv.expires_at)
            .fetch_one(&self.pool)
            .await;
        timer.record();
        Invitation::try_from(result.map_err(store_error)?)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_invitation_by_token");
        let sql = format!("SELECT {} FROM invitations WHERE token = $1", INVITATION_COLUMNS);
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_invitation_by_id");
        let sql = format!("SELECT {} FROM invitations WHERE id = $1", INVITATION_COLUMNS);
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn find_active(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_active_invitation");
        let sql = format!(
            r#"
            SELECT {} FROM invitations
            WHERE lower(email) = lower($1) AND school_id = $2 AND role = $3
              AND status = ANY($4)
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(email)
            .bind(school_id)
            .bind(role.as_str())
            .bind(active_statuses())
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn last_declined_at(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let timer = QueryTimer::new("last_declined_at");
        let result = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(responded_at) FROM invitations
            WHERE lower(email) = lower($1) AND school_id = $2 AND role = $3
              AND status = 'declined'
            "#,
        )
        .bind(email)
        .bind(school_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result.map_err(store_error)
    }

    async fn advance_status(
        &self,
        id: Uuid,
        advance: &StatusAdvance,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("advance_invitation_status");
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = $2,
                viewed_at = CASE WHEN $2 = 'viewed' THEN COALESCE(viewed_at, $4) ELSE viewed_at END
            WHERE id = $1 AND status = ANY($3) AND expires_at > $4
            "#,
        )
        .bind(id)
        .bind(advance.to.as_str())
        .bind(status_strings(&advance.from))
        .bind(now)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.rows_affected() > 0)
    }

    async fn mark_expired(&self, id: Uuid) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("mark_invitation_expired");
        let result = sqlx::query(
            "UPDATE invitations SET status = 'expired' WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(active_statuses())
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.rows_affected() > 0)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, StoreError> {
        let timer = QueryTimer::new("expire_overdue_invitations");
        let result = sqlx::query(
            r#"
            UPDATE invitations SET status = 'expired'
            WHERE id IN (
                SELECT id FROM invitations
                WHERE status = ANY($1) AND expires_at <= $2
                ORDER BY expires_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            AND status = ANY($1)
            "#,
        )
        .bind(active_statuses())
        .bind(now)
        .bind(limit.max(0))
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.rows_affected())
    }

    async fn respond(
        &self,
        id: Uuid,
        response: &Response,
        responded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("respond_to_invitation");
        let (reason, cancelled_by) = match response {
            Response::Declined { reason } => (reason.clone(), None),
            Response::Cancelled { by } => (None, Some(*by)),
        };
        let sql = format!(
            r#"
            UPDATE invitations
            SET status = $2, responded_at = $3, responded_by = $4,
                decline_reason = $5, cancelled_by = $6
            WHERE id = $1 AND status = ANY($7) AND expires_at > $3
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(id)
            .bind(response.status().as_str())
            .bind(now)
            .bind(responded_by)
            .bind(reason)
            .bind(cancelled_by)
            .bind(active_statuses())
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn accept(&self, command: &AcceptInvitation) -> Result<AcceptOutcome, StoreError> {
        let timer = QueryTimer::new("accept_invitation");

        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // Guarded compare-and-set; a miss means someone else won or the row is closed.
        let sql = format!(
            r#"
            UPDATE invitations
            SET status = 'accepted', responded_at = $2, responded_by = $3
            WHERE id = $1 AND status = ANY($4) AND expires_at > $2
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );
        let updated = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(command.invitation_id)
            .bind(command.now)
            .bind(command.user_id)
            .bind(active_statuses())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

        let Some(updated) = updated else {
            tx.rollback().await.map_err(store_error)?;
            timer.record();
            return Ok(AcceptOutcome::NotActive);
        };

        let mut memberships = Vec::with_capacity(command.roles.len());
        for role in &command.roles {
            sqlx::query(
                r#"
                INSERT INTO school_memberships (id, user_id, school_id, role, source_invitation_id, granted_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, school_id, role) WHERE revoked_at IS NULL DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(command.user_id)
            .bind(command.school_id)
            .bind(role.as_str())
            .bind(command.invitation_id)
            .bind(command.now)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            let membership = sqlx::query_as::<_, SchoolMembershipEntity>(
                r#"
                SELECT id, user_id, school_id, role, source_invitation_id, granted_at
                FROM school_memberships
                WHERE user_id = $1 AND school_id = $2 AND role = $3 AND revoked_at IS NULL
                "#,
            )
            .bind(command.user_id)
            .bind(command.school_id)
            .bind(role.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error)?;
            memberships.push(SchoolMembership::try_from(membership)?);
        }

        let signal = &command.signal;
        sqlx::query(
            r#"
            INSERT INTO onboarding_outbox (id, user_id, school_id, roles, invitation_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(signal.id)
        .bind(signal.user_id)
        .bind(signal.school_id)
        .bind(role_strings(&signal.roles))
        .bind(signal.invitation_id)
        .bind(signal.created_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        timer.record();

        Ok(AcceptOutcome::Accepted {
            invitation: Invitation::try_from(updated)?,
            memberships,
            signal: signal.clone(),
        })
    }

    async fn record_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        advance: Option<&StatusAdvance>,
    ) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("record_invitation_delivery");
        let (advance_to, advance_from) = match advance {
            Some(a) => (Some(a.to.as_str()), status_strings(&a.from)),
            None => (None, Vec::new()),
        };
        let sql = format!(
            r#"
            UPDATE invitations
            SET delivery_status = $2,
                retry_count = $3,
                next_retry_at = $4,
                last_delivery_error = $5,
                delivery_failed_permanently = $6,
                status = CASE WHEN $7::text IS NOT NULL AND status = ANY($8) THEN $7 ELSE status END
            WHERE id = $1
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(id)
            .bind(update.delivery_status.as_str())
            .bind(update.retry_count)
            .bind(update.next_retry_at)
            .bind(&update.last_error)
            .bind(update.failed_permanently)
            .bind(advance_to)
            .bind(advance_from)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn reset_delivery(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("reset_invitation_delivery");
        let sql = format!(
            r#"
            UPDATE invitations
            SET delivery_status = NULL, retry_count = 0, next_retry_at = NULL,
                last_delivery_error = NULL, delivery_failed_permanently = FALSE
            WHERE id = $1
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        into_domain(result.map_err(store_error)?)
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError> {
        let timer = QueryTimer::new("invitations_due_for_retry");
        let sql = format!(
            r#"
            SELECT {} FROM invitations
            WHERE delivery_status = 'failed'
              AND delivery_failed_permanently = FALSE
              AND next_retry_at <= $1
              AND status = ANY($2)
              AND expires_at > $1
            ORDER BY next_retry_at
            LIMIT $3
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(now)
            .bind(active_statuses())
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
            .map_err(store_error)?
            .into_iter()
            .map(Invitation::try_from)
            .collect()
    }

    async fn create_batch(&self, batch: &InvitationBatch) -> Result<InvitationBatch, StoreError> {
        let timer = QueryTimer::new("create_invitation_batch");
        let result = sqlx::query_as::<_, InvitationBatchEntity>(
            r#"
            INSERT INTO invitation_batches (id, school_id, requested_by, total_count, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, school_id, requested_by, total_count, created_at
            "#,
        )
        .bind(batch.id)
        .bind(batch.school_id)
        .bind(batch.requested_by)
        .bind(batch.total_count)
        .bind(batch.created_at)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.into())
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<InvitationBatch>, StoreError> {
        let timer = QueryTimer::new("find_invitation_batch");
        let result = sqlx::query_as::<_, InvitationBatchEntity>(
            r#"
            SELECT id, school_id, requested_by, total_count, created_at
            FROM invitation_batches WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.map(InvitationBatch::from))
    }

    async fn batch_counts(&self, batch_id: Uuid) -> Result<BatchCounts, StoreError> {
        let timer = QueryTimer::new("invitation_batch_counts");
        let result = sqlx::query_as::<_, BatchStatusCountEntity>(
            r#"
            SELECT status,
                   COUNT(*) AS count,
                   COUNT(*) FILTER (WHERE delivery_failed_permanently) AS failed_permanently
            FROM invitations
            WHERE batch_id = $1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        let rows = result.map_err(store_error)?;
        let mut by_status = Vec::with_capacity(rows.len());
        let mut failed = 0;
        for row in rows {
            by_status.push((parse_column("status", &row.status)?, row.count));
            failed += row.failed_permanently;
        }
        by_status.sort();
        Ok(BatchCounts {
            by_status,
            delivery_failed_permanently: failed,
        })
    }

    async fn list_by_school(
        &self,
        school_id: Uuid,
        status: Option<InvitationStatus>,
        after: Option<ListPosition>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError> {
        let timer = QueryTimer::new("list_school_invitations");
        let sql = format!(
            r#"
            SELECT {} FROM invitations
            WHERE school_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#,
            INVITATION_COLUMNS
        );
        let result = sqlx::query_as::<_, InvitationEntity>(&sql)
            .bind(school_id)
            .bind(status.map(|s| s.as_str()))
            .bind(after.map(|p| p.created_at))
            .bind(after.map(|p| p.id))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
            .map_err(store_error)?
            .into_iter()
            .map(Invitation::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses_match_domain() {
        assert_eq!(
            active_statuses(),
            vec!["pending", "sent", "delivered", "viewed"]
        );
    }

    #[test]
    fn test_into_domain_passes_through_none() {
        assert!(into_domain(None).unwrap().is_none());
    }
}
