//! Onboarding outbox repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::OnboardingSignal;
use domain::services::store::OnboardingOutbox;
use domain::StoreError;
use sqlx::PgPool;
use uuid::Uuid;

use super::store_error;
use crate::entities::OnboardingOutboxEntity;
use crate::metrics::QueryTimer;

/// Repository for onboarding signals written by acceptance.
#[derive(Clone)]
pub struct OnboardingOutboxRepository {
    pool: PgPool,
}

impl OnboardingOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OnboardingOutbox for OnboardingOutboxRepository {
    async fn pending_signals(&self, limit: i64) -> Result<Vec<OnboardingSignal>, StoreError> {
        let timer = QueryTimer::new("pending_onboarding_signals");
        let result = sqlx::query_as::<_, OnboardingOutboxEntity>(
            r#"
            SELECT id, user_id, school_id, roles, invitation_id, created_at,
                   dispatched_at, attempts, last_error
            FROM onboarding_outbox
            WHERE dispatched_at IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
            .map_err(store_error)?
            .into_iter()
            .map(OnboardingSignal::try_from)
            .collect()
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let timer = QueryTimer::new("mark_onboarding_dispatched");
        let result = sqlx::query(
            r#"
            UPDATE onboarding_outbox
            SET dispatched_at = $2, attempts = attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await;
        timer.record();
        if result.map_err(store_error)?.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_dispatch_failure(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let timer = QueryTimer::new("record_onboarding_failure");
        let result = sqlx::query(
            r#"
            UPDATE onboarding_outbox
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await;
        timer.record();
        if result.map_err(store_error)?.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
