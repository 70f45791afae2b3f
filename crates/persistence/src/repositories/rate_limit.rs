//! Fixed-window rate limit counters shared across instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{RateCharge, RateDecision};
use domain::services::rate_limiter::RateLimitStore;
use domain::StoreError;
use sqlx::PgPool;

use super::store_error;
use crate::entities::RateLimitBucketEntity;
use crate::metrics::QueryTimer;

/// Rate limit backend storing one counter row per subject and window.
///
/// Each increment is a conditional upsert, so concurrent requests across
/// instances never push a counter past its ceiling. All charges of one call
/// share a transaction that is rolled back if any of them is limited.
#[derive(Clone)]
pub struct RateLimitRepository {
    pool: PgPool,
}

impl RateLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Charge indices in key order, so concurrent calls lock rows in the same
/// sequence.
fn lock_order(charges: &[RateCharge]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..charges.len()).collect();
    order.sort_by(|&a, &b| charges[a].key.cmp(&charges[b].key));
    order
}

#[async_trait]
impl RateLimitStore for RateLimitRepository {
    async fn try_acquire_all(
        &self,
        charges: &[RateCharge],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateDecision>, StoreError> {
        let mut decisions = vec![RateDecision::Allowed; charges.len()];
        for (decision, charge) in decisions.iter_mut().zip(charges) {
            if charge.rule.admits_nothing() {
                *decision = RateDecision::Limited {
                    retry_after_secs: charge.rule.window_secs.max(1),
                };
            }
        }
        if decisions.iter().any(|d| *d != RateDecision::Allowed) {
            return Ok(decisions);
        }

        let timer = QueryTimer::new("rate_limit_try_acquire");
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for idx in lock_order(charges) {
            let charge = &charges[idx];
            let rule = charge.rule;
            let window_secs = i64::try_from(rule.window_secs).unwrap_or(i64::MAX);
            let ceiling = i32::try_from(rule.ceiling).unwrap_or(i32::MAX);

            let row = sqlx::query_as::<_, RateLimitBucketEntity>(
                r#"
                INSERT INTO rate_limit_buckets (subject_key, window_start, window_secs, count)
                VALUES ($1, $2, $3, 1)
                ON CONFLICT (subject_key, window_start)
                DO UPDATE SET count = rate_limit_buckets.count + 1
                WHERE rate_limit_buckets.count < $4
                RETURNING subject_key, window_start, window_secs, count
                "#,
            )
            .bind(&charge.key)
            .bind(rule.window_start(now))
            .bind(window_secs)
            .bind(ceiling)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

            if row.is_none() {
                decisions[idx] = RateDecision::Limited {
                    retry_after_secs: rule.retry_after_secs(now),
                };
            }
        }

        if decisions.iter().all(|d| *d == RateDecision::Allowed) {
            tx.commit().await.map_err(store_error)?;
        } else {
            tx.rollback().await.map_err(store_error)?;
        }
        timer.record();
        Ok(decisions)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let timer = QueryTimer::new("purge_rate_limit_buckets");
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limit_buckets
            WHERE window_start + make_interval(secs => window_secs) <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(store_error)?.rows_affected())
    }
}
