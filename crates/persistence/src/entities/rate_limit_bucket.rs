//! Rate limit bucket entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the rate_limit_buckets table.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitBucketEntity {
    pub subject_key: String,
    pub window_start: DateTime<Utc>,
    pub window_secs: i64,
    pub count: i32,
}
