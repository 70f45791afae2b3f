//! Deletes closed rate-limit windows from whichever backend is configured.

use domain::services::InvitationEngine;
use std::sync::Arc;
use tracing::info;

use super::scheduler::{Job, JobError, JobFrequency};

pub struct RateLimitCleanupJob {
    engine: Arc<InvitationEngine>,
    every_minutes: u64,
}

impl RateLimitCleanupJob {
    pub fn new(engine: Arc<InvitationEngine>, every_minutes: u64) -> Self {
        Self {
            engine,
            every_minutes,
        }
    }
}

#[async_trait::async_trait]
impl Job for RateLimitCleanupJob {
    fn name(&self) -> &'static str {
        "rate_limit_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(self.every_minutes)
    }

    async fn execute(&self) -> Result<u64, JobError> {
        let deleted = self.engine.purge_rate_limits().await?;
        if deleted > 0 {
            info!(deleted, "Purged closed rate-limit windows");
        }
        Ok(deleted)
    }
}
