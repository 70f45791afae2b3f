//! Invitation maintenance jobs.
//!
//! Expiry is also applied lazily on every read; the sweep only keeps stored
//! statuses and listings current for invitations nobody opens.

use domain::services::InvitationEngine;
use std::sync::Arc;

use super::scheduler::{Job, JobError, JobFrequency};

/// Flips overdue active invitations to `expired`.
pub struct ExpirySweepJob {
    engine: Arc<InvitationEngine>,
    every_minutes: u64,
    batch_size: i64,
}

impl ExpirySweepJob {
    pub fn new(engine: Arc<InvitationEngine>, every_minutes: u64, batch_size: i64) -> Self {
        Self {
            engine,
            every_minutes,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Job for ExpirySweepJob {
    fn name(&self) -> &'static str {
        "invitation_expiry_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(self.every_minutes)
    }

    async fn execute(&self) -> Result<u64, JobError> {
        Ok(self.engine.expire_overdue(self.batch_size).await?)
    }
}

/// Re-dispatches invitations whose delivery retry is due.
pub struct DeliveryRetryJob {
    engine: Arc<InvitationEngine>,
    every_secs: u64,
    batch_size: i64,
}

impl DeliveryRetryJob {
    pub fn new(engine: Arc<InvitationEngine>, every_secs: u64, batch_size: i64) -> Self {
        Self {
            engine,
            every_secs,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Job for DeliveryRetryJob {
    fn name(&self) -> &'static str {
        "delivery_retry"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.every_secs)
    }

    async fn execute(&self) -> Result<u64, JobError> {
        Ok(self.engine.retry_deliveries(self.batch_size).await? as u64)
    }
}

/// Sends onboarding signals left in the outbox after acceptance.
pub struct OnboardingDispatchJob {
    engine: Arc<InvitationEngine>,
    every_secs: u64,
    batch_size: i64,
}

impl OnboardingDispatchJob {
    pub fn new(engine: Arc<InvitationEngine>, every_secs: u64, batch_size: i64) -> Self {
        Self {
            engine,
            every_secs,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Job for OnboardingDispatchJob {
    fn name(&self) -> &'static str {
        "onboarding_dispatch"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.every_secs)
    }

    async fn execute(&self) -> Result<u64, JobError> {
        Ok(self.engine.dispatch_onboarding(self.batch_size).await? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::models::{InvitationRole, InvitationStatus, NewInvitation, School};
    use domain::services::store::InvitationStore;
    use domain::services::{
        EngineCollaborators, EngineSettings, InMemoryRateLimitStore, InMemoryInvitationStore,
        MockMailTransport, MockOnboardingSignaler,
    };
    use uuid::Uuid;

    fn engine(store: Arc<InMemoryInvitationStore>) -> Arc<InvitationEngine> {
        Arc::new(InvitationEngine::new(
            EngineSettings::default(),
            EngineCollaborators {
                store: store.clone(),
                outbox: store,
                rate_limits: Arc::new(InMemoryRateLimitStore::new()),
                mail: Arc::new(MockMailTransport::new()),
                onboarding: Arc::new(MockOnboardingSignaler::new()),
            },
        ))
    }

    #[tokio::test]
    async fn test_expiry_sweep_expires_overdue() {
        let store = Arc::new(InMemoryInvitationStore::new());
        let school = School {
            id: Uuid::new_v4(),
            name: "School A".to_string(),
        };
        store.seed_school(school.clone());

        let now = Utc::now();
        let overdue = NewInvitation {
            email: "late@example.com".to_string(),
            school_id: school.id,
            role: InvitationRole::Teacher,
            invited_by: Uuid::new_v4(),
            message: None,
            batch_id: None,
            expires_at: now - Duration::minutes(1),
        }
        .with_token("t".repeat(43), now - Duration::days(8));
        store.insert_invitation(&overdue).await.unwrap();

        let job = ExpirySweepJob::new(engine(store.clone()), 15, 100);
        assert_eq!(job.execute().await.unwrap(), 1);
        assert_eq!(store.invitations()[0].status, InvitationStatus::Expired);
        assert_eq!(job.execute().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_job_metadata() {
        let engine = engine(Arc::new(InMemoryInvitationStore::new()));
        assert_eq!(
            DeliveryRetryJob::new(engine.clone(), 60, 10).frequency(),
            JobFrequency::Seconds(60)
        );
        assert_eq!(
            OnboardingDispatchJob::new(engine.clone(), 30, 10).name(),
            "onboarding_dispatch"
        );
        assert_eq!(
            ExpirySweepJob::new(engine, 15, 10).frequency(),
            JobFrequency::Minutes(15)
        );
    }

    #[tokio::test]
    async fn test_empty_runs_process_nothing() {
        let engine = engine(Arc::new(InMemoryInvitationStore::new()));
        assert_eq!(
            DeliveryRetryJob::new(engine.clone(), 60, 10).execute().await.unwrap(),
            0
        );
        assert_eq!(
            OnboardingDispatchJob::new(engine, 30, 10).execute().await.unwrap(),
            0
        );
    }
}
