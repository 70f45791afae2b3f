//! Invitation creation rate limiting.
//!
//! Two dimensions are enforced together: the inviting actor and the source
//! address. Both are charged in one atomic step of the backing
//! [`RateLimitStore`], so a request rejected on either dimension consumes
//! nothing from the other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{InvitationError, StoreError};
use crate::metrics;
use crate::models::{RateCharge, RateDecision, RateLimitRule, RateSubject};

/// Default invitations per actor per hour.
pub const DEFAULT_PER_ACTOR_PER_HOUR: u32 = 100;

/// Default invitations per source address per hour.
pub const DEFAULT_PER_ADDRESS_PER_HOUR: u32 = 200;

/// Fixed-window counter backend.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one event against every charge, or against none of them.
    ///
    /// Returns one decision per charge, in order. Nothing is counted unless
    /// every decision is [`RateDecision::Allowed`].
    async fn try_acquire_all(
        &self,
        charges: &[RateCharge],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateDecision>, StoreError>;

    /// Drops counters whose window closed at or before `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn try_acquire(
        &self,
        key: &str,
        rule: RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let charge = RateCharge {
            key: key.to_string(),
            rule,
        };
        let mut decisions = self.try_acquire_all(&[charge], now).await?;
        Ok(decisions.pop().unwrap_or(RateDecision::Allowed))
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_end: DateTime<Utc>,
    count: u32,
}

/// In-process fixed-window backend for single-instance deployments.
///
/// Counters are keyed on subject and window start, matching the shared
/// database backend, and reset when the window containing `now` closes.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    counters: Mutex<HashMap<(String, DateTime<Utc>), WindowCounter>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, DateTime<Utc>), WindowCounter>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemoryRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimitStore")
            .field("counters", &self.len())
            .finish()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn try_acquire_all(
        &self,
        charges: &[RateCharge],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateDecision>, StoreError> {
        let mut counters = self.lock();

        let decisions: Vec<RateDecision> = charges
            .iter()
            .map(|charge| {
                let rule = charge.rule;
                if rule.admits_nothing() {
                    return RateDecision::Limited {
                        retry_after_secs: rule.window_secs.max(1),
                    };
                }
                let used = counters
                    .get(&(charge.key.clone(), rule.window_start(now)))
                    .map_or(0, |c| c.count);
                if used < rule.ceiling {
                    RateDecision::Allowed
                } else {
                    RateDecision::Limited {
                        retry_after_secs: rule.retry_after_secs(now),
                    }
                }
            })
            .collect();

        if decisions.iter().all(|d| *d == RateDecision::Allowed) {
            for charge in charges {
                let rule = charge.rule;
                counters
                    .entry((charge.key.clone(), rule.window_start(now)))
                    .or_insert(WindowCounter {
                        window_end: rule.window_end(now),
                        count: 0,
                    })
                    .count += 1;
            }
        }

        Ok(decisions)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut counters = self.lock();
        let before = counters.len();
        counters.retain(|_, c| c.window_end > cutoff);
        Ok((before - counters.len()) as u64)
    }
}

/// Gate in front of invitation creation.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    per_actor: RateLimitRule,
    per_address: RateLimitRule,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        per_actor: RateLimitRule,
        per_address: RateLimitRule,
    ) -> Self {
        Self {
            store,
            per_actor,
            per_address,
        }
    }

    fn rule_for(&self, subject: &RateSubject) -> RateLimitRule {
        match subject {
            RateSubject::Actor(_) => self.per_actor,
            RateSubject::Address(_) => self.per_address,
        }
    }

    /// Counts one event against every subject, rejecting if any ceiling is
    /// reached. A rejected call counts against none of them.
    pub async fn allow_all(&self, subjects: &[RateSubject]) -> Result<(), InvitationError> {
        let charges: Vec<RateCharge> = subjects
            .iter()
            .map(|s| RateCharge::new(s, self.rule_for(s)))
            .collect();
        let decisions = self.store.try_acquire_all(&charges, Utc::now()).await?;

        let mut retry_after: Option<u64> = None;
        for (subject, decision) in subjects.iter().zip(decisions) {
            if let RateDecision::Limited { retry_after_secs } = decision {
                metrics::record_rate_limited(subject.dimension());
                info!(
                    subject = %subject,
                    ceiling = self.rule_for(subject).ceiling,
                    retry_after_secs,
                    "Invitation rate limit exceeded"
                );
                retry_after = Some(retry_after.map_or(retry_after_secs, |r| r.max(retry_after_secs)));
            }
        }

        match retry_after {
            Some(retry_after_secs) => Err(InvitationError::RateLimitExceeded { retry_after_secs }),
            None => Ok(()),
        }
    }

    /// Counts one event against `subject`, rejecting if its ceiling is reached.
    pub async fn allow(&self, subject: &RateSubject) -> Result<(), InvitationError> {
        self.allow_all(std::slice::from_ref(subject)).await
    }

    /// Applies both dimensions; both must pass.
    pub async fn allow_request(&self, actor: Uuid, address: &str) -> Result<(), InvitationError> {
        self.allow_all(&[
            RateSubject::Actor(actor),
            RateSubject::Address(address.to_string()),
        ])
        .await
    }

    /// Drops counters for windows that have closed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, InvitationError> {
        let purged = self.store.purge_before(now).await?;
        if purged > 0 {
            debug!(purged, "Purged closed rate limit windows");
        }
        Ok(purged)
    }
}
