//! Rate limit models.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Ceiling of events allowed per window for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub ceiling: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub fn per_hour(ceiling: u32) -> Self {
        Self {
            ceiling,
            window_secs: 3600,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// A rule that can never admit an event.
    pub fn admits_nothing(&self) -> bool {
        self.ceiling == 0 || self.window_secs == 0
    }

    fn window_secs_i64(&self) -> i64 {
        i64::try_from(self.window_secs).unwrap_or(i64::MAX).max(1)
    }

    /// Start of the fixed window containing `now`, aligned to the epoch.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window_secs = self.window_secs_i64();
        let ts = now.timestamp();
        let start = ts - ts.rem_euclid(window_secs);
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }

    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now) + ChronoDuration::seconds(self.window_secs_i64())
    }

    /// Whole seconds until the window containing `now` closes, at least one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.window_end(now) - now;
        let millis = remaining.num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// One event to be counted against `key` under `rule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateCharge {
    pub key: String,
    pub rule: RateLimitRule,
}

impl RateCharge {
    pub fn new(subject: &RateSubject, rule: RateLimitRule) -> Self {
        Self {
            key: subject.key(),
            rule,
        }
    }
}

/// Subject a rate-limit bucket is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateSubject {
    Actor(Uuid),
    Address(String),
}

impl RateSubject {
    /// Metric label for the dimension.
    pub fn dimension(&self) -> &'static str {
        match self {
            RateSubject::Actor(_) => "actor",
            RateSubject::Address(_) => "address",
        }
    }

    pub fn key(&self) -> String {
        match self {
            RateSubject::Actor(id) => format!("actor:{}", id),
            RateSubject::Address(addr) => format!("addr:{}", addr),
        }
    }
}

impl fmt::Display for RateSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}
