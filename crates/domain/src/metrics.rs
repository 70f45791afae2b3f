//! Engine metrics.
//!
//! Counters are recorded through the `metrics` facade; the API binary installs
//! the Prometheus exporter.

use metrics::counter;

/// Record a created invitation. `source` is "single" or "bulk".
pub fn record_invitation_created(source: &'static str) {
    counter!("invitations_created_total", "source" => source).increment(1);
}

/// Record an accepted invitation.
pub fn record_invitation_accepted() {
    counter!("invitations_accepted_total").increment(1);
}

/// Record a rate-limit rejection for one dimension ("actor" or "address").
pub fn record_rate_limited(dimension: &'static str) {
    counter!("invitation_rate_limited_total", "dimension" => dimension).increment(1);
}

/// Record a dispatch attempt and its outcome.
pub fn record_delivery_attempt(outcome: &'static str) {
    counter!("invitation_delivery_attempts_total", "outcome" => outcome).increment(1);
}
