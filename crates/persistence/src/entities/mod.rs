//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod invitation;
pub mod invitation_batch;
pub mod onboarding_outbox;
pub mod rate_limit_bucket;
pub mod school;

pub use invitation::{InvitationEntity, INVITATION_COLUMNS};
pub use invitation_batch::{BatchStatusCountEntity, InvitationBatchEntity};
pub use onboarding_outbox::OnboardingOutboxEntity;
pub use rate_limit_bucket::RateLimitBucketEntity;
pub use school::{SchoolEntity, SchoolMembershipEntity};
