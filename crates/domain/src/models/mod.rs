//! Domain models for school invitations.

pub mod batch;
pub mod delivery;
pub mod invitation;
pub mod membership;
pub mod onboarding;
pub mod rate_limit;
pub mod school;

pub use batch::{
    BatchCounts, BatchItemOutcome, BatchItemResult, BatchResult, BatchSummary,
    BulkInvitationItem, BulkInvitationRequest, InvitationBatch, StatusCounts,
};
pub use delivery::{DeliveryEvent, DeliveryResult, DeliveryStatus, DeliveryUpdate, MailContext, RetryPolicy};
pub use invitation::{Invitation, InvitationRole, InvitationStatus, NewInvitation};
pub use membership::{AcceptanceResult, MembershipRole, RespondingIdentity, SchoolMembership};
pub use onboarding::{OnboardingRequest, OnboardingSignal};
pub use rate_limit::{RateCharge, RateDecision, RateLimitRule, RateSubject};
pub use school::School;
