//! Invitation lifecycle engine services.
//!
//! Components, leaves first: [`TokenService`], [`RateLimiter`], the
//! [`InvitationStore`] seam, [`DeliveryTracker`], [`InvitationStateMachine`],
//! [`BulkInvitationProcessor`], and [`AcceptanceOrchestrator`].
//! [`InvitationEngine`] wires them together.

pub mod acceptance;
pub mod bulk;
pub mod delivery;
pub mod engine;
pub mod issuance;
pub mod memory;
pub mod rate_limiter;
pub mod state_machine;
pub mod store;
pub mod token;

pub use acceptance::{AcceptanceOrchestrator, MockOnboardingSignaler, OnboardingSignaler, SignalError};
pub use bulk::BulkInvitationProcessor;
pub use delivery::{DeliveryTracker, MailError, MailTransport, MockMailTransport, SentMail};
pub use engine::{EngineCollaborators, EngineSettings, InvitationEngine};
pub use issuance::{InvitationIssuer, IssueCommand, IssuedInvitation};
pub use memory::InMemoryInvitationStore;
pub use rate_limiter::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
pub use state_machine::InvitationStateMachine;
pub use store::{
    AcceptInvitation, AcceptOutcome, InvitationStore, ListPosition, OnboardingOutbox, Response,
    StatusAdvance, ACTIVE_INVITATION_CONSTRAINT, INVITATION_TOKEN_CONSTRAINT,
};
pub use token::TokenService;
