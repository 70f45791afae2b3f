//! Collaborator adapters wired into the invitation engine.

pub mod mail;
pub mod onboarding;

pub use mail::{build_mail_transport, ConsoleMailTransport, HttpMailTransport};
pub use onboarding::{build_onboarding_signaler, HttpOnboardingSignaler, LogOnboardingSignaler};
