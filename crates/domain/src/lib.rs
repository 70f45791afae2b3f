//! Domain layer for the school invitation service.
//!
//! This crate contains:
//! - Domain models (Invitation, InvitationBatch, SchoolMembership)
//! - The invitation lifecycle engine and its collaborator traits
//! - Domain error types
//! - An in-memory store used by tests and single-node development

pub mod errors;
pub mod metrics;
pub mod models;
pub mod services;

pub use errors::{InvitationError, StoreError};
