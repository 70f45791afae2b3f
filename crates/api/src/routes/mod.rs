//! HTTP route handlers.

pub mod batches;
pub mod delivery_events;
pub mod health;
pub mod invitations;
