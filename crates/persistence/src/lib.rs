//! Persistence layer for the school invitation service.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - PostgreSQL implementations of the invitation engine's storage traits

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
