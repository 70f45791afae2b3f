//! Shared utilities and common types for the school invitations backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Invitation token generation and format checks
//! - SHA-256 / HMAC-SHA256 helpers
//! - Email normalisation and validation
//! - Bearer JWT validation for the authentication collaborator
//! - Cursor pagination

pub mod crypto;
pub mod jwt;
pub mod pagination;
pub mod validation;
