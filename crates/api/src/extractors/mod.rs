//! Custom Axum extractors.

pub mod client_addr;
pub mod user_auth;

pub use client_addr::ClientAddr;
pub use user_auth::UserAuth;
