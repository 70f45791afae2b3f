//! Source address of a request, used as a rate limit dimension.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::app::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address: last `X-Forwarded-For` hop when trusted, else the peer
/// address, else `unknown`.
///
/// Only the last hop is written by the proxy in front of us; everything to
/// its left is client-supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

fn forwarded_for(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(FORWARDED_FOR)
        .iter()
        .last()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.security.trust_forwarded_for {
            if let Some(addr) = forwarded_for(parts) {
                return Ok(ClientAddr(addr));
            }
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientAddr(peer.unwrap_or_else(|| "unknown".to_string())))
    }
}
