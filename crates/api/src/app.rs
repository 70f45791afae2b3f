use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{
    EngineCollaborators, InMemoryRateLimitStore, InvitationEngine, RateLimitStore,
};
use persistence::repositories::{
    InvitationRepository, OnboardingOutboxRepository, RateLimitRepository,
};
use shared::jwt::JwtConfig;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, security_headers_middleware, trace_id};
use crate::routes::{batches, delivery_events, health, invitations};
use crate::services::{build_mail_transport, build_onboarding_signaler};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InvitationEngine>,
    pub jwt: Arc<JwtConfig>,
    pub config: Arc<Config>,
}

/// Wires the engine to PostgreSQL and the configured collaborators.
pub fn build_engine(config: &Config, pool: PgPool) -> anyhow::Result<InvitationEngine> {
    let rate_limits: Arc<dyn RateLimitStore> = match config.rate_limit.backend.as_str() {
        "postgres" => Arc::new(RateLimitRepository::new(pool.clone())),
        _ => Arc::new(InMemoryRateLimitStore::new()),
    };

    let collaborators = EngineCollaborators {
        store: Arc::new(InvitationRepository::new(pool.clone())),
        outbox: Arc::new(OnboardingOutboxRepository::new(pool)),
        rate_limits,
        mail: build_mail_transport(&config.mail)?,
        onboarding: build_onboarding_signaler(&config.onboarding)?,
    };

    Ok(InvitationEngine::new(config.engine_settings(), collaborators))
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.security.cors_origins.is_empty() {
        // Development: allow any origin.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_app(config: Config, engine: Arc<InvitationEngine>, jwt: JwtConfig) -> Router {
    let config = Arc::new(config);
    let state = AppState {
        engine,
        jwt: Arc::new(jwt),
        config: config.clone(),
    };

    // Authentication is per handler through the UserAuth extractor, so public
    // and authenticated routes share one router.
    let invitation_routes = Router::new()
        .route("/api/v1/invitations", post(invitations::create_invitation))
        .route(
            "/api/v1/invitations/bulk",
            post(invitations::create_bulk_invitations),
        )
        .route("/api/v1/invitations/:token", get(invitations::view_invitation))
        .route(
            "/api/v1/invitations/:token/accept",
            post(invitations::accept_invitation),
        )
        .route(
            "/api/v1/invitations/:token/decline",
            post(invitations::decline_invitation),
        )
        .route(
            "/api/v1/invitations/:token/resend",
            post(invitations::resend_invitation),
        )
        .route(
            "/api/v1/invitations/:token/cancel",
            post(invitations::cancel_invitation),
        )
        .route(
            "/api/v1/schools/:school_id/invitations",
            get(invitations::list_school_invitations),
        )
        .route("/api/v1/batches/:batch_id", get(batches::get_batch))
        .route(
            "/api/v1/delivery-events",
            post(delivery_events::record_delivery_event),
        );

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(invitation_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_headers_middleware,
        ))
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config))
        .with_state(state)
}
