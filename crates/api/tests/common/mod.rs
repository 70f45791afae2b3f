//! Shared fixtures for HTTP-level tests.
//!
//! The app is wired to the in-memory store and recording collaborators, so
//! these tests run without PostgreSQL or network access.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use domain::models::School;
use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use domain::services::{
    EngineCollaborators, InMemoryRateLimitStore, InMemoryInvitationStore, InvitationEngine,
    MockMailTransport, MockOnboardingSignaler,
};
use school_invitations_api::{app::create_app, config::Config};
use serde_json::Value;
use shared::jwt::JwtConfig;
use std::sync::Arc;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret-at-least-16-bytes";
pub const CALLBACK_SECRET: &str = "test-callback-secret";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryInvitationStore>,
    pub mail: Arc<MockMailTransport>,
    pub onboarding: Arc<MockOnboardingSignaler>,
    pub school: School,
    pub admin: Uuid,
    jwt: JwtConfig,
}

impl TestApp {
    /// Signed bearer token for `user_id` with a verified `email`.
    pub fn token_for(&self, user_id: Uuid, email: &str) -> String {
        let (token, _) = self
            .jwt
            .generate_access_token(user_id, email)
            .expect("Failed to sign test token");
        token
    }

    pub fn admin_token(&self) -> String {
        self.token_for(self.admin, "admin@school.example")
    }
}

/// Random recipient address, unique per `n` within a test.
pub fn recipient_email(n: usize) -> String {
    let email: String = SafeEmail().fake();
    format!("r{}.{}", n, email)
}

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    Config::load_for_test(overrides).expect("Failed to build test config")
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(&[])
}

pub fn spawn_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let config = test_config(overrides);

    let store = Arc::new(InMemoryInvitationStore::new());
    let mail = Arc::new(MockMailTransport::new());
    let onboarding = Arc::new(MockOnboardingSignaler::new());

    let school = School {
        id: Uuid::new_v4(),
        name: "Riverside Tutoring".to_string(),
    };
    let admin = Uuid::new_v4();
    store.seed_school(school.clone());
    store.seed_admin(school.id, admin);

    let engine = InvitationEngine::new(
        config.engine_settings(),
        EngineCollaborators {
            store: store.clone(),
            outbox: store.clone(),
            rate_limits: Arc::new(InMemoryRateLimitStore::new()),
            mail: mail.clone(),
            onboarding: onboarding.clone(),
        },
    );

    let jwt = JwtConfig::from_secret(JWT_SECRET, 0).expect("Failed to build JWT config");
    let router = create_app(config, Arc::new(engine), jwt.clone());

    TestApp {
        router,
        store,
        mail,
        onboarding,
        school,
        admin,
        jwt,
    }
}

/// Builds a request with an optional bearer token and JSON body.
pub fn json_request(
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub async fn parse_response_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Response body is not JSON")
}
