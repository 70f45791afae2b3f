//! HTTP-level tests for the invitation lifecycle.
//!
//! Run with: cargo test -p school-invitations-api --test invitations_integration

mod common;

use axum::http::{header, Method, StatusCode};
use common::{
    json_request, parse_response_body, recipient_email, spawn_app, spawn_app_with, TestApp,
};
use serde_json::{json, Value};
use shared::crypto::sign_hmac_sha256;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

// ============================================================================
// Helper Functions
// ============================================================================

async fn create_invitation(app: &TestApp, email: &str, role: &str) -> (StatusCode, Value) {
    let token = app.admin_token();
    let request = json_request(
        Method::POST,
        "/api/v1/invitations",
        Some(&token),
        Some(json!({
            "school_id": app.school.id,
            "email": email,
            "role": role,
        })),
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, parse_response_body(response).await)
}

async fn invite_token(app: &TestApp, email: &str) -> String {
    let (status, body) = create_invitation(app, email, "teacher").await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    body["token"].as_str().unwrap().to_string()
}

async fn accept_as(app: &TestApp, token: &str, email: &str) -> (StatusCode, Value) {
    let bearer = app.token_for(Uuid::new_v4(), email);
    let request = json_request(
        Method::POST,
        &format!("/api/v1/invitations/{}/accept", token),
        Some(&bearer),
        None,
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, parse_response_body(response).await)
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Create / View
// ============================================================================

#[tokio::test]
async fn test_create_invitation_returns_created() {
    let app = spawn_app();
    let (status, body) = create_invitation(&app, "New.Teacher@Example.com", "teacher").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "new.teacher@example.com");
    assert_eq!(body["role"], "teacher");
    assert_eq!(body["status"], "sent");
    assert!(body["invite_url"]
        .as_str()
        .unwrap()
        .starts_with("https://tutors.example"));
    assert_eq!(app.mail.sent().len(), 1);
}

#[tokio::test]
async fn test_create_logs_one_creation_event() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = spawn_app();
    let (status, _) = create_invitation(&app, "solo.teacher@example.com", "teacher").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(logs.contents().matches("Invitation created").count(), 1);
}

#[tokio::test]
async fn test_create_requires_authentication() {
    let app = spawn_app();
    let request = json_request(
        Method::POST,
        "/api/v1/invitations",
        None,
        Some(json!({
            "school_id": app.school.id,
            "email": "teacher@example.com",
            "role": "teacher",
        })),
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_by_non_admin_is_forbidden() {
    let app = spawn_app();
    let outsider = app.token_for(Uuid::new_v4(), "outsider@example.com");
    let request = json_request(
        Method::POST,
        "/api/v1/invitations",
        Some(&outsider),
        Some(json!({
            "school_id": app.school.id,
            "email": "teacher@example.com",
            "role": "teacher",
        })),
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_rejects_malformed_email() {
    let app = spawn_app();
    let (status, _) = create_invitation(&app, "not-an-email", "teacher").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_active_invitation_conflicts() {
    let app = spawn_app();
    let (_, first) = create_invitation(&app, "teacher@example.com", "teacher").await;
    let (status, body) = create_invitation(&app, "TEACHER@example.com", "teacher").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_active_invitation");
    assert_eq!(body["existing_invitation_id"], first["id"]);
}

#[tokio::test]
async fn test_view_is_public_and_marks_viewed() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;
    let uri = format!("/api/v1/invitations/{}", token);

    let first = app
        .router
        .clone()
        .oneshot(json_request(Method::GET, &uri, None, None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let body = parse_response_body(first).await;
    assert_eq!(body["school_name"], "Riverside Tutoring");
    assert_eq!(body["status"], "sent");

    let second = app
        .router
        .clone()
        .oneshot(json_request(Method::GET, &uri, None, None))
        .await
        .unwrap();
    let body = parse_response_body(second).await;
    assert_eq!(body["status"], "viewed");
}

#[tokio::test]
async fn test_view_unknown_token_is_not_found() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/invitations/does-not-exist",
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "token_invalid");
}

// ============================================================================
// Accept / Decline
// ============================================================================

#[tokio::test]
async fn test_accept_with_mismatched_identity_is_forbidden() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;

    let (status, body) = accept_as(&app, &token, "someone.else@example.com").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "identity_mismatch");
}

#[tokio::test]
async fn test_accept_grants_membership_once() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;

    let (status, body) = accept_as(&app, &token, "Teacher@Example.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["school_id"], json!(app.school.id));
    assert_eq!(body["memberships"].as_array().unwrap().len(), 1);
    assert_eq!(body["memberships"][0]["role"], "teacher");
    assert_eq!(app.onboarding.received().len(), 1);

    let (again, body) = accept_as(&app, &token, "teacher@example.com").await;
    assert_eq!(again, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_responded");
}

#[tokio::test]
async fn test_accept_requires_authentication() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/invitations/{}/accept", token),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_decline_then_accept_conflicts() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/invitations/{}/decline", token),
            None,
            Some(json!({ "reason": "  Already placed elsewhere  " })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "declined");
    assert_eq!(body["decline_reason"], "Already placed elsewhere");

    let (status, _) = accept_as(&app, &token, "teacher@example.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancelled_invitation_cannot_be_accepted() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;
    let admin = app.admin_token();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/invitations/{}/cancel", token),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "cancelled");

    let (status, _) = accept_as(&app, &token, "teacher@example.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_resend_dispatches_again() {
    let app = spawn_app();
    let token = invite_token(&app, "teacher@example.com").await;
    let admin = app.admin_token();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/invitations/{}/resend", token),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(app.mail.sent().len(), 2);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let app = spawn_app_with(&[("rate_limit.per_actor", "2")]);

    for n in 0..2 {
        let (status, _) = create_invitation(&app, &recipient_email(n), "teacher").await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let token = app.admin_token();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/invitations",
            Some(&token),
            Some(json!({
                "school_id": app.school.id,
                "email": "teacher9@example.com",
                "role": "teacher",
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
}

async fn create_forwarded_for(app: &TestApp, n: usize, forwarded_for: &str) -> StatusCode {
    let token = app.admin_token();
    let mut request = json_request(
        Method::POST,
        "/api/v1/invitations",
        Some(&token),
        Some(json!({
            "school_id": app.school.id,
            "email": recipient_email(n),
            "role": "teacher",
        })),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    app.router.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_forwarded_for_is_ignored_by_default() {
    let app = spawn_app_with(&[("rate_limit.per_address", "1")]);

    assert_eq!(
        create_forwarded_for(&app, 0, "198.51.100.1").await,
        StatusCode::CREATED
    );
    assert_eq!(
        create_forwarded_for(&app, 1, "198.51.100.2").await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        create_forwarded_for(&app, 2, "198.51.100.3").await,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_trusted_forwarded_for_keys_on_proxy_appended_hop() {
    let app = spawn_app_with(&[
        ("rate_limit.per_address", "1"),
        ("security.trust_forwarded_for", "true"),
    ]);

    assert_eq!(
        create_forwarded_for(&app, 0, "198.51.100.1, 203.0.113.7").await,
        StatusCode::CREATED
    );
    // A different client-supplied prefix does not open a fresh bucket.
    assert_eq!(
        create_forwarded_for(&app, 1, "198.51.100.2, 203.0.113.7").await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        create_forwarded_for(&app, 2, "203.0.113.8").await,
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_address_rejection_leaves_actor_quota_intact() {
    let app = spawn_app_with(&[
        ("rate_limit.per_actor", "2"),
        ("rate_limit.per_address", "1"),
        ("security.trust_forwarded_for", "true"),
    ]);

    assert_eq!(
        create_forwarded_for(&app, 0, "203.0.113.7").await,
        StatusCode::CREATED
    );
    assert_eq!(
        create_forwarded_for(&app, 1, "203.0.113.7").await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        create_forwarded_for(&app, 2, "203.0.113.8").await,
        StatusCode::CREATED
    );
}

// ============================================================================
// Bulk / Batches
// ============================================================================

#[tokio::test]
async fn test_bulk_skips_in_request_duplicates_and_summarizes() {
    let app = spawn_app();
    let admin = app.admin_token();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/invitations/bulk",
            Some(&admin),
            Some(json!({
                "school_id": app.school.id,
                "invitations": [
                    { "email": "a@example.com", "role": "teacher" },
                    { "email": "b@example.com", "role": "teacher" },
                    { "email": "A@example.com", "role": "teacher" },
                    { "email": "broken", "role": "teacher" },
                ],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = parse_response_body(response).await;
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["items"][2]["outcome"], "skipped");
    assert_eq!(body["items"][3]["error"], "invalid_email");

    let batch_id = body["batch_id"].as_str().unwrap().to_string();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/batches/{}", batch_id),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = parse_response_body(response).await;
    assert_eq!(summary["total_count"], 4);
    assert_eq!(summary["created"], 2);
    assert_eq!(summary["status_counts"]["sent"], 2);
}

#[tokio::test]
async fn test_bulk_over_limit_is_rejected() {
    let app = spawn_app_with(&[("invitations.max_batch_size", "2")]);
    let admin = app.admin_token();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/invitations/bulk",
            Some(&admin),
            Some(json!({
                "school_id": app.school.id,
                "invitations": [
                    { "email": "a@example.com", "role": "teacher" },
                    { "email": "b@example.com", "role": "teacher" },
                    { "email": "c@example.com", "role": "teacher" },
                ],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.store.invitations().is_empty());
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let app = spawn_app();
    let admin = app.admin_token();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/batches/{}", Uuid::new_v4()),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_school_invitations_paginates() {
    let app = spawn_app();
    for n in 0..3 {
        invite_token(&app, &recipient_email(n)).await;
    }
    let admin = app.admin_token();
    let base = format!("/api/v1/schools/{}/invitations", app.school.id);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("{}?limit=2", base),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = parse_response_body(response).await;
    assert_eq!(page["invitations"].as_array().unwrap().len(), 2);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("{}?limit=2&cursor={}", base, cursor),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    let page = parse_response_body(response).await;
    assert_eq!(page["invitations"].as_array().unwrap().len(), 1);
    assert!(page["next_cursor"].is_null());
}

#[tokio::test]
async fn test_list_by_non_admin_is_forbidden() {
    let app = spawn_app();
    let outsider = app.token_for(Uuid::new_v4(), "outsider@example.com");
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/schools/{}/invitations", app.school.id),
            Some(&outsider),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ============================================================================
// Delivery callbacks
// ============================================================================

#[tokio::test]
async fn test_signed_delivery_event_is_recorded() {
    let app = spawn_app();
    let (_, created) = create_invitation(&app, "teacher@example.com", "teacher").await;

    let payload = json!({
        "invitation_id": created["id"],
        "status": "delivered",
    })
    .to_string();
    let signature = sign_hmac_sha256(common::CALLBACK_SECRET, payload.as_bytes());

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/delivery-events")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-signature", signature)
        .body(axum::body::Body::from(payload))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "delivered");
}

#[tokio::test]
async fn test_delivery_event_with_bad_signature_is_rejected() {
    let app = spawn_app();
    let (_, created) = create_invitation(&app, "teacher@example.com", "teacher").await;

    let payload = json!({
        "invitation_id": created["id"],
        "status": "delivered",
    })
    .to_string();
    let signature = sign_hmac_sha256("wrong-secret", payload.as_bytes());

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/delivery-events")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-signature", signature)
        .body(axum::body::Body::from(payload))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = spawn_app();

    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::GET, "/api/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rate_limit_backend"], "memory");

    for uri in ["/api/health/live", "/api/health/ready"] {
        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::GET, uri, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{} failed", uri);
    }
}

#[tokio::test]
async fn test_security_headers_are_set() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::GET, "/api/health/live", None, None))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().get("x-request-id").is_some());
}
