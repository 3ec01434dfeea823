// Session lifecycle and the public/protected route split.

use axum::http::StatusCode;
use serde_json::json;

use crate::common;

#[tokio::test]
async fn test_health_is_public() {
    let app = common::spawn().await;
    let response = common::send(&app, "GET", "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() {
    let app = common::spawn().await;
    let response = common::send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_a_token() {
    let app = common::spawn().await;
    let response = common::send(&app, "GET", "/api/folders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = common::send(&app, "GET", "/api/folders", Some("not-a-token"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = common::spawn().await;
    let response = common::send(
        &app,
        "POST",
        "/api/iam/login",
        None,
        Some(json!({"email": common::ADMIN_EMAIL, "password": "wrong"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = common::send(
        &app,
        "POST",
        "/api/iam/login",
        None,
        Some(json!({"email": "nobody@example.net", "password": "wrong"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_then_logout_invalidates_the_session() {
    let app = common::spawn().await;
    let token = common::admin_token(&app).await;

    let (status, body) = common::get(&app, &token, "/api/iam/current-user").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], common::ADMIN_EMAIL);
    assert_eq!(body["is_approver"], true);

    let response = common::send(&app, "POST", "/api/iam/logout", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = common::send(&app, "GET", "/api/iam/current-user", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_inactive_account_cannot_login() {
    let app = common::spawn().await;
    let token = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &token, "Ops").await;
    let user = common::create_member(
        &app,
        &token,
        domain,
        aegis_grc::iam::GROUP_ANALYSTS,
        "ghost@example.net",
        "ghost-password",
    )
    .await;

    let (status, _) = common::patch(
        &app,
        &token,
        &format!("/api/users/{user}"),
        json!({"is_active": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = common::send(
        &app,
        "POST",
        "/api/iam/login",
        None,
        Some(json!({"email": "ghost@example.net", "password": "ghost-password"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
