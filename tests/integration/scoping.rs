// Permission scoping across domains: list filtering, 404 before 403.

use axum::http::StatusCode;
use serde_json::json;

use aegis_grc::iam::{GROUP_ANALYSTS, GROUP_AUDITORS};

use crate::common;

#[tokio::test]
async fn test_analyst_only_sees_their_domain() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain_a = common::create_domain(&app, &admin, "A").await;
    let domain_b = common::create_domain(&app, &admin, "B").await;
    let project_a = common::create_project(&app, &admin, domain_a, "PA").await;
    let project_b = common::create_project(&app, &admin, domain_b, "PB").await;

    common::create_member(
        &app,
        &admin,
        domain_a,
        GROUP_ANALYSTS,
        "analyst@example.net",
        "analyst-password",
    )
    .await;
    let token = common::login(&app, "analyst@example.net", "analyst-password").await;

    let (status, body) = common::get(&app, &token, "/api/projects").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["PA"]);

    let (status, _) = common::get(&app, &token, &format!("/api/projects/{project_a}")).await;
    assert_eq!(status, StatusCode::OK);

    // Objects outside the view scope do not exist as far as the caller
    // can tell.
    let (status, _) = common::get(&app, &token, &format!("/api/projects/{project_b}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = common::patch(
        &app,
        &token,
        &format!("/api/projects/{project_b}"),
        json!({"name": "renamed"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_auditor_gets_forbidden_on_visible_objects() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &admin, "A").await;
    let project = common::create_project(&app, &admin, domain, "PA").await;

    common::create_member(
        &app,
        &admin,
        domain,
        GROUP_AUDITORS,
        "auditor@example.net",
        "auditor-password",
    )
    .await;
    let token = common::login(&app, "auditor@example.net", "auditor-password").await;

    let (status, _) = common::get(&app, &token, &format!("/api/projects/{project}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = common::patch(
        &app,
        &token,
        &format!("/api/projects/{project}"),
        json!({"name": "renamed"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = common::delete(&app, &token, &format!("/api/projects/{project}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_outside_own_domain_is_forbidden() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain_a = common::create_domain(&app, &admin, "A").await;
    let domain_b = common::create_domain(&app, &admin, "B").await;

    common::create_member(
        &app,
        &admin,
        domain_a,
        GROUP_ANALYSTS,
        "analyst@example.net",
        "analyst-password",
    )
    .await;
    let token = common::login(&app, "analyst@example.net", "analyst-password").await;

    let (status, _) = common::post(
        &app,
        &token,
        "/api/projects",
        json!({"name": "PX", "folder": domain_b}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = common::post(
        &app,
        &token,
        "/api/projects",
        json!({"name": "PX", "folder": domain_a}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_published_frameworks_visible_to_domain_members() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let (framework, _) = common::seed_framework(&app).await;
    let domain = common::create_domain(&app, &admin, "A").await;

    common::create_member(
        &app,
        &admin,
        domain,
        GROUP_ANALYSTS,
        "analyst@example.net",
        "analyst-password",
    )
    .await;
    let token = common::login(&app, "analyst@example.net", "analyst-password").await;

    // The framework lives in the root folder, above the analyst's
    // domain, but is published.
    let (status, body) = common::get(&app, &token, &format!("/api/frameworks/{framework}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "Test framework");

    let (status, body) = common::get(&app, &token, "/api/frameworks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
}
