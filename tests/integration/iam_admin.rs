// Administration guard rails: last admin, builtin groups, counters.

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use aegis_grc::iam::{GROUP_ADMINISTRATORS, GROUP_ANALYSTS};

use crate::common;

async fn admin_user_id(app: &common::TestApp, token: &str) -> Uuid {
    let (status, body) = common::get(app, token, "/api/iam/current-user").await;
    assert_eq!(status, StatusCode::OK);
    common::id_of(&body)
}

#[tokio::test]
async fn test_last_admin_cannot_be_deleted() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let admin_id = admin_user_id(&app, &admin).await;

    let status = common::delete(&app, &admin, &format!("/api/users/{admin_id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_last_admin_cannot_leave_the_admin_group() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let admin_id = admin_user_id(&app, &admin).await;

    let (status, _) = common::patch(
        &app,
        &admin,
        &format!("/api/users/{admin_id}"),
        json!({"user_groups": []}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_can_be_deleted_once_another_exists() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let admin_id = admin_user_id(&app, &admin).await;

    let second = common::create_member(
        &app,
        &admin,
        app.root_id,
        GROUP_ADMINISTRATORS,
        "second-admin@example.net",
        "second-admin-password",
    )
    .await;
    assert_ne!(second, admin_id);

    let status = common::delete(&app, &admin, &format!("/api/users/{admin_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Deleting a user drops their sessions as well.
    let response = common::send(&app, "GET", "/api/iam/current-user", Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = common::login(&app, "second-admin@example.net", "second-admin-password").await;
    let (status, _) = common::get(&app, &token, "/api/users").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_builtin_groups_cannot_be_deleted_or_renamed() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &admin, "Ops").await;
    let group = common::builtin_group_id(&app, &admin, domain, GROUP_ANALYSTS).await;

    let status = common::delete(&app, &admin, &format!("/api/user-groups/{group}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = common::patch(
        &app,
        &admin,
        &format!("/api/user-groups/{group}"),
        json!({"name": "renamed"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_counters_track_created_objects() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &admin, "Ops").await;
    common::create_project(&app, &admin, domain, "ERP").await;
    let (status, _) = common::post(
        &app,
        &admin,
        "/api/applied-controls",
        json!({"name": "Patch servers", "folder": domain}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = common::get(&app, &admin, "/api/get_counters").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["results"]["domains"], 1);
    assert_eq!(body["results"]["projects"], 1);
    assert_eq!(body["results"]["applied_controls"], 1);
}

#[tokio::test]
async fn test_org_tree_nests_domains_under_the_root() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    common::create_domain(&app, &admin, "Ops").await;

    let (status, body) = common::get(&app, &admin, "/api/folders/org_tree").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "Global");
    let children = body["children"].as_array().unwrap();
    assert!(children.iter().any(|c| c["name"] == "Ops"));
}
