// Evidence attachment lifecycle: upload, download, delete, size cap.

use axum::http::{header, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::common;

async fn evidence_fixture(app: &common::TestApp, token: &str) -> Uuid {
    let domain = common::create_domain(app, token, "Ops").await;
    let (status, body) = common::post(
        app,
        token,
        "/api/evidences",
        json!({"name": "Backup restore log", "folder": domain}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    common::id_of(&body)
}

#[tokio::test]
async fn test_attachment_upload_download_and_delete() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let evidence = evidence_fixture(&app, &admin).await;
    let attachment_path = format!("/api/evidences/{evidence}/attachment");

    // Nothing attached yet.
    let response = common::send(&app, "GET", &attachment_path, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, body) = common::upload(
        &app,
        &admin,
        &format!("/api/evidences/{evidence}/upload"),
        Some("restore.log"),
        b"restore ok".to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = common::get(&app, &admin, &format!("/api/evidences/{evidence}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attachment"], "restore.log");

    let response = common::send(&app, "GET", &attachment_path, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("restore.log"), "{disposition}");
    assert_eq!(common::body_bytes(response).await, b"restore ok");

    let (status, _) = common::post(
        &app,
        &admin,
        &format!("/api/evidences/{evidence}/delete_attachment"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = common::send(&app, "GET", &attachment_path, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_requires_a_file_name_and_content() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let evidence = evidence_fixture(&app, &admin).await;
    let path = format!("/api/evidences/{evidence}/upload");

    // No Content-Disposition filename.
    let (status, body) = common::upload(&app, &admin, &path, None, b"data".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // Empty body.
    let (status, body) = common::upload(&app, &admin, &path, Some("empty.bin"), Vec::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn test_upload_rejects_bodies_over_the_attachment_limit() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let evidence = evidence_fixture(&app, &admin).await;

    // The fixture config caps attachments at 1 MiB.
    let oversized = vec![0u8; 2 * 1024 * 1024];
    let (status, body) = common::upload(
        &app,
        &admin,
        &format!("/api/evidences/{evidence}/upload"),
        Some("dump.bin"),
        oversized,
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{body}");

    // Nothing was stored.
    let response = common::send(
        &app,
        "GET",
        &format!("/api/evidences/{evidence}/attachment"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
