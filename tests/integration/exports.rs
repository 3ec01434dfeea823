// Export endpoints: CSV, PDF and ZIP payloads with download headers.

use axum::http::{header, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::common;

async fn content_type(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_risk_assessment_exports() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &admin, "Ops").await;
    let project = common::create_project(&app, &admin, domain, "ERP").await;
    let matrix = common::create_matrix(&app, &admin, domain, "3x3").await;
    let (status, body) = common::post(
        &app,
        &admin,
        "/api/risk-assessments",
        json!({"name": "Q3 review", "project": project, "risk_matrix": matrix}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let assessment = common::id_of(&body);
    let (status, _) = common::post(
        &app,
        &admin,
        "/api/risk-scenarios",
        json!({"name": "Exfiltration", "risk_assessment": assessment}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = common::send(
        &app,
        "GET",
        &format!("/api/risk-assessments/{assessment}/risk_assessment_csv"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("text/csv"));
    let text = String::from_utf8(common::body_bytes(response).await).unwrap();
    assert!(text.starts_with("rid;threats;name"));
    assert!(text.contains("Exfiltration"));

    let response = common::send(
        &app,
        "GET",
        &format!("/api/risk-assessments/{assessment}/treatment_plan_csv"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(common::body_bytes(response).await).unwrap();
    assert!(text.starts_with("risk_scenarios;measure_id"));

    let response = common::send(
        &app,
        "GET",
        &format!("/api/risk-assessments/{assessment}/risk_assessment_pdf"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("application/pdf"));
    let bytes = common::body_bytes(response).await;
    assert_eq!(&bytes[..5], b"%PDF-");
}

async fn audit_fixture(app: &common::TestApp, admin: &str) -> Uuid {
    let (framework, _) = common::seed_framework(app).await;
    let domain = common::create_domain(app, admin, "Ops").await;
    let project = common::create_project(app, admin, domain, "ERP").await;
    let (status, body) = common::post(
        app,
        admin,
        "/api/compliance-assessments",
        json!({"name": "Annual audit", "project": project, "framework": framework}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    common::id_of(&body)
}

#[tokio::test]
async fn test_compliance_csv_export() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let audit = audit_fixture(&app, &admin).await;

    let response = common::send(
        &app,
        "GET",
        &format!("/api/compliance-assessments/{audit}/compliance_assessment_csv"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("text/csv"));
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("attachment"), "{disposition}");
    let text = String::from_utf8(common::body_bytes(response).await).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "ref_id;description;compliance_result;progress;score;observations"
    );
    // One row per requirement node, sections included.
    assert_eq!(lines.count(), 3);
}

#[tokio::test]
async fn test_audit_action_plan_pdf() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let audit = audit_fixture(&app, &admin).await;

    let response = common::send(
        &app,
        "GET",
        &format!("/api/compliance-assessments/{audit}/action_plan_pdf"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("application/pdf"));
    let bytes = common::body_bytes(response).await;
    assert_eq!(&bytes[..5], b"%PDF-");
}

#[tokio::test]
async fn test_audit_export_archive() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let audit = audit_fixture(&app, &admin).await;

    let response = common::send(
        &app,
        "GET",
        &format!("/api/compliance-assessments/{audit}/export"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("application/zip"));
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains(".zip"), "{disposition}");
    let bytes = common::body_bytes(response).await;
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn test_applied_controls_csv_export() {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let domain = common::create_domain(&app, &admin, "Ops").await;
    let (status, _) = common::post(
        &app,
        &admin,
        "/api/applied-controls",
        json!({"name": "Patch servers", "folder": domain}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = common::send(
        &app,
        "GET",
        "/api/applied-controls/export_csv",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).await.starts_with("text/csv"));
    let text = String::from_utf8(common::body_bytes(response).await).unwrap();
    assert!(text.starts_with("internal_id;name;description"));
    assert!(text.contains("Patch servers"));
}
