// Risk workflow: assessments, scenarios, acceptance state machine.

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use aegis_grc::iam::{GROUP_ANALYSTS, GROUP_APPROVERS};

use crate::common;

struct RiskSetup {
    app: common::TestApp,
    admin: String,
    domain: Uuid,
    assessment: Uuid,
}

async fn setup() -> RiskSetup {
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
    RiskSetup {
        app,
        admin,
        domain,
        assessment,
    }
}

async fn create_scenario(setup: &RiskSetup, name: &str) -> Uuid {
    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-scenarios",
        json!({
            "name": name,
            "risk_assessment": setup.assessment,
            "current_proba": 2,
            "current_impact": 2,
            "residual_proba": 0,
            "residual_impact": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    common::id_of(&body)
}

#[tokio::test]
async fn test_scenario_levels_follow_the_matrix() {
    let setup = setup().await;
    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-scenarios",
        json!({
            "name": "Data exfiltration",
            "risk_assessment": setup.assessment,
            "current_proba": 2,
            "current_impact": 2,
            "residual_proba": 0,
            "residual_impact": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ref_id"], "R.1");
    assert_eq!(body["current_level"]["name"], "High");
    assert_eq!(body["residual_level"]["name"], "Low");

    // Unset probability and impact map to the undefined level.
    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-scenarios",
        json!({"name": "Unrated", "risk_assessment": setup.assessment}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ref_id"], "R.2");
    assert_eq!(body["current_level"]["value"], -1);
}

#[tokio::test]
async fn test_acceptance_follows_the_state_machine() {
    let setup = setup().await;
    let scenario = create_scenario(&setup, "Data exfiltration").await;
    let approver = common::create_member(
        &setup.app,
        &setup.admin,
        setup.domain,
        GROUP_APPROVERS,
        "approver@example.net",
        "approver-password",
    )
    .await;

    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-acceptances",
        json!({
            "name": "Accept residual risk",
            "folder": setup.domain,
            "approver": approver,
            "risk_scenarios": [scenario],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["state"], "submitted");
    let acceptance = common::id_of(&body);

    // The admin can see it but is not the designated approver.
    let (status, _) = common::post(
        &setup.app,
        &setup.admin,
        &format!("/api/risk-acceptances/{acceptance}/accept"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = common::login(&setup.app, "approver@example.net", "approver-password").await;
    let (status, body) = common::get(&setup.app, &token, "/api/risk-acceptances/to_review").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let (status, _) = common::post(
        &setup.app,
        &token,
        &format!("/api/risk-acceptances/{acceptance}/accept"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = common::get(
        &setup.app,
        &token,
        &format!("/api/risk-acceptances/{acceptance}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "accepted");
    assert!(!body["accepted_at"].is_null());

    // Accepted can be revoked but not rejected.
    let (status, _) = common::post(
        &setup.app,
        &token,
        &format!("/api/risk-acceptances/{acceptance}/reject"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = common::post(
        &setup.app,
        &token,
        &format!("/api/risk-acceptances/{acceptance}/revoke"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_acceptance_without_approver_stays_created() {
    let setup = setup().await;
    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-acceptances",
        json!({"name": "Draft acceptance", "folder": setup.domain}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["state"], "created");
}

#[tokio::test]
async fn test_approver_must_hold_the_approval_permission() {
    let setup = setup().await;
    let scenario = create_scenario(&setup, "Data exfiltration").await;
    let analyst = common::create_member(
        &setup.app,
        &setup.admin,
        setup.domain,
        GROUP_ANALYSTS,
        "analyst@example.net",
        "analyst-password",
    )
    .await;

    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/risk-acceptances",
        json!({
            "name": "Bad approver",
            "folder": setup.domain,
            "approver": analyst,
            "risk_scenarios": [scenario],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
