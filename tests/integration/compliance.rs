// Compliance audits: evaluation seeding, scoring, aggregates, baselines.

use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common;

struct AuditSetup {
    app: common::TestApp,
    admin: String,
    project: Uuid,
    framework: Uuid,
    nodes: Vec<Uuid>,
}

async fn setup() -> AuditSetup {
    let app = common::spawn().await;
    let admin = common::admin_token(&app).await;
    let (framework, nodes) = common::seed_framework(&app).await;
    let domain = common::create_domain(&app, &admin, "Ops").await;
    let project = common::create_project(&app, &admin, domain, "ERP").await;
    AuditSetup {
        app,
        admin,
        project,
        framework,
        nodes,
    }
}

async fn create_audit(setup: &AuditSetup, name: &str, extra: Value) -> Uuid {
    let mut body = json!({
        "name": name,
        "project": setup.project,
        "framework": setup.framework,
    });
    if let (Some(base), Some(more)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in more {
            base.insert(key.clone(), value.clone());
        }
    }
    let (status, body) = common::post(&setup.app, &setup.admin, "/api/compliance-assessments", body).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    common::id_of(&body)
}

async fn assessments_of(setup: &AuditSetup, audit: Uuid) -> Vec<Value> {
    let (status, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments?compliance_assessment={audit}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["results"].as_array().unwrap().clone()
}

#[tokio::test]
async fn test_audit_creates_one_evaluation_per_assessable_requirement() {
    let setup = setup().await;
    let audit = create_audit(&setup, "Annual audit", json!({})).await;

    let results = assessments_of(&setup, audit).await;
    // The section node is not assessable, the two leaves are.
    assert_eq!(results.len(), 2);
    for ra in &results {
        assert_eq!(ra["status"], "to_do");
        assert_eq!(ra["result"], "not_assessed");
    }
}

#[tokio::test]
async fn test_selected_implementation_groups_narrow_the_audit() {
    let setup = setup().await;
    let audit = create_audit(
        &setup,
        "Baseline only",
        json!({"selected_implementation_groups": ["A"]}),
    )
    .await;

    // The leaf restricted to group "B" is out of scope; the unrestricted
    // leaf stays in.
    let results = assessments_of(&setup, audit).await;
    assert_eq!(results.len(), 1);

    let (status, body) = common::post(
        &setup.app,
        &setup.admin,
        "/api/compliance-assessments",
        json!({
            "name": "Bad groups",
            "project": setup.project,
            "framework": setup.framework,
            "selected_implementation_groups": ["Z"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn test_evaluation_update_validates_the_score_range() {
    let setup = setup().await;
    let audit = create_audit(&setup, "Annual audit", json!({})).await;
    let ra = common::id_of(&assessments_of(&setup, audit).await[0]);

    let (status, body) = common::patch(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments/{ra}"),
        json!({"score": 7, "is_scored": true}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.to_string().contains("between 0 and 4"), "{body}");

    let (status, body) = common::patch(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments/{ra}"),
        json!({"status": "done", "result": "compliant", "score": 3, "is_scored": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "done");
    assert_eq!(body["result"], "compliant");
    assert_eq!(body["score"], 3);
}

#[tokio::test]
async fn test_aggregates_reflect_updates_despite_caching() {
    let setup = setup().await;
    let audit = create_audit(&setup, "Annual audit", json!({})).await;

    // Prime the short-lived caches.
    let (status, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/compliance-assessments/{audit}/global_score"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"], -1);
    let (status, _) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/compliance-assessments/{audit}/donut_data"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let ra = common::id_of(&assessments_of(&setup, audit).await[0]);
    let (status, _) = common::patch(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments/{ra}"),
        json!({"status": "done", "result": "compliant", "score": 3, "is_scored": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Evaluation updates flush the response cache, so the aggregates
    // pick up the change immediately.
    let (status, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/compliance-assessments/{audit}/global_score"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"], 3.0);

    let (status, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/compliance-assessments/{audit}/donut_data"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let compliant = body["results"]["result"]
        .as_array()
        .unwrap()
        .iter()
        .find(|bucket| bucket["name"] == "compliant")
        .cloned()
        .unwrap();
    assert_eq!(compliant["value"], 1);
}

#[tokio::test]
async fn test_baseline_seeds_results_for_the_same_framework() {
    let setup = setup().await;
    let audit = create_audit(&setup, "Annual audit", json!({})).await;

    // Mark the first requirement compliant in the baseline audit.
    let requirement = setup.nodes[1];
    let (_, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments?compliance_assessment={audit}&requirement={requirement}"),
    )
    .await;
    let ra = common::id_of(&body["results"].as_array().unwrap()[0]);
    let (status, _) = common::patch(
        &setup.app,
        &setup.admin,
        &format!("/api/requirement-assessments/{ra}"),
        json!({"status": "done", "result": "compliant"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let follow_up = create_audit(&setup, "Follow-up audit", json!({"baseline": audit})).await;
    let (_, body) = common::get(
        &setup.app,
        &setup.admin,
        &format!(
            "/api/requirement-assessments?compliance_assessment={follow_up}&requirement={requirement}"
        ),
    )
    .await;
    let seeded = &body["results"].as_array().unwrap()[0];
    assert_eq!(seeded["result"], "compliant");
    assert_eq!(seeded["status"], "done");
}

#[tokio::test]
async fn test_framework_cannot_be_deleted_while_audited() {
    let setup = setup().await;
    let audit = create_audit(&setup, "Annual audit", json!({})).await;

    let status = common::delete(
        &setup.app,
        &setup.admin,
        &format!("/api/frameworks/{}", setup.framework),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let status = common::delete(
        &setup.app,
        &setup.admin,
        &format!("/api/compliance-assessments/{audit}"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let status = common::delete(
        &setup.app,
        &setup.admin,
        &format!("/api/frameworks/{}", setup.framework),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
