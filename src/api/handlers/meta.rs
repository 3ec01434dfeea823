// Service endpoints and cross-resource aggregates

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{access, cached, folder_names, scope};
use crate::api::responses::ApiError;
use crate::api::AppState;
use crate::domain::control::{ControlCategory, ControlStatus};
use crate::domain::folder::FolderContentType;
use crate::domain::iam::User;
use crate::domain::matrix::{UNDEFINED_COLOR, UNDEFINED_NAME};
use crate::domain::{AssessmentStatus, ObjectType};
use crate::store::{
    AppliedControlFilter, ComplianceAssessmentFilter, EvidenceFilter, ProjectFilter,
    RequirementAssessmentFilter, RiskAcceptanceFilter, RiskAssessmentFilter, RiskScenarioFilter,
};

/// Request counter and latency histogram, wrapped around the router.
pub async fn track(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    crate::core::metrics::record_request(
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn metrics() -> Result<Response, ApiError> {
    let body = crate::core::metrics::encode_text()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

pub async fn build() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "build": option_env!("BUILD_ID").unwrap_or("dev"),
    }))
}

/// Headline object counts for the dashboard.
pub async fn get_counters(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let folder_access = access(&state, &user, ObjectType::Folder).await?;
        let domains = state
            .stores
            .folders
            .list_all()
            .await?
            .iter()
            .filter(|f| f.content_type == FolderContentType::Domain)
            .filter(|f| folder_access.view.contains(&f.id))
            .count();

        let project_scope = scope(&state, &user, ObjectType::Project).await?;
        let projects = state
            .stores
            .projects
            .list(&project_scope, &ProjectFilter::default())
            .await?
            .len();

        let control_scope = scope(&state, &user, ObjectType::AppliedControl).await?;
        let controls = state
            .stores
            .applied_controls
            .list(&control_scope, &AppliedControlFilter::default())
            .await?;
        let policies = controls
            .iter()
            .filter(|c| c.category == Some(ControlCategory::Policy))
            .count();

        let ra_scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
        let risk_assessments = state
            .stores
            .risk_assessments
            .list(&ra_scope, &RiskAssessmentFilter::default())
            .await?
            .len();

        let audit_scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
        let compliance_assessments = state
            .stores
            .compliance_assessments
            .list(&audit_scope, &ComplianceAssessmentFilter::default())
            .await?
            .len();

        Ok(json!({
            "results": {
                "domains": domains,
                "projects": projects,
                "applied_controls": controls.len(),
                "risk_assessments": risk_assessments,
                "compliance_assessments": compliance_assessments,
                "policies": policies,
            }
        }))
    })
    .await
}

/// Posture summary across controls, risk and compliance.
pub async fn get_metrics(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let control_scope = scope(&state, &user, ObjectType::AppliedControl).await?;
        let controls = state
            .stores
            .applied_controls
            .list(&control_scope, &AppliedControlFilter::default())
            .await?;
        let mut status_counts: HashMap<ControlStatus, usize> = HashMap::new();
        for control in &controls {
            if let Some(status) = control.status {
                *status_counts.entry(status).or_default() += 1;
            }
        }
        let by_status = |status: ControlStatus| status_counts.get(&status).copied().unwrap_or(0);

        let ra_scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
        let risk_assessments = state
            .stores
            .risk_assessments
            .list(&ra_scope, &RiskAssessmentFilter::default())
            .await?;
        let scenario_scope = scope(&state, &user, ObjectType::RiskScenario).await?;
        let scenarios = state
            .stores
            .risk_scenarios
            .list(&scenario_scope, &RiskScenarioFilter::default())
            .await?;
        let mut mapped_threats: Vec<Uuid> = Vec::new();
        for scenario in &scenarios {
            for threat_id in &scenario.threat_ids {
                if !mapped_threats.contains(threat_id) {
                    mapped_threats.push(*threat_id);
                }
            }
        }
        let acceptance_scope = scope(&state, &user, ObjectType::RiskAcceptance).await?;
        let acceptances = state
            .stores
            .risk_acceptances
            .list(&acceptance_scope, &RiskAcceptanceFilter::default())
            .await?
            .len();

        let audit_scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
        let audits = state
            .stores
            .compliance_assessments
            .list(&audit_scope, &ComplianceAssessmentFilter::default())
            .await?;
        let used_frameworks = {
            let mut seen: Vec<Uuid> = Vec::new();
            for audit in &audits {
                if !seen.contains(&audit.framework_id) {
                    seen.push(audit.framework_id);
                }
            }
            seen.len()
        };
        let active_audits = audits
            .iter()
            .filter(|a| a.status == AssessmentStatus::InProgress)
            .count();

        let req_scope = scope(&state, &user, ObjectType::RequirementAssessment).await?;
        let requirement_assessments = state
            .stores
            .requirement_assessments
            .list(&req_scope, &RequirementAssessmentFilter::default())
            .await?;
        let mut per_audit: HashMap<Uuid, (usize, usize)> = HashMap::new();
        let mut non_compliant = 0usize;
        for ra in &requirement_assessments {
            let entry = per_audit.entry(ra.compliance_assessment_id).or_default();
            entry.1 += 1;
            if ra.status == crate::domain::compliance::RequirementStatus::Done {
                entry.0 += 1;
            }
            if ra.result == crate::domain::compliance::RequirementResult::NonCompliant {
                non_compliant += 1;
            }
        }
        let progress_avg = if per_audit.is_empty() {
            0
        } else {
            per_audit
                .values()
                .map(|(done, total)| if *total == 0 { 0 } else { done * 100 / total })
                .sum::<usize>()
                / per_audit.len()
        };

        let evidence_scope = scope(&state, &user, ObjectType::Evidence).await?;
        let evidences = state
            .stores
            .evidences
            .list(&evidence_scope, &EvidenceFilter::default())
            .await?
            .len();

        Ok(json!({
            "results": {
                "controls": {
                    "total": controls.len(),
                    "to_do": by_status(ControlStatus::ToDo),
                    "in_progress": by_status(ControlStatus::InProgress),
                    "on_hold": by_status(ControlStatus::OnHold),
                    "active": by_status(ControlStatus::Active),
                    "deprecated": by_status(ControlStatus::Deprecated),
                },
                "risk": {
                    "assessments": risk_assessments.len(),
                    "scenarios": scenarios.len(),
                    "mapped_threats": mapped_threats.len(),
                    "acceptances": acceptances,
                },
                "compliance": {
                    "used_frameworks": used_frameworks,
                    "audits": audits.len(),
                    "active_audits": active_audits,
                    "progress_avg": progress_avg,
                    "non_compliant_items": non_compliant,
                    "evidences": evidences,
                },
            }
        }))
    })
    .await
}

/// Residual risk distribution across every viewable scenario. Levels
/// come from each assessment's own matrix; the undefined bucket is
/// first.
pub async fn get_agg_data(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let ra_scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
        let assessments = state
            .stores
            .risk_assessments
            .list(&ra_scope, &RiskAssessmentFilter::default())
            .await?;

        let mut buckets: Vec<(String, String, usize)> =
            vec![(UNDEFINED_NAME.to_string(), UNDEFINED_COLOR.to_string(), 0)];
        let mut definitions = HashMap::new();
        for assessment in &assessments {
            if !definitions.contains_key(&assessment.risk_matrix_id) {
                let Some(matrix) = state.stores.matrices.get(assessment.risk_matrix_id).await?
                else {
                    continue;
                };
                definitions.insert(assessment.risk_matrix_id, matrix.definition()?);
            }
            let Some(definition) = definitions.get(&assessment.risk_matrix_id) else {
                continue;
            };
            let scenarios = state
                .stores
                .risk_scenarios
                .list_for_assessment(assessment.id)
                .await?;
            for scenario in &scenarios {
                let (name, color) = definition
                    .risk_level(scenario.residual_proba, scenario.residual_impact)
                    .map(|(_, level)| (level.name.clone(), level.color().to_string()))
                    .unwrap_or_else(|| (UNDEFINED_NAME.to_string(), UNDEFINED_COLOR.to_string()));
                match buckets.iter_mut().find(|(n, _, _)| *n == name) {
                    Some((_, _, count)) => *count += 1,
                    None => buckets.push((name, color, 1)),
                }
            }
        }

        Ok(json!({
            "results": {
                "names": buckets.iter().map(|(n, _, _)| n.clone()).collect::<Vec<_>>(),
                "values": buckets.iter().map(|(_, _, c)| *c).collect::<Vec<_>>(),
                "colors": buckets.iter().map(|(_, c, _)| c.clone()).collect::<Vec<_>>(),
            }
        }))
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct ComposerQuery {
    /// Comma-separated risk assessment ids.
    pub risk_assessment: Option<String>,
}

/// Side-by-side view of several risk assessments.
pub async fn get_composer_data(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ComposerQuery>,
) -> Result<Json<Value>, ApiError> {
    let raw = query
        .risk_assessment
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing risk_assessment parameter"))?;
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| ApiError::bad_request(format!("Invalid id: {}", s))))
        .collect::<Result<Vec<_>, _>>()?;

    let access = access(&state, &user, ObjectType::RiskAssessment).await?;
    let names = folder_names(&state).await?;
    let mut objects = Vec::with_capacity(ids.len());
    for id in ids {
        if !access.view.contains(&id) {
            return Err(ApiError::not_found());
        }
        let assessment = state
            .stores
            .risk_assessments
            .get(id)
            .await?
            .ok_or_else(ApiError::not_found)?;
        let scenarios_count = state
            .stores
            .risk_scenarios
            .count_for_assessment(assessment.id)
            .await?;
        let check = super::risk_assessments::quality_check_of(&state, &assessment).await?;
        objects.push(json!({
            "risk_assessment": super::risk_assessments::read_payload(&state, &assessment, &names).await?,
            "scenarios_count": scenarios_count,
            "quality_check": check,
        }));
    }
    Ok(Json(json!({"result": {"risk_assessment_objects": objects}})))
}

/// Graph of applied controls and the audits and risk assessments they
/// serve.
pub async fn get_controls_info(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let control_scope = scope(&state, &user, ObjectType::AppliedControl).await?;
    let controls = state
        .stores
        .applied_controls
        .list(&control_scope, &AppliedControlFilter::default())
        .await?;

    let mut nodes = Vec::new();
    for control in &controls {
        nodes.push(json!({
            "id": control.id,
            "label": control.name,
            "shape": "hexagon",
            "color": "#47e845",
        }));
    }

    // control -> audit edges through requirement assessments
    let req_scope = scope(&state, &user, ObjectType::RequirementAssessment).await?;
    let requirement_assessments = state
        .stores
        .requirement_assessments
        .list(&req_scope, &RequirementAssessmentFilter::default())
        .await?;
    let mut audit_links: HashMap<(Uuid, Uuid), usize> = HashMap::new();
    for ra in &requirement_assessments {
        for control_id in &ra.applied_control_ids {
            *audit_links
                .entry((*control_id, ra.compliance_assessment_id))
                .or_default() += 1;
        }
    }

    let audit_scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
    let audits = state
        .stores
        .compliance_assessments
        .list(&audit_scope, &ComplianceAssessmentFilter::default())
        .await?;
    for audit in &audits {
        nodes.push(json!({
            "id": audit.id,
            "label": audit.name,
            "shape": "circle",
            "color": "#5D4595",
        }));
    }

    // control -> risk assessment edges through scenarios
    let scenario_scope = scope(&state, &user, ObjectType::RiskScenario).await?;
    let scenarios = state
        .stores
        .risk_scenarios
        .list(&scenario_scope, &RiskScenarioFilter::default())
        .await?;
    let mut risk_links: HashMap<(Uuid, Uuid), usize> = HashMap::new();
    for scenario in &scenarios {
        for control_id in &scenario.applied_control_ids {
            *risk_links
                .entry((*control_id, scenario.risk_assessment_id))
                .or_default() += 1;
        }
    }

    let ra_scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
    let risk_assessments = state
        .stores
        .risk_assessments
        .list(&ra_scope, &RiskAssessmentFilter::default())
        .await?;
    for assessment in &risk_assessments {
        nodes.push(json!({
            "id": assessment.id,
            "label": assessment.name,
            "shape": "square",
            "color": "#E6499F",
        }));
    }

    let control_ids: Vec<Uuid> = controls.iter().map(|c| c.id).collect();
    let audit_ids: Vec<Uuid> = audits.iter().map(|a| a.id).collect();
    let risk_ids: Vec<Uuid> = risk_assessments.iter().map(|a| a.id).collect();
    let mut links = Vec::new();
    for ((control_id, audit_id), coverage) in &audit_links {
        if control_ids.contains(control_id) && audit_ids.contains(audit_id) {
            links.push(json!({"source": control_id, "target": audit_id, "coverage": coverage}));
        }
    }
    for ((control_id, assessment_id), coverage) in &risk_links {
        if control_ids.contains(control_id) && risk_ids.contains(assessment_id) {
            links.push(json!({"source": control_id, "target": assessment_id, "coverage": coverage}));
        }
    }

    Ok(Json(json!({"results": {"nodes": nodes, "links": links}})))
}

const TIMELINE_PALETTE: &[&str] = &[
    "#3B82F6", "#8B5CF6", "#EC4899", "#F97316", "#22C55E", "#14B8A6", "#EAB308",
];

/// Applied controls with an ETA, as timeline entries colored per domain.
pub async fn get_timeline_info(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let control_scope = scope(&state, &user, ObjectType::AppliedControl).await?;
    let controls = state
        .stores
        .applied_controls
        .list(&control_scope, &AppliedControlFilter::default())
        .await?;
    let names = folder_names(&state).await?;

    let mut entries = Vec::new();
    let mut color_map = Map::new();
    for control in &controls {
        let Some(eta) = control.eta else {
            continue;
        };
        let domain = names.get(&control.folder_id).cloned().unwrap_or_default();
        if !color_map.contains_key(&domain) {
            let color = TIMELINE_PALETTE[color_map.len() % TIMELINE_PALETTE.len()];
            color_map.insert(domain.clone(), Value::String(color.to_string()));
        }
        entries.push(json!({
            "startDate": control.created_at.date_naive(),
            "endDate": eta,
            "name": control.name,
            "description": control.description,
            "domain": domain,
        }));
    }

    Ok(Json(json!({
        "entries": entries,
        "colorMap": color_map,
    })))
}
