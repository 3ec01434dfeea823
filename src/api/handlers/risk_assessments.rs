// Risk assessment endpoints: CRUD, consistency review, exports

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{
    access, cached, choices, file_response, folder_names, per_status_payload, related,
    require_add, require_change, require_delete, scope,
};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::matrix::{MatrixDefinition, UNDEFINED_NAME};
use crate::domain::quality::{review_risk_assessment, QualityCheck};
use crate::domain::risk::{RiskAssessment, RiskScenario};
use crate::domain::{AssessmentStatus, ObjectType};
use crate::reporting;
use crate::store::RiskAssessmentFilter;

fn parse_status(raw: &str) -> Result<AssessmentStatus, ApiError> {
    AssessmentStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))
}

fn level_name(definition: &MatrixDefinition, proba: i64, impact: i64) -> String {
    definition
        .risk_level(proba, impact)
        .map(|(_, level)| level.name.clone())
        .unwrap_or_else(|| UNDEFINED_NAME.to_string())
}

/// Read shape with project, matrix and folder references resolved.
pub(crate) async fn read_payload(
    state: &AppState,
    assessment: &RiskAssessment,
    names: &HashMap<Uuid, String>,
) -> Result<Value, ApiError> {
    let project_name = state
        .stores
        .projects
        .get(assessment.project_id)
        .await?
        .map(|p| p.name)
        .unwrap_or_default();
    let matrix_name = state
        .stores
        .matrices
        .get(assessment.risk_matrix_id)
        .await?
        .map(|m| m.name)
        .unwrap_or_default();
    Ok(json!({
        "id": assessment.id,
        "name": assessment.name,
        "description": assessment.description,
        "version": assessment.version,
        "status": assessment.status.as_str(),
        "eta": assessment.eta,
        "due_date": assessment.due_date,
        "project": {"id": assessment.project_id, "str": project_name},
        "risk_matrix": {"id": assessment.risk_matrix_id, "str": matrix_name},
        "folder": related(names, assessment.folder_id),
        "created_at": assessment.created_at,
        "updated_at": assessment.updated_at,
    }))
}

/// Consistency review of one assessment against its scenarios and the
/// acceptances covering them.
pub(crate) async fn quality_check_of(
    state: &AppState,
    assessment: &RiskAssessment,
) -> Result<QualityCheck, ApiError> {
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let scenario_ids: Vec<Uuid> = scenarios.iter().map(|s| s.id).collect();
    let accepted = state
        .stores
        .risk_acceptances
        .covered_scenario_ids(&scenario_ids)
        .await?;
    Ok(review_risk_assessment(
        assessment,
        &scenarios,
        &accepted,
        Utc::now().date_naive(),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskAssessmentQuery {
    pub folder: Option<Uuid>,
    pub project: Option<Uuid>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RiskAssessmentQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
    let filter = RiskAssessmentFilter {
        folder_id: query.folder,
        project_id: query.project,
        status: query.status.as_deref().map(parse_status).transpose()?,
        search: query.search,
        ordering: query.ordering,
    };
    let assessments = state.stores.risk_assessments.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    let mut results = Vec::with_capacity(assessments.len());
    for assessment in &assessments {
        results.push(read_payload(&state, assessment, &names).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct RiskAssessmentWrite {
    pub name: String,
    pub project: Uuid,
    pub risk_matrix: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<RiskAssessmentWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let project = state
        .stores
        .projects
        .get(body.project)
        .await?
        .ok_or_else(|| ApiError::bad_request("Unknown project"))?;
    require_add(&state, &user, ObjectType::RiskAssessment, project.folder_id).await?;
    if state.stores.matrices.get(body.risk_matrix).await?.is_none() {
        return Err(ApiError::bad_request("Unknown risk matrix"));
    }
    let status = match body.status.as_deref() {
        None => AssessmentStatus::Planned,
        Some(raw) => parse_status(raw)?,
    };
    let now = Utc::now();
    let assessment = RiskAssessment {
        id: Uuid::new_v4(),
        folder_id: project.folder_id,
        project_id: project.id,
        risk_matrix_id: body.risk_matrix,
        name: body.name,
        description: body.description,
        version: body.version,
        status,
        eta: body.eta,
        due_date: body.due_date,
        created_at: now,
        updated_at: now,
    };
    state.stores.risk_assessments.create(&assessment).await?;
    let names = folder_names(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(read_payload(&state, &assessment, &names).await?),
    ))
}

pub async fn status_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            AssessmentStatus::ALL.iter().map(|s| (s.as_str(), s.label())),
        ))
    })
    .await
}

pub async fn per_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
        let assessments = state
            .stores
            .risk_assessments
            .list(&scope, &RiskAssessmentFilter::default())
            .await?;
        let mut counts: HashMap<AssessmentStatus, usize> = HashMap::new();
        for assessment in &assessments {
            *counts.entry(assessment.status).or_default() += 1;
        }
        Ok(json!({
            "results": per_status_payload(
                AssessmentStatus::ALL
                    .iter()
                    .map(|s| (s.as_str(), s.label(), counts.get(s).copied().unwrap_or(0))),
            )
        }))
    })
    .await
}

pub async fn quality_check_all(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
    let assessments = state
        .stores
        .risk_assessments
        .list(&scope, &RiskAssessmentFilter::default())
        .await?;
    let names = folder_names(&state).await?;
    let mut results = Map::new();
    for assessment in &assessments {
        let check = quality_check_of(&state, assessment).await?;
        results.insert(
            assessment.id.to_string(),
            json!({
                "object": read_payload(&state, assessment, &names).await?,
                "quality_check": check,
            }),
        );
    }
    Ok(Json(json!({"results": results})))
}

async fn fetch_viewable(
    state: &AppState,
    user: &User,
    id: Uuid,
) -> Result<RiskAssessment, ApiError> {
    let access = access(state, user, ObjectType::RiskAssessment).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    state
        .stores
        .risk_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &assessment, &names).await?))
}

#[derive(Debug, Deserialize)]
pub struct RiskAssessmentUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub version: Option<Option<String>>,
    pub status: Option<String>,
    pub eta: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RiskAssessmentUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskAssessment).await?;
    require_change(&access, id)?;
    let mut assessment = state
        .stores
        .risk_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        assessment.name = name;
    }
    if let Some(description) = body.description {
        assessment.description = description;
    }
    if let Some(version) = body.version {
        assessment.version = version;
    }
    if let Some(raw) = body.status {
        assessment.status = parse_status(&raw)?;
    }
    if let Some(eta) = body.eta {
        assessment.eta = eta;
    }
    if let Some(due_date) = body.due_date {
        assessment.due_date = due_date;
    }
    assessment.updated_at = Utc::now();
    state.stores.risk_assessments.update(&assessment).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &assessment, &names).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::RiskAssessment).await?;
    require_delete(&access, id)?;
    if !state.stores.risk_assessments.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    Ok(Json(json!({
        "id": assessment.id,
        "name": assessment.name,
        "description": assessment.description,
        "version": assessment.version,
        "status": assessment.status.as_str(),
        "eta": assessment.eta,
        "due_date": assessment.due_date,
        "project": assessment.project_id,
        "risk_matrix": assessment.risk_matrix_id,
        "folder": assessment.folder_id,
    })))
}

pub async fn quality_check(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let check = quality_check_of(&state, &assessment).await?;
    Ok(Json(json!({"results": check})))
}

/// Assessment with its scenarios and the applied controls attached to
/// each, for the treatment plan view.
pub async fn plan(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let names = folder_names(&state).await?;
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let mut scenario_payloads = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        let mut controls = Vec::new();
        for control_id in &scenario.applied_control_ids {
            if let Some(control) = state.stores.applied_controls.get(*control_id).await? {
                controls.push(json!({
                    "id": control.id,
                    "name": control.name,
                    "description": control.description,
                    "status": control.status.map(|s| s.as_str()),
                    "eta": control.eta,
                    "expiry_date": control.expiry_date,
                    "effort": control.effort.map(|e| e.as_str()),
                    "cost": control.cost,
                }));
            }
        }
        scenario_payloads.push(json!({
            "id": scenario.id,
            "ref_id": scenario.ref_id,
            "name": scenario.name,
            "treatment": scenario.treatment.as_str(),
            "applied_controls": controls,
        }));
    }
    Ok(Json(json!({
        "risk_assessment": read_payload(&state, &assessment, &names).await?,
        "risk_scenarios": scenario_payloads,
    })))
}

/// Applied controls grouped by the scenarios they mitigate.
async fn control_rows(
    state: &AppState,
    scenarios: &[RiskScenario],
) -> Result<Vec<reporting::csv::TreatmentPlanRow>, ApiError> {
    let mut grouped: Vec<(Uuid, Vec<String>)> = Vec::new();
    for scenario in scenarios {
        for control_id in &scenario.applied_control_ids {
            match grouped.iter_mut().find(|(id, _)| id == control_id) {
                Some((_, refs)) => refs.push(scenario.ref_id.clone()),
                None => grouped.push((*control_id, vec![scenario.ref_id.clone()])),
            }
        }
    }
    let mut rows = Vec::with_capacity(grouped.len());
    for (control_id, scenario_refs) in grouped {
        let Some(control) = state.stores.applied_controls.get(control_id).await? else {
            continue;
        };
        let reference_control = match control.reference_control_id {
            Some(rc_id) => state
                .stores
                .reference_controls
                .get(rc_id)
                .await?
                .map(|rc| rc.name)
                .unwrap_or_default(),
            None => String::new(),
        };
        rows.push(reporting::csv::TreatmentPlanRow {
            risk_scenarios: scenario_refs.join(","),
            measure_id: control.id.to_string(),
            measure_name: control.name.clone(),
            measure_desc: control.description.clone().unwrap_or_default(),
            category: control.category.map(|c| c.as_str().to_string()).unwrap_or_default(),
            csf_function: control
                .csf_function
                .map(|f| f.as_str().to_string())
                .unwrap_or_default(),
            reference_control,
            eta: control.eta.map(|d| d.to_string()).unwrap_or_default(),
            effort: control.effort.map(|e| e.as_str().to_string()).unwrap_or_default(),
            cost: control.cost.map(|c| c.to_string()).unwrap_or_default(),
            link: control.link.clone().unwrap_or_default(),
            status: control.status.map(|s| s.as_str().to_string()).unwrap_or_default(),
        });
    }
    Ok(rows)
}

pub async fn treatment_plan_csv(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let rows = control_rows(&state, &scenarios).await?;
    let bytes = reporting::csv::treatment_plan(&rows)?;
    Ok(file_response(
        "text/csv",
        &format!("{}_treatment_plan.csv", assessment.name),
        bytes,
    ))
}

async fn scenario_rows(
    state: &AppState,
    assessment: &RiskAssessment,
    scenarios: &[RiskScenario],
) -> Result<Vec<reporting::csv::RiskAssessmentRow>, ApiError> {
    let matrix = state
        .stores
        .matrices
        .get(assessment.risk_matrix_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Risk matrix missing"))?;
    let definition = matrix.definition()?;

    let mut threat_names: HashMap<Uuid, String> = HashMap::new();
    let mut control_names: HashMap<Uuid, String> = HashMap::new();
    for scenario in scenarios {
        for threat_id in &scenario.threat_ids {
            if !threat_names.contains_key(threat_id) {
                if let Some(threat) = state.stores.threats.get(*threat_id).await? {
                    threat_names.insert(*threat_id, threat.name);
                }
            }
        }
        for control_id in &scenario.applied_control_ids {
            if !control_names.contains_key(control_id) {
                if let Some(control) = state.stores.applied_controls.get(*control_id).await? {
                    control_names.insert(*control_id, control.name);
                }
            }
        }
    }

    let joined = |ids: &[Uuid], names: &HashMap<Uuid, String>| {
        ids.iter()
            .filter_map(|id| names.get(id).cloned())
            .collect::<Vec<_>>()
            .join(",")
    };

    Ok(scenarios
        .iter()
        .map(|s| reporting::csv::RiskAssessmentRow {
            rid: s.ref_id.clone(),
            threats: joined(&s.threat_ids, &threat_names),
            name: s.name.clone(),
            description: s.description.clone().unwrap_or_default(),
            existing_controls: s.existing_controls.clone().unwrap_or_default(),
            current_level: level_name(&definition, s.current_proba, s.current_impact),
            applied_controls: joined(&s.applied_control_ids, &control_names),
            residual_level: level_name(&definition, s.residual_proba, s.residual_impact),
            treatment: s.treatment.as_str().to_string(),
        })
        .collect())
}

pub async fn risk_assessment_csv(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let rows = scenario_rows(&state, &assessment, &scenarios).await?;
    let bytes = reporting::csv::risk_assessment(&rows)?;
    Ok(file_response(
        "text/csv",
        &format!("{}.csv", assessment.name),
        bytes,
    ))
}

pub async fn risk_assessment_pdf(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let project_name = state
        .stores
        .projects
        .get(assessment.project_id)
        .await?
        .map(|p| p.name)
        .unwrap_or_default();
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let rows = scenario_rows(&state, &assessment, &scenarios).await?;

    let mut report = reporting::pdf::TextReport::new(format!("Risk assessment: {}", assessment.name))
        .subtitle(format!(
            "Project: {} | Status: {}",
            project_name,
            assessment.status.label()
        ));
    for row in &rows {
        report.line(format!("{} - {}", row.rid, row.name));
        if !row.threats.is_empty() {
            report.line(format!("  Threats: {}", row.threats));
        }
        report.line(format!(
            "  Current: {} | Residual: {} | Treatment: {}",
            row.current_level, row.residual_level, row.treatment
        ));
        if !row.applied_controls.is_empty() {
            report.line(format!("  Controls: {}", row.applied_controls));
        }
        report.blank();
    }
    if rows.is_empty() {
        report.line("No risk scenario declared.");
    }
    let bytes = report.render()?;
    Ok(file_response(
        "application/pdf",
        &format!("{}.pdf", assessment.name),
        bytes,
    ))
}

pub async fn treatment_plan_pdf(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let assessment = fetch_viewable(&state, &user, id).await?;
    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(assessment.id)
        .await?;
    let rows = control_rows(&state, &scenarios).await?;

    let mut report =
        reporting::pdf::TextReport::new(format!("Treatment plan: {}", assessment.name));
    for row in &rows {
        report.line(format!("{} [{}]", row.measure_name, row.status));
        report.line(format!("  Scenarios: {}", row.risk_scenarios));
        if !row.eta.is_empty() {
            report.line(format!("  ETA: {}", row.eta));
        }
        if !row.measure_desc.is_empty() {
            report.line(format!("  {}", row.measure_desc));
        }
        report.blank();
    }
    if rows.is_empty() {
        report.line("No applied control linked to this assessment.");
    }
    let bytes = report.render()?;
    Ok(file_response(
        "application/pdf",
        &format!("{}_treatment_plan.pdf", assessment.name),
        bytes,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DuplicateBody {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Copies the assessment and all of its scenarios into the same project.
pub async fn duplicate(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    body: Option<Json<DuplicateBody>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let source = fetch_viewable(&state, &user, id).await?;
    require_add(&state, &user, ObjectType::RiskAssessment, source.folder_id).await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let now = Utc::now();
    let copy = RiskAssessment {
        id: Uuid::new_v4(),
        name: body.name.unwrap_or_else(|| format!("{} (copy)", source.name)),
        version: body.version.or_else(|| source.version.clone()),
        status: AssessmentStatus::Planned,
        created_at: now,
        updated_at: now,
        ..source.clone()
    };
    state.stores.risk_assessments.create(&copy).await?;

    let scenarios = state
        .stores
        .risk_scenarios
        .list_for_assessment(source.id)
        .await?;
    for scenario in &scenarios {
        let scenario_copy = RiskScenario {
            id: Uuid::new_v4(),
            risk_assessment_id: copy.id,
            created_at: now,
            updated_at: now,
            ..scenario.clone()
        };
        state.stores.risk_scenarios.create(&scenario_copy).await?;
    }

    let names = folder_names(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(read_payload(&state, &copy, &names).await?),
    ))
}
