// Compliance audit endpoints: CRUD, aggregates, requirement
// assessments and the standalone report export

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
    require_add, require_change, require_delete, scope, visible, IdList,
};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::compliance::{
    ComplianceAssessment, MappingCoverage, RequirementAssessment, RequirementNode,
    RequirementResult, RequirementStatus,
};
use crate::domain::control::{AppliedControl, ControlStatus};
use crate::domain::iam::User;
use crate::domain::quality::{review_compliance_assessment, QualityCheck};
use crate::domain::{AssessmentStatus, ObjectType};
use crate::reporting;
use crate::reporting::html::{AuditReport, ReportNode};
use crate::store::{AppliedControlFilter, ComplianceAssessmentFilter, RequirementAssessmentFilter};

fn parse_status(raw: &str) -> Result<AssessmentStatus, ApiError> {
    AssessmentStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))
}

fn parse_requirement_status(raw: &str) -> Result<RequirementStatus, ApiError> {
    RequirementStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))
}

fn parse_result(raw: &str) -> Result<RequirementResult, ApiError> {
    RequirementResult::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown result: {}", raw)))
}

/// Read shape with project, framework and folder references resolved.
pub(crate) async fn read_payload(
    state: &AppState,
    audit: &ComplianceAssessment,
    names: &HashMap<Uuid, String>,
) -> Result<Value, ApiError> {
    let project_name = state
        .stores
        .projects
        .get(audit.project_id)
        .await?
        .map(|p| p.name)
        .unwrap_or_default();
    let framework_name = state
        .stores
        .frameworks
        .get(audit.framework_id)
        .await?
        .map(|f| f.name)
        .unwrap_or_default();
    Ok(json!({
        "id": audit.id,
        "name": audit.name,
        "description": audit.description,
        "version": audit.version,
        "status": audit.status.as_str(),
        "eta": audit.eta,
        "due_date": audit.due_date,
        "selected_implementation_groups": audit.selected_groups(),
        "project": {"id": audit.project_id, "str": project_name},
        "framework": {"id": audit.framework_id, "str": framework_name},
        "folder": related(names, audit.folder_id),
        "created_at": audit.created_at,
        "updated_at": audit.updated_at,
    }))
}

/// Consistency review of one audit against its requirement assessments.
pub(crate) async fn quality_check_of(
    state: &AppState,
    audit: &ComplianceAssessment,
) -> Result<QualityCheck, ApiError> {
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let titles: HashMap<Uuid, String> = state
        .stores
        .requirement_nodes
        .list_for_framework(audit.framework_id)
        .await?
        .iter()
        .map(|n| (n.id, n.display_title()))
        .collect();
    let requirements: Vec<(RequirementAssessment, String)> = assessments
        .into_iter()
        .map(|ra| {
            let title = titles.get(&ra.requirement_id).cloned().unwrap_or_default();
            (ra, title)
        })
        .collect();
    Ok(review_compliance_assessment(
        audit,
        &requirements,
        Utc::now().date_naive(),
    ))
}

/// Done assessments over all assessments, in percent.
fn progress_of(assessments: &[RequirementAssessment]) -> u32 {
    if assessments.is_empty() {
        return 0;
    }
    let done = assessments
        .iter()
        .filter(|ra| ra.status == RequirementStatus::Done)
        .count();
    ((done * 100) / assessments.len()) as u32
}

#[derive(Debug, Default, Deserialize)]
pub struct ComplianceAssessmentQuery {
    pub folder: Option<Uuid>,
    pub project: Option<Uuid>,
    pub framework: Option<Uuid>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ComplianceAssessmentQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
    let filter = ComplianceAssessmentFilter {
        folder_id: query.folder,
        project_id: query.project,
        framework_id: query.framework,
        status: query.status.as_deref().map(parse_status).transpose()?,
        search: query.search,
        ordering: query.ordering,
    };
    let audits = state.stores.compliance_assessments.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    let mut results = Vec::with_capacity(audits.len());
    for audit in &audits {
        results.push(read_payload(&state, audit, &names).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct ComplianceAssessmentWrite {
    pub name: String,
    pub project: Uuid,
    pub framework: Uuid,
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
    #[serde(default)]
    pub selected_implementation_groups: Option<Vec<String>>,
    /// Existing audit to seed results from, same framework or through a
    /// published requirement mapping set.
    #[serde(default)]
    pub baseline: Option<Uuid>,
    #[serde(default)]
    pub create_applied_controls_from_suggestions: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<ComplianceAssessmentWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let project = state
        .stores
        .projects
        .get(body.project)
        .await?
        .ok_or_else(|| ApiError::bad_request("Unknown project"))?;
    require_add(&state, &user, ObjectType::ComplianceAssessment, project.folder_id).await?;
    let framework = state
        .stores
        .frameworks
        .get(body.framework)
        .await?
        .ok_or_else(|| ApiError::bad_request("Unknown framework"))?;

    if let Some(groups) = &body.selected_implementation_groups {
        let declared: Vec<String> = framework
            .implementation_groups()
            .into_iter()
            .map(|g| g.ref_id)
            .collect();
        if let Some(unknown) = groups.iter().find(|g| !declared.contains(g)) {
            return Err(ApiError::bad_request(format!(
                "Unknown implementation group: {}",
                unknown
            )));
        }
    }

    let status = match body.status.as_deref() {
        None => AssessmentStatus::Planned,
        Some(raw) => parse_status(raw)?,
    };
    let now = Utc::now();
    let audit = ComplianceAssessment {
        id: Uuid::new_v4(),
        folder_id: project.folder_id,
        project_id: project.id,
        framework_id: framework.id,
        name: body.name,
        description: body.description,
        version: body.version,
        status,
        eta: body.eta,
        due_date: body.due_date,
        selected_implementation_groups: body
            .selected_implementation_groups
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(crate::core::errors::AegisError::from)?,
        created_at: now,
        updated_at: now,
    };
    state.stores.compliance_assessments.create(&audit).await?;

    // One assessment per assessable requirement in the selected groups.
    let selected = audit.selected_groups();
    let nodes = state
        .stores
        .requirement_nodes
        .list_for_framework(framework.id)
        .await?;
    let mut created: Vec<RequirementAssessment> = Vec::new();
    for node in nodes.iter().filter(|n| n.assessable) {
        if !node.in_selected_groups(&selected) {
            continue;
        }
        let ra = RequirementAssessment {
            id: Uuid::new_v4(),
            folder_id: audit.folder_id,
            compliance_assessment_id: audit.id,
            requirement_id: node.id,
            status: RequirementStatus::ToDo,
            result: RequirementResult::NotAssessed,
            score: None,
            is_scored: false,
            observation: None,
            evidence_ids: Vec::new(),
            applied_control_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.stores.requirement_assessments.create(&ra).await?;
        created.push(ra);
    }

    if let Some(baseline_id) = body.baseline {
        apply_baseline(&state, &user, &audit, baseline_id, &mut created).await?;
    }

    if body.create_applied_controls_from_suggestions {
        require_add(&state, &user, ObjectType::AppliedControl, audit.folder_id).await?;
        for ra in &mut created {
            suggest_controls_for(&state, &audit, ra).await?;
        }
    }

    let names = folder_names(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(read_payload(&state, &audit, &names).await?),
    ))
}

/// Seeds the fresh requirement assessments from a baseline audit. Same
/// framework copies results one to one; otherwise full-coverage entries
/// of the mapping set between the two frameworks carry the result over.
async fn apply_baseline(
    state: &AppState,
    user: &User,
    audit: &ComplianceAssessment,
    baseline_id: Uuid,
    created: &mut [RequirementAssessment],
) -> Result<(), ApiError> {
    let access = access(state, user, ObjectType::ComplianceAssessment).await?;
    if !access.view.contains(&baseline_id) {
        return Err(ApiError::bad_request("Unknown baseline"));
    }
    let baseline = state
        .stores
        .compliance_assessments
        .get(baseline_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Unknown baseline"))?;
    let baseline_ras = state
        .stores
        .requirement_assessments
        .list_for_audit(baseline.id)
        .await?;

    if baseline.framework_id == audit.framework_id {
        let by_requirement: HashMap<Uuid, &RequirementAssessment> =
            baseline_ras.iter().map(|ra| (ra.requirement_id, ra)).collect();
        for ra in created.iter_mut() {
            if let Some(source) = by_requirement.get(&ra.requirement_id) {
                ra.status = source.status;
                ra.result = source.result;
                ra.score = source.score;
                ra.is_scored = source.is_scored;
                ra.observation = source.observation.clone();
                ra.evidence_ids = source.evidence_ids.clone();
                ra.applied_control_ids = source.applied_control_ids.clone();
                ra.updated_at = Utc::now();
                state.stores.requirement_assessments.update(ra).await?;
            }
        }
        return Ok(());
    }

    let set = state
        .stores
        .mappings
        .find_between(baseline.framework_id, audit.framework_id)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request("No requirement mapping set between the two frameworks")
        })?;
    let mappings = state.stores.mappings.list_mappings(set.id).await?;
    // Orient the set so source is always the baseline side.
    let mut target_of: HashMap<Uuid, Uuid> = HashMap::new();
    for mapping in &mappings {
        if mapping.coverage != MappingCoverage::Full {
            continue;
        }
        if set.source_framework_id == baseline.framework_id {
            target_of.insert(mapping.source_requirement_id, mapping.target_requirement_id);
        } else {
            target_of.insert(mapping.target_requirement_id, mapping.source_requirement_id);
        }
    }
    let by_target: HashMap<Uuid, &RequirementAssessment> = baseline_ras
        .iter()
        .filter_map(|ra| target_of.get(&ra.requirement_id).map(|t| (*t, ra)))
        .collect();
    for ra in created.iter_mut() {
        if let Some(source) = by_target.get(&ra.requirement_id) {
            ra.result = source.result;
            ra.status = source.status;
            ra.observation = source.observation.clone();
            ra.evidence_ids = source.evidence_ids.clone();
            ra.applied_control_ids = source.applied_control_ids.clone();
            ra.updated_at = Utc::now();
            state.stores.requirement_assessments.update(ra).await?;
        }
    }
    Ok(())
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
        let scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
        let audits = state
            .stores
            .compliance_assessments
            .list(&scope, &ComplianceAssessmentFilter::default())
            .await?;
        let mut counts: HashMap<AssessmentStatus, usize> = HashMap::new();
        for audit in &audits {
            *counts.entry(audit.status).or_default() += 1;
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
    let scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
    let audits = state
        .stores
        .compliance_assessments
        .list(&scope, &ComplianceAssessmentFilter::default())
        .await?;
    let names = folder_names(&state).await?;
    let mut results = Map::new();
    for audit in &audits {
        let check = quality_check_of(&state, audit).await?;
        results.insert(
            audit.id.to_string(),
            json!({
                "object": read_payload(&state, audit, &names).await?,
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
) -> Result<ComplianceAssessment, ApiError> {
    let access = access(state, user, ObjectType::ComplianceAssessment).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    state
        .stores
        .compliance_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &audit, &names).await?))
}

#[derive(Debug, Deserialize)]
pub struct ComplianceAssessmentUpdate {
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
    Json(body): Json<ComplianceAssessmentUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::ComplianceAssessment).await?;
    require_change(&access, id)?;
    let mut audit = state
        .stores
        .compliance_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        audit.name = name;
    }
    if let Some(description) = body.description {
        audit.description = description;
    }
    if let Some(version) = body.version {
        audit.version = version;
    }
    if let Some(raw) = body.status {
        audit.status = parse_status(&raw)?;
    }
    if let Some(eta) = body.eta {
        audit.eta = eta;
    }
    if let Some(due_date) = body.due_date {
        audit.due_date = due_date;
    }
    audit.updated_at = Utc::now();
    state.stores.compliance_assessments.update(&audit).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &audit, &names).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::ComplianceAssessment).await?;
    require_delete(&access, id)?;
    if !state.stores.compliance_assessments.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    Ok(Json(json!({
        "id": audit.id,
        "name": audit.name,
        "description": audit.description,
        "version": audit.version,
        "status": audit.status.as_str(),
        "eta": audit.eta,
        "due_date": audit.due_date,
        "selected_implementation_groups": audit.selected_groups(),
        "project": audit.project_id,
        "framework": audit.framework_id,
        "folder": audit.folder_id,
    })))
}

/// `{ref_id: name}` of the groups narrowing this audit, every declared
/// group when the audit is not narrowed.
pub async fn selected_implementation_groups(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    cached(&state, CacheTier::Medium, &user, &uri, async {
        let framework = state
            .stores
            .frameworks
            .get(audit.framework_id)
            .await?
            .ok_or_else(ApiError::not_found)?;
        let selected = audit.selected_groups();
        let mut out = Map::new();
        for group in framework.implementation_groups() {
            if selected.is_empty() || selected.contains(&group.ref_id) {
                out.insert(group.ref_id, Value::String(group.name));
            }
        }
        Ok(Value::Object(out))
    })
    .await
}

pub async fn quality_check(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let check = quality_check_of(&state, &audit).await?;
    Ok(Json(json!({"results": check})))
}

/// Mean score of scored requirements against the framework scale, -1
/// when nothing is scored yet.
pub async fn global_score(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    cached(&state, CacheTier::Short, &user, &uri, async {
        let framework = state
            .stores
            .frameworks
            .get(audit.framework_id)
            .await?
            .ok_or_else(ApiError::not_found)?;
        let assessments = state
            .stores
            .requirement_assessments
            .list_for_audit(audit.id)
            .await?;
        let scores: Vec<i64> = assessments
            .iter()
            .filter(|ra| ra.is_scored && ra.result != RequirementResult::NotApplicable)
            .filter_map(|ra| ra.score)
            .collect();
        let score = if scores.is_empty() {
            json!(-1)
        } else {
            let mean = scores.iter().sum::<i64>() as f64 / scores.len() as f64;
            json!((mean * 10.0).round() / 10.0)
        };
        Ok(json!({
            "score": score,
            "max_score": framework.max_score,
            "min_score": framework.min_score,
            "scores_definition": framework.scores(),
        }))
    })
    .await
}

/// Result and status distributions with chart colors.
pub async fn donut_data(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    cached(&state, CacheTier::Short, &user, &uri, async {
        let assessments = state
            .stores
            .requirement_assessments
            .list_for_audit(audit.id)
            .await?;
        let mut result_counts: HashMap<RequirementResult, usize> = HashMap::new();
        let mut status_counts: HashMap<RequirementStatus, usize> = HashMap::new();
        for ra in &assessments {
            *result_counts.entry(ra.result).or_default() += 1;
            *status_counts.entry(ra.status).or_default() += 1;
        }
        let result: Vec<Value> = RequirementResult::ALL
            .iter()
            .map(|r| {
                json!({
                    "name": r.as_str(),
                    "localName": r.label(),
                    "value": result_counts.get(r).copied().unwrap_or(0),
                    "itemStyle": {"color": r.color()},
                })
            })
            .collect();
        let status: Vec<Value> = RequirementStatus::ALL
            .iter()
            .map(|s| {
                json!({
                    "name": s.as_str(),
                    "localName": s.label(),
                    "value": status_counts.get(s).copied().unwrap_or(0),
                })
            })
            .collect();
        Ok(json!({"results": {"result": result, "status": status}}))
    })
    .await
}

/// Applied controls linked to the audit's requirements, grouped by
/// status. Controls without a status land in the `none` bucket.
async fn action_plan_buckets(
    state: &AppState,
    audit: &ComplianceAssessment,
) -> Result<Vec<(&'static str, Vec<AppliedControl>)>, ApiError> {
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let mut control_ids: Vec<Uuid> = Vec::new();
    for ra in &assessments {
        for control_id in &ra.applied_control_ids {
            if !control_ids.contains(control_id) {
                control_ids.push(*control_id);
            }
        }
    }
    let mut buckets: Vec<(&'static str, Vec<AppliedControl>)> = vec![
        ("none", Vec::new()),
        ("to_do", Vec::new()),
        ("in_progress", Vec::new()),
        ("on_hold", Vec::new()),
        ("active", Vec::new()),
        ("deprecated", Vec::new()),
    ];
    for control_id in control_ids {
        let Some(control) = state.stores.applied_controls.get(control_id).await? else {
            continue;
        };
        let key = control.status.map_or("none", ControlStatus::as_str);
        if let Some((_, bucket)) = buckets.iter_mut().find(|(name, _)| *name == key) {
            bucket.push(control);
        }
    }
    Ok(buckets)
}

fn control_summary(control: &AppliedControl) -> Value {
    json!({
        "id": control.id,
        "name": control.name,
        "description": control.description,
        "category": control.category.map(|c| c.as_str()),
        "csf_function": control.csf_function.map(|f| f.as_str()),
        "status": control.status.map(|s| s.as_str()),
        "eta": control.eta,
        "expiry_date": control.expiry_date,
        "effort": control.effort.map(|e| e.as_str()),
        "cost": control.cost,
    })
}

pub async fn action_plan(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let buckets = action_plan_buckets(&state, &audit).await?;
    let mut results = Map::new();
    for (name, controls) in buckets {
        results.insert(
            name.to_string(),
            Value::Array(controls.iter().map(control_summary).collect()),
        );
    }
    Ok(Json(json!({"results": results})))
}

pub async fn action_plan_pdf(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let buckets = action_plan_buckets(&state, &audit).await?;

    let mut report =
        reporting::pdf::TextReport::new(format!("Action plan: {}", audit.name));
    let mut empty = true;
    for (name, controls) in &buckets {
        if controls.is_empty() {
            continue;
        }
        empty = false;
        report.line(format!("[{}]", name));
        for control in controls {
            report.line(format!("- {}", control.name));
            if let Some(eta) = control.eta {
                report.line(format!("  ETA: {}", eta));
            }
            if let Some(description) = &control.description {
                report.line(format!("  {}", description));
            }
        }
        report.blank();
    }
    if empty {
        report.line("No applied control linked to this audit.");
    }
    let bytes = report.render()?;
    Ok(file_response(
        "application/pdf",
        &format!("{}_action_plan.pdf", audit.name),
        bytes,
    ))
}

pub async fn compliance_assessment_csv(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let selected = audit.selected_groups();
    let nodes = state
        .stores
        .requirement_nodes
        .list_for_framework(audit.framework_id)
        .await?;
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let by_requirement: HashMap<Uuid, &RequirementAssessment> =
        assessments.iter().map(|ra| (ra.requirement_id, ra)).collect();

    let mut rows = Vec::new();
    for node in nodes.iter().filter(|n| n.in_selected_groups(&selected)) {
        let mut row = reporting::csv::ComplianceRow {
            ref_id: node.ref_id.clone().unwrap_or_else(|| node.urn.clone()),
            description: node.description.clone().or_else(|| node.name.clone()).unwrap_or_default(),
            ..Default::default()
        };
        if node.assessable {
            if let Some(ra) = by_requirement.get(&node.id) {
                row.compliance_result = ra.result.as_str().to_string();
                row.progress = ra.status.as_str().to_string();
                row.score = ra.score.map(|s| s.to_string()).unwrap_or_default();
                row.observations = ra.observation.clone().unwrap_or_default();
            }
        }
        rows.push(row);
    }
    let bytes = reporting::csv::compliance_assessment(&rows)?;
    Ok(file_response("text/csv", "audit_export.csv", bytes))
}

fn assessment_summary(ra: &RequirementAssessment) -> Value {
    json!({
        "id": ra.id,
        "status": ra.status.as_str(),
        "result": ra.result.as_str(),
        "score": ra.score,
        "is_scored": ra.is_scored,
        "observation": ra.observation,
    })
}

fn tree_nodes(
    nodes: &[RequirementNode],
    selected: &[String],
    by_requirement: &HashMap<Uuid, &RequirementAssessment>,
    parent_urn: Option<&str>,
) -> Vec<Value> {
    let mut children: Vec<&RequirementNode> = nodes
        .iter()
        .filter(|n| n.parent_urn.as_deref() == parent_urn && n.in_selected_groups(selected))
        .collect();
    children.sort_by_key(|n| n.order_id);
    children
        .into_iter()
        .map(|node| {
            json!({
                "id": node.id,
                "urn": node.urn,
                "ref_id": node.ref_id,
                "name": node.name,
                "description": node.description,
                "assessable": node.assessable,
                "requirement_assessment": by_requirement.get(&node.id).map(|ra| assessment_summary(ra)),
                "children": tree_nodes(nodes, selected, by_requirement, Some(&node.urn)),
            })
        })
        .collect()
}

/// Requirement tree with each node's assessment attached.
pub async fn tree(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let selected = audit.selected_groups();
    let nodes = state
        .stores
        .requirement_nodes
        .list_for_framework(audit.framework_id)
        .await?;
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let by_requirement: HashMap<Uuid, &RequirementAssessment> =
        assessments.iter().map(|ra| (ra.requirement_id, ra)).collect();
    Ok(Json(json!({
        "results": tree_nodes(&nodes, &selected, &by_requirement, None)
    })))
}

/// Flat requirements with their assessments, for the table view.
pub async fn requirements_list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let selected = audit.selected_groups();
    let nodes = state
        .stores
        .requirement_nodes
        .list_for_framework(audit.framework_id)
        .await?;
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let requirements: Vec<Value> = nodes
        .iter()
        .filter(|n| n.in_selected_groups(&selected))
        .map(|node| {
            json!({
                "id": node.id,
                "urn": node.urn,
                "parent_urn": node.parent_urn,
                "ref_id": node.ref_id,
                "name": node.name,
                "description": node.description,
                "order_id": node.order_id,
                "assessable": node.assessable,
            })
        })
        .collect();
    let requirement_assessments: Vec<Value> = assessments
        .iter()
        .map(|ra| {
            let mut payload = assessment_summary(ra);
            if let Some(object) = payload.as_object_mut() {
                object.insert("requirement".to_string(), json!(ra.requirement_id));
                object.insert("evidences".to_string(), json!(ra.evidence_ids));
                object.insert("applied_controls".to_string(), json!(ra.applied_control_ids));
            }
            payload
        })
        .collect();
    Ok(Json(json!({
        "requirements": requirements,
        "requirement_assessments": requirement_assessments,
    })))
}

fn report_nodes(
    state_names: &ReportContext,
    nodes: &[RequirementNode],
    selected: &[String],
    by_requirement: &HashMap<Uuid, &RequirementAssessment>,
    parent_urn: Option<&str>,
) -> Vec<ReportNode> {
    let mut children: Vec<&RequirementNode> = nodes
        .iter()
        .filter(|n| n.parent_urn.as_deref() == parent_urn && n.in_selected_groups(selected))
        .collect();
    children.sort_by_key(|n| n.order_id);
    children
        .into_iter()
        .map(|node| {
            let ra = by_requirement.get(&node.id);
            ReportNode {
                title: node.display_title(),
                description: node.description.clone(),
                assessable: node.assessable,
                status: ra.map(|r| r.status.label().to_string()),
                result: ra.map(|r| r.result.label().to_string()),
                result_color: ra.map(|r| r.result.color().to_string()),
                score: ra.and_then(|r| if r.is_scored { r.score } else { None }),
                observation: ra.and_then(|r| r.observation.clone()),
                applied_controls: ra
                    .map(|r| {
                        r.applied_control_ids
                            .iter()
                            .filter_map(|c| state_names.control_names.get(c).cloned())
                            .collect()
                    })
                    .unwrap_or_default(),
                evidences: ra
                    .map(|r| {
                        r.evidence_ids
                            .iter()
                            .filter_map(|e| state_names.evidence_files.get(e).cloned())
                            .collect()
                    })
                    .unwrap_or_default(),
                children: report_nodes(state_names, nodes, selected, by_requirement, Some(&node.urn)),
            }
        })
        .collect()
}

struct ReportContext {
    control_names: HashMap<Uuid, String>,
    evidence_files: HashMap<Uuid, String>,
}

/// Zip with a standalone HTML report and the evidence attachments.
pub async fn export(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    let framework = state
        .stores
        .frameworks
        .get(audit.framework_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let selected = audit.selected_groups();
    let nodes = state
        .stores
        .requirement_nodes
        .list_for_framework(framework.id)
        .await?;
    let assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let by_requirement: HashMap<Uuid, &RequirementAssessment> =
        assessments.iter().map(|ra| (ra.requirement_id, ra)).collect();

    let mut context = ReportContext {
        control_names: HashMap::new(),
        evidence_files: HashMap::new(),
    };
    let mut attachments: Vec<(String, Vec<u8>)> = Vec::new();
    for ra in &assessments {
        for control_id in &ra.applied_control_ids {
            if !context.control_names.contains_key(control_id) {
                if let Some(control) = state.stores.applied_controls.get(*control_id).await? {
                    context.control_names.insert(*control_id, control.name);
                }
            }
        }
        for evidence_id in &ra.evidence_ids {
            if context.evidence_files.contains_key(evidence_id) {
                continue;
            }
            let Some(evidence) = state.stores.evidences.get(*evidence_id).await? else {
                continue;
            };
            if let Some(name) = &evidence.attachment_name {
                if let Some(data) = state.stores.evidences.get_attachment(evidence.id).await? {
                    context.evidence_files.insert(evidence.id, name.clone());
                    attachments.push((name.clone(), data));
                }
            }
        }
    }

    let report = AuditReport {
        audit_name: audit.name.clone(),
        framework_name: framework.name.clone(),
        progress: progress_of(&assessments),
        nodes: report_nodes(&context, &nodes, &selected, &by_requirement, None),
    };
    let html = reporting::html::audit_report_html(&report);
    let bytes = reporting::html::audit_archive(&html, &attachments)?;
    let filename = format!(
        "{}-{}-{}.zip",
        audit.name,
        framework.name,
        Utc::now().format("%Y-%m-%d-%H-%M")
    );
    Ok(file_response("application/zip", &filename, bytes))
}

/// Creates applied controls from the reference controls suggested by a
/// requirement, skipping references the assessment already implements.
async fn suggest_controls_for(
    state: &AppState,
    audit: &ComplianceAssessment,
    ra: &mut RequirementAssessment,
) -> Result<usize, ApiError> {
    let Some(node) = state.stores.requirement_nodes.get(ra.requirement_id).await? else {
        return Ok(0);
    };
    if node.reference_control_ids.is_empty() {
        return Ok(0);
    }
    let existing = state
        .stores
        .applied_controls
        .list(
            &[audit.folder_id],
            &AppliedControlFilter::default(),
        )
        .await?;
    let mut created = 0;
    for rc_id in &node.reference_control_ids {
        let Some(reference) = state.stores.reference_controls.get(*rc_id).await? else {
            continue;
        };
        let control_id = match existing
            .iter()
            .find(|c| c.reference_control_id == Some(*rc_id))
        {
            Some(control) => control.id,
            None => {
                let now = Utc::now();
                let control = AppliedControl {
                    id: Uuid::new_v4(),
                    folder_id: audit.folder_id,
                    name: reference.name.clone(),
                    description: reference.description.clone(),
                    category: reference.category,
                    csf_function: reference.csf_function,
                    status: Some(ControlStatus::ToDo),
                    eta: None,
                    expiry_date: None,
                    effort: None,
                    cost: None,
                    link: None,
                    reference_control_id: Some(reference.id),
                    evidence_ids: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                state.stores.applied_controls.create(&control).await?;
                created += 1;
                control.id
            }
        };
        if !ra.applied_control_ids.contains(&control_id) {
            ra.applied_control_ids.push(control_id);
        }
    }
    ra.updated_at = Utc::now();
    state.stores.requirement_assessments.update(ra).await?;
    Ok(created)
}

pub async fn create_suggested_applied_controls(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let audit = fetch_viewable(&state, &user, id).await?;
    require_add(&state, &user, ObjectType::AppliedControl, audit.folder_id).await?;
    let mut assessments = state
        .stores
        .requirement_assessments
        .list_for_audit(audit.id)
        .await?;
    let mut created = 0;
    for ra in &mut assessments {
        created += suggest_controls_for(&state, &audit, ra).await?;
    }
    state.cache.invalidate_all();
    Ok(Json(json!({"count": created})))
}

async fn ra_read_payload(
    state: &AppState,
    ra: &RequirementAssessment,
) -> Result<Value, ApiError> {
    let (requirement_title, audit_name) = {
        let title = state
            .stores
            .requirement_nodes
            .get(ra.requirement_id)
            .await?
            .map(|n| n.display_title())
            .unwrap_or_default();
        let audit = state
            .stores
            .compliance_assessments
            .get(ra.compliance_assessment_id)
            .await?
            .map(|a| a.name)
            .unwrap_or_default();
        (title, audit)
    };
    Ok(json!({
        "id": ra.id,
        "status": ra.status.as_str(),
        "result": ra.result.as_str(),
        "score": ra.score,
        "is_scored": ra.is_scored,
        "observation": ra.observation,
        "requirement": {"id": ra.requirement_id, "str": requirement_title},
        "compliance_assessment": {"id": ra.compliance_assessment_id, "str": audit_name},
        "folder": ra.folder_id,
        "evidences": ra.evidence_ids,
        "applied_controls": ra.applied_control_ids,
        "created_at": ra.created_at,
        "updated_at": ra.updated_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RequirementAssessmentQuery {
    pub compliance_assessment: Option<Uuid>,
    pub requirement: Option<Uuid>,
    pub status: Option<String>,
    pub result: Option<String>,
}

pub async fn list_requirement_assessments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RequirementAssessmentQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementAssessment).await?;
    let scope = scope(&state, &user, ObjectType::RequirementAssessment).await?;
    let filter = RequirementAssessmentFilter {
        compliance_assessment_id: query.compliance_assessment,
        requirement_id: query.requirement,
        status: query.status.as_deref().map(parse_requirement_status).transpose()?,
        result: query.result.as_deref().map(parse_result).transpose()?,
    };
    let assessments = state
        .stores
        .requirement_assessments
        .list(&scope, &filter)
        .await?;
    let assessments = visible(assessments, &access.view, |ra| ra.id);
    let mut results = Vec::with_capacity(assessments.len());
    for ra in &assessments {
        results.push(ra_read_payload(&state, ra).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

pub async fn requirement_status_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            RequirementStatus::ALL.iter().map(|s| (s.as_str(), s.label())),
        ))
    })
    .await
}

pub async fn requirement_result_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            RequirementResult::ALL.iter().map(|r| (r.as_str(), r.label())),
        ))
    })
    .await
}

pub async fn retrieve_requirement_assessment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementAssessment).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let ra = state
        .stores
        .requirement_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(ra_read_payload(&state, &ra).await?))
}

#[derive(Debug, Deserialize)]
pub struct RequirementAssessmentUpdate {
    pub status: Option<String>,
    pub result: Option<String>,
    pub score: Option<Option<i64>>,
    pub is_scored: Option<bool>,
    pub observation: Option<Option<String>>,
    pub evidences: Option<IdList>,
    pub applied_controls: Option<IdList>,
}

pub async fn update_requirement_assessment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RequirementAssessmentUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementAssessment).await?;
    require_change(&access, id)?;
    let mut ra = state
        .stores
        .requirement_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(raw) = body.status {
        ra.status = parse_requirement_status(&raw)?;
    }
    if let Some(raw) = body.result {
        ra.result = parse_result(&raw)?;
    }
    if let Some(score) = body.score {
        if let Some(value) = score {
            let audit = state
                .stores
                .compliance_assessments
                .get(ra.compliance_assessment_id)
                .await?
                .ok_or_else(ApiError::not_found)?;
            let framework = state
                .stores
                .frameworks
                .get(audit.framework_id)
                .await?
                .ok_or_else(ApiError::not_found)?;
            if value < framework.min_score || value > framework.max_score {
                return Err(ApiError::bad_request(format!(
                    "Score must be between {} and {}",
                    framework.min_score, framework.max_score
                )));
            }
        }
        ra.score = score;
    }
    if let Some(is_scored) = body.is_scored {
        ra.is_scored = is_scored;
    }
    if let Some(observation) = body.observation {
        ra.observation = observation;
    }
    if let Some(evidences) = body.evidences {
        ra.evidence_ids = evidences.into_ids()?;
    }
    if let Some(controls) = body.applied_controls {
        ra.applied_control_ids = controls.into_ids()?;
    }
    ra.updated_at = Utc::now();
    state.stores.requirement_assessments.update(&ra).await?;
    // Audit-level aggregates depend on this object.
    state.cache.invalidate_all();
    Ok(Json(ra_read_payload(&state, &ra).await?))
}

pub async fn ra_create_suggested_applied_controls(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementAssessment).await?;
    require_change(&access, id)?;
    let mut ra = state
        .stores
        .requirement_assessments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let audit = state
        .stores
        .compliance_assessments
        .get(ra.compliance_assessment_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    require_add(&state, &user, ObjectType::AppliedControl, audit.folder_id).await?;
    let created = suggest_controls_for(&state, &audit, &mut ra).await?;
    state.cache.invalidate_all();
    Ok(Json(json!({"count": created})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(urn: &str, parent: Option<&str>, order: i64, assessable: bool) -> RequirementNode {
        RequirementNode {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            framework_id: Uuid::new_v4(),
            urn: urn.to_string(),
            parent_urn: parent.map(str::to_string),
            ref_id: Some(urn.to_string()),
            name: None,
            description: None,
            order_id: order,
            assessable,
            implementation_groups: None,
            reference_control_ids: vec![],
            threat_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assessment_for(node: &RequirementNode, status: RequirementStatus) -> RequirementAssessment {
        RequirementAssessment {
            id: Uuid::new_v4(),
            folder_id: node.folder_id,
            compliance_assessment_id: Uuid::new_v4(),
            requirement_id: node.id,
            status,
            result: RequirementResult::NotAssessed,
            score: None,
            is_scored: false,
            observation: None,
            evidence_ids: vec![],
            applied_control_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_progress_counts_done_over_total() {
        let a = node("a", None, 1, true);
        let b = node("b", None, 2, true);
        let ras = vec![
            assessment_for(&a, RequirementStatus::Done),
            assessment_for(&b, RequirementStatus::ToDo),
        ];
        assert_eq!(progress_of(&ras), 50);
        assert_eq!(progress_of(&[]), 0);
    }

    #[test]
    fn test_tree_orders_children_and_attaches_assessments() {
        let root = node("root", None, 1, false);
        let second = node("root.2", Some("root"), 3, true);
        let first = node("root.1", Some("root"), 2, true);
        let ra = assessment_for(&first, RequirementStatus::Done);
        let by_requirement: HashMap<Uuid, &RequirementAssessment> =
            [(first.id, &ra)].into_iter().collect();

        let nodes = vec![root, second.clone(), first.clone()];
        let tree = tree_nodes(&nodes, &[], &by_requirement, None);
        assert_eq!(tree.len(), 1);
        let children = tree[0]["children"].as_array().unwrap();
        assert_eq!(children[0]["urn"], "root.1");
        assert_eq!(children[1]["urn"], "root.2");
        assert_eq!(
            children[0]["requirement_assessment"]["status"],
            "done"
        );
        assert!(children[1]["requirement_assessment"].is_null());
    }
}
