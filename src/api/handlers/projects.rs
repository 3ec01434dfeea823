// Project endpoints

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{
    access, cached, choices, folder_names, related, require_add, require_change, require_delete,
    scope,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::project::{LcStatus, Project};
use crate::domain::ObjectType;
use crate::store::{ComplianceAssessmentFilter, ProjectFilter, RiskAssessmentFilter};

#[derive(Debug, Serialize)]
pub struct ProjectRead {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub internal_reference: Option<String>,
    pub lc_status: String,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

pub(crate) fn read_shape(project: &Project, names: &HashMap<Uuid, String>) -> ProjectRead {
    ProjectRead {
        id: project.id,
        name: project.name.clone(),
        description: project.description.clone(),
        internal_reference: project.internal_reference.clone(),
        lc_status: project.lc_status.as_str().to_string(),
        folder: related(names, project.folder_id),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub folder: Option<Uuid>,
    pub lc_status: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<ListResponse<ProjectRead>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::Project).await?;
    let lc_status = query
        .lc_status
        .map(|raw| {
            LcStatus::parse(&raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown lc_status: {}", raw)))
        })
        .transpose()?;
    let filter = ProjectFilter {
        folder_id: query.folder,
        lc_status,
        search: query.search,
        ordering: query.ordering,
    };
    let projects = state.stores.projects.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        projects.iter().map(|p| read_shape(p, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ProjectWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub internal_reference: Option<String>,
    #[serde(default)]
    pub lc_status: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<ProjectWrite>,
) -> Result<(StatusCode, Json<ProjectRead>), ApiError> {
    require_add(&state, &user, ObjectType::Project, body.folder).await?;
    let lc_status = match body.lc_status.as_deref() {
        None => LcStatus::InDesign,
        Some(raw) => LcStatus::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown lc_status: {}", raw)))?,
    };
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        internal_reference: body.internal_reference,
        lc_status,
        created_at: now,
        updated_at: now,
    };
    state.stores.projects.create(&project).await?;
    state.cache.invalidate_all();
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&project, &names))))
}

#[derive(Debug, Default, Deserialize)]
pub struct NamesQuery {
    /// Comma-separated ids.
    #[serde(default)]
    pub id: Option<String>,
}

fn parse_id_csv(raw: Option<&str>) -> Result<Vec<Uuid>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| ApiError::bad_request(format!("Invalid id: {}", s))))
        .collect()
}

/// `{id: name}` map for the requested ids, restricted to viewable
/// projects.
pub async fn names(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<NamesQuery>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    let mut out = Map::new();
    for id in parse_id_csv(query.id.as_deref())? {
        if !access.view.contains(&id) {
            continue;
        }
        if let Some(project) = state.stores.projects.get(id).await? {
            out.insert(project.id.to_string(), Value::String(project.name));
        }
    }
    Ok(Json(Value::Object(out)))
}

pub async fn lc_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            LcStatus::ALL.iter().map(|s| (s.as_str(), s.label())),
        ))
    })
    .await
}

/// Quality check payload for one project: every risk and compliance
/// assessment under it, with findings.
async fn project_quality_payload(
    state: &AppState,
    project: &Project,
    names: &HashMap<Uuid, String>,
) -> Result<Value, ApiError> {
    let mut risk = Map::new();
    let risk_assessments = state
        .stores
        .risk_assessments
        .list(
            &[project.folder_id],
            &RiskAssessmentFilter {
                project_id: Some(project.id),
                ..Default::default()
            },
        )
        .await?;
    for assessment in &risk_assessments {
        let check = super::risk_assessments::quality_check_of(state, assessment).await?;
        risk.insert(
            assessment.id.to_string(),
            json!({
                "object": super::risk_assessments::read_payload(state, assessment, names).await?,
                "quality_check": check,
            }),
        );
    }

    let mut compliance = Map::new();
    let audits = state
        .stores
        .compliance_assessments
        .list(
            &[project.folder_id],
            &ComplianceAssessmentFilter {
                project_id: Some(project.id),
                ..Default::default()
            },
        )
        .await?;
    for audit in &audits {
        let check = super::compliance::quality_check_of(state, audit).await?;
        compliance.insert(
            audit.id.to_string(),
            json!({
                "object": super::compliance::read_payload(state, audit, names).await?,
                "quality_check": check,
            }),
        );
    }

    Ok(json!({
        "project": read_shape(project, names),
        "risk_assessments": {"objects": risk},
        "compliance_assessments": {"objects": compliance},
    }))
}

pub async fn quality_check_all(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    let scope = scope(&state, &user, ObjectType::Project).await?;
    let projects = state
        .stores
        .projects
        .list(&scope, &ProjectFilter::default())
        .await?;
    let names = folder_names(&state).await?;
    let mut results = Map::new();
    for project in projects.iter().filter(|p| access.view.contains(&p.id)) {
        results.insert(
            project.id.to_string(),
            project_quality_payload(&state, project, &names).await?,
        );
    }
    Ok(Json(json!({"results": results})))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let project = state.stores.projects.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&project, &names)))
}

#[derive(Debug, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub internal_reference: Option<Option<String>>,
    pub lc_status: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProjectUpdate>,
) -> Result<Json<ProjectRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    require_change(&access, id)?;
    let mut project = state.stores.projects.get(id).await?.ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        project.name = name;
    }
    if let Some(description) = body.description {
        project.description = description;
    }
    if let Some(internal_reference) = body.internal_reference {
        project.internal_reference = internal_reference;
    }
    if let Some(raw) = body.lc_status {
        project.lc_status = LcStatus::parse(&raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown lc_status: {}", raw)))?;
    }
    project.updated_at = Utc::now();
    state.stores.projects.update(&project).await?;
    state.cache.invalidate_all();
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&project, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    require_delete(&access, id)?;
    if !state.stores.projects.delete(id).await? {
        return Err(ApiError::not_found());
    }
    state.cache.invalidate_all();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let project = state.stores.projects.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": project.id,
        "name": project.name,
        "description": project.description,
        "internal_reference": project.internal_reference,
        "lc_status": project.lc_status.as_str(),
        "folder": project.folder_id,
    })))
}

pub async fn quality_check(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Project).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let project = state.stores.projects.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(project_quality_payload(&state, &project, &names).await?))
}
