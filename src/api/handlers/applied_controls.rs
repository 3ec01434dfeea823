// Applied control endpoints, including the prioritized todo list

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{
    access, cached, choices, file_response, folder_names, ids_or_empty, per_status_payload,
    related, require_add, require_change, require_delete, scope, IdList,
};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::control::{
    AppliedControl, ControlCategory, ControlEffort, ControlStatus, CsfFunction,
};
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::reporting;
use crate::store::AppliedControlFilter;

fn parse_category(raw: &str) -> Result<ControlCategory, ApiError> {
    ControlCategory::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown category: {}", raw)))
}

fn parse_csf_function(raw: &str) -> Result<CsfFunction, ApiError> {
    CsfFunction::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown csf_function: {}", raw)))
}

fn parse_status(raw: &str) -> Result<ControlStatus, ApiError> {
    ControlStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))
}

fn parse_effort(raw: &str) -> Result<ControlEffort, ApiError> {
    ControlEffort::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown effort: {}", raw)))
}

async fn read_payload(
    state: &AppState,
    control: &AppliedControl,
    names: &HashMap<Uuid, String>,
) -> Result<Value, ApiError> {
    let reference_control = match control.reference_control_id {
        Some(id) => state
            .stores
            .reference_controls
            .get(id)
            .await?
            .map(|rc| json!({"id": rc.id, "str": rc.name})),
        None => None,
    };
    let mut evidences = Vec::new();
    for id in &control.evidence_ids {
        if let Some(evidence) = state.stores.evidences.get(*id).await? {
            evidences.push(json!({"id": evidence.id, "str": evidence.name}));
        }
    }
    Ok(json!({
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
        "link": control.link,
        "reference_control": reference_control,
        "evidences": evidences,
        "folder": related(names, control.folder_id),
        "created_at": control.created_at,
        "updated_at": control.updated_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AppliedControlQuery {
    pub folder: Option<Uuid>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub csf_function: Option<String>,
    pub reference_control: Option<Uuid>,
    pub evidence: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

impl AppliedControlQuery {
    fn into_filter(self) -> Result<AppliedControlFilter, ApiError> {
        Ok(AppliedControlFilter {
            folder_id: self.folder,
            status: self.status.as_deref().map(parse_status).transpose()?,
            category: self.category.as_deref().map(parse_category).transpose()?,
            csf_function: self
                .csf_function
                .as_deref()
                .map(parse_csf_function)
                .transpose()?,
            reference_control_id: self.reference_control,
            evidence_id: self.evidence,
            search: self.search,
            ordering: self.ordering,
        })
    }
}

async fn list_payloads(
    state: &AppState,
    user: &User,
    filter: &AppliedControlFilter,
) -> Result<Vec<Value>, ApiError> {
    let scope = scope(state, user, ObjectType::AppliedControl).await?;
    let controls = state.stores.applied_controls.list(&scope, filter).await?;
    let names = folder_names(state).await?;
    let mut results = Vec::with_capacity(controls.len());
    for control in &controls {
        results.push(read_payload(state, control, &names).await?);
    }
    Ok(results)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppliedControlQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(ListResponse::new(
        list_payloads(&state, &user, &filter).await?,
    )))
}

#[derive(Debug, Deserialize)]
pub struct AppliedControlWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub csf_function: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub reference_control: Option<Uuid>,
    #[serde(default)]
    pub evidences: Option<IdList>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<AppliedControlWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_add(&state, &user, ObjectType::AppliedControl, body.folder).await?;
    let now = Utc::now();
    let control = AppliedControl {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        category: body.category.as_deref().map(parse_category).transpose()?,
        csf_function: body
            .csf_function
            .as_deref()
            .map(parse_csf_function)
            .transpose()?,
        status: body.status.as_deref().map(parse_status).transpose()?,
        eta: body.eta,
        expiry_date: body.expiry_date,
        effort: body.effort.as_deref().map(parse_effort).transpose()?,
        cost: body.cost,
        link: body.link,
        reference_control_id: body.reference_control,
        evidence_ids: ids_or_empty(body.evidences)?,
        created_at: now,
        updated_at: now,
    };
    state.stores.applied_controls.create(&control).await?;
    let names = folder_names(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(read_payload(&state, &control, &names).await?),
    ))
}

pub async fn status_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            ControlStatus::ALL.iter().map(|s| (s.as_str(), s.label())),
        ))
    })
    .await
}

pub async fn category_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            ControlCategory::ALL.iter().map(|c| (c.as_str(), c.label())),
        ))
    })
    .await
}

pub async fn csf_function_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            CsfFunction::ALL.iter().map(|f| (f.as_str(), f.label())),
        ))
    })
    .await
}

pub async fn effort_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            ControlEffort::ALL.iter().map(|e| (e.as_str(), e.label())),
        ))
    })
    .await
}

async fn status_buckets(
    state: &AppState,
    user: &User,
    category: Option<ControlCategory>,
) -> Result<Value, ApiError> {
    let scope = scope(state, user, ObjectType::AppliedControl).await?;
    let filter = AppliedControlFilter {
        category,
        ..Default::default()
    };
    let controls = state.stores.applied_controls.list(&scope, &filter).await?;
    let mut counts: HashMap<Option<ControlStatus>, usize> = HashMap::new();
    for control in &controls {
        *counts.entry(control.status).or_default() += 1;
    }
    let mut items: Vec<(&'static str, &'static str, usize)> = vec![(
        "--",
        "Undefined",
        counts.get(&None).copied().unwrap_or(0),
    )];
    items.extend(ControlStatus::ALL.iter().map(|s| {
        (
            s.as_str(),
            s.label(),
            counts.get(&Some(*s)).copied().unwrap_or(0),
        )
    }));
    Ok(json!({"results": per_status_payload(items)}))
}

pub async fn per_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        status_buckets(&state, &user, None).await
    })
    .await
}

/// Controls to act on next: ETA within 30 days (or overdue), not yet
/// active, highest ranking score first.
pub async fn todo(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let scope = scope(&state, &user, ObjectType::AppliedControl).await?;
    let controls = state
        .stores
        .applied_controls
        .list(&scope, &AppliedControlFilter::default())
        .await?;
    let today = Utc::now().date_naive();
    let horizon = today + Duration::days(30);

    let mut due: Vec<&AppliedControl> = controls
        .iter()
        .filter(|c| {
            c.status != Some(ControlStatus::Active)
                && c.status != Some(ControlStatus::Deprecated)
                && c.eta.is_some_and(|eta| eta <= horizon)
        })
        .collect();
    let ids: Vec<Uuid> = due.iter().map(|c| c.id).collect();
    let links = state.stores.applied_controls.link_counts(&ids).await?;
    let score = |c: &AppliedControl| {
        c.ranking_score(links.get(&c.id).copied().unwrap_or(0), today)
    };
    due.sort_by_key(|c| std::cmp::Reverse(score(c)));

    let names = folder_names(&state).await?;
    let mut results = Vec::with_capacity(due.len());
    for control in due {
        let mut payload = read_payload(&state, control, &names).await?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("ranking_score".to_string(), json!(score(control)));
        }
        results.push(payload);
    }
    Ok(Json(json!({"results": results})))
}

/// Controls whose expiry date falls within 30 days and are not already
/// deprecated.
pub async fn to_review(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let scope = scope(&state, &user, ObjectType::AppliedControl).await?;
    let controls = state
        .stores
        .applied_controls
        .list(&scope, &AppliedControlFilter::default())
        .await?;
    let today = Utc::now().date_naive();
    let horizon = today + Duration::days(30);

    let names = folder_names(&state).await?;
    let mut results = Vec::new();
    for control in controls.iter().filter(|c| {
        c.status != Some(ControlStatus::Deprecated)
            && c.expiry_date.is_some_and(|d| d <= horizon)
    }) {
        results.push(read_payload(&state, control, &names).await?);
    }
    Ok(Json(json!({"results": results})))
}

/// Ids the caller is allowed to change, for bulk edit screens.
pub async fn updatables(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::AppliedControl).await?;
    let mut ids: Vec<Uuid> = access.change.iter().copied().collect();
    ids.sort_unstable();
    Ok(Json(json!({"results": ids})))
}

pub async fn export_csv(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Response, ApiError> {
    let scope = scope(&state, &user, ObjectType::AppliedControl).await?;
    let controls = state
        .stores
        .applied_controls
        .list(&scope, &AppliedControlFilter::default())
        .await?;
    let names = folder_names(&state).await?;
    let rows: Vec<reporting::csv::AuditExportRow> = controls
        .iter()
        .map(|c| reporting::csv::AuditExportRow {
            internal_id: c.id.to_string(),
            name: c.name.clone(),
            description: c.description.clone().unwrap_or_default(),
            category: c.category.map(|v| v.as_str().to_string()).unwrap_or_default(),
            csf_function: c
                .csf_function
                .map(|v| v.as_str().to_string())
                .unwrap_or_default(),
            status: c.status.map(|v| v.as_str().to_string()).unwrap_or_default(),
            eta: c.eta.map(|d| d.to_string()).unwrap_or_default(),
            owner: names.get(&c.folder_id).cloned().unwrap_or_default(),
        })
        .collect();
    let bytes = reporting::csv::audit_export(&rows)?;
    Ok(file_response("text/csv", "audit_export.csv", bytes))
}

async fn fetch_viewable(
    state: &AppState,
    user: &User,
    id: Uuid,
) -> Result<AppliedControl, ApiError> {
    let access = access(state, user, ObjectType::AppliedControl).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    state
        .stores
        .applied_controls
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let control = fetch_viewable(&state, &user, id).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &control, &names).await?))
}

#[derive(Debug, Deserialize)]
pub struct AppliedControlUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub csf_function: Option<Option<String>>,
    pub status: Option<Option<String>>,
    pub eta: Option<Option<NaiveDate>>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub effort: Option<Option<String>>,
    pub cost: Option<Option<f64>>,
    pub link: Option<Option<String>>,
    pub reference_control: Option<Option<Uuid>>,
    pub evidences: Option<IdList>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<AppliedControlUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::AppliedControl).await?;
    require_change(&access, id)?;
    let mut control = state
        .stores
        .applied_controls
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        control.name = name;
    }
    if let Some(description) = body.description {
        control.description = description;
    }
    if let Some(category) = body.category {
        control.category = category.as_deref().map(parse_category).transpose()?;
    }
    if let Some(csf_function) = body.csf_function {
        control.csf_function = csf_function.as_deref().map(parse_csf_function).transpose()?;
    }
    if let Some(status) = body.status {
        control.status = status.as_deref().map(parse_status).transpose()?;
    }
    if let Some(eta) = body.eta {
        control.eta = eta;
    }
    if let Some(expiry_date) = body.expiry_date {
        control.expiry_date = expiry_date;
    }
    if let Some(effort) = body.effort {
        control.effort = effort.as_deref().map(parse_effort).transpose()?;
    }
    if let Some(cost) = body.cost {
        control.cost = cost;
    }
    if let Some(link) = body.link {
        control.link = link;
    }
    if let Some(reference_control) = body.reference_control {
        control.reference_control_id = reference_control;
    }
    if let Some(evidences) = body.evidences {
        control.evidence_ids = evidences.into_ids()?;
    }
    control.updated_at = Utc::now();
    state.stores.applied_controls.update(&control).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &control, &names).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::AppliedControl).await?;
    require_delete(&access, id)?;
    if !state.stores.applied_controls.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let control = fetch_viewable(&state, &user, id).await?;
    Ok(Json(json!({
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
        "link": control.link,
        "reference_control": control.reference_control_id,
        "evidences": control.evidence_ids,
        "folder": control.folder_id,
    })))
}

/// Policies are applied controls with the policy category.
pub async fn list_policies(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppliedControlQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let mut filter = query.into_filter()?;
    filter.category = Some(ControlCategory::Policy);
    Ok(Json(ListResponse::new(
        list_payloads(&state, &user, &filter).await?,
    )))
}

pub async fn policies_per_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        status_buckets(&state, &user, Some(ControlCategory::Policy)).await
    })
    .await
}
