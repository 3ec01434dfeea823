// Reference control endpoints

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{
    access, cached, choices, folder_names, related, require_add, require_change, require_delete,
    scope, visible,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::control::{ControlCategory, CsfFunction, ReferenceControl};
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::store::ReferenceControlFilter;

#[derive(Debug, Serialize)]
pub struct ReferenceControlRead {
    pub id: Uuid,
    pub ref_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub csf_function: Option<String>,
    pub provider: Option<String>,
    pub is_published: bool,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(control: &ReferenceControl, names: &HashMap<Uuid, String>) -> ReferenceControlRead {
    ReferenceControlRead {
        id: control.id,
        ref_id: control.ref_id.clone(),
        name: control.name.clone(),
        description: control.description.clone(),
        category: control.category.map(|c| c.as_str().to_string()),
        csf_function: control.csf_function.map(|f| f.as_str().to_string()),
        provider: control.provider.clone(),
        is_published: control.is_published,
        folder: related(names, control.folder_id),
        created_at: control.created_at,
        updated_at: control.updated_at,
    }
}

fn parse_category(raw: &str) -> Result<ControlCategory, ApiError> {
    ControlCategory::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown category: {}", raw)))
}

fn parse_csf_function(raw: &str) -> Result<CsfFunction, ApiError> {
    CsfFunction::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown csf_function: {}", raw)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceControlQuery {
    pub folder: Option<Uuid>,
    pub category: Option<String>,
    pub csf_function: Option<String>,
    pub is_published: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ReferenceControlQuery>,
) -> Result<Json<ListResponse<ReferenceControlRead>>, ApiError> {
    let access = access(&state, &user, ObjectType::ReferenceControl).await?;
    let scope = scope(&state, &user, ObjectType::ReferenceControl).await?;
    let filter = ReferenceControlFilter {
        folder_id: query.folder,
        category: query.category.as_deref().map(parse_category).transpose()?,
        csf_function: query
            .csf_function
            .as_deref()
            .map(parse_csf_function)
            .transpose()?,
        is_published: query.is_published,
        search: query.search,
        ordering: query.ordering,
    };
    let controls = state.stores.reference_controls.list(&scope, &filter).await?;
    let controls = visible(controls, &access.view, |c| c.id);
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        controls.iter().map(|c| read_shape(c, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ReferenceControlWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub csf_function: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<ReferenceControlWrite>,
) -> Result<(StatusCode, Json<ReferenceControlRead>), ApiError> {
    require_add(&state, &user, ObjectType::ReferenceControl, body.folder).await?;
    let now = Utc::now();
    let control = ReferenceControl {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        ref_id: body.ref_id,
        name: body.name,
        description: body.description,
        category: body.category.as_deref().map(parse_category).transpose()?,
        csf_function: body
            .csf_function
            .as_deref()
            .map(parse_csf_function)
            .transpose()?,
        provider: body.provider,
        is_published: body.is_published,
        created_at: now,
        updated_at: now,
    };
    state.stores.reference_controls.create(&control).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&control, &names))))
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

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReferenceControlRead>, ApiError> {
    let access = access(&state, &user, ObjectType::ReferenceControl).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let control = state
        .stores
        .reference_controls
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&control, &names)))
}

#[derive(Debug, Deserialize)]
pub struct ReferenceControlUpdate {
    pub name: Option<String>,
    pub ref_id: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub csf_function: Option<Option<String>>,
    pub provider: Option<Option<String>>,
    pub is_published: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReferenceControlUpdate>,
) -> Result<Json<ReferenceControlRead>, ApiError> {
    let access = access(&state, &user, ObjectType::ReferenceControl).await?;
    require_change(&access, id)?;
    let mut control = state
        .stores
        .reference_controls
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        control.name = name;
    }
    if let Some(ref_id) = body.ref_id {
        control.ref_id = ref_id;
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
    if let Some(provider) = body.provider {
        control.provider = provider;
    }
    if let Some(is_published) = body.is_published {
        control.is_published = is_published;
    }
    control.updated_at = Utc::now();
    state.stores.reference_controls.update(&control).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&control, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::ReferenceControl).await?;
    require_delete(&access, id)?;
    if !state.stores.reference_controls.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::ReferenceControl).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let control = state
        .stores
        .reference_controls
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": control.id,
        "ref_id": control.ref_id,
        "name": control.name,
        "description": control.description,
        "category": control.category.map(|c| c.as_str()),
        "csf_function": control.csf_function.map(|f| f.as_str()),
        "provider": control.provider,
        "is_published": control.is_published,
        "folder": control.folder_id,
    })))
}
