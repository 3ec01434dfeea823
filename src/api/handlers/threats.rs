// Threat endpoints

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::handlers::{
    access, folder_names, related, require_add, require_change, require_delete, scope, visible,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::threat::Threat;
use crate::domain::ObjectType;
use crate::store::ThreatFilter;

#[derive(Debug, Serialize)]
pub struct ThreatRead {
    pub id: Uuid,
    pub ref_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub is_published: bool,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(threat: &Threat, names: &HashMap<Uuid, String>) -> ThreatRead {
    ThreatRead {
        id: threat.id,
        ref_id: threat.ref_id.clone(),
        name: threat.name.clone(),
        description: threat.description.clone(),
        provider: threat.provider.clone(),
        is_published: threat.is_published,
        folder: related(names, threat.folder_id),
        created_at: threat.created_at,
        updated_at: threat.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreatQuery {
    pub folder: Option<Uuid>,
    pub is_published: Option<bool>,
    pub provider: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ThreatQuery>,
) -> Result<Json<ListResponse<ThreatRead>>, ApiError> {
    let access = access(&state, &user, ObjectType::Threat).await?;
    let scope = scope(&state, &user, ObjectType::Threat).await?;
    let filter = ThreatFilter {
        folder_id: query.folder,
        is_published: query.is_published,
        provider: query.provider,
        search: query.search,
        ordering: query.ordering,
    };
    let threats = state.stores.threats.list(&scope, &filter).await?;
    let threats = visible(threats, &access.view, |t| t.id);
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        threats.iter().map(|t| read_shape(t, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ThreatWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<ThreatWrite>,
) -> Result<(StatusCode, Json<ThreatRead>), ApiError> {
    require_add(&state, &user, ObjectType::Threat, body.folder).await?;
    let now = Utc::now();
    let threat = Threat {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        ref_id: body.ref_id,
        name: body.name,
        description: body.description,
        provider: body.provider,
        is_published: body.is_published,
        created_at: now,
        updated_at: now,
    };
    state.stores.threats.create(&threat).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&threat, &names))))
}

/// `{labels, values}` with the number of risk scenarios attached to
/// each viewable threat, for the radar chart.
pub async fn threats_count(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let scope = scope(&state, &user, ObjectType::Threat).await?;
    let counts = state.stores.threats.scenario_counts(&scope).await?;
    let labels: Vec<&str> = counts.iter().map(|(name, _)| name.as_str()).collect();
    let values: Vec<i64> = counts.iter().map(|(_, count)| *count).collect();
    Ok(Json(json!({"results": {"labels": labels, "values": values}})))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<ThreatRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Threat).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let threat = state.stores.threats.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&threat, &names)))
}

#[derive(Debug, Deserialize)]
pub struct ThreatUpdate {
    pub name: Option<String>,
    pub ref_id: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub provider: Option<Option<String>>,
    pub is_published: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<ThreatUpdate>,
) -> Result<Json<ThreatRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Threat).await?;
    require_change(&access, id)?;
    let mut threat = state.stores.threats.get(id).await?.ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        threat.name = name;
    }
    if let Some(ref_id) = body.ref_id {
        threat.ref_id = ref_id;
    }
    if let Some(description) = body.description {
        threat.description = description;
    }
    if let Some(provider) = body.provider {
        threat.provider = provider;
    }
    if let Some(is_published) = body.is_published {
        threat.is_published = is_published;
    }
    threat.updated_at = Utc::now();
    state.stores.threats.update(&threat).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&threat, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Threat).await?;
    require_delete(&access, id)?;
    if !state.stores.threats.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Threat).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let threat = state.stores.threats.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": threat.id,
        "ref_id": threat.ref_id,
        "name": threat.name,
        "description": threat.description,
        "provider": threat.provider,
        "is_published": threat.is_published,
        "folder": threat.folder_id,
    })))
}
