// Asset endpoints

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
    scope,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::asset::{Asset, AssetType};
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::store::AssetFilter;

#[derive(Debug, Serialize)]
pub struct AssetRead {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub business_value: Option<String>,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(asset: &Asset, names: &HashMap<Uuid, String>) -> AssetRead {
    AssetRead {
        id: asset.id,
        name: asset.name.clone(),
        description: asset.description.clone(),
        business_value: asset.business_value.clone(),
        asset_type: asset.asset_type.as_str().to_string(),
        folder: related(names, asset.folder_id),
        created_at: asset.created_at,
        updated_at: asset.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
    pub folder: Option<Uuid>,
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<AssetQuery>,
) -> Result<Json<ListResponse<AssetRead>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::Asset).await?;
    let asset_type = query
        .asset_type
        .map(|raw| {
            AssetType::parse(&raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown asset type: {}", raw)))
        })
        .transpose()?;
    let filter = AssetFilter {
        folder_id: query.folder,
        asset_type,
        search: query.search,
        ordering: query.ordering,
    };
    let assets = state.stores.assets.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        assets.iter().map(|a| read_shape(a, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct AssetWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub business_value: Option<String>,
    #[serde(default, rename = "type")]
    pub asset_type: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<AssetWrite>,
) -> Result<(StatusCode, Json<AssetRead>), ApiError> {
    require_add(&state, &user, ObjectType::Asset, body.folder).await?;
    let asset_type = match body.asset_type.as_deref() {
        None => AssetType::Support,
        Some(raw) => AssetType::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown asset type: {}", raw)))?,
    };
    let now = Utc::now();
    let asset = Asset {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        business_value: body.business_value,
        asset_type,
        created_at: now,
        updated_at: now,
    };
    state.stores.assets.create(&asset).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&asset, &names))))
}

pub async fn type_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            AssetType::ALL.iter().map(|t| (t.as_str(), t.label())),
        ))
    })
    .await
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Asset).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let asset = state.stores.assets.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&asset, &names)))
}

#[derive(Debug, Deserialize)]
pub struct AssetUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub business_value: Option<Option<String>>,
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssetUpdate>,
) -> Result<Json<AssetRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Asset).await?;
    require_change(&access, id)?;
    let mut asset = state.stores.assets.get(id).await?.ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        asset.name = name;
    }
    if let Some(description) = body.description {
        asset.description = description;
    }
    if let Some(business_value) = body.business_value {
        asset.business_value = business_value;
    }
    if let Some(raw) = body.asset_type {
        asset.asset_type = AssetType::parse(&raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown asset type: {}", raw)))?;
    }
    asset.updated_at = Utc::now();
    state.stores.assets.update(&asset).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&asset, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Asset).await?;
    require_delete(&access, id)?;
    if !state.stores.assets.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Asset).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let asset = state.stores.assets.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": asset.id,
        "name": asset.name,
        "description": asset.description,
        "business_value": asset.business_value,
        "type": asset.asset_type.as_str(),
        "folder": asset.folder_id,
    })))
}
