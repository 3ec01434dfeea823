// Folder (domain) endpoints

use axum::extract::{Path, State};
use axum::http::Uri;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{access, cached, require_add, require_change, require_delete, scope};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::folder::{Folder, FolderContentType};
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::iam::create_domain_builtin_groups;
use crate::store::FolderFilter;

#[derive(Debug, Serialize)]
pub struct FolderRead {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<RelatedRef>,
    pub builtin: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(folder: &Folder, parents: &std::collections::HashMap<Uuid, String>) -> FolderRead {
    FolderRead {
        id: folder.id,
        name: folder.name.clone(),
        description: folder.description.clone(),
        content_type: folder.content_type.as_str().to_string(),
        parent_folder: folder
            .parent_id
            .map(|id| RelatedRef::new(id, parents.get(&id).cloned().unwrap_or_default())),
        builtin: folder.builtin,
        created_at: folder.created_at,
        updated_at: folder.updated_at,
    }
}

fn write_shape(folder: &Folder) -> Value {
    json!({
        "id": folder.id,
        "name": folder.name,
        "description": folder.description,
        "content_type": folder.content_type.as_str(),
        "parent_folder": folder.parent_id,
        "builtin": folder.builtin,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct FolderQuery {
    pub parent_folder: Option<Uuid>,
    pub content_type: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

impl FolderQuery {
    fn into_filter(self) -> Result<FolderFilter, ApiError> {
        let content_type = self
            .content_type
            .map(|raw| {
                FolderContentType::parse(&raw)
                    .ok_or_else(|| ApiError::bad_request(format!("Unknown content_type: {}", raw)))
            })
            .transpose()?;
        Ok(FolderFilter {
            parent_id: self.parent_folder,
            content_type,
            search: self.search,
            ordering: self.ordering,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    axum::extract::Query(query): axum::extract::Query<FolderQuery>,
) -> Result<Json<ListResponse<FolderRead>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::Folder).await?;
    let folders = state.stores.folders.list(&scope, &query.into_filter()?).await?;
    let names = super::folder_names(&state).await?;
    let results = folders.iter().map(|f| read_shape(f, &names)).collect();
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct FolderWrite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub parent_folder: Option<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<FolderWrite>,
) -> Result<(axum::http::StatusCode, Json<FolderRead>), ApiError> {
    let parent_id = match body.parent_folder {
        Some(id) => id,
        None => {
            state
                .stores
                .folders
                .root()
                .await?
                .ok_or_else(|| ApiError::bad_request("No root folder"))?
                .id
        }
    };
    require_add(&state, &user, ObjectType::Folder, parent_id).await?;

    let content_type = match body.content_type.as_deref() {
        None => FolderContentType::Domain,
        Some(raw) => FolderContentType::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown content_type: {}", raw)))?,
    };
    if content_type == FolderContentType::Global {
        return Err(ApiError::bad_request("Only one global folder can exist"));
    }

    let now = Utc::now();
    let folder = Folder {
        id: Uuid::new_v4(),
        name: body.name,
        description: body.description,
        content_type,
        parent_id: Some(parent_id),
        builtin: false,
        created_at: now,
        updated_at: now,
    };
    state.stores.folders.create(&folder).await?;

    // New domains get their builtin reader/approver/analyst/manager
    // groups immediately.
    if folder.content_type == FolderContentType::Domain {
        create_domain_builtin_groups(&state.stores, &folder).await?;
    }
    state.cache.invalidate_all();

    let names = super::folder_names(&state).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(read_shape(&folder, &names)),
    ))
}

/// Nested `{name, children}` tree of viewable domains and their
/// subfolders, rooted at the global folder.
pub async fn org_tree(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let state_ref = &state;
    let user_ref = &user;
    cached(&state, CacheTier::Medium, &user, &uri, async move {
        let access = access(state_ref, user_ref, ObjectType::Folder).await?;
        let folders = state_ref.stores.folders.list_all().await?;

        fn children_of(folders: &[Folder], parent: Uuid, view: &std::collections::HashSet<Uuid>) -> Vec<Value> {
            folders
                .iter()
                .filter(|f| f.parent_id == Some(parent) && view.contains(&f.id))
                .map(|f| json!({"name": f.name, "children": children_of(folders, f.id, view)}))
                .collect()
        }

        let root = folders.iter().find(|f| f.is_root());
        let children = match root {
            Some(root) => children_of(&folders, root.id, &access.view),
            None => Vec::new(),
        };
        Ok(json!({"name": "Global", "children": children}))
    })
    .await
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<FolderRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Folder).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let folder = state.stores.folders.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = super::folder_names(&state).await?;
    Ok(Json(read_shape(&folder, &names)))
}

#[derive(Debug, Deserialize)]
pub struct FolderUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<FolderUpdate>,
) -> Result<Json<FolderRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Folder).await?;
    require_change(&access, id)?;
    let mut folder = state.stores.folders.get(id).await?.ok_or_else(ApiError::not_found)?;
    if folder.builtin {
        return Err(ApiError::bad_request("Builtin folders cannot be modified"));
    }
    if let Some(name) = body.name {
        folder.name = name;
    }
    if let Some(description) = body.description {
        folder.description = description;
    }
    folder.updated_at = Utc::now();
    state.stores.folders.update(&folder).await?;
    state.cache.invalidate_all();
    let names = super::folder_names(&state).await?;
    Ok(Json(read_shape(&folder, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Folder).await?;
    require_delete(&access, id)?;
    let folder = state.stores.folders.get(id).await?.ok_or_else(ApiError::not_found)?;
    if folder.builtin || folder.is_root() {
        return Err(ApiError::bad_request("Builtin folders cannot be deleted"));
    }
    state.stores.folders.delete(id).await?;
    state.cache.invalidate_all();
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Folder).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let folder = state.stores.folders.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(write_shape(&folder)))
}
