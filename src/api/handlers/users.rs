// User, user group, role and role assignment endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::handlers::{
    access, folder_names, ids_or_empty, related, require_add, require_change, require_delete,
    scope, IdList,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::auth::password::{hash_password, validate_password_strength};
use crate::domain::iam::{RoleAssignment, User, UserGroup};
use crate::domain::ObjectType;
use crate::iam::{active_admin_count, add_codename, is_admin_member, GROUP_ADMINISTRATORS};
use crate::store::{RoleAssignmentFilter, UserFilter, UserGroupFilter};

// ---------------------------------------------------------------------------
// Users

#[derive(Debug, Serialize)]
pub struct UserRead {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub user_groups: Vec<RelatedRef>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

async fn user_read(state: &AppState, user: &User) -> Result<UserRead, ApiError> {
    let groups = state.stores.user_groups.groups_of_user(user.id).await?;
    Ok(UserRead {
        id: user.id,
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        is_active: user.is_active,
        user_groups: groups.into_iter().map(|g| RelatedRef::new(g.id, g.name)).collect(),
        created_at: user.created_at,
        updated_at: user.updated_at,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_approver: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ListResponse<UserRead>>, ApiError> {
    let access = access(&state, &caller, ObjectType::User).await?;
    let filter = UserFilter {
        email: query.email,
        is_active: query.is_active,
        search: query.search,
        ordering: query.ordering,
    };
    let users = state.stores.users.list(&filter).await?;
    let mut results = Vec::new();
    for user in users {
        if !access.view.contains(&user.id) {
            continue;
        }
        if let Some(wanted) = query.is_approver {
            if state.engine.is_approver(&user).await? != wanted {
                continue;
            }
        }
        results.push(user_read(&state, &user).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct UserWrite {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub password: String,
    #[serde(default)]
    pub user_groups: Option<IdList>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Json(body): Json<UserWrite>,
) -> Result<(StatusCode, Json<UserRead>), ApiError> {
    if !state
        .engine
        .has_permission_anywhere(&caller, &add_codename(ObjectType::User))
        .await?
    {
        return Err(ApiError::forbidden("You are not allowed to create users"));
    }
    if state.stores.users.get_by_email(&body.email).await?.is_some() {
        return Err(ApiError::bad_request("A user with this email already exists"));
    }
    validate_password_strength(&body.password)?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: body.email,
        first_name: body.first_name.unwrap_or_default(),
        last_name: body.last_name.unwrap_or_default(),
        password_hash: hash_password(&body.password)?,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    state.stores.users.create(&user).await?;

    for group_id in ids_or_empty(body.user_groups)? {
        state.stores.user_groups.add_member(group_id, user.id).await?;
    }

    Ok((StatusCode::CREATED, Json(user_read(&state, &user).await?)))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::User).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let user = state.stores.users.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(user_read(&state, &user).await?))
}

#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
    pub user_groups: Option<IdList>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<UserUpdate>,
) -> Result<Json<UserRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::User).await?;
    require_change(&access, id)?;
    let mut user = state.stores.users.get(id).await?.ok_or_else(ApiError::not_found)?;

    let new_groups = body.user_groups.map(IdList::into_ids).transpose()?;

    // The last active administrator must stay in the administrators
    // group.
    if let Some(new_groups) = &new_groups {
        if is_admin_member(&state.stores, user.id).await?
            && active_admin_count(&state.stores).await? == 1
        {
            let root = state
                .stores
                .folders
                .root()
                .await?
                .ok_or_else(|| ApiError::bad_request("No root folder"))?;
            let admin_group = state
                .stores
                .user_groups
                .find_in_folder(root.id, GROUP_ADMINISTRATORS)
                .await?;
            if let Some(admin_group) = admin_group {
                if !new_groups.contains(&admin_group.id) {
                    return Err(ApiError::forbidden("attemptToRemoveOnlyAdminUserGroup"));
                }
            }
        }
    }

    if let Some(email) = body.email {
        user.email = email;
    }
    if let Some(first_name) = body.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = body.last_name {
        user.last_name = last_name;
    }
    if let Some(is_active) = body.is_active {
        user.is_active = is_active;
    }
    user.updated_at = Utc::now();
    state.stores.users.update(&user).await?;

    if let Some(new_groups) = new_groups {
        let current = state.stores.user_groups.groups_of_user(user.id).await?;
        for group in &current {
            if !new_groups.contains(&group.id) {
                state.stores.user_groups.remove_member(group.id, user.id).await?;
            }
        }
        for group_id in new_groups {
            if !current.iter().any(|g| g.id == group_id) {
                state.stores.user_groups.add_member(group_id, user.id).await?;
            }
        }
    }

    Ok(Json(user_read(&state, &user).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &caller, ObjectType::User).await?;
    require_delete(&access, id)?;
    if is_admin_member(&state.stores, id).await? && active_admin_count(&state.stores).await? == 1 {
        return Err(ApiError::forbidden("attemptToDeleteOnlyAdminAccountError"));
    }
    state.stores.sessions.delete_for_user(id).await?;
    if !state.stores.users.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &caller, ObjectType::User).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let user = state.stores.users.get(id).await?.ok_or_else(ApiError::not_found)?;
    let groups = state.stores.user_groups.groups_of_user(user.id).await?;
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "is_active": user.is_active,
        "user_groups": groups.iter().map(|g| g.id).collect::<Vec<_>>(),
    })))
}

// ---------------------------------------------------------------------------
// User groups

#[derive(Debug, Serialize)]
pub struct UserGroupRead {
    pub id: Uuid,
    pub name: String,
    pub folder: RelatedRef,
    pub builtin: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn group_read(group: &UserGroup, names: &std::collections::HashMap<Uuid, String>) -> UserGroupRead {
    UserGroupRead {
        id: group.id,
        name: group.name.clone(),
        folder: related(names, group.folder_id),
        builtin: group.builtin,
        created_at: group.created_at,
        updated_at: group.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserGroupQuery {
    pub folder: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Query(query): Query<UserGroupQuery>,
) -> Result<Json<ListResponse<UserGroupRead>>, ApiError> {
    let scope = scope(&state, &caller, ObjectType::UserGroup).await?;
    let filter = UserGroupFilter {
        folder_id: query.folder,
        search: query.search,
        ordering: query.ordering,
    };
    let groups = state.stores.user_groups.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        groups.iter().map(|g| group_read(g, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct UserGroupWrite {
    pub name: String,
    pub folder: Uuid,
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Json(body): Json<UserGroupWrite>,
) -> Result<(StatusCode, Json<UserGroupRead>), ApiError> {
    require_add(&state, &caller, ObjectType::UserGroup, body.folder).await?;
    let now = Utc::now();
    let group = UserGroup {
        id: Uuid::new_v4(),
        name: body.name,
        folder_id: body.folder,
        builtin: false,
        created_at: now,
        updated_at: now,
    };
    state.stores.user_groups.create(&group).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(group_read(&group, &names))))
}

pub async fn retrieve_group(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserGroupRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::UserGroup).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let group = state.stores.user_groups.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(group_read(&group, &names)))
}

#[derive(Debug, Deserialize)]
pub struct UserGroupUpdate {
    pub name: Option<String>,
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<UserGroupUpdate>,
) -> Result<Json<UserGroupRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::UserGroup).await?;
    require_change(&access, id)?;
    let mut group = state.stores.user_groups.get(id).await?.ok_or_else(ApiError::not_found)?;
    if group.builtin {
        return Err(ApiError::bad_request("Builtin user groups cannot be modified"));
    }
    if let Some(name) = body.name {
        group.name = name;
    }
    group.updated_at = Utc::now();
    state.stores.user_groups.update(&group).await?;
    let names = folder_names(&state).await?;
    Ok(Json(group_read(&group, &names)))
}

pub async fn destroy_group(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &caller, ObjectType::UserGroup).await?;
    require_delete(&access, id)?;
    let group = state.stores.user_groups.get(id).await?.ok_or_else(ApiError::not_found)?;
    if group.builtin {
        return Err(ApiError::bad_request("Builtin user groups cannot be deleted"));
    }
    state.stores.user_groups.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn group_object(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &caller, ObjectType::UserGroup).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let group = state.stores.user_groups.get(id).await?.ok_or_else(ApiError::not_found)?;
    let members = state.stores.user_groups.members(group.id).await?;
    Ok(Json(json!({
        "id": group.id,
        "name": group.name,
        "folder": group.folder_id,
        "builtin": group.builtin,
        "users": members,
    })))
}

// ---------------------------------------------------------------------------
// Roles (read-only)

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let access = access(&state, &caller, ObjectType::Role).await?;
    let roles = state.stores.roles.list_all().await?;
    let results = roles
        .into_iter()
        .filter(|r| access.view.contains(&r.id))
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "builtin": r.builtin,
                "permissions": r.permissions,
            })
        })
        .collect();
    Ok(Json(ListResponse::new(results)))
}

pub async fn retrieve_role(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &caller, ObjectType::Role).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let role = state.stores.roles.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": role.id,
        "name": role.name,
        "builtin": role.builtin,
        "permissions": role.permissions,
    })))
}

// ---------------------------------------------------------------------------
// Role assignments

#[derive(Debug, Serialize)]
pub struct RoleAssignmentRead {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<RelatedRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_group: Option<RelatedRef>,
    pub role: RelatedRef,
    pub folder: RelatedRef,
    pub is_recursive: bool,
    pub perimeter_folders: Vec<RelatedRef>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

async fn assignment_read(
    state: &AppState,
    assignment: &RoleAssignment,
) -> Result<RoleAssignmentRead, ApiError> {
    let names = folder_names(state).await?;
    let user = match assignment.user_id {
        Some(id) => state
            .stores
            .users
            .get(id)
            .await?
            .map(|u| RelatedRef::new(u.id, u.email)),
        None => None,
    };
    let user_group = match assignment.user_group_id {
        Some(id) => state
            .stores
            .user_groups
            .get(id)
            .await?
            .map(|g| RelatedRef::new(g.id, g.name)),
        None => None,
    };
    let role = state
        .stores
        .roles
        .get(assignment.role_id)
        .await?
        .map(|r| RelatedRef::new(r.id, r.name))
        .unwrap_or_else(|| RelatedRef::new(assignment.role_id, String::new()));
    Ok(RoleAssignmentRead {
        id: assignment.id,
        user,
        user_group,
        role,
        folder: related(&names, assignment.folder_id),
        is_recursive: assignment.is_recursive,
        perimeter_folders: assignment
            .perimeter_folder_ids
            .iter()
            .map(|id| related(&names, *id))
            .collect(),
        created_at: assignment.created_at,
        updated_at: assignment.updated_at,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleAssignmentQuery {
    pub user: Option<Uuid>,
    pub user_group: Option<Uuid>,
    pub role: Option<Uuid>,
    pub folder: Option<Uuid>,
    pub ordering: Option<String>,
}

pub async fn list_assignments(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Query(query): Query<RoleAssignmentQuery>,
) -> Result<Json<ListResponse<RoleAssignmentRead>>, ApiError> {
    let scope = scope(&state, &caller, ObjectType::RoleAssignment).await?;
    let filter = RoleAssignmentFilter {
        user_id: query.user,
        user_group_id: query.user_group,
        role_id: query.role,
        folder_id: query.folder,
        ordering: query.ordering,
    };
    let assignments = state.stores.role_assignments.list(&scope, &filter).await?;
    let mut results = Vec::new();
    for assignment in &assignments {
        results.push(assignment_read(&state, assignment).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignmentWrite {
    #[serde(default)]
    pub user: Option<Uuid>,
    #[serde(default)]
    pub user_group: Option<Uuid>,
    pub role: Uuid,
    pub folder: Uuid,
    #[serde(default)]
    pub is_recursive: bool,
    #[serde(default)]
    pub perimeter_folders: Option<IdList>,
}

pub async fn create_assignment(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Json(body): Json<RoleAssignmentWrite>,
) -> Result<(StatusCode, Json<RoleAssignmentRead>), ApiError> {
    require_add(&state, &caller, ObjectType::RoleAssignment, body.folder).await?;
    let now = Utc::now();
    let mut perimeter = ids_or_empty(body.perimeter_folders)?;
    if perimeter.is_empty() {
        perimeter = vec![body.folder];
    }
    let assignment = RoleAssignment {
        id: Uuid::new_v4(),
        user_id: body.user,
        user_group_id: body.user_group,
        role_id: body.role,
        folder_id: body.folder,
        is_recursive: body.is_recursive,
        perimeter_folder_ids: perimeter,
        created_at: now,
        updated_at: now,
    };
    if !assignment.is_well_formed() {
        return Err(ApiError::bad_request(
            "A role assignment needs exactly one of user or user_group",
        ));
    }
    state.stores.role_assignments.create(&assignment).await?;
    Ok((
        StatusCode::CREATED,
        Json(assignment_read(&state, &assignment).await?),
    ))
}

pub async fn retrieve_assignment(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoleAssignmentRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::RoleAssignment).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let assignment = state
        .stores
        .role_assignments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(assignment_read(&state, &assignment).await?))
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignmentUpdate {
    pub role: Option<Uuid>,
    pub is_recursive: Option<bool>,
    pub perimeter_folders: Option<IdList>,
}

pub async fn update_assignment(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleAssignmentUpdate>,
) -> Result<Json<RoleAssignmentRead>, ApiError> {
    let access = access(&state, &caller, ObjectType::RoleAssignment).await?;
    require_change(&access, id)?;
    let mut assignment = state
        .stores
        .role_assignments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(role) = body.role {
        assignment.role_id = role;
    }
    if let Some(is_recursive) = body.is_recursive {
        assignment.is_recursive = is_recursive;
    }
    if let Some(perimeter) = body.perimeter_folders {
        assignment.perimeter_folder_ids = perimeter.into_ids()?;
    }
    assignment.updated_at = Utc::now();
    state.stores.role_assignments.update(&assignment).await?;
    Ok(Json(assignment_read(&state, &assignment).await?))
}

pub async fn destroy_assignment(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &caller, ObjectType::RoleAssignment).await?;
    require_delete(&access, id)?;
    if !state.stores.role_assignments.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assignment_object(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &caller, ObjectType::RoleAssignment).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let assignment = state
        .stores
        .role_assignments
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": assignment.id,
        "user": assignment.user_id,
        "user_group": assignment.user_group_id,
        "role": assignment.role_id,
        "folder": assignment.folder_id,
        "is_recursive": assignment.is_recursive,
        "perimeter_folders": assignment.perimeter_folder_ids,
    })))
}
