// Request handlers, grouped per resource

use std::collections::{HashMap, HashSet};
use std::future::Future;

use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::cache::{CacheTier, ResponseCache};
use crate::api::responses::{ApiError, RelatedRef};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::iam::{add_codename, AccessibleIds};

pub mod applied_controls;
pub mod assets;
pub mod compliance;
pub mod evidences;
pub mod folders;
pub mod frameworks;
pub mod iam;
pub mod matrices;
pub mod meta;
pub mod projects;
pub mod reference_controls;
pub mod risk_acceptances;
pub mod risk_assessments;
pub mod risk_scenarios;
pub mod threats;
pub mod users;

/// `{value: label}` map for choice endpoints.
pub(crate) fn choices<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = Map::new();
    for (value, label) in pairs {
        map.insert(value.to_string(), Value::String(label.to_string()));
    }
    Value::Object(map)
}

/// M2M id fields arrive either as a JSON array or as a comma-separated
/// string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum IdList {
    Ids(Vec<Uuid>),
    Csv(String),
}

impl IdList {
    pub(crate) fn into_ids(self) -> Result<Vec<Uuid>, ApiError> {
        match self {
            Self::Ids(ids) => Ok(ids),
            Self::Csv(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    Uuid::parse_str(s)
                        .map_err(|_| ApiError::bad_request(format!("Invalid id: {}", s)))
                })
                .collect(),
        }
    }
}

pub(crate) fn ids_or_empty(list: Option<IdList>) -> Result<Vec<Uuid>, ApiError> {
    list.map(IdList::into_ids).transpose().map(Option::unwrap_or_default)
}

/// View/change/delete id sets for the model, computed once per request.
pub(crate) async fn access(
    state: &AppState,
    user: &User,
    object_type: ObjectType,
) -> Result<AccessibleIds, ApiError> {
    Ok(state.engine.accessible_object_ids(user, object_type).await?)
}

/// Folder superset to pass to store list queries for the model.
pub(crate) async fn scope(
    state: &AppState,
    user: &User,
    object_type: ObjectType,
) -> Result<Vec<Uuid>, ApiError> {
    Ok(state.engine.view_scope(user, object_type).await?)
}

/// Create gate: `add_<model>` on the target folder.
pub(crate) async fn require_add(
    state: &AppState,
    user: &User,
    object_type: ObjectType,
    folder_id: Uuid,
) -> Result<(), ApiError> {
    if state
        .engine
        .is_access_allowed(user, &add_codename(object_type), folder_id)
        .await?
    {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "You are not allowed to create {} objects in this domain",
            object_type.model_name()
        )))
    }
}

pub(crate) fn require_change(access: &AccessibleIds, id: Uuid) -> Result<(), ApiError> {
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    if !access.change.contains(&id) {
        return Err(ApiError::forbidden("You are not allowed to change this object"));
    }
    Ok(())
}

pub(crate) fn require_delete(access: &AccessibleIds, id: Uuid) -> Result<(), ApiError> {
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    if !access.delete.contains(&id) {
        return Err(ApiError::forbidden("You are not allowed to delete this object"));
    }
    Ok(())
}

/// Name maps for `{id, str}` references, one query per model.
pub(crate) async fn folder_names(state: &AppState) -> Result<HashMap<Uuid, String>, ApiError> {
    Ok(state
        .stores
        .folders
        .list_all()
        .await?
        .into_iter()
        .map(|f| (f.id, f.name))
        .collect())
}

pub(crate) fn related(names: &HashMap<Uuid, String>, id: Uuid) -> RelatedRef {
    RelatedRef::new(id, names.get(&id).cloned().unwrap_or_default())
}

/// Cache wrapper: serve the JSON body from the tier cache when present,
/// compute and store it otherwise. Keys are per user and per URL.
pub(crate) async fn cached<F>(
    state: &AppState,
    tier: CacheTier,
    user: &User,
    uri: &Uri,
    compute: F,
) -> Result<Json<Value>, ApiError>
where
    F: Future<Output = Result<Value, ApiError>>,
{
    let key = ResponseCache::key(user.id, uri.path(), uri.query());
    if let Some(hit) = state.cache.get(tier, &key).await {
        return Ok(Json(hit));
    }
    let value = compute.await?;
    state.cache.put(tier, key, value.clone()).await;
    Ok(Json(value))
}

/// Donut-style payload used by the per_status aggregate endpoints.
pub(crate) fn per_status_payload<I>(items: I) -> Value
where
    I: IntoIterator<Item = (&'static str, &'static str, usize)>,
{
    let mut labels = Vec::new();
    let mut values = Vec::new();
    for (value, label, count) in items {
        labels.push(Value::String(label.to_string()));
        values.push(json!({"name": value, "localName": label, "value": count}));
    }
    json!({"labels": labels, "values": values})
}

/// Attachment-style download response.
pub(crate) fn file_response(content_type: &str, filename: &str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

/// Keep only ids visible to the caller.
pub(crate) fn visible<T, F>(items: Vec<T>, view: &HashSet<Uuid>, id_of: F) -> Vec<T>
where
    F: Fn(&T) -> Uuid,
{
    items
        .into_iter()
        .filter(|item| view.contains(&id_of(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list_accepts_both_shapes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let from_array: IdList = serde_json::from_value(json!([a, b])).unwrap();
        assert_eq!(from_array.into_ids().unwrap(), vec![a, b]);

        let from_csv: IdList =
            serde_json::from_value(Value::String(format!("{}, {}", a, b))).unwrap();
        assert_eq!(from_csv.into_ids().unwrap(), vec![a, b]);

        let bad: IdList = serde_json::from_value(Value::String("nope".to_string())).unwrap();
        assert!(bad.into_ids().is_err());
    }

    #[test]
    fn test_choices_shape() {
        let value = choices([("active", "Active"), ("--", "Undefined")]);
        assert_eq!(value["active"], "Active");
        assert_eq!(value["--"], "Undefined");
    }

    #[test]
    fn test_require_change_prefers_404_over_403() {
        let id = Uuid::new_v4();
        let access = AccessibleIds::default();
        let err = require_change(&access, id).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let mut access = AccessibleIds::default();
        access.view.insert(id);
        let err = require_change(&access, id).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        access.change.insert(id);
        assert!(require_change(&access, id).is_ok());
    }
}
