// Evidence endpoints, including attachment upload and download

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::handlers::{
    access, file_response, folder_names, related, require_add, require_change, require_delete,
    scope,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::evidence::Evidence;
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::store::EvidenceFilter;

#[derive(Debug, Serialize)]
pub struct EvidenceRead {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub attachment: Option<String>,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(evidence: &Evidence, names: &HashMap<Uuid, String>) -> EvidenceRead {
    EvidenceRead {
        id: evidence.id,
        name: evidence.name.clone(),
        description: evidence.description.clone(),
        link: evidence.link.clone(),
        attachment: evidence.attachment_name.clone(),
        folder: related(names, evidence.folder_id),
        created_at: evidence.created_at,
        updated_at: evidence.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EvidenceQuery {
    pub folder: Option<Uuid>,
    pub applied_control: Option<Uuid>,
    pub requirement_assessment: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<EvidenceQuery>,
) -> Result<Json<ListResponse<EvidenceRead>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::Evidence).await?;
    let filter = EvidenceFilter {
        folder_id: query.folder,
        applied_control_id: query.applied_control,
        requirement_assessment_id: query.requirement_assessment,
        search: query.search,
        ordering: query.ordering,
    };
    let evidences = state.stores.evidences.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        evidences.iter().map(|e| read_shape(e, &names)).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct EvidenceWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<EvidenceWrite>,
) -> Result<(StatusCode, Json<EvidenceRead>), ApiError> {
    require_add(&state, &user, ObjectType::Evidence, body.folder).await?;
    let now = Utc::now();
    let evidence = Evidence {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        link: body.link,
        attachment_name: None,
        attachment_content_type: None,
        created_at: now,
        updated_at: now,
    };
    state.stores.evidences.create(&evidence).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&evidence, &names))))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<EvidenceRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let evidence = state.stores.evidences.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&evidence, &names)))
}

#[derive(Debug, Deserialize)]
pub struct EvidenceUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub link: Option<Option<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<EvidenceUpdate>,
) -> Result<Json<EvidenceRead>, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    require_change(&access, id)?;
    let mut evidence = state.stores.evidences.get(id).await?.ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        evidence.name = name;
    }
    if let Some(description) = body.description {
        evidence.description = description;
    }
    if let Some(link) = body.link {
        evidence.link = link;
    }
    evidence.updated_at = Utc::now();
    state.stores.evidences.update(&evidence).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&evidence, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    require_delete(&access, id)?;
    state.stores.evidences.delete_attachment(id).await?;
    if !state.stores.evidences.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let evidence = state.stores.evidences.get(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({
        "id": evidence.id,
        "name": evidence.name,
        "description": evidence.description,
        "link": evidence.link,
        "attachment": evidence.attachment_name,
        "folder": evidence.folder_id,
    })))
}

/// Streams the stored attachment back with its original file name.
pub async fn attachment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let evidence = state.stores.evidences.get(id).await?.ok_or_else(ApiError::not_found)?;
    let name = evidence.attachment_name.ok_or_else(ApiError::not_found)?;
    let data = state
        .stores
        .evidences
        .get_attachment(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let content_type = evidence
        .attachment_content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(file_response(&content_type, &name, data))
}

/// Pulls the target file name out of a `Content-Disposition` header,
/// tolerating both quoted and bare forms.
fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let part = raw
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("filename="))?;
    let name = part.trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    require_change(&access, id)?;
    if state.stores.evidences.get(id).await?.is_none() {
        return Err(ApiError::not_found());
    }
    let file_name = disposition_filename(&headers)
        .ok_or_else(|| ApiError::bad_request("Missing filename in Content-Disposition header"))?;
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty attachment body"));
    }
    if body.len() > state.config.attachment_size_limit_bytes {
        return Err(ApiError::payload_too_large(format!(
            "Attachment exceeds the {} byte limit",
            state.config.attachment_size_limit_bytes
        )));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    state
        .stores
        .evidences
        .set_attachment(id, &file_name, content_type, &body)
        .await?;
    Ok(Json(json!({"results": "attachment uploaded"})))
}

pub async fn delete_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Evidence).await?;
    require_change(&access, id)?;
    if !state.stores.evidences.delete_attachment(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(Json(json!({"results": "attachment deleted"})))
}

#[cfg(test)]
mod tests {
    use super::disposition_filename;
    use axum::http::{header, HeaderMap, HeaderValue};

    #[test]
    fn filename_parsed_from_quoted_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report.pdf\""),
        );
        assert_eq!(disposition_filename(&headers).as_deref(), Some("report.pdf"));
    }

    #[test]
    fn filename_parsed_from_bare_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=evidence.png"),
        );
        assert_eq!(disposition_filename(&headers).as_deref(), Some("evidence.png"));
    }

    #[test]
    fn missing_disposition_yields_none() {
        assert!(disposition_filename(&HeaderMap::new()).is_none());
    }
}
