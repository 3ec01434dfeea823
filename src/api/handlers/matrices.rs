// Risk matrix endpoints

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::handlers::{
    access, folder_names, related, require_add, require_delete, scope, visible,
};
use crate::api::responses::{ApiError, ListResponse, RelatedRef};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::matrix::{MatrixDefinition, RiskMatrix};
use crate::domain::ObjectType;
use crate::store::{MatrixFilter, RiskAssessmentFilter};

#[derive(Debug, Serialize)]
pub struct MatrixRead {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub is_published: bool,
    pub json_definition: Value,
    pub folder: RelatedRef,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

fn read_shape(matrix: &RiskMatrix, names: &HashMap<Uuid, String>) -> Result<MatrixRead, ApiError> {
    let definition: Value = serde_json::from_str(&matrix.json_definition)
        .map_err(crate::core::errors::AegisError::from)?;
    Ok(MatrixRead {
        id: matrix.id,
        name: matrix.name.clone(),
        description: matrix.description.clone(),
        provider: matrix.provider.clone(),
        is_published: matrix.is_published,
        json_definition: definition,
        folder: related(names, matrix.folder_id),
        created_at: matrix.created_at,
        updated_at: matrix.updated_at,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct MatrixQuery {
    pub folder: Option<Uuid>,
    pub is_published: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<MatrixQuery>,
) -> Result<Json<ListResponse<MatrixRead>>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskMatrix).await?;
    let scope = scope(&state, &user, ObjectType::RiskMatrix).await?;
    let filter = MatrixFilter {
        folder_id: query.folder,
        is_published: query.is_published,
        search: query.search,
        ordering: query.ordering,
    };
    let matrices = state.stores.matrices.list(&scope, &filter).await?;
    let matrices = visible(matrices, &access.view, |m| m.id);
    let names = folder_names(&state).await?;
    let results = matrices
        .iter()
        .map(|m| read_shape(m, &names))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct MatrixWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    pub json_definition: Value,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<MatrixWrite>,
) -> Result<(StatusCode, Json<MatrixRead>), ApiError> {
    require_add(&state, &user, ObjectType::RiskMatrix, body.folder).await?;
    let definition: MatrixDefinition = serde_json::from_value(body.json_definition.clone())
        .map_err(|e| ApiError::bad_request(format!("Invalid matrix definition: {}", e)))?;
    definition.validate()?;
    let now = Utc::now();
    let matrix = RiskMatrix {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        provider: body.provider,
        is_published: body.is_published,
        json_definition: body.json_definition.to_string(),
        created_at: now,
        updated_at: now,
    };
    state.stores.matrices.create(&matrix).await?;
    let names = folder_names(&state).await?;
    Ok((StatusCode::CREATED, Json(read_shape(&matrix, &names)?)))
}

/// Distinct risk level colors across viewable matrices, in grid order.
pub async fn colors(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskMatrix).await?;
    let scope = scope(&state, &user, ObjectType::RiskMatrix).await?;
    let matrices = state
        .stores
        .matrices
        .list(&scope, &MatrixFilter::default())
        .await?;
    let mut colors: Vec<String> = Vec::new();
    for matrix in matrices.iter().filter(|m| access.view.contains(&m.id)) {
        for level in matrix.definition()?.risk {
            let color = level.color().to_string();
            if !colors.contains(&color) {
                colors.push(color);
            }
        }
    }
    Ok(Json(json!({"results": colors})))
}

/// Matrices referenced by at least one viewable risk assessment, with
/// usage counts.
pub async fn used(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let matrix_access = access(&state, &user, ObjectType::RiskMatrix).await?;
    let assessment_scope = scope(&state, &user, ObjectType::RiskAssessment).await?;
    let assessments = state
        .stores
        .risk_assessments
        .list(&assessment_scope, &RiskAssessmentFilter::default())
        .await?;

    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for assessment in &assessments {
        *counts.entry(assessment.risk_matrix_id).or_default() += 1;
    }

    let mut results = Vec::new();
    for (matrix_id, count) in counts {
        if !matrix_access.view.contains(&matrix_id) {
            continue;
        }
        if let Some(matrix) = state.stores.matrices.get(matrix_id).await? {
            results.push(json!({
                "id": matrix.id,
                "name": matrix.name,
                "risk_assessments_count": count,
            }));
        }
    }
    Ok(Json(json!({"results": results})))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatrixRead>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskMatrix).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let matrix = state.stores.matrices.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(read_shape(&matrix, &names)?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::RiskMatrix).await?;
    require_delete(&access, id)?;
    if state.stores.matrices.in_use(id).await? {
        return Err(ApiError::bad_request(
            "This risk matrix is used by at least one risk assessment",
        ));
    }
    if !state.stores.matrices.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
