// Framework catalog endpoints: read-only apart from deletion

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::handlers::{access, folder_names, related, require_delete, scope, visible};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::compliance::{Framework, RequirementMappingSet, RequirementNode};
use crate::domain::iam::User;
use crate::domain::ObjectType;
use crate::store::{ComplianceAssessmentFilter, FrameworkFilter};

fn framework_payload(framework: &Framework, names: &HashMap<Uuid, String>) -> Value {
    json!({
        "id": framework.id,
        "ref_id": framework.ref_id,
        "name": framework.name,
        "description": framework.description,
        "provider": framework.provider,
        "is_published": framework.is_published,
        "min_score": framework.min_score,
        "max_score": framework.max_score,
        "scores_definition": framework.scores(),
        "implementation_groups_definition": framework.implementation_groups(),
        "folder": related(names, framework.folder_id),
        "created_at": framework.created_at,
        "updated_at": framework.updated_at,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameworkQuery {
    pub folder: Option<Uuid>,
    pub provider: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<FrameworkQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    let scope = scope(&state, &user, ObjectType::Framework).await?;
    let filter = FrameworkFilter {
        folder_id: query.folder,
        provider: query.provider,
        search: query.search,
        ordering: query.ordering,
    };
    let frameworks = state.stores.frameworks.list(&scope, &filter).await?;
    let frameworks = visible(frameworks, &access.view, |f| f.id);
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        frameworks.iter().map(|f| framework_payload(f, &names)).collect(),
    )))
}

#[derive(Debug, Default, Deserialize)]
pub struct NamesQuery {
    /// Comma-separated ids.
    #[serde(default)]
    pub id: Option<String>,
}

pub async fn names(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<NamesQuery>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    let ids = query
        .id
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| ApiError::bad_request(format!("Invalid id: {}", s))))
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Map::new();
    for id in ids {
        if !access.view.contains(&id) {
            continue;
        }
        if let Some(framework) = state.stores.frameworks.get(id).await? {
            out.insert(framework.id.to_string(), Value::String(framework.name));
        }
    }
    Ok(Json(Value::Object(out)))
}

/// Frameworks backing at least one viewable audit, with audit counts.
pub async fn used(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let framework_access = access(&state, &user, ObjectType::Framework).await?;
    let audit_scope = scope(&state, &user, ObjectType::ComplianceAssessment).await?;
    let audits = state
        .stores
        .compliance_assessments
        .list(&audit_scope, &ComplianceAssessmentFilter::default())
        .await?;

    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for audit in &audits {
        *counts.entry(audit.framework_id).or_default() += 1;
    }

    let mut results = Vec::new();
    for (framework_id, count) in counts {
        if !framework_access.view.contains(&framework_id) {
            continue;
        }
        if let Some(framework) = state.stores.frameworks.get(framework_id).await? {
            results.push(json!({
                "id": framework.id,
                "name": framework.name,
                "compliance_assessments_count": count,
            }));
        }
    }
    Ok(Json(json!({"results": results})))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let framework = state.stores.frameworks.get(id).await?.ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    Ok(Json(framework_payload(&framework, &names)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    require_delete(&access, id)?;
    if state.stores.frameworks.in_use(id).await? {
        return Err(ApiError::bad_request(
            "This framework is used by at least one compliance assessment",
        ));
    }
    if !state.stores.frameworks.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

fn node_payload(node: &RequirementNode) -> Value {
    json!({
        "id": node.id,
        "urn": node.urn,
        "parent_urn": node.parent_urn,
        "ref_id": node.ref_id,
        "name": node.name,
        "description": node.description,
        "order_id": node.order_id,
        "assessable": node.assessable,
        "implementation_groups": node.implementation_group_refs(),
    })
}

/// Children of `parent_urn`, recursively, in order.
pub(crate) fn node_tree(nodes: &[RequirementNode], parent_urn: Option<&str>) -> Vec<Value> {
    let mut children: Vec<&RequirementNode> = nodes
        .iter()
        .filter(|n| n.parent_urn.as_deref() == parent_urn)
        .collect();
    children.sort_by_key(|n| n.order_id);
    children
        .into_iter()
        .map(|node| {
            let mut payload = node_payload(node);
            if let Some(object) = payload.as_object_mut() {
                object.insert(
                    "children".to_string(),
                    Value::Array(node_tree(nodes, Some(&node.urn))),
                );
            }
            payload
        })
        .collect()
}

pub async fn tree(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let nodes = state.stores.requirement_nodes.list_for_framework(id).await?;
    Ok(Json(json!({"results": node_tree(&nodes, None)})))
}

/// Mapping sets this framework takes part in, either side.
pub async fn mappings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::Framework).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let set_scope = scope(&state, &user, ObjectType::RequirementMappingSet).await?;
    let sets = state.stores.mappings.list_sets(&set_scope).await?;
    let results: Vec<Value> = sets
        .iter()
        .filter(|s| s.source_framework_id == id || s.target_framework_id == id)
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "source_framework": s.source_framework_id,
                "target_framework": s.target_framework_id,
            })
        })
        .collect();
    Ok(Json(json!({"results": results})))
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeQuery {
    pub framework: Option<Uuid>,
    pub assessable: Option<bool>,
}

pub async fn list_nodes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementNode).await?;
    let scope = scope(&state, &user, ObjectType::RequirementNode).await?;
    let nodes = state
        .stores
        .requirement_nodes
        .list(&scope, query.framework, query.assessable)
        .await?;
    let nodes = visible(nodes, &access.view, |n| n.id);
    Ok(Json(ListResponse::new(
        nodes.iter().map(node_payload).collect(),
    )))
}

pub async fn retrieve_node(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementNode).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let node = state
        .stores
        .requirement_nodes
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let mut payload = node_payload(&node);
    if let Some(object) = payload.as_object_mut() {
        object.insert("framework".to_string(), json!(node.framework_id));
        object.insert("reference_controls".to_string(), json!(node.reference_control_ids));
        object.insert("threats".to_string(), json!(node.threat_ids));
    }
    Ok(Json(payload))
}

fn mapping_set_payload(set: &RequirementMappingSet, names: &HashMap<Uuid, String>) -> Value {
    json!({
        "id": set.id,
        "name": set.name,
        "source_framework": set.source_framework_id,
        "target_framework": set.target_framework_id,
        "is_published": set.is_published,
        "folder": related(names, set.folder_id),
    })
}

pub async fn list_mapping_sets(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementMappingSet).await?;
    let scope = scope(&state, &user, ObjectType::RequirementMappingSet).await?;
    let sets = state.stores.mappings.list_sets(&scope).await?;
    let sets = visible(sets, &access.view, |s| s.id);
    let names = folder_names(&state).await?;
    Ok(Json(ListResponse::new(
        sets.iter().map(|s| mapping_set_payload(s, &names)).collect(),
    )))
}

pub async fn retrieve_mapping_set(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RequirementMappingSet).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    let set = state
        .stores
        .mappings
        .get_set(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let names = folder_names(&state).await?;
    let mappings = state.stores.mappings.list_mappings(set.id).await?;
    let mut payload = mapping_set_payload(&set, &names);
    if let Some(object) = payload.as_object_mut() {
        object.insert(
            "mappings".to_string(),
            Value::Array(
                mappings
                    .iter()
                    .map(|m| {
                        json!({
                            "id": m.id,
                            "source_requirement": m.source_requirement_id,
                            "target_requirement": m.target_requirement_id,
                            "coverage": m.coverage.as_str(),
                        })
                    })
                    .collect(),
            ),
        );
    }
    Ok(Json(payload))
}
