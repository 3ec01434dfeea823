// Risk scenario endpoints, with matrix-derived rating scales

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::cache::CacheTier;
use crate::api::handlers::{
    access, cached, choices, ids_or_empty, per_status_payload, require_add, require_change,
    require_delete, scope, IdList,
};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::matrix::{MatrixDefinition, UNDEFINED_COLOR, UNDEFINED_NAME};
use crate::domain::risk::{RiskScenario, Treatment, QUALIFICATIONS};
use crate::domain::ObjectType;
use crate::store::RiskScenarioFilter;

fn parse_treatment(raw: &str) -> Result<Treatment, ApiError> {
    Treatment::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown treatment: {}", raw)))
}

fn check_qualifications(values: &[String]) -> Result<(), ApiError> {
    for value in values {
        if !QUALIFICATIONS.iter().any(|(v, _)| v == value) {
            return Err(ApiError::bad_request(format!(
                "Unknown qualification: {}",
                value
            )));
        }
    }
    Ok(())
}

fn level_payload(definition: &MatrixDefinition, proba: i64, impact: i64) -> Value {
    match definition.risk_level(proba, impact) {
        Some((index, level)) => json!({
            "value": index,
            "name": level.name,
            "hexcolor": level.color(),
        }),
        None => json!({
            "value": -1,
            "name": UNDEFINED_NAME,
            "hexcolor": UNDEFINED_COLOR,
        }),
    }
}

/// Read shape with resolved current/residual levels and named M2M links.
async fn read_payload(state: &AppState, scenario: &RiskScenario) -> Result<Value, ApiError> {
    let assessment = state
        .stores
        .risk_assessments
        .get(scenario.risk_assessment_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let matrix = state
        .stores
        .matrices
        .get(assessment.risk_matrix_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let definition = matrix.definition()?;

    let mut threats = Vec::new();
    for id in &scenario.threat_ids {
        if let Some(threat) = state.stores.threats.get(*id).await? {
            threats.push(json!({"id": threat.id, "str": threat.name}));
        }
    }
    let mut assets = Vec::new();
    for id in &scenario.asset_ids {
        if let Some(asset) = state.stores.assets.get(*id).await? {
            assets.push(json!({"id": asset.id, "str": asset.name}));
        }
    }
    let mut controls = Vec::new();
    for id in &scenario.applied_control_ids {
        if let Some(control) = state.stores.applied_controls.get(*id).await? {
            controls.push(json!({"id": control.id, "str": control.name}));
        }
    }

    Ok(json!({
        "id": scenario.id,
        "ref_id": scenario.ref_id,
        "name": scenario.name,
        "description": scenario.description,
        "existing_controls": scenario.existing_controls,
        "treatment": scenario.treatment.as_str(),
        "qualifications": scenario.qualifications,
        "current_proba": scenario.current_proba,
        "current_impact": scenario.current_impact,
        "current_level": level_payload(&definition, scenario.current_proba, scenario.current_impact),
        "residual_proba": scenario.residual_proba,
        "residual_impact": scenario.residual_impact,
        "residual_level": level_payload(&definition, scenario.residual_proba, scenario.residual_impact),
        "strength_of_knowledge": scenario.strength_of_knowledge,
        "justification": scenario.justification,
        "risk_assessment": {"id": assessment.id, "str": assessment.name},
        "threats": threats,
        "assets": assets,
        "applied_controls": controls,
        "created_at": scenario.created_at,
        "updated_at": scenario.updated_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskScenarioQuery {
    pub risk_assessment: Option<Uuid>,
    pub treatment: Option<String>,
    pub threat: Option<Uuid>,
    pub asset: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RiskScenarioQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::RiskScenario).await?;
    let filter = RiskScenarioFilter {
        risk_assessment_id: query.risk_assessment,
        treatment: query.treatment.as_deref().map(parse_treatment).transpose()?,
        threat_id: query.threat,
        asset_id: query.asset,
        search: query.search,
        ordering: query.ordering,
    };
    let scenarios = state.stores.risk_scenarios.list(&scope, &filter).await?;
    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        results.push(read_payload(&state, scenario).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct RiskScenarioWrite {
    pub name: String,
    pub risk_assessment: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub existing_controls: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub qualifications: Vec<String>,
    #[serde(default)]
    pub current_proba: Option<i64>,
    #[serde(default)]
    pub current_impact: Option<i64>,
    #[serde(default)]
    pub residual_proba: Option<i64>,
    #[serde(default)]
    pub residual_impact: Option<i64>,
    #[serde(default)]
    pub strength_of_knowledge: Option<i64>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub threats: Option<IdList>,
    #[serde(default)]
    pub assets: Option<IdList>,
    #[serde(default)]
    pub applied_controls: Option<IdList>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<RiskScenarioWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let assessment = state
        .stores
        .risk_assessments
        .get(body.risk_assessment)
        .await?
        .ok_or_else(|| ApiError::bad_request("Unknown risk assessment"))?;
    require_add(&state, &user, ObjectType::RiskScenario, assessment.folder_id).await?;
    check_qualifications(&body.qualifications)?;
    let treatment = match body.treatment.as_deref() {
        None => Treatment::Open,
        Some(raw) => parse_treatment(raw)?,
    };
    let position = state
        .stores
        .risk_scenarios
        .count_for_assessment(assessment.id)
        .await? as usize;

    let now = Utc::now();
    let scenario = RiskScenario {
        id: Uuid::new_v4(),
        folder_id: assessment.folder_id,
        risk_assessment_id: assessment.id,
        ref_id: RiskScenario::make_ref_id(position + 1),
        name: body.name,
        description: body.description,
        existing_controls: body.existing_controls,
        treatment,
        qualifications: body.qualifications,
        current_proba: body.current_proba.unwrap_or(-1),
        current_impact: body.current_impact.unwrap_or(-1),
        residual_proba: body.residual_proba.unwrap_or(-1),
        residual_impact: body.residual_impact.unwrap_or(-1),
        strength_of_knowledge: body.strength_of_knowledge.unwrap_or(-1),
        justification: body.justification,
        threat_ids: ids_or_empty(body.threats)?,
        asset_ids: ids_or_empty(body.assets)?,
        applied_control_ids: ids_or_empty(body.applied_controls)?,
        created_at: now,
        updated_at: now,
    };
    state.stores.risk_scenarios.create(&scenario).await?;
    Ok((StatusCode::CREATED, Json(read_payload(&state, &scenario).await?)))
}

pub async fn treatment_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(
            Treatment::ALL.iter().map(|t| (t.as_str(), t.label())),
        ))
    })
    .await
}

pub async fn qualification_choices(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Long, &user, &uri, async {
        Ok(choices(QUALIFICATIONS.iter().copied()))
    })
    .await
}

/// Scenario counts per risk level name, for current and residual risk.
/// Level order follows the first matrix that declares each level.
pub async fn count_per_level(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let scope = scope(&state, &user, ObjectType::RiskScenario).await?;
        let scenarios = state
            .stores
            .risk_scenarios
            .list(&scope, &RiskScenarioFilter::default())
            .await?;

        let mut definitions: HashMap<Uuid, MatrixDefinition> = HashMap::new();
        // (name, color, current count, residual count)
        let mut buckets: Vec<(String, String, usize, usize)> = vec![(
            UNDEFINED_NAME.to_string(),
            UNDEFINED_COLOR.to_string(),
            0,
            0,
        )];
        fn bump(
            buckets: &mut Vec<(String, String, usize, usize)>,
            name: &str,
            color: &str,
            residual: bool,
        ) {
            if !buckets.iter().any(|(n, _, _, _)| n == name) {
                buckets.push((name.to_string(), color.to_string(), 0, 0));
            }
            if let Some(entry) = buckets.iter_mut().find(|(n, _, _, _)| n == name) {
                if residual {
                    entry.3 += 1;
                } else {
                    entry.2 += 1;
                }
            }
        }

        for scenario in &scenarios {
            let assessment = match state
                .stores
                .risk_assessments
                .get(scenario.risk_assessment_id)
                .await?
            {
                Some(a) => a,
                None => continue,
            };
            if !definitions.contains_key(&assessment.risk_matrix_id) {
                if let Some(matrix) = state.stores.matrices.get(assessment.risk_matrix_id).await? {
                    definitions.insert(assessment.risk_matrix_id, matrix.definition()?);
                }
            }
            let Some(definition) = definitions.get(&assessment.risk_matrix_id) else {
                continue;
            };
            for (residual, proba, impact) in [
                (false, scenario.current_proba, scenario.current_impact),
                (true, scenario.residual_proba, scenario.residual_impact),
            ] {
                match definition.risk_level(proba, impact) {
                    Some((_, level)) => {
                        bump(&mut buckets, &level.name, level.color(), residual)
                    }
                    None => bump(&mut buckets, UNDEFINED_NAME, UNDEFINED_COLOR, residual),
                }
            }
        }

        let current: Vec<Value> = buckets
            .iter()
            .map(|(name, color, current, _)| {
                json!({"name": name, "value": current, "color": color})
            })
            .collect();
        let residual: Vec<Value> = buckets
            .iter()
            .map(|(name, color, _, residual)| {
                json!({"name": name, "value": residual, "color": color})
            })
            .collect();
        Ok(json!({"results": {"current": current, "residual": residual}}))
    })
    .await
}

pub async fn per_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    cached(&state, CacheTier::Short, &user, &uri, async {
        let scope = scope(&state, &user, ObjectType::RiskScenario).await?;
        let scenarios = state
            .stores
            .risk_scenarios
            .list(&scope, &RiskScenarioFilter::default())
            .await?;
        let mut counts: HashMap<Treatment, usize> = HashMap::new();
        for scenario in &scenarios {
            *counts.entry(scenario.treatment).or_default() += 1;
        }
        Ok(json!({
            "results": per_status_payload(
                Treatment::ALL
                    .iter()
                    .map(|t| (t.as_str(), t.label(), counts.get(t).copied().unwrap_or(0))),
            )
        }))
    })
    .await
}

async fn fetch_viewable(
    state: &AppState,
    user: &User,
    id: Uuid,
) -> Result<RiskScenario, ApiError> {
    let access = access(state, user, ObjectType::RiskScenario).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    state
        .stores
        .risk_scenarios
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let scenario = fetch_viewable(&state, &user, id).await?;
    Ok(Json(read_payload(&state, &scenario).await?))
}

#[derive(Debug, Deserialize)]
pub struct RiskScenarioUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub existing_controls: Option<Option<String>>,
    pub treatment: Option<String>,
    pub qualifications: Option<Vec<String>>,
    pub current_proba: Option<i64>,
    pub current_impact: Option<i64>,
    pub residual_proba: Option<i64>,
    pub residual_impact: Option<i64>,
    pub strength_of_knowledge: Option<i64>,
    pub justification: Option<Option<String>>,
    pub threats: Option<IdList>,
    pub assets: Option<IdList>,
    pub applied_controls: Option<IdList>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RiskScenarioUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskScenario).await?;
    require_change(&access, id)?;
    let mut scenario = state
        .stores
        .risk_scenarios
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if let Some(name) = body.name {
        scenario.name = name;
    }
    if let Some(description) = body.description {
        scenario.description = description;
    }
    if let Some(existing_controls) = body.existing_controls {
        scenario.existing_controls = existing_controls;
    }
    if let Some(raw) = body.treatment {
        scenario.treatment = parse_treatment(&raw)?;
    }
    if let Some(qualifications) = body.qualifications {
        check_qualifications(&qualifications)?;
        scenario.qualifications = qualifications;
    }
    if let Some(v) = body.current_proba {
        scenario.current_proba = v;
    }
    if let Some(v) = body.current_impact {
        scenario.current_impact = v;
    }
    if let Some(v) = body.residual_proba {
        scenario.residual_proba = v;
    }
    if let Some(v) = body.residual_impact {
        scenario.residual_impact = v;
    }
    if let Some(v) = body.strength_of_knowledge {
        scenario.strength_of_knowledge = v;
    }
    if let Some(justification) = body.justification {
        scenario.justification = justification;
    }
    if let Some(threats) = body.threats {
        scenario.threat_ids = threats.into_ids()?;
    }
    if let Some(assets) = body.assets {
        scenario.asset_ids = assets.into_ids()?;
    }
    if let Some(controls) = body.applied_controls {
        scenario.applied_control_ids = controls.into_ids()?;
    }
    scenario.updated_at = Utc::now();
    state.stores.risk_scenarios.update(&scenario).await?;
    Ok(Json(read_payload(&state, &scenario).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::RiskScenario).await?;
    require_delete(&access, id)?;
    if !state.stores.risk_scenarios.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let scenario = fetch_viewable(&state, &user, id).await?;
    Ok(Json(json!({
        "id": scenario.id,
        "ref_id": scenario.ref_id,
        "name": scenario.name,
        "description": scenario.description,
        "existing_controls": scenario.existing_controls,
        "treatment": scenario.treatment.as_str(),
        "qualifications": scenario.qualifications,
        "current_proba": scenario.current_proba,
        "current_impact": scenario.current_impact,
        "residual_proba": scenario.residual_proba,
        "residual_impact": scenario.residual_impact,
        "strength_of_knowledge": scenario.strength_of_knowledge,
        "justification": scenario.justification,
        "risk_assessment": scenario.risk_assessment_id,
        "threats": scenario.threat_ids,
        "assets": scenario.asset_ids,
        "applied_controls": scenario.applied_control_ids,
        "folder": scenario.folder_id,
    })))
}

/// `{-1: "--"}` plus the named levels of the scenario's matrix axis.
async fn axis_choices(
    state: &AppState,
    user: &User,
    id: Uuid,
    pick: fn(&MatrixDefinition) -> Vec<String>,
) -> Result<Json<Value>, ApiError> {
    let scenario = fetch_viewable(state, user, id).await?;
    let assessment = state
        .stores
        .risk_assessments
        .get(scenario.risk_assessment_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let matrix = state
        .stores
        .matrices
        .get(assessment.risk_matrix_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let definition = matrix.definition()?;

    let mut map = Map::new();
    map.insert("-1".to_string(), Value::String(UNDEFINED_NAME.to_string()));
    for (index, name) in pick(&definition).into_iter().enumerate() {
        map.insert(index.to_string(), Value::String(name));
    }
    Ok(Json(Value::Object(map)))
}

pub async fn probability(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    axis_choices(&state, &user, id, |d| {
        d.probability.iter().map(|l| l.name.clone()).collect()
    })
    .await
}

pub async fn impact(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    axis_choices(&state, &user, id, |d| {
        d.impact.iter().map(|l| l.name.clone()).collect()
    })
    .await
}

/// Matrices may carry a strength of knowledge scale in their raw
/// definition; scenarios fall back to just the undefined entry when the
/// matrix does not define one.
pub async fn strength_of_knowledge(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let scenario = fetch_viewable(&state, &user, id).await?;
    let assessment = state
        .stores
        .risk_assessments
        .get(scenario.risk_assessment_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let matrix = state
        .stores
        .matrices
        .get(assessment.risk_matrix_id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    let raw: Value = serde_json::from_str(&matrix.json_definition)
        .map_err(crate::core::errors::AegisError::from)?;
    let mut map = Map::new();
    map.insert("-1".to_string(), Value::String(UNDEFINED_NAME.to_string()));
    if let Some(levels) = raw.get("strength_of_knowledge").and_then(Value::as_array) {
        for (index, level) in levels.iter().enumerate() {
            if let Some(name) = level.get("name").and_then(Value::as_str) {
                map.insert(index.to_string(), Value::String(name.to_string()));
            }
        }
    }
    Ok(Json(Value::Object(map)))
}
