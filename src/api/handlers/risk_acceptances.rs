// Risk acceptance endpoints and the approval workflow

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::handlers::{
    access, folder_names, ids_or_empty, related, require_add, require_change, require_delete,
    scope, IdList,
};
use crate::api::responses::{ApiError, ListResponse};
use crate::api::AppState;
use crate::domain::iam::User;
use crate::domain::risk::{AcceptanceState, RiskAcceptance};
use crate::domain::ObjectType;
use crate::iam::APPROVE_RISK_ACCEPTANCE;
use crate::store::RiskAcceptanceFilter;

async fn read_payload(
    state: &AppState,
    acceptance: &RiskAcceptance,
    names: &HashMap<Uuid, String>,
) -> Result<Value, ApiError> {
    let approver = match acceptance.approver_id {
        Some(id) => state
            .stores
            .users
            .get(id)
            .await?
            .map(|u| json!({"id": u.id, "str": u.email})),
        None => None,
    };
    let mut scenarios = Vec::new();
    for id in &acceptance.risk_scenario_ids {
        if let Some(scenario) = state.stores.risk_scenarios.get(*id).await? {
            scenarios.push(json!({"id": scenario.id, "str": scenario.name}));
        }
    }
    Ok(json!({
        "id": acceptance.id,
        "name": acceptance.name,
        "description": acceptance.description,
        "state": acceptance.state.as_str(),
        "approver": approver,
        "expiry_date": acceptance.expiry_date,
        "justification": acceptance.justification,
        "accepted_at": acceptance.accepted_at,
        "rejected_at": acceptance.rejected_at,
        "revoked_at": acceptance.revoked_at,
        "risk_scenarios": scenarios,
        "folder": related(names, acceptance.folder_id),
        "created_at": acceptance.created_at,
        "updated_at": acceptance.updated_at,
    }))
}

fn parse_state(raw: &str) -> Result<AcceptanceState, ApiError> {
    AcceptanceState::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown state: {}", raw)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskAcceptanceQuery {
    pub folder: Option<Uuid>,
    pub state: Option<String>,
    pub approver: Option<Uuid>,
    pub risk_scenario: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RiskAcceptanceQuery>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let scope = scope(&state, &user, ObjectType::RiskAcceptance).await?;
    let filter = RiskAcceptanceFilter {
        folder_id: query.folder,
        state: query.state.as_deref().map(parse_state).transpose()?,
        approver_id: query.approver,
        risk_scenario_id: query.risk_scenario,
        search: query.search,
        ordering: query.ordering,
    };
    let acceptances = state.stores.risk_acceptances.list(&scope, &filter).await?;
    let names = folder_names(&state).await?;
    let mut results = Vec::with_capacity(acceptances.len());
    for acceptance in &acceptances {
        results.push(read_payload(&state, acceptance, &names).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

#[derive(Debug, Deserialize)]
pub struct RiskAcceptanceWrite {
    pub name: String,
    pub folder: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub approver: Option<Uuid>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub risk_scenarios: Option<IdList>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<RiskAcceptanceWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_add(&state, &user, ObjectType::RiskAcceptance, body.folder).await?;
    let scenario_ids = ids_or_empty(body.risk_scenarios)?;

    // The designated approver must hold the approval permission on the
    // folder of every covered scenario.
    if let Some(approver_id) = body.approver {
        let approver = state
            .stores
            .users
            .get(approver_id)
            .await?
            .ok_or_else(|| ApiError::bad_request("Unknown approver"))?;
        for scenario_id in &scenario_ids {
            let scenario = state
                .stores
                .risk_scenarios
                .get(*scenario_id)
                .await?
                .ok_or_else(|| ApiError::bad_request("Unknown risk scenario"))?;
            if !state
                .engine
                .is_access_allowed(&approver, APPROVE_RISK_ACCEPTANCE, scenario.folder_id)
                .await?
            {
                return Err(ApiError::bad_request(
                    "The approver cannot approve acceptances in the scenario's domain",
                ));
            }
        }
    }

    let now = Utc::now();
    let acceptance = RiskAcceptance {
        id: Uuid::new_v4(),
        folder_id: body.folder,
        name: body.name,
        description: body.description,
        approver_id: body.approver,
        state: if body.approver.is_some() {
            AcceptanceState::Submitted
        } else {
            AcceptanceState::Created
        },
        expiry_date: body.expiry_date,
        justification: body.justification,
        accepted_at: None,
        rejected_at: None,
        revoked_at: None,
        risk_scenario_ids: scenario_ids,
        created_at: now,
        updated_at: now,
    };
    state.stores.risk_acceptances.create(&acceptance).await?;
    let names = folder_names(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(read_payload(&state, &acceptance, &names).await?),
    ))
}

/// Submitted acceptances waiting on the calling approver.
pub async fn to_review(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ListResponse<Value>>, ApiError> {
    let acceptances = state
        .stores
        .risk_acceptances
        .list_for_approver(user.id, AcceptanceState::Submitted)
        .await?;
    let names = folder_names(&state).await?;
    let mut results = Vec::with_capacity(acceptances.len());
    for acceptance in &acceptances {
        results.push(read_payload(&state, acceptance, &names).await?);
    }
    Ok(Json(ListResponse::new(results)))
}

pub async fn waiting(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let count = state.stores.risk_acceptances.waiting_count(user.id).await?;
    Ok(Json(json!({"count": count})))
}

async fn fetch_viewable(
    state: &AppState,
    user: &User,
    id: Uuid,
) -> Result<RiskAcceptance, ApiError> {
    let access = access(state, user, ObjectType::RiskAcceptance).await?;
    if !access.view.contains(&id) {
        return Err(ApiError::not_found());
    }
    state
        .stores
        .risk_acceptances
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let acceptance = fetch_viewable(&state, &user, id).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &acceptance, &names).await?))
}

#[derive(Debug, Deserialize)]
pub struct RiskAcceptanceUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub justification: Option<Option<String>>,
    pub risk_scenarios: Option<IdList>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RiskAcceptanceUpdate>,
) -> Result<Json<Value>, ApiError> {
    let access = access(&state, &user, ObjectType::RiskAcceptance).await?;
    require_change(&access, id)?;
    let mut acceptance = state
        .stores
        .risk_acceptances
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    // Only the designated approver writes the justification.
    if body.justification.is_some() && acceptance.approver_id != Some(user.id) {
        return Err(ApiError::bad_request(
            "Only the approver can edit the justification",
        ));
    }

    if let Some(name) = body.name {
        acceptance.name = name;
    }
    if let Some(description) = body.description {
        acceptance.description = description;
    }
    if let Some(expiry_date) = body.expiry_date {
        acceptance.expiry_date = expiry_date;
    }
    if let Some(justification) = body.justification {
        acceptance.justification = justification;
    }
    if let Some(scenarios) = body.risk_scenarios {
        acceptance.risk_scenario_ids = scenarios.into_ids()?;
    }
    acceptance.updated_at = Utc::now();
    state.stores.risk_acceptances.update(&acceptance).await?;
    let names = folder_names(&state).await?;
    Ok(Json(read_payload(&state, &acceptance, &names).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let access = access(&state, &user, ObjectType::RiskAcceptance).await?;
    require_delete(&access, id)?;
    if !state.stores.risk_acceptances.delete(id).await? {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn object(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let acceptance = fetch_viewable(&state, &user, id).await?;
    Ok(Json(json!({
        "id": acceptance.id,
        "name": acceptance.name,
        "description": acceptance.description,
        "state": acceptance.state.as_str(),
        "approver": acceptance.approver_id,
        "expiry_date": acceptance.expiry_date,
        "justification": acceptance.justification,
        "risk_scenarios": acceptance.risk_scenario_ids,
        "folder": acceptance.folder_id,
    })))
}

/// State transition shared by accept/reject/revoke: approver only,
/// legality checked by the acceptance state machine.
async fn transition(
    state: &AppState,
    user: &User,
    id: Uuid,
    next: AcceptanceState,
    stamp: fn(&mut RiskAcceptance, DateTime<Utc>),
) -> Result<Json<Value>, ApiError> {
    let mut acceptance = fetch_viewable(state, user, id).await?;
    if acceptance.approver_id != Some(user.id) {
        return Err(ApiError::forbidden(
            "Only the designated approver can change the acceptance state",
        ));
    }
    if !acceptance.state.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot move from {} to {}",
            acceptance.state, next
        )));
    }
    let now = Utc::now();
    acceptance.state = next;
    stamp(&mut acceptance, now);
    acceptance.updated_at = now;
    state.stores.risk_acceptances.update(&acceptance).await?;
    Ok(Json(json!({
        "results": format!("state updated to {}", next)
    })))
}

pub async fn accept(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    transition(&state, &user, id, AcceptanceState::Accepted, |a, now| {
        a.accepted_at = Some(now)
    })
    .await
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    transition(&state, &user, id, AcceptanceState::Rejected, |a, now| {
        a.rejected_at = Some(now)
    })
    .await
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    transition(&state, &user, id, AcceptanceState::Revoked, |a, now| {
        a.revoked_at = Some(now)
    })
    .await
}
