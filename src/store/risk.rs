// Risk assessment, scenario and acceptance persistence.

use std::collections::HashSet;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::risk::{
    AcceptanceState, RiskAcceptance, RiskAssessment, RiskScenario, Treatment,
};
use crate::domain::AssessmentStatus;
use crate::store::{
    fetch_link_map, fetch_links, like_pattern, order_clause, parse_date_opt, parse_id,
    parse_id_opt, parse_string_list, parse_ts, parse_ts_opt, parse_variant, placeholders,
    replace_links,
};

const ASSESSMENT_COLUMNS: &str =
    "id, folder_id, project_id, risk_matrix_id, name, description, version, status, eta, due_date, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RiskAssessmentRow {
    id: String,
    folder_id: String,
    project_id: String,
    risk_matrix_id: String,
    name: String,
    description: Option<String>,
    version: Option<String>,
    status: String,
    eta: Option<String>,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_assessment(row: RiskAssessmentRow) -> Result<RiskAssessment, AegisError> {
    Ok(RiskAssessment {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        project_id: parse_id(&row.project_id)?,
        risk_matrix_id: parse_id(&row.risk_matrix_id)?,
        name: row.name,
        description: row.description,
        version: row.version,
        status: parse_variant(&row.status, AssessmentStatus::parse)?,
        eta: parse_date_opt(row.eta.as_deref())?,
        due_date: parse_date_opt(row.due_date.as_deref())?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct RiskAssessmentFilter {
    pub folder_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct RiskAssessmentStore {
    db_pool: SqlitePool,
}

impl RiskAssessmentStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, assessment: &RiskAssessment) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO risk_assessments (id, folder_id, project_id, risk_matrix_id, name, description, version, status, eta, due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(assessment.id.to_string())
        .bind(assessment.folder_id.to_string())
        .bind(assessment.project_id.to_string())
        .bind(assessment.risk_matrix_id.to_string())
        .bind(&assessment.name)
        .bind(&assessment.description)
        .bind(&assessment.version)
        .bind(assessment.status.as_str())
        .bind(assessment.eta.map(|d| d.to_string()))
        .bind(assessment.due_date.map(|d| d.to_string()))
        .bind(assessment.created_at.to_rfc3339())
        .bind(assessment.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RiskAssessment>, AegisError> {
        let sql = format!("SELECT {} FROM risk_assessments WHERE id = ?", ASSESSMENT_COLUMNS);
        let row = sqlx::query_as::<_, RiskAssessmentRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_assessment).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &RiskAssessmentFilter,
    ) -> Result<Vec<RiskAssessment>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM risk_assessments WHERE folder_id IN ({})",
            ASSESSMENT_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(project_id) = filter.project_id {
            sql.push_str(" AND project_id = ?");
            params.push(project_id.to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "status", "eta", "due_date", "created_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, RiskAssessmentRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_assessment).collect()
    }

    pub async fn update(&self, assessment: &RiskAssessment) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE risk_assessments
             SET folder_id = ?, project_id = ?, name = ?, description = ?, version = ?, status = ?, eta = ?, due_date = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(assessment.folder_id.to_string())
        .bind(assessment.project_id.to_string())
        .bind(&assessment.name)
        .bind(&assessment.description)
        .bind(&assessment.version)
        .bind(assessment.status.as_str())
        .bind(assessment.eta.map(|d| d.to_string()))
        .bind(assessment.due_date.map(|d| d.to_string()))
        .bind(assessment.updated_at.to_rfc3339())
        .bind(assessment.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM risk_assessments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

const SCENARIO_COLUMNS: &str =
    "id, folder_id, risk_assessment_id, ref_id, name, description, existing_controls, treatment, qualifications, current_proba, current_impact, residual_proba, residual_impact, strength_of_knowledge, justification, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RiskScenarioRow {
    id: String,
    folder_id: String,
    risk_assessment_id: String,
    ref_id: String,
    name: String,
    description: Option<String>,
    existing_controls: Option<String>,
    treatment: String,
    qualifications: String,
    current_proba: i64,
    current_impact: i64,
    residual_proba: i64,
    residual_impact: i64,
    strength_of_knowledge: i64,
    justification: Option<String>,
    created_at: String,
    updated_at: String,
}

struct ScenarioLinks {
    threat_ids: Vec<Uuid>,
    asset_ids: Vec<Uuid>,
    applied_control_ids: Vec<Uuid>,
}

fn to_scenario(row: RiskScenarioRow, links: ScenarioLinks) -> Result<RiskScenario, AegisError> {
    Ok(RiskScenario {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        risk_assessment_id: parse_id(&row.risk_assessment_id)?,
        ref_id: row.ref_id,
        name: row.name,
        description: row.description,
        existing_controls: row.existing_controls,
        treatment: parse_variant(&row.treatment, Treatment::parse)?,
        qualifications: parse_string_list(&row.qualifications),
        current_proba: row.current_proba,
        current_impact: row.current_impact,
        residual_proba: row.residual_proba,
        residual_impact: row.residual_impact,
        strength_of_knowledge: row.strength_of_knowledge,
        justification: row.justification,
        threat_ids: links.threat_ids,
        asset_ids: links.asset_ids,
        applied_control_ids: links.applied_control_ids,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct RiskScenarioFilter {
    pub risk_assessment_id: Option<Uuid>,
    pub treatment: Option<Treatment>,
    pub threat_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct RiskScenarioStore {
    db_pool: SqlitePool,
}

impl RiskScenarioStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, scenario: &RiskScenario) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO risk_scenarios (id, folder_id, risk_assessment_id, ref_id, name, description, existing_controls, treatment, qualifications, current_proba, current_impact, residual_proba, residual_impact, strength_of_knowledge, justification, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(scenario.id.to_string())
        .bind(scenario.folder_id.to_string())
        .bind(scenario.risk_assessment_id.to_string())
        .bind(&scenario.ref_id)
        .bind(&scenario.name)
        .bind(&scenario.description)
        .bind(&scenario.existing_controls)
        .bind(scenario.treatment.as_str())
        .bind(serde_json::to_string(&scenario.qualifications)?)
        .bind(scenario.current_proba)
        .bind(scenario.current_impact)
        .bind(scenario.residual_proba)
        .bind(scenario.residual_impact)
        .bind(scenario.strength_of_knowledge)
        .bind(&scenario.justification)
        .bind(scenario.created_at.to_rfc3339())
        .bind(scenario.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        self.write_links(&mut tx, scenario).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RiskScenario>, AegisError> {
        let sql = format!("SELECT {} FROM risk_scenarios WHERE id = ?", SCENARIO_COLUMNS);
        let row = sqlx::query_as::<_, RiskScenarioRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let links = ScenarioLinks {
                    threat_ids: fetch_links(
                        &self.db_pool,
                        "risk_scenario_threats",
                        "risk_scenario_id",
                        "threat_id",
                        id,
                    )
                    .await?,
                    asset_ids: fetch_links(
                        &self.db_pool,
                        "risk_scenario_assets",
                        "risk_scenario_id",
                        "asset_id",
                        id,
                    )
                    .await?,
                    applied_control_ids: fetch_links(
                        &self.db_pool,
                        "risk_scenario_applied_controls",
                        "risk_scenario_id",
                        "applied_control_id",
                        id,
                    )
                    .await?,
                };
                Ok(Some(to_scenario(row, links)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &RiskScenarioFilter,
    ) -> Result<Vec<RiskScenario>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM risk_scenarios WHERE folder_id IN ({})",
            SCENARIO_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(risk_assessment_id) = filter.risk_assessment_id {
            sql.push_str(" AND risk_assessment_id = ?");
            params.push(risk_assessment_id.to_string());
        }
        if let Some(treatment) = filter.treatment {
            sql.push_str(" AND treatment = ?");
            params.push(treatment.as_str().to_string());
        }
        if let Some(threat_id) = filter.threat_id {
            sql.push_str(
                " AND id IN (SELECT risk_scenario_id FROM risk_scenario_threats WHERE threat_id = ?)",
            );
            params.push(threat_id.to_string());
        }
        if let Some(asset_id) = filter.asset_id {
            sql.push_str(
                " AND id IN (SELECT risk_scenario_id FROM risk_scenario_assets WHERE asset_id = ?)",
            );
            params.push(asset_id.to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["ref_id", "name", "treatment", "created_at"],
            "created_at",
        ));

        let mut query = sqlx::query_as::<_, RiskScenarioRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        self.hydrate_all(rows).await
    }

    /// Scenarios of one assessment in creation order. Used internally
    /// by exports and consistency review after the assessment itself
    /// passed the access check.
    pub async fn list_for_assessment(
        &self,
        risk_assessment_id: Uuid,
    ) -> Result<Vec<RiskScenario>, AegisError> {
        let sql = format!(
            "SELECT {} FROM risk_scenarios WHERE risk_assessment_id = ? ORDER BY created_at",
            SCENARIO_COLUMNS
        );
        let rows = sqlx::query_as::<_, RiskScenarioRow>(&sql)
            .bind(risk_assessment_id.to_string())
            .fetch_all(&self.db_pool)
            .await?;
        self.hydrate_all(rows).await
    }

    pub async fn count_for_assessment(&self, risk_assessment_id: Uuid) -> Result<i64, AegisError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM risk_scenarios WHERE risk_assessment_id = ?")
                .bind(risk_assessment_id.to_string())
                .fetch_one(&self.db_pool)
                .await?;
        Ok(count)
    }

    pub async fn update(&self, scenario: &RiskScenario) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "UPDATE risk_scenarios
             SET name = ?, description = ?, existing_controls = ?, treatment = ?, qualifications = ?, current_proba = ?, current_impact = ?, residual_proba = ?, residual_impact = ?, strength_of_knowledge = ?, justification = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&scenario.name)
        .bind(&scenario.description)
        .bind(&scenario.existing_controls)
        .bind(scenario.treatment.as_str())
        .bind(serde_json::to_string(&scenario.qualifications)?)
        .bind(scenario.current_proba)
        .bind(scenario.current_impact)
        .bind(scenario.residual_proba)
        .bind(scenario.residual_impact)
        .bind(scenario.strength_of_knowledge)
        .bind(&scenario.justification)
        .bind(scenario.updated_at.to_rfc3339())
        .bind(scenario.id.to_string())
        .execute(&mut *tx)
        .await?;
        self.write_links(&mut tx, scenario).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM risk_scenarios WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn write_links(
        &self,
        tx: &mut sqlx::SqliteConnection,
        scenario: &RiskScenario,
    ) -> Result<(), AegisError> {
        replace_links(
            tx,
            "risk_scenario_threats",
            "risk_scenario_id",
            "threat_id",
            scenario.id,
            &scenario.threat_ids,
        )
        .await?;
        replace_links(
            tx,
            "risk_scenario_assets",
            "risk_scenario_id",
            "asset_id",
            scenario.id,
            &scenario.asset_ids,
        )
        .await?;
        replace_links(
            tx,
            "risk_scenario_applied_controls",
            "risk_scenario_id",
            "applied_control_id",
            scenario.id,
            &scenario.applied_control_ids,
        )
        .await?;
        Ok(())
    }

    async fn hydrate_all(
        &self,
        rows: Vec<RiskScenarioRow>,
    ) -> Result<Vec<RiskScenario>, AegisError> {
        let ids = rows
            .iter()
            .map(|row| parse_id(&row.id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut threats = fetch_link_map(
            &self.db_pool,
            "risk_scenario_threats",
            "risk_scenario_id",
            "threat_id",
            &ids,
        )
        .await?;
        let mut assets = fetch_link_map(
            &self.db_pool,
            "risk_scenario_assets",
            "risk_scenario_id",
            "asset_id",
            &ids,
        )
        .await?;
        let mut controls = fetch_link_map(
            &self.db_pool,
            "risk_scenario_applied_controls",
            "risk_scenario_id",
            "applied_control_id",
            &ids,
        )
        .await?;
        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| {
                let links = ScenarioLinks {
                    threat_ids: threats.remove(&id).unwrap_or_default(),
                    asset_ids: assets.remove(&id).unwrap_or_default(),
                    applied_control_ids: controls.remove(&id).unwrap_or_default(),
                };
                to_scenario(row, links)
            })
            .collect()
    }
}

const ACCEPTANCE_COLUMNS: &str =
    "id, folder_id, name, description, approver_id, state, expiry_date, justification, accepted_at, rejected_at, revoked_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RiskAcceptanceRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    approver_id: Option<String>,
    state: String,
    expiry_date: Option<String>,
    justification: Option<String>,
    accepted_at: Option<String>,
    rejected_at: Option<String>,
    revoked_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_acceptance(
    row: RiskAcceptanceRow,
    risk_scenario_ids: Vec<Uuid>,
) -> Result<RiskAcceptance, AegisError> {
    Ok(RiskAcceptance {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        approver_id: parse_id_opt(row.approver_id.as_deref())?,
        state: parse_variant(&row.state, AcceptanceState::parse)?,
        expiry_date: parse_date_opt(row.expiry_date.as_deref())?,
        justification: row.justification,
        accepted_at: parse_ts_opt(row.accepted_at.as_deref())?,
        rejected_at: parse_ts_opt(row.rejected_at.as_deref())?,
        revoked_at: parse_ts_opt(row.revoked_at.as_deref())?,
        risk_scenario_ids,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct RiskAcceptanceFilter {
    pub folder_id: Option<Uuid>,
    pub state: Option<AcceptanceState>,
    pub approver_id: Option<Uuid>,
    pub risk_scenario_id: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct RiskAcceptanceStore {
    db_pool: SqlitePool,
}

impl RiskAcceptanceStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, acceptance: &RiskAcceptance) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO risk_acceptances (id, folder_id, name, description, approver_id, state, expiry_date, justification, accepted_at, rejected_at, revoked_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(acceptance.id.to_string())
        .bind(acceptance.folder_id.to_string())
        .bind(&acceptance.name)
        .bind(&acceptance.description)
        .bind(acceptance.approver_id.map(|id| id.to_string()))
        .bind(acceptance.state.as_str())
        .bind(acceptance.expiry_date.map(|d| d.to_string()))
        .bind(&acceptance.justification)
        .bind(acceptance.accepted_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.rejected_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.revoked_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.created_at.to_rfc3339())
        .bind(acceptance.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "risk_acceptance_scenarios",
            "risk_acceptance_id",
            "risk_scenario_id",
            acceptance.id,
            &acceptance.risk_scenario_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RiskAcceptance>, AegisError> {
        let sql = format!("SELECT {} FROM risk_acceptances WHERE id = ?", ACCEPTANCE_COLUMNS);
        let row = sqlx::query_as::<_, RiskAcceptanceRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let scenario_ids = fetch_links(
                    &self.db_pool,
                    "risk_acceptance_scenarios",
                    "risk_acceptance_id",
                    "risk_scenario_id",
                    id,
                )
                .await?;
                Ok(Some(to_acceptance(row, scenario_ids)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &RiskAcceptanceFilter,
    ) -> Result<Vec<RiskAcceptance>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM risk_acceptances WHERE folder_id IN ({})",
            ACCEPTANCE_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(state) = filter.state {
            sql.push_str(" AND state = ?");
            params.push(state.as_str().to_string());
        }
        if let Some(approver_id) = filter.approver_id {
            sql.push_str(" AND approver_id = ?");
            params.push(approver_id.to_string());
        }
        if let Some(risk_scenario_id) = filter.risk_scenario_id {
            sql.push_str(
                " AND id IN (SELECT risk_acceptance_id FROM risk_acceptance_scenarios WHERE risk_scenario_id = ?)",
            );
            params.push(risk_scenario_id.to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(
                " AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\' OR justification LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "state", "expiry_date", "created_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, RiskAcceptanceRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        self.hydrate_all(rows).await
    }

    /// Submitted acceptances waiting on the given approver.
    pub async fn list_for_approver(
        &self,
        approver_id: Uuid,
        state: AcceptanceState,
    ) -> Result<Vec<RiskAcceptance>, AegisError> {
        let sql = format!(
            "SELECT {} FROM risk_acceptances WHERE approver_id = ? AND state = ? ORDER BY created_at",
            ACCEPTANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RiskAcceptanceRow>(&sql)
            .bind(approver_id.to_string())
            .bind(state.as_str())
            .fetch_all(&self.db_pool)
            .await?;
        self.hydrate_all(rows).await
    }

    pub async fn waiting_count(&self, approver_id: Uuid) -> Result<i64, AegisError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM risk_acceptances WHERE approver_id = ? AND state = ?",
        )
        .bind(approver_id.to_string())
        .bind(AcceptanceState::Submitted.as_str())
        .fetch_one(&self.db_pool)
        .await?;
        Ok(count)
    }

    /// Scenario ids covered by an acceptance that has not been rejected
    /// or revoked.
    pub async fn covered_scenario_ids(
        &self,
        scenario_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AegisError> {
        if scenario_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT s.risk_scenario_id
             FROM risk_acceptance_scenarios s
             JOIN risk_acceptances a ON a.id = s.risk_acceptance_id
             WHERE a.state NOT IN (?, ?) AND s.risk_scenario_id IN ({})",
            placeholders(scenario_ids.len())
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql)
            .bind(AcceptanceState::Rejected.as_str())
            .bind(AcceptanceState::Revoked.as_str());
        for id in scenario_ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.iter().map(|(raw,)| parse_id(raw)).collect()
    }

    pub async fn update(&self, acceptance: &RiskAcceptance) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "UPDATE risk_acceptances
             SET name = ?, description = ?, approver_id = ?, state = ?, expiry_date = ?, justification = ?, accepted_at = ?, rejected_at = ?, revoked_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&acceptance.name)
        .bind(&acceptance.description)
        .bind(acceptance.approver_id.map(|id| id.to_string()))
        .bind(acceptance.state.as_str())
        .bind(acceptance.expiry_date.map(|d| d.to_string()))
        .bind(&acceptance.justification)
        .bind(acceptance.accepted_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.rejected_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.revoked_at.map(|t| t.to_rfc3339()))
        .bind(acceptance.updated_at.to_rfc3339())
        .bind(acceptance.id.to_string())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "risk_acceptance_scenarios",
            "risk_acceptance_id",
            "risk_scenario_id",
            acceptance.id,
            &acceptance.risk_scenario_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM risk_acceptances WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_all(
        &self,
        rows: Vec<RiskAcceptanceRow>,
    ) -> Result<Vec<RiskAcceptance>, AegisError> {
        let ids = rows
            .iter()
            .map(|row| parse_id(&row.id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut scenarios = fetch_link_map(
            &self.db_pool,
            "risk_acceptance_scenarios",
            "risk_acceptance_id",
            "risk_scenario_id",
            &ids,
        )
        .await?;
        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| to_acceptance(row, scenarios.remove(&id).unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::domain::folder::{Folder, FolderContentType};
    use crate::domain::matrix::RiskMatrix;
    use crate::domain::project::{LcStatus, Project};
    use crate::store::{FolderStore, MatrixStore, ProjectStore};
    use chrono::Utc;

    struct Fixture {
        pool: SqlitePool,
        folder_id: Uuid,
        assessment_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let now = Utc::now();

        let folder = Folder {
            id: Uuid::new_v4(),
            name: "Global".to_string(),
            description: None,
            content_type: FolderContentType::Global,
            parent_id: None,
            builtin: true,
            created_at: now,
            updated_at: now,
        };
        FolderStore::new(pool.clone()).create(&folder).await.unwrap();

        let project = Project {
            id: Uuid::new_v4(),
            folder_id: folder.id,
            name: "ERP".to_string(),
            description: None,
            internal_reference: None,
            lc_status: LcStatus::InProd,
            created_at: now,
            updated_at: now,
        };
        ProjectStore::new(pool.clone()).create(&project).await.unwrap();

        let matrix = RiskMatrix {
            id: Uuid::new_v4(),
            folder_id: folder.id,
            name: "4x4".to_string(),
            description: None,
            provider: None,
            is_published: true,
            json_definition: "{}".to_string(),
            created_at: now,
            updated_at: now,
        };
        MatrixStore::new(pool.clone()).create(&matrix).await.unwrap();

        let assessment = RiskAssessment {
            id: Uuid::new_v4(),
            folder_id: folder.id,
            project_id: project.id,
            risk_matrix_id: matrix.id,
            name: "Initial".to_string(),
            description: None,
            version: Some("1.0".to_string()),
            status: AssessmentStatus::Planned,
            eta: None,
            due_date: None,
            created_at: now,
            updated_at: now,
        };
        RiskAssessmentStore::new(pool.clone())
            .create(&assessment)
            .await
            .unwrap();

        Fixture {
            pool,
            folder_id: folder.id,
            assessment_id: assessment.id,
        }
    }

    fn scenario(fx: &Fixture, ref_id: &str) -> RiskScenario {
        let now = Utc::now();
        RiskScenario {
            id: Uuid::new_v4(),
            folder_id: fx.folder_id,
            risk_assessment_id: fx.assessment_id,
            ref_id: ref_id.to_string(),
            name: format!("Scenario {}", ref_id),
            description: None,
            existing_controls: None,
            treatment: Treatment::Open,
            qualifications: vec!["confidentiality".to_string()],
            current_proba: 2,
            current_impact: 3,
            residual_proba: -1,
            residual_impact: -1,
            strength_of_knowledge: -1,
            justification: None,
            threat_ids: Vec::new(),
            asset_ids: Vec::new(),
            applied_control_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_scenario_roundtrip_with_qualifications() {
        let fx = fixture().await;
        let store = RiskScenarioStore::new(fx.pool.clone());

        let s = scenario(&fx, "R.1");
        store.create(&s).await.unwrap();

        let loaded = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(loaded.ref_id, "R.1");
        assert_eq!(loaded.qualifications, vec!["confidentiality".to_string()]);
        assert_eq!(loaded.current_proba, 2);
        assert_eq!(loaded.residual_proba, -1);

        assert_eq!(store.count_for_assessment(fx.assessment_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acceptance_covers_scenarios() {
        let fx = fixture().await;
        let scenarios = RiskScenarioStore::new(fx.pool.clone());
        let acceptances = RiskAcceptanceStore::new(fx.pool.clone());

        let s = scenario(&fx, "R.1");
        scenarios.create(&s).await.unwrap();
        let other = scenario(&fx, "R.2");
        scenarios.create(&other).await.unwrap();

        let now = Utc::now();
        let acceptance = RiskAcceptance {
            id: Uuid::new_v4(),
            folder_id: fx.folder_id,
            name: "Accept R.1".to_string(),
            description: None,
            approver_id: None,
            state: AcceptanceState::Created,
            expiry_date: None,
            justification: None,
            accepted_at: None,
            rejected_at: None,
            revoked_at: None,
            risk_scenario_ids: vec![s.id],
            created_at: now,
            updated_at: now,
        };
        acceptances.create(&acceptance).await.unwrap();

        let covered = acceptances
            .covered_scenario_ids(&[s.id, other.id])
            .await
            .unwrap();
        assert!(covered.contains(&s.id));
        assert!(!covered.contains(&other.id));

        // A revoked acceptance no longer covers its scenarios.
        let mut revoked = acceptance.clone();
        revoked.state = AcceptanceState::Revoked;
        revoked.revoked_at = Some(Utc::now());
        acceptances.update(&revoked).await.unwrap();
        let covered = acceptances.covered_scenario_ids(&[s.id]).await.unwrap();
        assert!(covered.is_empty());
    }
}
