// Reference control and applied control persistence.

use std::collections::HashMap;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::control::{
    AppliedControl, ControlCategory, ControlEffort, ControlStatus, CsfFunction, ReferenceControl,
};
use crate::store::{
    fetch_link_map, fetch_links, like_pattern, order_clause, parse_date_opt, parse_id,
    parse_id_opt, parse_ts, parse_variant_opt, placeholders, replace_links,
};

const REFERENCE_COLUMNS: &str =
    "id, folder_id, ref_id, name, description, category, csf_function, provider, is_published, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ReferenceControlRow {
    id: String,
    folder_id: String,
    ref_id: Option<String>,
    name: String,
    description: Option<String>,
    category: Option<String>,
    csf_function: Option<String>,
    provider: Option<String>,
    is_published: bool,
    created_at: String,
    updated_at: String,
}

fn to_reference_control(row: ReferenceControlRow) -> Result<ReferenceControl, AegisError> {
    Ok(ReferenceControl {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        ref_id: row.ref_id,
        name: row.name,
        description: row.description,
        category: parse_variant_opt(row.category.as_deref(), ControlCategory::parse)?,
        csf_function: parse_variant_opt(row.csf_function.as_deref(), CsfFunction::parse)?,
        provider: row.provider,
        is_published: row.is_published,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct ReferenceControlFilter {
    pub folder_id: Option<Uuid>,
    pub category: Option<ControlCategory>,
    pub csf_function: Option<CsfFunction>,
    pub is_published: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct ReferenceControlStore {
    db_pool: SqlitePool,
}

impl ReferenceControlStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, control: &ReferenceControl) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO reference_controls (id, folder_id, ref_id, name, description, category, csf_function, provider, is_published, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(control.id.to_string())
        .bind(control.folder_id.to_string())
        .bind(&control.ref_id)
        .bind(&control.name)
        .bind(&control.description)
        .bind(control.category.map(ControlCategory::as_str))
        .bind(control.csf_function.map(CsfFunction::as_str))
        .bind(&control.provider)
        .bind(control.is_published)
        .bind(control.created_at.to_rfc3339())
        .bind(control.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ReferenceControl>, AegisError> {
        let sql = format!("SELECT {} FROM reference_controls WHERE id = ?", REFERENCE_COLUMNS);
        let row = sqlx::query_as::<_, ReferenceControlRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_reference_control).transpose()
    }

    pub async fn find_by_ref(
        &self,
        folder_id: Uuid,
        ref_id: &str,
    ) -> Result<Option<ReferenceControl>, AegisError> {
        let sql = format!(
            "SELECT {} FROM reference_controls WHERE folder_id = ? AND ref_id = ?",
            REFERENCE_COLUMNS
        );
        let row = sqlx::query_as::<_, ReferenceControlRow>(&sql)
            .bind(folder_id.to_string())
            .bind(ref_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_reference_control).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &ReferenceControlFilter,
    ) -> Result<Vec<ReferenceControl>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM reference_controls WHERE folder_id IN ({})",
            REFERENCE_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            params.push(category.as_str().to_string());
        }
        if let Some(csf_function) = filter.csf_function {
            sql.push_str(" AND csf_function = ?");
            params.push(csf_function.as_str().to_string());
        }
        if let Some(is_published) = filter.is_published {
            sql.push_str(if is_published {
                " AND is_published = 1"
            } else {
                " AND is_published = 0"
            });
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "ref_id", "category", "created_at"],
            "name ASC",
        ));

        let mut query = sqlx::query_as::<_, ReferenceControlRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_reference_control).collect()
    }

    pub async fn update(&self, control: &ReferenceControl) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE reference_controls
             SET folder_id = ?, ref_id = ?, name = ?, description = ?, category = ?, csf_function = ?, provider = ?, is_published = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(control.folder_id.to_string())
        .bind(&control.ref_id)
        .bind(&control.name)
        .bind(&control.description)
        .bind(control.category.map(ControlCategory::as_str))
        .bind(control.csf_function.map(CsfFunction::as_str))
        .bind(&control.provider)
        .bind(control.is_published)
        .bind(control.updated_at.to_rfc3339())
        .bind(control.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM reference_controls WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

const APPLIED_COLUMNS: &str =
    "id, folder_id, name, description, category, csf_function, status, eta, expiry_date, effort, cost, link, reference_control_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AppliedControlRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    csf_function: Option<String>,
    status: Option<String>,
    eta: Option<String>,
    expiry_date: Option<String>,
    effort: Option<String>,
    cost: Option<f64>,
    link: Option<String>,
    reference_control_id: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_applied_control(
    row: AppliedControlRow,
    evidence_ids: Vec<Uuid>,
) -> Result<AppliedControl, AegisError> {
    Ok(AppliedControl {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        category: parse_variant_opt(row.category.as_deref(), ControlCategory::parse)?,
        csf_function: parse_variant_opt(row.csf_function.as_deref(), CsfFunction::parse)?,
        status: parse_variant_opt(row.status.as_deref(), ControlStatus::parse)?,
        eta: parse_date_opt(row.eta.as_deref())?,
        expiry_date: parse_date_opt(row.expiry_date.as_deref())?,
        effort: parse_variant_opt(row.effort.as_deref(), ControlEffort::parse)?,
        cost: row.cost,
        link: row.link,
        reference_control_id: parse_id_opt(row.reference_control_id.as_deref())?,
        evidence_ids,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct AppliedControlFilter {
    pub folder_id: Option<Uuid>,
    pub status: Option<ControlStatus>,
    pub category: Option<ControlCategory>,
    pub csf_function: Option<CsfFunction>,
    pub reference_control_id: Option<Uuid>,
    pub evidence_id: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct AppliedControlStore {
    db_pool: SqlitePool,
}

impl AppliedControlStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, control: &AppliedControl) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO applied_controls (id, folder_id, name, description, category, csf_function, status, eta, expiry_date, effort, cost, link, reference_control_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(control.id.to_string())
        .bind(control.folder_id.to_string())
        .bind(&control.name)
        .bind(&control.description)
        .bind(control.category.map(ControlCategory::as_str))
        .bind(control.csf_function.map(CsfFunction::as_str))
        .bind(control.status.map(ControlStatus::as_str))
        .bind(control.eta.map(|d| d.to_string()))
        .bind(control.expiry_date.map(|d| d.to_string()))
        .bind(control.effort.map(ControlEffort::as_str))
        .bind(control.cost)
        .bind(&control.link)
        .bind(control.reference_control_id.map(|id| id.to_string()))
        .bind(control.created_at.to_rfc3339())
        .bind(control.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "applied_control_evidences",
            "applied_control_id",
            "evidence_id",
            control.id,
            &control.evidence_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AppliedControl>, AegisError> {
        let sql = format!("SELECT {} FROM applied_controls WHERE id = ?", APPLIED_COLUMNS);
        let row = sqlx::query_as::<_, AppliedControlRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let evidence_ids = fetch_links(
                    &self.db_pool,
                    "applied_control_evidences",
                    "applied_control_id",
                    "evidence_id",
                    id,
                )
                .await?;
                Ok(Some(to_applied_control(row, evidence_ids)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &AppliedControlFilter,
    ) -> Result<Vec<AppliedControl>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM applied_controls WHERE folder_id IN ({})",
            APPLIED_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            params.push(category.as_str().to_string());
        }
        if let Some(csf_function) = filter.csf_function {
            sql.push_str(" AND csf_function = ?");
            params.push(csf_function.as_str().to_string());
        }
        if let Some(reference_control_id) = filter.reference_control_id {
            sql.push_str(" AND reference_control_id = ?");
            params.push(reference_control_id.to_string());
        }
        if let Some(evidence_id) = filter.evidence_id {
            sql.push_str(
                " AND id IN (SELECT applied_control_id FROM applied_control_evidences WHERE evidence_id = ?)",
            );
            params.push(evidence_id.to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "status", "eta", "created_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, AppliedControlRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;

        let ids = rows
            .iter()
            .map(|row| parse_id(&row.id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut evidence_map = fetch_link_map(
            &self.db_pool,
            "applied_control_evidences",
            "applied_control_id",
            "evidence_id",
            &ids,
        )
        .await?;
        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| to_applied_control(row, evidence_map.remove(&id).unwrap_or_default()))
            .collect()
    }

    pub async fn update(&self, control: &AppliedControl) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "UPDATE applied_controls
             SET folder_id = ?, name = ?, description = ?, category = ?, csf_function = ?, status = ?, eta = ?, expiry_date = ?, effort = ?, cost = ?, link = ?, reference_control_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(control.folder_id.to_string())
        .bind(&control.name)
        .bind(&control.description)
        .bind(control.category.map(ControlCategory::as_str))
        .bind(control.csf_function.map(CsfFunction::as_str))
        .bind(control.status.map(ControlStatus::as_str))
        .bind(control.eta.map(|d| d.to_string()))
        .bind(control.expiry_date.map(|d| d.to_string()))
        .bind(control.effort.map(ControlEffort::as_str))
        .bind(control.cost)
        .bind(&control.link)
        .bind(control.reference_control_id.map(|id| id.to_string()))
        .bind(control.updated_at.to_rfc3339())
        .bind(control.id.to_string())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "applied_control_evidences",
            "applied_control_id",
            "evidence_id",
            control.id,
            &control.evidence_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM applied_controls WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of risk scenarios plus requirement assessments linked to
    /// each control, used by the priority ranking.
    pub async fn link_counts(
        &self,
        control_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, usize>, AegisError> {
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        if control_ids.is_empty() {
            return Ok(counts);
        }
        for (table, column) in [
            ("risk_scenario_applied_controls", "applied_control_id"),
            ("requirement_assessment_applied_controls", "applied_control_id"),
        ] {
            let sql = format!(
                "SELECT {}, COUNT(*) FROM {} WHERE {} IN ({}) GROUP BY {}",
                column,
                table,
                column,
                placeholders(control_ids.len()),
                column
            );
            let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
            for id in control_ids {
                query = query.bind(id.to_string());
            }
            for (raw_id, count) in query.fetch_all(&self.db_pool).await? {
                *counts.entry(parse_id(&raw_id)?).or_default() += count as usize;
            }
        }
        Ok(counts)
    }
}
