// Threat persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::threat::Threat;
use crate::store::{like_pattern, order_clause, parse_id, parse_ts, placeholders};

const COLUMNS: &str =
    "id, folder_id, ref_id, name, description, provider, is_published, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ThreatRow {
    id: String,
    folder_id: String,
    ref_id: Option<String>,
    name: String,
    description: Option<String>,
    provider: Option<String>,
    is_published: bool,
    created_at: String,
    updated_at: String,
}

fn to_threat(row: ThreatRow) -> Result<Threat, AegisError> {
    Ok(Threat {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        ref_id: row.ref_id,
        name: row.name,
        description: row.description,
        provider: row.provider,
        is_published: row.is_published,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct ThreatFilter {
    pub folder_id: Option<Uuid>,
    pub is_published: Option<bool>,
    pub provider: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct ThreatStore {
    db_pool: SqlitePool,
}

impl ThreatStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, threat: &Threat) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO threats (id, folder_id, ref_id, name, description, provider, is_published, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(threat.id.to_string())
        .bind(threat.folder_id.to_string())
        .bind(&threat.ref_id)
        .bind(&threat.name)
        .bind(&threat.description)
        .bind(&threat.provider)
        .bind(threat.is_published)
        .bind(threat.created_at.to_rfc3339())
        .bind(threat.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Threat>, AegisError> {
        let sql = format!("SELECT {} FROM threats WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, ThreatRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_threat).transpose()
    }

    pub async fn find_by_ref(
        &self,
        folder_id: Uuid,
        ref_id: &str,
    ) -> Result<Option<Threat>, AegisError> {
        let sql = format!(
            "SELECT {} FROM threats WHERE folder_id = ? AND ref_id = ?",
            COLUMNS
        );
        let row = sqlx::query_as::<_, ThreatRow>(&sql)
            .bind(folder_id.to_string())
            .bind(ref_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_threat).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &ThreatFilter,
    ) -> Result<Vec<Threat>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM threats WHERE folder_id IN ({})",
            COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(is_published) = filter.is_published {
            sql.push_str(if is_published {
                " AND is_published = 1"
            } else {
                " AND is_published = 0"
            });
        }
        if let Some(provider) = filter.provider.as_deref() {
            sql.push_str(" AND provider = ?");
            params.push(provider.to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "ref_id", "created_at"],
            "name ASC",
        ));

        let mut query = sqlx::query_as::<_, ThreatRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_threat).collect()
    }

    pub async fn update(&self, threat: &Threat) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE threats
             SET folder_id = ?, ref_id = ?, name = ?, description = ?, provider = ?, is_published = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(threat.folder_id.to_string())
        .bind(&threat.ref_id)
        .bind(&threat.name)
        .bind(&threat.description)
        .bind(&threat.provider)
        .bind(threat.is_published)
        .bind(threat.updated_at.to_rfc3339())
        .bind(threat.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM threats WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Threat names with the number of scenarios referencing them, for
    /// the radar chart. Threats with no scenarios are skipped.
    pub async fn scenario_counts(&self, scope: &[Uuid]) -> Result<Vec<(String, i64)>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT t.name, COUNT(st.risk_scenario_id) AS scenario_count
             FROM threats t
             JOIN risk_scenario_threats st ON st.threat_id = t.id
             WHERE t.folder_id IN ({})
             GROUP BY t.id
             ORDER BY t.name",
            placeholders(scope.len())
        );
        let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
        for id in scope {
            query = query.bind(id.to_string());
        }
        Ok(query.fetch_all(&self.db_pool).await?)
    }
}
