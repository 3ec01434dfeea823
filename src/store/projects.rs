// Project persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::project::{LcStatus, Project};
use crate::store::{like_pattern, order_clause, parse_id, parse_ts, parse_variant, placeholders};

const COLUMNS: &str =
    "id, folder_id, name, description, internal_reference, lc_status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    internal_reference: Option<String>,
    lc_status: String,
    created_at: String,
    updated_at: String,
}

fn to_project(row: ProjectRow) -> Result<Project, AegisError> {
    Ok(Project {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        internal_reference: row.internal_reference,
        lc_status: parse_variant(&row.lc_status, LcStatus::parse)?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct ProjectFilter {
    pub folder_id: Option<Uuid>,
    pub lc_status: Option<LcStatus>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct ProjectStore {
    db_pool: SqlitePool,
}

impl ProjectStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, project: &Project) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO projects (id, folder_id, name, description, internal_reference, lc_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(project.folder_id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.internal_reference)
        .bind(project.lc_status.as_str())
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Project>, AegisError> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_project).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &ProjectFilter,
    ) -> Result<Vec<Project>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM projects WHERE folder_id IN ({})",
            COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(lc_status) = filter.lc_status {
            sql.push_str(" AND lc_status = ?");
            params.push(lc_status.as_str().to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "lc_status", "created_at", "updated_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, ProjectRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_project).collect()
    }

    pub async fn update(&self, project: &Project) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE projects
             SET folder_id = ?, name = ?, description = ?, internal_reference = ?, lc_status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(project.folder_id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.internal_reference)
        .bind(project.lc_status.as_str())
        .bind(project.updated_at.to_rfc3339())
        .bind(project.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
