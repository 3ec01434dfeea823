// Risk matrix persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::matrix::RiskMatrix;
use crate::store::{like_pattern, order_clause, parse_id, parse_ts, placeholders};

const COLUMNS: &str =
    "id, folder_id, name, description, provider, is_published, json_definition, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct MatrixRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    provider: Option<String>,
    is_published: bool,
    json_definition: String,
    created_at: String,
    updated_at: String,
}

fn to_matrix(row: MatrixRow) -> Result<RiskMatrix, AegisError> {
    Ok(RiskMatrix {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        provider: row.provider,
        is_published: row.is_published,
        json_definition: row.json_definition,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct MatrixFilter {
    pub folder_id: Option<Uuid>,
    pub is_published: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct MatrixStore {
    db_pool: SqlitePool,
}

impl MatrixStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, matrix: &RiskMatrix) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO risk_matrices (id, folder_id, name, description, provider, is_published, json_definition, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(matrix.id.to_string())
        .bind(matrix.folder_id.to_string())
        .bind(&matrix.name)
        .bind(&matrix.description)
        .bind(&matrix.provider)
        .bind(matrix.is_published)
        .bind(&matrix.json_definition)
        .bind(matrix.created_at.to_rfc3339())
        .bind(matrix.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RiskMatrix>, AegisError> {
        let sql = format!("SELECT {} FROM risk_matrices WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, MatrixRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_matrix).transpose()
    }

    pub async fn find_by_name(
        &self,
        folder_id: Uuid,
        name: &str,
    ) -> Result<Option<RiskMatrix>, AegisError> {
        let sql = format!(
            "SELECT {} FROM risk_matrices WHERE folder_id = ? AND name = ?",
            COLUMNS
        );
        let row = sqlx::query_as::<_, MatrixRow>(&sql)
            .bind(folder_id.to_string())
            .bind(name)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_matrix).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &MatrixFilter,
    ) -> Result<Vec<RiskMatrix>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM risk_matrices WHERE folder_id IN ({})",
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
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "created_at"],
            "name ASC",
        ));

        let mut query = sqlx::query_as::<_, MatrixRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_matrix).collect()
    }

    pub async fn update(&self, matrix: &RiskMatrix) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE risk_matrices
             SET name = ?, description = ?, provider = ?, is_published = ?, json_definition = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&matrix.name)
        .bind(&matrix.description)
        .bind(&matrix.provider)
        .bind(matrix.is_published)
        .bind(&matrix.json_definition)
        .bind(matrix.updated_at.to_rfc3339())
        .bind(matrix.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM risk_matrices WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// A matrix referenced by any risk assessment cannot be deleted.
    pub async fn in_use(&self, id: Uuid) -> Result<bool, AegisError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM risk_assessments WHERE risk_matrix_id = ?")
                .bind(id.to_string())
                .fetch_one(&self.db_pool)
                .await?;
        Ok(count > 0)
    }
}
