// Evidence persistence. Attachment bytes live in their own table so
// list queries never drag blobs along.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::evidence::Evidence;
use crate::store::{like_pattern, order_clause, parse_id, parse_ts, placeholders};

const COLUMNS: &str =
    "id, folder_id, name, description, link, attachment_name, attachment_content_type, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    link: Option<String>,
    attachment_name: Option<String>,
    attachment_content_type: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_evidence(row: EvidenceRow) -> Result<Evidence, AegisError> {
    Ok(Evidence {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        link: row.link,
        attachment_name: row.attachment_name,
        attachment_content_type: row.attachment_content_type,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct EvidenceFilter {
    pub folder_id: Option<Uuid>,
    pub applied_control_id: Option<Uuid>,
    pub requirement_assessment_id: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct EvidenceStore {
    db_pool: SqlitePool,
}

impl EvidenceStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, evidence: &Evidence) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO evidences (id, folder_id, name, description, link, attachment_name, attachment_content_type, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(evidence.id.to_string())
        .bind(evidence.folder_id.to_string())
        .bind(&evidence.name)
        .bind(&evidence.description)
        .bind(&evidence.link)
        .bind(&evidence.attachment_name)
        .bind(&evidence.attachment_content_type)
        .bind(evidence.created_at.to_rfc3339())
        .bind(evidence.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Evidence>, AegisError> {
        let sql = format!("SELECT {} FROM evidences WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, EvidenceRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_evidence).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &EvidenceFilter,
    ) -> Result<Vec<Evidence>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM evidences WHERE folder_id IN ({})",
            COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(applied_control_id) = filter.applied_control_id {
            sql.push_str(
                " AND id IN (SELECT evidence_id FROM applied_control_evidences WHERE applied_control_id = ?)",
            );
            params.push(applied_control_id.to_string());
        }
        if let Some(requirement_assessment_id) = filter.requirement_assessment_id {
            sql.push_str(
                " AND id IN (SELECT evidence_id FROM requirement_assessment_evidences WHERE requirement_assessment_id = ?)",
            );
            params.push(requirement_assessment_id.to_string());
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
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, EvidenceRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_evidence).collect()
    }

    pub async fn update(&self, evidence: &Evidence) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE evidences
             SET folder_id = ?, name = ?, description = ?, link = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(evidence.folder_id.to_string())
        .bind(&evidence.name)
        .bind(&evidence.description)
        .bind(&evidence.link)
        .bind(evidence.updated_at.to_rfc3339())
        .bind(evidence.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM evidences WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores the attachment bytes and records name/content type on the
    /// evidence row.
    pub async fn set_attachment(
        &self,
        id: Uuid,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("INSERT OR REPLACE INTO evidence_attachments (evidence_id, data) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(data)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE evidences SET attachment_name = ?, attachment_content_type = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(file_name)
        .bind(content_type)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_attachment(&self, id: Uuid) -> Result<Option<Vec<u8>>, AegisError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM evidence_attachments WHERE evidence_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(|(data,)| data))
    }

    pub async fn delete_attachment(&self, id: Uuid) -> Result<bool, AegisError> {
        let mut tx = self.db_pool.begin().await?;
        let result = sqlx::query("DELETE FROM evidence_attachments WHERE evidence_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE evidences SET attachment_name = NULL, attachment_content_type = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
