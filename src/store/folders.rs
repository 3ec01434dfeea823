// Folder persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::folder::{Folder, FolderContentType};
use crate::store::{
    like_pattern, order_clause, parse_id, parse_id_opt, parse_ts, parse_variant, placeholders,
};

const COLUMNS: &str = "id, name, description, content_type, parent_id, builtin, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct FolderRow {
    id: String,
    name: String,
    description: Option<String>,
    content_type: String,
    parent_id: Option<String>,
    builtin: bool,
    created_at: String,
    updated_at: String,
}

fn to_folder(row: FolderRow) -> Result<Folder, AegisError> {
    Ok(Folder {
        id: parse_id(&row.id)?,
        name: row.name,
        description: row.description,
        content_type: parse_variant(&row.content_type, FolderContentType::parse)?,
        parent_id: parse_id_opt(row.parent_id.as_deref())?,
        builtin: row.builtin,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct FolderFilter {
    pub parent_id: Option<Uuid>,
    pub content_type: Option<FolderContentType>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct FolderStore {
    db_pool: SqlitePool,
}

impl FolderStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, folder: &Folder) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO folders (id, name, description, content_type, parent_id, builtin, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(folder.id.to_string())
        .bind(&folder.name)
        .bind(&folder.description)
        .bind(folder.content_type.as_str())
        .bind(folder.parent_id.map(|id| id.to_string()))
        .bind(folder.builtin)
        .bind(folder.created_at.to_rfc3339())
        .bind(folder.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Folder>, AegisError> {
        let sql = format!("SELECT {} FROM folders WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, FolderRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_folder).transpose()
    }

    /// The single GLOBAL folder, once seeded.
    pub async fn root(&self) -> Result<Option<Folder>, AegisError> {
        let sql = format!("SELECT {} FROM folders WHERE content_type = ?", COLUMNS);
        let row = sqlx::query_as::<_, FolderRow>(&sql)
            .bind(FolderContentType::Global.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_folder).transpose()
    }

    /// Every folder, for hierarchy computation.
    pub async fn list_all(&self) -> Result<Vec<Folder>, AegisError> {
        let sql = format!("SELECT {} FROM folders ORDER BY created_at", COLUMNS);
        let rows = sqlx::query_as::<_, FolderRow>(&sql)
            .fetch_all(&self.db_pool)
            .await?;
        rows.into_iter().map(to_folder).collect()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &FolderFilter,
    ) -> Result<Vec<Folder>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM folders WHERE id IN ({})",
            COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(parent_id) = filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            params.push(parent_id.to_string());
        }
        if let Some(content_type) = filter.content_type {
            sql.push_str(" AND content_type = ?");
            params.push(content_type.as_str().to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "created_at", "updated_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, FolderRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_folder).collect()
    }

    pub async fn update(&self, folder: &Folder) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE folders SET name = ?, description = ?, parent_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&folder.name)
        .bind(&folder.description)
        .bind(folder.parent_id.map(|id| id.to_string()))
        .bind(folder.updated_at.to_rfc3339())
        .bind(folder.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Deletes the folder and, through the schema cascade, everything
    /// it contains.
    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use chrono::Utc;

    fn folder(name: &str, parent: Option<Uuid>) -> Folder {
        let now = Utc::now();
        Folder {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            content_type: if parent.is_some() {
                FolderContentType::Domain
            } else {
                FolderContentType::Global
            },
            parent_id: parent,
            builtin: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let pool = connect_in_memory().await.unwrap();
        let store = FolderStore::new(pool);

        let root = folder("Global", None);
        store.create(&root).await.unwrap();

        let loaded = store.get(root.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Global");
        assert_eq!(loaded.content_type, FolderContentType::Global);
        assert!(loaded.is_root());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_scoped() {
        let pool = connect_in_memory().await.unwrap();
        let store = FolderStore::new(pool);

        let root = folder("Global", None);
        store.create(&root).await.unwrap();
        let visible = folder("Visible", Some(root.id));
        store.create(&visible).await.unwrap();
        let hidden = folder("Hidden", Some(root.id));
        store.create(&hidden).await.unwrap();

        let scope = vec![root.id, visible.id];
        let listed = store.list(&scope, &FolderFilter::default()).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Global"));
        assert!(names.contains(&"Visible"));
        assert!(!names.contains(&"Hidden"));

        let empty = store.list(&[], &FolderFilter::default()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let pool = connect_in_memory().await.unwrap();
        let store = FolderStore::new(pool);

        let root = folder("Global", None);
        store.create(&root).await.unwrap();
        let child = folder("Child", Some(root.id));
        store.create(&child).await.unwrap();

        assert!(store.delete(root.id).await.unwrap());
        assert!(store.get(child.id).await.unwrap().is_none());
        assert!(!store.delete(root.id).await.unwrap());
    }
}
