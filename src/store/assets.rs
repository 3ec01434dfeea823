// Asset persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::asset::{Asset, AssetType};
use crate::store::{like_pattern, order_clause, parse_id, parse_ts, parse_variant, placeholders};

const COLUMNS: &str =
    "id, folder_id, name, description, business_value, asset_type, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: String,
    folder_id: String,
    name: String,
    description: Option<String>,
    business_value: Option<String>,
    asset_type: String,
    created_at: String,
    updated_at: String,
}

fn to_asset(row: AssetRow) -> Result<Asset, AegisError> {
    Ok(Asset {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        description: row.description,
        business_value: row.business_value,
        asset_type: parse_variant(&row.asset_type, AssetType::parse)?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct AssetFilter {
    pub folder_id: Option<Uuid>,
    pub asset_type: Option<AssetType>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct AssetStore {
    db_pool: SqlitePool,
}

impl AssetStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, asset: &Asset) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO assets (id, folder_id, name, description, business_value, asset_type, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(asset.id.to_string())
        .bind(asset.folder_id.to_string())
        .bind(&asset.name)
        .bind(&asset.description)
        .bind(&asset.business_value)
        .bind(asset.asset_type.as_str())
        .bind(asset.created_at.to_rfc3339())
        .bind(asset.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Asset>, AegisError> {
        let sql = format!("SELECT {} FROM assets WHERE id = ?", COLUMNS);
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_asset).transpose()
    }

    pub async fn list(&self, scope: &[Uuid], filter: &AssetFilter) -> Result<Vec<Asset>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM assets WHERE folder_id IN ({})",
            COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(asset_type) = filter.asset_type {
            sql.push_str(" AND asset_type = ?");
            params.push(asset_type.as_str().to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "asset_type", "created_at"],
            "name ASC",
        ));

        let mut query = sqlx::query_as::<_, AssetRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_asset).collect()
    }

    pub async fn update(&self, asset: &Asset) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE assets
             SET folder_id = ?, name = ?, description = ?, business_value = ?, asset_type = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(asset.folder_id.to_string())
        .bind(&asset.name)
        .bind(&asset.description)
        .bind(&asset.business_value)
        .bind(asset.asset_type.as_str())
        .bind(asset.updated_at.to_rfc3339())
        .bind(asset.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
