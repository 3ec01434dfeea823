// Database pool setup and embedded schema migration.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::core::errors::AegisError;

const SCHEMA: &str = include_str!("../../migrations/0001_schema.sql");

/// Opens the SQLite pool and applies the embedded schema.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, AegisError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AegisError::Configuration(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Applies the embedded schema. All statements are idempotent, so this
/// runs on every startup.
pub async fn migrate(pool: &SqlitePool) -> Result<(), AegisError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// In-memory pool for tests. A single connection is required: each
/// `:memory:` connection would otherwise see its own database.
pub async fn connect_in_memory() -> Result<SqlitePool, AegisError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| AegisError::Configuration(format!("Invalid database URL: {}", e)))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_round_trip() {
        let pool = connect_in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO folders (id, name, content_type, builtin, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("00000000-0000-0000-0000-000000000001")
        .bind("Global")
        .bind("GLOBAL")
        .bind(true)
        .bind("2024-01-01T00:00:00Z")
        .bind("2024-01-01T00:00:00Z")
        .execute(&pool)
        .await
        .unwrap();

        let (name,): (String,) = sqlx::query_as("SELECT name FROM folders WHERE id = ?")
            .bind("00000000-0000-0000-0000-000000000001")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, "Global");
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = connect_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO projects (id, folder_id, name, lc_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("00000000-0000-0000-0000-000000000002")
        .bind("no-such-folder")
        .bind("Orphan")
        .bind("in_design")
        .bind("2024-01-01T00:00:00Z")
        .bind("2024-01-01T00:00:00Z")
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }
}
