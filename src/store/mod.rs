// Persistence layer: one store per aggregate, all sharing the pool.
//
// Rows come back as plain TEXT/INTEGER columns and are parsed into
// domain types at the boundary. A value that fails to parse means the
// database was written by something else and is surfaced as an
// internal error, never a panic.

pub mod assets;
pub mod compliance;
pub mod controls;
pub mod evidence;
pub mod folders;
pub mod iam;
pub mod matrices;
pub mod projects;
pub mod risk;
pub mod threats;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::core::errors::AegisError;

pub use assets::{AssetFilter, AssetStore};
pub use compliance::{
    ComplianceAssessmentFilter, ComplianceAssessmentStore, FrameworkFilter, FrameworkStore,
    MappingStore, RequirementAssessmentFilter, RequirementAssessmentStore, RequirementNodeStore,
};
pub use controls::{
    AppliedControlFilter, AppliedControlStore, ReferenceControlFilter, ReferenceControlStore,
};
pub use evidence::{EvidenceFilter, EvidenceStore};
pub use folders::{FolderFilter, FolderStore};
pub use iam::{
    RoleAssignmentFilter, RoleAssignmentStore, RoleStore, SecurityEventStore, SessionStore,
    UserFilter, UserGroupFilter, UserGroupStore, UserStore,
};
pub use matrices::{MatrixFilter, MatrixStore};
pub use projects::{ProjectFilter, ProjectStore};
pub use risk::{
    RiskAcceptanceFilter, RiskAcceptanceStore, RiskAssessmentFilter, RiskAssessmentStore,
    RiskScenarioFilter, RiskScenarioStore,
};
pub use threats::{ThreatFilter, ThreatStore};

/// Every store over one pool. Cheap to clone and share.
#[derive(Clone)]
pub struct Stores {
    pub folders: FolderStore,
    pub users: UserStore,
    pub user_groups: UserGroupStore,
    pub roles: RoleStore,
    pub role_assignments: RoleAssignmentStore,
    pub sessions: SessionStore,
    pub security_events: SecurityEventStore,
    pub projects: ProjectStore,
    pub threats: ThreatStore,
    pub assets: AssetStore,
    pub matrices: MatrixStore,
    pub reference_controls: ReferenceControlStore,
    pub applied_controls: AppliedControlStore,
    pub evidences: EvidenceStore,
    pub risk_assessments: RiskAssessmentStore,
    pub risk_scenarios: RiskScenarioStore,
    pub risk_acceptances: RiskAcceptanceStore,
    pub frameworks: FrameworkStore,
    pub requirement_nodes: RequirementNodeStore,
    pub mappings: MappingStore,
    pub compliance_assessments: ComplianceAssessmentStore,
    pub requirement_assessments: RequirementAssessmentStore,
}

impl Stores {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self {
            folders: FolderStore::new(db_pool.clone()),
            users: UserStore::new(db_pool.clone()),
            user_groups: UserGroupStore::new(db_pool.clone()),
            roles: RoleStore::new(db_pool.clone()),
            role_assignments: RoleAssignmentStore::new(db_pool.clone()),
            sessions: SessionStore::new(db_pool.clone()),
            security_events: SecurityEventStore::new(db_pool.clone()),
            projects: ProjectStore::new(db_pool.clone()),
            threats: ThreatStore::new(db_pool.clone()),
            assets: AssetStore::new(db_pool.clone()),
            matrices: MatrixStore::new(db_pool.clone()),
            reference_controls: ReferenceControlStore::new(db_pool.clone()),
            applied_controls: AppliedControlStore::new(db_pool.clone()),
            evidences: EvidenceStore::new(db_pool.clone()),
            risk_assessments: RiskAssessmentStore::new(db_pool.clone()),
            risk_scenarios: RiskScenarioStore::new(db_pool.clone()),
            risk_acceptances: RiskAcceptanceStore::new(db_pool.clone()),
            frameworks: FrameworkStore::new(db_pool.clone()),
            requirement_nodes: RequirementNodeStore::new(db_pool.clone()),
            mappings: MappingStore::new(db_pool.clone()),
            compliance_assessments: ComplianceAssessmentStore::new(db_pool.clone()),
            requirement_assessments: RequirementAssessmentStore::new(db_pool),
        }
    }
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, AegisError> {
    Uuid::parse_str(raw)
        .map_err(|e| AegisError::Internal(format!("Corrupt id in database: {}", e)))
}

pub(crate) fn parse_id_opt(raw: Option<&str>) -> Result<Option<Uuid>, AegisError> {
    raw.map(parse_id).transpose()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, AegisError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AegisError::Internal(format!("Corrupt timestamp in database: {}", e)))
}

pub(crate) fn parse_ts_opt(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AegisError> {
    raw.map(parse_ts).transpose()
}

pub(crate) fn parse_date_opt(raw: Option<&str>) -> Result<Option<NaiveDate>, AegisError> {
    raw.map(|s| {
        s.parse::<NaiveDate>()
            .map_err(|e| AegisError::Internal(format!("Corrupt date in database: {}", e)))
    })
    .transpose()
}

/// Decodes an enum column via the type's `parse` helper.
pub(crate) fn parse_variant<T>(
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, AegisError> {
    parse(raw)
        .ok_or_else(|| AegisError::Internal(format!("Corrupt enum value in database: {}", raw)))
}

pub(crate) fn parse_variant_opt<T>(
    raw: Option<&str>,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, AegisError> {
    raw.map(|s| parse_variant(s, parse)).transpose()
}

/// JSON-encoded list column (qualifications, selected groups).
pub(crate) fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Escapes LIKE wildcards; pair with `ESCAPE '\'`.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// ORDER BY clause from a `?ordering=` value, restricted to known
/// columns. A leading `-` flips the direction.
pub(crate) fn order_clause(ordering: Option<&str>, allowed: &[&str], default: &str) -> String {
    if let Some(raw) = ordering {
        let (column, direction) = match raw.strip_prefix('-') {
            Some(rest) => (rest, "DESC"),
            None => (raw, "ASC"),
        };
        if allowed.contains(&column) {
            return format!(" ORDER BY {} {}", column, direction);
        }
    }
    format!(" ORDER BY {}", default)
}

/// Link rows of `key` in a join table.
pub(crate) async fn fetch_links(
    pool: &SqlitePool,
    table: &str,
    key_col: &str,
    value_col: &str,
    key: Uuid,
) -> Result<Vec<Uuid>, AegisError> {
    let sql = format!("SELECT {} FROM {} WHERE {} = ?", value_col, table, key_col);
    let rows: Vec<(String,)> = sqlx::query_as(&sql)
        .bind(key.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(|(raw,)| parse_id(raw)).collect()
}

/// Link rows for a batch of keys, grouped by key.
pub(crate) async fn fetch_link_map(
    pool: &SqlitePool,
    table: &str,
    key_col: &str,
    value_col: &str,
    keys: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Uuid>>, AegisError> {
    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    if keys.is_empty() {
        return Ok(map);
    }
    let sql = format!(
        "SELECT {}, {} FROM {} WHERE {} IN ({})",
        key_col,
        value_col,
        table,
        key_col,
        placeholders(keys.len())
    );
    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for key in keys {
        query = query.bind(key.to_string());
    }
    let rows = query.fetch_all(pool).await?;
    for (key_raw, value_raw) in rows {
        map.entry(parse_id(&key_raw)?)
            .or_default()
            .push(parse_id(&value_raw)?);
    }
    Ok(map)
}

/// Replaces all links of `key` in a join table. Runs on the caller's
/// connection so it can join a transaction.
pub(crate) async fn replace_links(
    conn: &mut SqliteConnection,
    table: &str,
    key_col: &str,
    value_col: &str,
    key: Uuid,
    values: &[Uuid],
) -> Result<(), AegisError> {
    let delete_sql = format!("DELETE FROM {} WHERE {} = ?", table, key_col);
    sqlx::query(&delete_sql)
        .bind(key.to_string())
        .execute(&mut *conn)
        .await?;
    let insert_sql = format!(
        "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
        table, key_col, value_col
    );
    for value in values {
        sqlx::query(&insert_sql)
            .bind(key.to_string())
            .bind(value.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Row count of a folder-scoped table within the given folders.
pub(crate) async fn count_scoped(
    pool: &SqlitePool,
    table: &str,
    scope: &[Uuid],
) -> Result<i64, AegisError> {
    if scope.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE folder_id IN ({})",
        table,
        placeholders(scope.len())
    );
    let mut query = sqlx::query_as::<_, (i64,)>(&sql);
    for id in scope {
        query = query.bind(id.to_string());
    }
    let (count,) = query.fetch_one(pool).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause_whitelist() {
        let allowed = &["name", "created_at"];
        assert_eq!(
            order_clause(Some("name"), allowed, "created_at DESC"),
            " ORDER BY name ASC"
        );
        assert_eq!(
            order_clause(Some("-name"), allowed, "created_at DESC"),
            " ORDER BY name DESC"
        );
        // Unknown columns fall back to the default.
        assert_eq!(
            order_clause(Some("id; DROP TABLE folders"), allowed, "created_at DESC"),
            " ORDER BY created_at DESC"
        );
        assert_eq!(
            order_clause(None, allowed, "created_at DESC"),
            " ORDER BY created_at DESC"
        );
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("plain"), "%plain%");
        assert_eq!(like_pattern("50%_done"), "%50\\%\\_done%");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
