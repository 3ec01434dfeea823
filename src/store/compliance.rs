// Framework, requirement tree, mapping and audit persistence.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::compliance::{
    ComplianceAssessment, Framework, MappingCoverage, RequirementAssessment, RequirementMapping,
    RequirementMappingSet, RequirementNode, RequirementResult, RequirementStatus,
};
use crate::domain::AssessmentStatus;
use crate::store::{
    fetch_link_map, fetch_links, like_pattern, order_clause, parse_date_opt, parse_id, parse_ts,
    parse_variant, placeholders, replace_links,
};

// ---------------------------------------------------------------------------
// Frameworks

const FRAMEWORK_COLUMNS: &str = "id, folder_id, ref_id, name, description, provider, \
     is_published, min_score, max_score, scores_definition, \
     implementation_groups_definition, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct FrameworkRow {
    id: String,
    folder_id: String,
    ref_id: Option<String>,
    name: String,
    description: Option<String>,
    provider: Option<String>,
    is_published: bool,
    min_score: i64,
    max_score: i64,
    scores_definition: Option<String>,
    implementation_groups_definition: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_framework(row: FrameworkRow) -> Result<Framework, AegisError> {
    Ok(Framework {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        ref_id: row.ref_id,
        name: row.name,
        description: row.description,
        provider: row.provider,
        is_published: row.is_published,
        min_score: row.min_score,
        max_score: row.max_score,
        scores_definition: row.scores_definition,
        implementation_groups_definition: row.implementation_groups_definition,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct FrameworkFilter {
    pub folder_id: Option<Uuid>,
    pub provider: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct FrameworkStore {
    db_pool: SqlitePool,
}

impl FrameworkStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, framework: &Framework) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO frameworks (id, folder_id, ref_id, name, description, provider,
                 is_published, min_score, max_score, scores_definition,
                 implementation_groups_definition, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(framework.id.to_string())
        .bind(framework.folder_id.to_string())
        .bind(&framework.ref_id)
        .bind(&framework.name)
        .bind(&framework.description)
        .bind(&framework.provider)
        .bind(framework.is_published)
        .bind(framework.min_score)
        .bind(framework.max_score)
        .bind(&framework.scores_definition)
        .bind(&framework.implementation_groups_definition)
        .bind(framework.created_at.to_rfc3339())
        .bind(framework.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Framework>, AegisError> {
        let sql = format!("SELECT {} FROM frameworks WHERE id = ?", FRAMEWORK_COLUMNS);
        let row = sqlx::query_as::<_, FrameworkRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_framework).transpose()
    }

    /// Library import is idempotent on urn-like ref_id.
    pub async fn find_by_ref(&self, ref_id: &str) -> Result<Option<Framework>, AegisError> {
        let sql = format!(
            "SELECT {} FROM frameworks WHERE ref_id = ?",
            FRAMEWORK_COLUMNS
        );
        let row = sqlx::query_as::<_, FrameworkRow>(&sql)
            .bind(ref_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_framework).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &FrameworkFilter,
    ) -> Result<Vec<Framework>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM frameworks WHERE folder_id IN ({})",
            FRAMEWORK_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
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
            &["name", "provider", "created_at", "updated_at"],
            "name",
        ));

        let mut query = sqlx::query_as::<_, FrameworkRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_framework).collect()
    }

    /// Frameworks referenced by at least one audit, within scope.
    pub async fn used(&self, scope: &[Uuid]) -> Result<Vec<Framework>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT f.id, f.folder_id, f.ref_id, f.name, f.description, f.provider,
                 f.is_published, f.min_score, f.max_score, f.scores_definition,
                 f.implementation_groups_definition, f.created_at, f.updated_at
             FROM frameworks f
             JOIN compliance_assessments ca ON ca.framework_id = f.id
             WHERE ca.folder_id IN ({})
             ORDER BY f.name",
            placeholders(scope.len())
        );
        let mut query = sqlx::query_as::<_, FrameworkRow>(&sql);
        for id in scope {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_framework).collect()
    }

    /// An unused framework can be deleted; one backing audits cannot.
    pub async fn in_use(&self, id: Uuid) -> Result<bool, AegisError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM compliance_assessments WHERE framework_id = ?",
        )
        .bind(id.to_string())
        .fetch_one(&self.db_pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM frameworks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Requirement nodes

const NODE_COLUMNS: &str = "id, folder_id, framework_id, urn, parent_urn, ref_id, name, \
     description, order_id, assessable, implementation_groups, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    folder_id: String,
    framework_id: String,
    urn: String,
    parent_urn: Option<String>,
    ref_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    order_id: i64,
    assessable: bool,
    implementation_groups: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_node(row: NodeRow) -> Result<RequirementNode, AegisError> {
    Ok(RequirementNode {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        framework_id: parse_id(&row.framework_id)?,
        urn: row.urn,
        parent_urn: row.parent_urn,
        ref_id: row.ref_id,
        name: row.name,
        description: row.description,
        order_id: row.order_id,
        assessable: row.assessable,
        implementation_groups: row.implementation_groups,
        reference_control_ids: Vec::new(),
        threat_ids: Vec::new(),
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Clone)]
pub struct RequirementNodeStore {
    db_pool: SqlitePool,
}

impl RequirementNodeStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, node: &RequirementNode) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO requirement_nodes (id, folder_id, framework_id, urn, parent_urn,
                 ref_id, name, description, order_id, assessable, implementation_groups,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.id.to_string())
        .bind(node.folder_id.to_string())
        .bind(node.framework_id.to_string())
        .bind(&node.urn)
        .bind(&node.parent_urn)
        .bind(&node.ref_id)
        .bind(&node.name)
        .bind(&node.description)
        .bind(node.order_id)
        .bind(node.assessable)
        .bind(&node.implementation_groups)
        .bind(node.created_at.to_rfc3339())
        .bind(node.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        self.write_links(&mut tx, node).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_links(
        &self,
        tx: &mut sqlx::SqliteConnection,
        node: &RequirementNode,
    ) -> Result<(), AegisError> {
        replace_links(
            tx,
            "requirement_node_reference_controls",
            "requirement_node_id",
            "reference_control_id",
            node.id,
            &node.reference_control_ids,
        )
        .await?;
        replace_links(
            tx,
            "requirement_node_threats",
            "requirement_node_id",
            "threat_id",
            node.id,
            &node.threat_ids,
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RequirementNode>, AegisError> {
        let sql = format!("SELECT {} FROM requirement_nodes WHERE id = ?", NODE_COLUMNS);
        let row = sqlx::query_as::<_, NodeRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let mut node = to_node(row)?;
                node.reference_control_ids = fetch_links(
                    &self.db_pool,
                    "requirement_node_reference_controls",
                    "requirement_node_id",
                    "reference_control_id",
                    node.id,
                )
                .await?;
                node.threat_ids = fetch_links(
                    &self.db_pool,
                    "requirement_node_threats",
                    "requirement_node_id",
                    "threat_id",
                    node.id,
                )
                .await?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Full tree of a framework, in display order.
    pub async fn list_for_framework(
        &self,
        framework_id: Uuid,
    ) -> Result<Vec<RequirementNode>, AegisError> {
        let sql = format!(
            "SELECT {} FROM requirement_nodes WHERE framework_id = ? ORDER BY order_id",
            NODE_COLUMNS
        );
        let rows = sqlx::query_as::<_, NodeRow>(&sql)
            .bind(framework_id.to_string())
            .fetch_all(&self.db_pool)
            .await?;
        let mut nodes: Vec<RequirementNode> =
            rows.into_iter().map(to_node).collect::<Result<_, _>>()?;
        self.hydrate_all(&mut nodes).await?;
        Ok(nodes)
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        framework_id: Option<Uuid>,
        assessable: Option<bool>,
    ) -> Result<Vec<RequirementNode>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM requirement_nodes WHERE folder_id IN ({})",
            NODE_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();
        if let Some(framework_id) = framework_id {
            sql.push_str(" AND framework_id = ?");
            params.push(framework_id.to_string());
        }
        if let Some(assessable) = assessable {
            sql.push_str(" AND assessable = ?");
            params.push(if assessable { "1" } else { "0" }.to_string());
        }
        sql.push_str(" ORDER BY order_id");

        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        let mut nodes: Vec<RequirementNode> =
            rows.into_iter().map(to_node).collect::<Result<_, _>>()?;
        self.hydrate_all(&mut nodes).await?;
        Ok(nodes)
    }

    async fn hydrate_all(&self, nodes: &mut [RequirementNode]) -> Result<(), AegisError> {
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut controls = fetch_link_map(
            &self.db_pool,
            "requirement_node_reference_controls",
            "requirement_node_id",
            "reference_control_id",
            &ids,
        )
        .await?;
        let mut threats = fetch_link_map(
            &self.db_pool,
            "requirement_node_threats",
            "requirement_node_id",
            "threat_id",
            &ids,
        )
        .await?;
        for node in nodes {
            node.reference_control_ids = controls.remove(&node.id).unwrap_or_default();
            node.threat_ids = threats.remove(&node.id).unwrap_or_default();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Requirement mappings

const MAPPING_SET_COLUMNS: &str = "id, folder_id, name, source_framework_id, \
     target_framework_id, is_published, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct MappingSetRow {
    id: String,
    folder_id: String,
    name: String,
    source_framework_id: String,
    target_framework_id: String,
    is_published: bool,
    created_at: String,
    updated_at: String,
}

fn to_mapping_set(row: MappingSetRow) -> Result<RequirementMappingSet, AegisError> {
    Ok(RequirementMappingSet {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        name: row.name,
        source_framework_id: parse_id(&row.source_framework_id)?,
        target_framework_id: parse_id(&row.target_framework_id)?,
        is_published: row.is_published,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(sqlx::FromRow)]
struct MappingRow {
    id: String,
    mapping_set_id: String,
    source_requirement_id: String,
    target_requirement_id: String,
    coverage: String,
}

fn to_mapping(row: MappingRow) -> Result<RequirementMapping, AegisError> {
    Ok(RequirementMapping {
        id: parse_id(&row.id)?,
        mapping_set_id: parse_id(&row.mapping_set_id)?,
        source_requirement_id: parse_id(&row.source_requirement_id)?,
        target_requirement_id: parse_id(&row.target_requirement_id)?,
        coverage: parse_variant(&row.coverage, MappingCoverage::parse)?,
    })
}

#[derive(Clone)]
pub struct MappingStore {
    db_pool: SqlitePool,
}

impl MappingStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create_set(
        &self,
        set: &RequirementMappingSet,
        mappings: &[RequirementMapping],
    ) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO requirement_mapping_sets (id, folder_id, name, source_framework_id,
                 target_framework_id, is_published, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(set.id.to_string())
        .bind(set.folder_id.to_string())
        .bind(&set.name)
        .bind(set.source_framework_id.to_string())
        .bind(set.target_framework_id.to_string())
        .bind(set.is_published)
        .bind(set.created_at.to_rfc3339())
        .bind(set.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        for mapping in mappings {
            sqlx::query(
                "INSERT INTO requirement_mappings (id, mapping_set_id, source_requirement_id,
                     target_requirement_id, coverage)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(mapping.id.to_string())
            .bind(set.id.to_string())
            .bind(mapping.source_requirement_id.to_string())
            .bind(mapping.target_requirement_id.to_string())
            .bind(mapping.coverage.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_set(&self, id: Uuid) -> Result<Option<RequirementMappingSet>, AegisError> {
        let sql = format!(
            "SELECT {} FROM requirement_mapping_sets WHERE id = ?",
            MAPPING_SET_COLUMNS
        );
        let row = sqlx::query_as::<_, MappingSetRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_mapping_set).transpose()
    }

    pub async fn list_sets(
        &self,
        scope: &[Uuid],
    ) -> Result<Vec<RequirementMappingSet>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM requirement_mapping_sets WHERE folder_id IN ({}) ORDER BY name",
            MAPPING_SET_COLUMNS,
            placeholders(scope.len())
        );
        let mut query = sqlx::query_as::<_, MappingSetRow>(&sql);
        for id in scope {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_mapping_set).collect()
    }

    /// A mapping set between the two frameworks, in either stored
    /// direction.
    pub async fn find_between(
        &self,
        source_framework_id: Uuid,
        target_framework_id: Uuid,
    ) -> Result<Option<RequirementMappingSet>, AegisError> {
        let sql = format!(
            "SELECT {} FROM requirement_mapping_sets
             WHERE (source_framework_id = ? AND target_framework_id = ?)
                OR (source_framework_id = ? AND target_framework_id = ?)",
            MAPPING_SET_COLUMNS
        );
        let row = sqlx::query_as::<_, MappingSetRow>(&sql)
            .bind(source_framework_id.to_string())
            .bind(target_framework_id.to_string())
            .bind(target_framework_id.to_string())
            .bind(source_framework_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_mapping_set).transpose()
    }

    pub async fn list_mappings(
        &self,
        mapping_set_id: Uuid,
    ) -> Result<Vec<RequirementMapping>, AegisError> {
        let rows = sqlx::query_as::<_, MappingRow>(
            "SELECT id, mapping_set_id, source_requirement_id, target_requirement_id, coverage
             FROM requirement_mappings WHERE mapping_set_id = ?",
        )
        .bind(mapping_set_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(to_mapping).collect()
    }

    pub async fn delete_set(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM requirement_mapping_sets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Compliance assessments (audits)

const AUDIT_COLUMNS: &str = "id, folder_id, project_id, framework_id, name, description, \
     version, status, eta, due_date, selected_implementation_groups, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    folder_id: String,
    project_id: String,
    framework_id: String,
    name: String,
    description: Option<String>,
    version: Option<String>,
    status: String,
    eta: Option<String>,
    due_date: Option<String>,
    selected_implementation_groups: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_audit(row: AuditRow) -> Result<ComplianceAssessment, AegisError> {
    Ok(ComplianceAssessment {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        project_id: parse_id(&row.project_id)?,
        framework_id: parse_id(&row.framework_id)?,
        name: row.name,
        description: row.description,
        version: row.version,
        status: parse_variant(&row.status, AssessmentStatus::parse)?,
        eta: parse_date_opt(row.eta.as_deref())?,
        due_date: parse_date_opt(row.due_date.as_deref())?,
        selected_implementation_groups: row.selected_implementation_groups,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct ComplianceAssessmentFilter {
    pub folder_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub framework_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct ComplianceAssessmentStore {
    db_pool: SqlitePool,
}

impl ComplianceAssessmentStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, audit: &ComplianceAssessment) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO compliance_assessments (id, folder_id, project_id, framework_id,
                 name, description, version, status, eta, due_date,
                 selected_implementation_groups, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(audit.id.to_string())
        .bind(audit.folder_id.to_string())
        .bind(audit.project_id.to_string())
        .bind(audit.framework_id.to_string())
        .bind(&audit.name)
        .bind(&audit.description)
        .bind(&audit.version)
        .bind(audit.status.as_str())
        .bind(audit.eta.map(|d| d.to_string()))
        .bind(audit.due_date.map(|d| d.to_string()))
        .bind(&audit.selected_implementation_groups)
        .bind(audit.created_at.to_rfc3339())
        .bind(audit.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ComplianceAssessment>, AegisError> {
        let sql = format!(
            "SELECT {} FROM compliance_assessments WHERE id = ?",
            AUDIT_COLUMNS
        );
        let row = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_audit).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &ComplianceAssessmentFilter,
    ) -> Result<Vec<ComplianceAssessment>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM compliance_assessments WHERE folder_id IN ({})",
            AUDIT_COLUMNS,
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
        if let Some(framework_id) = filter.framework_id {
            sql.push_str(" AND framework_id = ?");
            params.push(framework_id.to_string());
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
            &["name", "status", "eta", "due_date", "created_at", "updated_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, AuditRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_audit).collect()
    }

    pub async fn update(&self, audit: &ComplianceAssessment) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE compliance_assessments SET name = ?, description = ?, version = ?,
                 status = ?, eta = ?, due_date = ?, selected_implementation_groups = ?,
                 project_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&audit.name)
        .bind(&audit.description)
        .bind(&audit.version)
        .bind(audit.status.as_str())
        .bind(audit.eta.map(|d| d.to_string()))
        .bind(audit.due_date.map(|d| d.to_string()))
        .bind(&audit.selected_implementation_groups)
        .bind(audit.project_id.to_string())
        .bind(audit.updated_at.to_rfc3339())
        .bind(audit.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM compliance_assessments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Requirement assessments

const RA_COLUMNS: &str = "id, folder_id, compliance_assessment_id, requirement_id, status, \
     result, score, is_scored, observation, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RaRow {
    id: String,
    folder_id: String,
    compliance_assessment_id: String,
    requirement_id: String,
    status: String,
    result: String,
    score: Option<i64>,
    is_scored: bool,
    observation: Option<String>,
    created_at: String,
    updated_at: String,
}

fn to_ra(row: RaRow) -> Result<RequirementAssessment, AegisError> {
    Ok(RequirementAssessment {
        id: parse_id(&row.id)?,
        folder_id: parse_id(&row.folder_id)?,
        compliance_assessment_id: parse_id(&row.compliance_assessment_id)?,
        requirement_id: parse_id(&row.requirement_id)?,
        status: parse_variant(&row.status, RequirementStatus::parse)?,
        result: parse_variant(&row.result, RequirementResult::parse)?,
        score: row.score,
        is_scored: row.is_scored,
        observation: row.observation,
        evidence_ids: Vec::new(),
        applied_control_ids: Vec::new(),
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct RequirementAssessmentFilter {
    pub compliance_assessment_id: Option<Uuid>,
    pub requirement_id: Option<Uuid>,
    pub status: Option<RequirementStatus>,
    pub result: Option<RequirementResult>,
}

#[derive(Clone)]
pub struct RequirementAssessmentStore {
    db_pool: SqlitePool,
}

impl RequirementAssessmentStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, ra: &RequirementAssessment) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO requirement_assessments (id, folder_id, compliance_assessment_id,
                 requirement_id, status, result, score, is_scored, observation,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ra.id.to_string())
        .bind(ra.folder_id.to_string())
        .bind(ra.compliance_assessment_id.to_string())
        .bind(ra.requirement_id.to_string())
        .bind(ra.status.as_str())
        .bind(ra.result.as_str())
        .bind(ra.score)
        .bind(ra.is_scored)
        .bind(&ra.observation)
        .bind(ra.created_at.to_rfc3339())
        .bind(ra.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        self.write_links(&mut tx, ra).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_links(
        &self,
        tx: &mut sqlx::SqliteConnection,
        ra: &RequirementAssessment,
    ) -> Result<(), AegisError> {
        replace_links(
            tx,
            "requirement_assessment_evidences",
            "requirement_assessment_id",
            "evidence_id",
            ra.id,
            &ra.evidence_ids,
        )
        .await?;
        replace_links(
            tx,
            "requirement_assessment_applied_controls",
            "requirement_assessment_id",
            "applied_control_id",
            ra.id,
            &ra.applied_control_ids,
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RequirementAssessment>, AegisError> {
        let sql = format!(
            "SELECT {} FROM requirement_assessments WHERE id = ?",
            RA_COLUMNS
        );
        let row = sqlx::query_as::<_, RaRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let mut ra = to_ra(row)?;
                self.hydrate_all(std::slice::from_mut(&mut ra)).await?;
                Ok(Some(ra))
            }
            None => Ok(None),
        }
    }

    /// All evaluations of one audit, in requirement tree order.
    pub async fn list_for_audit(
        &self,
        compliance_assessment_id: Uuid,
    ) -> Result<Vec<RequirementAssessment>, AegisError> {
        let sql = "SELECT ra.id, ra.folder_id, ra.compliance_assessment_id, ra.requirement_id,
                 ra.status, ra.result, ra.score, ra.is_scored, ra.observation,
                 ra.created_at, ra.updated_at
             FROM requirement_assessments ra
             JOIN requirement_nodes rn ON rn.id = ra.requirement_id
             WHERE ra.compliance_assessment_id = ?
             ORDER BY rn.order_id";
        let rows = sqlx::query_as::<_, RaRow>(sql)
            .bind(compliance_assessment_id.to_string())
            .fetch_all(&self.db_pool)
            .await?;
        let mut ras: Vec<RequirementAssessment> =
            rows.into_iter().map(to_ra).collect::<Result<_, _>>()?;
        self.hydrate_all(&mut ras).await?;
        Ok(ras)
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &RequirementAssessmentFilter,
    ) -> Result<Vec<RequirementAssessment>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM requirement_assessments WHERE folder_id IN ({})",
            RA_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();
        if let Some(audit_id) = filter.compliance_assessment_id {
            sql.push_str(" AND compliance_assessment_id = ?");
            params.push(audit_id.to_string());
        }
        if let Some(requirement_id) = filter.requirement_id {
            sql.push_str(" AND requirement_id = ?");
            params.push(requirement_id.to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(result) = filter.result {
            sql.push_str(" AND result = ?");
            params.push(result.as_str().to_string());
        }
        sql.push_str(" ORDER BY created_at");

        let mut query = sqlx::query_as::<_, RaRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        let mut ras: Vec<RequirementAssessment> =
            rows.into_iter().map(to_ra).collect::<Result<_, _>>()?;
        self.hydrate_all(&mut ras).await?;
        Ok(ras)
    }

    pub async fn update(&self, ra: &RequirementAssessment) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "UPDATE requirement_assessments SET status = ?, result = ?, score = ?,
                 is_scored = ?, observation = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(ra.status.as_str())
        .bind(ra.result.as_str())
        .bind(ra.score)
        .bind(ra.is_scored)
        .bind(&ra.observation)
        .bind(ra.updated_at.to_rfc3339())
        .bind(ra.id.to_string())
        .execute(&mut *tx)
        .await?;
        self.write_links(&mut tx, ra).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn hydrate_all(&self, ras: &mut [RequirementAssessment]) -> Result<(), AegisError> {
        let ids: Vec<Uuid> = ras.iter().map(|ra| ra.id).collect();
        let mut evidences = fetch_link_map(
            &self.db_pool,
            "requirement_assessment_evidences",
            "requirement_assessment_id",
            "evidence_id",
            &ids,
        )
        .await?;
        let mut controls = fetch_link_map(
            &self.db_pool,
            "requirement_assessment_applied_controls",
            "requirement_assessment_id",
            "applied_control_id",
            &ids,
        )
        .await?;
        for ra in ras {
            ra.evidence_ids = evidences.remove(&ra.id).unwrap_or_default();
            ra.applied_control_ids = controls.remove(&ra.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::domain::folder::{Folder, FolderContentType};
    use crate::store::FolderStore;
    use chrono::Utc;

    async fn seed_root(pool: &SqlitePool) -> Uuid {
        let now = Utc::now();
        let root = Folder {
            id: Uuid::new_v4(),
            name: "Global".to_string(),
            description: None,
            content_type: FolderContentType::Global,
            parent_id: None,
            builtin: true,
            created_at: now,
            updated_at: now,
        };
        FolderStore::new(pool.clone()).create(&root).await.unwrap();
        root.id
    }

    fn framework(folder_id: Uuid, name: &str) -> Framework {
        let now = Utc::now();
        Framework {
            id: Uuid::new_v4(),
            folder_id,
            ref_id: Some(format!("urn:test:framework:{}", name)),
            name: name.to_string(),
            description: None,
            provider: Some("Test".to_string()),
            is_published: true,
            min_score: 0,
            max_score: 4,
            scores_definition: None,
            implementation_groups_definition: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn node(framework: &Framework, urn: &str, order_id: i64, assessable: bool) -> RequirementNode {
        let now = Utc::now();
        RequirementNode {
            id: Uuid::new_v4(),
            folder_id: framework.folder_id,
            framework_id: framework.id,
            urn: urn.to_string(),
            parent_urn: None,
            ref_id: None,
            name: Some(urn.to_string()),
            description: None,
            order_id,
            assessable,
            implementation_groups: None,
            reference_control_ids: vec![],
            threat_ids: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_framework_roundtrip_and_find_by_ref() {
        let pool = connect_in_memory().await.unwrap();
        let folder_id = seed_root(&pool).await;
        let store = FrameworkStore::new(pool);

        let fw = framework(folder_id, "ISO");
        store.create(&fw).await.unwrap();

        let loaded = store.get(fw.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "ISO");
        assert!(loaded.is_published);

        let by_ref = store
            .find_by_ref("urn:test:framework:ISO")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, fw.id);
        assert!(store.find_by_ref("urn:missing").await.unwrap().is_none());
        assert!(!store.in_use(fw.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_nodes_ordered_and_assessable_filter() {
        let pool = connect_in_memory().await.unwrap();
        let folder_id = seed_root(&pool).await;
        let fw_store = FrameworkStore::new(pool.clone());
        let node_store = RequirementNodeStore::new(pool);

        let fw = framework(folder_id, "NIST");
        fw_store.create(&fw).await.unwrap();

        let section = node(&fw, "urn:n:1", 1, false);
        let req_b = node(&fw, "urn:n:3", 3, true);
        let req_a = node(&fw, "urn:n:2", 2, true);
        node_store.create(&section).await.unwrap();
        node_store.create(&req_b).await.unwrap();
        node_store.create(&req_a).await.unwrap();

        let all = node_store.list_for_framework(fw.id).await.unwrap();
        let urns: Vec<&str> = all.iter().map(|n| n.urn.as_str()).collect();
        assert_eq!(urns, vec!["urn:n:1", "urn:n:2", "urn:n:3"]);

        let assessable = node_store
            .list(&[folder_id], Some(fw.id), Some(true))
            .await
            .unwrap();
        assert_eq!(assessable.len(), 2);
    }

    #[tokio::test]
    async fn test_audit_lifecycle_and_requirement_assessments() {
        let pool = connect_in_memory().await.unwrap();
        let folder_id = seed_root(&pool).await;
        let now = Utc::now();

        let fw = framework(folder_id, "CIS");
        FrameworkStore::new(pool.clone()).create(&fw).await.unwrap();
        let req = node(&fw, "urn:n:1", 1, true);
        RequirementNodeStore::new(pool.clone())
            .create(&req)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO projects (id, folder_id, name, lc_status, created_at, updated_at)
             VALUES (?, ?, 'P', 'in_design', ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(folder_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();
        let (project_id,): (String,) = sqlx::query_as("SELECT id FROM projects")
            .fetch_one(&pool)
            .await
            .unwrap();

        let audit_store = ComplianceAssessmentStore::new(pool.clone());
        let audit = ComplianceAssessment {
            id: Uuid::new_v4(),
            folder_id,
            project_id: Uuid::parse_str(&project_id).unwrap(),
            framework_id: fw.id,
            name: "Annual audit".to_string(),
            description: None,
            version: Some("1.0".to_string()),
            status: AssessmentStatus::Planned,
            eta: None,
            due_date: None,
            selected_implementation_groups: None,
            created_at: now,
            updated_at: now,
        };
        audit_store.create(&audit).await.unwrap();
        assert!(FrameworkStore::new(pool.clone())
            .in_use(fw.id)
            .await
            .unwrap());

        let ra_store = RequirementAssessmentStore::new(pool.clone());
        let ra = RequirementAssessment {
            id: Uuid::new_v4(),
            folder_id,
            compliance_assessment_id: audit.id,
            requirement_id: req.id,
            status: RequirementStatus::ToDo,
            result: RequirementResult::NotAssessed,
            score: None,
            is_scored: false,
            observation: None,
            evidence_ids: vec![],
            applied_control_ids: vec![],
            created_at: now,
            updated_at: now,
        };
        ra_store.create(&ra).await.unwrap();

        let mut loaded = ra_store.get(ra.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RequirementStatus::ToDo);

        loaded.status = RequirementStatus::Done;
        loaded.result = RequirementResult::Compliant;
        ra_store.update(&loaded).await.unwrap();

        let listed = ra_store.list_for_audit(audit.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].result, RequirementResult::Compliant);

        // Deleting the audit cascades to its evaluations.
        assert!(audit_store.delete(audit.id).await.unwrap());
        assert!(ra_store.get(ra.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mapping_set_between_frameworks() {
        let pool = connect_in_memory().await.unwrap();
        let folder_id = seed_root(&pool).await;
        let now = Utc::now();

        let fw_store = FrameworkStore::new(pool.clone());
        let source = framework(folder_id, "A");
        let target = framework(folder_id, "B");
        fw_store.create(&source).await.unwrap();
        fw_store.create(&target).await.unwrap();

        let node_store = RequirementNodeStore::new(pool.clone());
        let source_req = node(&source, "urn:a:1", 1, true);
        let target_req = node(&target, "urn:b:1", 1, true);
        node_store.create(&source_req).await.unwrap();
        node_store.create(&target_req).await.unwrap();

        let store = MappingStore::new(pool);
        let set = RequirementMappingSet {
            id: Uuid::new_v4(),
            folder_id,
            name: "A to B".to_string(),
            source_framework_id: source.id,
            target_framework_id: target.id,
            is_published: true,
            created_at: now,
            updated_at: now,
        };
        let mapping = RequirementMapping {
            id: Uuid::new_v4(),
            mapping_set_id: set.id,
            source_requirement_id: source_req.id,
            target_requirement_id: target_req.id,
            coverage: MappingCoverage::Full,
        };
        store.create_set(&set, &[mapping]).await.unwrap();

        let found = store
            .find_between(source.id, target.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, set.id);
        // Direction-agnostic lookup.
        assert!(store
            .find_between(target.id, source.id)
            .await
            .unwrap()
            .is_some());

        let mappings = store.list_mappings(set.id).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].coverage, MappingCoverage::Full);
    }
}
