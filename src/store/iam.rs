// Identity persistence: users, groups, roles, assignments, sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::iam::{Role, RoleAssignment, SecurityEvent, Session, User, UserGroup};
use crate::store::{
    fetch_link_map, fetch_links, like_pattern, order_clause, parse_id, parse_id_opt, parse_ts,
    placeholders, replace_links,
};

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, password_hash, is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

fn to_user(row: UserRow) -> Result<User, AegisError> {
    Ok(User {
        id: parse_id(&row.id)?,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        password_hash: row.password_hash,
        is_active: row.is_active,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct UserStore {
    db_pool: SqlitePool,
}

impl UserStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, user: &User) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, password_hash, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>, AegisError> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_user).transpose()
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, AegisError> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_user).transpose()
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, AegisError> {
        let mut sql = format!("SELECT {} FROM users WHERE 1=1", USER_COLUMNS);
        let mut params: Vec<String> = Vec::new();

        if let Some(email) = filter.email.as_deref() {
            sql.push_str(" AND email = ?");
            params.push(email.to_string());
        }
        if let Some(is_active) = filter.is_active {
            sql.push_str(if is_active {
                " AND is_active = 1"
            } else {
                " AND is_active = 0"
            });
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(
                " AND (email LIKE ? ESCAPE '\\' OR first_name LIKE ? ESCAPE '\\' OR last_name LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern.clone());
            params.push(pattern);
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["email", "first_name", "last_name", "created_at"],
            "email ASC",
        ));

        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_user).collect()
    }

    pub async fn update(&self, user: &User) -> Result<(), AegisError> {
        sqlx::query(
            "UPDATE users SET email = ?, first_name = ?, last_name = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.updated_at.to_rfc3339())
        .bind(user.id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AegisError> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

const GROUP_COLUMNS: &str = "id, name, folder_id, builtin, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserGroupRow {
    id: String,
    name: String,
    folder_id: String,
    builtin: bool,
    created_at: String,
    updated_at: String,
}

fn to_group(row: UserGroupRow) -> Result<UserGroup, AegisError> {
    Ok(UserGroup {
        id: parse_id(&row.id)?,
        name: row.name,
        folder_id: parse_id(&row.folder_id)?,
        builtin: row.builtin,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct UserGroupFilter {
    pub folder_id: Option<Uuid>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct UserGroupStore {
    db_pool: SqlitePool,
}

impl UserGroupStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, group: &UserGroup) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO user_groups (id, name, folder_id, builtin, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(group.id.to_string())
        .bind(&group.name)
        .bind(group.folder_id.to_string())
        .bind(group.builtin)
        .bind(group.created_at.to_rfc3339())
        .bind(group.updated_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<UserGroup>, AegisError> {
        let sql = format!("SELECT {} FROM user_groups WHERE id = ?", GROUP_COLUMNS);
        let row = sqlx::query_as::<_, UserGroupRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_group).transpose()
    }

    pub async fn find_in_folder(
        &self,
        folder_id: Uuid,
        name: &str,
    ) -> Result<Option<UserGroup>, AegisError> {
        let sql = format!(
            "SELECT {} FROM user_groups WHERE folder_id = ? AND name = ?",
            GROUP_COLUMNS
        );
        let row = sqlx::query_as::<_, UserGroupRow>(&sql)
            .bind(folder_id.to_string())
            .bind(name)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(to_group).transpose()
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &UserGroupFilter,
    ) -> Result<Vec<UserGroup>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM user_groups WHERE folder_id IN ({})",
            GROUP_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        if let Some(search) = filter.search.as_deref() {
            sql.push_str(" AND name LIKE ? ESCAPE '\\'");
            params.push(like_pattern(search));
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["name", "created_at"],
            "name ASC",
        ));

        let mut query = sqlx::query_as::<_, UserGroupRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        rows.into_iter().map(to_group).collect()
    }

    pub async fn update(&self, group: &UserGroup) -> Result<(), AegisError> {
        sqlx::query("UPDATE user_groups SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&group.name)
            .bind(group.updated_at.to_rfc3339())
            .bind(group.id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM user_groups WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn members(&self, group_id: Uuid) -> Result<Vec<Uuid>, AegisError> {
        fetch_links(
            &self.db_pool,
            "user_group_members",
            "user_group_id",
            "user_id",
            group_id,
        )
        .await
    }

    pub async fn set_members(&self, group_id: Uuid, user_ids: &[Uuid]) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        replace_links(
            &mut tx,
            "user_group_members",
            "user_group_id",
            "user_id",
            group_id,
            user_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_group_members (user_group_id, user_id) VALUES (?, ?)",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), AegisError> {
        sqlx::query("DELETE FROM user_group_members WHERE user_group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn groups_of_user(&self, user_id: Uuid) -> Result<Vec<UserGroup>, AegisError> {
        let rows = sqlx::query_as::<_, UserGroupRow>(
            "SELECT g.id, g.name, g.folder_id, g.builtin, g.created_at, g.updated_at
             FROM user_groups g
             JOIN user_group_members m ON m.user_group_id = g.id
             WHERE m.user_id = ?",
        )
            .bind(user_id.to_string())
            .fetch_all(&self.db_pool)
            .await?;
        rows.into_iter().map(to_group).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: String,
    name: String,
    builtin: bool,
    created_at: String,
    updated_at: String,
}

#[derive(Clone)]
pub struct RoleStore {
    db_pool: SqlitePool,
}

impl RoleStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, role: &Role) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO roles (id, name, builtin, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(role.builtin)
        .bind(role.created_at.to_rfc3339())
        .bind(role.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        for codename in &role.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, codename) VALUES (?, ?)")
                .bind(role.id.to_string())
                .bind(codename)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Role>, AegisError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, builtin, created_at, updated_at FROM roles WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.db_pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>, AegisError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, builtin, created_at, updated_at FROM roles WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.db_pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Role>, AegisError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, builtin, created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(&self.db_pool)
        .await?;

        let permission_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT role_id, codename FROM role_permissions")
                .fetch_all(&self.db_pool)
                .await?;
        let mut permissions: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (role_id, codename) in permission_rows {
            permissions
                .entry(parse_id(&role_id)?)
                .or_default()
                .push(codename);
        }

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            let id = parse_id(&row.id)?;
            roles.push(Role {
                id,
                name: row.name,
                builtin: row.builtin,
                permissions: permissions.remove(&id).unwrap_or_default(),
                created_at: parse_ts(&row.created_at)?,
                updated_at: parse_ts(&row.updated_at)?,
            });
        }
        Ok(roles)
    }

    async fn hydrate(&self, row: RoleRow) -> Result<Role, AegisError> {
        let permission_rows: Vec<(String,)> =
            sqlx::query_as("SELECT codename FROM role_permissions WHERE role_id = ?")
                .bind(&row.id)
                .fetch_all(&self.db_pool)
                .await?;
        Ok(Role {
            id: parse_id(&row.id)?,
            name: row.name,
            builtin: row.builtin,
            permissions: permission_rows.into_iter().map(|(c,)| c).collect(),
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

const RA_COLUMNS: &str =
    "id, user_id, user_group_id, role_id, folder_id, is_recursive, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RoleAssignmentRow {
    id: String,
    user_id: Option<String>,
    user_group_id: Option<String>,
    role_id: String,
    folder_id: String,
    is_recursive: bool,
    created_at: String,
    updated_at: String,
}

fn to_assignment(
    row: RoleAssignmentRow,
    perimeter_folder_ids: Vec<Uuid>,
) -> Result<RoleAssignment, AegisError> {
    Ok(RoleAssignment {
        id: parse_id(&row.id)?,
        user_id: parse_id_opt(row.user_id.as_deref())?,
        user_group_id: parse_id_opt(row.user_group_id.as_deref())?,
        role_id: parse_id(&row.role_id)?,
        folder_id: parse_id(&row.folder_id)?,
        is_recursive: row.is_recursive,
        perimeter_folder_ids,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

#[derive(Debug, Default, Clone)]
pub struct RoleAssignmentFilter {
    pub user_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
    pub ordering: Option<String>,
}

#[derive(Clone)]
pub struct RoleAssignmentStore {
    db_pool: SqlitePool,
}

impl RoleAssignmentStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, assignment: &RoleAssignment) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO role_assignments (id, user_id, user_group_id, role_id, folder_id, is_recursive, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(assignment.id.to_string())
        .bind(assignment.user_id.map(|id| id.to_string()))
        .bind(assignment.user_group_id.map(|id| id.to_string()))
        .bind(assignment.role_id.to_string())
        .bind(assignment.folder_id.to_string())
        .bind(assignment.is_recursive)
        .bind(assignment.created_at.to_rfc3339())
        .bind(assignment.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "role_assignment_perimeters",
            "role_assignment_id",
            "folder_id",
            assignment.id,
            &assignment.perimeter_folder_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RoleAssignment>, AegisError> {
        let sql = format!("SELECT {} FROM role_assignments WHERE id = ?", RA_COLUMNS);
        let row = sqlx::query_as::<_, RoleAssignmentRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => {
                let perimeter = fetch_links(
                    &self.db_pool,
                    "role_assignment_perimeters",
                    "role_assignment_id",
                    "folder_id",
                    id,
                )
                .await?;
                Ok(Some(to_assignment(row, perimeter)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        scope: &[Uuid],
        filter: &RoleAssignmentFilter,
    ) -> Result<Vec<RoleAssignment>, AegisError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM role_assignments WHERE folder_id IN ({})",
            RA_COLUMNS,
            placeholders(scope.len())
        );
        let mut params: Vec<String> = scope.iter().map(Uuid::to_string).collect();

        if let Some(user_id) = filter.user_id {
            sql.push_str(" AND user_id = ?");
            params.push(user_id.to_string());
        }
        if let Some(user_group_id) = filter.user_group_id {
            sql.push_str(" AND user_group_id = ?");
            params.push(user_group_id.to_string());
        }
        if let Some(role_id) = filter.role_id {
            sql.push_str(" AND role_id = ?");
            params.push(role_id.to_string());
        }
        if let Some(folder_id) = filter.folder_id {
            sql.push_str(" AND folder_id = ?");
            params.push(folder_id.to_string());
        }
        sql.push_str(&order_clause(
            filter.ordering.as_deref(),
            &["created_at"],
            "created_at DESC",
        ));

        let mut query = sqlx::query_as::<_, RoleAssignmentRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        self.hydrate_all(rows).await
    }

    /// Every assignment, for access computation.
    pub async fn list_all(&self) -> Result<Vec<RoleAssignment>, AegisError> {
        let sql = format!("SELECT {} FROM role_assignments", RA_COLUMNS);
        let rows = sqlx::query_as::<_, RoleAssignmentRow>(&sql)
            .fetch_all(&self.db_pool)
            .await?;
        self.hydrate_all(rows).await
    }

    /// Assignments reaching the user directly or through one of their
    /// groups.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        group_ids: &[Uuid],
    ) -> Result<Vec<RoleAssignment>, AegisError> {
        let mut sql = format!(
            "SELECT {} FROM role_assignments WHERE user_id = ?",
            RA_COLUMNS
        );
        let mut params: Vec<String> = vec![user_id.to_string()];
        if !group_ids.is_empty() {
            sql.push_str(&format!(
                " OR user_group_id IN ({})",
                placeholders(group_ids.len())
            ));
            params.extend(group_ids.iter().map(Uuid::to_string));
        }

        let mut query = sqlx::query_as::<_, RoleAssignmentRow>(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        self.hydrate_all(rows).await
    }

    pub async fn update(&self, assignment: &RoleAssignment) -> Result<(), AegisError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "UPDATE role_assignments
             SET user_id = ?, user_group_id = ?, role_id = ?, is_recursive = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(assignment.user_id.map(|id| id.to_string()))
        .bind(assignment.user_group_id.map(|id| id.to_string()))
        .bind(assignment.role_id.to_string())
        .bind(assignment.is_recursive)
        .bind(assignment.updated_at.to_rfc3339())
        .bind(assignment.id.to_string())
        .execute(&mut *tx)
        .await?;
        replace_links(
            &mut tx,
            "role_assignment_perimeters",
            "role_assignment_id",
            "folder_id",
            assignment.id,
            &assignment.perimeter_folder_ids,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM role_assignments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_all(
        &self,
        rows: Vec<RoleAssignmentRow>,
    ) -> Result<Vec<RoleAssignment>, AegisError> {
        let ids = rows
            .iter()
            .map(|row| parse_id(&row.id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut perimeters = fetch_link_map(
            &self.db_pool,
            "role_assignment_perimeters",
            "role_assignment_id",
            "folder_id",
            &ids,
        )
        .await?;
        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| to_assignment(row, perimeters.remove(&id).unwrap_or_default()))
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    token_hash: String,
    created_at: String,
    expires_at: String,
}

fn to_session(row: SessionRow) -> Result<Session, AegisError> {
    Ok(Session {
        id: parse_id(&row.id)?,
        user_id: parse_id(&row.user_id)?,
        token_hash: row.token_hash,
        created_at: parse_ts(&row.created_at)?,
        expires_at: parse_ts(&row.expires_at)?,
    })
}

#[derive(Clone)]
pub struct SessionStore {
    db_pool: SqlitePool,
}

impl SessionStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, session: &Session) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.token_hash)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AegisError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, token_hash, created_at, expires_at FROM sessions WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(to_session).transpose()
    }

    pub async fn delete_by_token_hash(&self, token_hash: &str) -> Result<bool, AegisError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AegisError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AegisError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct SecurityEventRow {
    id: String,
    user_email: Option<String>,
    event_type: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: String,
}

#[derive(Clone)]
pub struct SecurityEventStore {
    db_pool: SqlitePool,
}

impl SecurityEventStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn record(&self, event: &SecurityEvent) -> Result<(), AegisError> {
        sqlx::query(
            "INSERT INTO security_events (id, user_email, event_type, ip_address, user_agent, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(&event.user_email)
        .bind(&event.event_type)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<SecurityEvent>, AegisError> {
        let rows = sqlx::query_as::<_, SecurityEventRow>(
            "SELECT id, user_email, event_type, ip_address, user_agent, created_at
             FROM security_events ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(SecurityEvent {
                    id: parse_id(&row.id)?,
                    user_email: row.user_email,
                    event_type: row.event_type,
                    ip_address: row.ip_address,
                    user_agent: row.user_agent,
                    created_at: parse_ts(&row.created_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::domain::folder::{Folder, FolderContentType};
    use crate::store::FolderStore;

    fn user(email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "x".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

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

    #[tokio::test]
    async fn test_user_email_lookup() {
        let pool = connect_in_memory().await.unwrap();
        let store = UserStore::new(pool);

        let alice = user("alice@example.com");
        store.create(&alice).await.unwrap();

        let found = store.get_by_email("alice@example.com").await.unwrap();
        assert_eq!(found.unwrap().id, alice.id);
        assert!(store.get_by_email("bob@example.com").await.unwrap().is_none());

        // Duplicate emails are rejected by the schema.
        let dup = user("alice@example.com");
        assert!(store.create(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_group_membership() {
        let pool = connect_in_memory().await.unwrap();
        let root_id = seed_root(&pool).await;
        let users = UserStore::new(pool.clone());
        let groups = UserGroupStore::new(pool);

        let alice = user("alice@example.com");
        users.create(&alice).await.unwrap();

        let now = Utc::now();
        let group = UserGroup {
            id: Uuid::new_v4(),
            name: "Analysts".to_string(),
            folder_id: root_id,
            builtin: false,
            created_at: now,
            updated_at: now,
        };
        groups.create(&group).await.unwrap();

        groups.add_member(group.id, alice.id).await.unwrap();
        groups.add_member(group.id, alice.id).await.unwrap();
        assert_eq!(groups.members(group.id).await.unwrap(), vec![alice.id]);

        let memberships = groups.groups_of_user(alice.id).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].name, "Analysts");

        groups.remove_member(group.id, alice.id).await.unwrap();
        assert!(groups.members(group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_permissions_roundtrip() {
        let pool = connect_in_memory().await.unwrap();
        let store = RoleStore::new(pool);

        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: "reader".to_string(),
            builtin: true,
            permissions: vec!["view_project".to_string(), "view_asset".to_string()],
            created_at: now,
            updated_at: now,
        };
        store.create(&role).await.unwrap();

        let loaded = store.get_by_name("reader").await.unwrap().unwrap();
        assert_eq!(loaded.permissions.len(), 2);
        assert!(loaded.permissions.contains(&"view_project".to_string()));
    }

    #[tokio::test]
    async fn test_assignments_reach_user_through_groups() {
        let pool = connect_in_memory().await.unwrap();
        let root_id = seed_root(&pool).await;
        let users = UserStore::new(pool.clone());
        let groups = UserGroupStore::new(pool.clone());
        let roles = RoleStore::new(pool.clone());
        let assignments = RoleAssignmentStore::new(pool);

        let alice = user("alice@example.com");
        users.create(&alice).await.unwrap();

        let now = Utc::now();
        let group = UserGroup {
            id: Uuid::new_v4(),
            name: "Analysts".to_string(),
            folder_id: root_id,
            builtin: false,
            created_at: now,
            updated_at: now,
        };
        groups.create(&group).await.unwrap();
        groups.add_member(group.id, alice.id).await.unwrap();

        let role = Role {
            id: Uuid::new_v4(),
            name: "analyst".to_string(),
            builtin: true,
            permissions: vec!["view_project".to_string()],
            created_at: now,
            updated_at: now,
        };
        roles.create(&role).await.unwrap();

        let assignment = RoleAssignment {
            id: Uuid::new_v4(),
            user_id: None,
            user_group_id: Some(group.id),
            role_id: role.id,
            folder_id: root_id,
            is_recursive: true,
            perimeter_folder_ids: vec![root_id],
            created_at: now,
            updated_at: now,
        };
        assignments.create(&assignment).await.unwrap();

        let reached = assignments
            .list_for_user(alice.id, &[group.id])
            .await
            .unwrap();
        assert_eq!(reached.len(), 1);
        assert_eq!(reached[0].perimeter_folder_ids, vec![root_id]);

        // Direct lookup without the group finds nothing.
        let direct = assignments.list_for_user(alice.id, &[]).await.unwrap();
        assert!(direct.is_empty());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let pool = connect_in_memory().await.unwrap();
        let users = UserStore::new(pool.clone());
        let sessions = SessionStore::new(pool);

        let alice = user("alice@example.com");
        users.create(&alice).await.unwrap();

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: alice.id,
            token_hash: "deadbeef".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(12),
        };
        sessions.create(&session).await.unwrap();

        let found = sessions.get_by_token_hash("deadbeef").await.unwrap();
        assert_eq!(found.unwrap().user_id, alice.id);

        assert!(sessions.delete_by_token_hash("deadbeef").await.unwrap());
        assert!(sessions
            .get_by_token_hash("deadbeef")
            .await
            .unwrap()
            .is_none());
    }
}
