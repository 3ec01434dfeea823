// Access control engine: builtin roles, folder scoping, permission checks.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::AegisError;
use crate::domain::folder::{Folder, FolderContentType};
use crate::domain::iam::{Role, RoleAssignment, User, UserGroup};
use crate::domain::ObjectType;
use crate::store::{parse_id, FolderStore, RoleAssignmentStore, RoleStore, Stores, UserGroupStore};

pub const ROLE_ADMINISTRATOR: &str = "BI-RL-ADM";
pub const ROLE_AUDITOR: &str = "BI-RL-AUD";
pub const ROLE_APPROVER: &str = "BI-RL-APP";
pub const ROLE_ANALYST: &str = "BI-RL-ANA";
pub const ROLE_DOMAIN_MANAGER: &str = "BI-RL-DMA";

pub const GROUP_ADMINISTRATORS: &str = "BI-UG-ADM";
pub const GROUP_AUDITORS: &str = "BI-UG-AUD";
pub const GROUP_APPROVERS: &str = "BI-UG-APP";
pub const GROUP_ANALYSTS: &str = "BI-UG-ANA";
pub const GROUP_DOMAIN_MANAGERS: &str = "BI-UG-DMA";

pub const APPROVE_RISK_ACCEPTANCE: &str = "approve_riskacceptance";

pub const BUILTIN_ROLES: &[&str] = &[
    ROLE_ADMINISTRATOR,
    ROLE_AUDITOR,
    ROLE_APPROVER,
    ROLE_ANALYST,
    ROLE_DOMAIN_MANAGER,
];

/// (group name, role name) pairs auto-created in every new domain.
pub const DOMAIN_BUILTIN_GROUPS: &[(&str, &str)] = &[
    (GROUP_AUDITORS, ROLE_AUDITOR),
    (GROUP_APPROVERS, ROLE_APPROVER),
    (GROUP_ANALYSTS, ROLE_ANALYST),
    (GROUP_DOMAIN_MANAGERS, ROLE_DOMAIN_MANAGER),
];

pub fn view_codename(object_type: ObjectType) -> String {
    format!("view_{}", object_type.model_name())
}

pub fn add_codename(object_type: ObjectType) -> String {
    format!("add_{}", object_type.model_name())
}

pub fn change_codename(object_type: ObjectType) -> String {
    format!("change_{}", object_type.model_name())
}

pub fn delete_codename(object_type: ObjectType) -> String {
    format!("delete_{}", object_type.model_name())
}

/// Models analysts manage day to day. Domain structure (folders,
/// groups, assignments) and identities stay out.
const OPERATIONAL_MODELS: &[ObjectType] = &[
    ObjectType::Project,
    ObjectType::Threat,
    ObjectType::Asset,
    ObjectType::ReferenceControl,
    ObjectType::RiskAssessment,
    ObjectType::RiskScenario,
    ObjectType::RiskAcceptance,
    ObjectType::AppliedControl,
    ObjectType::Evidence,
    ObjectType::ComplianceAssessment,
];

fn view_all() -> Vec<String> {
    ObjectType::ALL.iter().map(|t| view_codename(*t)).collect()
}

fn crud_for(models: &[ObjectType]) -> Vec<String> {
    let mut perms = Vec::new();
    for t in models {
        perms.push(add_codename(*t));
        perms.push(change_codename(*t));
        perms.push(delete_codename(*t));
    }
    perms
}

/// Permission set of a builtin role.
pub fn builtin_role_permissions(role_name: &str) -> Vec<String> {
    let mut perms = view_all();
    match role_name {
        ROLE_ADMINISTRATOR => {
            perms.extend(crud_for(ObjectType::ALL));
            perms.push(APPROVE_RISK_ACCEPTANCE.to_string());
        }
        ROLE_AUDITOR => {}
        ROLE_APPROVER => {
            perms.push(change_codename(ObjectType::RiskAcceptance));
            perms.push(APPROVE_RISK_ACCEPTANCE.to_string());
        }
        ROLE_ANALYST => {
            perms.extend(crud_for(OPERATIONAL_MODELS));
            // Evaluations are created with their audit, never directly.
            perms.push(change_codename(ObjectType::RequirementAssessment));
        }
        ROLE_DOMAIN_MANAGER => {
            perms.extend(crud_for(OPERATIONAL_MODELS));
            perms.push(change_codename(ObjectType::RequirementAssessment));
            perms.extend(crud_for(&[
                ObjectType::Folder,
                ObjectType::UserGroup,
                ObjectType::RoleAssignment,
            ]));
        }
        _ => {}
    }
    perms.sort();
    perms.dedup();
    perms
}

/// In-memory folder hierarchy for perimeter expansion.
pub struct FolderTree {
    parents: HashMap<Uuid, Option<Uuid>>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl FolderTree {
    pub fn build(folders: &[Folder]) -> Self {
        let mut parents = HashMap::new();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for folder in folders {
            parents.insert(folder.id, folder.parent_id);
            if let Some(parent_id) = folder.parent_id {
                children.entry(parent_id).or_default().push(folder.id);
            }
        }
        Self { parents, children }
    }

    /// The folder itself plus everything below it.
    pub fn subtree(&self, id: Uuid) -> HashSet<Uuid> {
        let mut out = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if out.insert(current) {
                if let Some(kids) = self.children.get(&current) {
                    stack.extend(kids.iter().copied());
                }
            }
        }
        out
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut current = id;
        while let Some(Some(parent)) = self.parents.get(&current) {
            if out.contains(parent) {
                break; // corrupt cycle, stop walking
            }
            out.push(*parent);
            current = *parent;
        }
        out
    }
}

/// Object id sets a user may view, change and delete for one model.
#[derive(Debug, Default, Clone)]
pub struct AccessibleIds {
    pub view: HashSet<Uuid>,
    pub change: HashSet<Uuid>,
    pub delete: HashSet<Uuid>,
}

fn object_table(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Folder => "folders",
        ObjectType::User => "users",
        ObjectType::UserGroup => "user_groups",
        ObjectType::Role => "roles",
        ObjectType::RoleAssignment => "role_assignments",
        ObjectType::Project => "projects",
        ObjectType::Threat => "threats",
        ObjectType::Asset => "assets",
        ObjectType::ReferenceControl => "reference_controls",
        ObjectType::RiskMatrix => "risk_matrices",
        ObjectType::RiskAssessment => "risk_assessments",
        ObjectType::RiskScenario => "risk_scenarios",
        ObjectType::RiskAcceptance => "risk_acceptances",
        ObjectType::AppliedControl => "applied_controls",
        ObjectType::Evidence => "evidences",
        ObjectType::Framework => "frameworks",
        ObjectType::RequirementNode => "requirement_nodes",
        ObjectType::RequirementMappingSet => "requirement_mapping_sets",
        ObjectType::ComplianceAssessment => "compliance_assessments",
        ObjectType::RequirementAssessment => "requirement_assessments",
    }
}

/// Users and roles are not folder-scoped; access to them is decided by
/// holding the permission anywhere.
fn is_global(object_type: ObjectType) -> bool {
    matches!(object_type, ObjectType::User | ObjectType::Role)
}

#[derive(Clone)]
pub struct AccessEngine {
    db_pool: SqlitePool,
    folders: FolderStore,
    user_groups: UserGroupStore,
    roles: RoleStore,
    role_assignments: RoleAssignmentStore,
}

impl AccessEngine {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self {
            folders: FolderStore::new(db_pool.clone()),
            user_groups: UserGroupStore::new(db_pool.clone()),
            roles: RoleStore::new(db_pool.clone()),
            role_assignments: RoleAssignmentStore::new(db_pool.clone()),
            db_pool,
        }
    }

    /// Role assignments that apply to the user, directly or through
    /// group membership, with role permissions attached.
    async fn user_assignments(
        &self,
        user: &User,
    ) -> Result<Vec<(RoleAssignment, HashSet<String>)>, AegisError> {
        let groups = self.user_groups.groups_of_user(user.id).await?;
        let group_ids: Vec<Uuid> = groups.iter().map(|g| g.id).collect();
        let assignments = self
            .role_assignments
            .list_for_user(user.id, &group_ids)
            .await?;

        let role_permissions: HashMap<Uuid, HashSet<String>> = self
            .roles
            .list_all()
            .await?
            .into_iter()
            .map(|role| (role.id, role.permissions.into_iter().collect()))
            .collect();

        Ok(assignments
            .into_iter()
            .map(|assignment| {
                let perms = role_permissions
                    .get(&assignment.role_id)
                    .cloned()
                    .unwrap_or_default();
                (assignment, perms)
            })
            .collect())
    }

    fn folders_granting(
        assignments: &[(RoleAssignment, HashSet<String>)],
        tree: &FolderTree,
        permission: &str,
    ) -> HashSet<Uuid> {
        let mut out = HashSet::new();
        for (assignment, perms) in assignments {
            if !perms.contains(permission) {
                continue;
            }
            for perimeter in &assignment.perimeter_folder_ids {
                if assignment.is_recursive {
                    out.extend(tree.subtree(*perimeter));
                } else {
                    out.insert(*perimeter);
                }
            }
        }
        out
    }

    /// Folders where the user holds `permission`.
    pub async fn accessible_folders(
        &self,
        user: &User,
        permission: &str,
    ) -> Result<HashSet<Uuid>, AegisError> {
        let tree = FolderTree::build(&self.folders.list_all().await?);
        let assignments = self.user_assignments(user).await?;
        Ok(Self::folders_granting(&assignments, &tree, permission))
    }

    /// Gate for creates and custom actions: is the permission held on
    /// the target folder?
    pub async fn is_access_allowed(
        &self,
        user: &User,
        permission: &str,
        folder_id: Uuid,
    ) -> Result<bool, AegisError> {
        Ok(self
            .accessible_folders(user, permission)
            .await?
            .contains(&folder_id))
    }

    /// Does the user hold `permission` on any folder at all?
    pub async fn has_permission_anywhere(
        &self,
        user: &User,
        permission: &str,
    ) -> Result<bool, AegisError> {
        Ok(!self.accessible_folders(user, permission).await?.is_empty())
    }

    /// View/change/delete object id sets for one model.
    ///
    /// View extends, for library models, to published objects held in
    /// ancestor folders of any viewable folder.
    pub async fn accessible_object_ids(
        &self,
        user: &User,
        object_type: ObjectType,
    ) -> Result<AccessibleIds, AegisError> {
        let tree = FolderTree::build(&self.folders.list_all().await?);
        let assignments = self.user_assignments(user).await?;

        let view_folders =
            Self::folders_granting(&assignments, &tree, &view_codename(object_type));
        let change_folders =
            Self::folders_granting(&assignments, &tree, &change_codename(object_type));
        let delete_folders =
            Self::folders_granting(&assignments, &tree, &delete_codename(object_type));

        if object_type == ObjectType::Folder {
            return Ok(AccessibleIds {
                view: view_folders.clone(),
                change: view_folders.intersection(&change_folders).copied().collect(),
                delete: view_folders.intersection(&delete_folders).copied().collect(),
            });
        }

        if is_global(object_type) {
            let ids = self.all_object_ids(object_type).await?;
            return Ok(AccessibleIds {
                view: if view_folders.is_empty() {
                    HashSet::new()
                } else {
                    ids.clone()
                },
                change: if change_folders.is_empty() {
                    HashSet::new()
                } else {
                    ids.clone()
                },
                delete: if delete_folders.is_empty() { HashSet::new() } else { ids },
            });
        }

        let mut ancestor_folders: HashSet<Uuid> = HashSet::new();
        if object_type.is_library() {
            for folder_id in &view_folders {
                ancestor_folders.extend(tree.ancestors(*folder_id));
            }
        }

        let rows = self.scoped_object_rows(object_type).await?;
        let mut access = AccessibleIds::default();
        for (id, folder_id, is_published) in rows {
            if view_folders.contains(&folder_id)
                || (is_published && ancestor_folders.contains(&folder_id))
            {
                access.view.insert(id);
            }
            if change_folders.contains(&folder_id) {
                access.change.insert(id);
            }
            if delete_folders.contains(&folder_id) {
                access.delete.insert(id);
            }
        }
        // Mutation never exceeds visibility.
        access.change = access.change.intersection(&access.view).copied().collect();
        access.delete = access.delete.intersection(&access.view).copied().collect();
        Ok(access)
    }

    /// Folder superset to hand to a store list query for the model.
    /// For library models this includes ancestor folders, so results
    /// must still be filtered by the view id set.
    pub async fn view_scope(
        &self,
        user: &User,
        object_type: ObjectType,
    ) -> Result<Vec<Uuid>, AegisError> {
        let tree = FolderTree::build(&self.folders.list_all().await?);
        let assignments = self.user_assignments(user).await?;
        let mut scope = Self::folders_granting(&assignments, &tree, &view_codename(object_type));
        if object_type.is_library() {
            let base: Vec<Uuid> = scope.iter().copied().collect();
            for folder_id in base {
                scope.extend(tree.ancestors(folder_id));
            }
        }
        Ok(scope.into_iter().collect())
    }

    async fn all_object_ids(
        &self,
        object_type: ObjectType,
    ) -> Result<HashSet<Uuid>, AegisError> {
        let sql = format!("SELECT id FROM {}", object_table(object_type));
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&self.db_pool).await?;
        rows.iter().map(|(raw,)| parse_id(raw)).collect()
    }

    async fn scoped_object_rows(
        &self,
        object_type: ObjectType,
    ) -> Result<Vec<(Uuid, Uuid, bool)>, AegisError> {
        let table = object_table(object_type);
        let sql = if object_type.is_library() {
            format!("SELECT id, folder_id, is_published FROM {}", table)
        } else {
            format!("SELECT id, folder_id, 0 FROM {}", table)
        };
        let rows: Vec<(String, String, bool)> =
            sqlx::query_as(&sql).fetch_all(&self.db_pool).await?;
        rows.iter()
            .map(|(id, folder_id, published)| Ok((parse_id(id)?, parse_id(folder_id)?, *published)))
            .collect()
    }

    /// True when the user can approve at least one risk acceptance
    /// somewhere, which is what makes them an eligible approver.
    pub async fn is_approver(&self, user: &User) -> Result<bool, AegisError> {
        self.has_permission_anywhere(user, APPROVE_RISK_ACCEPTANCE)
            .await
    }
}

// ---------------------------------------------------------------------------
// Seeding

/// Idempotently creates the builtin roles.
pub async fn seed_builtin_roles(stores: &Stores) -> Result<(), AegisError> {
    let now = Utc::now();
    for name in BUILTIN_ROLES {
        if stores.roles.get_by_name(name).await?.is_none() {
            let role = Role {
                id: Uuid::new_v4(),
                name: (*name).to_string(),
                builtin: true,
                permissions: builtin_role_permissions(name),
                created_at: now,
                updated_at: now,
            };
            stores.roles.create(&role).await?;
        }
    }
    Ok(())
}

/// Idempotently creates the root folder.
pub async fn seed_root_folder(stores: &Stores) -> Result<Folder, AegisError> {
    if let Some(root) = stores.folders.root().await? {
        return Ok(root);
    }
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
    stores.folders.create(&root).await?;
    Ok(root)
}

async fn ensure_builtin_group(
    stores: &Stores,
    folder: &Folder,
    group_name: &str,
    role_name: &str,
) -> Result<UserGroup, AegisError> {
    if let Some(group) = stores.user_groups.find_in_folder(folder.id, group_name).await? {
        return Ok(group);
    }
    let now = Utc::now();
    let group = UserGroup {
        id: Uuid::new_v4(),
        name: group_name.to_string(),
        folder_id: folder.id,
        builtin: true,
        created_at: now,
        updated_at: now,
    };
    stores.user_groups.create(&group).await?;

    let role = stores
        .roles
        .get_by_name(role_name)
        .await?
        .ok_or_else(|| AegisError::Internal(format!("Builtin role {} not seeded", role_name)))?;
    let assignment = RoleAssignment {
        id: Uuid::new_v4(),
        user_id: None,
        user_group_id: Some(group.id),
        role_id: role.id,
        folder_id: folder.id,
        is_recursive: true,
        perimeter_folder_ids: vec![folder.id],
        created_at: now,
        updated_at: now,
    };
    stores.role_assignments.create(&assignment).await?;
    Ok(group)
}

/// Administrators group in the root folder, with a recursive
/// administrator assignment over the whole tree.
pub async fn seed_admin_group(stores: &Stores, root: &Folder) -> Result<UserGroup, AegisError> {
    ensure_builtin_group(stores, root, GROUP_ADMINISTRATORS, ROLE_ADMINISTRATOR).await
}

/// Auditor, approver, analyst and domain manager groups scoped to a
/// newly created domain.
pub async fn create_domain_builtin_groups(
    stores: &Stores,
    folder: &Folder,
) -> Result<(), AegisError> {
    for (group_name, role_name) in DOMAIN_BUILTIN_GROUPS {
        ensure_builtin_group(stores, folder, group_name, role_name).await?;
    }
    Ok(())
}

/// Creates the bootstrap administrator account if it does not exist
/// and puts it in the administrators group.
pub async fn seed_bootstrap_admin(
    stores: &Stores,
    admin_group: &UserGroup,
    email: &str,
    password_hash: &str,
) -> Result<User, AegisError> {
    let user = match stores.users.get_by_email(email).await? {
        Some(user) => user,
        None => {
            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4(),
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
                password_hash: password_hash.to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            stores.users.create(&user).await?;
            user
        }
    };
    stores.user_groups.add_member(admin_group.id, user.id).await?;
    Ok(user)
}

/// Counts active members of the administrators group, for the
/// last-admin protections.
pub async fn active_admin_count(stores: &Stores) -> Result<usize, AegisError> {
    let root = match stores.folders.root().await? {
        Some(root) => root,
        None => return Ok(0),
    };
    let group = match stores
        .user_groups
        .find_in_folder(root.id, GROUP_ADMINISTRATORS)
        .await?
    {
        Some(group) => group,
        None => return Ok(0),
    };
    let mut count = 0;
    for user_id in stores.user_groups.members(group.id).await? {
        if let Some(user) = stores.users.get(user_id).await? {
            if user.is_active {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Is this user a member of the administrators group?
pub async fn is_admin_member(stores: &Stores, user_id: Uuid) -> Result<bool, AegisError> {
    let root = match stores.folders.root().await? {
        Some(root) => root,
        None => return Ok(false),
    };
    let group = match stores
        .user_groups
        .find_in_folder(root.id, GROUP_ADMINISTRATORS)
        .await?
    {
        Some(group) => group,
        None => return Ok(false),
    };
    Ok(stores.user_groups.members(group.id).await?.contains(&user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_role_permission_sets() {
        let admin = builtin_role_permissions(ROLE_ADMINISTRATOR);
        assert!(admin.contains(&"add_folder".to_string()));
        assert!(admin.contains(&APPROVE_RISK_ACCEPTANCE.to_string()));

        let auditor = builtin_role_permissions(ROLE_AUDITOR);
        assert!(auditor.contains(&"view_riskassessment".to_string()));
        assert!(auditor.iter().all(|p| p.starts_with("view_")));

        let approver = builtin_role_permissions(ROLE_APPROVER);
        assert!(approver.contains(&APPROVE_RISK_ACCEPTANCE.to_string()));
        assert!(approver.contains(&"change_riskacceptance".to_string()));
        assert!(!approver.contains(&"add_project".to_string()));

        let analyst = builtin_role_permissions(ROLE_ANALYST);
        assert!(analyst.contains(&"add_project".to_string()));
        assert!(analyst.contains(&"change_requirementassessment".to_string()));
        assert!(!analyst.contains(&"add_folder".to_string()));

        let domain_manager = builtin_role_permissions(ROLE_DOMAIN_MANAGER);
        assert!(domain_manager.contains(&"add_folder".to_string()));
        assert!(domain_manager.contains(&"add_roleassignment".to_string()));
        assert!(!domain_manager.contains(&APPROVE_RISK_ACCEPTANCE.to_string()));
    }

    #[test]
    fn test_folder_tree_subtree_and_ancestors() {
        let now = Utc::now();
        let make = |name: &str, parent: Option<Uuid>| Folder {
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
        };
        let root = make("root", None);
        let child = make("child", Some(root.id));
        let grandchild = make("grandchild", Some(child.id));
        let sibling = make("sibling", Some(root.id));

        let tree = FolderTree::build(&[
            root.clone(),
            child.clone(),
            grandchild.clone(),
            sibling.clone(),
        ]);

        let subtree = tree.subtree(root.id);
        assert_eq!(subtree.len(), 4);
        let child_subtree = tree.subtree(child.id);
        assert!(child_subtree.contains(&grandchild.id));
        assert!(!child_subtree.contains(&sibling.id));

        assert_eq!(tree.ancestors(grandchild.id), vec![child.id, root.id]);
        assert!(tree.ancestors(root.id).is_empty());
    }
}
