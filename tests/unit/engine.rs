// Access engine resolution over a seeded folder tree.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use aegis_grc::db;
use aegis_grc::domain::compliance::Framework;
use aegis_grc::domain::folder::{Folder, FolderContentType};
use aegis_grc::domain::iam::User;
use aegis_grc::domain::project::{LcStatus, Project};
use aegis_grc::domain::ObjectType;
use aegis_grc::iam::{
    self, AccessEngine, GROUP_ANALYSTS, GROUP_APPROVERS, GROUP_AUDITORS,
};
use aegis_grc::store::Stores;

struct Setup {
    stores: Arc<Stores>,
    engine: AccessEngine,
    root: Folder,
    admin: User,
}

async fn setup() -> Setup {
    let pool: SqlitePool = db::connect_in_memory().await.unwrap();
    let stores = Arc::new(Stores::new(pool.clone()));
    iam::seed_builtin_roles(&stores).await.unwrap();
    let root = iam::seed_root_folder(&stores).await.unwrap();
    let admin_group = iam::seed_admin_group(&stores, &root).await.unwrap();
    let admin = iam::seed_bootstrap_admin(&stores, &admin_group, "root@example.net", "x")
        .await
        .unwrap();
    Setup {
        stores,
        engine: AccessEngine::new(pool),
        root,
        admin,
    }
}

async fn make_domain(setup: &Setup, name: &str) -> Folder {
    let now = Utc::now();
    let folder = Folder {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        content_type: FolderContentType::Domain,
        parent_id: Some(setup.root.id),
        builtin: false,
        created_at: now,
        updated_at: now,
    };
    setup.stores.folders.create(&folder).await.unwrap();
    iam::create_domain_builtin_groups(&setup.stores, &folder)
        .await
        .unwrap();
    folder
}

async fn make_user(setup: &Setup, email: &str) -> User {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        password_hash: "x".to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    setup.stores.users.create(&user).await.unwrap();
    user
}

async fn join(setup: &Setup, folder_id: Uuid, group_name: &str, user_id: Uuid) {
    let group = setup
        .stores
        .user_groups
        .find_in_folder(folder_id, group_name)
        .await
        .unwrap()
        .unwrap();
    setup
        .stores
        .user_groups
        .add_member(group.id, user_id)
        .await
        .unwrap();
}

async fn make_project(setup: &Setup, folder_id: Uuid, name: &str) -> Project {
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        folder_id,
        name: name.to_string(),
        description: None,
        internal_reference: None,
        lc_status: LcStatus::InDesign,
        created_at: now,
        updated_at: now,
    };
    setup.stores.projects.create(&project).await.unwrap();
    project
}

async fn make_framework(setup: &Setup, folder_id: Uuid, published: bool) -> Framework {
    let now = Utc::now();
    let framework = Framework {
        id: Uuid::new_v4(),
        folder_id,
        ref_id: None,
        name: if published { "published" } else { "draft" }.to_string(),
        description: None,
        provider: None,
        is_published: published,
        min_score: 0,
        max_score: 100,
        scores_definition: None,
        implementation_groups_definition: None,
        created_at: now,
        updated_at: now,
    };
    setup.stores.frameworks.create(&framework).await.unwrap();
    framework
}

#[tokio::test]
async fn test_analyst_access_is_domain_bound() {
    let setup = setup().await;
    let domain_a = make_domain(&setup, "A").await;
    let domain_b = make_domain(&setup, "B").await;
    let project_a = make_project(&setup, domain_a.id, "PA").await;
    let project_b = make_project(&setup, domain_b.id, "PB").await;

    let analyst = make_user(&setup, "analyst@example.net").await;
    join(&setup, domain_a.id, GROUP_ANALYSTS, analyst.id).await;

    let access = setup
        .engine
        .accessible_object_ids(&analyst, ObjectType::Project)
        .await
        .unwrap();
    assert!(access.view.contains(&project_a.id));
    assert!(access.change.contains(&project_a.id));
    assert!(!access.view.contains(&project_b.id));
    assert!(!access.change.contains(&project_b.id));
}

#[tokio::test]
async fn test_auditor_cannot_change() {
    let setup = setup().await;
    let domain = make_domain(&setup, "A").await;
    let project = make_project(&setup, domain.id, "PA").await;

    let auditor = make_user(&setup, "auditor@example.net").await;
    join(&setup, domain.id, GROUP_AUDITORS, auditor.id).await;

    let access = setup
        .engine
        .accessible_object_ids(&auditor, ObjectType::Project)
        .await
        .unwrap();
    assert!(access.view.contains(&project.id));
    assert!(access.change.is_empty());
    assert!(access.delete.is_empty());
}

#[tokio::test]
async fn test_published_library_objects_visible_from_ancestor_folders() {
    let setup = setup().await;
    let domain = make_domain(&setup, "A").await;
    // Library objects live in the root folder, above the analyst's domain.
    let published = make_framework(&setup, setup.root.id, true).await;
    let draft = make_framework(&setup, setup.root.id, false).await;

    let analyst = make_user(&setup, "analyst@example.net").await;
    join(&setup, domain.id, GROUP_ANALYSTS, analyst.id).await;

    let access = setup
        .engine
        .accessible_object_ids(&analyst, ObjectType::Framework)
        .await
        .unwrap();
    assert!(access.view.contains(&published.id));
    assert!(!access.view.contains(&draft.id));
    // Visibility through publication never grants mutation.
    assert!(!access.change.contains(&published.id));

    let scope = setup
        .engine
        .view_scope(&analyst, ObjectType::Framework)
        .await
        .unwrap();
    assert!(scope.contains(&setup.root.id));
}

#[tokio::test]
async fn test_approver_eligibility() {
    let setup = setup().await;
    let domain = make_domain(&setup, "A").await;

    let approver = make_user(&setup, "approver@example.net").await;
    join(&setup, domain.id, GROUP_APPROVERS, approver.id).await;
    let analyst = make_user(&setup, "analyst@example.net").await;
    join(&setup, domain.id, GROUP_ANALYSTS, analyst.id).await;

    assert!(setup.engine.is_approver(&approver).await.unwrap());
    assert!(!setup.engine.is_approver(&analyst).await.unwrap());
    assert!(setup.engine.is_approver(&setup.admin).await.unwrap());
}

#[tokio::test]
async fn test_administrator_sees_all_domains() {
    let setup = setup().await;
    let domain_a = make_domain(&setup, "A").await;
    let domain_b = make_domain(&setup, "B").await;
    let project_a = make_project(&setup, domain_a.id, "PA").await;
    let project_b = make_project(&setup, domain_b.id, "PB").await;

    let access = setup
        .engine
        .accessible_object_ids(&setup.admin, ObjectType::Project)
        .await
        .unwrap();
    assert!(access.view.contains(&project_a.id));
    assert!(access.view.contains(&project_b.id));
    assert!(access.delete.contains(&project_b.id));
}

#[tokio::test]
async fn test_builtin_role_permission_sets() {
    let admin = iam::builtin_role_permissions(iam::ROLE_ADMINISTRATOR);
    assert!(admin.contains(&iam::APPROVE_RISK_ACCEPTANCE.to_string()));
    let auditor = iam::builtin_role_permissions(iam::ROLE_AUDITOR);
    assert!(auditor.iter().all(|p| p.starts_with("view_")));
    let approver = iam::builtin_role_permissions(iam::ROLE_APPROVER);
    assert!(approver.contains(&iam::APPROVE_RISK_ACCEPTANCE.to_string()));
}
