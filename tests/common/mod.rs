// Shared test harness: in-memory database, seeded IAM objects, router.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use aegis_grc::api::cache::ResponseCache;
use aegis_grc::api::{create_router, AppState};
use aegis_grc::auth::{password, AuthState, SecurityEventLogger};
use aegis_grc::config::Config;
use aegis_grc::db;
use aegis_grc::domain::compliance::{Framework, RequirementNode};
use aegis_grc::iam::{self, AccessEngine};
use aegis_grc::store::Stores;

pub const ADMIN_EMAIL: &str = "admin@example.net";
pub const ADMIN_PASSWORD: &str = "admin-test-password";

pub struct TestApp {
    pub router: Router,
    pub stores: Arc<Stores>,
    pub root_id: Uuid,
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        database_max_connections: 1,
        library_path: None,
        bootstrap_admin_email: None,
        bootstrap_admin_password: None,
        session_ttl_secs: 3600,
        request_timeout_secs: 30,
        body_size_limit_bytes: 8 * 1024 * 1024,
        attachment_size_limit_bytes: 1024 * 1024,
        log_level: "warn".to_string(),
        log_format: "text".to_string(),
    }
}

/// Fresh application over an in-memory database, with builtin roles, the
/// root folder, the administrator group and one administrator account.
pub async fn spawn() -> TestApp {
    let pool = db::connect_in_memory().await.unwrap();
    let stores = Arc::new(Stores::new(pool.clone()));

    iam::seed_builtin_roles(&stores).await.unwrap();
    let root = iam::seed_root_folder(&stores).await.unwrap();
    let admin_group = iam::seed_admin_group(&stores, &root).await.unwrap();
    let hash = password::hash_password(ADMIN_PASSWORD).unwrap();
    iam::seed_bootstrap_admin(&stores, &admin_group, ADMIN_EMAIL, &hash)
        .await
        .unwrap();

    let audit = SecurityEventLogger::new(stores.security_events.clone());
    let auth_state = Arc::new(AuthState {
        sessions: stores.sessions.clone(),
        users: stores.users.clone(),
        audit: audit.clone(),
    });
    let app_state = AppState {
        stores: stores.clone(),
        engine: AccessEngine::new(pool),
        cache: ResponseCache::new(),
        audit,
        config: Arc::new(test_config()),
    };
    let router = create_router(app_state, auth_state);

    TestApp {
        router,
        stores,
        root_id: root.id,
    }
}

pub async fn send(
    app: &TestApp,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Token {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get(app: &TestApp, token: &str, path: &str) -> (StatusCode, Value) {
    let response = send(app, "GET", path, Some(token), None).await;
    let status = response.status();
    let body = body_json(response).await;
    (status, body)
}

pub async fn post(app: &TestApp, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = send(app, "POST", path, Some(token), Some(body)).await;
    let status = response.status();
    let body = body_json(response).await;
    (status, body)
}

pub async fn patch(app: &TestApp, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = send(app, "PATCH", path, Some(token), Some(body)).await;
    let status = response.status();
    let body = body_json(response).await;
    (status, body)
}

pub async fn delete(app: &TestApp, token: &str, path: &str) -> StatusCode {
    send(app, "DELETE", path, Some(token), None).await.status()
}

/// Raw-body POST for attachment uploads. `filename` lands in the
/// `Content-Disposition` header when given.
pub async fn upload(
    app: &TestApp,
    token: &str,
    path: &str,
    filename: Option<&str>,
    bytes: Vec<u8>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Authorization", format!("Token {token}"))
        .header("Content-Type", "application/octet-stream");
    if let Some(filename) = filename {
        builder = builder.header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        );
    }
    let request = builder.body(Body::from(bytes)).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = body_json(response).await;
    (status, body)
}

pub async fn login(app: &TestApp, email: &str, password: &str) -> String {
    let response = send(
        app,
        "POST",
        "/api/iam/login",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["token"].as_str().unwrap().to_string()
}

pub async fn admin_token(app: &TestApp) -> String {
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

pub fn id_of(body: &Value) -> Uuid {
    body["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap()
}

pub async fn create_domain(app: &TestApp, token: &str, name: &str) -> Uuid {
    let (status, body) = post(app, token, "/api/folders", json!({"name": name})).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

pub async fn create_project(app: &TestApp, token: &str, folder: Uuid, name: &str) -> Uuid {
    let (status, body) = post(
        app,
        token,
        "/api/projects",
        json!({"name": name, "folder": folder}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

/// A well-formed 3x3 matrix definition.
pub fn matrix_definition() -> Value {
    json!({
        "probability": [
            {"name": "Low"},
            {"name": "Medium"},
            {"name": "High"}
        ],
        "impact": [
            {"name": "Low"},
            {"name": "Medium"},
            {"name": "High"}
        ],
        "risk": [
            {"name": "Low", "hexcolor": "#92D050"},
            {"name": "Medium", "hexcolor": "#FFC000"},
            {"name": "High", "hexcolor": "#FF0000"}
        ],
        "grid": [
            [0, 0, 1],
            [0, 1, 2],
            [1, 2, 2]
        ]
    })
}

pub async fn create_matrix(app: &TestApp, token: &str, folder: Uuid, name: &str) -> Uuid {
    let (status, body) = post(
        app,
        token,
        "/api/risk-matrices",
        json!({
            "name": name,
            "folder": folder,
            "json_definition": matrix_definition(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

/// Id of a builtin group (`BI-UG-*`) in the given domain.
pub async fn builtin_group_id(app: &TestApp, token: &str, domain: Uuid, name: &str) -> Uuid {
    let (status, body) = get(app, token, &format!("/api/user-groups?folder={domain}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let group = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["name"] == name)
        .cloned()
        .unwrap();
    id_of(&group)
}

/// Create a user and drop them into one builtin group of the domain.
pub async fn create_member(
    app: &TestApp,
    admin_token: &str,
    domain: Uuid,
    group_name: &str,
    email: &str,
    password: &str,
) -> Uuid {
    let group = builtin_group_id(app, admin_token, domain, group_name).await;
    let (status, body) = post(
        app,
        admin_token,
        "/api/users",
        json!({
            "email": email,
            "password": password,
            "user_groups": [group],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

/// Seed a small framework directly through the stores: one section node
/// and two assessable leaves, the second restricted to group "B".
pub async fn seed_framework(app: &TestApp) -> (Uuid, Vec<Uuid>) {
    let now = Utc::now();
    let framework = Framework {
        id: Uuid::new_v4(),
        folder_id: app.root_id,
        ref_id: Some("TEST-FWK".to_string()),
        name: "Test framework".to_string(),
        description: None,
        provider: None,
        is_published: true,
        min_score: 0,
        max_score: 4,
        scores_definition: Some(
            json!([
                {"score": 0, "name": "None", "description": null},
                {"score": 4, "name": "Full", "description": null}
            ])
            .to_string(),
        ),
        implementation_groups_definition: Some(
            json!([
                {"ref_id": "A", "name": "Baseline", "description": null},
                {"ref_id": "B", "name": "Extended", "description": null}
            ])
            .to_string(),
        ),
        created_at: now,
        updated_at: now,
    };
    app.stores.frameworks.create(&framework).await.unwrap();

    let mut node_ids = Vec::new();
    let nodes = [
        ("urn:test:section", None, "1", false, None),
        ("urn:test:req-1", Some("urn:test:section"), "1.1", true, None),
        (
            "urn:test:req-2",
            Some("urn:test:section"),
            "1.2",
            true,
            Some(json!(["B"]).to_string()),
        ),
    ];
    for (order, (urn, parent, ref_id, assessable, groups)) in nodes.into_iter().enumerate() {
        let node = RequirementNode {
            id: Uuid::new_v4(),
            folder_id: app.root_id,
            framework_id: framework.id,
            urn: urn.to_string(),
            parent_urn: parent.map(str::to_string),
            ref_id: Some(ref_id.to_string()),
            name: Some(format!("Requirement {ref_id}")),
            description: None,
            order_id: order as i64,
            assessable,
            implementation_groups: groups,
            reference_control_ids: Vec::new(),
            threat_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        app.stores.requirement_nodes.create(&node).await.unwrap();
        node_ids.push(node.id);
    }

    (framework.id, node_ids)
}
