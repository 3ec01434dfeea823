// Session endpoints: login, logout, current user

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::responses::ApiError;
use crate::api::AppState;
use crate::auth::audit::AuthEvent;
use crate::auth::token::SessionToken;
use crate::auth::password::verify_password;
use crate::domain::iam::{Session, User};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .or_else(|| headers.get("X-Real-IP"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn client_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `POST /api/iam/login`. Failures all map to the same 401 so the
/// response does not reveal which part of the credentials was wrong.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let ip = client_ip(&headers);
    let agent = client_agent(&headers);

    let reject = |reason: &str| {
        state.audit.log(
            AuthEvent::LoginFailure {
                email: request.email.clone(),
                reason: reason.to_string(),
            },
            ip.as_deref(),
            agent.as_deref(),
        );
        crate::core::metrics::record_login("failure");
        ApiError::from(crate::core::errors::AegisError::Unauthorized)
    };

    let user = match state.stores.users.get_by_email(&request.email).await? {
        Some(user) => user,
        None => return Err(reject("Unknown email")),
    };
    if !user.is_active {
        return Err(reject("Inactive account"));
    }
    if !verify_password(&request.password, &user.password_hash) {
        return Err(reject("Bad password"));
    }

    let token = SessionToken::generate()?;
    let now = Utc::now();
    let session = Session {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: token.hash().as_str().to_string(),
        created_at: now,
        expires_at: now + Duration::seconds(state.config.session_ttl_secs as i64),
    };
    state.stores.sessions.create(&session).await?;

    state.audit.log(
        AuthEvent::LoginSuccess {
            email: user.email.clone(),
        },
        ip.as_deref(),
        agent.as_deref(),
    );
    crate::core::metrics::record_login("success");

    Ok(Json(json!({
        "token": token.expose_secret(),
        "expires_at": session.expires_at,
        "user": {
            "id": user.id,
            "email": user.email,
            "first_name": user.first_name,
            "last_name": user.last_name,
        },
    })))
}

/// `POST /api/iam/logout` deletes the session behind the presented
/// token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if let Some(raw) = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Token "))
    {
        let token = SessionToken::new(raw.trim());
        state
            .stores
            .sessions
            .delete_by_token_hash(token.hash().as_str())
            .await?;
    }

    state.audit.log(
        AuthEvent::Logout {
            email: user.email.clone(),
        },
        client_ip(&headers).as_deref(),
        client_agent(&headers).as_deref(),
    );

    Ok(Json(json!({"detail": "Successfully logged out"})))
}

/// `GET /api/iam/current-user`.
pub async fn current_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ApiError> {
    let is_approver = state.engine.is_approver(&user).await?;
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "is_active": user.is_active,
        "is_approver": is_approver,
    })))
}
