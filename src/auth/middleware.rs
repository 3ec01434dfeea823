// Axum authentication middleware

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::error;

use crate::api::responses::ErrorResponse;
use crate::auth::audit::{AuthEvent, SecurityEventLogger};
use crate::auth::token::SessionToken;
use crate::domain::iam::User;
use crate::store::{SessionStore, UserStore};

/// Authentication state shared by the middleware.
#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionStore,
    pub users: UserStore,
    pub audit: SecurityEventLogger,
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
            request_id: None,
        }),
    )
}

/// Authentication middleware.
///
/// Extracts the bearer token from `Authorization: Token <token>`,
/// resolves it to a live session and an active user, and stores the
/// user in request extensions for handlers.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token_str = extract_token(request.headers())
        .ok_or_else(|| unauthorized("Missing authentication token"))?;

    let token = SessionToken::new(&token_str);
    let token_hash = token.hash();

    let session = match auth_state.sessions.get_by_token_hash(token_hash.as_str()).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            auth_state.audit.log(
                AuthEvent::TokenRejected {
                    reason: "Unknown token".to_string(),
                },
                extract_ip_address(&request).as_deref(),
                extract_user_agent(&request).as_deref(),
            );
            return Err(unauthorized("Invalid authentication token"));
        }
        Err(e) => {
            error!(error = %e, "Session lookup failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.user_message(),
                    request_id: None,
                }),
            ));
        }
    };

    if session.is_expired(Utc::now()) {
        // Expired sessions are reaped lazily on first use.
        if let Err(e) = auth_state
            .sessions
            .delete_by_token_hash(token_hash.as_str())
            .await
        {
            error!(error = %e, "Failed to delete expired session");
        }
        return Err(unauthorized("Session expired"));
    }

    let user = match auth_state.users.get(session.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(unauthorized("Invalid authentication token")),
        Err(e) => {
            error!(error = %e, "User lookup failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.user_message(),
                    request_id: None,
                }),
            ));
        }
    };

    if !user.is_active {
        auth_state.audit.log(
            AuthEvent::LoginFailure {
                email: user.email.clone(),
                reason: "Inactive account".to_string(),
            },
            extract_ip_address(&request).as_deref(),
            extract_user_agent(&request).as_deref(),
        );
        return Err(unauthorized("Account is disabled"));
    }

    request.extensions_mut().insert::<User>(user);
    Ok(next.run(request).await)
}

/// `Authorization: Token <token>` header value.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Token "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Client IP, honoring `X-Forwarded-For` then `X-Real-IP`.
pub fn extract_ip_address(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-Forwarded-For")
        .or_else(|| request.headers().get("X-Real-IP"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_user_agent(request: &Request) -> Option<String> {
    request
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Token abc123".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers), None);

        headers.insert("Authorization", "Token ".parse().unwrap());
        assert_eq!(extract_token(&headers), None);

        assert_eq!(extract_token(&HeaderMap::new()), None);
    }
}
