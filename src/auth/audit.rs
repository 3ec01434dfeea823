// Security event logging

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::iam::SecurityEvent;
use crate::store::SecurityEventStore;

/// Authentication activity worth an audit trail entry.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    LoginSuccess { email: String },
    LoginFailure { email: String, reason: String },
    TokenRejected { reason: String },
    Logout { email: String },
    PasswordChanged { email: String },
}

impl AuthEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::LoginSuccess { .. } => "LOGIN_SUCCESS",
            Self::LoginFailure { .. } => "LOGIN_FAILURE",
            Self::TokenRejected { .. } => "TOKEN_REJECTED",
            Self::Logout { .. } => "LOGOUT",
            Self::PasswordChanged { .. } => "PASSWORD_CHANGED",
        }
    }

    fn email(&self) -> Option<&str> {
        match self {
            Self::LoginSuccess { email }
            | Self::LoginFailure { email, .. }
            | Self::Logout { email }
            | Self::PasswordChanged { email } => Some(email),
            Self::TokenRejected { .. } => None,
        }
    }
}

/// Fire-and-forget audit logger: events are written from a spawned
/// task so the request path never blocks on the audit trail, and a
/// write failure is logged rather than surfaced.
#[derive(Clone)]
pub struct SecurityEventLogger {
    store: SecurityEventStore,
}

impl SecurityEventLogger {
    pub fn new(store: SecurityEventStore) -> Self {
        Self { store }
    }

    pub fn log(&self, event: AuthEvent, ip_address: Option<&str>, user_agent: Option<&str>) {
        let store = self.store.clone();
        let ip = ip_address.map(str::to_string);
        let ua = user_agent.map(str::to_string);

        tokio::spawn(async move {
            match &event {
                AuthEvent::LoginFailure { email, reason } => {
                    warn!(
                        email = %email,
                        ip_address = ?ip,
                        user_agent = ?ua,
                        reason = %reason,
                        "Authentication failed"
                    );
                }
                AuthEvent::TokenRejected { reason } => {
                    warn!(
                        ip_address = ?ip,
                        user_agent = ?ua,
                        reason = %reason,
                        "Token rejected"
                    );
                }
                other => {
                    info!(
                        email = ?other.email(),
                        ip_address = ?ip,
                        user_agent = ?ua,
                        event = other.event_type(),
                        "Security event"
                    );
                }
            }

            let record = SecurityEvent {
                id: Uuid::new_v4(),
                user_email: event.email().map(str::to_string),
                event_type: event.event_type().to_string(),
                ip_address: ip,
                user_agent: ua,
                created_at: Utc::now(),
            };
            if let Err(e) = store.record(&record).await {
                warn!(error = %e, "Failed to write security event");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn test_events_are_persisted() {
        let pool = connect_in_memory().await.unwrap();
        let store = SecurityEventStore::new(pool);
        let logger = SecurityEventLogger::new(store.clone());

        logger.log(
            AuthEvent::LoginFailure {
                email: "jdoe@acme.org".to_string(),
                reason: "bad credentials".to_string(),
            },
            Some("127.0.0.1"),
            Some("test-agent"),
        );

        // The write happens on a spawned task.
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let events = store.recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "LOGIN_FAILURE");
        assert_eq!(events[0].user_email.as_deref(), Some("jdoe@acme.org"));
    }
}
