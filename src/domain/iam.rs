// Users, groups, roles and role assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// "First Last" if names are set, the email otherwise.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: Uuid,
    pub name: String,
    pub folder_id: Uuid,
    pub builtin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub builtin: bool,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Binds a user (or a whole group) to a role over a set of perimeter
/// folders. `folder_id` is where the assignment itself lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_group_id: Option<Uuid>,
    pub role_id: Uuid,
    pub folder_id: Uuid,
    pub is_recursive: bool,
    pub perimeter_folder_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleAssignment {
    /// An assignment must target exactly one of user / user group.
    pub fn is_well_formed(&self) -> bool {
        self.user_id.is_some() != self.user_group_id.is_some()
    }
}

/// Server-side login session. Only the SHA-256 hash of the bearer
/// token is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Append-only audit record of authentication activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_email: Option<String>,
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn assignment(user: Option<Uuid>, group: Option<Uuid>) -> RoleAssignment {
        RoleAssignment {
            id: Uuid::new_v4(),
            user_id: user,
            user_group_id: group,
            role_id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            is_recursive: false,
            perimeter_folder_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_assignment_target_exclusivity() {
        assert!(assignment(Some(Uuid::new_v4()), None).is_well_formed());
        assert!(assignment(None, Some(Uuid::new_v4())).is_well_formed());
        assert!(!assignment(None, None).is_well_formed());
        assert!(!assignment(Some(Uuid::new_v4()), Some(Uuid::new_v4())).is_well_formed());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = User {
            id: Uuid::new_v4(),
            email: "jdoe@acme.org".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(user.display_name(), "jdoe@acme.org");
    }
}
