// Folder hierarchy - the permission scoping unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Folder kind: exactly one GLOBAL root, domains below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderContentType {
    Global,
    Domain,
}

impl FolderContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Domain => "DOMAIN",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GLOBAL" => Some(Self::Global),
            "DOMAIN" => Some(Self::Domain),
            _ => None,
        }
    }
}

impl fmt::Display for FolderContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub content_type: FolderContentType,
    pub parent_id: Option<Uuid>,
    pub builtin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    pub fn is_root(&self) -> bool {
        self.content_type == FolderContentType::Global
    }
}
