// Assets under risk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Primary assets carry the business value; support assets carry primary ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "PR")]
    Primary,
    #[serde(rename = "SP")]
    Support,
}

impl AssetType {
    pub const ALL: &'static [Self] = &[Self::Primary, Self::Support];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "PR",
            Self::Support => "SP",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Support => "Support",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PR" => Some(Self::Primary),
            "SP" => Some(Self::Support),
            _ => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub business_value: Option<String>,
    pub asset_type: AssetType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
