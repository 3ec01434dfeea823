// Projects group assessments inside a domain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LcStatus {
    Undefined,
    InDesign,
    InDev,
    InProd,
    Eol,
    Dropped,
}

impl LcStatus {
    pub const ALL: &'static [Self] = &[
        Self::Undefined,
        Self::InDesign,
        Self::InDev,
        Self::InProd,
        Self::Eol,
        Self::Dropped,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::InDesign => "in_design",
            Self::InDev => "in_dev",
            Self::InProd => "in_prod",
            Self::Eol => "eol",
            Self::Dropped => "dropped",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Undefined => "--",
            Self::InDesign => "Design",
            Self::InDev => "Development",
            Self::InProd => "Production",
            Self::Eol => "End of life",
            Self::Dropped => "Dropped",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for LcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub internal_reference: Option<String>,
    pub lc_status: LcStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
