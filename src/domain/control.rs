// Reference controls and applied controls (mitigations)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCategory {
    Policy,
    Process,
    Technical,
    Physical,
}

impl ControlCategory {
    pub const ALL: &'static [Self] = &[Self::Policy, Self::Process, Self::Technical, Self::Physical];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Process => "process",
            Self::Technical => "technical",
            Self::Physical => "physical",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Policy => "Policy",
            Self::Process => "Process",
            Self::Technical => "Technical",
            Self::Physical => "Physical",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for ControlCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NIST CSF 2.0 function attached to a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsfFunction {
    Govern,
    Identify,
    Protect,
    Detect,
    Respond,
    Recover,
}

impl CsfFunction {
    pub const ALL: &'static [Self] = &[
        Self::Govern,
        Self::Identify,
        Self::Protect,
        Self::Detect,
        Self::Respond,
        Self::Recover,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Govern => "govern",
            Self::Identify => "identify",
            Self::Protect => "protect",
            Self::Detect => "detect",
            Self::Respond => "respond",
            Self::Recover => "recover",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Govern => "Govern",
            Self::Identify => "Identify",
            Self::Protect => "Protect",
            Self::Detect => "Detect",
            Self::Respond => "Respond",
            Self::Recover => "Recover",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for CsfFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    ToDo,
    InProgress,
    OnHold,
    Active,
    Deprecated,
}

impl ControlStatus {
    pub const ALL: &'static [Self] = &[
        Self::ToDo,
        Self::InProgress,
        Self::OnHold,
        Self::Active,
        Self::Deprecated,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "to_do",
            Self::InProgress => "in_progress",
            Self::OnHold => "on_hold",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ToDo => "To do",
            Self::InProgress => "In progress",
            Self::OnHold => "On hold",
            Self::Active => "Active",
            Self::Deprecated => "Deprecated",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlEffort {
    S,
    M,
    L,
    #[serde(rename = "XL")]
    Xl,
}

impl ControlEffort {
    pub const ALL: &'static [Self] = &[Self::S, Self::M, Self::L, Self::Xl];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::Xl => "XL",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::S => "Small",
            Self::M => "Medium",
            Self::L => "Large",
            Self::Xl => "Extra Large",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Divisor applied to the urgency component of the ranking score.
    const fn weight(self) -> i64 {
        match self {
            Self::S => 1,
            Self::M => 2,
            Self::L => 4,
            Self::Xl => 8,
        }
    }
}

impl fmt::Display for ControlEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry a control can be derived from (library object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceControl {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub ref_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<ControlCategory>,
    pub csf_function: Option<CsfFunction>,
    pub provider: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A mitigation in place or planned, linkable to risk scenarios and
/// requirement assessments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedControl {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<ControlCategory>,
    pub csf_function: Option<CsfFunction>,
    pub status: Option<ControlStatus>,
    pub eta: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub effort: Option<ControlEffort>,
    pub cost: Option<f64>,
    pub link: Option<String>,
    pub reference_control_id: Option<Uuid>,
    pub evidence_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppliedControl {
    /// Urgency-first priority score used to order the todo list.
    ///
    /// Controls past or near their ETA rank highest, large efforts are
    /// dampened, each linked object adds a constant bump.
    pub fn ranking_score(&self, linked_objects: usize, today: NaiveDate) -> i64 {
        let urgency = match self.eta {
            Some(eta) => {
                let days = (eta - today).num_days();
                if days < 0 {
                    40
                } else {
                    (31 - days).max(0)
                }
            }
            None => 0,
        };
        let weight = self.effort.map_or(4, ControlEffort::weight);
        urgency * 100 / weight + linked_objects as i64 * 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn control(eta: Option<NaiveDate>, effort: Option<ControlEffort>) -> AppliedControl {
        AppliedControl {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            name: "test".to_string(),
            description: None,
            category: None,
            csf_function: None,
            status: Some(ControlStatus::ToDo),
            eta,
            expiry_date: None,
            effort,
            cost: None,
            link: None,
            reference_control_id: None,
            evidence_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_overdue_beats_upcoming() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let overdue = control(NaiveDate::from_ymd_opt(2024, 5, 1), Some(ControlEffort::S));
        let upcoming = control(NaiveDate::from_ymd_opt(2024, 6, 20), Some(ControlEffort::S));

        assert!(overdue.ranking_score(0, today) > upcoming.ranking_score(0, today));
    }

    #[test]
    fn test_small_effort_beats_large_effort() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let eta = NaiveDate::from_ymd_opt(2024, 6, 10);
        let small = control(eta, Some(ControlEffort::S));
        let large = control(eta, Some(ControlEffort::Xl));

        assert!(small.ranking_score(0, today) > large.ranking_score(0, today));
    }

    #[test]
    fn test_links_raise_score() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let c = control(None, None);

        assert_eq!(c.ranking_score(0, today), 0);
        assert_eq!(c.ranking_score(3, today), 30);
    }

    #[test]
    fn test_effort_serde_uppercase_xl() {
        let json = serde_json::to_string(&ControlEffort::Xl).unwrap();
        assert_eq!(json, "\"XL\"");
    }
}
