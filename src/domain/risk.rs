// Risk assessments, scenarios and the acceptance workflow

use crate::domain::AssessmentStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub project_id: Uuid,
    pub risk_matrix_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub status: AssessmentStatus,
    pub eta: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Risk treatment decision for a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    Open,
    Mitigate,
    Accept,
    Avoid,
    Transfer,
}

impl Treatment {
    pub const ALL: &'static [Self] = &[
        Self::Open,
        Self::Mitigate,
        Self::Accept,
        Self::Avoid,
        Self::Transfer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Mitigate => "mitigate",
            Self::Accept => "accept",
            Self::Avoid => "avoid",
            Self::Transfer => "transfer",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Mitigate => "Mitigate",
            Self::Accept => "Accept",
            Self::Avoid => "Avoid",
            Self::Transfer => "Transfer",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualification tags a scenario can carry, `(value, label)`.
pub const QUALIFICATIONS: &[(&str, &str)] = &[
    ("confidentiality", "Confidentiality"),
    ("integrity", "Integrity"),
    ("availability", "Availability"),
    ("proof", "Proof"),
    ("authenticity", "Authenticity"),
    ("privacy", "Privacy"),
    ("safety", "Safety"),
    ("reputation", "Reputation"),
    ("operational", "Operational"),
    ("legal", "Legal"),
    ("financial", "Financial"),
];

/// A risk identified within an assessment. Probability/impact use -1 for
/// "not rated yet"; levels are resolved against the assessment's matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScenario {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub risk_assessment_id: Uuid,
    pub ref_id: String,
    pub name: String,
    pub description: Option<String>,
    pub existing_controls: Option<String>,
    pub treatment: Treatment,
    pub qualifications: Vec<String>,
    pub current_proba: i64,
    pub current_impact: i64,
    pub residual_proba: i64,
    pub residual_impact: i64,
    pub strength_of_knowledge: i64,
    pub justification: Option<String>,
    pub threat_ids: Vec<Uuid>,
    pub asset_ids: Vec<Uuid>,
    pub applied_control_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiskScenario {
    /// Scenario reference for a 1-based position: R.1, R.2, ...
    pub fn make_ref_id(position: usize) -> String {
        format!("R.{}", position)
    }
}

/// Acceptance lifecycle.
///
/// ```text
/// created → submitted → accepted → revoked
///                     → rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceState {
    Created,
    Submitted,
    Accepted,
    Rejected,
    Revoked,
}

impl AcceptanceState {
    pub const ALL: &'static [Self] = &[
        Self::Created,
        Self::Submitted,
        Self::Accepted,
        Self::Rejected,
        Self::Revoked,
    ];

    /// Valid next states from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Submitted],
            Self::Submitted => &[Self::Accepted, Self::Rejected],
            Self::Accepted => &[Self::Revoked],
            Self::Rejected | Self::Revoked => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Revoked => "revoked",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Submitted => "Submitted",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Revoked => "Revoked",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for AcceptanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAcceptance {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub approver_id: Option<Uuid>,
    pub state: AcceptanceState,
    pub expiry_date: Option<NaiveDate>,
    pub justification: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub risk_scenario_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_state_machine() {
        assert!(AcceptanceState::Submitted.can_transition_to(AcceptanceState::Accepted));
        assert!(AcceptanceState::Submitted.can_transition_to(AcceptanceState::Rejected));
        assert!(AcceptanceState::Accepted.can_transition_to(AcceptanceState::Revoked));
        assert!(!AcceptanceState::Rejected.can_transition_to(AcceptanceState::Accepted));
        assert!(!AcceptanceState::Created.can_transition_to(AcceptanceState::Accepted));
    }

    #[test]
    fn test_scenario_ref_id() {
        assert_eq!(RiskScenario::make_ref_id(1), "R.1");
        assert_eq!(RiskScenario::make_ref_id(12), "R.12");
    }

    #[test]
    fn test_qualifications_are_unique() {
        let mut values: Vec<&str> = QUALIFICATIONS.iter().map(|(v, _)| *v).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), QUALIFICATIONS.len());
    }
}
