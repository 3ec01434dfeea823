// Frameworks, requirement trees and compliance audits

use crate::domain::AssessmentStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One step of a framework's scoring scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDefinition {
    pub score: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Implementation group declared by a framework (e.g. IG1/IG2/IG3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationGroup {
    pub ref_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub ref_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub is_published: bool,
    pub min_score: i64,
    pub max_score: i64,
    /// JSON array of `ScoreDefinition`, empty string when absent.
    pub scores_definition: Option<String>,
    /// JSON array of `ImplementationGroup`, when the framework declares any.
    pub implementation_groups_definition: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Framework {
    pub fn scores(&self) -> Vec<ScoreDefinition> {
        self.scores_definition
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn implementation_groups(&self) -> Vec<ImplementationGroup> {
        self.implementation_groups_definition
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Node of a framework's requirement tree. Ordering inside a parent is
/// `order_id`; only assessable nodes get requirement assessments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementNode {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub framework_id: Uuid,
    pub urn: String,
    pub parent_urn: Option<String>,
    pub ref_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub order_id: i64,
    pub assessable: bool,
    /// JSON array of implementation group ref_ids, when restricted.
    pub implementation_groups: Option<String>,
    pub reference_control_ids: Vec<Uuid>,
    pub threat_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequirementNode {
    pub fn implementation_group_refs(&self) -> Vec<String> {
        self.implementation_groups
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// A node is in scope when it has no group restriction or intersects
    /// the selected groups.
    pub fn in_selected_groups(&self, selected: &[String]) -> bool {
        let own = self.implementation_group_refs();
        if own.is_empty() || selected.is_empty() {
            return true;
        }
        own.iter().any(|g| selected.contains(g))
    }

    pub fn display_title(&self) -> String {
        match (&self.ref_id, &self.name) {
            (Some(ref_id), Some(name)) => format!("{} - {}", ref_id, name),
            (Some(ref_id), None) => ref_id.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => self.urn.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingCoverage {
    Full,
    Partial,
}

impl MappingCoverage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl fmt::Display for MappingCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping between the requirements of two frameworks, used to carry
/// results over when an audit is created from a baseline on another
/// framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementMappingSet {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub source_framework_id: Uuid,
    pub target_framework_id: Uuid,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementMapping {
    pub id: Uuid,
    pub mapping_set_id: Uuid,
    pub source_requirement_id: Uuid,
    pub target_requirement_id: Uuid,
    pub coverage: MappingCoverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAssessment {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub project_id: Uuid,
    pub framework_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub status: AssessmentStatus,
    pub eta: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    /// JSON array of implementation group ref_ids, when narrowed.
    pub selected_implementation_groups: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComplianceAssessment {
    pub fn selected_groups(&self) -> Vec<String> {
        self.selected_implementation_groups
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    ToDo,
    InProgress,
    InReview,
    Done,
}

impl RequirementStatus {
    pub const ALL: &'static [Self] = &[Self::ToDo, Self::InProgress, Self::InReview, Self::Done];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "to_do",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ToDo => "To do",
            Self::InProgress => "In progress",
            Self::InReview => "In review",
            Self::Done => "Done",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementResult {
    NotAssessed,
    PartiallyCompliant,
    NonCompliant,
    Compliant,
    NotApplicable,
}

impl RequirementResult {
    pub const ALL: &'static [Self] = &[
        Self::NotAssessed,
        Self::PartiallyCompliant,
        Self::NonCompliant,
        Self::Compliant,
        Self::NotApplicable,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAssessed => "not_assessed",
            Self::PartiallyCompliant => "partially_compliant",
            Self::NonCompliant => "non_compliant",
            Self::Compliant => "compliant",
            Self::NotApplicable => "not_applicable",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotAssessed => "Not assessed",
            Self::PartiallyCompliant => "Partially compliant",
            Self::NonCompliant => "Non-compliant",
            Self::Compliant => "Compliant",
            Self::NotApplicable => "Not applicable",
        }
    }

    /// Chart/report color for this result.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::NotAssessed => "#d1d1d1",
            Self::PartiallyCompliant => "#fac858",
            Self::NonCompliant => "#ee6666",
            Self::Compliant => "#91cc75",
            Self::NotApplicable => "#73c0de",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for RequirementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation of one requirement inside one audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementAssessment {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub compliance_assessment_id: Uuid,
    pub requirement_id: Uuid,
    pub status: RequirementStatus,
    pub result: RequirementResult,
    pub score: Option<i64>,
    pub is_scored: bool,
    pub observation: Option<String>,
    pub evidence_ids: Vec<Uuid>,
    pub applied_control_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_group_scoping() {
        let mut node = RequirementNode {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            framework_id: Uuid::new_v4(),
            urn: "urn:test:req:1".to_string(),
            parent_urn: None,
            ref_id: Some("A.1".to_string()),
            name: Some("Access control".to_string()),
            description: None,
            order_id: 1,
            assessable: true,
            implementation_groups: Some("[\"IG2\",\"IG3\"]".to_string()),
            reference_control_ids: vec![],
            threat_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(node.in_selected_groups(&["IG2".to_string()]));
        assert!(!node.in_selected_groups(&["IG1".to_string()]));
        assert!(node.in_selected_groups(&[]));

        node.implementation_groups = None;
        assert!(node.in_selected_groups(&["IG1".to_string()]));
    }

    #[test]
    fn test_display_title() {
        let node = RequirementNode {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            framework_id: Uuid::new_v4(),
            urn: "urn:test:req:1".to_string(),
            parent_urn: None,
            ref_id: Some("A.1".to_string()),
            name: Some("Access control".to_string()),
            description: None,
            order_id: 1,
            assessable: true,
            implementation_groups: None,
            reference_control_ids: vec![],
            threat_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(node.display_title(), "A.1 - Access control");
    }

    #[test]
    fn test_result_colors_distinct() {
        let mut colors: Vec<&str> = RequirementResult::ALL.iter().map(|r| r.color()).collect();
        colors.sort_unstable();
        colors.dedup();
        assert_eq!(colors.len(), RequirementResult::ALL.len());
    }
}
