// Domain entities and enums

pub mod asset;
pub mod compliance;
pub mod control;
pub mod evidence;
pub mod folder;
pub mod iam;
pub mod matrix;
pub mod project;
pub mod quality;
pub mod risk;
pub mod threat;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every permission-scoped model in the system.
///
/// `model_name()` is the suffix used in permission codenames
/// (`view_project`, `change_appliedcontrol`, ...); `is_library()` marks
/// models whose published objects are visible from descendant domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Folder,
    User,
    UserGroup,
    Role,
    RoleAssignment,
    Project,
    Threat,
    Asset,
    ReferenceControl,
    RiskMatrix,
    RiskAssessment,
    RiskScenario,
    RiskAcceptance,
    AppliedControl,
    Evidence,
    Framework,
    RequirementNode,
    RequirementMappingSet,
    ComplianceAssessment,
    RequirementAssessment,
}

impl ObjectType {
    pub const ALL: &'static [ObjectType] = &[
        ObjectType::Folder,
        ObjectType::User,
        ObjectType::UserGroup,
        ObjectType::Role,
        ObjectType::RoleAssignment,
        ObjectType::Project,
        ObjectType::Threat,
        ObjectType::Asset,
        ObjectType::ReferenceControl,
        ObjectType::RiskMatrix,
        ObjectType::RiskAssessment,
        ObjectType::RiskScenario,
        ObjectType::RiskAcceptance,
        ObjectType::AppliedControl,
        ObjectType::Evidence,
        ObjectType::Framework,
        ObjectType::RequirementNode,
        ObjectType::RequirementMappingSet,
        ObjectType::ComplianceAssessment,
        ObjectType::RequirementAssessment,
    ];

    /// Permission codename suffix
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::User => "user",
            Self::UserGroup => "usergroup",
            Self::Role => "role",
            Self::RoleAssignment => "roleassignment",
            Self::Project => "project",
            Self::Threat => "threat",
            Self::Asset => "asset",
            Self::ReferenceControl => "referencecontrol",
            Self::RiskMatrix => "riskmatrix",
            Self::RiskAssessment => "riskassessment",
            Self::RiskScenario => "riskscenario",
            Self::RiskAcceptance => "riskacceptance",
            Self::AppliedControl => "appliedcontrol",
            Self::Evidence => "evidence",
            Self::Framework => "framework",
            Self::RequirementNode => "requirementnode",
            Self::RequirementMappingSet => "requirementmappingset",
            Self::ComplianceAssessment => "complianceassessment",
            Self::RequirementAssessment => "requirementassessment",
        }
    }

    /// Library models: published objects are visible from folders below
    /// the one holding them.
    pub const fn is_library(self) -> bool {
        matches!(
            self,
            Self::Threat
                | Self::ReferenceControl
                | Self::RiskMatrix
                | Self::Framework
                | Self::RequirementNode
                | Self::RequirementMappingSet
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

/// Lifecycle status shared by risk and compliance assessments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Planned,
    InProgress,
    InReview,
    Done,
    Deprecated,
}

impl AssessmentStatus {
    pub const ALL: &'static [Self] = &[
        Self::Planned,
        Self::InProgress,
        Self::InReview,
        Self::Done,
        Self::Deprecated,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
            Self::Deprecated => "deprecated",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Planned => "Planned",
            Self::InProgress => "In progress",
            Self::InReview => "In review",
            Self::Done => "Done",
            Self::Deprecated => "Deprecated",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names_match_permission_codenames() {
        assert_eq!(ObjectType::AppliedControl.model_name(), "appliedcontrol");
        assert_eq!(ObjectType::RiskAcceptance.model_name(), "riskacceptance");
        assert_eq!(ObjectType::UserGroup.model_name(), "usergroup");
    }

    #[test]
    fn test_library_models() {
        assert!(ObjectType::Framework.is_library());
        assert!(ObjectType::RiskMatrix.is_library());
        assert!(!ObjectType::Project.is_library());
        assert!(!ObjectType::Evidence.is_library());
    }

    #[test]
    fn test_assessment_status_roundtrip() {
        for status in AssessmentStatus::ALL {
            assert_eq!(AssessmentStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(AssessmentStatus::parse("bogus"), None);
    }
}
