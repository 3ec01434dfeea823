// Quality checks: consistency findings over assessments

use crate::domain::compliance::{ComplianceAssessment, RequirementAssessment, RequirementResult, RequirementStatus};
use crate::domain::risk::{RiskAssessment, RiskScenario, Treatment};
use crate::domain::AssessmentStatus;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityFinding {
    pub msg: String,
    pub msgid: String,
    pub obj_type: String,
    pub object: FindingObject,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FindingObject {
    pub id: Uuid,
    pub name: String,
}

/// Findings bucketed by severity, serialized as-is in quality check
/// responses.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QualityCheck {
    pub errors: Vec<QualityFinding>,
    pub warnings: Vec<QualityFinding>,
    pub info: Vec<QualityFinding>,
}

impl QualityCheck {
    pub fn count(&self) -> usize {
        self.errors.len() + self.warnings.len() + self.info.len()
    }

    fn push_error(&mut self, msg: impl Into<String>, msgid: &str, obj_type: &str, id: Uuid, name: &str) {
        self.errors.push(finding(msg, msgid, obj_type, id, name));
    }

    fn push_warning(&mut self, msg: impl Into<String>, msgid: &str, obj_type: &str, id: Uuid, name: &str) {
        self.warnings.push(finding(msg, msgid, obj_type, id, name));
    }

    fn push_info(&mut self, msg: impl Into<String>, msgid: &str, obj_type: &str, id: Uuid, name: &str) {
        self.info.push(finding(msg, msgid, obj_type, id, name));
    }
}

fn finding(msg: impl Into<String>, msgid: &str, obj_type: &str, id: Uuid, name: &str) -> QualityFinding {
    QualityFinding {
        msg: msg.into(),
        msgid: msgid.to_string(),
        obj_type: obj_type.to_string(),
        object: FindingObject {
            id,
            name: name.to_string(),
        },
    }
}

/// Inspect a risk assessment and its scenarios.
///
/// `accepted_scenario_ids` holds scenarios covered by a non-rejected risk
/// acceptance, to flag "accept" treatments without one.
pub fn review_risk_assessment(
    assessment: &RiskAssessment,
    scenarios: &[RiskScenario],
    accepted_scenario_ids: &HashSet<Uuid>,
    today: NaiveDate,
) -> QualityCheck {
    let mut check = QualityCheck::default();

    if scenarios.is_empty() {
        check.push_warning(
            format!("{}: no risk scenario declared yet", assessment.name),
            "riskAssessmentEmpty",
            "riskassessment",
            assessment.id,
            &assessment.name,
        );
    }

    if let Some(due) = assessment.due_date {
        if due < today && assessment.status != AssessmentStatus::Done && assessment.status != AssessmentStatus::Deprecated {
            check.push_warning(
                format!("{}: due date is in the past and the assessment is not done", assessment.name),
                "riskAssessmentPastDueDate",
                "riskassessment",
                assessment.id,
                &assessment.name,
            );
        }
    }

    for scenario in scenarios {
        if scenario.current_proba < 0 || scenario.current_impact < 0 {
            check.push_info(
                format!("{}: current risk is not rated", scenario.name),
                "riskScenarioNoCurrentLevel",
                "riskscenario",
                scenario.id,
                &scenario.name,
            );
        }
        if scenario.residual_proba < 0 || scenario.residual_impact < 0 {
            check.push_info(
                format!("{}: residual risk is not rated", scenario.name),
                "riskScenarioNoResidualLevel",
                "riskscenario",
                scenario.id,
                &scenario.name,
            );
        } else {
            // Residual must never exceed current on either axis
            if scenario.residual_proba > scenario.current_proba
                || scenario.residual_impact > scenario.current_impact
            {
                check.push_error(
                    format!("{}: residual risk is rated higher than current risk", scenario.name),
                    "riskScenarioResidualHigherThanCurrent",
                    "riskscenario",
                    scenario.id,
                    &scenario.name,
                );
            }
        }
        if scenario.treatment == Treatment::Accept && !accepted_scenario_ids.contains(&scenario.id) {
            check.push_warning(
                format!("{}: accepted treatment without a risk acceptance", scenario.name),
                "riskScenarioAcceptedNoAcceptance",
                "riskscenario",
                scenario.id,
                &scenario.name,
            );
        }
        if scenario.treatment == Treatment::Open && assessment.status == AssessmentStatus::Done {
            check.push_info(
                format!("{}: treatment is still open in a done assessment", scenario.name),
                "riskScenarioOpenInDoneAssessment",
                "riskscenario",
                scenario.id,
                &scenario.name,
            );
        }
    }

    check
}

/// Inspect a compliance assessment and its requirement assessments.
pub fn review_compliance_assessment(
    assessment: &ComplianceAssessment,
    requirements: &[(RequirementAssessment, String)],
    today: NaiveDate,
) -> QualityCheck {
    let mut check = QualityCheck::default();

    if let Some(due) = assessment.due_date {
        if due < today && assessment.status != AssessmentStatus::Done && assessment.status != AssessmentStatus::Deprecated {
            check.push_warning(
                format!("{}: due date is in the past and the audit is not done", assessment.name),
                "complianceAssessmentPastDueDate",
                "complianceassessment",
                assessment.id,
                &assessment.name,
            );
        }
    }

    for (req, title) in requirements {
        if req.status == RequirementStatus::Done && req.result == RequirementResult::NotAssessed {
            check.push_warning(
                format!("{}: marked done but has no result", title),
                "requirementAssessmentDoneNoResult",
                "requirementassessment",
                req.id,
                title,
            );
        }
        if matches!(
            req.result,
            RequirementResult::Compliant | RequirementResult::PartiallyCompliant
        ) && req.applied_control_ids.is_empty()
            && req.evidence_ids.is_empty()
        {
            check.push_info(
                format!("{}: compliant result without linked control or evidence", title),
                "requirementAssessmentNoSupportingItem",
                "requirementassessment",
                req.id,
                title,
            );
        }
        if req.is_scored && req.score.is_none() {
            check.push_info(
                format!("{}: scoring enabled but no score set", title),
                "requirementAssessmentNoScore",
                "requirementassessment",
                req.id,
                title,
            );
        }
    }

    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn assessment(status: AssessmentStatus, due: Option<NaiveDate>) -> RiskAssessment {
        RiskAssessment {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            risk_matrix_id: Uuid::new_v4(),
            name: "RA".to_string(),
            description: None,
            version: None,
            status,
            eta: None,
            due_date: due,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn scenario(current: (i64, i64), residual: (i64, i64), treatment: Treatment) -> RiskScenario {
        RiskScenario {
            id: Uuid::new_v4(),
            folder_id: Uuid::new_v4(),
            risk_assessment_id: Uuid::new_v4(),
            ref_id: "R.1".to_string(),
            name: "scenario".to_string(),
            description: None,
            existing_controls: None,
            treatment,
            qualifications: vec![],
            current_proba: current.0,
            current_impact: current.1,
            residual_proba: residual.0,
            residual_impact: residual.1,
            strength_of_knowledge: -1,
            justification: None,
            threat_ids: vec![],
            asset_ids: vec![],
            applied_control_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_assessment_warns() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::Planned, None),
            &[],
            &HashSet::new(),
            today,
        );
        assert_eq!(check.warnings.len(), 1);
        assert_eq!(check.warnings[0].msgid, "riskAssessmentEmpty");
    }

    #[test]
    fn test_residual_above_current_is_error() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let s = scenario((1, 1), (2, 1), Treatment::Mitigate);
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::InProgress, None),
            &[s],
            &HashSet::new(),
            today,
        );
        assert_eq!(check.errors.len(), 1);
        assert_eq!(check.errors[0].msgid, "riskScenarioResidualHigherThanCurrent");
    }

    #[test]
    fn test_accept_without_acceptance_warns() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let s = scenario((1, 1), (1, 1), Treatment::Accept);
        let id = s.id;
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::InProgress, None),
            &[s.clone()],
            &HashSet::new(),
            today,
        );
        assert!(check
            .warnings
            .iter()
            .any(|f| f.msgid == "riskScenarioAcceptedNoAcceptance"));

        let mut accepted = HashSet::new();
        accepted.insert(id);
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::InProgress, None),
            &[s],
            &accepted,
            today,
        );
        assert!(!check
            .warnings
            .iter()
            .any(|f| f.msgid == "riskScenarioAcceptedNoAcceptance"));
    }

    #[test]
    fn test_past_due_date_warns() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let due = NaiveDate::from_ymd_opt(2024, 5, 1);
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::InProgress, due),
            &[],
            &HashSet::new(),
            today,
        );
        assert!(check.warnings.iter().any(|f| f.msgid == "riskAssessmentPastDueDate"));

        // Done assessments are not flagged
        let check = review_risk_assessment(
            &assessment(AssessmentStatus::Done, due),
            &[],
            &HashSet::new(),
            today,
        );
        assert!(!check.warnings.iter().any(|f| f.msgid == "riskAssessmentPastDueDate"));
    }
}
