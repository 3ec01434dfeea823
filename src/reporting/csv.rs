// CSV exports, semicolon-delimited with a header row

use crate::core::errors::{AegisError, ReportError};

/// One applied control in a treatment plan export.
#[derive(Debug, Clone, Default)]
pub struct TreatmentPlanRow {
    pub risk_scenarios: String,
    pub measure_id: String,
    pub measure_name: String,
    pub measure_desc: String,
    pub category: String,
    pub csf_function: String,
    pub reference_control: String,
    pub eta: String,
    pub effort: String,
    pub cost: String,
    pub link: String,
    pub status: String,
}

/// One risk scenario in a risk assessment export.
#[derive(Debug, Clone, Default)]
pub struct RiskAssessmentRow {
    pub rid: String,
    pub threats: String,
    pub name: String,
    pub description: String,
    pub existing_controls: String,
    pub current_level: String,
    pub applied_controls: String,
    pub residual_level: String,
    pub treatment: String,
}

/// One applied control in the flat controls export.
#[derive(Debug, Clone, Default)]
pub struct AuditExportRow {
    pub internal_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub csf_function: String,
    pub status: String,
    pub eta: String,
    pub owner: String,
}

/// One requirement in a compliance assessment export. Result columns
/// stay empty on non-assessable rows.
#[derive(Debug, Clone, Default)]
pub struct ComplianceRow {
    pub ref_id: String,
    pub description: String,
    pub compliance_result: String,
    pub progress: String,
    pub score: String,
    pub observations: String,
}

fn write_rows(header: &[&str], rows: Vec<Vec<String>>) -> Result<Vec<u8>, AegisError> {
    let mut writer = ::csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|e| ReportError::Csv(e.to_string()))?;
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| ReportError::Csv(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::Csv(e.to_string()).into())
}

pub fn treatment_plan(rows: &[TreatmentPlanRow]) -> Result<Vec<u8>, AegisError> {
    write_rows(
        &[
            "risk_scenarios",
            "measure_id",
            "measure_name",
            "measure_desc",
            "category",
            "csf_function",
            "reference_control",
            "eta",
            "effort",
            "cost",
            "link",
            "status",
        ],
        rows.iter()
            .map(|r| {
                vec![
                    r.risk_scenarios.clone(),
                    r.measure_id.clone(),
                    r.measure_name.clone(),
                    r.measure_desc.clone(),
                    r.category.clone(),
                    r.csf_function.clone(),
                    r.reference_control.clone(),
                    r.eta.clone(),
                    r.effort.clone(),
                    r.cost.clone(),
                    r.link.clone(),
                    r.status.clone(),
                ]
            })
            .collect(),
    )
}

pub fn risk_assessment(rows: &[RiskAssessmentRow]) -> Result<Vec<u8>, AegisError> {
    write_rows(
        &[
            "rid",
            "threats",
            "name",
            "description",
            "existing_controls",
            "current_level",
            "applied_controls",
            "residual_level",
            "treatment",
        ],
        rows.iter()
            .map(|r| {
                vec![
                    r.rid.clone(),
                    r.threats.clone(),
                    r.name.clone(),
                    r.description.clone(),
                    r.existing_controls.clone(),
                    r.current_level.clone(),
                    r.applied_controls.clone(),
                    r.residual_level.clone(),
                    r.treatment.clone(),
                ]
            })
            .collect(),
    )
}

pub fn audit_export(rows: &[AuditExportRow]) -> Result<Vec<u8>, AegisError> {
    write_rows(
        &[
            "internal_id",
            "name",
            "description",
            "category",
            "csf_function",
            "status",
            "eta",
            "owner",
        ],
        rows.iter()
            .map(|r| {
                vec![
                    r.internal_id.clone(),
                    r.name.clone(),
                    r.description.clone(),
                    r.category.clone(),
                    r.csf_function.clone(),
                    r.status.clone(),
                    r.eta.clone(),
                    r.owner.clone(),
                ]
            })
            .collect(),
    )
}

pub fn compliance_assessment(rows: &[ComplianceRow]) -> Result<Vec<u8>, AegisError> {
    write_rows(
        &[
            "ref_id",
            "description",
            "compliance_result",
            "progress",
            "score",
            "observations",
        ],
        rows.iter()
            .map(|r| {
                vec![
                    r.ref_id.clone(),
                    r.description.clone(),
                    r.compliance_result.clone(),
                    r.progress.clone(),
                    r.score.clone(),
                    r.observations.clone(),
                ]
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treatment_plan_header_and_delimiter() {
        let rows = vec![TreatmentPlanRow {
            risk_scenarios: "R.1".to_string(),
            measure_name: "Patch servers".to_string(),
            status: "active".to_string(),
            ..Default::default()
        }];
        let bytes = treatment_plan(&rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "risk_scenarios;measure_id;measure_name;measure_desc;category;csf_function;reference_control;eta;effort;cost;link;status"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("R.1;;Patch servers;"));
        assert!(row.ends_with(";active"));
    }

    #[test]
    fn test_compliance_rows_keep_empty_result_columns() {
        let rows = vec![ComplianceRow {
            ref_id: "A.1".to_string(),
            description: "Section heading".to_string(),
            ..Default::default()
        }];
        let text = String::from_utf8(compliance_assessment(&rows).unwrap()).unwrap();
        assert!(text.contains("A.1;Section heading;;;;"));
    }

    #[test]
    fn test_fields_with_delimiter_are_quoted() {
        let rows = vec![AuditExportRow {
            internal_id: "1".to_string(),
            name: "a;b".to_string(),
            ..Default::default()
        }];
        let text = String::from_utf8(audit_export(&rows).unwrap()).unwrap();
        assert!(text.contains("\"a;b\""));
    }
}
