// Export formats: CSV layout, HTML report, ZIP archive, PDF bytes.

use aegis_grc::reporting::csv::{compliance_assessment, ComplianceRow};
use aegis_grc::reporting::html::{audit_archive, audit_report_html, AuditReport, ReportNode};
use aegis_grc::reporting::pdf::TextReport;

fn sample_report() -> AuditReport {
    AuditReport {
        audit_name: "Annual audit".to_string(),
        framework_name: "Test framework".to_string(),
        progress: 50,
        nodes: vec![ReportNode {
            title: "1 - Governance".to_string(),
            assessable: false,
            children: vec![ReportNode {
                title: "1.1 - Policies".to_string(),
                assessable: true,
                status: Some("done".to_string()),
                result: Some("compliant".to_string()),
                result_color: Some("#91cc75".to_string()),
                observation: Some("Reviewed in June".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

#[test]
fn test_compliance_csv_header_and_delimiter() {
    let rows = vec![ComplianceRow {
        ref_id: "1.1".to_string(),
        description: "Policies".to_string(),
        compliance_result: "compliant".to_string(),
        progress: "done".to_string(),
        score: "3".to_string(),
        observations: String::new(),
    }];
    let bytes = compliance_assessment(&rows).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "ref_id;description;compliance_result;progress;score;observations"
    );
    assert!(lines.next().unwrap().starts_with("1.1;Policies;compliant"));
}

#[test]
fn test_audit_report_html_contains_requirements() {
    let html = audit_report_html(&sample_report());
    assert!(html.contains("Annual audit"));
    assert!(html.contains("Test framework"));
    assert!(html.contains("1.1 - Policies"));
    assert!(html.contains("Reviewed in June"));
}

#[test]
fn test_audit_archive_is_a_zip() {
    let html = audit_report_html(&sample_report());
    let evidence = ("policy.pdf".to_string(), vec![1u8, 2, 3]);
    let bytes = audit_archive(&html, &[evidence]).unwrap();
    // Local file header magic.
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}

#[test]
fn test_archive_entries_keep_only_the_base_name() {
    let html = audit_report_html(&sample_report());
    let evidence = ("../../etc/passwd".to_string(), vec![1u8, 2, 3]);
    let bytes = audit_archive(&html, &[evidence]).unwrap();
    let haystack = bytes.as_slice();
    let contains = |needle: &[u8]| haystack.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"evidences/passwd"));
    assert!(!contains(b"../../etc/passwd"));
}

#[test]
fn test_text_report_renders_pdf() {
    let mut report = TextReport::new("Action plan").subtitle("Test project");
    report.line("Measure: patch servers");
    report.blank();
    report.line("Measure: rotate keys");
    let bytes = report.render().unwrap();
    assert_eq!(&bytes[..5], b"%PDF-");
}
