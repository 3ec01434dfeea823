// Self-contained HTML audit report and its zip packaging

use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::core::errors::{AegisError, ReportError};

/// One requirement node in the rendered report tree.
#[derive(Debug, Clone, Default)]
pub struct ReportNode {
    pub title: String,
    pub description: Option<String>,
    pub assessable: bool,
    pub status: Option<String>,
    pub result: Option<String>,
    pub result_color: Option<String>,
    pub score: Option<i64>,
    pub observation: Option<String>,
    pub applied_controls: Vec<String>,
    pub evidences: Vec<String>,
    pub children: Vec<ReportNode>,
}

/// Inputs of the standalone audit report page.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub audit_name: String,
    pub framework_name: String,
    /// Done requirement assessments over assessable ones, in percent.
    pub progress: u32,
    pub nodes: Vec<ReportNode>,
}

/// Renders the audit as a single self-contained HTML page.
pub fn audit_report_html(report: &AuditReport) -> String {
    let mut body = String::new();
    for node in &report.nodes {
        render_node(&mut body, node, 0);
    }
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>\n\
         body {{ font-family: sans-serif; margin: 2em; color: #222; }}\n\
         h1 {{ margin-bottom: 0; }}\n\
         .framework {{ color: #666; margin-top: 0.2em; }}\n\
         .progress {{ background: #eee; border-radius: 4px; width: 320px; height: 14px; }}\n\
         .progress > div {{ background: #91cc75; height: 14px; border-radius: 4px; }}\n\
         .node {{ margin: 0.5em 0 0.5em 0; padding-left: 1em; border-left: 2px solid #eee; }}\n\
         .badge {{ display: inline-block; padding: 1px 8px; border-radius: 8px; font-size: 0.8em; }}\n\
         .meta {{ color: #555; font-size: 0.9em; }}\n\
         ul {{ margin: 0.2em 0; }}\n\
         </style>\n</head>\n<body>\n\
         <h1>{title}</h1>\n<p class=\"framework\">{framework}</p>\n\
         <p class=\"meta\">Progress: {progress}%</p>\n\
         <div class=\"progress\"><div style=\"width: {progress}%\"></div></div>\n\
         {body}\n</body>\n</html>\n",
        title = escape(&report.audit_name),
        framework = escape(&report.framework_name),
        progress = report.progress.min(100),
        body = body,
    )
}

fn render_node(out: &mut String, node: &ReportNode, depth: usize) {
    let heading = (depth + 2).min(6);
    out.push_str("<div class=\"node\">\n");
    out.push_str(&format!(
        "<h{h}>{title}</h{h}>\n",
        h = heading,
        title = escape(&node.title)
    ));
    if let Some(description) = &node.description {
        out.push_str(&format!("<p>{}</p>\n", escape(description)));
    }
    if node.assessable {
        if let (Some(result), Some(status)) = (&node.result, &node.status) {
            let color = node.result_color.as_deref().unwrap_or("#d1d1d1");
            out.push_str(&format!(
                "<p><span class=\"badge\" style=\"background: {color}\">{result}</span> \
                 <span class=\"meta\">status: {status}</span>",
                color = color,
                result = escape(result),
                status = escape(status),
            ));
            if let Some(score) = node.score {
                out.push_str(&format!(" <span class=\"meta\">score: {}</span>", score));
            }
            out.push_str("</p>\n");
        }
        if let Some(observation) = &node.observation {
            out.push_str(&format!(
                "<p class=\"meta\">Observation: {}</p>\n",
                escape(observation)
            ));
        }
        if !node.applied_controls.is_empty() {
            out.push_str("<p class=\"meta\">Applied controls:</p>\n<ul>\n");
            for control in &node.applied_controls {
                out.push_str(&format!("<li>{}</li>\n", escape(control)));
            }
            out.push_str("</ul>\n");
        }
        if !node.evidences.is_empty() {
            out.push_str("<p class=\"meta\">Evidences:</p>\n<ul>\n");
            for evidence in &node.evidences {
                // Links must match the sanitized archive entry names.
                out.push_str(&format!(
                    "<li><a href=\"evidences/{name}\">{name}</a></li>\n",
                    name = escape(entry_basename(evidence))
                ));
            }
            out.push_str("</ul>\n");
        }
    }
    for child in &node.children {
        render_node(out, child, depth + 1);
    }
    out.push_str("</div>\n");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Strips any path components from an attachment name so zip entries
/// stay under `evidences/`.
fn entry_basename(name: &str) -> &str {
    let trimmed = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "attachment"
    } else {
        trimmed
    }
}

/// Zip with `index.html` at the root and each attachment under
/// `evidences/`.
pub fn audit_archive(
    index_html: &str,
    attachments: &[(String, Vec<u8>)],
) -> Result<Vec<u8>, AegisError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions = FileOptions::default();

    zip.start_file("index.html", options)
        .map_err(|e| ReportError::Zip(e.to_string()))?;
    zip.write_all(index_html.as_bytes())
        .map_err(|e| ReportError::Zip(e.to_string()))?;

    for (name, content) in attachments {
        zip.start_file(format!("evidences/{}", entry_basename(name)), options)
            .map_err(|e| ReportError::Zip(e.to_string()))?;
        zip.write_all(content)
            .map_err(|e| ReportError::Zip(e.to_string()))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ReportError::Zip(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(title: &str, result: &str) -> ReportNode {
        ReportNode {
            title: title.to_string(),
            assessable: true,
            status: Some("Done".to_string()),
            result: Some(result.to_string()),
            result_color: Some("#91cc75".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_report_contains_tree_and_badges() {
        let report = AuditReport {
            audit_name: "ISO audit <2024>".to_string(),
            framework_name: "ISO/IEC 27001".to_string(),
            progress: 50,
            nodes: vec![ReportNode {
                title: "A.5 Organizational".to_string(),
                children: vec![leaf("A.5.1 Policies", "Compliant")],
                ..Default::default()
            }],
        };
        let html = audit_report_html(&report);
        assert!(html.contains("ISO audit &lt;2024&gt;"));
        assert!(html.contains("A.5.1 Policies"));
        assert!(html.contains("Compliant"));
        assert!(html.contains("width: 50%"));
    }

    #[test]
    fn test_archive_layout() {
        let bytes = audit_archive(
            "<html></html>",
            &[("report.pdf".to_string(), vec![1, 2, 3])],
        )
        .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["index.html", "evidences/report.pdf"]);
    }
}
