// PDF reports rendered with printpdf built-in Helvetica

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use crate::core::errors::{AegisError, ReportError};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 15.0;
const TITLE_SIZE: f32 = 16.0;
const SUBTITLE_SIZE: f32 = 12.0;
const BODY_SIZE: f32 = 10.0;
const LINE_HEIGHT_MM: f32 = 5.0;
// Helvetica at 10pt keeps roughly this many characters inside the
// printable width.
const WRAP_COLUMNS: usize = 105;

/// A text report: title block followed by flat lines, paginated.
#[derive(Debug, Clone)]
pub struct TextReport {
    pub title: String,
    pub subtitle: Option<String>,
    pub lines: Vec<String>,
}

impl TextReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            lines: Vec::new(),
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    /// Render to PDF bytes, breaking pages at the bottom margin.
    pub fn render(&self) -> Result<Vec<u8>, AegisError> {
        let (doc, page, layer) = PdfDocument::new(
            &self.title,
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "Layer 1",
        );
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| ReportError::Pdf(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| ReportError::Pdf(e.to_string()))?;

        let mut writer = PageWriter {
            doc: &doc,
            layer: doc.get_page(page).get_layer(layer),
            y: Mm(PAGE_HEIGHT_MM - MARGIN_MM),
        };

        writer.text(&self.title, TITLE_SIZE, &bold);
        writer.advance(Mm(3.0));
        if let Some(subtitle) = &self.subtitle {
            writer.text(subtitle, SUBTITLE_SIZE, &regular);
            writer.advance(Mm(2.0));
        }
        writer.advance(Mm(LINE_HEIGHT_MM));

        for line in &self.lines {
            if line.is_empty() {
                writer.advance(Mm(LINE_HEIGHT_MM));
                continue;
            }
            for wrapped in wrap(line, WRAP_COLUMNS) {
                writer.text(&wrapped, BODY_SIZE, &regular);
            }
        }

        doc.save_to_bytes()
            .map_err(|e| ReportError::Pdf(e.to_string()).into())
    }
}

struct PageWriter<'a> {
    doc: &'a printpdf::PdfDocumentReference,
    layer: PdfLayerReference,
    y: Mm,
}

impl PageWriter<'_> {
    fn text(&mut self, text: &str, size: f32, font: &IndirectFontRef) {
        if self.y.0 < MARGIN_MM {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = Mm(PAGE_HEIGHT_MM - MARGIN_MM);
        }
        self.layer
            .use_text(text, size, Mm(MARGIN_MM), self.y, font);
        self.y = Mm(self.y.0 - LINE_HEIGHT_MM);
    }

    fn advance(&mut self, by: Mm) {
        self.y = Mm(self.y.0 - by.0);
    }
}

/// Greedy word wrap on whitespace; a single overlong word becomes its
/// own line.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= columns {
            current.push(' ');
            current.push_str(word);
        } else {
            out.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_splits_long_lines() {
        let text = "alpha beta gamma delta";
        assert_eq!(wrap(text, 11), vec!["alpha beta", "gamma delta"]);
        assert_eq!(wrap("short", 80), vec!["short"]);
        assert_eq!(wrap("", 80), vec![""]);
    }

    #[test]
    fn test_render_produces_pdf_bytes() {
        let mut report = TextReport::new("Risk assessment report").subtitle("v1.0");
        for i in 0..120 {
            report.line(format!("R.{}: scenario line", i));
        }
        let bytes = report.render().unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
