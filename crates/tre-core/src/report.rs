//! Report files.
//!
//! Renderers turn a [`Report`] into one file inside a destination directory
//! and return the path written. The file name is derived from the suite and
//! log names so repeated runs overwrite the previous `_LATEST` file.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RenderError;
use crate::model::{Report, StepResult, StepStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Maximum characters of matched-line text shown inline; 0 shows all.
    pub preview_limit: usize,
    pub title: String,
    pub generator_info: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            preview_limit: 200,
            title: "Report".to_string(),
            generator_info: String::new(),
        }
    }
}

pub trait ReportRenderer {
    fn extension(&self) -> &'static str;

    fn render_to_string(&self, report: &Report, options: &RenderOptions)
        -> Result<String, RenderError>;

    fn render(
        &self,
        report: &Report,
        destination: &Path,
        options: &RenderOptions,
    ) -> Result<PathBuf, RenderError> {
        let body = self.render_to_string(report, options)?;
        fs::create_dir_all(destination).map_err(|source| RenderError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        let path = destination.join(format!("{}.{}", basename(report), self.extension()));
        fs::write(&path, body).map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Looks a renderer up by format name (`json`, `csv`, `html`).
pub fn renderer_for(format: &str) -> Option<Box<dyn ReportRenderer>> {
    match format.trim().to_ascii_lowercase().as_str() {
        "json" => Some(Box::new(JsonRenderer)),
        "csv" => Some(Box::new(CsvRenderer)),
        "html" | "htm" => Some(Box::new(HtmlRenderer)),
        _ => None,
    }
}

pub fn basename(report: &Report) -> String {
    format!("{}_{}_LATEST", slugify(&report.suite), slugify(&report.source))
}

pub fn slugify(value: &str) -> String {
    let stem = Path::new(value)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| value.to_string());
    let mut out = String::new();
    let mut last_dash = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_dash = false;
            continue;
        }
        if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "report".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render_to_string(
        &self,
        report: &Report,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let mut body = serde_json::to_string_pretty(report)?;
        body.push('\n');
        Ok(body)
    }
}

pub struct CsvRenderer;

const CSV_HEADER: [&str; 11] = [
    "#",
    "Test step",
    "VC",
    "Result",
    "Count",
    "SeqIdx",
    "Index",
    "Line",
    "Error",
    "Log",
    "Test",
];

impl ReportRenderer for CsvRenderer {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn render_to_string(
        &self,
        report: &Report,
        _options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        push_csv_row(&mut out, CSV_HEADER.iter().map(|s| s.to_string()));
        for result in &report.results {
            let detail = &result.detail;
            let opt = |value: Option<usize>| value.map(|v| v.to_string()).unwrap_or_default();
            push_csv_row(
                &mut out,
                [
                    result.index.to_string(),
                    result.name.clone(),
                    result.descriptor.clone(),
                    result.status.to_string(),
                    opt(detail.count),
                    opt(detail.progress),
                    opt(detail.line_index),
                    result.matched_line.clone(),
                    detail.error.clone().unwrap_or_default(),
                    report.source.clone(),
                    report.suite.clone(),
                ],
            );
        }
        Ok(out)
    }
}

fn push_csv_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let cells: Vec<String> = fields.into_iter().map(|f| csv_field(&f)).collect();
    out.push_str(&cells.join(","));
    out.push_str("\r\n");
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub struct HtmlRenderer;

impl ReportRenderer for HtmlRenderer {
    fn extension(&self) -> &'static str {
        "html"
    }

    fn render_to_string(
        &self,
        report: &Report,
        options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let title = if options.title.trim().is_empty() {
            "Report"
        } else {
            options.title.as_str()
        };
        let mut out = String::new();
        let _ = writeln!(&mut out, "<!doctype html>");
        let _ = writeln!(&mut out, "<html lang=\"en\">");
        let _ = writeln!(&mut out, "<head>");
        let _ = writeln!(&mut out, "  <meta charset=\"utf-8\">");
        let _ = writeln!(&mut out, "  <title>{}</title>", escape_html(title));
        let _ = writeln!(&mut out, "  <style>");
        let _ = writeln!(
            &mut out,
            "    body {{ font: 14px/1.4 system-ui, sans-serif; margin: 24px; }}"
        );
        let _ = writeln!(
            &mut out,
            "    table {{ border-collapse: collapse; width: 100%; }} td, th {{ border: 1px solid #ccc; padding: 4px 8px; vertical-align: top; }}"
        );
        let _ = writeln!(
            &mut out,
            "    .status-PASS {{ background: #e6f4ea; }} .status-FAIL {{ background: #fce8e6; }} .status-ERROR {{ background: #fef7e0; }} .status-RUNNING {{ background: #f1f3f4; }}"
        );
        let _ = writeln!(&mut out, "    .muted {{ color: #5f6368; }}");
        let _ = writeln!(&mut out, "  </style>");
        let _ = writeln!(&mut out, "</head>");
        let _ = writeln!(&mut out, "<body>");
        let _ = writeln!(&mut out, "<h1>{}</h1>", escape_html(title));
        if !options.generator_info.trim().is_empty() {
            let _ = writeln!(
                &mut out,
                "<small class=\"muted\">{}</small>",
                escape_html(&options.generator_info)
            );
        }
        let _ = writeln!(
            &mut out,
            "<p class=\"muted\">log: {} | suite: {} | generated: {}</p>",
            escape_html(&report.source),
            escape_html(&report.suite),
            report.generated_at.to_rfc3339()
        );
        let _ = writeln!(
            &mut out,
            "<p><b>Summary:</b> {} ({} passed, {} failed, {} errors)</p>",
            if report.passed() { "PASS" } else { "FAIL" },
            report.summary.passed,
            report.summary.failed,
            report.summary.errors
        );
        let _ = writeln!(
            &mut out,
            "<table><tr><th>#</th><th>Test step</th><th>VC</th><th>Result</th><th>Detail</th></tr>"
        );
        for result in &report.results {
            let _ = writeln!(
                &mut out,
                "<tr class=\"status-{status}\"><td>{}</td><td>{}</td><td>{}</td><td>{status}</td><td>{}</td></tr>",
                result.index,
                escape_html(&result.name),
                escape_html(&result.descriptor),
                detail_html(result, options.preview_limit),
                status = result.status,
            );
        }
        let _ = writeln!(&mut out, "</table>");
        let _ = writeln!(&mut out, "</body>");
        let _ = writeln!(&mut out, "</html>");
        Ok(out)
    }
}

fn detail_html(result: &StepResult, preview_limit: usize) -> String {
    let detail = &result.detail;
    let mut items = Vec::new();
    if let Some(count) = detail.count {
        items.push(format!("count: {count}"));
    }
    if let Some(progress) = detail.progress {
        items.push(format!("matched: {progress}"));
    }
    if let Some(index) = detail.line_index {
        items.push(format!("line #{index}"));
    }
    if let Some(unmatched) = &detail.unmatched {
        items.push(format!(
            "missing: <code>{}</code> after line #{}",
            escape_html(unmatched),
            detail.cursor.unwrap_or(0)
        ));
    }
    if !result.matched_line.is_empty() && result.status != StepStatus::Running {
        let (preview, truncated) = preview_text(&result.matched_line, preview_limit);
        let suffix = if truncated { "&hellip;" } else { "" };
        items.push(format!("<code>{}</code>{suffix}", escape_html(&preview)));
    }
    if let Some(capture) = &detail.capture {
        items.push(format!("captured: <code>{}</code>", escape_html(capture)));
    }
    if let Some(note) = &detail.note {
        items.push(escape_html(note));
    }
    if let Some(error) = &detail.error {
        items.push(format!("error: <code>{}</code>", escape_html(error)));
    }
    items.join("<br>")
}

fn preview_text(value: &str, limit: usize) -> (String, bool) {
    if limit == 0 || value.chars().count() <= limit {
        return (value.to_string(), false);
    }
    (value.chars().take(limit).collect(), true)
}

fn escape_html(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        basename, renderer_for, slugify, CsvRenderer, HtmlRenderer, RenderOptions, ReportRenderer,
    };
    use crate::model::{Report, StepDetail, StepResult, StepStatus};

    fn sample_report() -> Report {
        Report::new(
            "logs/run 1.txt",
            "smoke",
            vec![
                StepResult {
                    index: 1,
                    name: "ready".to_string(),
                    descriptor: "READY".to_string(),
                    status: StepStatus::Pass,
                    matched_line: "<b>READY, go</b>".to_string(),
                    payload: "READY, go".to_string(),
                    detail: StepDetail {
                        line_index: Some(3),
                        ..StepDetail::default()
                    },
                },
                StepResult {
                    index: 2,
                    name: "chain".to_string(),
                    descriptor: "A -> B".to_string(),
                    status: StepStatus::Fail,
                    matched_line: String::new(),
                    payload: String::new(),
                    detail: StepDetail {
                        progress: Some(1),
                        unmatched: Some("B".to_string()),
                        cursor: Some(4),
                        ..StepDetail::default()
                    },
                },
            ],
        )
    }

    #[test]
    fn basename_uses_suite_and_log_stems() {
        assert_eq!(basename(&sample_report()), "smoke_run-1_LATEST");
        assert_eq!(slugify("///"), "report");
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let body = match CsvRenderer.render_to_string(&sample_report(), &RenderOptions::default())
        {
            Ok(value) => value,
            Err(err) => panic!("render: {err}"),
        };
        let mut rows = body.lines();
        assert_eq!(
            rows.next(),
            Some("#,Test step,VC,Result,Count,SeqIdx,Index,Line,Error,Log,Test")
        );
        assert_eq!(
            rows.next(),
            Some("1,ready,READY,PASS,,,3,\"<b>READY, go</b>\",,logs/run 1.txt,smoke")
        );
    }

    #[test]
    fn html_escapes_and_truncates_preview() {
        let options = RenderOptions {
            preview_limit: 6,
            title: "Nightly <run>".to_string(),
            generator_info: "tre test".to_string(),
        };
        let body = match HtmlRenderer.render_to_string(&sample_report(), &options) {
            Ok(value) => value,
            Err(err) => panic!("render: {err}"),
        };
        assert!(body.contains("<h1>Nightly &lt;run&gt;</h1>"));
        assert!(body.contains("<code>&lt;b&gt;REA</code>&hellip;"));
        assert!(body.contains("class=\"status-FAIL\""));
        assert!(body.contains("missing: <code>B</code> after line #4"));
        assert!(body.contains("<b>Summary:</b> FAIL"));
    }

    #[test]
    fn render_writes_file_into_destination() {
        let dir = match tempfile::tempdir() {
            Ok(value) => value,
            Err(err) => panic!("tempdir: {err}"),
        };
        let Some(renderer) = renderer_for("JSON") else {
            panic!("json renderer missing");
        };
        let path = match renderer.render(
            &sample_report(),
            &dir.path().join("out"),
            &RenderOptions::default(),
        ) {
            Ok(value) => value,
            Err(err) => panic!("render: {err}"),
        };
        assert!(path.ends_with("smoke_run-1_LATEST.json"));
        let text = match std::fs::read_to_string(&path) {
            Ok(value) => value,
            Err(err) => panic!("read: {err}"),
        };
        let decoded: Report = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => panic!("decode: {err}"),
        };
        assert_eq!(decoded.results, sample_report().results);
        assert!(renderer_for("pdf").is_none());
    }
}
