//! Run outputs: a results file per run plus a human-readable run log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::CommentaryError;
use crate::response::{Citation, ExecutionResult};

const RULE_WIDTH: usize = 60;

/// One row of the results file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub portcode: String,
    pub ticker: String,
    pub security_name: String,
    pub commentary: String,
    pub sources: String,
    pub is_error: bool,
}

impl ReportRow {
    pub fn new(
        portcode: &str,
        ticker: &str,
        security_name: &str,
        result: Option<&ExecutionResult>,
    ) -> Self {
        let (commentary, sources, is_error) = match result {
            Some(r) if r.is_success() => (r.text().to_string(), format_citations(r.citations()), false),
            Some(r) => (format!("ERROR: {}", r.error_message()), String::new(), true),
            None => ("ERROR: No result".to_string(), String::new(), true),
        };
        Self {
            portcode: portcode.to_string(),
            ticker: ticker.to_string(),
            security_name: security_name.to_string(),
            commentary,
            sources,
            is_error,
        }
    }
}

/// `[1] url` lines, numbered to match the inline footnotes.
pub fn format_citations(citations: &[Citation]) -> String {
    citations
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c.url))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct AttributionRow<'a> {
    portcode: &'a str,
    overview: String,
    sources: String,
    is_error: bool,
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CommentaryError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// Write `commentary_<timestamp>.json` into `folder`.
pub async fn write_results(
    folder: &Path,
    rows: &[ReportRow],
    attribution: &BTreeMap<String, ExecutionResult>,
) -> Result<PathBuf, CommentaryError> {
    tokio::fs::create_dir_all(folder).await?;

    let overviews: Vec<AttributionRow<'_>> = attribution
        .iter()
        .map(|(portcode, r)| AttributionRow {
            portcode,
            overview: if r.is_success() {
                r.text().to_string()
            } else {
                format!("ERROR: {}", r.error_message())
            },
            sources: format_citations(r.citations()),
            is_error: !r.is_success(),
        })
        .collect();

    let payload = serde_json::json!({
        "generated_at": Local::now().to_rfc3339(),
        "commentary": rows,
        "attribution": overviews,
    });
    let json = serde_json::to_string_pretty(&payload)
        .map_err(|e| CommentaryError::Config(format!("failed to serialize results: {e}")))?;

    let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
    let path = folder.join(format!("commentary_{stamp}.json"));
    write_atomic(&path, json.as_bytes()).await?;
    Ok(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn render_run_log(
    input_files: &[PathBuf],
    output_file: &Path,
    errors: &BTreeMap<String, Vec<String>>,
    started: DateTime<Local>,
    finished: DateTime<Local>,
) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let duration = (finished - started).num_milliseconds().max(0) as f64 / 1000.0;

    let mut lines = vec![
        rule.clone(),
        "Commentary Generator - Run Log".to_string(),
        rule.clone(),
        String::new(),
        format!("Run Timestamp: {}", started.format("%Y-%m-%d %H:%M:%S")),
        format!("Duration: {duration:.1} seconds"),
        String::new(),
        "Input Files Processed:".to_string(),
    ];
    lines.extend(input_files.iter().map(|f| format!("  - {}", file_name(f))));
    lines.push(String::new());
    lines.push(format!("Output Workbook: {}", file_name(output_file)));
    lines.push(String::new());

    if errors.is_empty() {
        lines.push("No errors encountered.".to_string());
    } else {
        lines.push("Errors:".to_string());
        lines.push("-".repeat(40));
        for (key, messages) in errors {
            for message in messages {
                lines.push(format!("  [{key}] {message}"));
            }
        }
    }
    lines.push(String::new());
    lines.push(rule);
    lines.join("\n") + "\n"
}

/// Write `log/run_log_<timestamp>.txt` under `folder`.
pub async fn write_run_log(
    folder: &Path,
    input_files: &[PathBuf],
    output_file: &Path,
    errors: &BTreeMap<String, Vec<String>>,
    started: DateTime<Local>,
    finished: DateTime<Local>,
) -> Result<PathBuf, CommentaryError> {
    let log_dir = folder.join("log");
    tokio::fs::create_dir_all(&log_dir).await?;

    let path = log_dir.join(format!(
        "run_log_{}.txt",
        started.format("%Y-%m-%d_%H%M%S")
    ));
    let text = render_run_log(input_files, output_file, errors, started, finished);
    write_atomic(&path, text.as_bytes()).await?;
    tracing::debug!(path = %path.display(), "run log written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 1, 28, 9, 30, secs)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn citations_are_numbered_lines() {
        let cits = vec![Citation::new("https://a.com", "A"), Citation::new("https://b.com", "")];
        assert_eq!(format_citations(&cits), "[1] https://a.com\n[2] https://b.com");
        assert_eq!(format_citations(&[]), "");
    }

    #[test]
    fn failed_rows_are_prefixed() {
        let failed = ExecutionResult::failure(ErrorKind::Timeout, "Request timed out");
        let row = ReportRow::new("XYZ", "AAPL", "Apple Inc.", Some(&failed));
        assert!(row.is_error);
        assert_eq!(row.commentary, "ERROR: Request timed out");
        assert_eq!(ReportRow::new("XYZ", "MSFT", "Microsoft", None).commentary, "ERROR: No result");
    }

    #[test]
    fn run_log_lists_inputs_and_errors() {
        let mut errors = BTreeMap::new();
        errors.insert("XYZ|AAPL".to_string(), vec!["Request timed out".to_string()]);
        let log = render_run_log(
            &[PathBuf::from("/data/in/holdings.xlsx")],
            Path::new("/data/out/commentary.json"),
            &errors,
            at(0),
            at(12),
        );
        assert!(log.contains("Run Timestamp: 2026-01-28 09:30:00"));
        assert!(log.contains("Duration: 12.0 seconds"));
        assert!(log.contains("  - holdings.xlsx"));
        assert!(log.contains("Output Workbook: commentary.json"));
        assert!(log.contains("  [XYZ|AAPL] Request timed out"));
        assert!(!log.contains("No errors encountered."));
    }

    #[test]
    fn clean_run_log() {
        let log = render_run_log(&[], Path::new("out.json"), &BTreeMap::new(), at(0), at(1));
        assert!(log.contains("No errors encountered."));
    }

    #[tokio::test]
    async fn results_file_is_written() {
        let dir = std::env::temp_dir().join(format!("contribnote-report-{}", std::process::id()));
        let rows = vec![ReportRow::new(
            "XYZ",
            "AAPL",
            "Apple Inc.",
            Some(&ExecutionResult::success("Up.", vec![Citation::new("https://a.com", "")])),
        )];
        let path = write_results(&dir, &rows, &BTreeMap::new()).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["commentary"][0]["sources"], "[1] https://a.com");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
