//! Result reporting for a finished batch.
//!
//! Formats the tally, the per-file rows and the per-file detail view. Every
//! function here is pure: the same outcomes always render the same lines.

use crate::model::{AggregateTally, BatchReport, BatchState, UploadOutcome};

pub const DEFAULT_ERROR_PREVIEW: usize = 5;

/// Pre-formatted lines for text output.
pub(crate) struct TextReport {
    pub lines: Vec<String>,
}

pub fn render_summary(tally: &AggregateTally) -> Vec<String> {
    vec![
        format!("Files processed: {}", tally.files_processed),
        format!("Rows succeeded:  {}", tally.rows_succeeded),
        format!("Rows failed:     {}", tally.rows_failed),
    ]
}

/// One short status word per outcome.
pub fn outcome_status(o: &UploadOutcome) -> &'static str {
    if o.is_refused() {
        "FAILED"
    } else if o.failed_rows > 0 {
        "PARTIAL"
    } else {
        "OK"
    }
}

pub fn render_row(position: usize, o: &UploadOutcome) -> String {
    let counts = if o.rows_known {
        format!(
            "{} ok / {} failed / {} total",
            o.succeeded_rows, o.failed_rows, o.total_rows
        )
    } else {
        "rows unknown".to_string()
    };
    let mut line = format!("{:>3}. [{}] {}  {}", position, outcome_status(o), o.file_name, counts);
    if let Some(id) = o.error_file_id() {
        line.push_str(&format!("  (error file: {id})"));
    }
    line
}

pub fn render_per_file(outcomes: &[UploadOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .enumerate()
        .map(|(i, o)| render_row(i + 1, o))
        .collect()
}

/// Drill-down view of a single outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeDetail {
    pub header: Vec<String>,
    pub errors: Vec<String>,
    /// Messages left out of `errors`.
    pub hidden_errors: usize,
    pub download_id: Option<String>,
}

impl OutcomeDetail {
    pub fn lines(&self) -> Vec<String> {
        let mut out = self.header.clone();
        if !self.errors.is_empty() {
            out.push("Errors:".into());
            out.extend(self.errors.iter().map(|e| format!("  - {e}")));
        }
        if self.hidden_errors > 0 {
            out.push(format!("  +{} more", self.hidden_errors));
        }
        if let Some(id) = &self.download_id {
            out.push(format!("Failed rows available for download (upload id {id})"));
        }
        out
    }
}

pub fn render_detail(o: &UploadOutcome, limit: usize) -> OutcomeDetail {
    let limit = limit.max(1);
    let mut header = vec![format!("{} ({})", o.file_name, outcome_status(o))];
    if o.rows_known {
        header.push(format!(
            "Rows: {} total, {} succeeded, {} failed",
            o.total_rows, o.succeeded_rows, o.failed_rows
        ));
    } else {
        header.push("Rows: unknown (file refused by server)".into());
    }
    if let Some(status) = o.http_status {
        header.push(format!("HTTP status: {status}"));
    }
    if let Some(stats) = o.today_stats.as_ref().and_then(format_today_stats) {
        header.push(format!("Today: {stats}"));
    }

    let errors: Vec<String> = o.error_messages.iter().take(limit).cloned().collect();
    OutcomeDetail {
        header,
        hidden_errors: o.error_messages.len().saturating_sub(errors.len()),
        errors,
        download_id: o.error_file_id().map(str::to_string),
    }
}

/// `today_stats` is free-form; flatten scalar members into `key=value` pairs.
fn format_today_stats(v: &serde_json::Value) -> Option<String> {
    let obj = v.as_object()?;
    let parts: Vec<String> = obj
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::Number(n) => Some(format!("{k}={n}")),
            serde_json::Value::String(s) => Some(format!("{k}={s}")),
            serde_json::Value::Bool(b) => Some(format!("{k}={b}")),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Full text report: state, summary, per-file rows, then the detail of every
/// outcome that has something to show.
pub(crate) fn build_text_report(report: &BatchReport, error_limit: usize) -> TextReport {
    let mut lines = Vec::new();
    lines.push(format!(
        "Batch {}: {}",
        report.batch_id,
        report.state.label()
    ));
    if let Some(reason) = report.abort_reason.as_deref() {
        if report.state != BatchState::Completed {
            lines.push(format!("Stopped: {reason}"));
        }
    }
    lines.extend(render_summary(&report.tally));

    if !report.outcomes.is_empty() {
        lines.push(String::new());
        lines.extend(render_per_file(&report.outcomes));
    }

    for o in report.outcomes.iter().filter(|o| !o.is_clean()) {
        lines.push(String::new());
        lines.extend(render_detail(o, error_limit).lines());
    }

    TextReport { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseShape;

    fn outcome(name: &str, ok: u64, failed: u64, errors: usize) -> UploadOutcome {
        UploadOutcome {
            file_name: name.into(),
            shape: ResponseShape::Detailed,
            total_rows: ok + failed,
            succeeded_rows: ok,
            failed_rows: failed,
            rows_known: true,
            error_messages: (1..=errors).map(|i| format!("Row {i}: bad unit")).collect(),
            server_upload_id: Some("42".into()),
            has_error_file: failed > 0,
            http_status: Some(200),
            today_stats: None,
        }
    }

    fn refused(name: &str) -> UploadOutcome {
        UploadOutcome {
            shape: ResponseShape::Refused,
            rows_known: false,
            total_rows: 0,
            succeeded_rows: 0,
            failed_rows: 0,
            error_messages: vec!["parse error".into()],
            server_upload_id: None,
            has_error_file: false,
            ..outcome(name, 0, 0, 0)
        }
    }

    #[test]
    fn summary_rendering_is_idempotent() {
        let outcomes = vec![outcome("a.xlsx", 90, 5, 5), refused("b.xlsx")];
        let tally = AggregateTally::from_outcomes(&outcomes);
        assert_eq!(render_summary(&tally), render_summary(&tally));
        assert_eq!(render_per_file(&outcomes), render_per_file(&outcomes));
        assert_eq!(render_summary(&tally)[0], "Files processed: 2");
    }

    #[test]
    fn rows_follow_submission_order() {
        let outcomes = vec![refused("first.xlsx"), outcome("second.xlsx", 10, 0, 0)];
        let rows = render_per_file(&outcomes);
        assert!(rows[0].contains("[FAILED] first.xlsx"));
        assert!(rows[0].contains("rows unknown"));
        assert!(rows[1].contains("[OK] second.xlsx"));
        assert!(rows[1].contains("10 ok / 0 failed / 10 total"));
    }

    #[test]
    fn detail_truncates_errors_with_more_marker() {
        let o = outcome("a.xlsx", 10, 12, 12);
        let d = render_detail(&o, 3);
        assert_eq!(d.errors.len(), 3);
        assert_eq!(d.hidden_errors, 9);
        assert_eq!(d.download_id.as_deref(), Some("42"));
        let lines = d.lines();
        assert!(lines.contains(&"  +9 more".to_string()));
        assert!(lines.last().unwrap().contains("upload id 42"));
    }

    #[test]
    fn detail_without_error_file_has_no_download_action() {
        let d = render_detail(&refused("b.xlsx"), DEFAULT_ERROR_PREVIEW);
        assert_eq!(d.download_id, None);
        assert_eq!(d.hidden_errors, 0);
        assert!(d.header[1].contains("unknown"));
    }

    #[test]
    fn today_stats_shown_when_present() {
        let mut o = outcome("a.xlsx", 1, 0, 0);
        o.today_stats = Some(serde_json::json!({"uploads": 3, "rows": 120, "nested": {}}));
        let d = render_detail(&o, 5);
        let today = d.header.iter().find(|l| l.starts_with("Today: ")).unwrap();
        assert!(today.contains("rows=120"));
        assert!(today.contains("uploads=3"));
        assert!(!today.contains("nested"));
    }

    #[test]
    fn text_report_includes_stop_reason_and_details() {
        let report = BatchReport {
            batch_id: "b1".into(),
            started_utc: String::new(),
            finished_utc: String::new(),
            state: BatchState::Failed,
            tally: AggregateTally::from_outcomes(&[outcome("a.xlsx", 3, 1, 1)]),
            outcomes: vec![outcome("a.xlsx", 3, 1, 1)],
            abort_reason: Some("Connection failed: refused".into()),
        };
        let text = build_text_report(&report, 5);
        assert_eq!(text.lines[0], "Batch b1: failed");
        assert_eq!(text.lines[1], "Stopped: Connection failed: refused");
        assert!(text.lines.iter().any(|l| l == "  - Row 1: bad unit"));
    }
}
