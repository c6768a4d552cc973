//! Upload response normalization.
//!
//! The upload endpoint has answered with two incompatible JSON bodies over its
//! lifetime. Both are parsed into [`UploadPayload`] here and turned into one
//! [`UploadOutcome`]; nothing past this module looks at raw JSON.

use crate::error::UploadError;
use crate::model::{ResponseShape, UploadOutcome};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetailedCounts {
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub updated_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub upload_id: Option<serde_json::Value>,
    #[serde(default)]
    pub error_details: Vec<String>,
    #[serde(default)]
    pub has_error_file: bool,
    #[serde(default)]
    pub today_stats: Option<serde_json::Value>,
}

/// `errors` was a count in most deployments and a message list in a few.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LegacyErrors {
    Count(u64),
    Messages(Vec<String>),
}

impl Default for LegacyErrors {
    fn default() -> Self {
        LegacyErrors::Count(0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyCounts {
    pub total: u64,
    pub processed: u64,
    #[serde(default)]
    pub errors: LegacyErrors,
    #[serde(default)]
    pub error_messages: Vec<String>,
    #[serde(default)]
    pub upload_id: Option<serde_json::Value>,
}

/// Counts portion of a successful body. `Detailed` is tried first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UploadPayload {
    Detailed { details: DetailedCounts },
    Legacy(LegacyCounts),
}

/// Envelope shared by both shapes.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Row count a refused body may still carry, in either shape.
#[derive(Debug, Default, Deserialize)]
struct RefusedCounts {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    details: Option<RefusedDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct RefusedDetails {
    #[serde(default)]
    total_rows: Option<u64>,
    #[serde(default)]
    error_details: Vec<String>,
}

/// Turn one HTTP response into an outcome.
///
/// A non-2xx status or `success: false` yields a refused outcome (per-file
/// failure). A body that is not JSON, or a successful body in neither known
/// shape, is an error (fatal to the batch).
pub fn normalize(file_name: &str, status: u16, body: &str) -> Result<UploadOutcome, UploadError> {
    let is_success_status = (200..300).contains(&status);

    if !is_success_status {
        // Error pages are often HTML; keep whatever message we can find.
        let value: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let message = value
            .as_ref()
            .and_then(|v| serde_json::from_value::<Envelope>(v.clone()).ok())
            .and_then(|e| e.message.or(e.error))
            .unwrap_or_else(|| format!("HTTP {status}"));
        let counts = value
            .and_then(|v| serde_json::from_value::<RefusedCounts>(v).ok())
            .unwrap_or_default();
        return Ok(refused(file_name, Some(status), message, counts));
    }

    let value: serde_json::Value = serde_json::from_str(body)?;
    let envelope: Envelope = serde_json::from_value(value.clone())?;

    if !envelope.success {
        let message = envelope
            .message
            .or(envelope.error)
            .unwrap_or_else(|| "Upload rejected by server".to_string());
        let counts = serde_json::from_value::<RefusedCounts>(value).unwrap_or_default();
        return Ok(refused(file_name, Some(status), message, counts));
    }

    let payload: UploadPayload =
        serde_json::from_value(value).map_err(|_| UploadError::UnrecognizedShape)?;
    Ok(from_payload(file_name, status, payload))
}

pub fn from_payload(file_name: &str, status: u16, payload: UploadPayload) -> UploadOutcome {
    match payload {
        UploadPayload::Detailed { details } => UploadOutcome {
            file_name: file_name.to_string(),
            shape: ResponseShape::Detailed,
            total_rows: details.total_rows,
            succeeded_rows: details.processed_count.saturating_add(details.updated_count),
            failed_rows: details.error_count,
            rows_known: true,
            error_messages: details.error_details,
            server_upload_id: details.upload_id.as_ref().and_then(id_to_string),
            has_error_file: details.has_error_file,
            http_status: Some(status),
            today_stats: details.today_stats,
        },
        UploadPayload::Legacy(legacy) => {
            let (failed_rows, mut messages) = match legacy.errors {
                LegacyErrors::Count(n) => (n, Vec::new()),
                LegacyErrors::Messages(m) => (m.len() as u64, m),
            };
            messages.extend(legacy.error_messages);
            UploadOutcome {
                file_name: file_name.to_string(),
                shape: ResponseShape::Legacy,
                total_rows: legacy.total,
                succeeded_rows: legacy.processed,
                failed_rows,
                rows_known: true,
                error_messages: messages,
                server_upload_id: legacy.upload_id.as_ref().and_then(id_to_string),
                // The legacy endpoint never produced error files.
                has_error_file: false,
                http_status: Some(status),
                today_stats: None,
            }
        }
    }
}

fn refused(
    file_name: &str,
    status: Option<u16>,
    message: String,
    counts: RefusedCounts,
) -> UploadOutcome {
    let (total, extra) = match counts.details {
        Some(d) => (d.total_rows.or(counts.total), d.error_details),
        None => (counts.total, Vec::new()),
    };
    let mut error_messages = vec![message];
    error_messages.extend(extra);
    UploadOutcome {
        file_name: file_name.to_string(),
        shape: ResponseShape::Refused,
        total_rows: total.unwrap_or(0),
        succeeded_rows: 0,
        failed_rows: total.unwrap_or(0),
        rows_known: total.is_some(),
        error_messages,
        server_upload_id: None,
        has_error_file: false,
        http_status: status,
        today_stats: None,
    }
}

fn id_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detailed_shape_adds_processed_and_updated() {
        let body = json!({
            "success": true,
            "details": {
                "total_rows": 100,
                "processed_count": 90,
                "updated_count": 5,
                "error_count": 5,
                "upload_id": 42,
                "has_error_file": true,
                "error_details": ["Row 3: unknown unit 'kgs'"],
                "today_stats": {"uploads": 4}
            }
        });
        let o = normalize("stock.xlsx", 200, &body.to_string()).unwrap();
        assert_eq!(o.shape, ResponseShape::Detailed);
        assert_eq!(o.total_rows, 100);
        assert_eq!(o.succeeded_rows, 95);
        assert_eq!(o.failed_rows, 5);
        assert_eq!(o.error_file_id(), Some("42"));
        assert_eq!(o.error_messages, vec!["Row 3: unknown unit 'kgs'"]);
        assert_eq!(o.today_stats, Some(json!({"uploads": 4})));
    }

    #[test]
    fn detailed_counts_saturate_instead_of_overflowing() {
        let body = json!({
            "success": true,
            "details": {"total_rows": 1, "processed_count": u64::MAX, "updated_count": 7, "error_count": 0}
        });
        let o = normalize("huge.xlsx", 200, &body.to_string()).unwrap();
        assert_eq!(o.succeeded_rows, u64::MAX);
    }

    #[test]
    fn legacy_shape_maps_flat_counts() {
        let body = json!({"success": true, "total": 12, "processed": 9, "errors": 3});
        let o = normalize("old.xls", 200, &body.to_string()).unwrap();
        assert_eq!(o.shape, ResponseShape::Legacy);
        assert_eq!((o.total_rows, o.succeeded_rows, o.failed_rows), (12, 9, 3));
        assert!(o.error_messages.is_empty());
        assert!(!o.has_error_file);
    }

    #[test]
    fn legacy_error_list_counts_as_failures() {
        let body = json!({
            "success": true,
            "total": 3,
            "processed": 1,
            "errors": ["Row 2: missing name", "Row 3: missing price"],
            "upload_id": "u-9"
        });
        let o = normalize("old.xls", 201, &body.to_string()).unwrap();
        assert_eq!(o.failed_rows, 2);
        assert_eq!(o.error_messages.len(), 2);
        assert_eq!(o.server_upload_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn success_false_is_refused_with_message() {
        let body = json!({"success": false, "message": "parse error"});
        let o = normalize("bad.xlsx", 200, &body.to_string()).unwrap();
        assert!(o.is_refused());
        assert!(!o.rows_known);
        assert_eq!(o.failed_rows, 0);
        assert_eq!(o.error_messages, vec!["parse error"]);
    }

    #[test]
    fn refused_body_with_total_counts_every_row_failed() {
        let body = json!({
            "success": false,
            "error": "header row missing",
            "details": {"total_rows": 10, "error_details": ["Row 1: no header"]}
        });
        let o = normalize("bad.xlsx", 200, &body.to_string()).unwrap();
        assert!(o.rows_known);
        assert_eq!((o.total_rows, o.succeeded_rows, o.failed_rows), (10, 0, 10));
        assert_eq!(o.error_messages, vec!["header row missing", "Row 1: no header"]);
    }

    #[test]
    fn http_error_with_html_body_is_refused() {
        let o = normalize("a.xlsx", 502, "<html>Bad Gateway</html>").unwrap();
        assert!(o.is_refused());
        assert_eq!(o.http_status, Some(502));
        assert_eq!(o.error_messages, vec!["HTTP 502"]);
    }

    #[test]
    fn http_error_keeps_json_message() {
        let body = json!({"success": false, "message": "file too large"});
        let o = normalize("a.xlsx", 413, &body.to_string()).unwrap();
        assert_eq!(o.error_messages, vec!["file too large"]);
    }

    #[test]
    fn garbage_success_body_is_fatal() {
        assert!(matches!(
            normalize("a.xlsx", 200, "not json"),
            Err(UploadError::InvalidJson(_))
        ));
        assert!(matches!(
            normalize("a.xlsx", 200, r#"{"success": true, "ok": 1}"#),
            Err(UploadError::UnrecognizedShape)
        ));
    }
}
