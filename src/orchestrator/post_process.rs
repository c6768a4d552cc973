//! Post-batch processing utilities.
//!
//! Handles exports and bulk error-file downloads after a batch finishes.

use crate::cli::Cli;
use crate::engine::backend::BackendClient;
use crate::model::BatchReport;
use crate::storage;
/// Result of post-batch processing, ready for presentation layers.
pub(crate) struct ProcessedBatch {
    pub messages: Vec<String>,
}

/// Export the report if requested and, with `--download-errors`, fetch every
/// failed-row spreadsheet the batch produced. Failures become messages; the
/// batch itself already finished.
pub(crate) async fn process_batch_completion(
    args: &Cli,
    client: &BackendClient,
    report: &BatchReport,
) -> ProcessedBatch {
    let mut messages = Vec::new();

    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, report) {
            Ok(_) => messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = args.export_csv.as_deref() {
        match storage::export_csv(export_path, report) {
            Ok(_) => messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    if let Some(dir) = args.download_errors.as_deref() {
        for o in &report.outcomes {
            let Some(id) = o.error_file_id() else { continue };
            match storage::download_error_file(client, id, &o.file_name, dir).await {
                Ok(p) => messages.push(format!("Saved failed rows: {}", p.display())),
                Err(e) => messages.push(format!("Download failed for {}: {e:#}", o.file_name)),
            }
        }
    }

    ProcessedBatch { messages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregateTally, BatchState, ResponseShape, UploadOutcome};
    use clap::Parser;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn outcome(name: &str, id: Option<&str>) -> UploadOutcome {
        UploadOutcome {
            file_name: name.into(),
            shape: ResponseShape::Detailed,
            total_rows: 10,
            succeeded_rows: 8,
            failed_rows: 2,
            rows_known: true,
            error_messages: vec![],
            server_upload_id: id.map(str::to_string),
            has_error_file: id.is_some(),
            http_status: Some(200),
            today_stats: None,
        }
    }

    #[tokio::test]
    async fn downloads_every_flagged_error_file_and_exports() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ingredients/upload/errors/42"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"xlsx-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("report.json");
        let args = Cli::parse_from([
            "ingredient-upload".to_string(),
            "--text".to_string(),
            "--base-url".to_string(),
            server.uri(),
            "--download-errors".to_string(),
            dir.path().display().to_string(),
            "--export-json".to_string(),
            json_path.display().to_string(),
        ]);
        let client = BackendClient::new(&crate::cli::build_config(&args)).unwrap();
        let outcomes = vec![outcome("stock.xlsx", Some("42")), outcome("clean.xlsx", None)];
        let report = BatchReport {
            batch_id: "b".into(),
            started_utc: String::new(),
            finished_utc: String::new(),
            state: BatchState::Completed,
            tally: AggregateTally::from_outcomes(&outcomes),
            outcomes,
            abort_reason: None,
        };

        let processed = process_batch_completion(&args, &client, &report).await;
        let saved = dir.path().join("stock-errors-42.xlsx");
        assert_eq!(std::fs::read(&saved).unwrap(), b"xlsx-bytes");
        assert!(processed
            .messages
            .iter()
            .any(|m| m == &format!("Saved failed rows: {}", saved.display())));
        assert!(json_path.exists());
        assert!(processed.messages[0].starts_with("Exported JSON"));
    }
}
