//! Report exports and error-file downloads on the local filesystem.

use crate::engine::backend::BackendClient;
use crate::model::BatchReport;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub fn export_json(path: &Path, report: &BatchReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// One row per outcome.
pub fn export_csv(path: &Path, report: &BatchReport) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    w.write_record([
        "batch_id",
        "file_name",
        "status",
        "total_rows",
        "succeeded_rows",
        "failed_rows",
        "rows_known",
        "upload_id",
        "has_error_file",
        "first_error",
    ])?;
    for o in &report.outcomes {
        w.write_record([
            report.batch_id.clone(),
            o.file_name.clone(),
            crate::report::outcome_status(o).to_string(),
            o.total_rows.to_string(),
            o.succeeded_rows.to_string(),
            o.failed_rows.to_string(),
            o.rows_known.to_string(),
            o.server_upload_id.clone().unwrap_or_default(),
            o.has_error_file.to_string(),
            o.error_messages.first().cloned().unwrap_or_default(),
        ])?;
    }
    w.flush().context("flush csv")?;
    Ok(())
}

/// Where downloaded error files go when no directory was configured.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// File name for the failed-rows spreadsheet of one upload.
pub fn error_file_name(upload_id: &str, source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    let safe_id: String = upload_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}-errors-{safe_id}.xlsx")
}

/// Write `data` to `dest` through a uniquely named temp file in the same directory.
/// The temp file is removed when the write fails.
pub fn write_atomically(dest: &Path, data: &[u8]) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("write {}", tmp.path().display()))?;
    tmp.persist(dest)
        .map_err(|e| e.error)
        .with_context(|| format!("persist {}", dest.display()))?;
    Ok(())
}

/// Download the failed-rows spreadsheet of one upload into `dir`.
pub async fn download_error_file(
    client: &BackendClient,
    upload_id: &str,
    source_name: &str,
    dir: &Path,
) -> Result<PathBuf> {
    let data = client
        .download_error_file(upload_id)
        .await
        .with_context(|| format!("download error file for upload {upload_id}"))?;
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let dest = dir.join(error_file_name(upload_id, source_name));
    write_atomically(&dest, &data)?;
    tracing::info!(upload_id, path = %dest.display(), "error file saved");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregateTally, BatchState, ResponseShape, UploadOutcome};

    fn report() -> BatchReport {
        let outcomes = vec![UploadOutcome {
            file_name: "stock, march.xlsx".into(),
            shape: ResponseShape::Detailed,
            total_rows: 100,
            succeeded_rows: 95,
            failed_rows: 5,
            rows_known: true,
            error_messages: vec!["Row 4: \"kg\" expected".into()],
            server_upload_id: Some("42".into()),
            has_error_file: true,
            http_status: Some(200),
            today_stats: None,
        }];
        BatchReport {
            batch_id: "b1".into(),
            started_utc: "2026-01-01T00:00:00Z".into(),
            finished_utc: "2026-01-01T00:00:02Z".into(),
            state: BatchState::Completed,
            tally: AggregateTally::from_outcomes(&outcomes),
            outcomes,
            abort_reason: None,
        }
    }

    #[test]
    fn json_export_round_trips_tally() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("report.json");
        export_json(&p, &report()).unwrap();
        let back: BatchReport = serde_json::from_slice(&std::fs::read(&p).unwrap()).unwrap();
        assert_eq!(back.tally.rows_failed, 5);
        assert_eq!(back.state, BatchState::Completed);
    }

    #[test]
    fn csv_export_quotes_awkward_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("report.csv");
        export_csv(&p, &report()).unwrap();
        let mut rdr = csv::Reader::from_path(&p).unwrap();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "stock, march.xlsx");
        assert_eq!(&rows[0][2], "PARTIAL");
        assert_eq!(&rows[0][9], "Row 4: \"kg\" expected");
    }

    #[test]
    fn error_file_names_are_sanitized() {
        assert_eq!(error_file_name("42", "stock.xlsx"), "stock-errors-42.xlsx");
        assert_eq!(error_file_name("../x", "a.xls"), "a-errors-___x.xlsx");
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.xlsx");
        write_atomically(&dest, b"data").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
        assert_eq!(entries(dir.path()), ["out.xlsx"]);

        let bad = dir.path().join("missing-dir").join("out.xlsx");
        assert!(write_atomically(&bad, b"data").is_err());
        assert_eq!(entries(dir.path()), ["out.xlsx"]);
    }

    #[test]
    fn concurrent_writes_to_same_destination_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stock-errors-42.xlsx");
        let handles: Vec<_> = (0..2u8)
            .map(|t| {
                let dest = dest.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| write_atomically(&dest, &[t; 256]).is_err())
                        .count()
                })
            })
            .collect();
        let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let data = std::fs::read(&dest).unwrap();
        assert_eq!(data.len(), 256);
        assert!(data.iter().all(|b| *b == data[0]));
        assert_eq!(entries(dir.path()), ["stock-errors-42.xlsx"]);
    }
}
