use crate::engine::backend::BackendClient;
use crate::engine::{EngineControl, UploadEngine};
use crate::model::{BatchReport, BatchState, FailureAction, FailurePolicy, RunConfig, UploadEvent};
use crate::selection::{FileSelectionStage, SelectionSource};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ingredient-upload",
    version,
    about = "Bulk Excel ingredient upload for the catering back office, with optional TUI"
)]
pub struct Cli {
    /// Spreadsheets to upload (.xls / .xlsx, at most 10 MiB each)
    pub files: Vec<PathBuf>,

    /// Base URL of the back-office API
    #[arg(long, env = "INGEST_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Upload endpoint path
    #[arg(long, env = "INGEST_UPLOAD_PATH", default_value = "/api/ingredients/upload")]
    pub upload_path: String,

    /// Failed-rows download endpoint path (the upload id is appended)
    #[arg(long, env = "INGEST_ERRORS_PATH", default_value = "/api/ingredients/upload/errors")]
    pub errors_path: String,

    /// Upload history endpoint path
    #[arg(long, env = "INGEST_HISTORY_PATH", default_value = "/api/ingredients/upload/history")]
    pub history_path: String,

    /// Bearer token sent with every request
    #[arg(long, env = "INGEST_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Raw Cookie header sent with every request (e.g. a session cookie)
    #[arg(long, env = "INGEST_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Per-request timeout
    #[arg(long, env = "INGEST_TIMEOUT", default_value = "120s")]
    pub timeout: humantime::Duration,

    /// What to do when the server answers a file with an HTTP error status
    #[arg(long, value_enum, default_value_t = FailureAction::Continue)]
    pub on_http_error: FailureAction,

    /// What to do when the server answers a file with `success: false`
    #[arg(long, value_enum, default_value_t = FailureAction::Continue)]
    pub on_app_error: FailureAction,

    /// Stop the batch after this many failed files in a row
    #[arg(long)]
    pub abort_after_failures: Option<usize>,

    /// Error messages shown per file before collapsing into "+N more"
    #[arg(long, default_value_t = crate::report::DEFAULT_ERROR_PREVIEW)]
    pub max_errors: usize,

    /// Skip files already pending with the same name and size
    #[arg(long)]
    pub dedup: bool,

    /// Print JSON report and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text report and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export the batch report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the batch report as CSV (one row per file)
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Download failed-row spreadsheets into this directory
    #[arg(long, env = "INGEST_DOWNLOAD_DIR")]
    pub download_errors: Option<PathBuf>,

    /// Show past upload batches from the server and exit
    #[arg(long)]
    pub history: bool,

    /// Start uploading the given files as soon as the TUI opens
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub upload_on_launch: bool,
}

impl Cli {
    pub fn is_interactive(&self) -> bool {
        !(self.silent || self.json || self.text || self.history)
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    if args.max_errors == 0 {
        return Err(anyhow::anyhow!("--max-errors must be at least 1"));
    }

    if args.history {
        return run_history(args).await;
    }

    if args.silent {
        return run_json(args, true).await;
    }

    if args.is_interactive() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_json(args, false).await;
    }

    run_text(args).await
}

/// Generate a random client-side batch id.
pub(crate) fn gen_batch_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Build a `RunConfig` from CLI arguments. Each call gets a fresh batch id.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        upload_path: args.upload_path.clone(),
        errors_path: args.errors_path.clone(),
        history_path: args.history_path.clone(),
        batch_id: gen_batch_id(),
        token: args.token.clone(),
        cookie: args.cookie.clone(),
        timeout: Duration::from(args.timeout),
        user_agent: format!("ingredient-upload/{}", env!("CARGO_PKG_VERSION")),
        policy: FailurePolicy {
            on_http_error: args.on_http_error,
            on_app_error: args.on_app_error,
            abort_after_consecutive: args.abort_after_failures,
        },
        max_error_messages: args.max_errors,
        download_dir: args
            .download_errors
            .clone()
            .unwrap_or_else(crate::storage::default_download_dir),
    }
}

/// Validate the files given on the command line.
/// Returns the batch plus one line per rejected file.
fn select_from_args(args: &Cli) -> (Vec<crate::model::PendingFile>, Vec<String>) {
    let mut stage = FileSelectionStage::new(args.dedup);
    let report = stage.select_paths(SelectionSource::Picker, &args.files);
    let lines = report
        .notifications()
        .into_iter()
        .filter(|n| n.severity != crate::notify::Severity::Info)
        .map(|n| n.to_line())
        .collect();
    (stage.take_batch(), lines)
}

/// Forward Ctrl-C to the engine as a cancel request.
fn spawn_ctrl_c_cancel(ctrl_tx: mpsc::UnboundedSender<EngineControl>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_tx.send(EngineControl::Cancel);
        }
    })
}

fn batch_result(report: &BatchReport) -> Result<()> {
    match report.state {
        BatchState::Completed => Ok(()),
        state => Err(anyhow::anyhow!(
            "batch {}: {}",
            state.label(),
            report.abort_reason.as_deref().unwrap_or("stopped")
        )),
    }
}

/// Run the batch and print the report as JSON.
/// `silent` suppresses everything except the final error, if any.
async fn run_json(args: Cli, silent: bool) -> Result<()> {
    let cfg = build_config(&args);
    let (files, rejected) = select_from_args(&args);
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    if let Some(tx) = out_tx.as_ref() {
        for line in rejected {
            let _ = tx.send(OutputLine::Stderr(line));
        }
    }
    if files.is_empty() {
        return Err(anyhow::anyhow!("no valid files to upload"));
    }

    let client = BackendClient::new(&cfg)?;
    let (evt_tx, _) = mpsc::unbounded_channel::<UploadEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let ctrl_c = spawn_ctrl_c_cancel(ctrl_tx);

    let report = UploadEngine::new(cfg)?
        .run(files, evt_tx, ctrl_rx)
        .await
        .context("upload failed")?;
    ctrl_c.abort();

    let processed = crate::orchestrator::process_batch_completion(&args, &client, &report).await;

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = tx.send(OutputLine::Stdout(out));
        for msg in processed.messages {
            let _ = tx.send(OutputLine::Stderr(msg));
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    batch_result(&report)
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (files, rejected) = select_from_args(&args);
    for line in rejected {
        let _ = out_tx.send(OutputLine::Stderr(line));
    }
    if files.is_empty() {
        drop(out_tx);
        let _ = out_handle.await;
        return Err(anyhow::anyhow!("no valid files to upload"));
    }

    let client = BackendClient::new(&cfg)?;
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<UploadEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let ctrl_c = spawn_ctrl_c_cancel(ctrl_tx);

    let max_errors = cfg.max_error_messages;
    let engine = UploadEngine::new(cfg)?;
    let handle = tokio::spawn(async move { engine.run(files, evt_tx, ctrl_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            UploadEvent::BatchStarted {
                batch_id,
                total_files,
            } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "== Batch {batch_id}: {total_files} file(s) =="
                )));
            }
            UploadEvent::Progress {
                percent, status, ..
            } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("[{percent:>3.0}%] {status}")));
            }
            UploadEvent::FileCompleted { index, outcome, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(crate::report::render_row(
                    index + 1,
                    &outcome,
                )));
            }
            UploadEvent::Notice(n) => {
                let _ = out_tx.send(OutputLine::Stderr(n.to_line()));
            }
            UploadEvent::ProgressReset
            | UploadEvent::BatchFinished { .. }
            | UploadEvent::BatchRejected { .. } => {}
        }
    }

    let report = handle.await.context("upload task failed")??;
    ctrl_c.abort();

    let summary = crate::report::build_text_report(&report, max_errors);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    let processed = crate::orchestrator::process_batch_completion(&args, &client, &report).await;
    for msg in processed.messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    drop(out_tx);
    let _ = out_handle.await;
    batch_result(&report)
}

/// Fetch past batches from the server.
async fn run_history(args: Cli) -> Result<()> {
    let client = BackendClient::new(&build_config(&args))?;
    let entries = client
        .fetch_history()
        .await
        .context("failed to fetch upload history")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No uploads yet.");
    }
    for e in &entries {
        println!("{}", history_line(e));
    }
    Ok(())
}

/// One line per history entry; fields vary between server versions.
fn history_line(entry: &serde_json::Value) -> String {
    let field = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| entry.get(*k))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "-".into())
    };
    format!(
        "{}  {}  {}  ok {} / failed {}",
        field(&["id", "upload_id"]),
        field(&["created_at", "uploaded_at", "timestamp"]),
        field(&["file_name", "filename", "name"]),
        field(&["processed_count", "processed", "success_count"]),
        field(&["error_count", "errors", "failed_count"]),
    )
}
