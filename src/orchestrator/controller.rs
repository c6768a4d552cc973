//! Batch lifecycle controller.
//!
//! Owns start/cancel orchestration and emits events for presentation layers.

use crate::cli::gen_batch_id;
use crate::engine::backend::BackendClient;
use crate::engine::{EngineControl, UploadEngine};
use crate::error::UploadError;
use crate::model::{BatchReport, PendingFile, RunConfig, UploadEvent};
use crate::notify::Notification;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Upload(Vec<PendingFile>),
    Cancel,
    DownloadErrors { upload_id: String, file_name: String },
    Quit,
}

/// Internal handle for a running batch.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<Result<BatchReport, UploadError>>>,
}

/// Spawn a new batch under a fresh batch id and return its control handle.
/// On failure the files are handed back untouched.
fn start_run(
    cfg: &RunConfig,
    files: Vec<PendingFile>,
    event_tx: UnboundedSender<UploadEvent>,
) -> Result<RunCtx, (Vec<PendingFile>, UploadError)> {
    let batch_cfg = RunConfig {
        batch_id: gen_batch_id(),
        ..cfg.clone()
    };
    let engine = match UploadEngine::new(batch_cfg) {
        Ok(engine) => engine,
        Err(e) => return Err((files, e)),
    };
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let handle = tokio::spawn(async move { engine.run(files, event_tx, ctrl_rx).await });
    Ok(RunCtx {
        ctrl_tx,
        handle: Some(handle),
    })
}

fn notice(event_tx: &UnboundedSender<UploadEvent>, n: Notification) {
    let _ = event_tx.send(UploadEvent::Notice(n));
}

/// Tell the UI a batch never ran so it can leave the uploading state.
fn reject(event_tx: &UnboundedSender<UploadEvent>, files: Vec<PendingFile>, reason: String) {
    let _ = event_tx.send(UploadEvent::BatchRejected { files, reason });
}

/// Drive batches from UI commands and forward results back to presentation layers.
/// Only one batch runs at a time; an upload request while one is active is refused.
pub(crate) async fn run_controller(
    cfg: RunConfig,
    download_client: BackendClient,
    event_tx: UnboundedSender<UploadEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let download_dir = cfg.download_dir.clone();
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;
    // Cancel watchdog: if a cancel takes too long, keep the UI informed.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        tokio::select! {
            // After quit only the running batch is awaited; a closed channel would spin here.
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Upload(files)) => {
                        if run_ctx.is_some() {
                            notice(&event_tx, Notification::warning(UploadError::AlreadyRunning.to_string()));
                            continue;
                        }
                        if files.is_empty() {
                            reject(&event_tx, files, UploadError::EmptyBatch.to_string());
                            continue;
                        }
                        match start_run(&cfg, files, event_tx.clone()) {
                            Ok(ctx) => run_ctx = Some(ctx),
                            Err((files, e)) => reject(&event_tx, files, e.user_message()),
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            notice(&event_tx, Notification::info("Cancelling…"));
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            notice(&event_tx, Notification::info("Nothing to cancel"));
                        }
                    }
                    Some(UiCommand::DownloadErrors { upload_id, file_name }) => {
                        let client = download_client.clone();
                        let dir = download_dir.clone();
                        let tx = event_tx.clone();
                        notice(&event_tx, Notification::info(format!("Downloading failed rows of {file_name}…")));
                        tokio::spawn(async move {
                            let n = match crate::storage::download_error_file(&client, &upload_id, &file_name, &dir).await {
                                Ok(p) => Notification::success(format!("Saved: {}", p.display())),
                                Err(e) => Notification::error(format!("Download failed: {e:#}")),
                            };
                            let _ = tx.send(UploadEvent::Notice(n));
                        });
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current batch to stop so its report is not lost mid-write.
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        } else {
                            break Ok(());
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok(Ok(report)) => {
                            let _ = event_tx.send(UploadEvent::BatchFinished { report: Box::new(report) });
                        }
                        Ok(Err(e)) => reject(&event_tx, Vec::new(), e.user_message()),
                        Err(e) => reject(&event_tx, Vec::new(), format!("Upload task failed: {e}")),
                    }
                    run_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        break Ok(());
                    }
                }
            }
            // If cancel stalls (e.g., a large file still in flight), keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        notice(&event_tx, Notification::info("Still cancelling…"));
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
