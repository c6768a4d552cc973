pub mod backend;
pub mod response;

use crate::error::UploadError;
use crate::model::{
    AggregateTally, BatchReport, BatchState, FailureAction, PendingFile, RunConfig, UploadEvent,
    UploadOutcome,
};
use crate::notify::Notification;
use backend::BackendClient;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop before the next file; the in-flight request is abandoned.
    Cancel,
}

pub struct UploadEngine {
    cfg: RunConfig,
    client: BackendClient,
}

/// Cancellation flag plus a wakeup so an in-flight request can be abandoned.
#[derive(Clone, Default)]
struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

impl UploadEngine {
    pub fn new(cfg: RunConfig) -> Result<Self, UploadError> {
        let client = BackendClient::new(&cfg)?;
        Ok(Self { cfg, client })
    }

    /// Upload `files` one at a time, in order.
    ///
    /// Refused files are recorded and the loop moves on (unless the failure
    /// policy says otherwise). Transport or parse errors stop the batch. Either
    /// way the returned report holds every outcome collected so far; only an
    /// empty batch is an `Err`.
    pub async fn run(
        self,
        files: Vec<PendingFile>,
        event_tx: mpsc::UnboundedSender<UploadEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<BatchReport, UploadError> {
        if files.is_empty() {
            return Err(UploadError::EmptyBatch);
        }

        let cancel = CancelToken::default();
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Cancel => {
                        cancel2.cancel();
                        break;
                    }
                }
            }
        });

        let started_utc = now_rfc3339();
        let total = files.len();
        let _ = event_tx.send(UploadEvent::BatchStarted {
            batch_id: self.cfg.batch_id.clone(),
            total_files: total,
        });
        tracing::info!(batch = %self.cfg.batch_id, files = total, "batch started");

        let mut outcomes: Vec<UploadOutcome> = Vec::with_capacity(total);
        let mut tally = AggregateTally::default();
        let mut consecutive_failures = 0usize;
        let mut stop: Option<UploadError> = None;

        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                stop = Some(UploadError::Cancelled);
                break;
            }

            let _ = event_tx.send(UploadEvent::Progress {
                index,
                total,
                percent: ((index + 1) as f64 / total as f64) * 100.0,
                status: format!("Uploading {} ({}/{})", file.name, index + 1, total),
            });

            let attempt = tokio::select! {
                res = self.upload_one(file) => res,
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
            };

            let outcome = match attempt {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "batch stopped");
                    stop = Some(e);
                    break;
                }
            };

            tally.record(&outcome);
            let refused = outcome.is_refused();
            let refusal_message = outcome.error_messages.first().cloned().unwrap_or_default();
            let http_refusal = outcome
                .http_status
                .map(|s| !(200..300).contains(&s))
                .unwrap_or(false);
            tracing::info!(
                file = %file.name,
                refused,
                succeeded = outcome.succeeded_rows,
                failed = outcome.failed_rows,
                "file processed"
            );
            outcomes.push(outcome.clone());
            let _ = event_tx.send(UploadEvent::FileCompleted {
                index,
                outcome: Box::new(outcome),
                tally,
            });

            if !refused {
                consecutive_failures = 0;
                continue;
            }

            consecutive_failures += 1;
            let _ = event_tx.send(UploadEvent::Notice(Notification::warning(format!(
                "{}: {}",
                file.name, refusal_message
            ))));

            let action = if http_refusal {
                self.cfg.policy.on_http_error
            } else {
                self.cfg.policy.on_app_error
            };
            if action == FailureAction::Abort {
                stop = Some(UploadError::PolicyAbort {
                    file: file.name.clone(),
                    message: refusal_message,
                });
                break;
            }
            if let Some(limit) = self.cfg.policy.abort_after_consecutive {
                if limit > 0 && consecutive_failures >= limit {
                    stop = Some(UploadError::TooManyFailures {
                        count: consecutive_failures,
                    });
                    break;
                }
            }
        }

        // Dropping a JoinHandle does not stop the listener; abort it explicitly.
        control_handle.abort();

        let (state, abort_reason) = match stop {
            None => {
                let _ = event_tx.send(UploadEvent::Progress {
                    index: total.saturating_sub(1),
                    total,
                    percent: 100.0,
                    status: "Upload complete".into(),
                });
                let note = if tally.rows_failed == 0 && outcomes.iter().all(|o| !o.is_refused()) {
                    Notification::success(format!(
                        "Uploaded {} file(s), {} row(s) imported",
                        tally.files_processed, tally.rows_succeeded
                    ))
                } else {
                    Notification::warning(format!(
                        "Uploaded {} file(s) with {} failed row(s)",
                        tally.files_processed, tally.rows_failed
                    ))
                };
                let _ = event_tx.send(UploadEvent::Notice(note));
                (BatchState::Completed, None)
            }
            Some(UploadError::Cancelled) => {
                let _ = event_tx.send(UploadEvent::ProgressReset);
                let _ = event_tx.send(UploadEvent::Notice(Notification::warning(format!(
                    "Upload cancelled after {} of {} file(s)",
                    outcomes.len(),
                    total
                ))));
                (
                    BatchState::Cancelled,
                    Some(UploadError::Cancelled.to_string()),
                )
            }
            Some(e) => {
                let _ = event_tx.send(UploadEvent::ProgressReset);
                let _ = event_tx.send(UploadEvent::Notice(Notification::error(e.user_message())));
                (BatchState::Failed, Some(e.to_string()))
            }
        };

        tracing::info!(batch = %self.cfg.batch_id, state = state.label(), "batch finished");

        Ok(BatchReport {
            batch_id: self.cfg.batch_id.clone(),
            started_utc,
            finished_utc: now_rfc3339(),
            state,
            tally,
            outcomes,
            abort_reason,
        })
    }

    async fn upload_one(&self, file: &PendingFile) -> Result<UploadOutcome, UploadError> {
        let raw = self.client.upload(file).await?;
        response::normalize(&file.name, raw.status, &raw.body)
    }
}
