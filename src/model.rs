use crate::notify::Notification;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub upload_path: String,
    pub errors_path: String,
    pub history_path: String,
    pub batch_id: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    #[serde(skip_serializing)]
    pub cookie: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub user_agent: String,
    pub policy: FailurePolicy,
    pub max_error_messages: usize,
    pub download_dir: PathBuf,
}

/// What to do with a file that the backend refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Record the failed outcome and move on to the next file
    Continue,
    /// Record the failed outcome and stop the batch
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Non-2xx HTTP status.
    pub on_http_error: FailureAction,
    /// 2xx with `success: false`.
    pub on_app_error: FailureAction,
    /// Promote per-file failures to a batch abort after this many in a row.
    pub abort_after_consecutive: Option<usize>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            on_http_error: FailureAction::Continue,
            on_app_error: FailureAction::Continue,
            abort_after_consecutive: None,
        }
    }
}

/// A validated file waiting in the pending set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFile {
    pub name: String,
    pub size_bytes: u64,
    /// MIME type when the source provided one, otherwise the lowercase extension.
    pub mime_or_extension: String,
    pub path: PathBuf,
}

/// Which of the two upload response shapes an outcome was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseShape {
    Legacy,
    Detailed,
    /// The backend refused the file (HTTP error or `success: false`).
    Refused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub file_name: String,
    pub shape: ResponseShape,
    pub total_rows: u64,
    pub succeeded_rows: u64,
    pub failed_rows: u64,
    /// False when the backend refused the file without reporting a row count.
    pub rows_known: bool,
    pub error_messages: Vec<String>,
    pub server_upload_id: Option<String>,
    pub has_error_file: bool,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub today_stats: Option<serde_json::Value>,
}

impl UploadOutcome {
    pub fn is_refused(&self) -> bool {
        self.shape == ResponseShape::Refused
    }

    /// True when the backend accepted the file and every row went through.
    pub fn is_clean(&self) -> bool {
        !self.is_refused() && self.failed_rows == 0
    }

    /// Upload id to fetch the failed-row spreadsheet with, if the backend produced one.
    pub fn error_file_id(&self) -> Option<&str> {
        if self.has_error_file {
            self.server_upload_id.as_deref()
        } else {
            None
        }
    }
}

/// Running totals for one batch. Always derived from the outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTally {
    pub files_processed: u64,
    pub rows_succeeded: u64,
    pub rows_failed: u64,
}

impl AggregateTally {
    pub fn record(&mut self, outcome: &UploadOutcome) {
        // Counts come from the backend unchecked.
        self.files_processed = self.files_processed.saturating_add(1);
        self.rows_succeeded = self.rows_succeeded.saturating_add(outcome.succeeded_rows);
        self.rows_failed = self.rows_failed.saturating_add(outcome.failed_rows);
    }

    pub fn from_outcomes(outcomes: &[UploadOutcome]) -> Self {
        let mut tally = Self::default();
        for o in outcomes {
            tally.record(o);
        }
        tally
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    Idle,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl BatchState {
    pub fn label(self) -> &'static str {
        match self {
            BatchState::Idle => "idle",
            BatchState::Uploading => "uploading",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    #[serde(default)]
    pub started_utc: String,
    #[serde(default)]
    pub finished_utc: String,
    pub state: BatchState,
    pub tally: AggregateTally,
    pub outcomes: Vec<UploadOutcome>,
    /// Set when the batch stopped early because of a fatal error or policy abort.
    #[serde(default)]
    pub abort_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    BatchStarted {
        batch_id: String,
        total_files: usize,
    },
    Progress {
        index: usize,
        total: usize,
        percent: f64,
        status: String,
    },
    /// Hide the progress indicator after a fatal error.
    ProgressReset,
    FileCompleted {
        index: usize,
        // Box to keep UploadEvent small; outcomes carry error lists.
        outcome: Box<UploadOutcome>,
        tally: AggregateTally,
    },
    Notice(Notification),
    BatchFinished {
        report: Box<BatchReport>,
    },
    /// The batch never started; its files are handed back.
    BatchRejected {
        files: Vec<PendingFile>,
        reason: String,
    },
}
