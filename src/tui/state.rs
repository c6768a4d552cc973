use crate::model::{AggregateTally, BatchReport, BatchState, PendingFile, UploadEvent, UploadOutcome};
use crate::notify::{Notification, Severity};
use crate::selection::{parse_dropped_paths, FileSelectionStage, SelectionSource};
use ratatui::style::Color;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Delay between a batch finishing and the Results tab coming into view.
pub const RESULTS_REVEAL_DELAY: Duration = Duration::from_millis(400);
const MAX_TOASTS: usize = 4;

pub struct Toast {
    pub note: Notification,
    pub expires_at: Instant,
}

pub struct Progress {
    pub percent: f64,
    pub status: String,
}

/// Everything the upload screen shows. Owned by the UI thread only.
pub struct UiState {
    pub tab: usize,
    pub selection: FileSelectionStage,
    pub pending_selected: usize,
    pub batch_state: BatchState,
    pub batch_id: Option<String>,
    pub progress: Option<Progress>,
    pub outcomes: Vec<UploadOutcome>,
    pub tally: AggregateTally,
    pub last_report: Option<BatchReport>,
    pub results_selected: usize,
    pub detail_open: bool,
    pub toasts: VecDeque<Toast>,
    /// Text typed into the add-file prompt, when it is open.
    pub input: Option<String>,
    pub reveal_results_at: Option<Instant>,
    pub max_errors: usize,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            selection: FileSelectionStage::new(false),
            pending_selected: 0,
            batch_state: BatchState::Idle,
            batch_id: None,
            progress: None,
            outcomes: Vec::new(),
            tally: AggregateTally::default(),
            last_report: None,
            results_selected: 0,
            detail_open: false,
            toasts: VecDeque::new(),
            input: None,
            reveal_results_at: None,
            max_errors: crate::report::DEFAULT_ERROR_PREVIEW,
        }
    }
}

pub fn severity_color(s: Severity) -> Color {
    match s {
        Severity::Info => Color::Cyan,
        Severity::Success => Color::Green,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    }
}

impl UiState {
    pub fn push_toast(&mut self, note: Notification) {
        let expires_at = Instant::now() + note.severity.toast_ttl();
        self.toasts.push_back(Toast { note, expires_at });
        while self.toasts.len() > MAX_TOASTS {
            self.toasts.pop_front();
        }
    }

    pub fn prune_toasts(&mut self, now: Instant) {
        self.toasts.retain(|t| t.expires_at > now);
    }

    pub fn is_uploading(&self) -> bool {
        self.batch_state == BatchState::Uploading
    }

    /// Run pasted or typed paths through the pending-set validation.
    pub fn add_paths(&mut self, source: SelectionSource, text: &str) {
        let paths = parse_dropped_paths(text);
        if paths.is_empty() {
            return;
        }
        let report = self.selection.select_paths(source, &paths);
        for n in report.notifications() {
            self.push_toast(n);
        }
    }

    pub fn remove_selected_pending(&mut self) {
        if let Some(f) = self.selection.remove(self.pending_selected) {
            self.push_toast(Notification::info(format!("Removed {}", f.name)));
        }
        let len = self.selection.pending().len();
        if self.pending_selected >= len {
            self.pending_selected = len.saturating_sub(1);
        }
    }

    pub fn clear_pending(&mut self) {
        self.selection.clear();
        self.pending_selected = 0;
        self.input = None;
    }

    /// Hand the pending set to a new batch, resetting the previous batch's results.
    /// Returns `None` while a batch is running or nothing is pending.
    pub fn begin_batch(&mut self) -> Option<Vec<PendingFile>> {
        if self.is_uploading() {
            self.push_toast(Notification::warning("An upload is already in progress"));
            return None;
        }
        if !self.selection.can_upload() {
            self.push_toast(Notification::warning("Add at least one .xls/.xlsx file first"));
            return None;
        }
        self.batch_state = BatchState::Uploading;
        self.outcomes.clear();
        self.tally = AggregateTally::default();
        self.last_report = None;
        self.results_selected = 0;
        self.detail_open = false;
        self.reveal_results_at = None;
        self.progress = Some(Progress {
            percent: 0.0,
            status: "Starting…".into(),
        });
        self.pending_selected = 0;
        Some(self.selection.take_batch())
    }

    /// Undo [`Self::begin_batch`] for a batch that never reached the engine.
    pub fn reject_batch(&mut self, files: Vec<PendingFile>, reason: String) {
        self.selection.restore(files);
        self.batch_state = BatchState::Idle;
        self.progress = None;
        self.push_toast(Notification::error(reason));
    }

    pub fn selected_outcome(&self) -> Option<&UploadOutcome> {
        self.outcomes.get(self.results_selected)
    }

    pub fn apply_event(&mut self, ev: UploadEvent) {
        match ev {
            UploadEvent::BatchStarted { batch_id, .. } => {
                self.batch_id = Some(batch_id);
                self.batch_state = BatchState::Uploading;
            }
            UploadEvent::Progress {
                percent, status, ..
            } => {
                self.progress = Some(Progress { percent, status });
            }
            UploadEvent::ProgressReset => self.progress = None,
            UploadEvent::FileCompleted { outcome, tally, .. } => {
                self.outcomes.push(*outcome);
                self.tally = tally;
            }
            UploadEvent::Notice(n) => self.push_toast(n),
            UploadEvent::BatchFinished { report } => {
                self.batch_state = report.state;
                // The report is authoritative; rebuild the live view from it.
                self.outcomes = report.outcomes.clone();
                self.tally = AggregateTally::from_outcomes(&self.outcomes);
                self.last_report = Some(*report);
                self.reveal_results_at = Some(Instant::now() + RESULTS_REVEAL_DELAY);
            }
            UploadEvent::BatchRejected { files, reason } => self.reject_batch(files, reason),
        }
    }

    /// Switch to the Results tab once the reveal delay has passed.
    pub fn maybe_reveal_results(&mut self, now: Instant) {
        if let Some(at) = self.reveal_results_at {
            if now >= at {
                self.reveal_results_at = None;
                if self.tab != 2 {
                    self.tab = 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseShape;

    fn outcome(name: &str) -> UploadOutcome {
        UploadOutcome {
            file_name: name.into(),
            shape: ResponseShape::Legacy,
            total_rows: 4,
            succeeded_rows: 3,
            failed_rows: 1,
            rows_known: true,
            error_messages: vec!["Row 2: bad".into()],
            server_upload_id: None,
            has_error_file: false,
            http_status: Some(200),
            today_stats: None,
        }
    }

    fn state_with_file() -> (UiState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("stock.xlsx");
        std::fs::write(&p, b"x").unwrap();
        let mut state = UiState::default();
        state.add_paths(SelectionSource::Drop, &format!("'{}'", p.display()));
        (state, dir)
    }

    #[test]
    fn dropped_path_lands_in_pending_set() {
        let (state, _dir) = state_with_file();
        assert_eq!(state.selection.pending().len(), 1);
        assert_eq!(state.toasts.back().unwrap().note.severity, Severity::Info);
    }

    #[test]
    fn begin_batch_requires_files_and_idle_state() {
        let mut empty = UiState::default();
        assert!(empty.begin_batch().is_none());
        assert_eq!(empty.batch_state, BatchState::Idle);

        let (mut state, _dir) = state_with_file();
        state.outcomes.push(outcome("old.xlsx"));
        let batch = state.begin_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(state.outcomes.is_empty());
        assert!(state.is_uploading());
        assert!(state.begin_batch().is_none());
    }

    #[test]
    fn events_accumulate_outcomes_in_order() {
        let mut state = UiState::default();
        for (i, name) in ["a.xlsx", "b.xlsx"].iter().enumerate() {
            let o = outcome(name);
            let mut tally = state.tally;
            tally.record(&o);
            state.apply_event(UploadEvent::FileCompleted {
                index: i,
                outcome: Box::new(o),
                tally,
            });
        }
        let names: Vec<_> = state.outcomes.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names, ["a.xlsx", "b.xlsx"]);
        assert_eq!(state.tally.rows_failed, 2);
    }

    #[test]
    fn finished_batch_reveals_results_after_delay() {
        let mut state = UiState::default();
        let outcomes = vec![outcome("a.xlsx")];
        state.apply_event(UploadEvent::BatchFinished {
            report: Box::new(BatchReport {
                batch_id: "b".into(),
                started_utc: String::new(),
                finished_utc: String::new(),
                state: BatchState::Completed,
                tally: AggregateTally::from_outcomes(&outcomes),
                outcomes,
                abort_reason: None,
            }),
        });
        assert_eq!(state.batch_state, BatchState::Completed);
        assert_eq!(state.tab, 0);
        state.maybe_reveal_results(Instant::now());
        assert_eq!(state.tab, 0);
        state.maybe_reveal_results(Instant::now() + RESULTS_REVEAL_DELAY * 2);
        assert_eq!(state.tab, 1);
    }

    #[test]
    fn progress_reset_hides_gauge() {
        let mut state = UiState::default();
        state.apply_event(UploadEvent::Progress {
            index: 0,
            total: 2,
            percent: 50.0,
            status: "Uploading a.xlsx (1/2)".into(),
        });
        assert!(state.progress.is_some());
        state.apply_event(UploadEvent::ProgressReset);
        assert!(state.progress.is_none());
    }

    #[test]
    fn rejected_batch_returns_files_and_leaves_uploading() {
        let (mut state, _dir) = state_with_file();
        let batch = state.begin_batch().unwrap();
        assert!(state.selection.pending().is_empty());
        state.apply_event(UploadEvent::BatchRejected {
            files: batch,
            reason: "Invalid URL: not a url".into(),
        });
        assert_eq!(state.batch_state, BatchState::Idle);
        assert!(state.progress.is_none());
        assert_eq!(state.selection.pending().len(), 1);
        assert_eq!(state.toasts.back().unwrap().note.severity, Severity::Error);
        assert!(state.begin_batch().is_some());
    }

    #[test]
    fn toasts_expire_and_are_capped() {
        let mut state = UiState::default();
        for i in 0..6 {
            state.push_toast(Notification::info(format!("n{i}")));
        }
        assert_eq!(state.toasts.len(), MAX_TOASTS);
        assert_eq!(state.toasts.front().unwrap().note.message, "n2");
        state.prune_toasts(Instant::now() + Duration::from_secs(60));
        assert!(state.toasts.is_empty());
    }
}
