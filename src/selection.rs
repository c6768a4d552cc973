//! Pending-file set and client-side validation.
//!
//! Files reach the pending set only through [`FileSelectionStage::select_files`],
//! whether they came from the command line, the TUI add prompt or a paste of
//! dropped paths.

use crate::model::PendingFile;
use crate::notify::Notification;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-file size ceiling, enforced before any network call.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["xls", "xlsx"];

pub const ACCEPTED_MIME_TYPES: [&str; 2] = [
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Where a selection came from. Both go through the same validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Picker,
    Drop,
}

/// A file the user pointed at, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub size_bytes: u64,
    pub mime: Option<String>,
    pub path: PathBuf,
}

impl CandidateFile {
    /// Stat a local file. The terminal gives us no MIME type, so only the
    /// extension check can pass for these.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            size_bytes: meta.len(),
            mime: None,
            path: path.to_path_buf(),
        })
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("unsupported type (expected .xls or .xlsx)")]
    UnsupportedType,

    #[error("too large ({} > {} MiB)", format_size(*.size), MAX_FILE_BYTES / (1024 * 1024))]
    TooLarge { size: u64 },

    #[error("cannot read file: {0}")]
    Unreadable(String),
}

/// Either an accepted MIME type or an accepted extension is enough.
pub fn validate(candidate: &CandidateFile) -> Result<(), RejectReason> {
    let mime_ok = candidate
        .mime
        .as_deref()
        .map(|m| ACCEPTED_MIME_TYPES.contains(&m.trim()))
        .unwrap_or(false);
    let ext_ok = candidate
        .extension()
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false);
    if !mime_ok && !ext_ok {
        return Err(RejectReason::UnsupportedType);
    }
    if candidate.size_bytes > MAX_FILE_BYTES {
        return Err(RejectReason::TooLarge {
            size: candidate.size_bytes,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub name: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: Vec<Rejection>,
}

impl SelectionReport {
    /// One warning per rejected file, plus a summary line when something was added.
    pub fn notifications(&self) -> Vec<Notification> {
        let mut out: Vec<Notification> = self
            .rejected
            .iter()
            .map(|r| Notification::warning(format!("{}: {}", r.name, r.reason)))
            .collect();
        if self.duplicates > 0 {
            out.push(Notification::info(format!(
                "Skipped {} duplicate file(s)",
                self.duplicates
            )));
        }
        if self.accepted > 0 {
            out.push(Notification::info(format!(
                "Added {} file(s) to the upload list",
                self.accepted
            )));
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct FileSelectionStage {
    pending: Vec<PendingFile>,
    dedup: bool,
}

impl FileSelectionStage {
    pub fn new(dedup: bool) -> Self {
        Self {
            pending: Vec::new(),
            dedup,
        }
    }

    pub fn select_files(
        &mut self,
        source: SelectionSource,
        raw: Vec<CandidateFile>,
    ) -> SelectionReport {
        let mut report = SelectionReport::default();
        for candidate in raw {
            if let Err(reason) = validate(&candidate) {
                tracing::debug!(file = %candidate.name, ?source, %reason, "rejected file");
                report.rejected.push(Rejection {
                    name: candidate.name,
                    reason,
                });
                continue;
            }
            if self.dedup && self.contains(&candidate.name, candidate.size_bytes) {
                report.duplicates += 1;
                continue;
            }
            let mime_or_extension = candidate
                .mime
                .clone()
                .or_else(|| candidate.extension())
                .unwrap_or_default();
            self.pending.push(PendingFile {
                name: candidate.name,
                size_bytes: candidate.size_bytes,
                mime_or_extension,
                path: candidate.path,
            });
            report.accepted += 1;
        }
        report
    }

    /// Stat each path and funnel the results through [`Self::select_files`].
    /// Paths that cannot be read are rejected like any other invalid file.
    pub fn select_paths(&mut self, source: SelectionSource, paths: &[PathBuf]) -> SelectionReport {
        let mut candidates = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        for p in paths {
            match CandidateFile::from_path(p) {
                Ok(c) => candidates.push(c),
                Err(e) => unreadable.push(Rejection {
                    name: p.display().to_string(),
                    reason: RejectReason::Unreadable(e.to_string()),
                }),
            }
        }
        let mut report = self.select_files(source, candidates);
        report.rejected.extend(unreadable);
        report
    }

    fn contains(&self, name: &str, size: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.name == name && p.size_bytes == size)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn remove(&mut self, index: usize) -> Option<PendingFile> {
        if index < self.pending.len() {
            Some(self.pending.remove(index))
        } else {
            None
        }
    }

    pub fn can_upload(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[PendingFile] {
        &self.pending
    }

    /// Hand the pending set over to the orchestrator, leaving it empty.
    pub fn take_batch(&mut self) -> Vec<PendingFile> {
        std::mem::take(&mut self.pending)
    }

    /// Put a batch that never started back in front of anything added since.
    pub fn restore(&mut self, mut files: Vec<PendingFile>) {
        files.append(&mut self.pending);
        self.pending = files;
    }
}

/// Split pasted text into paths. Terminals paste dropped files as
/// whitespace-separated, optionally quoted or `file://` prefixed paths.
pub fn parse_dropped_paths(text: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (None, '\\') => escaped = true,
            (None, '\'' | '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            (_, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }

    out.into_iter()
        .map(|s| match s.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None => PathBuf::from(s),
        })
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}
