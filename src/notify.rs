//! Transient user notifications.
//!
//! Every failure path in the upload workflow ends in one of these. Presentation
//! layers decide how to show them: the TUI renders auto-dismissing toasts, text
//! mode prints a prefixed line on stderr.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// How long a toast of this severity stays on screen.
    pub fn toast_ttl(self) -> Duration {
        match self {
            Severity::Info | Severity::Success => Duration::from_secs(3),
            Severity::Warning => Duration::from_secs(5),
            Severity::Error => Duration::from_secs(8),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Single-line rendering for text mode.
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.severity.label(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_linger_longer_than_info() {
        assert!(Severity::Error.toast_ttl() > Severity::Info.toast_ttl());
        assert!(Severity::Warning.toast_ttl() > Severity::Success.toast_ttl());
    }

    #[test]
    fn line_carries_severity_prefix() {
        let n = Notification::warning("book.csv: unsupported type");
        assert_eq!(n.to_line(), "[warning] book.csv: unsupported type");
    }
}
