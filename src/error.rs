use thiserror::Error;

/// Errors raised while driving a batch through the backend.
///
/// Everything here is fatal to the batch. Files the backend merely refused are
/// not errors; they come back as refused outcomes.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No files to upload")]
    EmptyBatch,

    #[error("An upload is already in progress")]
    AlreadyRunning,

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Could not read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unrecognized response shape from upload endpoint")]
    UnrecognizedShape,

    #[error("Stopped after {count} consecutive failed files")]
    TooManyFailures { count: usize },

    #[error("Stopped after {file} was refused: {message}")]
    PolicyAbort { file: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid {header} header: contains characters not allowed in HTTP headers")]
    InvalidHeader { header: &'static str },
}

impl UploadError {
    /// Short message for the one fatal-error notification a failed batch gets.
    /// Transport details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Transport(_) | UploadError::ReadFile { .. } => {
                "Upload failed. Check the connection and try again.".into()
            }
            UploadError::InvalidJson(_) | UploadError::UnrecognizedShape => {
                "Upload failed: the server sent an unexpected response.".into()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_get_generic_message() {
        let err = UploadError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(
            err.user_message(),
            "Upload failed: the server sent an unexpected response."
        );
    }

    #[test]
    fn policy_errors_keep_their_detail() {
        let err = UploadError::TooManyFailures { count: 3 };
        assert_eq!(err.user_message(), "Stopped after 3 consecutive failed files");
    }
}
