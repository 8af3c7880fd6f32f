use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Errors reported by an automation backend.
///
/// The engine treats them as opaque and stores them as a job's terminal
/// error, so they are cloneable and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("expectation {action_id} failed: {reason}")]
    ExpectationFailed { action_id: String, reason: String },

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("action {action_type} is not supported by this backend")]
    Unsupported { action_type: String },

    #[error("backend session already finished")]
    SessionClosed,
}

impl From<std::io::Error> for BrowserError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::ChromiumError(e.to_string())
    }
}
