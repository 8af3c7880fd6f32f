use pir_browser::BrowserError;
use pir_model::JobErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Why a job run ended without success.
///
/// Stored as the job's terminal error, so cloneable and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),

    #[error("backend error: {0}")]
    Backend(#[from] BrowserError),

    #[error("action {action_id} got no callback within {timeout:?}")]
    ActionTimeout { action_id: String, timeout: Duration },

    #[error("email service error: {0}")]
    EmailService(#[from] EmailError),

    #[error("captcha service error: {0}")]
    Captcha(#[from] CaptchaError),
}

impl OperationError {
    /// The classification written to the history log.
    #[must_use]
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::Unknown(message) => JobErrorKind::Unknown {
                message: message.clone(),
            },
            Self::Backend(e) => JobErrorKind::Backend {
                message: e.to_string(),
            },
            Self::ActionTimeout { action_id, .. } => JobErrorKind::ActionTimeout {
                action_id: action_id.clone(),
            },
            Self::EmailService(e) => JobErrorKind::EmailService {
                message: e.to_string(),
            },
            Self::Captcha(e) => JobErrorKind::Captcha {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("email confirmation is disabled")]
    Disabled,

    #[error("no email address was generated for this job")]
    NoAddress,

    #[error("no confirmation link after {attempts} polls")]
    LinkNotReceived { attempts: u32 },

    #[error("{0}")]
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptchaError {
    #[error("captcha solving is disabled")]
    Disabled,

    #[error("no captcha info was read before solving")]
    MissingInfo,

    #[error("captcha not solved after {attempts} polls")]
    NotSolved { attempts: u32 },

    #[error("{0}")]
    Service(String),
}

pub type Result<T> = std::result::Result<T, OperationError>;
