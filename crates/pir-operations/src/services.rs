//! Out-of-browser services some opt-out steps depend on.

use crate::error::{CaptchaError, EmailError};
use pir_browser::ActionContext;
use pir_core::BrokerId;
use std::sync::Arc;

/// Generates relay addresses and fetches the confirmation links sent to them.
#[async_trait::async_trait]
pub trait EmailConfirmationService: Send + Sync {
    /// An address to submit with an opt-out request.
    async fn generate_email(
        &self,
        broker_id: &BrokerId,
        context: &ActionContext,
    ) -> Result<String, EmailError>;

    /// The confirmation link sent to `email`, once it has arrived.
    async fn confirmation_link(&self, email: &str) -> Result<Option<String>, EmailError>;
}

/// Solves captchas found on opt-out forms.
#[async_trait::async_trait]
pub trait CaptchaService: Send + Sync {
    /// Submit a captcha; returns a transaction id to poll.
    async fn submit(&self, site_key: &str, url: &str) -> Result<String, CaptchaError>;

    /// The solution token, once ready.
    async fn solution(&self, transaction_id: &str) -> Result<Option<String>, CaptchaError>;
}

/// Email service used when email confirmation is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmailService;

#[async_trait::async_trait]
impl EmailConfirmationService for DisabledEmailService {
    async fn generate_email(
        &self,
        _broker_id: &BrokerId,
        _context: &ActionContext,
    ) -> Result<String, EmailError> {
        Err(EmailError::Disabled)
    }

    async fn confirmation_link(&self, _email: &str) -> Result<Option<String>, EmailError> {
        Err(EmailError::Disabled)
    }
}

/// Captcha service used when captcha solving is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCaptchaService;

#[async_trait::async_trait]
impl CaptchaService for DisabledCaptchaService {
    async fn submit(&self, _site_key: &str, _url: &str) -> Result<String, CaptchaError> {
        Err(CaptchaError::Disabled)
    }

    async fn solution(&self, _transaction_id: &str) -> Result<Option<String>, CaptchaError> {
        Err(CaptchaError::Disabled)
    }
}

/// The services handed to every runner.
#[derive(Clone)]
pub struct Services {
    /// Email confirmation
    pub email: Arc<dyn EmailConfirmationService>,
    /// Captcha solving
    pub captcha: Arc<dyn CaptchaService>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            email: Arc::new(DisabledEmailService),
            captcha: Arc::new(DisabledCaptchaService),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
