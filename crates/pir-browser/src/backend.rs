use crate::callback::ActionReply;
use crate::error::Result;
use chrono::Utc;
use pir_broker::{Action, ElementType, StepKind};
use pir_model::{ExtractedProfile, ProfileQuery};
use std::path::Path;

/// Data an action may need beyond its own definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    /// Person the job runs for
    pub profile_query: ProfileQuery,
    /// Record an opt-out removes
    pub extracted_profile: Option<ExtractedProfile>,
    /// Address generated for this opt-out
    pub email: Option<String>,
    /// Solved captcha token, once available
    pub captcha_token: Option<String>,
}

impl ActionContext {
    /// Context of a scan.
    #[must_use]
    pub fn for_scan(profile_query: ProfileQuery) -> Self {
        Self {
            profile_query,
            extracted_profile: None,
            email: None,
            captcha_token: None,
        }
    }

    /// Context of an opt-out of `extracted_profile`.
    #[must_use]
    pub fn for_opt_out(profile_query: ProfileQuery, extracted_profile: ExtractedProfile) -> Self {
        Self {
            profile_query,
            email: extracted_profile.email.clone(),
            extracted_profile: Some(extracted_profile),
            captcha_token: None,
        }
    }

    /// Value a `fill` action types into an element of the given type.
    #[must_use]
    pub fn value_for(&self, element_type: ElementType) -> Option<String> {
        let query = &self.profile_query;
        let extracted = self.extracted_profile.as_ref();

        match element_type {
            ElementType::FirstName => Some(query.first_name.clone()),
            ElementType::MiddleName => query.middle_name.clone(),
            ElementType::LastName => Some(query.last_name.clone()),
            ElementType::FullName => Some(query.full_name()),
            ElementType::City => Some(query.city.clone()),
            ElementType::State => Some(query.state.clone()),
            ElementType::Age => extracted
                .and_then(|p| p.age.clone())
                .or_else(|| Some(query.age_at(Utc::now()).to_string())),
            ElementType::Email => self.email.clone(),
            ElementType::ProfileUrl => extracted.and_then(|p| p.profile_url.clone()),
            ElementType::Button | ElementType::Link => None,
        }
    }
}

/// One exclusive browser-automation session.
///
/// `execute` reports the action's outcome through `reply`, either before it
/// returns or later from another task. Returning `Err` means the action
/// could not be dispatched at all.
#[async_trait::async_trait]
pub trait AutomationBackend: Send {
    /// Navigate to a URL.
    async fn load(&mut self, url: &str) -> Result<()>;

    /// Run one scripted action.
    async fn execute(
        &mut self,
        action: &Action,
        step_kind: StepKind,
        context: &ActionContext,
        reply: ActionReply,
    ) -> Result<()>;

    /// Write a screenshot of the current page.
    async fn take_snapshot(&mut self, path: &Path) -> Result<()>;

    /// Write the current page's HTML.
    async fn save_html(&mut self, path: &Path) -> Result<()>;

    /// Release the session. Called exactly once, on every exit path.
    async fn finish(&mut self);
}

/// Creates backend sessions, one per job.
#[async_trait::async_trait]
pub trait BackendFactory: Send + Sync {
    /// Start a session, visible when `show_ui` is set.
    async fn create(&self, show_ui: bool) -> Result<Box<dyn AutomationBackend>>;
}
