//! Runs one step of one broker job against an automation backend.
//!
//! A [`SubJobRunner`] hands the step's actions to the backend one at a time.
//! Before each dispatch it waits the pacing delay and checks its
//! cancellation token; after it, it waits for the action's callback under the
//! action timeout. The job's outcome travels through a one-shot
//! [`Completion`] that resolves exactly once, on every exit path.

use crate::actions_handler::ActionsHandler;
use crate::error::{CaptchaError, EmailError, OperationError, Result};
use crate::services::Services;
use crate::url_builder::build_url;
use chrono::Utc;
use pir_broker::{Action, DataBroker, StepKind};
use pir_browser::{
    ActionCallback, ActionContext, ActionReply, ActionResponse, AutomationBackend, BackendFactory,
    Completion,
};
use pir_core::{AppConfig, BrokerId};
use pir_model::{EmailConfirmationData, ExtractedProfile};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// No job started yet
    Idle,
    /// Building the action list and backend session
    Initializing,
    /// Preparing an action for the backend
    Dispatching {
        /// Action being prepared
        action_id: String,
    },
    /// Waiting for the backend to report on an action
    AwaitingCallback {
        /// Action the backend is working on
        action_id: String,
    },
    /// The last job ran every action
    Completed,
    /// The last job ended with an error
    Failed,
    /// The last job was stopped by its cancellation token
    Cancelled,
}

impl RunnerState {
    /// Whether the last job has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Timing and retry knobs of a runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Pause before every action
    pub operation_await_time: Duration,
    /// Longest wait for one action's callback
    pub action_timeout: Duration,
    /// Extra attempts a failed expectation gets
    pub max_expectation_retries: u32,
    /// Pause between confirmation email polls
    pub email_poll_interval: Duration,
    /// Confirmation email polls before giving up
    pub email_max_polls: u32,
    /// Pause between captcha solution polls
    pub captcha_poll_interval: Duration,
    /// Captcha solution polls before giving up
    pub captcha_max_polls: u32,
    /// Where debug snapshots go; `None` disables them
    pub snapshot_dir: Option<PathBuf>,
}

impl RunnerSettings {
    /// Settings from the execution and browser sections of the configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let execution = &config.execution;
        let snapshot_dir = config.browser.debug_snapshots.then(|| {
            config
                .browser
                .snapshot_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("pir-snapshots"))
        });

        Self {
            operation_await_time: execution.operation_await_time(),
            action_timeout: execution.action_timeout(),
            max_expectation_retries: execution.max_expectation_retries,
            email_poll_interval: execution.email_poll_interval(),
            email_max_polls: execution.email_max_polls,
            captcha_poll_interval: execution.captcha_poll_interval(),
            captcha_max_polls: execution.captcha_max_polls,
            snapshot_dir,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What a job runs: one step of one broker, for one subject.
#[derive(Debug, Clone)]
pub struct JobInput<'a> {
    /// Broker whose step runs
    pub broker: &'a DataBroker,
    /// Which step
    pub step_kind: StepKind,
    /// Subject and per-job data the actions read
    pub context: ActionContext,
    /// Confirmation progress left by an earlier run of the same opt-out
    pub email_confirmation: Option<EmailConfirmationData>,
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    /// Last URL the job navigated to
    pub url: Option<String>,
    /// Records the extract actions returned
    pub extracted_profiles: Vec<ExtractedProfile>,
    /// Terminal error; `None` when every action succeeded
    pub error: Option<OperationError>,
    /// Context as the job left it, with any generated email or captcha token
    pub context: ActionContext,
    /// Extraction metadata reported by the backend
    pub meta: Map<String, JsonValue>,
    /// Email confirmation progress of an opt-out
    pub email_confirmation: Option<EmailConfirmationData>,
    /// Number of action dispatches, retries included
    pub actions_dispatched: usize,
}

impl JobResult {
    fn new(context: ActionContext) -> Self {
        Self {
            url: None,
            extracted_profiles: Vec::new(),
            error: None,
            context,
            meta: Map::new(),
            email_confirmation: None,
            actions_dispatched: 0,
        }
    }

    /// Whether the job finished without an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
struct CaptchaInfo {
    site_key: String,
    url: String,
}

struct ActiveJob {
    broker_id: BrokerId,
    backend: Box<dyn AutomationBackend>,
    actions: ActionsHandler,
    result: JobResult,
    completion: Completion<JobResult>,
    retries: u32,
    retry: Option<Action>,
    captcha: Option<CaptchaInfo>,
}

/// Drives one step of a broker job to completion.
pub struct SubJobRunner {
    factory: Arc<dyn BackendFactory>,
    services: Services,
    settings: RunnerSettings,
    cancel: CancellationToken,
    state: RunnerState,
}

impl SubJobRunner {
    /// Create a runner that stops when `cancel` fires.
    #[must_use]
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        services: Services,
        settings: RunnerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            services,
            settings,
            cancel,
            state: RunnerState::Idle,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    /// The token that stops this runner before its next action.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a job and wait for its result.
    ///
    /// Without `backend` a session is created from the factory; without
    /// `actions` the broker's step of `input.step_kind` is used. `Err` is only
    /// returned when the job cannot be set up; failures of the job itself are
    /// reported in [`JobResult::error`].
    pub async fn run(
        &mut self,
        input: JobInput<'_>,
        backend: Option<Box<dyn AutomationBackend>>,
        actions: Option<ActionsHandler>,
        show_ui: bool,
    ) -> Result<JobResult> {
        self.state = RunnerState::Initializing;
        let broker_id = input.broker.id().clone();

        let actions = match actions {
            Some(actions) => actions,
            None => match ActionsHandler::for_step(input.broker, input.step_kind) {
                Ok(actions) => actions,
                Err(e) => {
                    self.state = RunnerState::Failed;
                    return Err(e);
                }
            },
        };
        let backend = match backend {
            Some(backend) => backend,
            None => match self.factory.create(show_ui).await {
                Ok(backend) => backend,
                Err(e) => {
                    self.state = RunnerState::Failed;
                    return Err(e.into());
                }
            },
        };

        info!(
            broker_id = %broker_id,
            step = %actions.step_kind(),
            profile_query_id = %input.context.profile_query.id,
            "starting job"
        );

        let mut result = JobResult::new(input.context);
        result.email_confirmation = input.email_confirmation;

        let (completion, outcome) = Completion::channel();
        let mut job = ActiveJob {
            broker_id,
            backend,
            actions,
            result,
            completion,
            retries: 0,
            retry: None,
            captcha: None,
        };

        self.execute_next_step(&mut job).await;
        self.finalize(job).await;

        outcome
            .await
            .map_err(|_| OperationError::Unknown("job finished without a result".to_string()))
    }

    /// Dispatch actions until the step is exhausted, fails or is cancelled.
    async fn execute_next_step(&mut self, job: &mut ActiveJob) {
        loop {
            if job.retry.is_none() {
                job.retries = 0;
            }
            if job.result.error.is_some() {
                return;
            }

            self.pace().await;
            if self.cancel.is_cancelled() {
                debug!(broker_id = %job.broker_id, "job cancelled before its next action");
                job.result.error = Some(OperationError::Cancelled);
                return;
            }

            let Some(action) = job.retry.take().or_else(|| job.actions.next_action()) else {
                return;
            };
            self.run_next_action(job, action).await;
        }
    }

    async fn pace(&self) {
        tokio::select! {
            () = tokio::time::sleep(self.settings.operation_await_time) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    async fn run_next_action(&mut self, job: &mut ActiveJob, action: Action) {
        let action_id = action.id().to_string();
        self.state = RunnerState::Dispatching {
            action_id: action_id.clone(),
        };
        job.result.actions_dispatched += 1;
        debug!(
            broker_id = %job.broker_id,
            action_id = %action_id,
            action_type = action.action_type(),
            "running action"
        );

        if matches!(action, Action::Extract { .. }) {
            self.snapshot(job).await;
        }

        let succeeded = || ActionCallback::Success {
            action_id: action_id.clone(),
            response: None,
        };
        let outcome = match &action {
            Action::Navigate { url, .. } => match build_url(url, &job.result.context) {
                Ok(url) => self.load_url(job, &action_id, url).await.map(|()| succeeded()),
                Err(e) => Err(e),
            },
            Action::GetEmail { .. } => self.get_email(job).await.map(|()| succeeded()),
            Action::EmailConfirmation {
                polling_time_secs, ..
            } => self
                .confirm_email(job, &action_id, *polling_time_secs)
                .await
                .map(|()| succeeded()),
            Action::SolveCaptcha { .. } => match self.solve_captcha(job).await {
                Ok(token) => {
                    job.result.context.captcha_token = Some(token);
                    self.dispatch(job, &action).await
                }
                Err(e) => Err(e),
            },
            _ => self.dispatch(job, &action).await,
        };

        match outcome {
            Ok(ActionCallback::Success { response, .. }) => {
                self.on_success(job, &action_id, response).await;
            }
            Ok(ActionCallback::ExtractedProfiles { profiles, meta }) => {
                Self::extracted_profiles(job, profiles, meta);
            }
            Ok(ActionCallback::Failed(e)) => self.on_failure(job, action, e.into()),
            Err(e) => self.on_failure(job, action, e),
        }
    }

    async fn dispatch(&mut self, job: &mut ActiveJob, action: &Action) -> Result<ActionCallback> {
        self.state = RunnerState::AwaitingCallback {
            action_id: action.id().to_string(),
        };

        let (reply, callback) = ActionReply::new(action.id());
        let step_kind = job.actions.step_kind();
        let backend = &mut job.backend;
        let context = &job.result.context;

        let exchange = async move {
            if let Err(e) = backend
                .execute(action, step_kind, context, reply.clone())
                .await
            {
                reply.complete_with(e);
            }
            drop(reply);
            callback.await
        };

        match tokio::time::timeout(self.settings.action_timeout, exchange).await {
            Ok(Ok(callback)) => Ok(callback),
            Ok(Err(_)) => Err(OperationError::Unknown(format!(
                "backend dropped the callback of action {}",
                action.id()
            ))),
            Err(_) => Err(OperationError::ActionTimeout {
                action_id: action.id().to_string(),
                timeout: self.settings.action_timeout,
            }),
        }
    }

    /// Navigate and make `url` the job's URL.
    async fn load_url(&mut self, job: &mut ActiveJob, action_id: &str, url: String) -> Result<()> {
        self.state = RunnerState::AwaitingCallback {
            action_id: action_id.to_string(),
        };
        debug!(broker_id = %job.broker_id, url = %url, "loading URL");
        job.result.url = Some(url.clone());

        match tokio::time::timeout(self.settings.action_timeout, job.backend.load(&url)).await {
            Ok(loaded) => loaded.map_err(OperationError::from),
            Err(_) => Err(OperationError::ActionTimeout {
                action_id: action_id.to_string(),
                timeout: self.settings.action_timeout,
            }),
        }
    }

    async fn on_success(
        &mut self,
        job: &mut ActiveJob,
        action_id: &str,
        response: Option<ActionResponse>,
    ) {
        match response {
            Some(ActionResponse::Navigate { url }) => {
                if let Err(e) = self.load_url(job, action_id, url).await {
                    Self::complete_with(job, e);
                }
            }
            Some(ActionResponse::CaptchaInfo { site_key, url }) => {
                job.captcha = Some(CaptchaInfo { site_key, url });
            }
            None => {}
        }
    }

    fn on_failure(&mut self, job: &mut ActiveJob, action: Action, error: OperationError) {
        let retryable = action.is_expectation() && error != OperationError::Cancelled;
        if retryable && job.retries < self.settings.max_expectation_retries {
            job.retries += 1;
            warn!(
                broker_id = %job.broker_id,
                action_id = %action.id(),
                attempt = job.retries,
                error = %error,
                "expectation failed, retrying"
            );
            job.retry = Some(action);
        } else {
            Self::complete_with(job, error);
        }
    }

    fn extracted_profiles(job: &mut ActiveJob, profiles: Vec<ExtractedProfile>, meta: JsonValue) {
        debug!(broker_id = %job.broker_id, count = profiles.len(), "extracted profiles");
        job.result.extracted_profiles.extend(profiles);
        match meta {
            JsonValue::Object(map) => job.result.meta.extend(map),
            JsonValue::Null => {}
            other => {
                job.result.meta.insert("extract".to_string(), other);
            }
        }
    }

    /// Record the job's terminal error. The first error wins.
    fn complete_with(job: &mut ActiveJob, error: OperationError) {
        if job.result.error.is_some() {
            debug!(broker_id = %job.broker_id, error = %error, "ignoring later job error");
            return;
        }
        error!(
            broker_id = %job.broker_id,
            step = %job.actions.step_kind(),
            error = %error,
            "job failed"
        );
        job.result.error = Some(error);
    }

    async fn get_email(&mut self, job: &mut ActiveJob) -> Result<()> {
        // The broker may already have mailed an address handed out earlier.
        if let Some(confirmation) = &job.result.email_confirmation {
            debug!(broker_id = %job.broker_id, "reusing opt-out email of an earlier run");
            job.result.context.email = Some(confirmation.generated_email.clone());
            return Ok(());
        }

        let email = self
            .services
            .email
            .generate_email(&job.broker_id, &job.result.context)
            .await?;
        debug!(broker_id = %job.broker_id, "generated opt-out email");

        job.result.context.email = Some(email.clone());
        job.result.email_confirmation = Some(EmailConfirmationData::new(email));
        Ok(())
    }

    async fn confirm_email(
        &mut self,
        job: &mut ActiveJob,
        action_id: &str,
        polling_time_secs: Option<u64>,
    ) -> Result<()> {
        let email = job.result.context.email.clone().ok_or(EmailError::NoAddress)?;
        let interval = polling_time_secs.map_or(self.settings.email_poll_interval, Duration::from_secs);
        if job.result.email_confirmation.is_none() {
            job.result.email_confirmation = Some(EmailConfirmationData::new(email.clone()));
        }

        let mut polls = 0;
        let link = loop {
            polls += 1;
            if let Some(confirmation) = job.result.email_confirmation.as_mut() {
                confirmation.attempt_count += 1;
            }
            if let Some(link) = self.services.email.confirmation_link(&email).await? {
                break link;
            }
            if polls >= self.settings.email_max_polls {
                return Err(EmailError::LinkNotReceived { attempts: polls }.into());
            }
            self.wait_or_cancel(interval).await?;
        };

        debug!(broker_id = %job.broker_id, polls, "confirmation link received");
        if let Some(confirmation) = job.result.email_confirmation.as_mut() {
            confirmation.link = Some(link.clone());
            confirmation.link_obtained_date = Some(Utc::now());
        }
        self.load_url(job, action_id, link).await
    }

    async fn solve_captcha(&mut self, job: &mut ActiveJob) -> Result<String> {
        let info = job.captcha.clone().ok_or(CaptchaError::MissingInfo)?;
        let transaction = self
            .services
            .captcha
            .submit(&info.site_key, &info.url)
            .await?;

        let mut polls = 0;
        loop {
            polls += 1;
            if let Some(token) = self.services.captcha.solution(&transaction).await? {
                debug!(broker_id = %job.broker_id, polls, "captcha solved");
                return Ok(token);
            }
            if polls >= self.settings.captcha_max_polls {
                return Err(CaptchaError::NotSolved { attempts: polls }.into());
            }
            self.wait_or_cancel(self.settings.captcha_poll_interval).await?;
        }
    }

    async fn wait_or_cancel(&self, interval: Duration) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(interval) => Ok(()),
            () = self.cancel.cancelled() => Err(OperationError::Cancelled),
        }
    }

    /// Save a screenshot and the page HTML when debug snapshots are on.
    async fn snapshot(&mut self, job: &mut ActiveJob) {
        let Some(root) = self.settings.snapshot_dir.as_ref() else {
            return;
        };
        let dir = root.join(job.result.context.profile_query.id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(path = %dir.display(), error = %e, "cannot create snapshot directory");
            return;
        }

        let stem = format!("{}-{}", job.broker_id, job.actions.step_kind());
        if let Err(e) = job.backend.take_snapshot(&dir.join(format!("{stem}.png"))).await {
            warn!(broker_id = %job.broker_id, error = %e, "debug screenshot failed");
        }
        if let Err(e) = job.backend.save_html(&dir.join(format!("{stem}.html"))).await {
            warn!(broker_id = %job.broker_id, error = %e, "debug HTML dump failed");
        }
    }

    /// Release the session and deliver the result.
    async fn finalize(&mut self, mut job: ActiveJob) {
        job.backend.finish().await;

        self.state = match &job.result.error {
            None => RunnerState::Completed,
            Some(OperationError::Cancelled) => RunnerState::Cancelled,
            Some(_) => RunnerState::Failed,
        };
        info!(
            broker_id = %job.broker_id,
            step = %job.actions.step_kind(),
            state = ?self.state,
            profiles = job.result.extracted_profiles.len(),
            "job finished"
        );

        job.completion.resolve(job.result);
    }
}
