//! Job orchestrator for sweeping due broker jobs.
//!
//! This module provides the `JobOrchestrator`, which picks the entries with
//! due work, runs them concurrently up to the configured limit and stops
//! them when the sweep's execution budget runs out.

use crate::filter::{check_query_completeness, BrokerFilter};
use crate::operations::{run_opt_out_job, run_scan_job, JobOutcome, JobStatus};
use crate::runner::{RunnerSettings, SubJobRunner};
use crate::services::Services;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use pir_broker::{Action, DataBroker, StepKind};
use pir_browser::BackendFactory;
use pir_core::{AppConfig, BrokerId, ConfigFeatureProvider, Feature, FeatureProvider, ProfileQueryId};
use pir_model::{
    is_session_open, BackgroundTaskEvent, BrokerProfileQueryData, JobStore, ProfileQuery,
};
use pir_scheduler::{due_opt_outs, is_scan_due, ExecutionBudget};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of entries worked on at once.
const DEFAULT_CONCURRENT_JOBS: usize = 2;

/// Why an entry with due work did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The broker is switched off
    BrokerDisabled,
    /// The query lacks fields the broker's search needs
    IncompleteQuery(Vec<&'static str>),
    /// Not enough execution budget left to start it
    Budget,
    /// The sweep was cancelled first
    Cancelled,
}

/// An entry left out of a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Broker of the entry
    pub broker_id: BrokerId,
    /// Subject of the entry
    pub profile_query_id: ProfileQueryId,
    /// Why it was left out
    pub reason: SkipReason,
}

/// What one sweep did.
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Session the sweep ran as
    pub session_id: Uuid,
    /// Jobs that ran, in completion order
    pub outcomes: Vec<JobOutcome>,
    /// Entries with due work that did not run
    pub skipped: Vec<SkippedEntry>,
    /// Lifecycle markers recorded for the session
    pub background_events: Vec<BackgroundTaskEvent>,
    /// Whether the budget cut the sweep short
    pub terminated: bool,
}

impl SweepReport {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            outcomes: Vec::new(),
            skipped: Vec::new(),
            background_events: Vec::new(),
            terminated: false,
        }
    }

    fn skip(&mut self, entry: &BrokerProfileQueryData, reason: SkipReason) {
        debug!(broker_id = %entry.broker_id(), reason = ?reason, "skipping entry");
        self.skipped.push(SkippedEntry {
            broker_id: entry.broker_id().clone(),
            profile_query_id: entry.profile_query_id(),
            reason,
        });
    }

    /// Jobs that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    /// Jobs that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, JobStatus::Failed(_)))
            .count()
    }

    /// Jobs stopped by cancellation or the budget.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == JobStatus::Cancelled)
            .count()
    }
}

/// Runs due scan and opt-out jobs.
pub struct JobOrchestrator {
    /// Source of browser sessions, one per job
    factory: Arc<dyn BackendFactory>,
    /// Persistence of job records and session markers
    store: Arc<dyn JobStore>,
    /// Feature switches
    features: Arc<dyn FeatureProvider>,
    /// Email and captcha services handed to runners
    services: Services,
    /// Runner timing
    settings: RunnerSettings,
    /// Maximum entries worked on at once
    concurrent_jobs: usize,
    /// Show the browser window
    show_ui: bool,
}

impl JobOrchestrator {
    /// Create an orchestrator with default settings and disabled services.
    #[must_use]
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        store: Arc<dyn JobStore>,
        features: Arc<dyn FeatureProvider>,
    ) -> Self {
        Self {
            factory,
            store,
            features,
            services: Services::default(),
            settings: RunnerSettings::default(),
            concurrent_jobs: DEFAULT_CONCURRENT_JOBS,
            show_ui: false,
        }
    }

    /// Create an orchestrator configured from `config`.
    #[must_use]
    pub fn from_config(
        config: &AppConfig,
        factory: Arc<dyn BackendFactory>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let features = Arc::new(ConfigFeatureProvider::from_config(&config.features));
        Self::new(factory, store, features)
            .with_settings(RunnerSettings::from_config(config))
            .with_concurrent_jobs(config.execution.concurrent_jobs)
            .with_show_ui(!config.browser.headless)
    }

    /// Use these email and captcha services.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Use these runner settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the maximum number of entries worked on at once.
    #[must_use]
    pub fn with_concurrent_jobs(mut self, max: usize) -> Self {
        self.concurrent_jobs = max.max(1);
        self
    }

    /// Show the browser window while jobs run.
    #[must_use]
    pub fn with_show_ui(mut self, show_ui: bool) -> Self {
        self.show_ui = show_ui;
        self
    }

    /// Pair every broker with every query, with their stored records.
    pub async fn load_entries(
        &self,
        brokers: &[DataBroker],
        queries: &[ProfileQuery],
    ) -> pir_model::Result<Vec<BrokerProfileQueryData>> {
        let records = self.store.load_all().await?;
        Ok(BrokerProfileQueryData::assemble(brokers, queries, records))
    }

    /// Run every due job of the entries `filter` selects.
    ///
    /// Entries are worked on concurrently up to the configured limit, the
    /// ones whose scan is most overdue first. Within an entry the scan runs
    /// before its due opt-outs. When the budget's cutoff passes or `cancel`
    /// fires, running jobs stop before their next action and no new entry
    /// starts. Each entry is saved once its jobs are done.
    pub async fn run_sweep(
        &self,
        entries: &mut [BrokerProfileQueryData],
        filter: &BrokerFilter,
        budget: &ExecutionBudget,
        cancel: &CancellationToken,
    ) -> SweepReport {
        let session_id = budget.session_id();
        let mut report = SweepReport::new(session_id);
        self.record_background_event(&mut report, BackgroundTaskEvent::started(session_id))
            .await;

        let now = Utc::now();
        let mut candidates = Vec::new();
        for entry in entries.iter_mut() {
            if !filter.matches(&entry.data_broker) || !self.has_due_work(entry, now) {
                continue;
            }
            if !self.features.is_broker_enabled(entry.broker_id()) {
                report.skip(entry, SkipReason::BrokerDisabled);
                continue;
            }
            if let Err(missing) = check_query_completeness(&entry.data_broker, &entry.profile_query)
            {
                report.skip(entry, SkipReason::IncompleteQuery(missing));
                continue;
            }
            candidates.push(entry);
        }
        candidates.sort_by_key(|entry| entry.scan_job_data.preferred_run_date);

        info!(
            session_id = %session_id,
            entries = candidates.len(),
            max_concurrent = self.concurrent_jobs,
            "starting sweep"
        );

        let jobs_token = cancel.child_token();
        let deadline = budget.cutoff();
        let cutoff = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(cutoff);
        let mut cut_off = false;

        let mut queue = candidates.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            // Respect concurrency limit
            while in_flight.len() < self.concurrent_jobs {
                let Some(entry) = queue.next() else {
                    break;
                };
                if let Some(reason) = Self::refusal(&report, budget, &jobs_token, cut_off) {
                    report.skip(entry, reason);
                    continue;
                }
                in_flight.push(self.process_entry(entry, budget, jobs_token.clone()));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(outcomes) = in_flight.next() => report.outcomes.extend(outcomes),
                () = &mut cutoff, if !cut_off => {
                    cut_off = true;
                    warn!(
                        session_id = %session_id,
                        elapsed = ?budget.elapsed(),
                        running = in_flight.len(),
                        "execution budget exhausted, stopping jobs"
                    );
                    jobs_token.cancel();
                }
            }
        }

        report.terminated = cut_off;
        let finished = if cut_off {
            BackgroundTaskEvent::terminated(session_id, budget.elapsed())
        } else {
            BackgroundTaskEvent::completed(session_id, budget.elapsed())
        };
        self.record_background_event(&mut report, finished).await;

        info!(
            session_id = %session_id,
            jobs = report.outcomes.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            skipped = report.skipped.len(),
            terminated = cut_off,
            "sweep finished"
        );
        report
    }

    /// Why a new entry may not start now, if it may not.
    fn refusal(
        report: &SweepReport,
        budget: &ExecutionBudget,
        token: &CancellationToken,
        cut_off: bool,
    ) -> Option<SkipReason> {
        if cut_off
            || !budget.allows_new_job()
            || !is_session_open(&report.background_events, report.session_id)
        {
            Some(SkipReason::Budget)
        } else if token.is_cancelled() {
            Some(SkipReason::Cancelled)
        } else {
            None
        }
    }

    /// Run an entry's scan, then its due opt-outs, then save it.
    async fn process_entry(
        &self,
        entry: &mut BrokerProfileQueryData,
        budget: &ExecutionBudget,
        cancel: CancellationToken,
    ) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();

        if self.features.is_enabled(Feature::Scans) && is_scan_due(&entry.scan_job_data, Utc::now()) {
            let mut runner = self.runner(cancel.clone());
            outcomes.push(run_scan_job(&mut runner, entry, self.show_ui).await);
        }

        if self.opt_outs_enabled_for(&entry.data_broker) {
            for index in due_opt_outs(entry, Utc::now()) {
                if cancel.is_cancelled() || !budget.allows_new_job() {
                    debug!(broker_id = %entry.broker_id(), "no time left for further opt-outs");
                    break;
                }
                let mut runner = self.runner(cancel.clone());
                outcomes.push(run_opt_out_job(&mut runner, entry, index, self.show_ui).await);
            }
        }

        if let Err(e) = self.store.save(entry).await {
            error!(broker_id = %entry.broker_id(), error = %e, "failed to save job records");
        }
        outcomes
    }

    fn runner(&self, cancel: CancellationToken) -> SubJobRunner {
        SubJobRunner::new(
            Arc::clone(&self.factory),
            self.services.clone(),
            self.settings.clone(),
            cancel,
        )
    }

    fn has_due_work(&self, entry: &BrokerProfileQueryData, now: DateTime<Utc>) -> bool {
        let scan_due =
            self.features.is_enabled(Feature::Scans) && is_scan_due(&entry.scan_job_data, now);
        scan_due
            || (self.opt_outs_enabled_for(&entry.data_broker) && !due_opt_outs(entry, now).is_empty())
    }

    /// Whether opt-outs may run for `broker` with the current features.
    fn opt_outs_enabled_for(&self, broker: &DataBroker) -> bool {
        if !self.features.is_enabled(Feature::OptOuts) || !broker.performs_opt_outs() {
            return false;
        }
        let actions = broker
            .step(StepKind::OptOut)
            .map(|step| step.actions.as_slice())
            .unwrap_or_default();

        let email_ok = self.features.is_enabled(Feature::EmailConfirmation)
            || !actions.iter().any(Action::needs_email);
        let captcha_ok = self.features.is_enabled(Feature::CaptchaSolving)
            || !actions.iter().any(Action::needs_captcha);
        email_ok && captcha_ok
    }

    async fn record_background_event(&self, report: &mut SweepReport, event: BackgroundTaskEvent) {
        if let Err(e) = self.store.record_background_event(&event).await {
            warn!(session_id = %event.session_id, error = %e, "failed to record background event");
        }
        report.background_events.push(event);
    }
}
