//! Scan and opt-out jobs: run a step, then write its outcome back.
//!
//! The runner only reports what happened on the broker's site. Turning that
//! into history events, new opt-out jobs and next run dates happens here,
//! against the entry the orchestrator lends out for the duration of the job.

use crate::error::OperationError;
use crate::runner::{JobInput, JobResult, SubJobRunner};
use chrono::{DateTime, Utc};
use pir_broker::StepKind;
use pir_browser::ActionContext;
use pir_core::{BrokerId, ExtractedProfileId, ProfileQueryId};
use pir_model::{BrokerProfileQueryData, EventType, ExtractedProfile, JobErrorKind, OptOutJobData};
use pir_scheduler::{expedite_confirmation_scan, schedule_opt_out, schedule_scan};
use tracing::{debug, info, warn};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Every action succeeded
    Succeeded,
    /// The job stopped at its cancellation token
    Cancelled,
    /// The job failed
    Failed(JobErrorKind),
}

/// Summary of one job, for sweep reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Broker the job ran against
    pub broker_id: BrokerId,
    /// Subject of the job
    pub profile_query_id: ProfileQueryId,
    /// Scan or opt-out
    pub step_kind: StepKind,
    /// Record an opt-out targeted
    pub extracted_profile_id: Option<ExtractedProfileId>,
    /// How it ended
    pub status: JobStatus,
    /// Records a scan found
    pub matches: usize,
}

impl JobOutcome {
    fn new(
        entry: &BrokerProfileQueryData,
        step_kind: StepKind,
        extracted_profile_id: Option<ExtractedProfileId>,
        error: Option<&OperationError>,
        matches: usize,
    ) -> Self {
        let status = match error {
            None => JobStatus::Succeeded,
            Some(OperationError::Cancelled) => JobStatus::Cancelled,
            Some(e) => JobStatus::Failed(e.kind()),
        };
        Self {
            broker_id: entry.broker_id().clone(),
            profile_query_id: entry.profile_query_id(),
            step_kind,
            extracted_profile_id,
            status,
            matches,
        }
    }

    /// Whether the job succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Run the entry's scan and record its outcome.
pub async fn run_scan_job(
    runner: &mut SubJobRunner,
    entry: &mut BrokerProfileQueryData,
    show_ui: bool,
) -> JobOutcome {
    entry.scan_job_data.record(EventType::ScanStarted);

    let input = JobInput {
        broker: &entry.data_broker,
        step_kind: StepKind::Scan,
        context: ActionContext::for_scan(entry.profile_query.clone()),
        email_confirmation: None,
    };
    let result = runner.run(input, None, None, show_ui).await;

    let now = Utc::now();
    match result {
        Ok(JobResult {
            error: None,
            extracted_profiles,
            ..
        }) => {
            let matches = apply_scan_result(entry, &extracted_profiles, now);
            JobOutcome::new(entry, StepKind::Scan, None, None, matches)
        }
        Ok(JobResult {
            error: Some(error), ..
        })
        | Err(error) => {
            record_scan_failure(entry, &error, now);
            JobOutcome::new(entry, StepKind::Scan, None, Some(&error), 0)
        }
    }
}

/// Run the opt-out at `index` of the entry's opt-out jobs and record its outcome.
pub async fn run_opt_out_job(
    runner: &mut SubJobRunner,
    entry: &mut BrokerProfileQueryData,
    index: usize,
    show_ui: bool,
) -> JobOutcome {
    let Some(job) = entry.opt_out_job_data.get_mut(index) else {
        let error = OperationError::Unknown(format!("no opt-out job at index {index}"));
        return JobOutcome::new(entry, StepKind::OptOut, None, Some(&error), 0);
    };
    job.record(EventType::OptOutStarted);
    let extracted_profile_id = job.extracted_profile_id();

    let mut context =
        ActionContext::for_opt_out(entry.profile_query.clone(), job.extracted_profile.clone());
    let email_confirmation = job.email_confirmation.clone();
    if context.email.is_none() {
        context.email = email_confirmation
            .as_ref()
            .map(|confirmation| confirmation.generated_email.clone());
    }

    let input = JobInput {
        broker: &entry.data_broker,
        step_kind: StepKind::OptOut,
        context,
        email_confirmation,
    };
    let result = runner.run(input, None, None, show_ui).await;

    let now = Utc::now();
    let error = match result {
        Ok(result) => apply_opt_out_result(entry, index, result, now),
        Err(error) => {
            record_opt_out_failure(entry, index, &error, now);
            Some(error)
        }
    };
    JobOutcome::new(
        entry,
        StepKind::OptOut,
        extracted_profile_id,
        error.as_ref(),
        0,
    )
}

/// Write a successful scan back into the entry; returns the match count.
///
/// New records get an opt-out job. Known records that were confirmed
/// removed but are listed again reappear. Records no longer listed are
/// confirmed removed.
pub fn apply_scan_result(
    entry: &mut BrokerProfileQueryData,
    found: &[ExtractedProfile],
    now: DateTime<Utc>,
) -> usize {
    if found.is_empty() {
        entry.scan_job_data.record_at(EventType::NoMatchFound, now);
    } else {
        entry.scan_job_data.record_at(
            EventType::MatchesFound {
                count: found.len(),
            },
            now,
        );
    }

    for profile in found {
        let existing = entry
            .opt_out_job_data
            .iter_mut()
            .find(|job| job.extracted_profile.is_same_record(profile));

        match existing {
            Some(job) if job.is_confirmed_removed() && !job.is_removed_by_user => {
                info!(
                    broker_id = %job.broker_id,
                    extracted_profile_id = ?job.extracted_profile_id(),
                    "removed record is listed again"
                );
                job.extracted_profile.removed_date = None;
                job.submitted_success_date = None;
                job.preferred_run_date = Some(now);
                job.record_at(EventType::ReAppearance, now);
            }
            Some(_) => {}
            None => {
                let id = entry.next_extracted_profile_id();
                debug!(broker_id = %entry.broker_id(), extracted_profile_id = %id, "new record found");
                entry.opt_out_job_data.push(OptOutJobData::new(
                    entry.broker_id().clone(),
                    entry.profile_query_id(),
                    profile.clone().with_id(id),
                    now,
                ));
            }
        }
    }

    for job in &mut entry.opt_out_job_data {
        let listed = found
            .iter()
            .any(|profile| job.extracted_profile.is_same_record(profile));
        if !listed && !job.is_removed_by_user && !job.is_confirmed_removed() {
            info!(
                broker_id = %job.broker_id,
                extracted_profile_id = ?job.extracted_profile_id(),
                "record no longer listed, removal confirmed"
            );
            job.extracted_profile.removed_date = Some(now);
            job.record_at(EventType::OptOutConfirmed, now);
        }
    }

    schedule_scan(entry, true, now);
    found.len()
}

fn record_scan_failure(entry: &mut BrokerProfileQueryData, error: &OperationError, now: DateTime<Utc>) {
    warn!(broker_id = %entry.broker_id(), error = %error, "scan failed");
    entry
        .scan_job_data
        .record_at(EventType::Error { error: error.kind() }, now);

    // A cancelled run keeps its schedule and stays due.
    if *error != OperationError::Cancelled {
        schedule_scan(entry, false, now);
    }
}

/// Write an opt-out run back into the entry; returns its error, if any.
///
/// The generated address and its confirmation progress are kept whether or
/// not the run succeeded, so the next run waits on the same mailbox.
pub fn apply_opt_out_result(
    entry: &mut BrokerProfileQueryData,
    index: usize,
    result: JobResult,
    now: DateTime<Utc>,
) -> Option<OperationError> {
    let JobResult {
        error,
        context,
        email_confirmation,
        ..
    } = result;

    let schedule = entry.data_broker.schedule;
    let Some(job) = entry.opt_out_job_data.get_mut(index) else {
        return Some(
            error.unwrap_or_else(|| OperationError::Unknown(format!("no opt-out job at index {index}"))),
        );
    };

    if let Some(email) = context.email {
        job.extracted_profile.email = Some(email);
    }
    if email_confirmation.is_some() {
        job.email_confirmation = email_confirmation;
    }

    if let Some(error) = error {
        record_opt_out_failure(entry, index, &error, now);
        return Some(error);
    }

    job.record_at(EventType::OptOutRequested, now);
    schedule_opt_out(job, &schedule, true, now);
    info!(
        broker_id = %job.broker_id,
        extracted_profile_id = ?job.extracted_profile_id(),
        "opt-out requested"
    );

    expedite_confirmation_scan(&mut entry.scan_job_data, &schedule, now);
    None
}

fn record_opt_out_failure(
    entry: &mut BrokerProfileQueryData,
    index: usize,
    error: &OperationError,
    now: DateTime<Utc>,
) {
    let schedule = entry.data_broker.schedule;
    if let Some(job) = entry.opt_out_job_data.get_mut(index) {
        warn!(
            broker_id = %job.broker_id,
            extracted_profile_id = ?job.extracted_profile_id(),
            error = %error,
            "opt-out failed"
        );
        job.record_at(EventType::Error { error: error.kind() }, now);

        // Cancellation stops a run before the broker sees it; not an attempt.
        if *error != OperationError::Cancelled {
            schedule_opt_out(job, &schedule, false, now);
        }
    }
}
