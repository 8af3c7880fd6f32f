//! Job scheduling: which jobs are due, and when they run next.

use chrono::{DateTime, Utc};
use pir_broker::BrokerSchedule;
use pir_model::{BrokerProfileQueryData, OptOutJobData, ScanJobData};
use tracing::debug;

/// Returns true if a job with these dates should run at `now`.
///
/// A set preferred date is due once reached. An unset one means "as soon as
/// possible" only for a job that has never run.
#[must_use]
pub fn is_job_due(
    preferred_run_date: Option<DateTime<Utc>>,
    last_run_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match preferred_run_date {
        Some(preferred) => preferred <= now,
        None => last_run_date.is_none(),
    }
}

/// Whether the scan should run at `now`.
#[must_use]
pub fn is_scan_due(scan: &ScanJobData, now: DateTime<Utc>) -> bool {
    is_job_due(scan.preferred_run_date, scan.last_run_date, now)
}

/// Whether the opt-out should run at `now`.
///
/// Removed-by-user and confirmed jobs never run, nor do jobs that used up the
/// broker's attempt limit.
#[must_use]
pub fn is_opt_out_due(job: &OptOutJobData, schedule: &BrokerSchedule, now: DateTime<Utc>) -> bool {
    if job.is_removed_by_user || job.is_confirmed_removed() {
        return false;
    }
    if schedule
        .max_attempts
        .is_some_and(|max| job.attempt_count >= max)
    {
        return false;
    }
    is_job_due(job.preferred_run_date, job.last_run_date, now)
}

/// Due opt-out jobs of an entry, by index into `opt_out_job_data`.
#[must_use]
pub fn due_opt_outs(entry: &BrokerProfileQueryData, now: DateTime<Utc>) -> Vec<usize> {
    entry
        .opt_out_job_data
        .iter()
        .enumerate()
        .filter(|(_, job)| is_opt_out_due(job, &entry.data_broker.schedule, now))
        .map(|(index, _)| index)
        .collect()
}

/// Record a scan run and pick its next date.
///
/// Failed runs retry after `retry_error`; successful ones come back after
/// `maintenance_scan`, or earlier when a pending removal needs confirming.
pub fn schedule_scan(entry: &mut BrokerProfileQueryData, succeeded: bool, now: DateTime<Utc>) {
    let schedule = entry.data_broker.schedule;
    entry.scan_job_data.last_run_date = Some(now);

    let mut next = if succeeded {
        now + schedule.maintenance_scan()
    } else {
        now + schedule.retry_error()
    };

    if succeeded {
        let confirmation = entry
            .opt_out_job_data
            .iter()
            .filter(|job| !job.is_removed_by_user && !job.is_confirmed_removed())
            .filter_map(|job| job.submitted_success_date)
            .map(|submitted| submitted + schedule.confirm_opt_out_scan())
            .filter(|date| *date > now)
            .min();
        if let Some(confirmation) = confirmation {
            next = next.min(confirmation);
        }
    }

    entry.scan_job_data.preferred_run_date = Some(next);
    debug!(
        broker_id = %entry.broker_id(),
        profile_query_id = %entry.profile_query_id(),
        succeeded,
        next_run = %next,
        "scheduled scan"
    );
}

/// Record an opt-out run and pick its next date.
///
/// A request the broker accepted is only repeated if the record is still
/// there after the confirmation scan and a maintenance interval.
pub fn schedule_opt_out(
    job: &mut OptOutJobData,
    schedule: &BrokerSchedule,
    succeeded: bool,
    now: DateTime<Utc>,
) {
    job.last_run_date = Some(now);
    job.attempt_count += 1;

    let next = if succeeded {
        job.submitted_success_date = Some(now);
        now + schedule.confirm_opt_out_scan() + schedule.maintenance_scan()
    } else {
        now + schedule.retry_error()
    };
    job.preferred_run_date = Some(next);
}

/// Bring the scan forward so it checks a removal requested at `requested`.
pub fn expedite_confirmation_scan(
    scan: &mut ScanJobData,
    schedule: &BrokerSchedule,
    requested: DateTime<Utc>,
) {
    let confirmation = requested + schedule.confirm_opt_out_scan();
    scan.preferred_run_date = Some(
        scan.preferred_run_date
            .map_or(confirmation, |current| current.min(confirmation)),
    );
}
