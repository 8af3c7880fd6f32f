//! Aggregate scheduling queries over a sweep's entries.

use chrono::{DateTime, Utc};
use pir_model::BrokerProfileQueryData;
use tracing::error;

/// Scheduling queries over a collection of entries.
pub trait SchedulingQueries {
    /// Latest scan run across all entries; `None` if no scan has run.
    fn latest_scan_last_run_date(&self) -> Option<DateTime<Utc>>;

    /// Earliest scheduled scan across all entries.
    fn earliest_scan_preferred_run_date(&self) -> Option<DateTime<Utc>>;

    /// Entries whose scan last ran within `[earlier, later]`, oldest run first.
    ///
    /// Returns nothing when `earlier >= later`.
    fn elements_sorted_by_scan_last_run_date_where_scans_ran_between(
        &self,
        earlier: DateTime<Utc>,
        later: DateTime<Utc>,
    ) -> Vec<&BrokerProfileQueryData>;

    /// Entries whose scan is scheduled within `[earlier, later]`, soonest first.
    ///
    /// Returns nothing when `earlier >= later`.
    fn elements_sorted_by_scan_preferred_run_date_where_scans_run_between(
        &self,
        earlier: DateTime<Utc>,
        later: DateTime<Utc>,
    ) -> Vec<&BrokerProfileQueryData>;
}

impl SchedulingQueries for [BrokerProfileQueryData] {
    fn latest_scan_last_run_date(&self) -> Option<DateTime<Utc>> {
        self.iter()
            .filter_map(|entry| entry.scan_job_data.last_run_date)
            .max()
    }

    fn earliest_scan_preferred_run_date(&self) -> Option<DateTime<Utc>> {
        self.iter()
            .filter_map(|entry| entry.scan_job_data.preferred_run_date)
            .min()
    }

    fn elements_sorted_by_scan_last_run_date_where_scans_ran_between(
        &self,
        earlier: DateTime<Utc>,
        later: DateTime<Utc>,
    ) -> Vec<&BrokerProfileQueryData> {
        select_between(self, earlier, later, |entry| entry.scan_job_data.last_run_date)
    }

    fn elements_sorted_by_scan_preferred_run_date_where_scans_run_between(
        &self,
        earlier: DateTime<Utc>,
        later: DateTime<Utc>,
    ) -> Vec<&BrokerProfileQueryData> {
        select_between(self, earlier, later, |entry| {
            entry.scan_job_data.preferred_run_date
        })
    }
}

fn select_between(
    entries: &[BrokerProfileQueryData],
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
    date: impl Fn(&BrokerProfileQueryData) -> Option<DateTime<Utc>>,
) -> Vec<&BrokerProfileQueryData> {
    if earlier >= later {
        error!(%earlier, %later, "date range query called with an empty range");
        return Vec::new();
    }

    let mut selected: Vec<_> = entries
        .iter()
        .filter_map(|entry| date(entry).map(|d| (d, entry)))
        .filter(|(d, _)| (earlier..=later).contains(d))
        .collect();
    selected.sort_by_key(|(d, _)| *d);
    selected.into_iter().map(|(_, entry)| entry).collect()
}
