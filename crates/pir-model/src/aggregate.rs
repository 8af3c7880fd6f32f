//! The per-(broker, profile query) aggregate and its derived queries.

use crate::error::{ModelError, Result};
use crate::history::{EventType, HistoryEvent};
use crate::jobs::{OptOutJobData, ScanJobData};
use crate::profile::ProfileQuery;
use chrono::{DateTime, Utc};
use pir_broker::DataBroker;
use pir_core::{BrokerId, ExtractedProfileId, ProfileQueryId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Borrowed view of either kind of job record.
#[derive(Debug, Clone, Copy)]
pub enum JobData<'a> {
    /// A scan job
    Scan(&'a ScanJobData),
    /// An opt-out job
    OptOut(&'a OptOutJobData),
}

impl<'a> JobData<'a> {
    /// The job's event log.
    #[must_use]
    pub fn history_events(&self) -> &'a [HistoryEvent] {
        match self {
            Self::Scan(scan) => &scan.history_events,
            Self::OptOut(opt_out) => &opt_out.history_events,
        }
    }

    /// The job's next scheduled run.
    #[must_use]
    pub fn preferred_run_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Scan(scan) => scan.preferred_run_date,
            Self::OptOut(opt_out) => opt_out.preferred_run_date,
        }
    }

    /// When the job last ran.
    #[must_use]
    pub fn last_run_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Scan(scan) => scan.last_run_date,
            Self::OptOut(opt_out) => opt_out.last_run_date,
        }
    }
}

/// Persisted job state of one (broker, profile query) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecords {
    /// The scan job
    pub scan_job_data: ScanJobData,
    /// Opt-out jobs, one per extracted profile
    #[serde(default)]
    pub opt_out_job_data: Vec<OptOutJobData>,
}

impl JobRecords {
    /// Broker of the pair.
    #[must_use]
    pub fn broker_id(&self) -> &BrokerId {
        &self.scan_job_data.broker_id
    }

    /// Profile query of the pair.
    #[must_use]
    pub fn profile_query_id(&self) -> ProfileQueryId {
        self.scan_job_data.profile_query_id
    }
}

/// One broker, one profile query, its scan job and its opt-out jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerProfileQueryData {
    /// Catalog entry
    pub data_broker: DataBroker,
    /// Search subject
    pub profile_query: ProfileQuery,
    /// The single scan job of the pair
    pub scan_job_data: ScanJobData,
    /// Opt-out jobs, one per extracted profile
    pub opt_out_job_data: Vec<OptOutJobData>,
}

impl BrokerProfileQueryData {
    /// A pair that has never been scanned.
    #[must_use]
    pub fn new(data_broker: DataBroker, profile_query: ProfileQuery) -> Self {
        let scan_job_data = ScanJobData::new(data_broker.id().clone(), profile_query.id);
        Self {
            data_broker,
            profile_query,
            scan_job_data,
            opt_out_job_data: Vec::new(),
        }
    }

    /// Rebuild a pair from its catalog entries and persisted records.
    #[must_use]
    pub fn from_records(
        data_broker: DataBroker,
        profile_query: ProfileQuery,
        records: JobRecords,
    ) -> Self {
        Self {
            data_broker,
            profile_query,
            scan_job_data: records.scan_job_data,
            opt_out_job_data: records.opt_out_job_data,
        }
    }

    /// Join the catalog with persisted state.
    ///
    /// Every broker is paired with every query; pairs without records start
    /// fresh, records for brokers or queries no longer present are dropped.
    #[must_use]
    pub fn assemble(
        brokers: &[DataBroker],
        queries: &[ProfileQuery],
        records: Vec<JobRecords>,
    ) -> Vec<Self> {
        let mut records: std::collections::HashMap<_, _> = records
            .into_iter()
            .map(|r| ((r.broker_id().clone(), r.profile_query_id()), r))
            .collect();

        let mut entries = Vec::with_capacity(brokers.len() * queries.len());
        for broker in brokers {
            for query in queries {
                let key = (broker.id().clone(), query.id);
                let entry = match records.remove(&key) {
                    Some(stored) => Self::from_records(broker.clone(), query.clone(), stored),
                    None => Self::new(broker.clone(), query.clone()),
                };
                entries.push(entry);
            }
        }

        if !records.is_empty() {
            debug!(orphaned = records.len(), "ignoring job records without catalog entry");
        }

        entries
    }

    /// The persistable part of the pair.
    #[must_use]
    pub fn records(&self) -> JobRecords {
        JobRecords {
            scan_job_data: self.scan_job_data.clone(),
            opt_out_job_data: self.opt_out_job_data.clone(),
        }
    }

    /// Broker of the pair.
    #[must_use]
    pub fn broker_id(&self) -> &BrokerId {
        self.data_broker.id()
    }

    /// Profile query of the pair.
    #[must_use]
    pub fn profile_query_id(&self) -> ProfileQueryId {
        self.profile_query.id
    }

    /// Opt-out jobs followed by the scan job.
    #[must_use]
    pub fn jobs_data(&self) -> Vec<JobData<'_>> {
        self.opt_out_job_data
            .iter()
            .map(JobData::OptOut)
            .chain(std::iter::once(JobData::Scan(&self.scan_job_data)))
            .collect()
    }

    /// Every job's events, oldest first.
    ///
    /// The sort is stable, so events sharing a date keep job order.
    #[must_use]
    pub fn events(&self) -> Vec<HistoryEvent> {
        let mut events: Vec<HistoryEvent> = self
            .jobs_data()
            .iter()
            .flat_map(|job| job.history_events().iter().cloned())
            .collect();
        events.sort_by_key(|event| event.date);
        events
    }

    /// Whether any record was found for the pair.
    #[must_use]
    pub fn has_matches(&self) -> bool {
        !self.opt_out_job_data.is_empty()
    }

    /// Opt-out jobs eligible for automation.
    #[must_use]
    pub fn opt_out_job_data_excluding_user_removed(&self) -> Vec<&OptOutJobData> {
        self.opt_out_job_data
            .iter()
            .filter(|job| !job.is_removed_by_user)
            .collect()
    }

    /// The most recent event. Among events sharing the latest date, the last one wins.
    #[must_use]
    pub fn closest_history_event(&self) -> Option<HistoryEvent> {
        self.events().into_iter().max_by_key(|event| event.date)
    }

    /// Whether the user removed a record of this pair by hand.
    #[must_use]
    pub fn does_belong_to_user_removed_record(&self) -> bool {
        let is_removed = |event: &HistoryEvent| event.event_type == EventType::MatchRemovedByUser;

        self.closest_history_event()
            .as_ref()
            .is_some_and(is_removed)
            || self.events().iter().any(is_removed)
    }

    /// Names of the broker and of the mirror sites a past scan covered.
    ///
    /// A mirror counts when its validity window contains the date of any
    /// recorded `scanStarted` event. Empty until the scan has run.
    #[must_use]
    pub fn names_of_brokers_scanned_including_mirror_sites(&self) -> Vec<String> {
        if self.scan_job_data.last_run_date.is_none() {
            return Vec::new();
        }

        let started: Vec<_> = self.scan_job_data.scan_started_dates().collect();
        let mirrors = self
            .data_broker
            .mirror_sites
            .iter()
            .filter(|mirror| started.iter().any(|date| mirror.was_extant_on(*date)))
            .map(|mirror| mirror.name.clone());

        std::iter::once(self.data_broker.name().to_string())
            .chain(mirrors)
            .collect()
    }

    /// Number of the broker's mirror sites that exist right now.
    #[must_use]
    pub fn number_of_currently_extant_mirror_sites(&self) -> usize {
        self.data_broker.number_of_currently_extant_mirror_sites()
    }

    /// Opt-out job for the given record.
    pub fn opt_out_job_mut(
        &mut self,
        extracted_profile_id: ExtractedProfileId,
    ) -> Result<&mut OptOutJobData> {
        self.opt_out_job_data
            .iter_mut()
            .find(|job| job.extracted_profile_id() == Some(extracted_profile_id))
            .ok_or(ModelError::ExtractedProfileNotFound {
                extracted_profile_id,
            })
    }

    /// Id for the next record found for this pair.
    #[must_use]
    pub fn next_extracted_profile_id(&self) -> ExtractedProfileId {
        self.opt_out_job_data
            .iter()
            .filter_map(OptOutJobData::extracted_profile_id)
            .max()
            .map_or(ExtractedProfileId::new(1), ExtractedProfileId::next)
    }

    /// Take a record out of automated processing at the user's request.
    ///
    /// Marking an already removed record again changes nothing.
    pub fn mark_removed_by_user(&mut self, extracted_profile_id: ExtractedProfileId) -> Result<()> {
        let job = self.opt_out_job_mut(extracted_profile_id)?;
        if job.is_removed_by_user {
            return Ok(());
        }

        job.is_removed_by_user = true;
        job.record(EventType::MatchRemovedByUser);

        debug!(
            broker_id = %job.broker_id,
            profile_query_id = %job.profile_query_id,
            extracted_profile_id = %extracted_profile_id,
            "record marked removed by user"
        );
        Ok(())
    }
}
