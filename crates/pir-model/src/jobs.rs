//! Scan and opt-out job records.
//!
//! Records are mutated in place by the runner's write-back; their history
//! logs only ever grow.

use crate::history::{self, EventType, HistoryEvent};
use crate::profile::ExtractedProfile;
use chrono::{DateTime, Utc};
use pir_core::{BrokerId, ExtractedProfileId, ProfileQueryId};
use serde::{Deserialize, Serialize};

/// The recurring scan of one broker for one profile query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJobData {
    /// Broker scanned
    pub broker_id: BrokerId,
    /// Profile query searched for
    pub profile_query_id: ProfileQueryId,
    /// Next scheduled run; `None` means as soon as possible
    #[serde(default)]
    pub preferred_run_date: Option<DateTime<Utc>>,
    /// When the scan last ran
    #[serde(default)]
    pub last_run_date: Option<DateTime<Utc>>,
    /// This job's event log
    #[serde(default)]
    pub history_events: Vec<HistoryEvent>,
}

impl ScanJobData {
    /// A scan that has never run.
    #[must_use]
    pub fn new(broker_id: BrokerId, profile_query_id: ProfileQueryId) -> Self {
        Self {
            broker_id,
            profile_query_id,
            preferred_run_date: None,
            last_run_date: None,
            history_events: Vec::new(),
        }
    }

    /// Append an event dated now.
    pub fn record(&mut self, event_type: EventType) {
        self.record_at(event_type, Utc::now());
    }

    /// Append an event with an explicit date.
    pub fn record_at(&mut self, event_type: EventType, date: DateTime<Utc>) {
        let event = HistoryEvent::at(
            self.broker_id.clone(),
            self.profile_query_id,
            None,
            event_type,
            date,
        );
        history::append(&mut self.history_events, event);
    }

    /// Dates of every recorded `scanStarted` event.
    pub fn scan_started_dates(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.history_events
            .iter()
            .filter(|event| event.event_type == EventType::ScanStarted)
            .map(|event| event.date)
    }
}

/// Email confirmation state of an opt-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfirmationData {
    /// Address generated for this opt-out
    pub generated_email: String,
    /// Confirmation link, once received
    #[serde(default)]
    pub link: Option<String>,
    /// When the link was received
    #[serde(default)]
    pub link_obtained_date: Option<DateTime<Utc>>,
    /// Number of times the link was requested
    #[serde(default)]
    pub attempt_count: u32,
}

impl EmailConfirmationData {
    /// A record for a freshly generated address.
    #[must_use]
    pub fn new(generated_email: impl Into<String>) -> Self {
        Self {
            generated_email: generated_email.into(),
            link: None,
            link_obtained_date: None,
            attempt_count: 0,
        }
    }
}

/// The removal of one extracted profile from one broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOutJobData {
    /// Broker the record lives on
    pub broker_id: BrokerId,
    /// Profile query the record matched
    pub profile_query_id: ProfileQueryId,
    /// The record to remove
    pub extracted_profile: ExtractedProfile,
    /// When the record was first found
    pub created_date: DateTime<Utc>,
    /// Next scheduled run; `None` means as soon as possible
    #[serde(default)]
    pub preferred_run_date: Option<DateTime<Utc>>,
    /// When the opt-out last ran
    #[serde(default)]
    pub last_run_date: Option<DateTime<Utc>>,
    /// Number of opt-out runs
    #[serde(default)]
    pub attempt_count: u32,
    /// When the broker last accepted a request
    #[serde(default)]
    pub submitted_success_date: Option<DateTime<Utc>>,
    /// Manual override; removed-by-user jobs are never automated
    #[serde(default)]
    pub is_removed_by_user: bool,
    /// This job's event log
    #[serde(default)]
    pub history_events: Vec<HistoryEvent>,
    /// Present for brokers that confirm removals by email
    #[serde(default)]
    pub email_confirmation: Option<EmailConfirmationData>,
}

impl OptOutJobData {
    /// A new opt-out for a freshly found record, due immediately.
    #[must_use]
    pub fn new(
        broker_id: BrokerId,
        profile_query_id: ProfileQueryId,
        extracted_profile: ExtractedProfile,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            broker_id,
            profile_query_id,
            extracted_profile,
            created_date,
            preferred_run_date: Some(created_date),
            last_run_date: None,
            attempt_count: 0,
            submitted_success_date: None,
            is_removed_by_user: false,
            history_events: Vec::new(),
            email_confirmation: None,
        }
    }

    /// Id of the record this job removes.
    #[must_use]
    pub fn extracted_profile_id(&self) -> Option<ExtractedProfileId> {
        self.extracted_profile.id
    }

    /// Whether the broker no longer shows the record.
    #[must_use]
    pub fn is_confirmed_removed(&self) -> bool {
        self.extracted_profile.removed_date.is_some()
    }

    /// Append an event tied to this job's record, dated now.
    pub fn record(&mut self, event_type: EventType) {
        self.record_at(event_type, Utc::now());
    }

    /// Append an event tied to this job's record with an explicit date.
    pub fn record_at(&mut self, event_type: EventType, date: DateTime<Utc>) {
        let event = HistoryEvent::at(
            self.broker_id.clone(),
            self.profile_query_id,
            self.extracted_profile.id,
            event_type,
            date,
        );
        history::append(&mut self.history_events, event);
    }
}
