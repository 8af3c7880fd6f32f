//! Append-only history of what happened to a job.

use chrono::{DateTime, Utc};
use pir_core::{BrokerId, ExtractedProfileId, ProfileQueryId};
use serde::{Deserialize, Serialize};

/// Serializable classification of a failed job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobErrorKind {
    /// A cooperative stop was honored
    Cancelled,
    /// Malformed step or unexpected internal fault
    Unknown {
        /// Description of the fault
        message: String,
    },
    /// Navigation or script failure reported by the automation backend
    Backend {
        /// Backend error message
        message: String,
    },
    /// No callback arrived within the action timeout
    ActionTimeout {
        /// Action that timed out
        action_id: String,
    },
    /// Email confirmation service failure
    EmailService {
        /// Service error message
        message: String,
    },
    /// Captcha service failure
    Captcha {
        /// Service error message
        message: String,
    },
}

/// What a history event records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventType {
    /// A scan found nothing
    NoMatchFound,
    /// A scan found `count` records
    MatchesFound {
        /// Number of records found
        count: usize,
    },
    /// A job run failed
    Error {
        /// Failure classification
        error: JobErrorKind,
    },
    /// An opt-out run began
    OptOutStarted,
    /// The broker accepted a removal request
    OptOutRequested,
    /// The record is gone from the broker
    OptOutConfirmed,
    /// A scan run began
    ScanStarted,
    /// A record confirmed removed showed up again
    ReAppearance,
    /// The user marked the record as removed by hand
    MatchRemovedByUser,
}

/// An immutable, timestamped record of something that happened during a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Extracted profile the event concerns, for opt-out events
    pub extracted_profile_id: Option<ExtractedProfileId>,
    /// Broker the job ran against
    pub broker_id: BrokerId,
    /// Profile query the job ran for
    pub profile_query_id: ProfileQueryId,
    /// What happened
    pub event_type: EventType,
    /// When it happened
    pub date: DateTime<Utc>,
}

impl HistoryEvent {
    /// Create an event dated now.
    #[must_use]
    pub fn new(
        broker_id: BrokerId,
        profile_query_id: ProfileQueryId,
        extracted_profile_id: Option<ExtractedProfileId>,
        event_type: EventType,
    ) -> Self {
        Self::at(
            broker_id,
            profile_query_id,
            extracted_profile_id,
            event_type,
            Utc::now(),
        )
    }

    /// Create an event with an explicit date.
    #[must_use]
    pub fn at(
        broker_id: BrokerId,
        profile_query_id: ProfileQueryId,
        extracted_profile_id: Option<ExtractedProfileId>,
        event_type: EventType,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            extracted_profile_id,
            broker_id,
            profile_query_id,
            event_type,
            date,
        }
    }

    /// Number of records found if this is a `matchesFound` event, else 0.
    #[must_use]
    pub fn matches_found(&self) -> usize {
        match self.event_type {
            EventType::MatchesFound { count } => count,
            _ => 0,
        }
    }

    /// Whether this event reports a scan outcome.
    #[must_use]
    pub fn is_match_event(&self) -> bool {
        matches!(
            self.event_type,
            EventType::NoMatchFound | EventType::MatchesFound { .. }
        )
    }

    /// Whether this event reports a failed run.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.event_type, EventType::Error { .. })
    }
}

/// Append an event to a job log, keeping dates non-decreasing.
///
/// A wall clock that stepped backwards would otherwise break the ordering of
/// one job's log, so the event is clamped to the last recorded date.
pub(crate) fn append(log: &mut Vec<HistoryEvent>, mut event: HistoryEvent) {
    if let Some(last) = log.last() {
        if event.date < last.date {
            event.date = last.date;
        }
    }
    log.push(event);
}
