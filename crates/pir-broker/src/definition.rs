//! Broker definition types and structures.
//!
//! This module defines the data structures for broker definitions loaded from TOML files.

use crate::action::Action;
use crate::error::{BrokerError, Result};
use chrono::{DateTime, Duration, Utc};
use pir_core::BrokerId;
use serde::{Deserialize, Serialize};

/// Complete broker definition loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBroker {
    /// Core broker metadata
    pub broker: BrokerMetadata,

    /// Scripted steps (one scan step, at most one opt-out step)
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Alternate domains exposing the same dataset
    #[serde(default)]
    pub mirror_sites: Vec<MirrorSite>,

    /// Rescheduling intervals
    #[serde(default)]
    pub schedule: BrokerSchedule,
}

impl DataBroker {
    /// Get the broker ID.
    #[must_use]
    pub fn id(&self) -> &BrokerId {
        &self.broker.id
    }

    /// Get the broker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.broker.name
    }

    /// Get the broker base URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.broker.url
    }

    /// Get the step of the given kind, if the broker defines one.
    #[must_use]
    pub fn step(&self, kind: StepKind) -> Option<&Step> {
        self.steps.iter().find(|step| step.step_type == kind)
    }

    /// Whether the broker can be automated for removals.
    #[must_use]
    pub fn performs_opt_outs(&self) -> bool {
        self.step(StepKind::OptOut)
            .is_some_and(|step| !step.actions.is_empty())
    }

    /// Number of mirror sites whose validity window includes `now`.
    #[must_use]
    pub fn number_of_extant_mirror_sites_at(&self, now: DateTime<Utc>) -> usize {
        self.mirror_sites
            .iter()
            .filter(|mirror| mirror.was_extant_on(now))
            .count()
    }

    /// Number of mirror sites that are currently extant.
    #[must_use]
    pub fn number_of_currently_extant_mirror_sites(&self) -> usize {
        self.number_of_extant_mirror_sites_at(Utc::now())
    }

    /// Validate the broker definition for completeness and correctness.
    pub fn validate(&self) -> Result<()> {
        if self.broker.name.is_empty() {
            return Err(self.invalid("broker name cannot be empty"));
        }

        if self.broker.url.is_empty() {
            return Err(self.invalid("broker URL cannot be empty"));
        }

        let scan = self
            .step(StepKind::Scan)
            .ok_or_else(|| self.invalid("broker must define a scan step"))?;
        if scan.actions.is_empty() {
            return Err(self.invalid("scan step must contain at least one action"));
        }

        for kind in [StepKind::Scan, StepKind::OptOut] {
            if self.steps.iter().filter(|s| s.step_type == kind).count() > 1 {
                return Err(self.invalid(&format!("more than one {kind} step")));
            }
        }

        for step in &self.steps {
            step.validate(&self.broker.id)?;
        }

        for mirror in &self.mirror_sites {
            if mirror.name.is_empty() {
                return Err(self.invalid("mirror site name cannot be empty"));
            }
            if mirror.removed_at.is_some_and(|removed| removed <= mirror.added_at) {
                return Err(self.invalid(&format!(
                    "mirror site {} is removed before it was added",
                    mirror.name
                )));
            }
        }

        self.schedule.validate(&self.broker.id)
    }

    fn invalid(&self, reason: &str) -> BrokerError {
        BrokerError::ValidationError {
            broker_id: self.broker.id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Core broker metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMetadata {
    /// Unique broker identifier (e.g., "spokeo", "verecor")
    pub id: BrokerId,

    /// Human-readable broker name
    pub name: String,

    /// Broker website URL
    pub url: String,

    /// Catalog version of this definition
    #[serde(default)]
    pub version: String,

    /// Broker-provided opt-out page, if any
    #[serde(default)]
    pub opt_out_url: Option<String>,
}

/// An alternate domain believed to expose the same dataset as its parent broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSite {
    /// Display name of the mirror
    pub name: String,

    /// Mirror URL
    #[serde(default)]
    pub url: String,

    /// Start of the window in which the mirror existed
    pub added_at: DateTime<Utc>,

    /// End of the window, if the mirror went away
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
}

impl MirrorSite {
    /// Whether the mirror existed at `date`.
    ///
    /// The window is `[added_at, removed_at)`.
    #[must_use]
    pub fn was_extant_on(&self, date: DateTime<Utc>) -> bool {
        self.added_at <= date && self.removed_at.map_or(true, |removed| date < removed)
    }
}

/// Rescheduling intervals applied after a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSchedule {
    /// Hours before a failed job is tried again
    pub retry_error_hours: u32,
    /// Hours after an opt-out request before the scan checks the removal
    pub confirm_opt_out_scan_hours: u32,
    /// Hours between routine scans
    pub maintenance_scan_hours: u32,
    /// Maximum opt-out attempts per extracted profile (unlimited when unset)
    pub max_attempts: Option<u32>,
}

impl Default for BrokerSchedule {
    fn default() -> Self {
        Self {
            retry_error_hours: 48,
            confirm_opt_out_scan_hours: 72,
            maintenance_scan_hours: 120,
            max_attempts: None,
        }
    }
}

impl BrokerSchedule {
    /// Delay before a failed job is tried again.
    #[must_use]
    pub fn retry_error(&self) -> Duration {
        Duration::hours(i64::from(self.retry_error_hours))
    }

    /// Delay between an opt-out request and the scan confirming it.
    #[must_use]
    pub fn confirm_opt_out_scan(&self) -> Duration {
        Duration::hours(i64::from(self.confirm_opt_out_scan_hours))
    }

    /// Delay between routine scans.
    #[must_use]
    pub fn maintenance_scan(&self) -> Duration {
        Duration::hours(i64::from(self.maintenance_scan_hours))
    }

    fn validate(&self, broker_id: &BrokerId) -> Result<()> {
        for (field, value) in [
            ("retry_error_hours", self.retry_error_hours),
            ("confirm_opt_out_scan_hours", self.confirm_opt_out_scan_hours),
            ("maintenance_scan_hours", self.maintenance_scan_hours),
        ] {
            if value == 0 {
                return Err(BrokerError::ValidationError {
                    broker_id: broker_id.to_string(),
                    reason: format!("schedule.{field} must be greater than 0"),
                });
            }
        }
        Ok(())
    }
}

/// Kind of step: discovery or removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Search the broker for records matching a profile query
    Scan,
    /// Request removal of one extracted profile
    OptOut,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::OptOut => write!(f, "opt-out"),
        }
    }
}

/// An ordered sequence of actions implementing one scan or opt-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Which job this step implements
    pub step_type: StepKind,

    /// Actions in execution order
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Step {
    fn validate(&self, broker_id: &BrokerId) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if action.id().is_empty() {
                return Err(BrokerError::ValidationError {
                    broker_id: broker_id.to_string(),
                    reason: format!("{} step has an action without id", self.step_type),
                });
            }
            if !seen.insert(action.id()) {
                return Err(BrokerError::ValidationError {
                    broker_id: broker_id.to_string(),
                    reason: format!(
                        "{} step repeats action id {}",
                        self.step_type,
                        action.id()
                    ),
                });
            }
        }
        Ok(())
    }
}
