//! PIR Model - Job records and their history.
//!
//! One [`BrokerProfileQueryData`] pairs a catalog broker with a profile query
//! and carries the pair's scan job, its opt-out jobs and, through them, an
//! append-only [`HistoryEvent`] log. Records are plain data: the runner
//! mutates them in place and a [`JobStore`] persists them.
//!
//! # Modules
//!
//! - [`profile`] - search subjects and extracted records
//! - [`jobs`] - scan and opt-out job records
//! - [`history`] - history events and error classification
//! - [`aggregate`] - the per-pair aggregate and its derived queries
//! - [`background`] - sweep lifecycle markers
//! - [`store`] - persistence seam

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod aggregate;
pub mod background;
pub mod error;
pub mod history;
pub mod jobs;
pub mod profile;
pub mod store;

pub use aggregate::{BrokerProfileQueryData, JobData, JobRecords};
pub use background::{is_session_open, BackgroundTaskEvent, BackgroundTaskEventKind};
pub use error::{ModelError, Result};
pub use history::{EventType, HistoryEvent, JobErrorKind};
pub use jobs::{EmailConfirmationData, OptOutJobData, ScanJobData};
pub use profile::{ExtractedProfile, ProfileQuery};
pub use store::{InMemoryJobStore, JobStore};
