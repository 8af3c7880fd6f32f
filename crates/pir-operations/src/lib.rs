//! PIR Operations - Scripted broker jobs and their orchestration.
//!
//! This crate runs the scan and opt-out steps of broker definitions against
//! an automation backend and decides which of them run when.
//!
//! # Features
//!
//! - One action at a time per job, with a pacing delay and a per-action timeout
//! - Cooperative cancellation checked before every action
//! - A single retry of failed expectations
//! - Email confirmation and captcha solving through pluggable services
//! - Concurrent sweeps bounded by job count and an execution budget
//!
//! # Example
//!
//! ```rust,ignore
//! use pir_operations::{BrokerFilter, JobOrchestrator};
//! use pir_scheduler::ExecutionBudget;
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = JobOrchestrator::from_config(&config, factory, store);
//! let mut entries = orchestrator.load_entries(&brokers, &queries).await?;
//!
//! let report = orchestrator
//!     .run_sweep(
//!         &mut entries,
//!         &BrokerFilter::All,
//!         &ExecutionBudget::from_config(&config.execution),
//!         &CancellationToken::new(),
//!     )
//!     .await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod actions_handler;
#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod filter;
pub mod operations;
pub mod orchestrator;
pub mod runner;
pub mod services;
#[allow(missing_docs)]
pub mod url_builder;

// Re-export commonly used types
pub use actions_handler::ActionsHandler;
pub use error::{CaptchaError, EmailError, OperationError, Result};
pub use filter::{check_query_completeness, BrokerFilter};
pub use operations::{
    apply_opt_out_result, apply_scan_result, run_opt_out_job, run_scan_job, JobOutcome, JobStatus,
};
pub use orchestrator::{JobOrchestrator, SkipReason, SkippedEntry, SweepReport};
pub use runner::{JobInput, JobResult, RunnerSettings, RunnerState, SubJobRunner};
pub use services::{
    CaptchaService, DisabledCaptchaService, DisabledEmailService, EmailConfirmationService,
    Services,
};
pub use url_builder::build_url;
