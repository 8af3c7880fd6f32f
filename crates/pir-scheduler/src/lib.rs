//! Scheduling for broker jobs.
//!
//! Decides which scan and opt-out jobs are due, moves their run dates after
//! each run, answers aggregate scheduling queries over a sweep and tracks the
//! sweep's execution budget.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod budget;
pub mod queries;
pub mod scheduler;

pub use budget::ExecutionBudget;
pub use queries::SchedulingQueries;
pub use scheduler::{
    due_opt_outs, expedite_confirmation_scan, is_job_due, is_opt_out_due, is_scan_due,
    schedule_opt_out, schedule_scan,
};
