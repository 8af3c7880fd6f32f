//! Host-imposed execution budget of a sweep.

use pir_core::BrokerJobExecutionConfig;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Time allowance of one sweep session.
///
/// Jobs stop at the cutoff, a grace period before the budget expires, so
/// their state can be recorded. A new job starts only if it can get at least
/// the minimum job budget before the cutoff.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    session_id: Uuid,
    started_at: Instant,
    budget: Option<Duration>,
    grace: Duration,
    min_job: Duration,
}

impl ExecutionBudget {
    /// A budget starting now.
    #[must_use]
    pub fn new(budget: Option<Duration>, grace: Duration, min_job: Duration) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Instant::now(),
            budget,
            grace,
            min_job,
        }
    }

    /// A budget from the execution settings.
    #[must_use]
    pub fn from_config(config: &BrokerJobExecutionConfig) -> Self {
        Self::new(
            config.background_budget(),
            config.budget_grace(),
            config.min_job_budget(),
        )
    }

    /// A session without a time limit.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None, Duration::ZERO, Duration::ZERO)
    }

    /// The sweep session this budget belongs to.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// When in-flight jobs must stop; `None` without a limit.
    #[must_use]
    pub fn cutoff(&self) -> Option<Instant> {
        self.budget
            .map(|budget| self.started_at + budget.saturating_sub(self.grace))
    }

    /// Time left before the cutoff; `None` without a limit.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.cutoff()
            .map(|cutoff| cutoff.saturating_duration_since(Instant::now()))
    }

    /// Whether a new job may start now.
    #[must_use]
    pub fn allows_new_job(&self) -> bool {
        self.remaining()
            .map_or(true, |remaining| remaining >= self.min_job && !remaining.is_zero())
    }
}
