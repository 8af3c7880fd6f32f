//! Lifecycle markers of an orchestration sweep run under a host budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle stage of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundTaskEventKind {
    /// The sweep began
    Started,
    /// The sweep ran every job it selected
    Completed,
    /// The budget ran out and in-flight jobs were stopped
    Terminated,
}

/// A lifecycle marker tagged with the sweep's session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTaskEvent {
    /// Sweep session
    pub session_id: Uuid,
    /// Lifecycle stage
    pub kind: BackgroundTaskEventKind,
    /// When the stage was reached
    pub timestamp: DateTime<Utc>,
    /// Time since the session started, for terminal events
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl BackgroundTaskEvent {
    /// Session start marker.
    #[must_use]
    pub fn started(session_id: Uuid) -> Self {
        Self {
            session_id,
            kind: BackgroundTaskEventKind::Started,
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    /// Marker for a sweep that finished within its budget.
    #[must_use]
    pub fn completed(session_id: Uuid, elapsed: Duration) -> Self {
        Self::terminal(session_id, BackgroundTaskEventKind::Completed, elapsed)
    }

    /// Marker for a sweep cut short by its budget.
    #[must_use]
    pub fn terminated(session_id: Uuid, elapsed: Duration) -> Self {
        Self::terminal(session_id, BackgroundTaskEventKind::Terminated, elapsed)
    }

    fn terminal(session_id: Uuid, kind: BackgroundTaskEventKind, elapsed: Duration) -> Self {
        Self {
            session_id,
            kind,
            timestamp: Utc::now(),
            duration_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Whether this marker ends its session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind != BackgroundTaskEventKind::Started
    }

    /// Duration metadata, if any.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }
}

/// Whether `session_id` has started and not yet ended in `events`.
#[must_use]
pub fn is_session_open(events: &[BackgroundTaskEvent], session_id: Uuid) -> bool {
    let mut open = false;
    for event in events.iter().filter(|e| e.session_id == session_id) {
        open = !event.is_terminal();
    }
    open
}
