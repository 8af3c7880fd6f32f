//! Bridge from backend callbacks to awaitable results.
//!
//! A [`Completion`] is a single-slot sender that can be cloned into callbacks.
//! The first resolution takes the sender out of the slot; any later one finds
//! it empty, logs a warning and is dropped.

use crate::error::BrowserError;
use pir_model::ExtractedProfile;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One-shot completion that may be resolved at most once.
pub struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completion<T> {
    /// Create a completion and the receiver its value arrives on.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (completion, rx)
    }

    /// Resolve with `value`.
    ///
    /// Returns `false` if the completion was already resolved; the value is
    /// dropped in that case.
    pub fn resolve(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                if tx.send(value).is_err() {
                    debug!("completion resolved after its receiver went away");
                }
                true
            }
            None => {
                warn!("ignoring second resolution of a one-shot completion");
                false
            }
        }
    }

    /// Whether the completion has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Extra data an action may hand back on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResponse {
    /// The engine should load this URL next
    Navigate { url: String },
    /// Captcha parameters read from the page
    CaptchaInfo { site_key: String, url: String },
}

/// Outcome of one dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCallback {
    /// The action succeeded
    Success {
        action_id: String,
        response: Option<ActionResponse>,
    },
    /// An extract action succeeded with these records
    ExtractedProfiles {
        profiles: Vec<ExtractedProfile>,
        meta: JsonValue,
    },
    /// The action failed
    Failed(BrowserError),
}

/// Handle a backend uses to report the outcome of one action.
///
/// Clones share one [`Completion`], so only the first report counts.
#[derive(Clone)]
pub struct ActionReply {
    action_id: String,
    completion: Completion<ActionCallback>,
}

impl ActionReply {
    /// Create a reply handle for `action_id` and the receiver the runner awaits.
    #[must_use]
    pub fn new(action_id: impl Into<String>) -> (Self, oneshot::Receiver<ActionCallback>) {
        let (completion, rx) = Completion::channel();
        let reply = Self {
            action_id: action_id.into(),
            completion,
        };
        (reply, rx)
    }

    /// The action this reply belongs to.
    #[must_use]
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Report success.
    pub fn success(&self, response: Option<ActionResponse>) -> bool {
        self.completion.resolve(ActionCallback::Success {
            action_id: self.action_id.clone(),
            response,
        })
    }

    /// Report the records an extract action found.
    pub fn extracted_profiles(&self, profiles: Vec<ExtractedProfile>, meta: JsonValue) -> bool {
        self.completion
            .resolve(ActionCallback::ExtractedProfiles { profiles, meta })
    }

    /// Report failure.
    pub fn complete_with(&self, error: BrowserError) -> bool {
        self.completion.resolve(ActionCallback::Failed(error))
    }

    /// Whether an outcome has been reported.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.completion.is_resolved()
    }
}
