//! Browser automation for broker jobs.
//!
//! Defines the contract a job runner drives ([`AutomationBackend`]), the
//! one-shot bridge that turns backend callbacks into awaitable results
//! ([`Completion`], [`ActionReply`]) and a Chromium implementation with a
//! randomized fingerprint.

pub mod backend;
pub mod callback;
pub mod chromium;
pub mod error;
pub mod fingerprint;

pub use backend::{ActionContext, AutomationBackend, BackendFactory};
pub use callback::{ActionCallback, ActionReply, ActionResponse, Completion};
pub use chromium::{ChromiumBackend, ChromiumFactory};
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
