//! PIR Core - Foundation crate for broker job orchestration.
//!
//! This crate provides the identifiers, error handling, configuration and
//! feature-provider seam that every other PIR crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Identifier newtypes (`BrokerId`, `ProfileQueryId`, `ExtractedProfileId`)
//! - [`features`] - Configuration provider deciding which brokers and features are enabled
//!
//! # Example
//!
//! ```rust
//! use pir_core::{AppConfig, ConfigFeatureProvider, Feature, FeatureProvider};
//!
//! let config = AppConfig::default();
//! let features = ConfigFeatureProvider::from_config(&config.features);
//! assert!(features.is_enabled(Feature::Scans));
//! assert_eq!(config.execution.operation_await_time_ms, 3000);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod features;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrokerJobExecutionConfig, BrowserConfig, CatalogConfig, FeatureConfig,
    StorageConfig,
};
pub use error::{ConfigError, ConfigResult, PirError, Result};
pub use features::{ConfigFeatureProvider, Feature, FeatureProvider};
pub use types::{BrokerId, ExtractedProfileId, ProfileQueryId};
