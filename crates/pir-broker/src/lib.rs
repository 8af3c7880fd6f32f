//! PIR Broker - Catalog of data brokers and their scripted steps.
//!
//! This crate provides the types describing what a broker is and how it is
//! automated: broker metadata, mirror sites with their validity windows,
//! rescheduling intervals, and the scan / opt-out steps made of [`Action`]s.
//! It also loads the catalog from TOML files and caches it in memory.
//!
//! # Architecture
//!
//! - **Definition Types** ([`definition`]): brokers, mirror sites, schedules, steps
//! - **Actions** ([`action`]): the scripted browser primitives of a step
//! - **Loader** ([`loader`]): TOML file loading from `broker-definitions/`
//! - **Registry** ([`registry`]): In-memory cache with lookup by id
//! - **Errors** ([`error`]): Catalog-specific error types
//!
//! # Example
//!
//! ```rust,no_run
//! use pir_broker::{BrokerLoader, BrokerRegistry, StepKind};
//! use pir_core::BrokerId;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = BrokerLoader::with_default_dir()?;
//! let registry = BrokerRegistry::load_from(&loader)?;
//!
//! let broker = registry.get(&BrokerId::new("verecor")?)?;
//! println!("{} has {} scan actions", broker.name(), broker.step(StepKind::Scan).map_or(0, |s| s.actions.len()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod action;
pub mod definition;
pub mod error;
pub mod loader;
pub mod registry;

// Re-export commonly used types
pub use action::{
    Action, ElementType, ExpectationItem, ExpectationKind, ExtractSelectors, PageElement,
};
pub use definition::{BrokerMetadata, BrokerSchedule, DataBroker, MirrorSite, Step, StepKind};
pub use error::{BrokerError, Result};
pub use loader::BrokerLoader;
pub use registry::BrokerRegistry;
