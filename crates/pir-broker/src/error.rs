//! Error types for the broker catalog.

use thiserror::Error;

/// Errors raised while loading or looking up catalog entries.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// No catalog entry with this ID
    #[error("no catalog entry for broker {broker_id}")]
    NotFound {
        /// The requested broker
        broker_id: String,
    },

    /// A definition file could not be read
    #[error("cannot read {path}: {source}")]
    LoadError {
        /// Definition file
        path: String,
        /// Read failure
        #[source]
        source: std::io::Error,
    },

    /// A definition file is not valid TOML for the catalog schema
    #[error("cannot parse {path}: {source}")]
    ParseError {
        /// Definition file
        path: String,
        /// Parser failure
        #[source]
        source: toml::de::Error,
    },

    /// A definition parsed but breaks a catalog rule
    #[error("broker {broker_id} is invalid: {reason}")]
    ValidationError {
        /// Offending broker
        broker_id: String,
        /// Rule that was broken
        reason: String,
    },

    /// The catalog directory is missing
    #[error("catalog directory {path} does not exist")]
    DirectoryNotFound {
        /// Directory that was expected
        path: String,
    },

    /// Directory traversal failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A broker ID failed validation
    #[error("invalid broker ID: {0}")]
    InvalidId(#[from] pir_core::PirError),
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
