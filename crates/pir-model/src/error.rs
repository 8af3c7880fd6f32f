//! Error types for job records and stores.

use pir_core::{BrokerId, ExtractedProfileId, ProfileQueryId};
use thiserror::Error;

/// Errors raised while mutating or persisting job records.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No opt-out job references the given extracted profile
    #[error("no opt-out job for extracted profile {extracted_profile_id}")]
    ExtractedProfileNotFound {
        /// The extracted profile that was looked up
        extracted_profile_id: ExtractedProfileId,
    },

    /// The store has no record for the pair
    #[error("no job records for broker {broker_id} and profile query {profile_query_id}")]
    RecordNotFound {
        /// Broker of the missing entry
        broker_id: BrokerId,
        /// Profile query of the missing entry
        profile_query_id: ProfileQueryId,
    },

    /// Job state could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error in a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
