//! Persistence seam for job records.
//!
//! The engine only mutates in-memory records; a [`JobStore`] decides how they
//! are kept between sweeps.

use crate::aggregate::{BrokerProfileQueryData, JobRecords};
use crate::background::BackgroundTaskEvent;
use crate::error::Result;
use async_trait::async_trait;
use pir_core::{BrokerId, ProfileQueryId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage for job records and sweep lifecycle markers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Every stored (broker, profile query) record set.
    async fn load_all(&self) -> Result<Vec<JobRecords>>;

    /// Store the records of one pair, replacing what was there.
    async fn save(&self, entry: &BrokerProfileQueryData) -> Result<()>;

    /// Append a sweep lifecycle marker.
    async fn record_background_event(&self, event: &BackgroundTaskEvent) -> Result<()>;

    /// Every stored lifecycle marker, oldest first.
    async fn background_events(&self) -> Result<Vec<BackgroundTaskEvent>>;
}

/// Volatile store, used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<(BrokerId, ProfileQueryId), JobRecords>>,
    background: RwLock<Vec<BackgroundTaskEvent>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records of one pair.
    pub async fn get(
        &self,
        broker_id: &BrokerId,
        profile_query_id: ProfileQueryId,
    ) -> Option<JobRecords> {
        self.records
            .read()
            .await
            .get(&(broker_id.clone(), profile_query_id))
            .cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load_all(&self) -> Result<Vec<JobRecords>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, entry: &BrokerProfileQueryData) -> Result<()> {
        let records = entry.records();
        debug!(
            broker_id = %entry.broker_id(),
            profile_query_id = %entry.profile_query_id(),
            opt_outs = records.opt_out_job_data.len(),
            "saving job records"
        );

        self.records.write().await.insert(
            (entry.broker_id().clone(), entry.profile_query_id()),
            records,
        );
        Ok(())
    }

    async fn record_background_event(&self, event: &BackgroundTaskEvent) -> Result<()> {
        self.background.write().await.push(event.clone());
        Ok(())
    }

    async fn background_events(&self) -> Result<Vec<BackgroundTaskEvent>> {
        Ok(self.background.read().await.clone())
    }
}
