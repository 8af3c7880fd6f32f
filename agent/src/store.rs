//! JSON file persistence for job records.

use async_trait::async_trait;
use pir_core::{BrokerId, ProfileQueryId};
use pir_model::{BackgroundTaskEvent, BrokerProfileQueryData, JobRecords, JobStore, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Sweep sessions whose lifecycle markers are kept.
const MAX_SESSIONS: usize = 50;

/// Drop the markers of all but the `keep` most recent sessions.
///
/// Returns the number of events removed.
fn prune_sessions(events: &mut Vec<BackgroundTaskEvent>, keep: usize) -> usize {
    let mut sessions = Vec::new();
    for event in events.iter() {
        if !sessions.contains(&event.session_id) {
            sessions.push(event.session_id);
        }
    }
    if sessions.len() <= keep {
        return 0;
    }

    let stale = &sessions[..sessions.len() - keep];
    let before = events.len();
    events.retain(|event| !stale.contains(&event.session_id));
    before - events.len()
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    records: Vec<JobRecords>,
    #[serde(default)]
    background_events: Vec<BackgroundTaskEvent>,
}

#[derive(Default)]
struct State {
    records: BTreeMap<(BrokerId, ProfileQueryId), JobRecords>,
    background_events: Vec<BackgroundTaskEvent>,
}

/// Store keeping every record in one JSON file.
///
/// The whole file is rewritten on each save, through a temporary file and a
/// rename so an interrupted write leaves the previous state intact.
pub struct JsonFileJobStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl JsonFileJobStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StateFile>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            records = file.records.len(),
            "opened job state file"
        );

        let mut background_events = file.background_events;
        prune_sessions(&mut background_events, MAX_SESSIONS);

        let records = file
            .records
            .into_iter()
            .map(|r| ((r.broker_id().clone(), r.profile_query_id()), r))
            .collect();

        Ok(Self {
            path,
            state: Mutex::new(State {
                records,
                background_events,
            }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, state: &State) -> Result<()> {
        let file = StateFile {
            records: state.records.values().cloned().collect(),
            background_events: state.background_events.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonFileJobStore {
    async fn load_all(&self) -> Result<Vec<JobRecords>> {
        Ok(self.state.lock().await.records.values().cloned().collect())
    }

    async fn save(&self, entry: &BrokerProfileQueryData) -> Result<()> {
        let mut state = self.state.lock().await;
        state.records.insert(
            (entry.broker_id().clone(), entry.profile_query_id()),
            entry.records(),
        );
        debug!(
            broker_id = %entry.broker_id(),
            profile_query_id = %entry.profile_query_id(),
            "writing job state file"
        );
        self.flush(&state).await
    }

    async fn record_background_event(&self, event: &BackgroundTaskEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        state.background_events.push(event.clone());
        let pruned = prune_sessions(&mut state.background_events, MAX_SESSIONS);
        if pruned > 0 {
            debug!(pruned, "dropped markers of old sweep sessions");
        }
        self.flush(&state).await
    }

    async fn background_events(&self) -> Result<Vec<BackgroundTaskEvent>> {
        Ok(self.state.lock().await.background_events.clone())
    }
}
