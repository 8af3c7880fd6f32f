//! Broker catalog loading from TOML files.
//!
//! Every `*.toml` file below the catalog directory describes one broker.
//! Files are found recursively so brokers can be grouped in subdirectories.

use crate::{
    definition::DataBroker,
    error::{BrokerError, Result},
};
use pir_core::BrokerId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the catalog directory looked up from the workspace root.
const DEFAULT_DIR_NAME: &str = "broker-definitions";

/// Loader for the broker catalog.
pub struct BrokerLoader {
    /// Base directory containing broker definitions
    definitions_dir: PathBuf,
}

impl BrokerLoader {
    /// Create a new loader with the given catalog directory.
    ///
    /// # Errors
    /// Returns error if the path doesn't exist or isn't a directory.
    pub fn new(definitions_dir: impl Into<PathBuf>) -> Result<Self> {
        let definitions_dir = definitions_dir.into();

        if !definitions_dir.is_dir() {
            return Err(BrokerError::DirectoryNotFound {
                path: definitions_dir.display().to_string(),
            });
        }

        Ok(Self { definitions_dir })
    }

    /// Create a loader from a configured directory, or the default one when unset.
    pub fn from_config(definitions_dir: Option<&Path>) -> Result<Self> {
        match definitions_dir {
            Some(dir) => Self::new(dir),
            None => Self::with_default_dir(),
        }
    }

    /// Create a loader using the default catalog directory.
    ///
    /// Walks up from the current directory to the workspace root and uses its
    /// `broker-definitions/`, falling back to a relative path.
    pub fn with_default_dir() -> Result<Self> {
        let current_dir = std::env::current_dir()?;

        let workspace_root = current_dir.ancestors().find(|dir| {
            std::fs::read_to_string(dir.join("Cargo.toml"))
                .is_ok_and(|contents| contents.contains("[workspace]"))
        });

        match workspace_root {
            Some(root) => Self::new(root.join(DEFAULT_DIR_NAME)),
            None => Self::new(DEFAULT_DIR_NAME),
        }
    }

    /// The catalog directory.
    #[must_use]
    pub fn definitions_dir(&self) -> &Path {
        &self.definitions_dir
    }

    /// Load and validate a single broker by ID.
    ///
    /// The file is expected to be named `<broker-id>.toml`.
    pub fn load(&self, broker_id: &BrokerId) -> Result<DataBroker> {
        let filename = format!("{}.toml", broker_id.as_str());
        let path = Self::find_file(&self.definitions_dir, &filename)?.ok_or_else(|| {
            BrokerError::NotFound {
                broker_id: broker_id.to_string(),
            }
        })?;

        let broker = Self::load_from_path(&path)?;
        broker.validate()?;

        debug!(
            broker_id = %broker_id,
            name = %broker.name(),
            mirrors = broker.mirror_sites.len(),
            "loaded broker definition"
        );

        Ok(broker)
    }

    /// Load every broker in the catalog.
    ///
    /// Unparseable or invalid files and duplicate broker IDs are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<DataBroker>> {
        let mut paths = Vec::new();
        Self::collect_toml_files(&self.definitions_dir, &mut paths)?;
        paths.sort();

        let mut seen = HashSet::new();
        let mut brokers = Vec::with_capacity(paths.len());

        for path in paths {
            let broker = match Self::load_from_path(&path).and_then(|broker| {
                broker.validate()?;
                Ok(broker)
            }) {
                Ok(broker) => broker,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping broker definition");
                    continue;
                }
            };

            if !seen.insert(broker.id().clone()) {
                warn!(
                    path = %path.display(),
                    broker_id = %broker.id(),
                    "skipping duplicate broker definition"
                );
                continue;
            }

            brokers.push(broker);
        }

        info!(
            count = brokers.len(),
            dir = %self.definitions_dir.display(),
            "loaded broker catalog"
        );

        Ok(brokers)
    }

    fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::collect_toml_files(&path, paths)?;
            } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        Ok(())
    }

    fn find_file(dir: &Path, filename: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                if let Some(found) = Self::find_file(&path, filename)? {
                    return Ok(Some(found));
                }
            } else if path.file_name().and_then(|s| s.to_str()) == Some(filename) {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    fn load_from_path(path: &Path) -> Result<DataBroker> {
        let contents = std::fs::read_to_string(path).map_err(|e| BrokerError::LoadError {
            path: path.display().to_string(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| BrokerError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
    }
}
