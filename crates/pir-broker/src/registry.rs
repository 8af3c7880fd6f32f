//! In-memory broker catalog with lookup support.

use crate::{
    definition::DataBroker,
    error::{BrokerError, Result},
    loader::BrokerLoader,
};
use pir_core::BrokerId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Shared, cloneable cache of the broker catalog.
#[derive(Clone, Default)]
pub struct BrokerRegistry {
    /// Cached brokers, indexed by broker ID
    brokers: Arc<RwLock<HashMap<BrokerId, DataBroker>>>,
}

impl BrokerRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding everything the loader finds.
    pub fn load_from(loader: &BrokerLoader) -> Result<Self> {
        let registry = Self::new();
        registry.reload(loader)?;
        Ok(registry)
    }

    /// Replace the cached catalog with a fresh load.
    pub fn reload(&self, loader: &BrokerLoader) -> Result<()> {
        let brokers = loader.load_all()?;

        let mut cache = self.brokers.write().expect("acquire write lock on brokers");
        *cache = brokers
            .into_iter()
            .map(|broker| (broker.id().clone(), broker))
            .collect();

        info!(count = cache.len(), "reloaded broker catalog");
        Ok(())
    }

    /// Get a broker by ID.
    pub fn get(&self, broker_id: &BrokerId) -> Result<DataBroker> {
        let cache = self.brokers.read().expect("acquire read lock on brokers");

        cache
            .get(broker_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound {
                broker_id: broker_id.to_string(),
            })
    }

    /// All brokers, ordered by ID.
    #[must_use]
    pub fn get_all(&self) -> Vec<DataBroker> {
        let cache = self.brokers.read().expect("acquire read lock on brokers");

        let mut brokers: Vec<_> = cache.values().cloned().collect();
        brokers.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        brokers
    }

    /// Number of brokers in the registry.
    #[must_use]
    pub fn count(&self) -> usize {
        self.brokers.read().expect("acquire read lock on brokers").len()
    }

    /// Whether a broker exists in the registry.
    #[must_use]
    pub fn contains(&self, broker_id: &BrokerId) -> bool {
        self.brokers
            .read()
            .expect("acquire read lock on brokers")
            .contains_key(broker_id)
    }

    /// Validate and add (or replace) a broker.
    pub fn insert(&self, broker: DataBroker) -> Result<()> {
        broker.validate()?;

        let broker_id = broker.id().clone();
        self.brokers
            .write()
            .expect("acquire write lock on brokers")
            .insert(broker_id.clone(), broker);

        debug!(broker_id = %broker_id, "inserted broker definition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::definition::{BrokerMetadata, BrokerSchedule, Step, StepKind};

    fn broker(id: &str, with_opt_out: bool) -> DataBroker {
        let mut steps = vec![Step {
            step_type: StepKind::Scan,
            actions: vec![Action::Navigate {
                id: "nav".to_string(),
                url: format!("https://{id}.example/{{first}}-{{last}}"),
            }],
        }];
        if with_opt_out {
            steps.push(Step {
                step_type: StepKind::OptOut,
                actions: vec![Action::GetEmail {
                    id: "email".to_string(),
                }],
            });
        }

        DataBroker {
            broker: BrokerMetadata {
                id: BrokerId::new(id).expect("valid broker ID"),
                name: format!("Test {id}"),
                url: format!("https://{id}.example"),
                version: "0.1.0".to_string(),
                opt_out_url: None,
            },
            steps,
            mirror_sites: Vec::new(),
            schedule: BrokerSchedule::default(),
        }
    }

    #[test]
    fn test_registry_insert_and_get() {
        let registry = BrokerRegistry::new();
        assert_eq!(registry.count(), 0);

        let definition = broker("test-broker", false);
        let broker_id = definition.id().clone();
        registry.insert(definition).expect("insert broker");

        let retrieved = registry.get(&broker_id).expect("get broker");
        assert_eq!(retrieved.name(), "Test test-broker");
        assert!(registry.contains(&broker_id));
    }

    #[test]
    fn test_registry_get_nonexistent() {
        let registry = BrokerRegistry::new();
        let broker_id = BrokerId::new("nonexistent").expect("valid broker ID");

        assert!(matches!(
            registry.get(&broker_id),
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_registry_rejects_invalid_broker() {
        let registry = BrokerRegistry::new();
        let mut invalid = broker("broken", false);
        invalid.steps.clear();

        assert!(registry.insert(invalid).is_err());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_registry_orders_by_id() {
        let registry = BrokerRegistry::new();
        registry.insert(broker("charlie", true)).expect("insert");
        registry.insert(broker("alpha", false)).expect("insert");
        registry.insert(broker("bravo", true)).expect("insert");

        let ids: Vec<String> = registry
            .get_all()
            .iter()
            .map(|b| b.id().to_string())
            .collect();
        assert_eq!(ids, ["alpha", "bravo", "charlie"]);

        // Re-inserting replaces the cached definition.
        let mut renamed = broker("alpha", true);
        renamed.broker.name = "Renamed".to_string();
        registry.insert(renamed).expect("insert");
        assert_eq!(registry.count(), 3);
        let alpha = BrokerId::new("alpha").expect("valid broker ID");
        assert_eq!(registry.get(&alpha).expect("get broker").name(), "Renamed");
    }
}
