//! Configuration provider consulted before jobs are scheduled.
//!
//! The orchestrator asks a [`FeatureProvider`] whether a broker or a whole
//! class of jobs is currently enabled. [`ConfigFeatureProvider`] answers from
//! the `[features]` section of the application config.

use crate::config::FeatureConfig;
use crate::types::BrokerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifies job classes that can be switched on or off at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Scan jobs (discovery of matching records)
    Scans,
    /// Opt-out jobs (removal requests)
    OptOuts,
    /// Opt-out steps that wait for an email confirmation link
    EmailConfirmation,
    /// Opt-out steps that need a captcha solved
    CaptchaSolving,
}

impl Feature {
    /// Get a human-readable name for this feature.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Scans => "Broker Scans",
            Self::OptOuts => "Opt-Out Requests",
            Self::EmailConfirmation => "Email Confirmation",
            Self::CaptchaSolving => "Captcha Solving",
        }
    }
}

/// Answers whether brokers and features are enabled.
pub trait FeatureProvider: Send + Sync {
    /// Whether the given job class may run.
    fn is_enabled(&self, feature: Feature) -> bool;

    /// Whether jobs for the given broker may run.
    fn is_broker_enabled(&self, broker_id: &BrokerId) -> bool;
}

/// Feature provider backed by [`FeatureConfig`].
#[derive(Debug, Clone)]
pub struct ConfigFeatureProvider {
    /// Set of currently enabled features
    enabled_features: HashSet<Feature>,
    /// Broker IDs excluded from sweeps
    disabled_brokers: HashSet<String>,
}

impl Default for ConfigFeatureProvider {
    fn default() -> Self {
        Self::from_config(&FeatureConfig::default())
    }
}

impl ConfigFeatureProvider {
    /// Build a provider from the `[features]` config section.
    #[must_use]
    pub fn from_config(config: &FeatureConfig) -> Self {
        let mut enabled_features = HashSet::new();
        for (feature, enabled) in [
            (Feature::Scans, config.scans),
            (Feature::OptOuts, config.opt_outs),
            (Feature::EmailConfirmation, config.email_confirmation),
            (Feature::CaptchaSolving, config.captcha_solving),
        ] {
            if enabled {
                enabled_features.insert(feature);
            }
        }

        Self {
            enabled_features,
            disabled_brokers: config.disabled_brokers.iter().cloned().collect(),
        }
    }

    /// Enable a feature.
    pub fn enable_feature(&mut self, feature: Feature) {
        tracing::debug!("Enabling feature: {:?}", feature);
        self.enabled_features.insert(feature);
    }

    /// Disable a feature.
    pub fn disable_feature(&mut self, feature: Feature) {
        tracing::debug!("Disabling feature: {:?}", feature);
        self.enabled_features.remove(&feature);
    }

    /// Exclude a broker from future sweeps.
    pub fn disable_broker(&mut self, broker_id: &BrokerId) {
        tracing::debug!(broker_id = %broker_id, "Disabling broker");
        self.disabled_brokers.insert(broker_id.as_str().to_string());
    }
}

impl FeatureProvider for ConfigFeatureProvider {
    fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled_features.contains(&feature)
    }

    fn is_broker_enabled(&self, broker_id: &BrokerId) -> bool {
        !self.disabled_brokers.contains(broker_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_enables_everything() {
        let provider = ConfigFeatureProvider::default();
        assert!(provider.is_enabled(Feature::Scans));
        assert!(provider.is_enabled(Feature::OptOuts));
        assert!(provider.is_enabled(Feature::EmailConfirmation));
        assert!(provider.is_enabled(Feature::CaptchaSolving));
    }

    #[test]
    fn test_from_config() {
        let config = FeatureConfig {
            opt_outs: false,
            disabled_brokers: vec!["spokeo".to_string()],
            ..FeatureConfig::default()
        };
        let provider = ConfigFeatureProvider::from_config(&config);

        assert!(provider.is_enabled(Feature::Scans));
        assert!(!provider.is_enabled(Feature::OptOuts));

        let spokeo = BrokerId::new("spokeo").expect("valid broker ID");
        let verecor = BrokerId::new("verecor").expect("valid broker ID");
        assert!(!provider.is_broker_enabled(&spokeo));
        assert!(provider.is_broker_enabled(&verecor));
    }

    #[test]
    fn test_enable_disable_feature() {
        let mut provider = ConfigFeatureProvider::default();

        provider.disable_feature(Feature::CaptchaSolving);
        assert!(!provider.is_enabled(Feature::CaptchaSolving));

        provider.enable_feature(Feature::CaptchaSolving);
        assert!(provider.is_enabled(Feature::CaptchaSolving));

        let broker = BrokerId::new("verecor").expect("valid broker ID");
        provider.disable_broker(&broker);
        assert!(!provider.is_broker_enabled(&broker));
    }

    #[test]
    fn test_feature_metadata() {
        assert_eq!(Feature::OptOuts.display_name(), "Opt-Out Requests");
    }
}
