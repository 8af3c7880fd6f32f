#![allow(clippy::must_use_candidate)]

use pir_broker::{Action, DataBroker, StepKind};
use pir_model::ProfileQuery;
use serde::{Deserialize, Serialize};

/// Which brokers a sweep covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerFilter {
    #[default]
    All,
    Specific(Vec<String>),
    Excluding(Vec<String>),
}

impl BrokerFilter {
    pub fn matches(&self, broker: &DataBroker) -> bool {
        match self {
            BrokerFilter::All => true,
            BrokerFilter::Specific(ids) => ids.iter().any(|id| broker.id().as_str() == id),
            BrokerFilter::Excluding(ids) => !ids.iter().any(|id| broker.id().as_str() == id),
        }
    }
}

/// Checks that the query has every field the broker's scan URLs use.
///
/// # Returns
/// * `Ok(())` if all fields are present
/// * `Err(Vec<&str>)` with the names of the empty placeholders
pub fn check_query_completeness(
    broker: &DataBroker,
    query: &ProfileQuery,
) -> Result<(), Vec<&'static str>> {
    let Some(step) = broker.step(StepKind::Scan) else {
        return Ok(());
    };

    let mut missing = Vec::new();
    for action in &step.actions {
        let Action::Navigate { url, .. } = action else {
            continue;
        };
        for (placeholder, field, value) in [
            ("{first}", "first_name", query.first_name.as_str()),
            ("{last}", "last_name", query.last_name.as_str()),
            ("{full_name}", "first_name", query.first_name.as_str()),
            ("{full_name}", "last_name", query.last_name.as_str()),
            ("{city}", "city", query.city.as_str()),
            ("{state}", "state", query.state.as_str()),
        ] {
            if url.contains(placeholder) && value.trim().is_empty() && !missing.contains(&field) {
                missing.push(field);
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pir_broker::{BrokerMetadata, BrokerSchedule, Step};
    use pir_core::{BrokerId, ProfileQueryId};

    fn mock_broker(id: &str, url: &str) -> DataBroker {
        DataBroker {
            broker: BrokerMetadata {
                id: BrokerId::new(id).expect("valid test broker ID"),
                name: "Test".to_string(),
                url: "https://example.com".to_string(),
                version: "0.1.0".to_string(),
                opt_out_url: None,
            },
            steps: vec![Step {
                step_type: StepKind::Scan,
                actions: vec![Action::Navigate {
                    id: "search".to_string(),
                    url: url.to_string(),
                }],
            }],
            mirror_sites: Vec::new(),
            schedule: BrokerSchedule::default(),
        }
    }

    fn query() -> ProfileQuery {
        ProfileQuery {
            id: ProfileQueryId::new(1),
            first_name: "John".to_string(),
            middle_name: None,
            last_name: "Doe".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            birth_year: 1975,
        }
    }

    #[test]
    fn test_filter_all() {
        let broker = mock_broker("test", "https://example.com");
        assert!(BrokerFilter::All.matches(&broker));
    }

    #[test]
    fn test_filter_specific() {
        let broker = mock_broker("test", "https://example.com");
        assert!(BrokerFilter::Specific(vec!["test".to_string()]).matches(&broker));
        assert!(!BrokerFilter::Specific(vec![]).matches(&broker));
    }

    #[test]
    fn test_filter_excluding() {
        let broker = mock_broker("test", "https://example.com");
        assert!(!BrokerFilter::Excluding(vec!["test".to_string()]).matches(&broker));
        assert!(BrokerFilter::Excluding(vec!["other".to_string()]).matches(&broker));
    }

    #[test]
    fn test_query_completeness_missing_fields() {
        let broker = mock_broker("test", "https://example.com/{first}-{last}/{city}-{state}");
        let mut query = query();
        query.city = String::new();
        query.state = " ".to_string();

        let missing = check_query_completeness(&broker, &query).unwrap_err();
        assert_eq!(missing, vec!["city", "state"]);
    }

    #[test]
    fn test_query_completeness_all_fields_present() {
        let broker = mock_broker("test", "https://example.com/{first}-{last}/{city}-{state}");
        assert!(check_query_completeness(&broker, &query()).is_ok());
    }

    #[test]
    fn test_middle_name_is_optional() {
        let broker = mock_broker("test", "https://example.com/{full_name}-{middle}");
        assert!(check_query_completeness(&broker, &query()).is_ok());

        let mut query = query();
        query.first_name = String::new();
        assert_eq!(
            check_query_completeness(&broker, &query).unwrap_err(),
            vec!["first_name"]
        );
    }
}
