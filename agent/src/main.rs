//! PIR agent - runs one scan and opt-out sweep over the broker catalog.

mod queries;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use pir_broker::{BrokerLoader, BrokerRegistry, DataBroker};
use pir_browser::ChromiumFactory;
use pir_core::{AppConfig, BrokerId};
use pir_operations::{BrokerFilter, JobOrchestrator, JobStatus, SweepReport};
use pir_scheduler::ExecutionBudget;
use std::path::PathBuf;
use std::sync::Arc;
use store::JsonFileJobStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about)]
struct CliArgs {
    /// Profile queries to scan for (`.toml` or `.json`)
    queries: PathBuf,

    /// Only run these brokers
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude")]
    only: Vec<String>,

    /// Skip these brokers
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Broker catalog directory, overriding the configuration
    #[arg(long)]
    brokers: Option<PathBuf>,

    /// Job state file, overriding the configuration
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    show_ui: bool,
}

impl CliArgs {
    fn filter(&self) -> BrokerFilter {
        if !self.only.is_empty() {
            BrokerFilter::Specific(self.only.clone())
        } else if !self.exclude.is_empty() {
            BrokerFilter::Excluding(self.exclude.clone())
        } else {
            BrokerFilter::All
        }
    }

    /// Brokers to hand to the sweep. Every name given to `--only` must exist.
    fn select_brokers(&self, registry: &BrokerRegistry) -> Result<Vec<DataBroker>> {
        for name in &self.exclude {
            if !registry.contains(&BrokerId::new(name.as_str())?) {
                warn!(broker_id = %name, "excluded broker is not in the catalog");
            }
        }
        if self.only.is_empty() {
            return Ok(registry.get_all());
        }

        self.only
            .iter()
            .map(|name| {
                let broker_id = BrokerId::new(name.as_str())?;
                registry
                    .get(&broker_id)
                    .with_context(|| format!("broker {name} given to --only"))
            })
            .collect()
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pir=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let mut config = AppConfig::load_with_env().context("loading configuration")?;
    if args.show_ui {
        config.browser.headless = false;
    }

    let catalog_dir = args
        .brokers
        .as_deref()
        .or(config.catalog.definitions_dir.as_deref());
    let registry = BrokerLoader::from_config(catalog_dir)
        .and_then(|loader| BrokerRegistry::load_from(&loader))
        .context("loading broker catalog")?;
    let brokers = args.select_brokers(&registry)?;
    let queries = queries::load_profile_queries(&args.queries)?;
    info!(
        catalog = registry.count(),
        brokers = brokers.len(),
        queries = queries.len(),
        "loaded catalog and profile queries"
    );

    let state_file = match args.state_file.clone().or(config.storage.state_file.clone()) {
        Some(path) => path,
        None => AppConfig::data_dir()?.join("jobs.json"),
    };
    let store = Arc::new(
        JsonFileJobStore::open(&state_file)
            .await
            .context("opening job state file")?,
    );

    let orchestrator = JobOrchestrator::from_config(
        &config,
        Arc::new(ChromiumFactory::new(&config.browser)),
        store,
    );
    let mut entries = orchestrator
        .load_entries(&brokers, &queries)
        .await
        .context("restoring job records")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling sweep");
                cancel.cancel();
            }
        }
    });

    let budget = ExecutionBudget::from_config(&config.execution);
    let report = orchestrator
        .run_sweep(&mut entries, &args.filter(), &budget, &cancel)
        .await;

    summarize(&report);
    Ok(())
}

fn summarize(report: &SweepReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            JobStatus::Failed(kind) => warn!(
                broker_id = %outcome.broker_id,
                profile_query_id = %outcome.profile_query_id,
                step = ?outcome.step_kind,
                error = ?kind,
                "job failed"
            ),
            status => info!(
                broker_id = %outcome.broker_id,
                profile_query_id = %outcome.profile_query_id,
                step = ?outcome.step_kind,
                matches = outcome.matches,
                ?status,
                "job finished"
            ),
        }
    }

    for skipped in &report.skipped {
        info!(
            broker_id = %skipped.broker_id,
            profile_query_id = %skipped.profile_query_id,
            reason = ?skipped.reason,
            "job skipped"
        );
    }

    info!(
        session_id = %report.session_id,
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        skipped = report.skipped.len(),
        terminated = report.terminated,
        "sweep finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_from_args() {
        let args = CliArgs::parse_from(["pir-agent", "queries.toml", "--only", "acme,other"]);
        assert_eq!(
            args.filter(),
            BrokerFilter::Specific(vec!["acme".to_string(), "other".to_string()])
        );

        let args = CliArgs::parse_from(["pir-agent", "queries.toml", "--exclude", "acme"]);
        assert_eq!(args.filter(), BrokerFilter::Excluding(vec!["acme".to_string()]));

        let args = CliArgs::parse_from(["pir-agent", "queries.toml"]);
        assert_eq!(args.filter(), BrokerFilter::All);
    }

    fn catalog_dir(ids: &[&str]) -> TempDir {
        let temp = TempDir::new().expect("create temp dir");
        let group = temp.path().join("people-search");
        std::fs::create_dir_all(&group).expect("create group dir");
        for id in ids {
            let content = format!(
                r#"
[broker]
id = "{id}"
name = "Broker {id}"
url = "https://{id}.example"
version = "0.1.0"

[[steps]]
step_type = "scan"

[[steps.actions]]
action_type = "navigate"
id = "search"
url = "https://{id}.example/{{first}}-{{last}}"
"#
            );
            std::fs::write(group.join(format!("{id}.toml")), content).expect("write broker");
        }
        temp
    }

    fn registry(ids: &[&str]) -> (TempDir, BrokerRegistry) {
        let dir = catalog_dir(ids);
        let loader = BrokerLoader::new(dir.path()).expect("open catalog");
        let registry = BrokerRegistry::load_from(&loader).expect("load catalog");
        (dir, registry)
    }

    fn ids(brokers: &[DataBroker]) -> Vec<String> {
        brokers.iter().map(|b| b.id().to_string()).collect()
    }

    #[test]
    fn test_select_whole_catalog() {
        let (_dir, registry) = registry(&["bravo", "alpha"]);
        let args = CliArgs::parse_from(["pir-agent", "q.toml", "--exclude", "alpha"]);

        let brokers = args.select_brokers(&registry).expect("select brokers");
        assert_eq!(ids(&brokers), ["alpha", "bravo"]);
    }

    #[test]
    fn test_select_only_named_brokers() {
        let (_dir, registry) = registry(&["alpha", "bravo", "charlie"]);
        let args = CliArgs::parse_from(["pir-agent", "q.toml", "--only", "charlie,alpha"]);

        let brokers = args.select_brokers(&registry).expect("select brokers");
        assert_eq!(ids(&brokers), ["charlie", "alpha"]);
    }

    #[test]
    fn test_unknown_only_broker_is_an_error() {
        let (_dir, registry) = registry(&["alpha"]);
        let args = CliArgs::parse_from(["pir-agent", "q.toml", "--only", "alpha,missing"]);

        let err = args.select_brokers(&registry).unwrap_err();
        assert!(err.to_string().contains("broker missing given to --only"));
    }

    #[test]
    fn test_only_and_exclude_conflict() {
        let result =
            CliArgs::try_parse_from(["pir-agent", "q.toml", "--only", "a", "--exclude", "b"]);
        assert!(result.is_err());
    }
}
