//! Table growth audit job.
//!
//! Discovers tagged RDS instances, collects per-table size metrics for the
//! schemas listed on each and ships them to the configured metrics
//! backend. Prints a JSON run summary to stdout.

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tablegrowth_audit::{Cli, Command};
use tablegrowth_core::aws::{RdsDirectory, SsmSecretStore, load_sdk_config};
use tablegrowth_core::logging::init_logging;
use tablegrowth_core::{AuditConfig, AuditOrchestrator, MySqlCollector, create_sink};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbosity(), cli.global.quiet, cli.global.log_json)?;

    let config = cli.audit.into_config()?;
    info!(
        environment = %config.environment,
        regions = ?config.regions,
        sink = ?config.sink,
        "Loaded configuration"
    );

    let orchestrator = build_orchestrator(&config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let summary = orchestrator.run().await;
            let rendered = serde_json::to_string_pretty(&summary)
                .context("Failed to serialize run summary")?;
            println!("{}", rendered);
        }
        Command::Discover => {
            let eligibility = orchestrator.eligible_instances().await;
            let instances: Vec<_> = eligibility
                .eligible
                .iter()
                .map(|instance| {
                    json!({
                        "name": instance.name,
                        "region": instance.region,
                        "address": instance.address,
                        "schemas": orchestrator.schemas_for(instance).unwrap_or_default(),
                    })
                })
                .collect();
            let report = json!({
                "discovered": eligibility.discovery.instances.len(),
                "eligible": instances,
                "failed_regions": eligibility.discovery.failed_regions,
                "tag_failures": eligibility.discovery.tag_failures,
                "truncated_regions": eligibility.discovery.truncated_regions,
            });
            let rendered = serde_json::to_string_pretty(&report)
                .context("Failed to serialize discovery report")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn build_orchestrator(config: &AuditConfig) -> anyhow::Result<AuditOrchestrator> {
    let sdk_config = load_sdk_config().await;
    let sink = create_sink(&config.sink, config.call_timeout)?;
    let collector = MySqlCollector::new(config.pool.clone(), &config.catalog);

    Ok(AuditOrchestrator::new(
        config,
        Arc::new(RdsDirectory::new(sdk_config.clone())),
        Arc::new(SsmSecretStore::new(sdk_config)),
        Arc::new(collector),
        sink,
    ))
}
