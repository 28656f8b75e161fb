//! Fleet audit orchestration.
//!
//! A run walks three nested levels of concurrent work:
//!
//! 1. Instance: resolve credentials, build connection params, read the
//!    schema list
//! 2. Schema: connect and collect table metrics
//! 3. Shipment: send each table metric to the sink
//!
//! Every branch is a spawned task gated by a semaphore. Every level
//! joins before its parent reports done. Failures are returned as values
//! from the branch that produced them and folded into a [`RunSummary`];
//! no branch failure stops its siblings.

use crate::collector::{MetricsCollector, SchemaCollection};
use crate::config::{AuditConfig, ConcurrencyLimits};
use crate::credentials::{CredentialResolver, SecretStore};
use crate::discovery::{Discovery, InstanceDirectory, RegionInstanceDiscoverer};
use crate::error::{AuditError, FailureKind, with_timeout};
use crate::filter::TagFilter;
use crate::models::{ConnectionParams, Instance};
use crate::sink::{MetricsSink, ShipContext};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

/// Pipeline level a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    Region,
    Instance,
    Schema,
    Shipment,
}

/// One failed branch of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub scope: FailureScope,
    /// Region, instance, `instance/schema` or `instance/schema/table`
    pub target: String,
    pub kind: FailureKind,
    pub message: String,
}

impl FailureRecord {
    fn from_error(scope: FailureScope, target: impl Into<String>, error: &AuditError) -> Self {
        Self {
            scope,
            target: target.into(),
            kind: error.kind(),
            message: error.display_chain(),
        }
    }
}

/// Outcome of one audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub regions_queried: usize,
    pub regions_failed: usize,
    pub tag_fetch_failures: usize,
    /// Regions where only the first page of instances was audited
    pub truncated_regions: Vec<String>,
    pub instances_discovered: usize,
    pub instances_eligible: usize,
    pub instances_succeeded: usize,
    pub instances_failed: usize,
    pub schemas_succeeded: usize,
    pub schemas_failed: usize,
    pub tables_collected: usize,
    pub metrics_shipped: usize,
    pub shipments_failed: usize,
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            duration_ms: 0,
            regions_queried: 0,
            regions_failed: 0,
            tag_fetch_failures: 0,
            truncated_regions: Vec::new(),
            instances_discovered: 0,
            instances_eligible: 0,
            instances_succeeded: 0,
            instances_failed: 0,
            schemas_succeeded: 0,
            schemas_failed: 0,
            tables_collected: 0,
            metrics_shipped: 0,
            shipments_failed: 0,
            failures: Vec::new(),
        }
    }

    /// True when no branch of the run failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_discovery(&mut self, discovery: &Discovery, eligible: usize) {
        self.regions_queried = discovery.regions_queried;
        self.regions_failed = discovery.failed_regions.len();
        self.tag_fetch_failures = discovery.tag_failures.len();
        self.truncated_regions = discovery.truncated_regions.clone();
        self.instances_discovered = discovery.instances.len();
        self.instances_eligible = eligible;

        for failure in &discovery.failed_regions {
            self.failures.push(FailureRecord {
                scope: FailureScope::Region,
                target: failure.region.clone(),
                kind: FailureKind::Discovery,
                message: failure.error_message.clone(),
            });
        }
        for failure in &discovery.tag_failures {
            self.failures.push(FailureRecord {
                scope: FailureScope::Instance,
                target: failure.instance.clone(),
                kind: FailureKind::TagRetrieval,
                message: failure.error_message.clone(),
            });
        }
    }

    fn record_instance(&mut self, outcome: InstanceOutcome) {
        let mut failed = false;

        if let Some(error) = &outcome.error {
            failed = true;
            self.failures.push(FailureRecord::from_error(
                FailureScope::Instance,
                &outcome.instance,
                error,
            ));
        }

        for schema in outcome.schemas {
            let target = format!("{}/{}", outcome.instance, schema.schema_name);
            self.tables_collected += schema.tables;
            self.metrics_shipped += schema.shipped;
            self.shipments_failed += schema.shipping_failures.len();

            match &schema.error {
                None => self.schemas_succeeded += 1,
                Some(error) => {
                    failed = true;
                    self.schemas_failed += 1;
                    self.failures
                        .push(FailureRecord::from_error(FailureScope::Schema, &target, error));
                }
            }

            for (table, error) in &schema.shipping_failures {
                self.failures.push(FailureRecord::from_error(
                    FailureScope::Shipment,
                    format!("{}/{}", target, table),
                    error,
                ));
            }
        }

        if failed {
            self.instances_failed += 1;
        } else {
            self.instances_succeeded += 1;
        }
    }
}

/// Discovered instances together with the subset passing the filter.
#[derive(Debug)]
pub struct Eligibility {
    pub discovery: Discovery,
    pub eligible: Vec<Instance>,
}

#[derive(Debug)]
struct InstanceOutcome {
    instance: String,
    schemas: Vec<SchemaOutcome>,
    /// Set when the instance branch stopped before or between schemas
    error: Option<AuditError>,
}

impl InstanceOutcome {
    fn failed(instance: impl Into<String>, error: AuditError) -> Self {
        Self {
            instance: instance.into(),
            schemas: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug)]
struct SchemaOutcome {
    schema_name: String,
    tables: usize,
    shipped: usize,
    error: Option<AuditError>,
    /// `(table, error)` for each dropped shipment
    shipping_failures: Vec<(String, AuditError)>,
}

/// Per-branch settings copied into spawned tasks.
#[derive(Debug, Clone)]
struct BranchSettings {
    schema_tag_key: String,
    schema_delimiter: char,
    db_port: u16,
    catalog: String,
    environment: String,
    concurrency: ConcurrencyLimits,
    call_timeout: Duration,
}

/// Drives discovery, filtering, collection and shipping for a fleet.
#[derive(Clone)]
pub struct AuditOrchestrator {
    discoverer: RegionInstanceDiscoverer,
    filter: Option<TagFilter>,
    resolver: CredentialResolver,
    collector: Arc<dyn MetricsCollector>,
    sink: Arc<dyn MetricsSink>,
    settings: Arc<BranchSettings>,
}

impl AuditOrchestrator {
    /// Wires the pipeline from a validated configuration and its
    /// collaborators.
    pub fn new(
        config: &AuditConfig,
        directory: Arc<dyn InstanceDirectory>,
        store: Arc<dyn SecretStore>,
        collector: Arc<dyn MetricsCollector>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let discoverer = RegionInstanceDiscoverer::new(directory, config.regions.clone())
            .with_page_size(config.page_size)
            .with_tag_concurrency(config.concurrency.tag_fetches)
            .with_timeout(config.call_timeout);

        let resolver = CredentialResolver::new(
            store,
            config.credential_tag_key.clone(),
            config.call_timeout,
        )
        .with_default_path(config.default_credential_path.clone())
        .with_default_user(config.db_user.clone());

        Self {
            discoverer,
            filter: config.filter.clone(),
            resolver,
            collector,
            sink,
            settings: Arc::new(BranchSettings {
                schema_tag_key: config.schema_tag_key.clone(),
                schema_delimiter: config.schema_delimiter,
                db_port: config.db_port,
                catalog: config.catalog.clone(),
                environment: config.environment.clone(),
                concurrency: config.concurrency,
                call_timeout: config.call_timeout,
            }),
        }
    }

    /// Discovers the fleet and applies the eligibility filter.
    pub async fn eligible_instances(&self) -> Eligibility {
        let discovery = self.discoverer.discover().await;
        let eligible: Vec<Instance> = match &self.filter {
            Some(filter) => discovery
                .instances
                .iter()
                .filter(|instance| filter.matches(instance))
                .cloned()
                .collect(),
            None => discovery.instances.clone(),
        };

        tracing::info!(
            discovered = discovery.instances.len(),
            eligible = eligible.len(),
            filter = %self.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Filtered instances"
        );

        Eligibility {
            discovery,
            eligible,
        }
    }

    /// Runs a full audit. Always completes; failures are reported in the
    /// summary.
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!(run_id = %run_id, sink = self.sink.name(), "Starting table growth audit");

        let Eligibility {
            discovery,
            eligible,
        } = self.eligible_instances().await;

        let mut summary = RunSummary::new(run_id, started_at);
        summary.record_discovery(&discovery, eligible.len());

        let timestamp = started_at.timestamp();
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.instances));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for instance in eligible {
            let orchestrator = self.clone();
            let permits = Arc::clone(&permits);
            let name = instance.name.clone();
            let span = tracing::info_span!("instance", name = %instance.name, region = %instance.region);

            let handle = tasks.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return InstanceOutcome::failed(
                            &instance.name,
                            AuditError::TaskFailed {
                                context: "instance limiter closed".to_string(),
                            },
                        );
                    };
                    orchestrator.audit_instance(instance, timestamp).await
                }
                .instrument(span),
            );
            names.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let name = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tracing::error!(instance = %name, "Instance task failed: {}", join_error);
                    InstanceOutcome::failed(
                        name,
                        AuditError::TaskFailed {
                            context: join_error.to_string(),
                        },
                    )
                }
            };
            summary.record_instance(outcome);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            instances_succeeded = summary.instances_succeeded,
            instances_failed = summary.instances_failed,
            schemas_succeeded = summary.schemas_succeeded,
            schemas_failed = summary.schemas_failed,
            tables = summary.tables_collected,
            shipped = summary.metrics_shipped,
            shipments_failed = summary.shipments_failed,
            "Audit completed in {}ms",
            summary.duration_ms
        );
        summary
    }

    /// Reads the schema list of an instance.
    ///
    /// # Errors
    /// Returns [`AuditError::SchemaList`] when the tag is missing or lists
    /// no schema
    pub fn schemas_for(&self, instance: &Instance) -> Result<Vec<String>> {
        let schemas = instance
            .tag_value(&self.settings.schema_tag_key)
            .map(|value| parse_schema_list(value, self.settings.schema_delimiter))
            .unwrap_or_default();

        if schemas.is_empty() {
            return Err(AuditError::SchemaList {
                instance: instance.name.clone(),
            });
        }
        Ok(schemas)
    }

    async fn audit_instance(&self, instance: Instance, timestamp: i64) -> InstanceOutcome {
        let credential = match self.resolver.resolve(&instance).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!("Skipping instance: {}", e.display_chain());
                return InstanceOutcome::failed(&instance.name, e);
            }
        };

        let Some(params) = ConnectionParams::for_instance(
            &instance,
            &credential,
            self.settings.db_port,
            &self.settings.catalog,
        ) else {
            let error = AuditError::connection_failed(
                format!("instance {} has no endpoint address", instance.name),
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address"),
            );
            tracing::warn!("Skipping instance: {}", error);
            return InstanceOutcome::failed(&instance.name, error);
        };

        let schemas = match self.schemas_for(&instance) {
            Ok(schemas) => schemas,
            Err(e) => {
                tracing::warn!("Skipping instance: {}", e);
                return InstanceOutcome::failed(&instance.name, e);
            }
        };

        tracing::info!(schemas = schemas.len(), endpoint = %params, "Auditing instance");

        let params = Arc::new(params);
        let instance = Arc::new(instance);
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.schemas));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for schema in schemas {
            let orchestrator = self.clone();
            let params = Arc::clone(&params);
            let instance = Arc::clone(&instance);
            let permits = Arc::clone(&permits);
            let name = schema.clone();

            let handle = tasks.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return SchemaOutcome::aborted(schema, "schema limiter closed");
                    };
                    orchestrator
                        .audit_schema(&instance, &params, schema, timestamp)
                        .await
                }
                .in_current_span(),
            );
            names.insert(handle.id(), name);
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    let schema = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tracing::error!(schema = %schema, "Schema task failed: {}", join_error);
                    outcomes.push(SchemaOutcome::aborted(schema, &join_error.to_string()));
                }
            }
        }

        InstanceOutcome {
            instance: instance.name.clone(),
            schemas: outcomes,
            error: None,
        }
    }

    async fn audit_schema(
        &self,
        instance: &Instance,
        params: &ConnectionParams,
        schema: String,
        timestamp: i64,
    ) -> SchemaOutcome {
        let SchemaCollection {
            schema_name,
            metrics,
            error,
        } = self.collector.collect(params, &schema).await;

        let context = Arc::new(ShipContext {
            instance_name: instance.name.clone(),
            host: params.host.clone(),
            schema_name: schema_name.clone(),
            environment: self.settings.environment.clone(),
            timestamp,
        });
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.shipments));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for metric in metrics.iter().cloned() {
            let sink = Arc::clone(&self.sink);
            let context = Arc::clone(&context);
            let permits = Arc::clone(&permits);
            let call_timeout = self.settings.call_timeout;
            let table = metric.table_name.clone();

            let handle = tasks.spawn(
                async move {
                    let shipped = match permits.acquire_owned().await {
                        Ok(_permit) => {
                            with_timeout(
                                "metric shipment",
                                call_timeout,
                                sink.ship(&context, &metric),
                            )
                            .await
                        }
                        Err(_) => Err(AuditError::TaskFailed {
                            context: "shipment limiter closed".to_string(),
                        }),
                    };
                    (metric.table_name, shipped)
                }
                .in_current_span(),
            );
            names.insert(handle.id(), table);
        }

        let mut results: Vec<(String, Result<()>)> = Vec::with_capacity(metrics.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    let table = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    results.push((
                        table,
                        Err(AuditError::TaskFailed {
                            context: join_error.to_string(),
                        }),
                    ));
                }
            }
        }

        let mut shipped = 0;
        let mut shipping_failures = Vec::new();
        for (table, result) in results {
            match result {
                Ok(()) => shipped += 1,
                Err(e) => {
                    tracing::warn!(
                        schema = %schema_name,
                        table = %table,
                        sink = self.sink.name(),
                        "Dropping metric: {}",
                        e.display_chain()
                    );
                    shipping_failures.push((table, e));
                }
            }
        }

        tracing::debug!(
            schema = %schema_name,
            tables = metrics.len(),
            shipped,
            "Schema audited"
        );

        SchemaOutcome {
            schema_name,
            tables: metrics.len(),
            shipped,
            error,
            shipping_failures,
        }
    }
}

impl SchemaOutcome {
    fn aborted(schema_name: String, context: &str) -> Self {
        Self {
            schema_name,
            tables: 0,
            shipped: 0,
            error: Some(AuditError::TaskFailed {
                context: context.to_string(),
            }),
            shipping_failures: Vec::new(),
        }
    }
}

/// Splits a schema list tag value.
///
/// Entries are trimmed; empty entries and repeats are dropped, keeping the
/// first occurrence order.
pub fn parse_schema_list(value: &str, delimiter: char) -> Vec<String> {
    let mut schemas: Vec<String> = Vec::new();
    for entry in value.split(delimiter).map(str::trim) {
        if !entry.is_empty() && !schemas.iter().any(|s| s == entry) {
            schemas.push(entry.to_string());
        }
    }
    schemas
}
