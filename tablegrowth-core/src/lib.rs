//! Core library for auditing table growth across a fleet of RDS instances.
//!
//! A run discovers instances in a set of regions, keeps the ones carrying
//! the audit tag, resolves each instance's credentials from a secret
//! store, collects per-table size metrics for every schema listed on the
//! instance and ships them to a metrics backend.
//!
//! # Guarantees
//! - Database sessions are read-only and only the metadata catalog is
//!   queried
//! - Credentials are held in zeroizing buffers and never logged
//! - A failing region, instance, schema or shipment never stops the rest
//!   of the run; every failure lands in the [`RunSummary`]
//!
//! # Architecture
//! External systems sit behind traits ([`InstanceDirectory`],
//! [`SecretStore`], [`MetricsCollector`], [`MetricsSink`]) so the
//! [`AuditOrchestrator`] can be driven by in-memory fakes in tests.

#[cfg(feature = "aws")]
pub mod aws;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod sink;

pub use collector::{MetricsCollector, SchemaCollection, TableStats, rounded_mb};
#[cfg(feature = "mysql")]
pub use collector::MySqlCollector;
pub use config::{AuditConfig, ConcurrencyLimits, PoolSettings, SinkConfig};
pub use credentials::{CredentialPath, CredentialResolver, SecretStore};
pub use discovery::{
    Discovery, InstanceDescriptor, InstanceDirectory, InstancePage, RegionInstanceDiscoverer,
};
pub use error::{AuditError, FailureKind, Result};
pub use filter::TagFilter;
pub use models::{
    ConnectionParams, Credential, Instance, MetricName, MetricPoint, MetricValue, TableMetric,
    Tag, TagSet,
};
pub use orchestrator::{
    AuditOrchestrator, Eligibility, FailureRecord, FailureScope, RunSummary, parse_schema_list,
};
pub use sink::{MetricsSink, ShipContext, create_sink};
