//! Metrics sinks and the factory that selects one from configuration.
//!
//! # Module Structure
//! - `point_series`: one timestamped, tagged point per metric name
//! - `flattened`: one flat JSON record per table with source headers
//! - `log`: dry-run sink that only logs
//!
//! Sinks are fire-and-forget from the producer's point of view: the
//! orchestrator logs and counts a failed shipment, then drops it. Sinks
//! never retry.

pub mod flattened;
pub mod log;
pub mod point_series;

use crate::config::SinkConfig;
use crate::error::AuditError;
use crate::models::TableMetric;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use flattened::FlattenedRecordSink;
pub use log::LogSink;
pub use point_series::PointSeriesSink;

/// Where a table metric came from and when the run observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipContext {
    pub instance_name: String,
    /// Instance endpoint address, used as the host identifier
    pub host: String,
    pub schema_name: String,
    pub environment: String,
    /// Unix seconds, shared by every shipment of a run
    pub timestamp: i64,
}

/// Destination for collected table metrics.
///
/// Implementations are interchangeable: the orchestrator holds an
/// `Arc<dyn MetricsSink>` and never inspects the concrete type.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Transmits one table's metrics.
    ///
    /// # Errors
    /// Returns [`AuditError::Shipping`] when the backend cannot be reached
    /// or rejects the payload
    async fn ship(&self, context: &ShipContext, metric: &TableMetric) -> Result<()>;
}

/// Builds the sink selected by `config`.
///
/// # Errors
/// Returns a configuration error if the HTTP client cannot be built
pub fn create_sink(config: &SinkConfig, timeout: Duration) -> Result<Arc<dyn MetricsSink>> {
    match config {
        SinkConfig::PointSeries {
            endpoint,
            api_key,
            app_key,
            namespace,
        } => Ok(Arc::new(PointSeriesSink::new(
            http_client(timeout)?,
            endpoint.clone(),
            api_key.clone(),
            app_key.clone(),
            namespace.clone(),
        ))),
        SinkConfig::FlattenedRecord {
            endpoint,
            category_prefix,
        } => Ok(Arc::new(FlattenedRecordSink::new(
            http_client(timeout)?,
            endpoint.clone(),
            category_prefix.clone(),
        ))),
        SinkConfig::Log => Ok(Arc::new(LogSink)),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tablegrowth/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AuditError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Sends a prepared request and maps transport or status failures.
async fn send(request: reqwest::RequestBuilder, context: &str) -> Result<()> {
    let response = request
        .send()
        .await
        .map_err(|e| AuditError::shipping(context.to_string(), e))?;

    response
        .error_for_status()
        .map(|_| ())
        .map_err(|e| AuditError::shipping(context.to_string(), e))
}
