//! Dry-run sink.

use super::{MetricsSink, ShipContext};
use crate::models::TableMetric;
use crate::Result;
use async_trait::async_trait;

/// Logs every table metric at INFO and transmits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn ship(&self, context: &ShipContext, metric: &TableMetric) -> Result<()> {
        let values = metric
            .metrics
            .iter()
            .map(|m| format!("{}={}", m.name, m.value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            instance = %context.instance_name,
            schema = %metric.schema_name,
            table = %metric.table_name,
            "{}",
            values
        );
        Ok(())
    }
}
