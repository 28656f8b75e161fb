//! Per-schema table size collection.
//!
//! # Module Structure
//! - `size`: byte-to-megabyte rounding and metric derivation
//! - `mysql`: catalog query over a bounded sqlx pool (feature `mysql`)
//!
//! A collection never fails outright: connection and query errors are
//! logged and reported alongside whatever rows were read before the error.

pub mod size;

#[cfg(feature = "mysql")]
pub mod mysql;

use crate::error::AuditError;
use crate::models::{ConnectionParams, TableMetric};
use async_trait::async_trait;

pub use size::{SIZE_STEP_MB, TableStats, rounded_mb};

#[cfg(feature = "mysql")]
pub use mysql::MySqlCollector;

/// Outcome of collecting one schema.
#[derive(Debug)]
pub struct SchemaCollection {
    pub schema_name: String,
    /// One entry per catalog row, in query order
    pub metrics: Vec<TableMetric>,
    /// Set when the connection or query failed; `metrics` then holds the
    /// rows read before the failure
    pub error: Option<AuditError>,
}

impl SchemaCollection {
    /// A collection that read every row.
    pub fn complete(schema_name: impl Into<String>, metrics: Vec<TableMetric>) -> Self {
        Self {
            schema_name: schema_name.into(),
            metrics,
            error: None,
        }
    }

    /// A collection cut short by `error`.
    pub fn partial(
        schema_name: impl Into<String>,
        metrics: Vec<TableMetric>,
        error: AuditError,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            metrics,
            error: Some(error),
        }
    }

    /// True when every row was read.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Source of per-table size metrics for one schema.
///
/// Object-safe so the orchestrator can hold an `Arc<dyn MetricsCollector>`.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Connects with `params` and collects metrics for every table in
    /// `schema`.
    async fn collect(&self, params: &ConnectionParams, schema: &str) -> SchemaCollection;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_collection_states() {
        let complete = SchemaCollection::complete("sales", Vec::new());
        assert!(complete.is_complete());
        assert!(complete.metrics.is_empty());

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset");
        let partial = SchemaCollection::partial(
            "sales",
            vec![TableStats {
                schema_name: "sales".to_string(),
                table_name: "orders".to_string(),
                rows: 1,
                data_bytes: 0,
                index_bytes: 0,
            }
            .into_metric()],
            AuditError::query_failed("orders-db/sales", io),
        );
        assert!(!partial.is_complete());
        assert_eq!(partial.metrics.len(), 1);
    }
}
