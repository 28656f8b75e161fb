//! MySQL table size collection over the metadata catalog.
//!
//! # Security Features
//! - Sessions are switched to read-only on connect
//! - Only the catalog `tables` view is queried, with the schema bound as a
//!   parameter
//! - Errors name host, port and schema, never the credentials

use super::{MetricsCollector, SchemaCollection, TableStats};
use crate::config::PoolSettings;
use crate::error::AuditError;
use crate::models::{ConnectionParams, TableMetric};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{ConnectOptions, Row};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};

/// Collects table sizes from MySQL-compatible engines.
#[derive(Debug, Clone)]
pub struct MySqlCollector {
    pool: PoolSettings,
    query: String,
}

impl MySqlCollector {
    /// Creates a collector querying `<catalog>.tables`.
    ///
    /// `catalog` must already be validated as an identifier
    /// (see [`crate::config::AuditConfig::validate`]).
    pub fn new(pool: PoolSettings, catalog: &str) -> Self {
        Self {
            pool,
            query: catalog_query(catalog),
        }
    }

    /// The catalog query issued for every schema.
    pub fn query(&self) -> &str {
        &self.query
    }

    fn connect_options(params: &ConnectionParams) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.user)
            .password(&params.password)
            .database(&params.catalog)
            // No per-statement driver logs
            .disable_statement_logging()
    }

    /// Creates a lazily-connecting pool with the configured bounds.
    fn create_pool(&self, params: &ConnectionParams) -> MySqlPool {
        use sqlx::Executor;

        MySqlPoolOptions::new()
            .max_connections(self.pool.max_connections)
            .min_connections(0)
            .acquire_timeout(self.pool.connect_timeout)
            .idle_timeout(self.pool.idle_timeout)
            .max_lifetime(self.pool.max_lifetime)
            .test_before_acquire(true)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                    Ok(())
                })
            })
            .connect_lazy_with(Self::connect_options(params))
    }
}

#[async_trait]
impl MetricsCollector for MySqlCollector {
    async fn collect(&self, params: &ConnectionParams, schema: &str) -> SchemaCollection {
        let target = format!("{}:{}/{}", params.host, params.port, schema);
        let start = std::time::Instant::now();
        tracing::info!(schema = %schema, host = %params.host, "Gathering table metrics");

        let pool = self.create_pool(params);
        let mut metrics: Vec<TableMetric> = Vec::new();
        let mut failure = None;

        {
            let mut rows = sqlx::query(&self.query).bind(schema).fetch(&pool);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => match parse_row(&row) {
                        Ok(stats) => {
                            tracing::debug!(
                                schema = %stats.schema_name,
                                table = %stats.table_name,
                                rows = stats.rows,
                                data_bytes = stats.data_bytes,
                                index_bytes = stats.index_bytes,
                                "Collected table statistics"
                            );
                            metrics.push(stats.into_metric());
                        }
                        Err(e) => {
                            failure = Some(AuditError::query_failed(
                                format!("Failed to decode catalog row from {}", target),
                                e,
                            ));
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        failure = Some(classify_error(&target, e));
                        break;
                    }
                }
            }
        }

        pool.close().await;

        match failure {
            None => {
                tracing::info!(
                    schema = %schema,
                    tables = metrics.len(),
                    "Collected {} tables in {:.2}s",
                    metrics.len(),
                    start.elapsed().as_secs_f64()
                );
                SchemaCollection::complete(schema, metrics)
            }
            Some(error) => {
                tracing::warn!(
                    schema = %schema,
                    tables = metrics.len(),
                    "Collection stopped early: {}",
                    error.display_chain()
                );
                SchemaCollection::partial(schema, metrics, error)
            }
        }
    }
}

/// Builds the catalog query. Numeric columns are coalesced because engines
/// such as MEMORY or views report NULL sizes.
fn catalog_query(catalog: &str) -> String {
    format!(
        r#"
        SELECT
            CAST(table_schema AS CHAR) AS table_schema,
            CAST(table_name AS CHAR) AS table_name,
            CAST(COALESCE(table_rows, 0) AS UNSIGNED) AS table_rows,
            CAST(COALESCE(data_length, 0) AS UNSIGNED) AS data_length,
            CAST(COALESCE(index_length, 0) AS UNSIGNED) AS index_length
        FROM {}.tables
        WHERE table_schema = ?
        ORDER BY table_name
    "#,
        catalog
    )
}

fn parse_row(row: &MySqlRow) -> std::result::Result<TableStats, sqlx::Error> {
    Ok(TableStats {
        schema_name: row.try_get("table_schema")?,
        table_name: row.try_get("table_name")?,
        rows: row.try_get("table_rows")?,
        data_bytes: row.try_get("data_length")?,
        index_bytes: row.try_get("index_length")?,
    })
}

/// Separates failures to reach the server from failures of the query.
fn classify_error(target: &str, error: sqlx::Error) -> AuditError {
    let is_connection = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => true,
        // SQLSTATE 28000: access denied
        sqlx::Error::Database(db) => db.code().as_deref() == Some("28000"),
        _ => false,
    };

    if is_connection {
        AuditError::connection_failed(format!("Failed to connect to {}", target), error)
    } else {
        AuditError::query_failed(format!("Catalog query failed on {}", target), error)
    }
}
