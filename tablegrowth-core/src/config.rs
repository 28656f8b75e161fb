//! Audit run configuration.
//!
//! [`AuditConfig`] is built once (by the CLI, from flags and environment
//! variables) and passed explicitly down the call chain. It intentionally
//! does NOT hold database passwords: those are resolved per instance from
//! the secret store. Metrics backend API keys are held in zeroizing
//! containers and redacted from `Debug` output.

use crate::credentials::CredentialPath;
use crate::error::AuditError;
use crate::filter::TagFilter;
use crate::Result;
use std::time::Duration;
use url::Url;
use zeroize::Zeroizing;

/// Regions audited when none are configured.
pub const DEFAULT_REGIONS: &[&str] = &[
    "eu-west-1",
    "eu-central-1",
    "sa-east-1",
    "us-east-1",
    "us-west-1",
    "us-west-2",
];

/// Smallest page the instance directory accepts.
pub const MIN_PAGE_SIZE: i32 = 20;
/// Largest page the instance directory accepts.
pub const MAX_PAGE_SIZE: i32 = 100;

/// Connection pool bounds for the per-schema collection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum open connections per pool
    pub max_connections: u32,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
    /// Connections are recycled after this long
    pub max_lifetime: Duration,
    /// Deadline for establishing (acquiring) a connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolSettings {
    /// Validates pool bounds.
    ///
    /// # Errors
    /// Returns a configuration error if a bound is zero or unsafe
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(AuditError::configuration(
                "max_connections must be greater than 0",
            ));
        }
        if self.max_connections > 100 {
            return Err(AuditError::configuration(
                "max_connections should not exceed 100 for safety",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(AuditError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }
        if self.max_lifetime.is_zero() {
            return Err(AuditError::configuration(
                "max_lifetime must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Fan-out width at each nesting level of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    /// Concurrent tag fetches within one region
    pub tag_fetches: usize,
    /// Concurrent instance branches
    pub instances: usize,
    /// Concurrent schema branches per instance
    pub schemas: usize,
    /// Concurrent shipments per schema
    pub shipments: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            tag_fetches: 16,
            instances: 8,
            schemas: 4,
            shipments: 16,
        }
    }
}

impl ConcurrencyLimits {
    fn validate(&self) -> Result<()> {
        let levels = [
            ("tag_fetches", self.tag_fetches),
            ("instances", self.instances),
            ("schemas", self.schemas),
            ("shipments", self.shipments),
        ];
        for (name, width) in levels {
            if width == 0 {
                return Err(AuditError::configuration(format!(
                    "concurrency limit '{}' must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Which metrics backend receives the collected metrics.
#[derive(Clone)]
pub enum SinkConfig {
    /// Timestamped, tagged points (one per metric name)
    PointSeries {
        endpoint: Url,
        api_key: Zeroizing<String>,
        app_key: Option<Zeroizing<String>>,
        /// Metric name prefix, e.g. `rds.db`
        namespace: String,
    },
    /// One flat JSON record per table with source headers
    FlattenedRecord {
        endpoint: Url,
        /// Prepended to the instance name to form the source category
        category_prefix: String,
    },
    /// Dry run: metrics are logged and not transmitted
    Log,
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PointSeries {
                endpoint,
                app_key,
                namespace,
                ..
            } => f
                .debug_struct("PointSeries")
                .field("endpoint", &endpoint.as_str())
                .field("api_key", &"****")
                .field("app_key", &app_key.as_ref().map(|_| "****"))
                .field("namespace", namespace)
                .finish(),
            Self::FlattenedRecord {
                endpoint,
                category_prefix,
            } => f
                .debug_struct("FlattenedRecord")
                .field("endpoint", &endpoint.as_str())
                .field("category_prefix", category_prefix)
                .finish(),
            Self::Log => f.write_str("Log"),
        }
    }
}

impl SinkConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::PointSeries {
                endpoint,
                api_key,
                namespace,
                ..
            } => {
                validate_endpoint(endpoint)?;
                if api_key.is_empty() {
                    return Err(AuditError::configuration(
                        "point-series sink requires an API key",
                    ));
                }
                if namespace.is_empty() {
                    return Err(AuditError::configuration(
                        "metric namespace cannot be empty",
                    ));
                }
                Ok(())
            }
            Self::FlattenedRecord { endpoint, .. } => validate_endpoint(endpoint),
            Self::Log => Ok(()),
        }
    }
}

fn validate_endpoint(endpoint: &Url) -> Result<()> {
    match endpoint.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AuditError::configuration(format!(
                "metrics endpoint must use http(s), got '{}'",
                other
            )));
        }
    }
    if endpoint.host_str().is_none() {
        return Err(AuditError::configuration(
            "metrics endpoint must specify a host",
        ));
    }
    Ok(())
}

/// Configuration for one audit run.
///
/// # Example
/// ```rust
/// use tablegrowth_core::config::AuditConfig;
///
/// let config = AuditConfig::new("staging")
///     .with_regions(vec!["us-east-1".to_string()]);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Regions queried by discovery
    pub regions: Vec<String>,
    /// Eligibility filter; `None` audits every discovered instance
    pub filter: Option<TagFilter>,
    /// Tag holding the schema list
    pub schema_tag_key: String,
    /// Separator between schema names in the schema list tag
    pub schema_delimiter: char,
    /// Tag holding `<secretRegion>:<secretPath>`
    pub credential_tag_key: String,
    /// Used when an instance lacks the credential tag
    pub default_credential_path: Option<CredentialPath>,
    /// Used when the secret body carries only a password
    pub db_user: Option<String>,
    /// Port used when the directory reports none
    pub db_port: u16,
    /// Metadata catalog holding the `tables` view
    pub catalog: String,
    /// Directory page size (first page only is read)
    pub page_size: i32,
    pub pool: PoolSettings,
    pub concurrency: ConcurrencyLimits,
    /// Deadline for secret-store, directory and sink calls
    pub call_timeout: Duration,
    /// Environment label attached to shipped metrics
    pub environment: String,
    pub sink: SinkConfig,
}

impl AuditConfig {
    /// Creates a configuration with defaults for everything except the
    /// environment label.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            regions: DEFAULT_REGIONS.iter().map(|r| (*r).to_string()).collect(),
            filter: Some(TagFilter::new("audit_growth", "true")),
            schema_tag_key: "schemas_to_audit".to_string(),
            schema_delimiter: ':',
            credential_tag_key: "cred_path".to_string(),
            default_credential_path: None,
            db_user: None,
            db_port: 3306,
            catalog: "information_schema".to_string(),
            page_size: MAX_PAGE_SIZE,
            pool: PoolSettings::default(),
            concurrency: ConcurrencyLimits::default(),
            call_timeout: Duration::from_secs(30),
            environment: environment.into(),
            sink: SinkConfig::Log,
        }
    }

    /// Builder method to set the regions.
    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    /// Builder method to set (or clear) the eligibility filter.
    pub fn with_filter(mut self, filter: Option<TagFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Builder method to set the sink.
    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }

    /// Builder method to set concurrency limits.
    pub fn with_concurrency(mut self, concurrency: ConcurrencyLimits) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the fallback credential path.
    pub fn with_default_credential_path(mut self, path: Option<CredentialPath>) -> Self {
        self.default_credential_path = path;
        self
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    /// Returns [`AuditError::Configuration`] naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(AuditError::configuration("at least one region is required"));
        }
        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err(AuditError::configuration("region names cannot be empty"));
        }
        if self.environment.trim().is_empty() {
            return Err(AuditError::configuration("environment label cannot be empty"));
        }
        if let Some(filter) = &self.filter
            && filter.key.is_empty()
        {
            return Err(AuditError::configuration("filter tag key cannot be empty"));
        }
        if self.schema_tag_key.is_empty() {
            return Err(AuditError::configuration("schema tag key cannot be empty"));
        }
        if self.credential_tag_key.is_empty() {
            return Err(AuditError::configuration(
                "credential tag key cannot be empty",
            ));
        }
        if self.db_port == 0 {
            return Err(AuditError::configuration("db_port must be greater than 0"));
        }
        if !is_valid_identifier(&self.catalog) {
            return Err(AuditError::configuration(format!(
                "catalog '{}' is not a valid identifier",
                self.catalog
            )));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(AuditError::configuration(format!(
                "page_size must be between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(AuditError::configuration(
                "call_timeout must be greater than 0",
            ));
        }
        if let Some(user) = &self.db_user
            && user.is_empty()
        {
            return Err(AuditError::configuration("db_user cannot be empty when set"));
        }
        self.pool.validate()?;
        self.concurrency.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

/// True for names safe to splice into a query as a catalog qualifier.
fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
