//! Command-line surface of the tablegrowth audit job.
//!
//! Every option can also be supplied through its environment variable so
//! the job runs unchanged under a scheduler. Parsing produces an
//! [`AuditConfig`] value; nothing here reads process state afterwards.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tablegrowth_core::config::DEFAULT_REGIONS;
use tablegrowth_core::{
    AuditConfig, AuditError, ConcurrencyLimits, CredentialPath, PoolSettings, Result, SinkConfig,
    TagFilter,
};
use url::Url;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(name = "tablegrowth-audit")]
#[command(about = "Audit table growth across RDS MySQL fleets")]
#[command(version)]
#[command(long_about = "
tablegrowth - per-table size auditing for RDS MySQL fleets

Discovers instances in each region, keeps those tagged for auditing, reads
the schemas listed in their tags and ships per-table metrics:
- row_count: estimated rows
- data_size, index_size, total_size: megabytes, rounded to 0.02

GUARANTEES:
- Read-only sessions, catalog queries only
- Credentials come from the parameter store and are never logged
- A failing region, instance or schema never stops the run

EXAMPLES:
  tablegrowth-audit --environment prod
  tablegrowth-audit --environment prod --sink point-series --endpoint https://api.datadoghq.com/api/v1/series
  tablegrowth-audit --regions us-east-1,eu-west-1 discover
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub audit: AuditArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run a full audit (default)
    Run,
    /// List eligible instances without connecting to them
    Discover,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Same as -v; honours the job's DEBUG variable
    #[arg(
        long,
        env = "DEBUG",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(
        long,
        env = "LOG_JSON",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Verbosity after folding in the debug flag.
    pub fn verbosity(&self) -> u8 {
        if self.debug {
            self.verbose.max(1)
        } else {
            self.verbose
        }
    }
}

/// Metrics backend selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Tagged time-series points
    PointSeries,
    /// Flat JSON records with source headers
    FlattenedRecord,
    /// Log metrics only
    Log,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Regions to query (comma-separated)
    #[arg(long, env = "AUDIT_REGIONS", value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Eligibility tag as key=value
    #[arg(long, env = "AUDIT_FILTER_TAG", default_value = "audit_growth=true")]
    pub filter_tag: String,

    /// Audit every discovered instance regardless of tags
    #[arg(long, conflicts_with = "filter_tag")]
    pub no_filter: bool,

    /// Tag listing the schemas to audit
    #[arg(long, env = "SCHEMA_TAG_KEY", default_value = "schemas_to_audit")]
    pub schema_tag_key: String,

    /// Separator between schema names in the schema tag
    #[arg(long, default_value_t = ':')]
    pub schema_delimiter: char,

    /// Tag holding the credential location as <region>:<path>
    #[arg(long, env = "CREDENTIAL_TAG_KEY", default_value = "cred_path")]
    pub credential_tag_key: String,

    /// Credential location used when an instance has no credential tag
    #[arg(long, env = "DB_CREDENTIAL_PATH")]
    pub credential_path: Option<String>,

    /// Database user assumed when the secret carries only a password
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Port used when the directory reports none
    #[arg(long, env = "DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    /// Instances requested per region (20-100)
    #[arg(long, default_value_t = 100)]
    pub page_size: i32,

    /// Instances audited concurrently
    #[arg(long, default_value_t = 8)]
    pub instance_concurrency: usize,

    /// Schemas collected concurrently per instance
    #[arg(long, default_value_t = 4)]
    pub schema_concurrency: usize,

    /// Metric shipments in flight per schema
    #[arg(long, default_value_t = 16)]
    pub shipment_concurrency: usize,

    /// Deadline in seconds for directory, secret-store and sink calls
    #[arg(long, default_value_t = 30)]
    pub call_timeout: u64,

    /// Database connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Environment label attached to every metric
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Metrics backend
    #[arg(long, env = "METRICS_SINK", value_enum, default_value = "log")]
    pub sink: SinkKind,

    /// Metrics backend URL
    #[arg(long, env = "METRICS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Point-series API key
    #[arg(long, env = "DD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Point-series application key
    #[arg(long, env = "DD_APP_KEY", hide_env_values = true)]
    pub app_key: Option<String>,

    /// Metric name prefix for point-series metrics
    #[arg(long, env = "METRICS_NAMESPACE", default_value = "rds.db")]
    pub namespace: String,

    /// Source category prefix for flattened records
    #[arg(long, env = "SOURCE_CATEGORY_PREFIX", default_value = "rds/table_growth/")]
    pub category_prefix: String,
}

impl AuditArgs {
    /// Builds and validates the run configuration.
    ///
    /// # Errors
    /// Returns [`AuditError::Configuration`] for missing or invalid settings
    pub fn into_config(self) -> Result<AuditConfig> {
        let environment = self
            .environment
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AuditError::configuration("ENVIRONMENT must be set"))?;

        let regions = if self.regions.is_empty() {
            DEFAULT_REGIONS.iter().map(|r| (*r).to_string()).collect()
        } else {
            self.regions.into_iter().map(|r| r.trim().to_string()).collect()
        };

        let filter = if self.no_filter {
            None
        } else {
            Some(TagFilter::parse(&self.filter_tag)?)
        };

        let default_credential_path = self
            .credential_path
            .as_deref()
            .map(|value| {
                CredentialPath::parse(value).ok_or_else(|| {
                    AuditError::configuration("DB_CREDENTIAL_PATH must look like <region>:<path>")
                })
            })
            .transpose()?;

        let sink = match self.sink {
            SinkKind::Log => SinkConfig::Log,
            SinkKind::PointSeries => SinkConfig::PointSeries {
                endpoint: parse_endpoint(self.endpoint.as_deref())?,
                api_key: Zeroizing::new(self.api_key.ok_or_else(|| {
                    AuditError::configuration("DD_API_KEY is required for the point-series sink")
                })?),
                app_key: self.app_key.map(Zeroizing::new),
                namespace: self.namespace,
            },
            SinkKind::FlattenedRecord => SinkConfig::FlattenedRecord {
                endpoint: parse_endpoint(self.endpoint.as_deref())?,
                category_prefix: self.category_prefix,
            },
        };

        let mut config = AuditConfig::new(environment)
            .with_regions(regions)
            .with_filter(filter)
            .with_sink(sink)
            .with_default_credential_path(default_credential_path)
            .with_concurrency(ConcurrencyLimits {
                instances: self.instance_concurrency,
                schemas: self.schema_concurrency,
                shipments: self.shipment_concurrency,
                ..ConcurrencyLimits::default()
            });
        config.schema_tag_key = self.schema_tag_key;
        config.schema_delimiter = self.schema_delimiter;
        config.credential_tag_key = self.credential_tag_key;
        config.db_user = self.db_user;
        config.db_port = self.db_port;
        config.page_size = self.page_size;
        config.call_timeout = Duration::from_secs(self.call_timeout);
        config.pool = PoolSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..PoolSettings::default()
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_endpoint(value: Option<&str>) -> Result<Url> {
    let value = value.ok_or_else(|| {
        AuditError::configuration("METRICS_ENDPOINT is required for this sink")
    })?;
    Url::parse(value)
        .map_err(|e| AuditError::configuration(format!("METRICS_ENDPOINT is not a URL: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Variables the CLI reads; cleared so the host environment cannot leak in.
    const CLI_ENV: &[&str] = &[
        "AUDIT_REGIONS",
        "AUDIT_FILTER_TAG",
        "SCHEMA_TAG_KEY",
        "CREDENTIAL_TAG_KEY",
        "DB_CREDENTIAL_PATH",
        "DB_USER",
        "DB_PORT",
        "ENVIRONMENT",
        "METRICS_SINK",
        "METRICS_ENDPOINT",
        "DD_API_KEY",
        "DD_APP_KEY",
        "METRICS_NAMESPACE",
        "SOURCE_CATEGORY_PREFIX",
        "DEBUG",
        "LOG_JSON",
    ];

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["tablegrowth-audit"];
        argv.extend_from_slice(args);
        temp_env::with_vars_unset(CLI_ENV, || Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_cli_defaults() {
        let config = parse(&["--environment", "prod"]).audit.into_config().unwrap();

        assert_eq!(config.regions.len(), DEFAULT_REGIONS.len());
        assert_eq!(config.filter, Some(TagFilter::new("audit_growth", "true")));
        assert_eq!(config.schema_tag_key, "schemas_to_audit");
        assert_eq!(config.credential_tag_key, "cred_path");
        assert_eq!(config.pool.connect_timeout, Duration::from_secs(5));
        assert!(matches!(config.sink, SinkConfig::Log));
    }

    #[test]
    fn test_cli_requires_environment() {
        let error = parse(&[]).audit.into_config().unwrap_err();
        assert!(error.to_string().contains("ENVIRONMENT"));
    }

    #[test]
    fn test_debug_flag_raises_verbosity() {
        let cli = parse(&["--debug"]);
        assert_eq!(cli.global.verbosity(), 1);

        let cli = parse(&["--debug", "-vv"]);
        assert_eq!(cli.global.verbosity(), 2);

        assert_eq!(parse(&[]).global.verbosity(), 0);
    }

    #[test]
    fn test_point_series_requires_api_key() {
        let cli = parse(&[
            "--environment",
            "prod",
            "--sink",
            "point-series",
            "--endpoint",
            "https://metrics.example/api/v1/series",
        ]);
        let error = cli.audit.into_config().unwrap_err();
        assert!(error.to_string().contains("DD_API_KEY"));
    }

    #[test]
    fn test_no_filter_audits_everything() {
        let config = parse(&["--environment", "prod", "--no-filter"])
            .audit
            .into_config()
            .unwrap();
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_subcommands() {
        assert_eq!(parse(&["discover"]).command, Some(Command::Discover));
        assert_eq!(parse(&["run"]).command, Some(Command::Run));
        assert_eq!(parse(&[]).command, None);
    }
}
