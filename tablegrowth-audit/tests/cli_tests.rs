//! Environment-driven configuration tests for the audit CLI.

#![allow(clippy::unwrap_used)]

use clap::Parser;
use proptest::prelude::*;
use tablegrowth_audit::{Cli, SinkKind};
use tablegrowth_core::SinkConfig;

fn parse_with_env(vars: &[(&str, Option<&str>)], args: &[&str]) -> Cli {
    let mut argv = vec!["tablegrowth-audit"];
    argv.extend_from_slice(args);
    temp_env::with_vars(vars.to_vec(), || Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_env_configures_flattened_sink() {
    let cli = parse_with_env(
        &[
            ("ENVIRONMENT", Some("staging")),
            ("AUDIT_REGIONS", Some("us-east-1,eu-west-1")),
            ("METRICS_SINK", Some("flattened-record")),
            ("METRICS_ENDPOINT", Some("https://collectors.example/receiver/v1/http/abc")),
            ("SOURCE_CATEGORY_PREFIX", Some("prod/rds/")),
            ("DB_CREDENTIAL_PATH", Some("us-east-1:/audit/creds")),
            ("DB_USER", Some("auditor")),
        ],
        &[],
    );
    assert_eq!(cli.audit.sink, SinkKind::FlattenedRecord);

    let config = cli.audit.into_config().unwrap();
    assert_eq!(config.environment, "staging");
    assert_eq!(config.regions, vec!["us-east-1", "eu-west-1"]);
    assert_eq!(config.db_user.as_deref(), Some("auditor"));
    assert_eq!(
        config.default_credential_path.unwrap().to_string(),
        "us-east-1:/audit/creds"
    );
    match config.sink {
        SinkConfig::FlattenedRecord {
            endpoint,
            category_prefix,
        } => {
            assert_eq!(endpoint.host_str(), Some("collectors.example"));
            assert_eq!(category_prefix, "prod/rds/");
        }
        other => panic!("expected flattened-record sink, got {:?}", other),
    }
}

#[test]
fn test_env_configures_point_series_sink() {
    let cli = parse_with_env(
        &[
            ("ENVIRONMENT", Some("prod")),
            ("METRICS_SINK", Some("point-series")),
            ("METRICS_ENDPOINT", Some("https://metrics.example/api/v1/series")),
            ("DD_API_KEY", Some("api-key")),
            ("DD_APP_KEY", Some("app-key")),
            ("METRICS_NAMESPACE", Some("rds.mysql")),
        ],
        &[],
    );

    let config = cli.audit.into_config().unwrap();
    let rendered = format!("{:?}", config.sink);
    assert!(rendered.contains("rds.mysql"));
    assert!(!rendered.contains("api-key"), "keys must be redacted");
    assert!(!rendered.contains("app-key"), "keys must be redacted");
}

#[test]
fn test_env_debug_variable() {
    let cli = parse_with_env(&[("DEBUG", Some("true"))], &[]);
    assert_eq!(cli.global.verbosity(), 1);

    let cli = parse_with_env(&[("DEBUG", Some("false"))], &[]);
    assert_eq!(cli.global.verbosity(), 0);
}

#[test]
fn test_env_rejects_malformed_values() {
    let cases: [&[(&str, Option<&str>)]; 4] = [
        &[("ENVIRONMENT", Some("prod")), ("DB_CREDENTIAL_PATH", Some("no-colon"))],
        &[("ENVIRONMENT", Some("prod")), ("AUDIT_FILTER_TAG", Some("audit_growth"))],
        &[
            ("ENVIRONMENT", Some("prod")),
            ("METRICS_SINK", Some("flattened-record")),
            ("METRICS_ENDPOINT", Some("ftp://collectors.example")),
        ],
        &[("ENVIRONMENT", Some("   "))],
    ];

    for vars in cases {
        let cli = parse_with_env(vars, &[]);
        assert!(cli.audit.into_config().is_err(), "accepted {:?}", vars);
    }
}

#[test]
fn test_env_flags_override_environment() {
    let cli = parse_with_env(
        &[("ENVIRONMENT", Some("prod")), ("DB_PORT", Some("3306"))],
        &["--environment", "qa", "--db-port", "3307"],
    );
    let config = cli.audit.into_config().unwrap();
    assert_eq!(config.environment, "qa");
    assert_eq!(config.db_port, 3307);
}

proptest! {
    #[test]
    fn prop_page_size_bounds_are_enforced(page_size in 0i32..200) {
        let size = page_size.to_string();
        let args = ["--environment", "prod", "--page-size", size.as_str()];
        let cli = parse_with_env(&[("AUDIT_REGIONS", None)], &args);
        let accepted = cli.audit.into_config().is_ok();
        prop_assert_eq!(accepted, (20..=100).contains(&page_size));
    }
}
