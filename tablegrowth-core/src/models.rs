//! Core data models for the audit pipeline.
//!
//! Instances and their tags are built fresh by discovery on every run and
//! dropped when the run ends. Credentials and connection parameters hold
//! their secrets in zeroizing containers and never print them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// A name/value label attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered tags with a lookup index keyed by tag name.
///
/// Uniqueness of names is not enforced; lookups return the first tag that
/// carries the requested name, matching the order the directory returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<Tag>,
    index: HashMap<String, usize>,
}

impl TagSet {
    /// Builds a tag set, indexing the first occurrence of every name.
    pub fn new(tags: Vec<Tag>) -> Self {
        let mut index = HashMap::with_capacity(tags.len());
        for (position, tag) in tags.iter().enumerate() {
            index.entry(tag.key.clone()).or_insert(position);
        }
        Self { tags, index }
    }

    /// Returns the value of the first tag named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|&position| self.tags.get(position))
            .map(|tag| tag.value.as_str())
    }

    /// True when the first tag named `key` has exactly `value`.
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    /// Iterates tags in directory order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Number of tags, duplicates included.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when the instance carries no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl From<Vec<Tag>> for TagSet {
    fn from(tags: Vec<Tag>) -> Self {
        Self::new(tags)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| Tag::new(k, v)).collect())
    }
}

impl Serialize for TagSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tags.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Tag>::deserialize(deserializer).map(Self::new)
    }
}

/// One addressable database deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique ARN-like identifier
    pub identifier: String,
    /// Human-readable instance name
    pub name: String,
    /// Region the instance was discovered in
    pub region: String,
    /// Network endpoint address; absent while an instance is provisioning
    pub address: Option<String>,
    /// Endpoint port reported by the directory, if any
    pub port: Option<u16>,
    pub tags: TagSet,
}

impl Instance {
    /// Returns the value of the first tag named `key`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key)
    }
}

/// Database credentials resolved for one instance.
///
/// Both fields are non-empty by construction; the resolver fails instead of
/// producing an empty credential.
#[derive(Clone)]
pub struct Credential {
    user: Zeroizing<String>,
    password: Zeroizing<String>,
}

impl Credential {
    /// Creates a credential, returning `None` if either field is empty.
    pub fn new(user: String, password: String) -> Option<Self> {
        if user.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            user: Zeroizing::new(user),
            password: Zeroizing::new(password),
        })
    }

    /// Gets the username.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Gets the password. Callers must not log the returned value.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user.as_str())
            .field("password", &"****")
            .finish()
    }
}

/// Everything needed to open one database connection
#[derive(Clone)]
pub struct ConnectionParams {
    pub user: String,
    pub password: Zeroizing<String>,
    pub host: String,
    pub port: u16,
    /// Catalog selected on connect (the metadata catalog)
    pub catalog: String,
}

impl ConnectionParams {
    /// Derives parameters for `instance`, falling back to `default_port`
    /// when the directory did not report one.
    ///
    /// Returns `None` when the instance has no endpoint address yet.
    pub fn for_instance(
        instance: &Instance,
        credential: &Credential,
        default_port: u16,
        catalog: &str,
    ) -> Option<Self> {
        let host = instance.address.clone()?;
        Some(Self {
            user: credential.user().to_string(),
            password: Zeroizing::new(credential.password().to_string()),
            host,
            port: instance.port.unwrap_or(default_port),
            catalog: catalog.to_string(),
        })
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.catalog)
    }
}

/// Names of the per-table metrics, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    RowCount,
    DataSize,
    IndexSize,
    TotalSize,
}

impl MetricName {
    /// Wire name of the metric.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RowCount => "row_count",
            Self::DataSize => "data_size",
            Self::IndexSize => "index_size",
            Self::TotalSize => "total_size",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: MetricName,
    pub value: f64,
}

/// Size metrics for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetric {
    pub schema_name: String,
    pub table_name: String,
    /// Always row_count, data_size, index_size, total_size in that order
    pub metrics: Vec<MetricValue>,
}

impl TableMetric {
    /// Looks up a metric value by name.
    pub fn value(&self, name: MetricName) -> Option<f64> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| metric.value)
    }
}

/// Sink-facing projection of one metric component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric: String,
    /// `[unix_seconds, value]` pairs
    pub points: Vec<(i64, f64)>,
    pub host: String,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(tags: TagSet) -> Instance {
        Instance {
            identifier: "arn:aws:rds:us-east-1:123456789012:db:orders".to_string(),
            name: "orders".to_string(),
            region: "us-east-1".to_string(),
            address: Some("orders.abc.us-east-1.rds.amazonaws.com".to_string()),
            port: None,
            tags,
        }
    }

    #[test]
    fn test_tag_lookup_first_match_wins() {
        let tags = TagSet::new(vec![
            Tag::new("team", "payments"),
            Tag::new("audit_growth", "true"),
            Tag::new("team", "billing"),
        ]);

        assert_eq!(tags.get("team"), Some("payments"));
        assert_eq!(tags.len(), 3);
        assert!(tags.has("audit_growth", "true"));
        assert!(!tags.has("team", "billing"));
        assert_eq!(tags.get("missing"), None);
    }

    #[test]
    fn test_tag_set_serializes_as_list() {
        let tags: TagSet = [("env", "prod")].into_iter().collect();
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"[{"key":"env","value":"prod"}]"#);

        let back: TagSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("env"), Some("prod"));
    }

    #[test]
    fn test_credential_rejects_empty_fields() {
        assert!(Credential::new(String::new(), "secret".to_string()).is_none());
        assert!(Credential::new("admin".to_string(), String::new()).is_none());
        assert!(Credential::new("admin".to_string(), "secret".to_string()).is_some());
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let credential = Credential::new("admin".to_string(), "hunter2".to_string()).unwrap();
        let debug = format!("{:?}", credential);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_connection_params_port_fallback() {
        let credential = Credential::new("admin".to_string(), "hunter2".to_string()).unwrap();
        let mut instance = instance_with(TagSet::default());

        let params =
            ConnectionParams::for_instance(&instance, &credential, 3306, "information_schema")
                .unwrap();
        assert_eq!(params.port, 3306);
        assert_eq!(params.catalog, "information_schema");

        instance.port = Some(3307);
        let params =
            ConnectionParams::for_instance(&instance, &credential, 3306, "information_schema")
                .unwrap();
        assert_eq!(params.port, 3307);

        let rendered = format!("{:?} {}", params, params);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_connection_params_require_address() {
        let credential = Credential::new("admin".to_string(), "hunter2".to_string()).unwrap();
        let mut instance = instance_with(TagSet::default());
        instance.address = None;

        assert!(
            ConnectionParams::for_instance(&instance, &credential, 3306, "information_schema")
                .is_none()
        );
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(MetricName::RowCount.as_str(), "row_count");
        assert_eq!(MetricName::TotalSize.to_string(), "total_size");
        assert_eq!(
            serde_json::to_string(&MetricName::IndexSize).unwrap(),
            "\"index_size\""
        );
    }
}
