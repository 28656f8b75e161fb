//! Flattened-record sink: one flat JSON object per table.
//!
//! Records are posted to an HTTP collector with three headers naming the
//! source: `<instance>/<schema>`, the instance endpoint, and a category
//! made of a fixed prefix plus the instance name.

use super::{MetricsSink, ShipContext, send};
use crate::models::TableMetric;
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

pub const SOURCE_NAME_HEADER: &str = "X-Sumo-Name";
pub const SOURCE_HOST_HEADER: &str = "X-Sumo-Host";
pub const SOURCE_CATEGORY_HEADER: &str = "X-Sumo-Category";

/// Ships table metrics as flat key/value records.
#[derive(Debug)]
pub struct FlattenedRecordSink {
    client: reqwest::Client,
    endpoint: Url,
    category_prefix: String,
}

impl FlattenedRecordSink {
    /// Creates a sink posting to `endpoint`.
    pub fn new(client: reqwest::Client, endpoint: Url, category_prefix: String) -> Self {
        Self {
            client,
            endpoint,
            category_prefix,
        }
    }

    /// Builds the flat record for one table.
    pub fn record(metric: &TableMetric) -> Value {
        let mut fields = Map::new();
        fields.insert(
            "schema_name".to_string(),
            Value::String(metric.schema_name.clone()),
        );
        fields.insert(
            "table_name".to_string(),
            Value::String(metric.table_name.clone()),
        );
        for value in &metric.metrics {
            fields.insert(value.name.as_str().to_string(), Value::from(value.value));
        }
        Value::Object(fields)
    }

    /// Source headers, in (name, value) pairs.
    pub fn source_headers(&self, context: &ShipContext) -> [(&'static str, String); 3] {
        [
            (
                SOURCE_NAME_HEADER,
                format!("{}/{}", context.instance_name, context.schema_name),
            ),
            (SOURCE_HOST_HEADER, context.host.clone()),
            (
                SOURCE_CATEGORY_HEADER,
                format!("{}{}", self.category_prefix, context.instance_name),
            ),
        ]
    }
}

#[async_trait]
impl MetricsSink for FlattenedRecordSink {
    fn name(&self) -> &'static str {
        "flattened-record"
    }

    async fn ship(&self, context: &ShipContext, metric: &TableMetric) -> Result<()> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&Self::record(metric));
        for (name, value) in self.source_headers(context) {
            request = request.header(name, value);
        }

        send(
            request,
            &format!(
                "record for {}/{}.{}",
                context.instance_name, metric.schema_name, metric.table_name
            ),
        )
        .await
    }
}
