//! Point-series sink: one tagged point per metric name.
//!
//! Payloads follow the series intake format:
//! `{"series":[{"metric":"<ns>.table_metrics.row_count","points":[[ts,v]],"host":..,"tags":[..]}]}`

use super::{MetricsSink, ShipContext, send};
use crate::models::{MetricPoint, TableMetric};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use url::Url;
use zeroize::Zeroizing;

const API_KEY_HEADER: &str = "DD-API-KEY";
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

#[derive(Debug, Serialize)]
struct SeriesPayload<'a> {
    series: &'a [MetricPoint],
}

/// Ships table metrics as individual time-series points.
pub struct PointSeriesSink {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Zeroizing<String>,
    app_key: Option<Zeroizing<String>>,
    namespace: String,
}

impl PointSeriesSink {
    /// Creates a sink posting to `endpoint`.
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        api_key: Zeroizing<String>,
        app_key: Option<Zeroizing<String>>,
        namespace: String,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            app_key,
            namespace,
        }
    }

    /// Projects a table metric onto one point per metric name.
    pub fn points(&self, context: &ShipContext, metric: &TableMetric) -> Vec<MetricPoint> {
        let tags = point_tags(context, metric);
        metric
            .metrics
            .iter()
            .map(|value| MetricPoint {
                metric: format!("{}.table_metrics.{}", self.namespace, value.name),
                points: vec![(context.timestamp, value.value)],
                host: context.host.clone(),
                tags: tags.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for PointSeriesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointSeriesSink")
            .field("endpoint", &self.endpoint.as_str())
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn point_tags(context: &ShipContext, metric: &TableMetric) -> Vec<String> {
    vec![
        format!("schema_name:{}", metric.schema_name),
        format!("table_name:{}", metric.table_name),
        format!("environment:{}", context.environment),
        format!("db_hostname:{}", context.host),
    ]
}

#[async_trait]
impl MetricsSink for PointSeriesSink {
    fn name(&self) -> &'static str {
        "point-series"
    }

    async fn ship(&self, context: &ShipContext, metric: &TableMetric) -> Result<()> {
        let points = self.points(context, metric);
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&SeriesPayload { series: &points });
        if let Some(app_key) = &self.app_key {
            request = request.header(APP_KEY_HEADER, app_key.as_str());
        }

        send(
            request,
            &format!(
                "{} point(s) for {}/{}.{}",
                points.len(),
                context.instance_name,
                metric.schema_name,
                metric.table_name
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::TableStats;
    use crate::error::FailureKind;
    use std::time::Duration;

    fn context() -> ShipContext {
        ShipContext {
            instance_name: "orders".to_string(),
            host: "orders.abc.us-east-1.rds.amazonaws.com".to_string(),
            schema_name: "sales".to_string(),
            environment: "prod".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn metric() -> TableMetric {
        TableStats {
            schema_name: "sales".to_string(),
            table_name: "orders".to_string(),
            rows: 100,
            data_bytes: 1_048_576,
            index_bytes: 524_288,
        }
        .into_metric()
    }

    fn sink(endpoint: &str) -> PointSeriesSink {
        PointSeriesSink::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
            Url::parse(endpoint).unwrap(),
            Zeroizing::new("api-key".to_string()),
            None,
            "rds.db".to_string(),
        )
    }

    #[test]
    fn test_points_one_per_metric() {
        let points = sink("https://api.example.com").points(&context(), &metric());

        let names: Vec<_> = points.iter().map(|p| p.metric.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "rds.db.table_metrics.row_count",
                "rds.db.table_metrics.data_size",
                "rds.db.table_metrics.index_size",
                "rds.db.table_metrics.total_size",
            ]
        );
        for point in &points {
            assert_eq!(point.host, "orders.abc.us-east-1.rds.amazonaws.com");
            assert_eq!(point.points.len(), 1);
            assert_eq!(point.points[0].0, 1_700_000_000);
            assert_eq!(
                point.tags,
                vec![
                    "schema_name:sales",
                    "table_name:orders",
                    "environment:prod",
                    "db_hostname:orders.abc.us-east-1.rds.amazonaws.com",
                ]
            );
        }
        assert!((points[3].points[0].1 - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_series_payload_shape() {
        let points = sink("https://api.example.com").points(&context(), &metric());
        let json = serde_json::to_value(SeriesPayload { series: &points }).unwrap();

        let first = &json["series"][0];
        assert_eq!(first["metric"], "rds.db.table_metrics.row_count");
        assert_eq!(first["points"][0][0], 1_700_000_000);
        assert_eq!(first["points"][0][1], 100.0);
        assert_eq!(first["tags"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let debug = format!("{:?}", sink("https://api.example.com"));
        assert!(!debug.contains("api-key"));
    }

    #[tokio::test]
    async fn test_ship_unreachable_is_shipping_error() {
        let error = sink("http://127.0.0.1:1/api/v1/series")
            .ship(&context(), &metric())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), FailureKind::Shipping);
    }
}
