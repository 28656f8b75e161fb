//! Byte-to-megabyte conversion and per-table metric derivation.

use crate::models::{MetricName, MetricValue, TableMetric};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Reported sizes are multiples of this many megabytes.
pub const SIZE_STEP_MB: f64 = 0.02;

/// Converts bytes to megabytes rounded to the nearest [`SIZE_STEP_MB`].
#[allow(clippy::cast_precision_loss)]
pub fn rounded_mb(bytes: u64) -> f64 {
    let megabytes = bytes as f64 / BYTES_PER_MB;
    (megabytes / SIZE_STEP_MB).round() * SIZE_STEP_MB
}

/// Raw catalog statistics for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub schema_name: String,
    pub table_name: String,
    /// Engine row estimate
    pub rows: u64,
    pub data_bytes: u64,
    pub index_bytes: u64,
}

impl TableStats {
    /// Derives the four table metrics.
    ///
    /// `total_size` rounds the raw byte sum; it is not the sum of the two
    /// rounded sizes.
    #[allow(clippy::cast_precision_loss)]
    pub fn into_metric(self) -> TableMetric {
        let total_bytes = self.data_bytes.saturating_add(self.index_bytes);
        TableMetric {
            schema_name: self.schema_name,
            table_name: self.table_name,
            metrics: vec![
                MetricValue {
                    name: MetricName::RowCount,
                    value: self.rows as f64,
                },
                MetricValue {
                    name: MetricName::DataSize,
                    value: rounded_mb(self.data_bytes),
                },
                MetricValue {
                    name: MetricName::IndexSize,
                    value: rounded_mb(self.index_bytes),
                },
                MetricValue {
                    name: MetricName::TotalSize,
                    value: rounded_mb(total_bytes),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOLERANCE: f64 = 1e-9;

    fn stats(rows: u64, data_bytes: u64, index_bytes: u64) -> TableStats {
        TableStats {
            schema_name: "sales".to_string(),
            table_name: "orders".to_string(),
            rows,
            data_bytes,
            index_bytes,
        }
    }

    #[test]
    fn test_rounded_mb_known_values() {
        assert!((rounded_mb(0) - 0.0).abs() < TOLERANCE);
        assert!((rounded_mb(1_048_576) - 1.0).abs() < TOLERANCE);
        assert!((rounded_mb(524_288) - 0.5).abs() < TOLERANCE);
        // 0.0095 MB rounds down to zero, 0.0191 MB rounds up to one step
        assert!((rounded_mb(10_000) - 0.0).abs() < TOLERANCE);
        assert!((rounded_mb(20_000) - 0.02).abs() < TOLERANCE);
    }

    #[test]
    fn test_table_metric_end_to_end() {
        let metric = stats(100, 1_048_576, 524_288).into_metric();

        let names: Vec<_> = metric.metrics.iter().map(|m| m.name).collect();
        assert_eq!(
            names,
            vec![
                MetricName::RowCount,
                MetricName::DataSize,
                MetricName::IndexSize,
                MetricName::TotalSize
            ]
        );
        assert!((metric.value(MetricName::RowCount).unwrap() - 100.0).abs() < TOLERANCE);
        assert!((metric.value(MetricName::DataSize).unwrap() - 1.0).abs() < TOLERANCE);
        assert!((metric.value(MetricName::IndexSize).unwrap() - 0.5).abs() < TOLERANCE);
        assert!((metric.value(MetricName::TotalSize).unwrap() - 1.5).abs() < TOLERANCE);
        assert!(
            (metric.value(MetricName::TotalSize).unwrap() - rounded_mb(1_572_864)).abs()
                < TOLERANCE
        );
    }

    #[test]
    fn test_total_size_uses_raw_byte_sum() {
        let metric = stats(1, 10_000, 10_000).into_metric();

        let data = metric.value(MetricName::DataSize).unwrap();
        let index = metric.value(MetricName::IndexSize).unwrap();
        let total = metric.value(MetricName::TotalSize).unwrap();

        assert!((data + index - 0.0).abs() < TOLERANCE);
        assert!((total - 0.02).abs() < TOLERANCE);
    }

    #[test]
    fn test_total_size_saturates() {
        let metric = stats(0, u64::MAX, 1).into_metric();
        assert!(metric.value(MetricName::TotalSize).unwrap().is_finite());
    }

    proptest! {
        #[test]
        fn prop_rounded_mb_is_step_multiple(bytes in 0u64..(1u64 << 44)) {
            let steps = rounded_mb(bytes) / SIZE_STEP_MB;
            prop_assert!((steps - steps.round()).abs() < 1e-6);
        }

        #[test]
        fn prop_rounded_mb_within_half_step(bytes in 0u64..(1u64 << 44)) {
            let exact = bytes as f64 / BYTES_PER_MB;
            prop_assert!((rounded_mb(bytes) - exact).abs() <= SIZE_STEP_MB / 2.0 + 1e-6);
        }

        #[test]
        fn prop_total_matches_rounded_sum_of_bytes(
            data in 0u64..(1u64 << 40),
            index in 0u64..(1u64 << 40),
        ) {
            let metric = stats(0, data, index).into_metric();
            let total = metric.value(MetricName::TotalSize).unwrap();
            prop_assert!((total - rounded_mb(data + index)).abs() < TOLERANCE);
        }
    }
}
