//! Live metric objects
//!
//! A [`MetricInstance`] owns its own storage, built with the options of
//! exactly one metric, so buckets, quantiles and summary windows never leak
//! between metrics. Gauges, histograms and summaries go through a Prometheus
//! recorder; counters are float-valued label vectors, since the recorder's
//! counters only count whole numbers. Series are materialized on the first
//! update carrying a new label tuple, and updates to existing series are
//! lock-free, so concurrent updates are never lost.

use crate::error::{ExporterError, Result};
use crate::metrics::MetricKind;
use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, Opts, TextEncoder};
use std::collections::HashMap;
use tracing::warn;

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

enum Backend {
    Counter(CounterVec),
    Recorder {
        recorder: PrometheusRecorder,
        handle: PrometheusHandle,
    },
}

pub struct MetricInstance {
    name: KeyName,
    kind: MetricKind,
    backend: Backend,
}

impl std::fmt::Debug for MetricInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricInstance")
            .field("name", &self.name.as_str())
            .field("kind", &self.kind)
            .finish()
    }
}

impl MetricInstance {
    /// Build the storage for one metric.
    ///
    /// `label_names` fixes the label dimensions of a counter; every update
    /// must carry exactly these labels. Other kinds accept any label set.
    pub fn new(
        name: impl Into<String>,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<Self> {
        let name = name.into();
        let backend = match &kind {
            MetricKind::Counter => {
                // Counter descriptors refuse empty help.
                let help = if help.is_empty() { name.as_str() } else { help };
                Backend::Counter(CounterVec::new(Opts::new(name.clone(), help), label_names)?)
            }
            _ => Self::recorder_backend(&name, help, &kind)?,
        };

        Ok(Self {
            name: KeyName::from(name),
            kind,
            backend,
        })
    }

    fn recorder_backend(name: &str, help: &str, kind: &MetricKind) -> Result<Backend> {
        let bucket_err = |e: metrics_exporter_prometheus::BuildError| ExporterError::Bucket {
            metric: name.to_string(),
            message: e.to_string(),
        };

        let builder = PrometheusBuilder::new();
        let builder = match kind {
            MetricKind::Counter | MetricKind::Gauge => builder,
            MetricKind::Histogram { buckets } => builder
                .set_buckets_for_metric(Matcher::Full(name.to_string()), buckets)
                .map_err(bucket_err)?,
            MetricKind::Summary {
                quantiles,
                max_age,
                age_buckets,
            } => builder
                .set_quantiles(quantiles)
                .map_err(bucket_err)?
                .set_bucket_count(*age_buckets)
                .set_bucket_duration(*max_age / age_buckets.get())
                .map_err(bucket_err)?,
        };

        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        if !help.is_empty() {
            let key_name = KeyName::from(name.to_string());
            let description = SharedString::from(help.to_string());
            match kind {
                MetricKind::Counter => recorder.describe_counter(key_name, None, description),
                MetricKind::Gauge => recorder.describe_gauge(key_name, None, description),
                MetricKind::Histogram { .. } | MetricKind::Summary { .. } => {
                    recorder.describe_histogram(key_name, None, description)
                }
            }
        }

        Ok(Backend::Recorder { recorder, handle })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> &MetricKind {
        &self.kind
    }

    fn key(&self, labels: Vec<Label>) -> Key {
        Key::from_parts(self.name.clone(), labels)
    }

    /// Add `amount` to the counter series identified by `labels`.
    ///
    /// `amount` must be finite and non-negative.
    pub fn increment(&self, labels: Vec<Label>, amount: f64) {
        debug_assert!(matches!(self.kind, MetricKind::Counter));
        debug_assert!(amount.is_finite() && amount >= 0.0);
        if let Backend::Counter(counter) = &self.backend {
            let values: HashMap<&str, &str> =
                labels.iter().map(|l| (l.key(), l.value())).collect();
            match counter.get_metric_with(&values) {
                Ok(series) => series.inc_by(amount),
                Err(e) => warn!(metric = %self.name(), error = %e, "Counter update with mismatched labels"),
            }
        }
    }

    /// Replace the gauge series value.
    pub fn set(&self, labels: Vec<Label>, value: f64) {
        debug_assert!(matches!(self.kind, MetricKind::Gauge));
        if let Backend::Recorder { recorder, .. } = &self.backend {
            recorder
                .register_gauge(&self.key(labels), &metadata())
                .set(value);
        }
    }

    /// Record one observation into a histogram or summary series.
    pub fn observe(&self, labels: Vec<Label>, value: f64) {
        debug_assert!(matches!(
            self.kind,
            MetricKind::Histogram { .. } | MetricKind::Summary { .. }
        ));
        if let Backend::Recorder { recorder, .. } = &self.backend {
            recorder
                .register_histogram(&self.key(labels), &metadata())
                .record(value);
        }
    }

    /// Fold pending histogram and summary observations into their series.
    ///
    /// Rendering does this too; calling it periodically bounds the memory
    /// held between scrapes.
    pub fn run_upkeep(&self) {
        if let Backend::Recorder { handle, .. } = &self.backend {
            handle.run_upkeep();
        }
    }

    /// Exposition text of every series of this metric.
    pub fn render(&self) -> String {
        match &self.backend {
            Backend::Counter(counter) => {
                let families: Vec<_> = counter
                    .collect()
                    .into_iter()
                    .filter(|family| !family.get_metric().is_empty())
                    .collect();
                let mut buf = Vec::new();
                if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
                    warn!(metric = %self.name(), error = %e, "Failed to encode counter");
                    return String::new();
                }
                String::from_utf8_lossy(&buf).into_owned()
            }
            Backend::Recorder { handle, .. } => handle.render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DEFAULT_BUCKETS;
    use std::num::NonZeroU32;
    use std::sync::Arc;
    use std::time::Duration;

    fn labels(method: &str) -> Vec<Label> {
        vec![Label::new("method", method.to_string())]
    }

    #[test]
    fn test_counter_series_per_label_tuple() {
        let counter = MetricInstance::new("jsonlog_app_requests", "Requests", MetricKind::Counter, &["method"])
                .unwrap();
        counter.increment(labels("GET"), 1.0);
        counter.increment(labels("GET"), 2.0);
        counter.increment(labels("POST"), 1.0);

        let text = counter.render();
        assert!(text.contains("# HELP jsonlog_app_requests Requests"));
        assert!(text.contains("# TYPE jsonlog_app_requests counter"));
        assert!(text.contains(r#"jsonlog_app_requests{method="GET"} 3"#));
        assert!(text.contains(r#"jsonlog_app_requests{method="POST"} 1"#));
    }

    #[test]
    fn test_gauge_replaces_value() {
        let gauge = MetricInstance::new("jsonlog_app_queue", "", MetricKind::Gauge, &[]).unwrap();
        gauge.set(Vec::new(), 4.5);
        gauge.set(Vec::new(), 7.5);
        let text = gauge.render();
        assert!(text.contains("jsonlog_app_queue 7.5"));
        assert!(!text.contains("# HELP"));
    }

    #[test]
    fn test_histogram_uses_own_buckets() {
        let histogram = MetricInstance::new(
            "jsonlog_app_latency",
            "Latency",
            MetricKind::Histogram {
                buckets: DEFAULT_BUCKETS.to_vec(),
            },
            &[],
        )
        .unwrap();
        histogram.observe(Vec::new(), 0.3);
        let text = histogram.render();
        assert!(text.contains(r#"jsonlog_app_latency_bucket{le="0.25"} 0"#));
        assert!(text.contains(r#"jsonlog_app_latency_bucket{le="0.5"} 1"#));
        assert!(text.contains("jsonlog_app_latency_count 1"));
    }

    #[test]
    fn test_summary_renders_quantiles() {
        let summary = MetricInstance::new(
            "jsonlog_app_size",
            "Size",
            MetricKind::Summary {
                quantiles: vec![0.5],
                max_age: Duration::from_secs(60),
                age_buckets: NonZeroU32::new(3).unwrap(),
            },
            &["method"],
        )
        .unwrap();
        summary.observe(labels("GET"), 2.5);
        let text = summary.render();
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains(r#"jsonlog_app_size_count{method="GET"} 1"#));
    }

    #[test]
    fn test_empty_buckets_rejected_by_builder() {
        let err = MetricInstance::new(
            "jsonlog_app_bad",
            "",
            MetricKind::Histogram { buckets: Vec::new() },
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ExporterError::Bucket { .. }));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(
            MetricInstance::new("jsonlog_app_hits", "", MetricKind::Counter, &["method"]).unwrap(),
        );
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment(labels("GET"), 1.0);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(counter.render().contains(r#"jsonlog_app_hits{method="GET"} 4000"#));
    }

    #[test]
    fn test_counter_adds_fractional_amounts() {
        let counter = MetricInstance::new("jsonlog_app_cost", "Cost", MetricKind::Counter, &[]).unwrap();
        for _ in 0..10 {
            counter.increment(Vec::new(), 0.25);
        }
        counter.increment(Vec::new(), 2.5);
        assert!(counter.render().lines().any(|l| l == "jsonlog_app_cost 5"));

        counter.increment(Vec::new(), 0.5);
        assert!(counter.render().lines().any(|l| l == "jsonlog_app_cost 5.5"));
    }

    #[test]
    fn test_counter_without_help_still_renders() {
        let counter = MetricInstance::new("jsonlog_app_plain", "", MetricKind::Counter, &[]).unwrap();
        assert_eq!(counter.render(), "");
        counter.increment(Vec::new(), 1.0);
        let text = counter.render();
        assert!(text.contains("# TYPE jsonlog_app_plain counter"));
        assert!(text.contains("jsonlog_app_plain 1"));
    }

    #[test]
    fn test_counter_rejects_mismatched_labels() {
        let counter =
            MetricInstance::new("jsonlog_app_checked", "", MetricKind::Counter, &["method"]).unwrap();
        counter.increment(vec![Label::new("other", "x")], 1.0);
        assert_eq!(counter.render(), "");
    }

    #[test]
    fn test_upkeep_keeps_observations() {
        let histogram = MetricInstance::new(
            "jsonlog_app_wait",
            "",
            MetricKind::Histogram {
                buckets: DEFAULT_BUCKETS.to_vec(),
            },
            &[],
        )
        .unwrap();
        histogram.observe(Vec::new(), 0.3);
        histogram.observe(Vec::new(), 0.4);
        histogram.run_upkeep();
        histogram.observe(Vec::new(), 0.5);
        histogram.run_upkeep();
        assert!(histogram.render().contains("jsonlog_app_wait_count 3"));
    }
}
