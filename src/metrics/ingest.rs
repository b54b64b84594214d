//! Ingestion self-metrics
//!
//! Counters tracking the exporter's own ingestion path: lines read, lines
//! discarded as non-JSON and metric updates skipped because the templated
//! value was not a number. They live in the default registry.

use crate::error::Result;
use crate::metrics::{MetricInstance, MetricKind, RegistryRouter, NAMESPACE};
use metrics::Label;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IngestMetrics {
    lines: Arc<MetricInstance>,
    parse_errors: Arc<MetricInstance>,
    value_errors: Arc<MetricInstance>,
}

const SOURCE_LABELS: &[&str] = &["log_group", "source"];

fn source_labels(log_group: &str, source: &str) -> Vec<Label> {
    vec![
        Label::new("log_group", log_group.to_string()),
        Label::new("source", source.to_string()),
    ]
}

impl IngestMetrics {
    /// Create the counters and register them into the default registry.
    pub fn register(router: &mut RegistryRouter) -> Result<Self> {
        let metrics = Self::unregistered()?;
        let registry = router.registry_for("exporter", None)?;
        registry.register(metrics.lines.clone())?;
        registry.register(metrics.parse_errors.clone())?;
        registry.register(metrics.value_errors.clone())?;
        Ok(metrics)
    }

    /// Counters that are not exported anywhere; for driving an ingestor in isolation.
    pub fn unregistered() -> Result<Self> {
        let counter = |name: &str, help: &str, labels: &[&str]| -> Result<Arc<MetricInstance>> {
            Ok(Arc::new(MetricInstance::new(
                format!("{}_exporter_{}", NAMESPACE, name),
                help,
                MetricKind::Counter,
                labels,
            )?))
        };
        Ok(Self {
            lines: counter("lines_total", "Lines read from source files", SOURCE_LABELS)?,
            parse_errors: counter(
                "parse_errors_total",
                "Lines discarded because they are not valid JSON",
                SOURCE_LABELS,
            )?,
            value_errors: counter(
                "value_errors_total",
                "Metric updates skipped because the templated value is not a valid number",
                &["log_group", "source", "metric"],
            )?,
        })
    }

    pub fn record_line(&self, log_group: &str, source: &str) {
        self.lines.increment(source_labels(log_group, source), 1.0);
    }

    pub fn record_parse_error(&self, log_group: &str, source: &str) {
        self.parse_errors.increment(source_labels(log_group, source), 1.0);
    }

    pub fn record_value_error(&self, log_group: &str, source: &str, metric: &str) {
        let mut labels = source_labels(log_group, source);
        labels.push(Label::new("metric", metric.to_string()));
        self.value_errors.increment(labels, 1.0);
    }
}
