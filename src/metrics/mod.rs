//! Metric model for the exporter
//!
//! Every configured metric becomes a [`MetricInstance`] registered into exactly
//! one [`MetricRegistry`]. Registries are addressed through the
//! [`RegistryRouter`], which maps export groups to HTTP paths.

pub mod definition;
pub mod ingest;
pub mod instance;
pub mod registry;

pub use definition::{build, CompiledLogGroup, MetricDescriptor, ResolvedLabelSet};
pub use ingest::IngestMetrics;
pub use instance::MetricInstance;
pub use registry::{MetricRegistry, RegistryRouter, DEFAULT_REGISTRY};

use crate::error::{ExporterError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::num::NonZeroU32;
use std::time::Duration;

/// Namespace prefixed to every exported metric.
pub const NAMESPACE: &str = "jsonlog";

/// Histogram buckets used when a histogram configures none.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Summary quantiles used when a summary configures none.
pub const DEFAULT_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

pub const DEFAULT_AGE_BUCKETS: u32 = 5;

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));

static LABEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label name regex"));

/// Kind of a metric together with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram {
        buckets: Vec<f64>,
    },
    Summary {
        quantiles: Vec<f64>,
        max_age: Duration,
        age_buckets: NonZeroU32,
    },
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram { .. } => "histogram",
            MetricKind::Summary { .. } => "summary",
        }
    }

    /// Label name the exposition format reserves for this kind.
    pub fn reserved_label(&self) -> Option<&'static str> {
        match self {
            MetricKind::Histogram { .. } => Some("le"),
            MetricKind::Summary { .. } => Some("quantile"),
            _ => None,
        }
    }
}

/// `jsonlog_<subsystem>_<name>`
pub fn full_name(subsystem: &str, name: &str) -> String {
    format!("{}_{}_{}", NAMESPACE, subsystem, name)
}

pub fn validate_metric_name(name: &str) -> Result<()> {
    if METRIC_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ExporterError::InvalidName {
            kind: "metric",
            name: name.to_string(),
        })
    }
}

pub fn validate_label_name(name: &str) -> Result<()> {
    if LABEL_NAME.is_match(name) && !name.starts_with("__") {
        Ok(())
    } else {
        Err(ExporterError::InvalidName {
            kind: "label",
            name: name.to_string(),
        })
    }
}
