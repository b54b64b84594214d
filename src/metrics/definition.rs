//! Metric definition factory
//!
//! Turns one log group's configuration into compiled metric descriptors:
//! resolved label sets, value templates and registered metric instances,
//! grouped by kind. Every configuration problem is reported here, before any
//! source file is opened.

use crate::config::{LogGroupConfig, MetricConfig, MetricType};
use crate::error::{ExporterError, Result};
use crate::metrics::{
    full_name, validate_label_name, validate_metric_name, MetricInstance, MetricKind,
    RegistryRouter, DEFAULT_AGE_BUCKETS, DEFAULT_BUCKETS, DEFAULT_MAX_AGE, DEFAULT_QUANTILES,
};
use crate::template::Template;
use metrics::Label;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Ordered label names with their co-indexed value templates.
///
/// Group labels come first (minus those a metric overrides), followed by the
/// metric's own labels. The order never changes after construction.
#[derive(Debug, Clone)]
pub struct ResolvedLabelSet {
    names: Vec<String>,
    templates: Vec<Template>,
}

impl ResolvedLabelSet {
    pub fn resolve(
        scope: &str,
        group_labels: &BTreeMap<String, String>,
        metric_labels: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut set = Self {
            names: Vec::with_capacity(group_labels.len() + metric_labels.len()),
            templates: Vec::with_capacity(group_labels.len() + metric_labels.len()),
        };
        let inherited = group_labels
            .iter()
            .filter(|(name, _)| !metric_labels.contains_key(*name));
        for (name, source) in inherited.chain(metric_labels.iter()) {
            validate_label_name(name)?;
            let template = Template::compile(format!("{}:+label_{}", scope, name), source)?;
            set.names.push(name.clone());
            set.templates.push(template);
        }
        Ok(set)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label pairs for `record`, ready to key a series.
    pub fn evaluate(&self, record: &Value) -> Vec<Label> {
        self.names
            .iter()
            .zip(&self.templates)
            .map(|(name, template)| Label::new(name.clone(), template.evaluate(record)))
            .collect()
    }
}

/// A compiled metric bound to its live instance.
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    /// Name as configured.
    pub name: String,
    /// Exported name, `jsonlog_<group>_<name>`.
    pub full_name: String,
    pub labels: ResolvedLabelSet,
    pub value: Option<Template>,
    pub instance: Arc<MetricInstance>,
}

impl MetricDescriptor {
    pub fn kind(&self) -> &MetricKind {
        self.instance.kind()
    }
}

/// Everything an ingestor needs for one log group.
#[derive(Debug, Clone)]
pub struct CompiledLogGroup {
    pub name: String,
    pub files: Vec<String>,
    pub counters: Vec<MetricDescriptor>,
    pub gauges: Vec<MetricDescriptor>,
    pub histograms: Vec<MetricDescriptor>,
    pub summaries: Vec<MetricDescriptor>,
}

impl CompiledLogGroup {
    pub fn metric_count(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.histograms.len() + self.summaries.len()
    }
}

/// Compile `group` and register every metric into its registry.
pub fn build(group: &LogGroupConfig, router: &mut RegistryRouter) -> Result<CompiledLogGroup> {
    let mut compiled = CompiledLogGroup {
        name: group.name.clone(),
        files: group.files.clone(),
        counters: Vec::new(),
        gauges: Vec::new(),
        histograms: Vec::new(),
        summaries: Vec::new(),
    };

    for metric in &group.metrics {
        let descriptor = build_metric(&group.name, &group.labels, metric)?;
        router
            .registry_for(&descriptor.full_name, metric.export_to.as_deref())?
            .register(descriptor.instance.clone())?;

        debug!(
            log_group = %group.name,
            metric = %descriptor.full_name,
            kind = descriptor.kind().as_str(),
            labels = ?descriptor.labels.names(),
            value = ?descriptor.value.as_ref().map(Template::source),
            "Built metric"
        );

        match metric.metric_type {
            MetricType::Counter => compiled.counters.push(descriptor),
            MetricType::Gauge => compiled.gauges.push(descriptor),
            MetricType::Histogram => compiled.histograms.push(descriptor),
            MetricType::Summary => compiled.summaries.push(descriptor),
        }
    }

    info!(
        log_group = %compiled.name,
        metrics = compiled.metric_count(),
        files = compiled.files.len(),
        "Compiled log group"
    );
    Ok(compiled)
}

fn build_metric(
    group: &str,
    group_labels: &BTreeMap<String, String>,
    metric: &MetricConfig,
) -> Result<MetricDescriptor> {
    let full_name = full_name(group, &metric.name);
    validate_metric_name(&full_name)?;

    let scope = format!("{}:{}", group, metric.name);
    let kind = metric_kind(&full_name, metric)?;

    let value = match metric.value_template() {
        Some(source) => Some(Template::compile(format!("{}:+value", scope), source)?),
        None if kind == MetricKind::Counter => None,
        None => {
            return Err(ExporterError::MissingValueTemplate {
                metric: format!("{} {}.{}", kind.as_str(), group, metric.name),
            })
        }
    };

    let labels = ResolvedLabelSet::resolve(&scope, group_labels, &metric.labels)?;
    if let Some(reserved) = kind.reserved_label() {
        if labels.names().iter().any(|n| n == reserved) {
            return Err(ExporterError::InvalidName {
                kind: "label",
                name: format!("{} (reserved for {} {})", reserved, kind.as_str(), full_name),
            });
        }
    }

    let label_names: Vec<&str> = labels.names().iter().map(String::as_str).collect();
    let instance = Arc::new(MetricInstance::new(
        full_name.clone(),
        &metric.help,
        kind,
        &label_names,
    )?);
    Ok(MetricDescriptor {
        name: metric.name.clone(),
        full_name,
        labels,
        value,
        instance,
    })
}

fn metric_kind(full_name: &str, metric: &MetricConfig) -> Result<MetricKind> {
    let bucket_err = |message: &str| ExporterError::Bucket {
        metric: full_name.to_string(),
        message: message.to_string(),
    };

    Ok(match metric.metric_type {
        MetricType::Counter => MetricKind::Counter,
        MetricType::Gauge => MetricKind::Gauge,
        MetricType::Histogram => {
            let buckets = if metric.buckets.is_empty() {
                DEFAULT_BUCKETS.to_vec()
            } else {
                metric.buckets.clone()
            };
            if buckets.iter().any(|b| !b.is_finite()) {
                return Err(bucket_err("bucket bounds must be finite"));
            }
            if buckets.windows(2).any(|w| w[0] >= w[1]) {
                return Err(bucket_err("bucket bounds must be strictly increasing"));
            }
            MetricKind::Histogram { buckets }
        }
        MetricType::Summary => {
            let quantiles = if metric.objectives.is_empty() {
                DEFAULT_QUANTILES.to_vec()
            } else {
                metric.objectives.clone()
            };
            if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
                return Err(bucket_err("objectives must be quantiles between 0 and 1"));
            }
            let max_age = if metric.max_age_secs == 0 {
                DEFAULT_MAX_AGE
            } else {
                Duration::from_secs(metric.max_age_secs)
            };
            let age_buckets = NonZeroU32::new(metric.age_buckets)
                .or_else(|| NonZeroU32::new(DEFAULT_AGE_BUCKETS))
                .ok_or_else(|| bucket_err("age bucket count must be positive"))?;
            MetricKind::Summary {
                quantiles,
                max_age,
                age_buckets,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn group(toml: &str) -> LogGroupConfig {
        Config::from_toml_str(toml).unwrap().log_groups.remove(0)
    }

    fn router() -> RegistryRouter {
        RegistryRouter::initialize("/metrics", &[]).unwrap()
    }

    #[test]
    fn test_metric_labels_override_group_labels() {
        let set = ResolvedLabelSet::resolve(
            "app:m",
            &labels(&[("host", "{{.host}}"), ("env", "prod")]),
            &labels(&[("host", "fixed"), ("method", "{{.method}}")]),
        )
        .unwrap();
        assert_eq!(set.names(), ["env", "host", "method"]);
        let record = json!({"host": "h1", "method": "GET"});
        let values: Vec<String> = set
            .evaluate(&record)
            .iter()
            .map(|l| l.value().to_string())
            .collect();
        assert_eq!(values, vec!["prod", "fixed", "GET"]);
    }

    #[test]
    fn test_label_names_are_unique() {
        let set = ResolvedLabelSet::resolve(
            "app:m",
            &labels(&[("a", "1"), ("b", "2"), ("c", "3")]),
            &labels(&[("b", "x"), ("c", "y"), ("d", "z")]),
        )
        .unwrap();
        let mut names = set.names().to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), set.names().len());
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_invalid_label_template_is_fatal() {
        let err = ResolvedLabelSet::resolve("app:m", &labels(&[("a", "{{.x")]), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ExporterError::Template { ref name, .. } if name == "app:m:+label_a"));
    }

    #[test]
    fn test_build_groups_by_kind() {
        let g = group(
            r#"
            [[log_groups]]
            name = "app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "requests"
            type = "counter"
            [[log_groups.metrics]]
            name = "queue"
            type = "gauge"
            value = "{{.queue}}"
            [[log_groups.metrics]]
            name = "latency"
            type = "histogram"
            value = "{{.latency}}"
            [[log_groups.metrics]]
            name = "size"
            type = "summary"
            value = "{{.size}}"
            "#,
        );
        let mut router = router();
        let compiled = build(&g, &mut router).unwrap();
        assert_eq!(compiled.counters.len(), 1);
        assert_eq!(compiled.gauges.len(), 1);
        assert_eq!(compiled.histograms.len(), 1);
        assert_eq!(compiled.summaries.len(), 1);
        assert!(compiled.counters[0].value.is_none());
        assert_eq!(compiled.counters[0].full_name, "jsonlog_app_requests");
        assert_eq!(router.default_registry().len(), 4);

        assert_eq!(
            compiled.histograms[0].kind(),
            &MetricKind::Histogram {
                buckets: DEFAULT_BUCKETS.to_vec()
            }
        );
        assert_eq!(
            compiled.summaries[0].kind(),
            &MetricKind::Summary {
                quantiles: DEFAULT_QUANTILES.to_vec(),
                max_age: DEFAULT_MAX_AGE,
                age_buckets: NonZeroU32::new(DEFAULT_AGE_BUCKETS).unwrap(),
            }
        );
    }

    #[test]
    fn test_value_template_required_for_non_counters() {
        for kind in ["gauge", "histogram", "summary"] {
            let g = group(&format!(
                r#"
                [[log_groups]]
                name = "app"
                files = ["a.json"]
                [[log_groups.metrics]]
                name = "m"
                type = "{}"
                "#,
                kind
            ));
            let err = build(&g, &mut router()).unwrap_err();
            match err {
                ExporterError::MissingValueTemplate { metric } => assert!(metric.contains("app.m")),
                other => panic!("unexpected error for {kind}: {other}"),
            }
        }
    }

    #[test]
    fn test_duplicate_metric_in_same_registry() {
        let g = group(
            r#"
            [[log_groups]]
            name = "app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "requests"
            type = "counter"
            [[log_groups.metrics]]
            name = "requests"
            type = "counter"
            "#,
        );
        assert!(matches!(
            build(&g, &mut router()),
            Err(ExporterError::DuplicateMetric { .. })
        ));
    }

    #[test]
    fn test_unknown_export_group() {
        let g = group(
            r#"
            [[log_groups]]
            name = "app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "requests"
            type = "counter"
            export_to = "nowhere"
            "#,
        );
        assert!(matches!(
            build(&g, &mut router()),
            Err(ExporterError::UnknownExport { .. })
        ));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let reserved = group(
            r#"
            [[log_groups]]
            name = "app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "latency"
            type = "histogram"
            value = "{{.latency}}"
            [log_groups.metrics.labels]
            le = "{{.le}}"
            "#,
        );
        assert!(matches!(
            build(&reserved, &mut router()),
            Err(ExporterError::InvalidName { .. })
        ));

        let bad_name = group(
            r#"
            [[log_groups]]
            name = "my-app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "requests"
            type = "counter"
            "#,
        );
        assert!(matches!(
            build(&bad_name, &mut router()),
            Err(ExporterError::InvalidName { kind: "metric", .. })
        ));
    }

    #[test]
    fn test_unsorted_buckets_rejected() {
        let g = group(
            r#"
            [[log_groups]]
            name = "app"
            files = ["a.json"]
            [[log_groups.metrics]]
            name = "latency"
            type = "histogram"
            value = "{{.latency}}"
            buckets = [1.0, 0.5]
            "#,
        );
        assert!(matches!(
            build(&g, &mut router()),
            Err(ExporterError::Bucket { .. })
        ));
    }
}
