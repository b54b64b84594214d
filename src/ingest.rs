//! Log group ingestion
//!
//! One task per source file reads lines in order, parses each as JSON and
//! feeds every metric of the log group. A bad line or a bad value only ever
//! affects that line (or that metric for that line); the loop keeps going.

use crate::error::Result;
use crate::metrics::{CompiledLogGroup, IngestMetrics, MetricDescriptor};
use crate::tail::{LineFollower, TailConfig};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A sequential stream of text lines.
#[async_trait]
pub trait LineSource: Send {
    /// Next line, waiting for one if needed. `None` ends the stream.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

#[async_trait]
impl LineSource for LineFollower {
    async fn next_line(&mut self) -> Result<Option<String>> {
        LineFollower::next_line(self).await.map(Some)
    }
}

/// What happened to one line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    /// Line was not valid JSON and was dropped.
    pub discarded: bool,
    /// Metric updates applied.
    pub updated: usize,
    /// Metric updates skipped because of an invalid value.
    pub skipped: usize,
}

pub struct LogGroupIngestor {
    group: Arc<CompiledLogGroup>,
    stats: IngestMetrics,
}

impl LogGroupIngestor {
    pub fn new(group: Arc<CompiledLogGroup>, stats: IngestMetrics) -> Self {
        Self { group, stats }
    }

    pub fn group(&self) -> &CompiledLogGroup {
        &self.group
    }

    /// Open every source file of the group, then start one task per file.
    ///
    /// Fails if any file cannot be opened; no task is started in that case.
    pub async fn spawn(self: Arc<Self>, tail: &TailConfig) -> Result<Vec<JoinHandle<()>>> {
        let mut followers = Vec::with_capacity(self.group.files.len());
        for file in &self.group.files {
            followers.push(LineFollower::open(file, tail.clone()).await?);
        }

        Ok(followers
            .into_iter()
            .map(|follower| {
                let ingestor = self.clone();
                let source = follower.path().display().to_string();
                tokio::spawn(async move { ingestor.run(&source, follower).await })
            })
            .collect())
    }

    /// Consume `lines` until the stream ends or fails.
    pub async fn run<S: LineSource>(&self, source: &str, mut lines: S) {
        info!(log_group = %self.group.name, source, "Ingesting source");
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    self.process_line(source, &line);
                }
                Ok(None) => {
                    info!(log_group = %self.group.name, source, "Source ended");
                    break;
                }
                Err(e) => {
                    error!(log_group = %self.group.name, source, error = %e, "Source failed, ingestion stopped for it");
                    break;
                }
            }
        }
    }

    /// Apply one line to every metric of the group.
    ///
    /// Every line counts as read. A line that is not a JSON document, blank
    /// lines included, is logged, counted as a parse error and discarded.
    pub fn process_line(&self, source: &str, line: &str) -> LineOutcome {
        let mut outcome = LineOutcome::default();
        self.stats.record_line(&self.group.name, source);

        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(log_group = %self.group.name, source, line, error = %e, "Error parsing line, ignoring it");
                self.stats.record_parse_error(&self.group.name, source);
                outcome.discarded = true;
                return outcome;
            }
        };

        for metric in &self.group.counters {
            let amount = match &metric.value {
                None => Some(1.0),
                Some(_) => self
                    .value_of(source, metric, &record)
                    .and_then(|v| self.counter_amount(source, metric, v)),
            };
            match amount {
                Some(amount) => {
                    metric.instance.increment(metric.labels.evaluate(&record), amount);
                    outcome.updated += 1;
                }
                None => outcome.skipped += 1,
            }
        }

        for metric in &self.group.gauges {
            match self.value_of(source, metric, &record) {
                Some(value) => {
                    metric.instance.set(metric.labels.evaluate(&record), value);
                    outcome.updated += 1;
                }
                None => outcome.skipped += 1,
            }
        }

        for metric in self.group.histograms.iter().chain(&self.group.summaries) {
            match self.value_of(source, metric, &record) {
                Some(value) => {
                    metric.instance.observe(metric.labels.evaluate(&record), value);
                    outcome.updated += 1;
                }
                None => outcome.skipped += 1,
            }
        }

        outcome
    }

    /// Evaluate the metric's value template and parse it as a number.
    fn value_of(&self, source: &str, metric: &MetricDescriptor, record: &Value) -> Option<f64> {
        let raw = metric.value.as_ref()?.evaluate(record);
        match parse_value(&raw) {
            Some(value) => Some(value),
            None => {
                warn!(
                    log_group = %self.group.name,
                    source,
                    metric = %metric.full_name,
                    value = %raw,
                    "Value for {} is invalid, ignoring line for this metric",
                    metric.kind().as_str()
                );
                self.stats
                    .record_value_error(&self.group.name, source, &metric.full_name);
                None
            }
        }
    }

    fn counter_amount(&self, source: &str, metric: &MetricDescriptor, value: f64) -> Option<f64> {
        match counter_amount(value) {
            Some(amount) => Some(amount),
            None => {
                warn!(
                    log_group = %self.group.name,
                    source,
                    metric = %metric.full_name,
                    value,
                    "Counter increment must not be negative, ignoring line for this metric"
                );
                self.stats
                    .record_value_error(&self.group.name, source, &metric.full_name);
                None
            }
        }
    }
}

/// Parse a templated value. Surrounding whitespace is ignored; NaN and
/// infinities are refused.
pub fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Increment for a counter; negative and non-finite values are refused.
pub fn counter_amount(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}
