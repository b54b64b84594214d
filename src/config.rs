use crate::error::{ExporterError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Labels applied to every log group that does not define them itself.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub log_groups: Vec<LogGroupConfig>,
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogGroupConfig {
    pub name: String,
    pub files: Vec<String>,
    /// Label name -> value template shared by every metric of the group.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub help: String,
    /// Template producing the numeric value of each record.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub export_to: Option<String>,
    #[serde(default)]
    pub buckets: Vec<f64>,
    /// Summary quantiles.
    #[serde(default)]
    pub objectives: Vec<f64>,
    #[serde(default)]
    pub max_age_secs: u64,
    #[serde(default)]
    pub age_buckets: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl MetricConfig {
    /// Value template, treating an empty string the same as an absent one.
    pub fn value_template(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ExporterError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.merge_global_labels();
        Ok(config)
    }

    fn merge_global_labels(&mut self) {
        for group in &mut self.log_groups {
            for (name, value) in &self.labels {
                group
                    .labels
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    /// Structural checks that do not depend on metric kinds.
    pub fn validate(&self, default_path: &str) -> Result<()> {
        let mut group_names = HashSet::new();
        for group in &self.log_groups {
            if group.name.is_empty() {
                return Err(ExporterError::Config("log group with empty name".into()));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ExporterError::Config(format!(
                    "duplicate log group '{}'",
                    group.name
                )));
            }
            if group.files.is_empty() {
                return Err(ExporterError::Config(format!(
                    "log group '{}' has no files",
                    group.name
                )));
            }
        }

        let mut export_names = HashSet::new();
        let mut export_paths = HashSet::from([default_path]);
        for export in &self.exports {
            if !export_names.insert(export.name.as_str()) {
                return Err(ExporterError::Config(format!(
                    "duplicate export '{}'",
                    export.name
                )));
            }
            if !export.path.starts_with('/') {
                return Err(ExporterError::Config(format!(
                    "export '{}' path '{}' must start with '/'",
                    export.name, export.path
                )));
            }
            if !export_paths.insert(export.path.as_str()) {
                return Err(ExporterError::Config(format!(
                    "export '{}' reuses path '{}'",
                    export.name, export.path
                )));
            }
        }
        Ok(())
    }
}
