//! Metric registries and the router that addresses them
//!
//! Each export group gets an isolated [`MetricRegistry`] served at its own
//! HTTP path; metrics without an export group go into the default registry.
//! Registries are populated during startup and never restructured afterwards.

use crate::config::ExportConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::MetricInstance;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the registry that receives metrics without an export group.
pub const DEFAULT_REGISTRY: &str = "default";

#[derive(Debug)]
pub struct MetricRegistry {
    name: String,
    path: String,
    metrics: BTreeMap<String, Arc<MetricInstance>>,
}

impl MetricRegistry {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    /// Register a metric. Names are unique per registry.
    pub fn register(&mut self, instance: Arc<MetricInstance>) -> Result<()> {
        let name = instance.name().to_string();
        if self.contains(&name) {
            return Err(ExporterError::DuplicateMetric {
                registry: self.name.clone(),
                metric: name,
            });
        }
        debug!(registry = %self.name, metric = %name, "Registered metric");
        self.metrics.insert(name, instance);
        Ok(())
    }

    /// Drain pending observations of every registered metric.
    pub fn run_upkeep(&self) {
        for instance in self.metrics.values() {
            instance.run_upkeep();
        }
    }

    /// Exposition text of every registered metric, ordered by name.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for instance in self.metrics.values() {
            let text = instance.render();
            if text.is_empty() {
                continue;
            }
            out.push_str(&text);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// Maps export group names to registries.
#[derive(Debug)]
pub struct RegistryRouter {
    default: MetricRegistry,
    exports: BTreeMap<String, MetricRegistry>,
}

impl RegistryRouter {
    pub fn initialize(default_path: &str, exports: &[ExportConfig]) -> Result<Self> {
        let mut router = Self {
            default: MetricRegistry::new(DEFAULT_REGISTRY, default_path),
            exports: BTreeMap::new(),
        };
        for export in exports {
            if router.exports.contains_key(&export.name) {
                return Err(ExporterError::Config(format!(
                    "duplicate export '{}'",
                    export.name
                )));
            }
            info!(export = %export.name, path = %export.path, "Initialized export group");
            router.exports.insert(
                export.name.clone(),
                MetricRegistry::new(export.name.clone(), export.path.clone()),
            );
        }
        Ok(router)
    }

    pub fn default_registry(&self) -> &MetricRegistry {
        &self.default
    }

    pub fn lookup(&self, export: &str) -> Option<&MetricRegistry> {
        self.exports.get(export)
    }

    /// Registry a metric belongs to: its export group, or the default one.
    pub fn registry_for(
        &mut self,
        metric: &str,
        export: Option<&str>,
    ) -> Result<&mut MetricRegistry> {
        match export {
            None => Ok(&mut self.default),
            Some(name) => self
                .exports
                .get_mut(name)
                .ok_or_else(|| ExporterError::UnknownExport {
                    metric: metric.to_string(),
                    export: name.to_string(),
                }),
        }
    }

    /// Default registry first, then export groups by name.
    pub fn registries(&self) -> impl Iterator<Item = &MetricRegistry> {
        std::iter::once(&self.default).chain(self.exports.values())
    }

    pub fn by_path(&self, path: &str) -> Option<&MetricRegistry> {
        self.registries().find(|r| r.path() == path)
    }

    pub fn run_upkeep(&self) {
        for registry in self.registries() {
            registry.run_upkeep();
        }
    }
}
