//! Startup assembly: configuration in, running ingestion tasks and routable
//! registries out.

use crate::config::Config;
use crate::error::Result;
use crate::ingest::LogGroupIngestor;
use crate::metrics::{self, IngestMetrics, RegistryRouter};
use crate::tail::TailConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// How often pending histogram and summary observations are folded in
/// between scrapes.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct Engine {
    router: Arc<RegistryRouter>,
    ingestors: Vec<Arc<LogGroupIngestor>>,
}

impl Engine {
    /// Validate the configuration, compile every log group and register its
    /// metrics. No file is touched yet.
    pub fn build(config: &Config, default_path: &str) -> Result<Self> {
        config.validate(default_path)?;

        let mut router = RegistryRouter::initialize(default_path, &config.exports)?;
        let stats = IngestMetrics::register(&mut router)?;

        let mut ingestors = Vec::with_capacity(config.log_groups.len());
        for group in &config.log_groups {
            info!(log_group = %group.name, "Initializing log group");
            let compiled = metrics::build(group, &mut router)?;
            ingestors.push(Arc::new(LogGroupIngestor::new(
                Arc::new(compiled),
                stats.clone(),
            )));
        }

        Ok(Self {
            router: Arc::new(router),
            ingestors,
        })
    }

    pub fn router(&self) -> Arc<RegistryRouter> {
        self.router.clone()
    }

    pub fn ingestors(&self) -> &[Arc<LogGroupIngestor>] {
        &self.ingestors
    }

    /// Open every source file and start ingesting. Any file that cannot be
    /// opened fails the whole start.
    ///
    /// Returns one task per source file followed by the metric upkeep task.
    pub async fn start(&self, tail: &TailConfig) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::new();
        for ingestor in &self.ingestors {
            tasks.extend(ingestor.clone().spawn(tail).await?);
        }
        info!(tasks = tasks.len(), "Started ingestion tasks");

        tasks.push(self.spawn_upkeep(UPKEEP_INTERVAL));
        Ok(tasks)
    }

    fn spawn_upkeep(&self, every: Duration) -> JoinHandle<()> {
        let router = self.router.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                router.run_upkeep();
            }
        })
    }
}
