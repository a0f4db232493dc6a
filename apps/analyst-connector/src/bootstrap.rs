use analyst_core::job::JobContext;
use analyst_core::{
    CallbackRegistry, ClusterSettings, Config, FsBlobStore, GeoJsonPointSets, HttpBroker,
    Orchestrator, QueueManager, StaticCatalog,
};
use analyst_kernel::{JobConfig, JobRecord, Ledger};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything a process needs to control jobs.
pub struct Runtime {
    pub orchestrator: Orchestrator,
    pub queue: Arc<QueueManager>,
    pub poll_interval: Duration,
}

/// Validate the cluster settings and wire the engine. Configuration errors
/// are fatal here, before any job is touched.
pub fn build(cfg: &Config) -> Result<Runtime> {
    let settings = ClusterSettings::resolve(&cfg.cluster)?;
    let state_dir = cfg.runtime.state_dir();
    let ledger = Ledger::open(&state_dir)
        .with_context(|| format!("open ledger in {}", state_dir.display()))?;

    let catalog = match cfg.data.catalog.as_deref() {
        Some(path) => StaticCatalog::load(Path::new(path))
            .with_context(|| format!("load scenario catalog {path}"))?,
        None => StaticCatalog::new(),
    };
    let catalog = Arc::new(catalog);
    let point_sets_dir = cfg
        .data
        .point_sets_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("pointsets"));

    let broker = HttpBroker::new(
        settings.broker.clone(),
        settings.request_timeout,
        settings.priority_timeout,
    )?;
    let queue = Arc::new(QueueManager::new(
        Arc::new(broker),
        Arc::new(CallbackRegistry::new()),
        ledger.clone(),
        catalog.clone(),
    ));
    let ctx = Arc::new(JobContext {
        ledger,
        queue: queue.clone(),
        blobs: Arc::new(FsBlobStore::new(
            settings.results_bucket.clone(),
            settings.list_page_size,
        )),
        point_sets: Arc::new(GeoJsonPointSets::new(point_sets_dir)),
        catalog,
        results_dir: cfg.runtime.results_dir(),
        fetch_concurrency: settings.fetch_concurrency,
    });
    tracing::info!(broker = %settings.broker, "orchestrator ready");
    Ok(Runtime {
        orchestrator: Orchestrator::new(ctx),
        queue,
        poll_interval: settings.poll_interval,
    })
}

/// Job description accepted by `submit`.
#[derive(Debug, Deserialize)]
pub struct JobFile {
    pub project_id: String,
    pub point_set_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub config: JobConfig,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read job file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse job file {}", path.display()))
    }

    pub fn into_record(self) -> JobRecord {
        let record = JobRecord::new(self.project_id, self.point_set_id, self.config);
        match self.name {
            Some(name) => record.with_name(name),
            None => record,
        }
    }
}
