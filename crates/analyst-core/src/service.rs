use analyst_kernel::{JobRecord, ResultStore};
use analyst_protocol::{ResultEnvelope, SearchConfig, UnitRequest};
use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::JobError;
use crate::job::{Job, JobContext};

/// Progress view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub job_id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub total_points: Option<u32>,
    pub complete_points: Option<u32>,
    /// 0-100.
    pub percent: u8,
    pub complete: bool,
}

impl From<&JobRecord> for JobProgress {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            project_id: record.project_id.clone(),
            name: record.name.clone(),
            total_points: record.total_points,
            complete_points: record.complete_points,
            percent: record.percent(),
            complete: record.complete,
        }
    }
}

/// Job-control interface: submit, cancel, inspect, recover.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<JobContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Persist and fan out a new job. Returns the saved record.
    pub async fn submit(&self, record: JobRecord) -> Result<JobRecord, JobError> {
        let job = Job::create(self.ctx.clone(), record).await?;
        job.run().await?;
        Ok(job.snapshot().await)
    }

    pub async fn cancel(&self, job_id: &str) {
        self.ctx.queue.cancel_job(job_id).await;
    }

    pub async fn job(&self, job_id: &str) -> Result<JobRecord, JobError> {
        self.ctx
            .ledger
            .get_async(job_id)
            .await
            .map_err(JobError::Ledger)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub async fn progress(&self, job_id: &str) -> Result<JobProgress, JobError> {
        let record = self.job(job_id).await?;
        Ok(JobProgress::from(&record))
    }

    pub async fn jobs_for_project(&self, project_id: &str) -> Result<Vec<JobProgress>, JobError> {
        let records = self
            .ctx
            .ledger
            .list_by_project_async(project_id)
            .await
            .map_err(JobError::Ledger)?;
        Ok(records.iter().map(JobProgress::from).collect())
    }

    pub async fn all_jobs(&self) -> Result<Vec<JobProgress>, JobError> {
        let records = self
            .ctx
            .ledger
            .list_all_async()
            .await
            .map_err(JobError::Ledger)?;
        Ok(records.iter().map(JobProgress::from).collect())
    }

    /// Compute one origin synchronously on the priority path.
    pub async fn single_point(
        &self,
        graph_id: &str,
        search: SearchConfig,
    ) -> Result<ResultEnvelope, JobError> {
        let request = UnitRequest::single_point(graph_id, search);
        Ok(self.ctx.queue.single_point(&request).await?)
    }

    /// Re-register every incomplete job in the ledger. Returns how many.
    pub async fn recover(&self) -> Result<usize, JobError> {
        let pending = self
            .ctx
            .ledger
            .list_incomplete_async()
            .await
            .map_err(JobError::Ledger)?;
        let count = pending.len();
        for record in pending {
            let job = Job::from_record(self.ctx.clone(), record);
            job.register();
        }
        info!(count, "recovered incomplete jobs");
        Ok(count)
    }

    /// Cancel the job, then drop its ledger entry and result store.
    pub async fn delete(&self, job_id: &str) -> Result<bool, JobError> {
        self.cancel(job_id).await;
        let removed = self
            .ctx
            .ledger
            .delete_async(job_id)
            .await
            .map_err(JobError::Ledger)?;
        let dir = self.ctx.results_dir.clone();
        let id = job_id.to_string();
        match tokio::task::spawn_blocking(move || ResultStore::remove(&dir, &id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(job_id, %err, "failed to remove result store"),
            Err(err) => warn!(job_id, %err, "result store removal task failed"),
        }
        Ok(removed)
    }

    /// Envelopes ingested for `job_id`, ordered by unit id.
    pub async fn results(&self, job_id: &str) -> Result<Vec<ResultEnvelope>, JobError> {
        let path = ResultStore::path_for(&self.ctx.results_dir, job_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let dir = self.ctx.results_dir.clone();
        let id = job_id.to_string();
        tokio::task::spawn_blocking(move || ResultStore::open(&dir, &id)?.envelopes())
            .await
            .map_err(|e| JobError::Results(anyhow!("join error: {}", e)))?
            .map_err(JobError::Results)
    }
}
