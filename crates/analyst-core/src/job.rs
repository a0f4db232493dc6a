//! The job controller: fan-out, status tracking and completion of one job.

use analyst_kernel::{JobRecord, Ledger, ResultStore};
use analyst_protocol::JobStatus;
use anyhow::anyhow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate_into;
use crate::blob::BlobStore;
use crate::error::JobError;
use crate::fanout;
use crate::points::PointSetSource;
use crate::queue::QueueManager;
use crate::registry::{callback, CallbackId, CallbackOutcome};
use crate::scenario::ScenarioCatalog;

/// Collaborators shared by every job of a process.
pub struct JobContext {
    pub ledger: Ledger,
    pub queue: Arc<QueueManager>,
    pub blobs: Arc<dyn BlobStore>,
    pub point_sets: Arc<dyn PointSetSource>,
    pub catalog: Arc<dyn ScenarioCatalog>,
    pub results_dir: PathBuf,
    pub fetch_concurrency: usize,
}

struct JobState {
    record: JobRecord,
    /// Opened on the first aggregation attempt, closed on success.
    results: Option<Arc<ResultStore>>,
}

/// One analysis job. All mutation goes through the state lock, so status
/// updates for the same job never overlap.
pub struct Job {
    id: String,
    ctx: Arc<JobContext>,
    state: Mutex<JobState>,
}

impl Job {
    /// Persist a new record (assigning its id) and wrap it.
    pub async fn create(ctx: Arc<JobContext>, record: JobRecord) -> Result<Arc<Self>, JobError> {
        let record = ctx
            .ledger
            .save_async(record)
            .await
            .map_err(JobError::Ledger)?;
        Ok(Self::from_record(ctx, record))
    }

    /// Wrap a record already in the ledger.
    pub fn from_record(ctx: Arc<JobContext>, record: JobRecord) -> Arc<Self> {
        Arc::new(Self {
            id: record.id.clone(),
            ctx,
            state: Mutex::new(JobState {
                record,
                results: None,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn snapshot(&self) -> JobRecord {
        self.state.lock().await.record.clone()
    }

    /// Fan the job out over its point set and submit the batch. The status
    /// callback is registered only after the broker accepted the batch, so
    /// an unknown job id is never pruned early.
    pub async fn run(self: &Arc<Self>) -> Result<(), JobError> {
        let started = Instant::now();
        let total = {
            let mut state = self.state.lock().await;
            let point_set_id = state.record.point_set_id.clone();
            let points = self
                .ctx
                .point_sets
                .load(&point_set_id)
                .await
                .map_err(JobError::PointSetLoad)?
                .ok_or(JobError::UnknownPointSet(point_set_id))?;
            let plan = fanout::plan(&state.record, &points, self.ctx.catalog.as_ref())?;
            let total = u32::try_from(plan.requests.len())
                .map_err(|_| JobError::PointSetLoad(anyhow!("point set too large")))?;

            state.record.total_points = Some(total);
            state.record.complete_points = Some(0);
            state.record.graph_id = Some(plan.graph_id);
            state.record = self
                .ctx
                .ledger
                .save_async(state.record.clone())
                .await
                .map_err(JobError::Ledger)?;

            // TODO: a failed batch leaves the job persisted with nonzero totals
            // and no work queued; decide whether submit should roll it back.
            self.ctx.queue.enqueue(&plan.requests).await?;
            total
        };
        self.register();
        info!(
            job_id = %self.id,
            count = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "submitted job"
        );
        Ok(())
    }

    /// Route status deliveries for this job to [`Job::update_status`].
    pub fn register(self: &Arc<Self>) -> CallbackId {
        let job = Arc::clone(self);
        self.ctx.queue.add_callback(
            &self.id,
            callback(move |status| {
                let job = Arc::clone(&job);
                async move { job.update_status(status).await }
            }),
        )
    }

    /// Apply one broker snapshot. Once every unit has finished, ingest all
    /// results and mark the job complete. Any failure keeps the callback
    /// registered and the whole aggregation is retried on the next delivery.
    pub async fn update_status(&self, status: JobStatus) -> CallbackOutcome {
        let mut state = self.state.lock().await;
        if state.record.complete {
            return CallbackOutcome::Unregister;
        }

        let done = match state.record.total_points {
            Some(total) => status.complete.min(total),
            None => status.complete,
        };
        if state.record.complete_points != Some(done) {
            state.record.complete_points = Some(done);
            match self.ctx.ledger.update_async(state.record.clone()).await {
                Ok(Some(saved)) => state.record = saved,
                Ok(None) => {
                    info!(job_id = %self.id, "job deleted; dropping status updates");
                    if state.results.take().is_some() {
                        self.remove_results().await;
                    }
                    return CallbackOutcome::Unregister;
                }
                Err(err) => warn!(job_id = %self.id, %err, "failed to persist progress"),
            }
        }
        debug!(
            job_id = %self.id,
            complete = done,
            total = ?state.record.total_points,
            "status update"
        );
        if !state.record.points_done() {
            return CallbackOutcome::Keep;
        }

        // another process may have deleted the job since the last attempt
        match self.ctx.ledger.get_async(&self.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(job_id = %self.id, "job deleted; discarding results");
                state.results = None;
                self.remove_results().await;
                return CallbackOutcome::Unregister;
            }
            Err(err) => {
                warn!(job_id = %self.id, %err, "ledger lookup failed, retrying result retrieval");
                return CallbackOutcome::Keep;
            }
        }

        let store = match &state.results {
            Some(store) => store.clone(),
            None => match self.open_results().await {
                Ok(store) => {
                    state.results = Some(store.clone());
                    store
                }
                Err(err) => {
                    error!(job_id = %self.id, %err, "error opening result store, retrying result retrieval");
                    return CallbackOutcome::Keep;
                }
            },
        };

        if let Err(err) = aggregate_into(
            self.ctx.blobs.as_ref(),
            store,
            &self.id,
            self.ctx.fetch_concurrency,
        )
        .await
        {
            error!(job_id = %self.id, %err, "error aggregating results, retrying result retrieval");
            return CallbackOutcome::Keep;
        }

        if let Some(store) = state.results.take() {
            self.close_results(store).await;
        }

        state.record.complete = true;
        match self.ctx.ledger.update_async(state.record.clone()).await {
            Ok(Some(saved)) => state.record = saved,
            Ok(None) => {
                info!(job_id = %self.id, "job deleted during aggregation; discarding results");
                self.remove_results().await;
                return CallbackOutcome::Unregister;
            }
            Err(err) => {
                state.record.complete = false;
                error!(job_id = %self.id, %err, "failed to persist completion, retrying result retrieval");
                return CallbackOutcome::Keep;
            }
        }
        info!(job_id = %self.id, "job complete");
        CallbackOutcome::Unregister
    }

    async fn open_results(&self) -> Result<Arc<ResultStore>, JobError> {
        let dir = self.ctx.results_dir.clone();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || ResultStore::open(&dir, &id))
            .await
            .map_err(|e| JobError::Results(anyhow!("join error: {}", e)))?
            .map(Arc::new)
            .map_err(JobError::Results)
    }

    async fn remove_results(&self) {
        let dir = self.ctx.results_dir.clone();
        let id = self.id.clone();
        match tokio::task::spawn_blocking(move || ResultStore::remove(&dir, &id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(job_id = %self.id, %err, "failed to remove result store"),
            Err(err) => warn!(job_id = %self.id, %err, "result store removal task failed"),
        }
    }

    async fn close_results(&self, store: Arc<ResultStore>) {
        let Ok(store) = Arc::try_unwrap(store) else {
            warn!(job_id = %self.id, "result store still shared; leaving it open");
            return;
        };
        match tokio::task::spawn_blocking(move || store.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(job_id = %self.id, %err, "failed to close result store"),
            Err(err) => warn!(job_id = %self.id, %err, "result store close task failed"),
        }
    }
}
