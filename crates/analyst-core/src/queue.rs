use analyst_kernel::Ledger;
use analyst_protocol::{JobStatus, ResultEnvelope, UnitRequest};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::fanout::resolve_graph_id;
use crate::registry::{CallbackId, CallbackOutcome, CallbackRegistry, StatusCallback};
use crate::scenario::ScenarioCatalog;

/// Queue client: bulk and priority submission, cancellation, and delivery
/// of broker status snapshots to registered callbacks. Built once per
/// process and shared by reference.
pub struct QueueManager {
    broker: Arc<dyn Broker>,
    registry: Arc<CallbackRegistry>,
    ledger: Ledger,
    catalog: Arc<dyn ScenarioCatalog>,
}

impl QueueManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<CallbackRegistry>,
        ledger: Ledger,
        catalog: Arc<dyn ScenarioCatalog>,
    ) -> Self {
        Self {
            broker,
            registry,
            ledger,
            catalog,
        }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Submit a batch. Failures are returned to the caller; nothing is retried.
    pub async fn enqueue(&self, requests: &[UnitRequest]) -> Result<(), BrokerError> {
        self.broker.enqueue(requests).await?;
        info!(count = requests.len(), "enqueued requests");
        Ok(())
    }

    /// Run one request on the priority path and wait for its envelope.
    pub async fn single_point(&self, request: &UnitRequest) -> Result<ResultEnvelope, BrokerError> {
        debug!(graph_id = %request.graph_id, "priority request");
        self.broker.enqueue_priority(request).await
    }

    pub fn add_callback(&self, job_id: &str, callback: StatusCallback) -> CallbackId {
        self.registry.add(job_id, callback)
    }

    /// Stop delivering status for `job_id`, then ask the broker to drop its
    /// outstanding work. The broker call is best effort.
    pub async fn cancel_job(&self, job_id: &str) {
        let removed = self.registry.remove_all(job_id);
        debug!(job_id, removed, "removed callbacks");

        let record = match self.ledger.get_async(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(job_id, "cancel: job not found; broker not notified");
                return;
            }
            Err(err) => {
                warn!(job_id, %err, "cancel: ledger lookup failed; broker not notified");
                return;
            }
        };
        let Some(graph_id) = resolve_graph_id(&record, self.catalog.as_ref()) else {
            warn!(job_id, "cancel: graph unresolved; broker not notified");
            return;
        };
        match self
            .broker
            .cancel(&record.project_id, &graph_id, job_id)
            .await
        {
            Ok(()) => info!(job_id, "cancelled job"),
            Err(err) => warn!(job_id, %err, "cancel request failed"),
        }
    }

    /// One poll cycle: fetch statuses for every job with a callback and
    /// dispatch them. Returns the spawned callback tasks.
    pub async fn poll_once(&self) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let job_ids = self.registry.job_ids();
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = self.broker.statuses(&job_ids).await?;
        Ok(self.dispatch(statuses))
    }

    /// Run each matching callback on its own task. A callback still running
    /// from an earlier delivery is skipped; one that answers
    /// [`CallbackOutcome::Unregister`] is removed before it is released.
    pub fn dispatch(&self, statuses: Vec<JobStatus>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for status in statuses {
            for reg in self.registry.callbacks_for(&status.job_id) {
                if !reg.try_begin() {
                    debug!(job_id = %status.job_id, "callback busy; skipping delivery");
                    continue;
                }
                let registry = self.registry.clone();
                let status = status.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = reg.invoke(status).await;
                    if outcome == CallbackOutcome::Unregister {
                        registry.remove(&reg.job_id, reg.id);
                    }
                    reg.finish();
                }));
            }
        }
        handles
    }
}
