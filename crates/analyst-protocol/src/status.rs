use serde::{Deserialize, Serialize};

/// Progress snapshot reported by the broker for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    /// Unit requests submitted.
    pub total: u32,
    /// Unit requests finished.
    pub complete: u32,
    /// Broker-internal batch identifier; may change between snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_cluster_job_id: Option<String>,
}

impl JobStatus {
    pub fn new(job_id: impl Into<String>, total: u32, complete: u32) -> Self {
        Self {
            job_id: job_id.into(),
            total,
            complete,
            current_cluster_job_id: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.complete >= self.total
    }
}
