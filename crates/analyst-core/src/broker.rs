use analyst_protocol::{JobStatus, ResultEnvelope, UnitRequest};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::BrokerError;

/// Client side of the compute broker protocol.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit a batch of unit requests to the bulk queue.
    async fn enqueue(&self, requests: &[UnitRequest]) -> Result<(), BrokerError>;
    /// Submit one request on the priority path and wait for its envelope.
    async fn enqueue_priority(&self, request: &UnitRequest) -> Result<ResultEnvelope, BrokerError>;
    /// Progress of every listed job the broker still knows about.
    async fn statuses(&self, job_ids: &[String]) -> Result<Vec<JobStatus>, BrokerError>;
    async fn cancel(&self, project_id: &str, graph_id: &str, job_id: &str)
        -> Result<(), BrokerError>;
}

/// Broker reached over HTTP. Two clients: a short-timeout one for
/// enqueue/status/cancel and a long-timeout one for priority requests.
pub struct HttpBroker {
    base: Url,
    client: reqwest::Client,
    priority_client: reqwest::Client,
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs.max(1))
}

/// Shared connection settings; only the request timeout differs between
/// the bulk and priority clients.
fn http_client(timeout: Duration) -> Result<reqwest::Client, BrokerError> {
    reqwest::Client::builder()
        .user_agent(concat!("analyst-core/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(env_secs("ANALYST_HTTP_CONNECT_TIMEOUT_SECS", 3))
        .tcp_keepalive(env_secs("ANALYST_HTTP_TCP_KEEPALIVE_SECS", 60))
        .pool_idle_timeout(env_secs("ANALYST_HTTP_POOL_IDLE_SECS", 90))
        .timeout(timeout)
        .build()
        .map_err(|e| BrokerError::Unavailable(format!("http client: {e}")))
}

fn accepted(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::ACCEPTED
}

impl HttpBroker {
    pub fn new(
        base: Url,
        request_timeout: Duration,
        priority_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        if base.cannot_be_a_base() {
            return Err(BrokerError::InvalidUrl(base.to_string()));
        }
        Ok(Self {
            base,
            client: http_client(request_timeout)?,
            priority_client: http_client(priority_timeout)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BrokerError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BrokerError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn check(&self, what: &str, status: StatusCode) -> Result<(), BrokerError> {
        if accepted(status) {
            Ok(())
        } else {
            warn!(status = status.as_u16(), "broker {} returned unexpected status", what);
            Err(BrokerError::Unavailable(format!(
                "{what} returned {}",
                status.as_u16()
            )))
        }
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn enqueue(&self, requests: &[UnitRequest]) -> Result<(), BrokerError> {
        let url = self.endpoint(&["enqueue", "jobs"])?;
        let resp = self.client.post(url).json(requests).send().await?;
        self.check("enqueue", resp.status())
    }

    async fn enqueue_priority(&self, request: &UnitRequest) -> Result<ResultEnvelope, BrokerError> {
        let url = self.endpoint(&["enqueue", "priority"])?;
        let resp = self.priority_client.post(url).json(request).send().await?;
        self.check("priority enqueue", resp.status())?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn statuses(&self, job_ids: &[String]) -> Result<Vec<JobStatus>, BrokerError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = job_ids.join(",");
        let url = self.endpoint(&["status", &joined])?;
        let resp = self.client.get(url).send().await?;
        self.check("status", resp.status())?;
        let body = resp.bytes().await?;
        let statuses: Vec<JobStatus> = serde_json::from_slice(&body)?;
        debug!(requested = job_ids.len(), received = statuses.len(), "broker status");
        Ok(statuses)
    }

    async fn cancel(
        &self,
        project_id: &str,
        graph_id: &str,
        job_id: &str,
    ) -> Result<(), BrokerError> {
        let url = self.endpoint(&[project_id, graph_id, job_id])?;
        let resp = self.client.delete(url).send().await?;
        debug!(job_id, status = resp.status().as_u16(), "broker cancel");
        self.check("cancel", resp.status())
    }
}
