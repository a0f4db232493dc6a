use thiserror::Error;

/// Failures talking to the compute broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker unreachable, or it answered with something other than 200/202.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("undecodable broker response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        BrokerError::Unavailable(err.to_string())
    }
}

/// Failures reading from the result blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob backend error: {0}")]
    Backend(String),
}

/// A failed aggregation attempt. The whole attempt is retried on the next
/// status delivery.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("object `{key}` is not a gzip stream: {source}")]
    Gzip {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object `{key}` is not a result envelope: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("result store error: {0}")]
    Store(anyhow::Error),
    #[error("ingest task failed: {0}")]
    Join(String),
}

/// Fatal startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cluster.broker is not configured")]
    MissingBroker,
    #[error("cluster.broker `{0}` is not a valid http(s) url")]
    InvalidBrokerUrl(String),
    #[error("cluster.results_bucket is not configured")]
    MissingResultsBucket,
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of job-control operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("ledger error: {0}")]
    Ledger(anyhow::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("point set `{0}` not found")]
    UnknownPointSet(String),
    #[error("point set load failed: {0}")]
    PointSetLoad(anyhow::Error),
    #[error("scenario `{0}` not found")]
    UnknownScenario(String),
    #[error("bundle `{0}` not found")]
    UnknownBundle(String),
    #[error("job `{0}` not found")]
    NotFound(String),
    #[error("result store error: {0}")]
    Results(anyhow::Error),
}
