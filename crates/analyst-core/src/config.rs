use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
/// Long enough for the broker to build a large graph on demand.
pub const DEFAULT_PRIORITY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Directory holding the job ledger.
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Directory holding per-job result stores (defaults to `<state_dir>/results`).
    #[serde(default)]
    pub results_dir: Option<String>,
}

impl RuntimeConfig {
    pub fn state_dir(&self) -> PathBuf {
        std::env::var("ANALYST_STATE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.state_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("state"))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.results_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.state_dir().join("results"))
    }
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterConfig {
    /// Base URL of the compute broker, e.g. <http://broker:9001/>
    #[serde(default)]
    pub broker: Option<String>,
    /// Root of the blob store workers write results into.
    #[serde(default)]
    pub results_bucket: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Timeout for enqueue, status and cancel calls.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Timeout for synchronous single point requests.
    #[serde(default)]
    pub priority_timeout_secs: Option<u64>,
    /// Concurrent object fetches per listing page during aggregation.
    #[serde(default)]
    pub fetch_concurrency: Option<usize>,
    #[serde(default)]
    pub list_page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct DataConfig {
    /// Directory of `<point_set_id>.geojson` files.
    #[serde(default)]
    pub point_sets_dir: Option<String>,
    /// TOML file describing scenarios and bundles.
    #[serde(default)]
    pub catalog: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub data: DataConfig,
}

static CONFIG_SCHEMA: Lazy<Option<Validator>> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).ok()?;
    validator_for(&schema_value).ok()
});

/// Returns the JSON schema describing the configuration structure.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).unwrap_or(serde_json::Value::Null)
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    if let Some(validator) = CONFIG_SCHEMA.as_ref() {
        let validation_errors: Vec<_> = validator
            .iter_errors(&json_value)
            .map(|e| e.to_string())
            .collect();
        if !validation_errors.is_empty() {
            return Err(anyhow::anyhow!(validation_errors.join(", ")));
        }
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Parse a broker base URL, normalizing it to end with `/`.
pub fn broker_url(raw: &str) -> Result<Url, ConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|_| ConfigError::InvalidBrokerUrl(raw.into()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidBrokerUrl(raw.into()));
    }
    Ok(url)
}

/// Validated cluster settings; constructing them is the startup gate for
/// orchestration.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub broker: Url,
    pub results_bucket: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub priority_timeout: Duration,
    pub fetch_concurrency: usize,
    pub list_page_size: usize,
}

impl ClusterSettings {
    pub fn resolve(cfg: &ClusterConfig) -> Result<Self, ConfigError> {
        let broker_raw = env_string("ANALYST_BROKER_URL")
            .or_else(|| cfg.broker.clone())
            .ok_or(ConfigError::MissingBroker)?;
        let broker = broker_url(&broker_raw)?;
        let results_bucket = env_string("ANALYST_RESULTS_BUCKET")
            .or_else(|| cfg.results_bucket.clone())
            .ok_or(ConfigError::MissingResultsBucket)?;
        let poll_secs = env_u64("ANALYST_POLL_INTERVAL_SECS")
            .or(cfg.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(1);
        let fetch_concurrency = cfg
            .fetch_concurrency
            .unwrap_or(DEFAULT_FETCH_CONCURRENCY)
            .max(1);
        let list_page_size = cfg.list_page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE);
        if list_page_size == 0 {
            return Err(ConfigError::Invalid(
                "cluster.list_page_size must be positive".into(),
            ));
        }
        Ok(Self {
            broker,
            results_bucket: PathBuf::from(results_bucket),
            poll_interval: Duration::from_secs(poll_secs),
            request_timeout: Duration::from_secs(
                cfg.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
                    .max(1),
            ),
            priority_timeout: Duration::from_secs(
                cfg.priority_timeout_secs
                    .unwrap_or(DEFAULT_PRIORITY_TIMEOUT_SECS)
                    .max(1),
            ),
            fetch_concurrency,
            list_page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(
            r#"
            [runtime]
            state_dir = "/var/lib/analyst"

            [cluster]
            broker = "http://broker.internal:9001"
            results_bucket = "/mnt/results"
            poll_interval_secs = 5

            [data]
            catalog = "catalog.toml"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.runtime.results_dir(),
            PathBuf::from("/var/lib/analyst/results")
        );
        let settings = ClusterSettings::resolve(&cfg.cluster).unwrap();
        assert_eq!(settings.broker.as_str(), "http://broker.internal:9001/");
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.priority_timeout, Duration::from_secs(600));
    }

    #[test]
    fn schema_describes_sections() {
        let schema = config_schema_json();
        let props = &schema["properties"];
        assert!(props.get("runtime").is_some());
        assert!(props.get("cluster").is_some());
        assert!(props.get("data").is_some());
    }

    #[test]
    fn schema_rejects_wrong_types() {
        let err = parse_config(
            r#"
            [cluster]
            poll_interval_secs = "often"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("often"));
    }

    #[test]
    fn broker_is_required_and_validated() {
        let cfg = ClusterConfig {
            results_bucket: Some("/tmp".into()),
            ..Default::default()
        };
        if std::env::var("ANALYST_BROKER_URL").is_err() {
            assert!(matches!(
                ClusterSettings::resolve(&cfg),
                Err(ConfigError::MissingBroker)
            ));
        }
        assert!(matches!(
            broker_url("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            broker_url("ftp://broker/"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert_eq!(
            broker_url("https://broker/api").unwrap().as_str(),
            "https://broker/api/"
        );
    }
}
