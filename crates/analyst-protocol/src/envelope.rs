use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded output of one unit request. Everything except the identifiers is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    #[serde(rename = "id")]
    pub unit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ResultEnvelope {
    pub fn new(job_id: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            job_id: Some(job_id.into()),
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}
