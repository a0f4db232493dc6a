use analyst_protocol::{BoardingAssumption, ModeSet, SearchConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a job describes the searches it fans out into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobConfig {
    /// Caller supplied the full search configuration and target graph.
    Explicit {
        graph_id: String,
        search: SearchConfig,
    },
    /// Configuration is derived from a named scenario at fan-out time.
    Scenario {
        scenario_id: String,
        mode: ModeSet,
        date: NaiveDate,
        /// Seconds after midnight.
        from_time: u32,
        to_time: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        boarding_assumption: Option<BoardingAssumption>,
    },
}

/// Durable state of one analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Empty until the first save assigns one.
    #[serde(default)]
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Point set supplying the origins.
    pub point_set_id: String,
    pub config: JobConfig,
    /// Graph resolved at fan-out time for scenario jobs.
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub total_points: Option<u32>,
    #[serde(default)]
    pub complete_points: Option<u32>,
    /// Set once every result has been ingested; never reverts.
    #[serde(default)]
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        project_id: impl Into<String>,
        point_set_id: impl Into<String>,
        config: JobConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_id: project_id.into(),
            name: None,
            point_set_id: point_set_id.into(),
            config,
            graph_id: None,
            total_points: None,
            complete_points: None,
            complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_transit(&self) -> bool {
        match &self.config {
            JobConfig::Explicit { search, .. } => search.is_transit(),
            JobConfig::Scenario { mode, .. } => mode.is_transit(),
        }
    }

    pub fn is_profile(&self) -> bool {
        match &self.config {
            JobConfig::Explicit { search, .. } => search.is_profile(),
            JobConfig::Scenario { .. } => self.is_transit(),
        }
    }

    /// Graph known without consulting the scenario catalog.
    pub fn known_graph_id(&self) -> Option<&str> {
        if let Some(graph) = self.graph_id.as_deref() {
            return Some(graph);
        }
        match &self.config {
            JobConfig::Explicit { graph_id, .. } => Some(graph_id.as_str()),
            JobConfig::Scenario { .. } => None,
        }
    }

    pub fn scenario_id(&self) -> Option<&str> {
        match &self.config {
            JobConfig::Scenario { scenario_id, .. } => Some(scenario_id.as_str()),
            JobConfig::Explicit { .. } => None,
        }
    }

    /// Progress as a whole percentage; 0 when totals are unset or zero.
    pub fn percent(&self) -> u8 {
        match (self.total_points, self.complete_points) {
            (Some(total), Some(done)) if total > 0 => {
                let pct = (done as f64 / total as f64 * 100.0).round();
                pct.clamp(0.0, 100.0) as u8
            }
            _ => 0,
        }
    }

    pub fn points_done(&self) -> bool {
        self.total_points.is_some() && self.complete_points == self.total_points
    }
}
