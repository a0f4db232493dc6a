use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::modes::ModeSet;

/// How riders are assumed to board when computing travel-time statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardingAssumption {
    BestCase,
    #[default]
    WorstCase,
    Random,
}

/// A scenario modification applied by workers before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Modification {
    /// Remove every trip on the listed routes of one agency.
    #[serde(rename_all = "camelCase")]
    RemoveTrip {
        agency_id: String,
        route_id: Vec<String>,
    },
    /// Replace the scheduled frequency of the listed routes.
    #[serde(rename_all = "camelCase")]
    AdjustHeadway {
        agency_id: String,
        route_id: Vec<String>,
        headway_secs: u32,
    },
}

/// Scenario payload embedded in a profile search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub id: u32,
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Profile (time-window) search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub from_lat: f64,
    pub from_lon: f64,
    /// The worker API requires a destination even in one-to-all mode; it is
    /// ignored there.
    pub to_lat: f64,
    pub to_lon: f64,
    pub date: NaiveDate,
    /// Seconds after midnight.
    pub from_time: u32,
    pub to_time: u32,
    pub access_modes: ModeSet,
    pub egress_modes: ModeSet,
    pub direct_modes: ModeSet,
    pub transit_modes: ModeSet,
    pub walk_speed: f64,
    pub bike_speed: f64,
    /// Minutes.
    pub max_walk_time: u32,
    pub max_bike_time: u32,
    #[serde(default)]
    pub analyst: bool,
    #[serde(default)]
    pub boarding_assumption: BoardingAssumption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioSpec>,
}

impl ProfileRequest {
    /// Origin and placeholder destination both set to `origin`.
    pub fn at(&self, origin: Location) -> Self {
        let mut req = self.clone();
        req.from_lat = origin.lat;
        req.from_lon = origin.lon;
        req.to_lat = origin.lat;
        req.to_lon = origin.lon;
        req
    }
}

/// Point-to-point (single departure time) routing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRequest {
    pub from: Location,
    pub to: Location,
    pub modes: ModeSet,
    pub date: NaiveDate,
    /// Departure, seconds after midnight in `time_zone`.
    pub time: u32,
    pub time_zone: String,
    pub cutoff_minutes: u32,
    #[serde(default)]
    pub arrive_by: bool,
}

impl RoutingRequest {
    pub fn at(&self, origin: Location) -> Self {
        let mut req = self.clone();
        req.from = origin;
        req.to = origin;
        req
    }

    pub fn is_transit(&self) -> bool {
        self.modes.is_transit()
    }
}

/// Exactly one search configuration per unit request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchConfig {
    #[serde(rename = "profileRequest")]
    Profile(ProfileRequest),
    #[serde(rename = "routingRequest")]
    Routing(RoutingRequest),
}

impl SearchConfig {
    pub fn is_profile(&self) -> bool {
        matches!(self, SearchConfig::Profile(_))
    }

    pub fn is_transit(&self) -> bool {
        match self {
            SearchConfig::Profile(_) => true,
            SearchConfig::Routing(rr) => rr.is_transit(),
        }
    }

    /// Re-anchor the configuration at `origin`.
    pub fn at(&self, origin: Location) -> Self {
        match self {
            SearchConfig::Profile(pr) => SearchConfig::Profile(pr.at(origin)),
            SearchConfig::Routing(rr) => SearchConfig::Routing(rr.at(origin)),
        }
    }
}

/// One schedulable unit of work: a single origin against a compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRequest {
    /// Owning job; absent on the priority (single point) path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Origin point identifier within the job.
    #[serde(rename = "id")]
    pub unit_id: String,
    pub graph_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_pointset_id: Option<String>,
    /// Whether workers should return raw travel-time arrays.
    #[serde(default)]
    pub include_times: bool,
    #[serde(flatten)]
    pub search: SearchConfig,
}

impl UnitRequest {
    /// A fan-out unit for `job_id`; raw travel times are not requested.
    pub fn for_job(
        job_id: impl Into<String>,
        unit_id: impl Into<String>,
        graph_id: impl Into<String>,
        search: SearchConfig,
    ) -> Self {
        Self {
            job_id: Some(job_id.into()),
            unit_id: unit_id.into(),
            graph_id: graph_id.into(),
            destination_pointset_id: None,
            include_times: false,
            search,
        }
    }

    /// A priority request computed synchronously by the broker. The
    /// configuration is anchored at its own origin and marked as an analyst
    /// (one-to-all) search.
    pub fn single_point(graph_id: impl Into<String>, search: SearchConfig) -> Self {
        let search = match search {
            SearchConfig::Profile(mut pr) => {
                pr.analyst = true;
                pr.to_lat = pr.from_lat;
                pr.to_lon = pr.from_lon;
                SearchConfig::Profile(pr)
            }
            SearchConfig::Routing(mut rr) => {
                rr.to = rr.from;
                SearchConfig::Routing(rr)
            }
        };
        Self {
            job_id: None,
            unit_id: "single".to_string(),
            graph_id: graph_id.into(),
            destination_pointset_id: None,
            include_times: true,
            search,
        }
    }
}
