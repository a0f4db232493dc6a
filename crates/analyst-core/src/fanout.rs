//! Expansion of one job into one unit request per origin point.

use analyst_kernel::{JobConfig, JobRecord};
use analyst_protocol::{
    BoardingAssumption, Location, ModeSet, ProfileRequest, RoutingRequest, ScenarioSpec,
    SearchConfig, UnitRequest,
};
use chrono::NaiveDate;

use crate::error::JobError;
use crate::points::PointSet;
use crate::scenario::{ScenarioCatalog, TransportScenario};

pub const WALK_SPEED_MPS: f64 = 1.33;
pub const BIKE_SPEED_MPS: f64 = 4.1;
pub const MAX_WALK_MINUTES: u32 = 20;
pub const MAX_BIKE_MINUTES: u32 = 45;
pub const ROUTING_CUTOFF_MINUTES: u32 = 120;

/// The batch for one job plus the graph it targets.
#[derive(Debug, Clone)]
pub struct FanOut {
    pub graph_id: String,
    pub requests: Vec<UnitRequest>,
}

/// Graph for `record`: persisted id, explicit graph, then the scenario's
/// bundle.
pub fn resolve_graph_id(record: &JobRecord, catalog: &dyn ScenarioCatalog) -> Option<String> {
    if let Some(graph) = record.known_graph_id() {
        return Some(graph.to_string());
    }
    record
        .scenario_id()
        .and_then(|id| catalog.scenario(id))
        .map(|s| s.bundle_id)
}

/// Resolve the configuration every unit of `record` shares. The origin is a
/// placeholder; [`plan`] stamps each point into it.
pub fn resolve_template(
    record: &JobRecord,
    catalog: &dyn ScenarioCatalog,
) -> Result<(String, SearchConfig), JobError> {
    match &record.config {
        JobConfig::Explicit { graph_id, search } => Ok((graph_id.clone(), search.clone())),
        JobConfig::Scenario {
            scenario_id,
            mode,
            date,
            from_time,
            to_time,
            boarding_assumption,
        } => {
            let scenario = catalog
                .scenario(scenario_id)
                .ok_or_else(|| JobError::UnknownScenario(scenario_id.clone()))?;
            let search = if mode.is_transit() {
                SearchConfig::Profile(build_profile_request(
                    &scenario,
                    mode,
                    *date,
                    *from_time,
                    *to_time,
                    boarding_assumption.unwrap_or_default(),
                ))
            } else {
                let bundle = catalog
                    .bundle(&scenario.bundle_id)
                    .ok_or_else(|| JobError::UnknownBundle(scenario.bundle_id.clone()))?;
                SearchConfig::Routing(build_routing_request(
                    mode,
                    *date,
                    *from_time,
                    &bundle.time_zone,
                ))
            };
            Ok((scenario.bundle_id, search))
        }
    }
}

pub fn build_profile_request(
    scenario: &TransportScenario,
    mode: &ModeSet,
    date: NaiveDate,
    from_time: u32,
    to_time: u32,
    boarding_assumption: BoardingAssumption,
) -> ProfileRequest {
    let mut street = mode.street_modes();
    if street.is_empty() {
        street = ModeSet::walk();
    }
    ProfileRequest {
        from_lat: 0.0,
        from_lon: 0.0,
        to_lat: 0.0,
        to_lon: 0.0,
        date,
        from_time,
        to_time,
        access_modes: street.clone(),
        egress_modes: ModeSet::walk(),
        direct_modes: street,
        transit_modes: mode.transit_modes(),
        walk_speed: WALK_SPEED_MPS,
        bike_speed: BIKE_SPEED_MPS,
        max_walk_time: MAX_WALK_MINUTES,
        max_bike_time: MAX_BIKE_MINUTES,
        analyst: true,
        boarding_assumption,
        scenario: Some(ScenarioSpec {
            id: 0,
            modifications: scenario.effective_modifications(),
        }),
    }
}

pub fn build_routing_request(
    mode: &ModeSet,
    date: NaiveDate,
    time: u32,
    time_zone: &str,
) -> RoutingRequest {
    let origin = Location::new(0.0, 0.0);
    RoutingRequest {
        from: origin,
        to: origin,
        modes: mode.clone(),
        date,
        time,
        time_zone: time_zone.to_string(),
        cutoff_minutes: ROUTING_CUTOFF_MINUTES,
        arrive_by: false,
    }
}

/// One unit request per point, tagged with the job id and the point id.
/// `record` must already have an id.
pub fn plan(
    record: &JobRecord,
    points: &PointSet,
    catalog: &dyn ScenarioCatalog,
) -> Result<FanOut, JobError> {
    let (graph_id, template) = resolve_template(record, catalog)?;
    let requests = points
        .features
        .iter()
        .map(|pf| {
            let mut req = UnitRequest::for_job(
                record.id.as_str(),
                pf.id.as_str(),
                graph_id.as_str(),
                template.at(pf.location),
            );
            req.destination_pointset_id = Some(record.point_set_id.clone());
            req
        })
        .collect();
    Ok(FanOut { graph_id, requests })
}
