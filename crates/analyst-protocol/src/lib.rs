//! Wire types exchanged with the compute broker and its workers.

mod envelope;
mod modes;
mod request;
mod status;

pub use envelope::ResultEnvelope;
pub use modes::{Mode, ModeSet, ParseModeError};
pub use request::{
    BoardingAssumption, Location, Modification, ProfileRequest, RoutingRequest, ScenarioSpec,
    SearchConfig, UnitRequest,
};
pub use status::JobStatus;
