use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single travel mode understood by the routing workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Walk,
    Bicycle,
    Car,
    Transit,
    Bus,
    Rail,
    Subway,
    Tram,
    Ferry,
    CableCar,
    Gondola,
    Funicular,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Walk => "WALK",
            Mode::Bicycle => "BICYCLE",
            Mode::Car => "CAR",
            Mode::Transit => "TRANSIT",
            Mode::Bus => "BUS",
            Mode::Rail => "RAIL",
            Mode::Subway => "SUBWAY",
            Mode::Tram => "TRAM",
            Mode::Ferry => "FERRY",
            Mode::CableCar => "CABLE_CAR",
            Mode::Gondola => "GONDOLA",
            Mode::Funicular => "FUNICULAR",
        }
    }

    pub fn is_transit(self) -> bool {
        !matches!(self, Mode::Walk | Mode::Bicycle | Mode::Car)
    }

    fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        let mode = match normalized.as_str() {
            "WALK" => Mode::Walk,
            "BICYCLE" | "BIKE" => Mode::Bicycle,
            "CAR" => Mode::Car,
            "TRANSIT" => Mode::Transit,
            "BUS" => Mode::Bus,
            "RAIL" | "TRAIN" => Mode::Rail,
            "SUBWAY" => Mode::Subway,
            "TRAM" => Mode::Tram,
            "FERRY" => Mode::Ferry,
            "CABLE_CAR" => Mode::CableCar,
            "GONDOLA" => Mode::Gondola,
            "FUNICULAR" => Mode::Funicular,
            _ => return None,
        };
        Some(mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown travel mode `{}`", self.0)
    }
}

impl std::error::Error for ParseModeError {}

/// Set of travel modes, written on the wire as a comma separated list
/// (`"WALK,TRANSIT"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModeSet(Vec<Mode>);

impl ModeSet {
    pub fn new(modes: impl IntoIterator<Item = Mode>) -> Self {
        let mut modes: Vec<Mode> = modes.into_iter().collect();
        modes.sort();
        modes.dedup();
        Self(modes)
    }

    pub fn walk() -> Self {
        Self::new([Mode::Walk])
    }

    pub fn contains(&self, mode: Mode) -> bool {
        self.0.contains(&mode)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_transit(&self) -> bool {
        self.0.iter().any(|m| m.is_transit())
    }

    pub fn iter(&self) -> impl Iterator<Item = Mode> + '_ {
        self.0.iter().copied()
    }

    /// Non-transit modes, used for access, egress and direct legs.
    pub fn street_modes(&self) -> ModeSet {
        ModeSet::new(self.iter().filter(|m| !m.is_transit()))
    }

    pub fn transit_modes(&self) -> ModeSet {
        ModeSet::new(self.iter().filter(|m| m.is_transit()))
    }
}

impl FromStr for ModeSet {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modes = Vec::new();
        for part in s.split(',') {
            if part.trim().is_empty() {
                continue;
            }
            let mode = Mode::from_slug(part).ok_or_else(|| ParseModeError(part.to_string()))?;
            modes.push(mode);
        }
        Ok(ModeSet::new(modes))
    }
}

impl TryFrom<String> for ModeSet {
    type Error = ParseModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModeSet> for String {
    fn from(value: ModeSet) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.0.iter().map(|m| m.as_str()).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_classifies_transit() {
        let modes: ModeSet = "walk, TRANSIT".parse().unwrap();
        assert!(modes.is_transit());
        assert!(modes.contains(Mode::Walk));
        assert_eq!(modes.street_modes(), ModeSet::walk());
        assert_eq!(modes.to_string(), "WALK,TRANSIT");

        let car: ModeSet = "CAR".parse().unwrap();
        assert!(!car.is_transit());

        let bus: ModeSet = "WALK,BUS".parse().unwrap();
        assert!(bus.is_transit());
    }

    #[test]
    fn rejects_unknown_modes() {
        let err = "WALK,HOVERCRAFT".parse::<ModeSet>().unwrap_err();
        assert_eq!(err.0, "HOVERCRAFT");
    }

    #[test]
    fn serializes_as_comma_list() {
        let modes = ModeSet::new([Mode::Bicycle, Mode::Walk]);
        let json = serde_json::to_string(&modes).unwrap();
        assert_eq!(json, "\"WALK,BICYCLE\"");
        let back: ModeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, modes);
    }
}
