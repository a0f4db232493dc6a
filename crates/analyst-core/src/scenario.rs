use analyst_protocol::Modification;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A route excluded from service in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRef {
    pub agency_id: String,
    pub id: String,
}

/// Named set of modifications applied to a bundle's network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportScenario {
    pub id: String,
    /// Graph the scenario runs against.
    pub bundle_id: String,
    #[serde(default)]
    pub banned_routes: Vec<RouteRef>,
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

impl TransportScenario {
    /// Banned routes as trip removals, followed by the declared modifications.
    pub fn effective_modifications(&self) -> Vec<Modification> {
        self.banned_routes
            .iter()
            .map(|r| Modification::RemoveTrip {
                agency_id: r.agency_id.clone(),
                route_id: vec![r.id.clone()],
            })
            .chain(self.modifications.iter().cloned())
            .collect()
    }
}

/// A compiled transport network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,
    /// IANA zone routing departure times are expressed in.
    pub time_zone: String,
}

pub trait ScenarioCatalog: Send + Sync {
    fn scenario(&self, id: &str) -> Option<TransportScenario>;
    fn bundle(&self, id: &str) -> Option<Bundle>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "bundle")]
    bundles: Vec<Bundle>,
    #[serde(default, rename = "scenario")]
    scenarios: Vec<TransportScenario>,
}

/// Catalog held in memory, usually loaded from a TOML file with
/// `[[bundle]]` and `[[scenario]]` tables.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    scenarios: HashMap<String, TransportScenario>,
    bundles: HashMap<String, Bundle>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.bundles.insert(bundle.id.clone(), bundle);
        self
    }

    pub fn with_scenario(mut self, scenario: TransportScenario) -> Self {
        self.scenarios.insert(scenario.id.clone(), scenario);
        self
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| anyhow!("invalid catalog: {}", e))?;
        let mut catalog = Self::new();
        for b in file.bundles {
            catalog = catalog.with_bundle(b);
        }
        for s in file.scenarios {
            catalog = catalog.with_scenario(s);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

impl ScenarioCatalog for StaticCatalog {
    fn scenario(&self, id: &str) -> Option<TransportScenario> {
        self.scenarios.get(id).cloned()
    }

    fn bundle(&self, id: &str) -> Option<Bundle> {
        self.bundles.get(id).cloned()
    }
}
