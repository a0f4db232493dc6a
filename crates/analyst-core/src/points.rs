use analyst_protocol::Location;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// One origin point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    pub id: String,
    pub location: Location,
}

/// Ordered, indexable collection of origins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointSet {
    pub id: String,
    pub features: Vec<PointFeature>,
}

impl PointSet {
    pub fn new(id: impl Into<String>, features: Vec<PointFeature>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parse a GeoJSON FeatureCollection. Only `Point` features are kept;
    /// ids come from the `id` property, then the feature id. When any point
    /// lacks an id, or two points share one, every point is keyed by its
    /// index in the collection instead so unit ids stay distinct.
    pub fn from_geojson(id: impl Into<String>, raw: &[u8]) -> Result<Self> {
        let id = id.into();
        let fc: FeatureCollection =
            serde_json::from_slice(raw).map_err(|e| anyhow!("invalid geojson: {}", e))?;
        let mut parsed = Vec::with_capacity(fc.features.len());
        for (idx, f) in fc.features.into_iter().enumerate() {
            let Some(Geometry::Point { coordinates }) = f.geometry else {
                continue;
            };
            let [lon, lat, ..] = coordinates.as_slice() else {
                return Err(anyhow!("feature {} has fewer than two coordinates", idx));
            };
            let explicit = f
                .properties
                .as_ref()
                .and_then(|p| p.get("id"))
                .and_then(id_string)
                .or_else(|| f.id.as_ref().and_then(id_string));
            parsed.push((idx, explicit, Location::new(*lat, *lon)));
        }

        let keep_ids = {
            let mut seen = HashSet::with_capacity(parsed.len());
            parsed
                .iter()
                .all(|(_, explicit, _)| explicit.as_deref().is_some_and(|s| seen.insert(s)))
        };
        if !keep_ids {
            warn!(point_set = %id, "point ids missing or repeated; keying points by index");
        }
        let features = parsed
            .into_iter()
            .map(|(idx, explicit, location)| PointFeature {
                id: match explicit {
                    Some(pid) if keep_ids => pid,
                    _ => idx.to_string(),
                },
                location,
            })
            .collect();
        Ok(Self::new(id, features))
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Point {
        coordinates: Vec<f64>,
    },
    #[serde(other)]
    Other,
}

/// Resolves point-set ids to loaded point sets.
#[async_trait]
pub trait PointSetSource: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Arc<PointSet>>>;
}

/// Point sets stored as `<dir>/<id>.geojson`.
pub struct GeoJsonPointSets {
    dir: PathBuf,
}

impl GeoJsonPointSets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PointSetSource for GeoJsonPointSets {
    async fn load(&self, id: &str) -> Result<Option<Arc<PointSet>>> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(anyhow!("invalid point set id `{}`", id));
        }
        let path = self.dir.join(format!("{id}.geojson"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Arc::new(PointSet::from_geojson(id, &raw)?)))
    }
}

/// In-memory point sets.
#[derive(Default)]
pub struct StaticPointSets {
    sets: HashMap<String, Arc<PointSet>>,
}

impl StaticPointSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, set: PointSet) -> Self {
        self.sets.insert(set.id.clone(), Arc::new(set));
        self
    }
}

#[async_trait]
impl PointSetSource for StaticPointSets {
    async fn load(&self, id: &str) -> Result<Option<Arc<PointSet>>> {
        Ok(self.sets.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BLOCKS: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"id": "b-1"},
         "geometry": {"type": "Point", "coordinates": [-73.99, 40.73]}},
        {"type": "Feature", "id": 42, "properties": {},
         "geometry": {"type": "Point", "coordinates": [-73.98, 40.74, 12.0]}},
        {"type": "Feature", "properties": null,
         "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}},
        {"type": "Feature", "properties": {"id": "b-3"},
         "geometry": {"type": "Point", "coordinates": [-73.97, 40.75]}}
      ]
    }"#;

    #[test]
    fn parses_point_features() {
        let set = PointSet::from_geojson("blocks", BLOCKS.as_bytes()).unwrap();
        let ids: Vec<&str> = set.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["b-1", "42", "b-3"]);
        assert_eq!(set.features[0].location, Location::new(40.73, -73.99));
    }

    fn ids_of(raw: &str) -> Vec<String> {
        PointSet::from_geojson("set", raw.as_bytes())
            .unwrap()
            .features
            .into_iter()
            .map(|f| f.id)
            .collect()
    }

    #[test]
    fn missing_id_cannot_collide_with_numeric_id() {
        let ids = ids_of(
            r#"{"type": "FeatureCollection", "features": [
              {"type": "Feature", "id": 1,
               "geometry": {"type": "Point", "coordinates": [-73.99, 40.73]}},
              {"type": "Feature",
               "geometry": {"type": "Point", "coordinates": [-73.98, 40.74]}}
            ]}"#,
        );
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[test]
    fn repeated_ids_fall_back_to_index() {
        let ids = ids_of(
            r#"{"type": "FeatureCollection", "features": [
              {"type": "Feature", "properties": {"id": "a"},
               "geometry": {"type": "Point", "coordinates": [-73.99, 40.73]}},
              {"type": "Feature", "properties": null,
               "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}},
              {"type": "Feature", "properties": {"id": "a"},
               "geometry": {"type": "Point", "coordinates": [-73.98, 40.74]}}
            ]}"#,
        );
        assert_eq!(ids, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn loads_from_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blocks.geojson"), BLOCKS).unwrap();
        let source = GeoJsonPointSets::new(dir.path());
        assert_eq!(source.load("blocks").await.unwrap().unwrap().len(), 3);
        assert!(source.load("missing").await.unwrap().is_none());
        assert!(source.load("../etc").await.is_err());
    }
}
