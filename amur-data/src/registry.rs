//! Station registry: locations of hydro posts and meteo stations.
//!
//! The registry is a GeoJSON feature collection whose feature properties
//! carry the hydro post code (`gidro`), the meteo station code (`meteo`),
//! the station category (`ktoCategory`) and coordinates (`lat`, `lon`).
//! One physical site may appear several times.

use amur_core::observation::{HydroRecord, LocatedMeteo, Location, MeteoRecord};
use amur_core::station::{Station, StationCategory};
use amur_core::{PipelineConfig, PipelineError, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[cfg(feature = "api")]
use reqwest::Client;

/// Default registry endpoint.
pub const REGISTRY_URL: &str = "http://asunp.meteo.ru/geoits-rest/services/asunp/geo.json";

/// Categories that identify a hydrological post.
pub const HYDRO_CATEGORIES: [&str; 2] = ["post_gidro", "station_gidro"];

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    geometry: Option<Geometry>,
}

/// Point geometry, `[lon, lat]`.
#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    gidro: Value,
    #[serde(default)]
    meteo: Value,
    #[serde(default, rename = "ktoCategory")]
    category: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// Codes may be published as strings or numbers.
fn code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub hydro_code: Option<String>,
    pub meteo_code: Option<String>,
    pub category: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationRegistry {
    pub entries: Vec<RegistryEntry>,
}

impl StationRegistry {
    /// Parse a GeoJSON feature collection. Coordinates come from the
    /// `lat`/`lon` properties, or the point geometry when those are absent.
    /// Features without either are skipped.
    pub fn from_geojson(text: &str) -> Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(text)?;
        let entries = collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let p = feature.properties;
                let point = feature
                    .geometry
                    .filter(|g| g.coordinates.len() >= 2)
                    .map(|g| Location {
                        lat: g.coordinates[1],
                        lon: g.coordinates[0],
                    });
                let location = match (p.lat, p.lon) {
                    (Some(lat), Some(lon)) => Location { lat, lon },
                    _ => point?,
                };
                Some(RegistryEntry {
                    hydro_code: code(&p.gidro),
                    meteo_code: code(&p.meteo),
                    category: p.category,
                    location,
                })
            })
            .collect();
        Ok(StationRegistry { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_geojson(&text)
    }

    /// Download the registry.
    #[cfg(feature = "api")]
    pub async fn fetch(client: &Client, url: &str) -> Result<Self> {
        info!("Fetching station registry from {}", url);
        let body = client.get(url).send().await?.error_for_status()?.text().await?;
        Self::from_geojson(&body)
    }

    /// Configured hydro posts. Entries are ordered by longitude and the
    /// first entry per post code wins.
    pub fn hydro_stations(&self, config: &PipelineConfig) -> Vec<Station> {
        let mut candidates: Vec<&RegistryEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.category
                    .as_deref()
                    .is_some_and(|c| HYDRO_CATEGORIES.contains(&c))
            })
            .filter(|e| e.hydro_code.as_deref().is_some_and(|c| config.is_configured_station(c)))
            .collect();
        candidates.sort_by(|a, b| a.location.lon.total_cmp(&b.location.lon));

        let mut seen = BTreeSet::new();
        let stations: Vec<Station> = candidates
            .into_iter()
            .filter_map(|e| {
                let id = e.hydro_code.as_deref()?;
                seen.insert(id)
                    .then(|| Station::new(id, e.location.lat, e.location.lon, StationCategory::Hydro))
            })
            .collect();
        info!(
            "Registry locates {} of {} configured posts",
            stations.len(),
            config.all_stations.len()
        );
        stations
    }

    /// Meteo stations among `identifiers`. The last entry per meteo code wins.
    pub fn meteo_stations<'a>(&self, identifiers: impl IntoIterator<Item = &'a str>) -> Vec<Station> {
        let wanted: BTreeSet<&str> = identifiers.into_iter().collect();
        let mut latest: HashMap<&str, Location> = HashMap::new();
        for entry in &self.entries {
            if let Some(id) = entry.meteo_code.as_deref().filter(|id| wanted.contains(id)) {
                latest.insert(id, entry.location);
            }
        }
        wanted
            .into_iter()
            .filter_map(|id| {
                latest
                    .get(id)
                    .map(|loc| Station::new(id, loc.lat, loc.lon, StationCategory::Meteo))
            })
            .collect()
    }
}

fn location_index(stations: &[Station]) -> HashMap<&str, Location> {
    stations.iter().map(|s| (s.id.as_str(), s.location)).collect()
}

/// Attach post locations to hydro records. Records of posts without a
/// registry location are dropped.
pub fn locate_hydro(records: Vec<HydroRecord>, stations: &[Station]) -> Vec<(HydroRecord, Location)> {
    let index = location_index(stations);
    let mut unlocated = BTreeSet::new();
    let located: Vec<(HydroRecord, Location)> = records
        .into_iter()
        .filter_map(|record| match index.get(record.identifier.as_str()) {
            Some(location) => Some((record, *location)),
            None => {
                unlocated.insert(record.identifier);
                None
            }
        })
        .collect();
    for id in unlocated {
        warn!("Hydro post {} has no registry location; dropping its records", id);
    }
    located
}

/// Attach station locations to meteo records. Records of stations without a
/// registry location are dropped.
pub fn locate_meteo(records: Vec<MeteoRecord>, stations: &[Station]) -> Vec<LocatedMeteo> {
    let index = location_index(stations);
    let mut unlocated = BTreeSet::new();
    let located: Vec<LocatedMeteo> = records
        .into_iter()
        .filter_map(|record| match index.get(record.identifier.as_str()) {
            Some(location) => Some(LocatedMeteo {
                record,
                location: *location,
            }),
            None => {
                unlocated.insert(record.identifier);
                None
            }
        })
        .collect();
    for id in unlocated {
        warn!("Meteo station {} has no registry location; dropping its records", id);
    }
    located
}

/// Location of a configured post, as required for forecast lookups.
pub fn station_location(stations: &[Station], identifier: &str) -> Result<Location> {
    stations
        .iter()
        .find(|s| s.id == identifier)
        .map(|s| s.location)
        .ok_or_else(|| PipelineError::MissingLocation(identifier.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amur_core::observation::{CodeValues, HydroValues, MeteoValues};
    use chrono::NaiveDate;

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"gidro": "05012", "meteo": null, "ktoCategory": "post_gidro", "lat": 50.1, "lon": 128.0}},
            {"type": "Feature", "properties": {"gidro": "05004", "meteo": "", "ktoCategory": "station_gidro", "lat": 50.0, "lon": 127.5}},
            {"type": "Feature", "properties": {"gidro": "05004", "ktoCategory": "post_gidro", "lat": 51.0, "lon": 129.0}},
            {"type": "Feature", "properties": {"gidro": "05013", "ktoCategory": "meteo_station", "lat": 49.0, "lon": 126.0}},
            {"type": "Feature", "properties": {"gidro": "99999", "ktoCategory": "post_gidro", "lat": 49.0, "lon": 126.0}},
            {"type": "Feature", "properties": {"meteo": 4923800, "ktoCategory": "meteo_station", "lat": 48.0, "lon": 130.0}},
            {"type": "Feature", "properties": {"meteo": "4923800", "ktoCategory": "meteo_station", "lat": 48.5, "lon": 130.5}},
            {"type": "Feature", "properties": {"meteo": "4923811", "ktoCategory": "meteo_station"}},
            {"type": "Feature", "properties": {"meteo": "4923815"}, "geometry": {"type": "Point", "coordinates": [131.0, 47.5]}}
        ]
    }"#;

    fn config() -> PipelineConfig {
        PipelineConfig::with_stations("/data", vec!["05004".into(), "05012".into(), "05013".into()]).unwrap()
    }

    #[test]
    fn test_hydro_stations_first_by_longitude() {
        let registry = StationRegistry::from_geojson(GEOJSON).unwrap();
        assert_eq!(registry.entries.len(), 8);
        let stations = registry.hydro_stations(&config());
        let ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["05004", "05012"]);
        assert_eq!(stations[0].location, Location { lat: 50.0, lon: 127.5 });
    }

    #[test]
    fn test_meteo_stations_last_wins() {
        let registry = StationRegistry::from_geojson(GEOJSON).unwrap();
        let stations = registry.meteo_stations(["4923800", "4923811", "4923815", "0000000"]);
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].location, Location { lat: 48.5, lon: 130.5 });
        assert_eq!(stations[1].location, Location { lat: 47.5, lon: 131.0 });
    }

    #[test]
    fn test_locate_drops_unknown() {
        let registry = StationRegistry::from_geojson(GEOJSON).unwrap();
        let stations = registry.hydro_stations(&config());
        let date = NaiveDate::from_ymd_opt(2020, 5, 1).unwrap();
        let record = |id: &str| HydroRecord {
            identifier: id.to_string(),
            date,
            values: HydroValues::default(),
        };
        let located = locate_hydro(vec![record("05004"), record("05013")], &stations);
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].0.identifier, "05004");

        let meteo = MeteoRecord {
            identifier: "4923800".into(),
            date,
            codes: CodeValues::default(),
            values: MeteoValues::default(),
        };
        let meteo_stations = registry.meteo_stations(["4923800"]);
        assert_eq!(locate_meteo(vec![meteo], &meteo_stations).len(), 1);

        assert!(matches!(
            station_location(&stations, "05013"),
            Err(PipelineError::MissingLocation(_))
        ));
    }
}
