use crate::observation::Location;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

/// Registry category of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationCategory {
    /// Hydrological post or station (water level, discharge, ice).
    Hydro,
    /// Meteorological station (synoptic observations).
    Meteo,
}

/// A geolocated station from the registry.
///
/// Station records are reference data: loaded once per run and never
/// mutated afterwards.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Station {
    /// Registry code (e.g. "05004" for a hydro post, "4923811" for meteo)
    pub id: String,
    /// Latitude and longitude in decimal degrees
    pub location: Location,
    pub category: StationCategory,
}

impl Station {
    pub fn new(id: &str, lat: f64, lon: f64, category: StationCategory) -> Self {
        Station {
            id: id.to_string(),
            location: Location { lat, lon },
            category,
        }
    }

    /// Parse an ordered station identifier list (CSV with an `identifier`
    /// header). Blank lines are skipped; order is preserved.
    pub fn parse_identifier_csv(csv_object: &str) -> Result<Vec<String>, csv::Error> {
        let mut identifiers: Vec<String> = Vec::new();
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_object.as_bytes());
        for row in rdr.records() {
            let record = row?;
            let id = record.get(0).unwrap_or("").trim();
            if !id.is_empty() {
                identifiers.push(id.to_string());
            }
        }
        Ok(identifiers)
    }
}
