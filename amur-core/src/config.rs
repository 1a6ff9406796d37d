//! Immutable pipeline configuration.
//!
//! Everything here is loaded once at process start and passed by reference
//! into each component. Station order, the feature allow-lists and the
//! category vocabulary are frozen together with the model weights: change
//! them only together with retraining.

use crate::columns::{categorical_station_features, station_column, station_features, target_column};
use crate::error::{PipelineError, Result};
use crate::observation::MeteoField;
use crate::station::Station;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Embedded ordered list of hydro posts used by the model.
pub static STATIONS_CSV: &str = include_str!("../../fixtures/stations.csv");

/// Number of days predicted per inference call.
pub const DAYS_FORECAST: usize = 10;

/// Number of leading stations reported in the prediction table.
pub const NUMBER_OF_INFERENCE_STATIONS: usize = 8;

/// Meteo stations whose listed fields are too sparse to use.
pub const BAD_IDENTIFIER_FIELDS: [(&str, MeteoField); 1] = [("4923811", MeteoField::SoilTemperature)];

/// Runtime configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory holding `hydro/` and `meteo_new/`
    pub datasets_path: PathBuf,
    /// Ordered hydro station list; the order fixes target column order
    pub all_stations: Vec<String>,
    /// How many leading stations appear in the prediction report
    pub inference_stations: usize,
    pub days_forecast: usize,
    /// Meteo identifier -> fields ignored for that station
    pub bad_meteo_fields: BTreeMap<String, Vec<MeteoField>>,
    /// Earliest date read from the archives
    pub history_start: NaiveDate,
    /// Observations after this date are treated as invalid
    pub max_date: NaiveDate,
}

impl PipelineConfig {
    /// Configuration with the embedded station list.
    pub fn new(datasets_path: impl Into<PathBuf>) -> Result<Self> {
        let all_stations = Station::parse_identifier_csv(STATIONS_CSV)?;
        Self::with_stations(datasets_path, all_stations)
    }

    pub fn with_stations(datasets_path: impl Into<PathBuf>, all_stations: Vec<String>) -> Result<Self> {
        if all_stations.is_empty() {
            return Err(PipelineError::InvalidConfig("station list is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = all_stations.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(PipelineError::InvalidConfig(format!("station {dup} listed twice")));
        }
        let mut bad_meteo_fields: BTreeMap<String, Vec<MeteoField>> = BTreeMap::new();
        for (identifier, field) in BAD_IDENTIFIER_FIELDS {
            bad_meteo_fields.entry(identifier.to_string()).or_default().push(field);
        }
        Ok(PipelineConfig {
            datasets_path: datasets_path.into(),
            inference_stations: NUMBER_OF_INFERENCE_STATIONS.min(all_stations.len()),
            all_stations,
            days_forecast: DAYS_FORECAST,
            bad_meteo_fields,
            history_start: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap_or(NaiveDate::MIN),
            max_date: NaiveDate::from_ymd_opt(2100, 1, 1).unwrap_or(NaiveDate::MAX),
        })
    }

    pub fn hydro_dir(&self) -> PathBuf {
        self.datasets_path.join("hydro")
    }

    pub fn meteo_dir(&self) -> PathBuf {
        self.datasets_path.join("meteo_new")
    }

    pub fn is_configured_station(&self, identifier: &str) -> bool {
        self.all_stations.iter().any(|s| s == identifier)
    }

    /// Stations that appear in the prediction report.
    pub fn reported_stations(&self) -> &[String] {
        &self.all_stations[..self.inference_stations]
    }

    /// Target columns, one per configured station, in station order.
    pub fn targets(&self) -> Vec<String> {
        self.all_stations.iter().map(|s| target_column(s)).collect()
    }

    /// Fields to ignore for a meteo identifier.
    pub fn bad_fields(&self, identifier: &str) -> &[MeteoField] {
        self.bad_meteo_fields
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The frozen feature contract: which wide-table columns feed the model,
/// and how coded values map to dense category indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub numerical: Vec<String>,
    pub categorical: Vec<String>,
    /// `"<field><code>"` (e.g. `"water_code3"`) -> category index
    pub vocabulary: BTreeMap<String, u32>,
}

impl FeatureContract {
    /// Contract admitting every feature the assembler can produce for the
    /// given stations.
    pub fn full(stations: &[String], vocabulary: BTreeMap<String, u32>) -> Self {
        let categorical_base = categorical_station_features();
        let mut numerical = Vec::new();
        let mut categorical = Vec::new();
        for station in stations {
            for feature in station_features() {
                let column = station_column(&feature, station);
                if categorical_base.contains(&feature) {
                    categorical.push(column);
                } else {
                    numerical.push(column);
                }
            }
        }
        FeatureContract {
            numerical,
            categorical,
            vocabulary,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let contract: FeatureContract = serde_json::from_str(&text)?;
        let overlap: Vec<&String> = contract
            .numerical
            .iter()
            .filter(|c| contract.categorical.contains(c))
            .collect();
        if let Some(column) = overlap.first() {
            return Err(PipelineError::InvalidConfig(format!(
                "{column} is listed as both numerical and categorical"
            )));
        }
        info!(
            "Loaded feature contract: {} numerical, {} categorical, {} codes",
            contract.numerical.len(),
            contract.categorical.len(),
            contract.vocabulary.len()
        );
        Ok(contract)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| PipelineError::io(path, e))
    }

    pub fn is_allowed(&self, column: &str) -> bool {
        self.numerical.iter().any(|c| c == column) || self.categorical.iter().any(|c| c == column)
    }

    /// Keep only the columns accepted by `keep`. Returns the number dropped.
    pub fn retain_columns(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.numerical.len() + self.categorical.len();
        self.numerical.retain(|c| keep(c));
        self.categorical.retain(|c| keep(c));
        before - self.numerical.len() - self.categorical.len()
    }

    /// Model input columns: numerical first, then categorical.
    pub fn input_columns(&self) -> Vec<String> {
        self.numerical.iter().chain(self.categorical.iter()).cloned().collect()
    }

    /// Map a raw coded value to its vocabulary index. Codes are truncated to
    /// integers before lookup. An unmapped code is a contract violation.
    pub fn encode(&self, field: &str, raw: f64) -> Result<f64> {
        let code = raw.trunc() as i64;
        self.vocabulary
            .get(&format!("{field}{code}"))
            .map(|&index| index as f64)
            .ok_or_else(|| PipelineError::UnknownCategory {
                field: field.to_string(),
                code,
            })
    }
}

/// Mean and standard deviation of one numerical feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
}

impl FeatureStats {
    pub fn standardize(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Precomputed normalization statistics, keyed by wide-table column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizationStats(pub HashMap<String, FeatureStats>);

impl NormalizationStats {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let stats: NormalizationStats = serde_json::from_str(&text)?;
        info!("Loaded normalization statistics for {} features", stats.0.len());
        Ok(stats)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let ordered: BTreeMap<&String, &FeatureStats> = self.0.iter().collect();
        let text = serde_json::to_string_pretty(&ordered)?;
        std::fs::write(path, text).map_err(|e| PipelineError::io(path, e))
    }

    pub fn get(&self, feature: &str) -> Result<FeatureStats> {
        self.0
            .get(feature)
            .copied()
            .ok_or_else(|| PipelineError::MissingNormalization(feature.to_string()))
    }

    /// Check every listed feature has statistics before any work starts.
    pub fn ensure_covers(&self, features: &[String]) -> Result<()> {
        match features.iter().find(|f| !self.0.contains_key(*f)) {
            Some(missing) => Err(PipelineError::MissingNormalization(missing.clone())),
            None => Ok(()),
        }
    }
}
