//! Feature assembly.
//!
//! Turns the joined long table (one [`StationDay`] per station and day) into
//! the wide table the tensor builder windows over: one row per date, one
//! column per station feature, plus one target column per station.
//!
//! Every station-scoped step (lags, rolling means, demodulation, past-year
//! lookups) runs on that station's own dated series, so no value ever leaks
//! from one station to another before the pivot.

use crate::demodulation::{periodic_component, ANNUAL_PERIOD, SEASONAL_PERIOD};
use crate::frame::{Column, Frame};
use amur_core::columns::{
    accumulate_name, categorical_sources, daily_meteo_fields, lag_forecast_sources, lag_long_sources,
    rolling_sources, shift_name, station_column, target_column, COS_DAY_OF_YEAR, DEMODULATION_121,
    DEMODULATION_365, DEMODULATION_RESIDUAL, DRY_DAYS, LAG_FORECAST, LAG_LONG, LAG_SHORT,
    PAST_YEAR_LEVEL, PAST_YEAR_LEVEL_3D, ROLLING_WINDOWS, SIN_DAY_OF_YEAR,
};
use amur_core::observation::{Field, HydroField, MeteoField, StationDay, WeatherCode};
use amur_core::{FeatureContract, PipelineConfig, Result};
use amur_utils::dates::{add_one_year, day_of_year};
use amur_utils::fill::interpolate_with_edges;
use amur_utils::stats::mean;
use chrono::{Days, NaiveDate};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::f64::consts::PI;

/// Precipitation above this counts as a rain day.
pub const RAIN_THRESHOLD: f64 = 0.01;

/// Whether targets may be imputed during gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Targets keep their gaps so incomplete windows can be rejected.
    Train,
    /// Every kept column is imputed.
    Inference,
}

pub struct FeatureAssembler<'a> {
    config: &'a PipelineConfig,
    contract: &'a FeatureContract,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(config: &'a PipelineConfig, contract: &'a FeatureContract) -> Self {
        FeatureAssembler { config, contract }
    }

    /// Build the gated wide table.
    pub fn assemble(&self, rows: &[StationDay], mode: Mode) -> Result<Frame> {
        let stations = self.station_frames(rows)?;
        let mut wide = self.pivot(stations)?;
        self.gate(&mut wide, mode);
        info!(
            "Assembled wide table: {} rows x {} columns ({:?} mode)",
            wide.len(),
            wide.names().len(),
            mode
        );
        Ok(wide)
    }

    /// Per-station feature tables, keyed by station id.
    pub fn station_frames(&self, rows: &[StationDay]) -> Result<BTreeMap<String, Frame>> {
        let encode = !self.contract.categorical.is_empty();
        let mut frames = BTreeMap::new();
        for (identifier, days) in group_by_station(rows) {
            let frame = station_frame(&days, encode.then_some(self.contract))?;
            frames.insert(identifier.to_string(), frame);
        }

        // the residual is re-centred on the level mean of every station
        let lagged_level = shift_name(LAG_FORECAST, HydroField::LevelMax.name());
        let all_lagged: Vec<Option<f64>> = frames
            .values()
            .filter_map(|f| f.column(&lagged_level))
            .flat_map(|c| c.iter().copied())
            .collect();
        let global_mean = mean(&all_lagged);

        for frame in frames.values_mut() {
            let residual = demodulation_residual(frame, &lagged_level, global_mean)?;
            frame.insert(DEMODULATION_RESIDUAL, residual)?;
        }
        debug!("Built feature tables for {} stations", frames.len());
        Ok(frames)
    }

    /// Suffix every column with its station id and outer-join on date.
    /// Stations outside the configured list are dropped.
    fn pivot(&self, mut stations: BTreeMap<String, Frame>) -> Result<Frame> {
        let mut renamed = Vec::new();
        for station in &self.config.all_stations {
            let Some(frame) = stations.remove(station) else {
                continue;
            };
            let mut wide = Frame::new(frame.dates().to_vec());
            for name in frame.names() {
                let values = frame.require(name)?.to_vec();
                let column = if name == HydroField::LevelMax.name() {
                    target_column(station)
                } else {
                    station_column(name, station)
                };
                wide.insert(column, values)?;
            }
            renamed.push(wide);
        }
        if !stations.is_empty() {
            debug!("Dropped {} unconfigured stations at pivot", stations.len());
        }
        Frame::outer_join(renamed)
    }

    /// Drop columns outside the contract, then impute incomplete ones.
    /// Targets always survive; in training mode they keep their gaps.
    fn gate(&self, wide: &mut Frame, mode: Mode) {
        let targets: BTreeSet<String> = self.config.targets().into_iter().collect();
        let before = wide.names().len();
        wide.retain_columns(|name| targets.contains(name) || self.contract.is_allowed(name));
        debug!("Gating dropped {} columns", before - wide.names().len());

        wide.map_columns(|name, column| {
            let incomplete = column.iter().any(Option::is_none);
            let is_target = targets.contains(name);
            if incomplete && (mode == Mode::Inference || !is_target) {
                *column = interpolate_with_edges(column);
            }
        });
    }
}

fn group_by_station(rows: &[StationDay]) -> BTreeMap<&str, BTreeMap<NaiveDate, &StationDay>> {
    let mut stations: BTreeMap<&str, BTreeMap<NaiveDate, &StationDay>> = BTreeMap::new();
    for row in rows {
        // later rows replace earlier ones for the same day
        stations
            .entry(row.identifier.as_str())
            .or_default()
            .insert(row.date, row);
    }
    stations
}

fn station_frame(days: &BTreeMap<NaiveDate, &StationDay>, contract: Option<&FeatureContract>) -> Result<Frame> {
    let dates: Vec<NaiveDate> = days.keys().copied().collect();
    let rows: Vec<&StationDay> = days.values().copied().collect();
    let mut frame = Frame::new(dates.clone());

    for field in HydroField::ALL {
        frame.insert(field.name(), rows.iter().map(|r| r.hydro.get(field)).collect())?;
    }
    for field in WeatherCode::ALL {
        frame.insert(field.name(), rows.iter().map(|r| r.codes.get(field)).collect())?;
    }
    for field in MeteoField::ALL {
        frame.insert(field.name(), rows.iter().map(|r| r.meteo.get(field)).collect())?;
    }

    if let Some(contract) = contract {
        for source in categorical_sources() {
            let encoded = frame
                .require(source)?
                .iter()
                .map(|v| v.map(|raw| contract.encode(source, raw)).transpose())
                .collect::<Result<Column>>()?;
            frame.insert(source, encoded)?;
        }
    }

    let angle = |d: &NaiveDate| 2.0 * PI * day_of_year(d) as f64 / 365.0;
    frame.insert(SIN_DAY_OF_YEAR, dates.iter().map(|d| Some(angle(d).sin())).collect())?;
    frame.insert(COS_DAY_OF_YEAR, dates.iter().map(|d| Some(angle(d).cos())).collect())?;
    frame.insert(DRY_DAYS, days_since_rain(frame.require(MeteoField::Precipitation.name())?))?;

    for source in lag_forecast_sources() {
        let lagged = lag(&dates, frame.require(source)?, LAG_FORECAST);
        frame.insert(shift_name(LAG_FORECAST, source), lagged)?;
    }
    for days_back in LAG_LONG {
        for source in lag_long_sources() {
            let lagged = lag(&dates, frame.require(source)?, days_back);
            frame.insert(shift_name(days_back, source), lagged)?;
        }
    }

    let lagged_level = frame
        .require(&shift_name(LAG_FORECAST, HydroField::LevelMax.name()))?
        .to_vec();
    let annual = periodic_component(&lagged_level, ANNUAL_PERIOD);
    let without_annual: Column = lagged_level
        .iter()
        .zip(&annual)
        .map(|(x, a)| Some((*x)? - (*a)?))
        .collect();
    frame.insert(DEMODULATION_365, annual)?;
    frame.insert(DEMODULATION_121, periodic_component(&without_annual, SEASONAL_PERIOD))?;

    for field in daily_meteo_fields() {
        let lagged = lag(&dates, frame.require(field.name())?, LAG_SHORT);
        frame.insert(shift_name(LAG_SHORT, field.name()), lagged)?;
    }

    for field in rolling_sources() {
        let lagged_name = shift_name(LAG_FORECAST, field.name());
        for window in ROLLING_WINDOWS {
            let current = rolling_mean(&dates, frame.require(field.name())?, window);
            frame.insert(accumulate_name(window, field.name()), current)?;
            if window != 45 {
                let lagged = rolling_mean(&dates, frame.require(&lagged_name)?, window);
                frame.insert(accumulate_name(window, &lagged_name), lagged)?;
            }
        }
    }

    let (exact, smoothed) = past_year(&dates, frame.require(HydroField::LevelMax.name())?);
    frame.insert(PAST_YEAR_LEVEL_3D, smoothed)?;
    frame.insert(PAST_YEAR_LEVEL, exact)?;
    Ok(frame)
}

fn demodulation_residual(frame: &Frame, lagged_level: &str, global_mean: Option<f64>) -> Result<Column> {
    let level = frame.require(lagged_level)?;
    let annual = frame.require(DEMODULATION_365)?;
    let seasonal = frame.require(DEMODULATION_121)?;
    Ok(level
        .iter()
        .zip(annual)
        .zip(seasonal)
        .map(|((x, a), s)| Some((*x)? - (*a)? - (*s)? + global_mean?))
        .collect())
}

/// Days since the last rain day; zero on a rain day and on the first row.
pub fn days_since_rain(precipitation: &[Option<f64>]) -> Column {
    let mut counter = 0.0;
    precipitation
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let rained = p.is_some_and(|p| p > RAIN_THRESHOLD);
            counter = if i == 0 || rained { 0.0 } else { counter + 1.0 };
            Some(counter)
        })
        .collect()
}

/// Value of the same series `days` calendar days earlier. Only earlier dates
/// of the series are consulted.
pub fn lag(dates: &[NaiveDate], values: &[Option<f64>], days: i64) -> Column {
    let position: HashMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    dates
        .iter()
        .map(|date| {
            let earlier = date.checked_sub_days(Days::new(days as u64))?;
            values[*position.get(&earlier)?]
        })
        .collect()
}

/// Mean over the trailing calendar window `(date - days, date]`, skipping
/// missing values. Dates must be sorted.
pub fn rolling_mean(dates: &[NaiveDate], values: &[Option<f64>], days: i64) -> Column {
    let mut first = 0;
    dates
        .iter()
        .enumerate()
        .map(|(i, date)| {
            while (*date - dates[first]).num_days() >= days {
                first += 1;
            }
            mean(&values[first..=i])
        })
        .collect()
}

/// Level on the same calendar day one year earlier, exact and as a
/// three-row centred mean. When two source days land on the same date
/// (Feb 28 and Feb 29), the later one wins.
pub fn past_year(dates: &[NaiveDate], level: &[Option<f64>]) -> (Column, Column) {
    let smoothed: Vec<Option<f64>> = (0..level.len())
        .map(|i| mean(&level[i.saturating_sub(1)..(i + 2).min(level.len())]))
        .collect();

    let mut shifted: HashMap<NaiveDate, (Option<f64>, Option<f64>)> = HashMap::new();
    for (i, date) in dates.iter().enumerate() {
        shifted.insert(add_one_year(date), (level[i], smoothed[i]));
    }
    dates
        .iter()
        .map(|d| shifted.get(d).copied().unwrap_or((None, None)))
        .unzip()
}

/// Contract over the features `rows` actually populate.
///
/// Starts from [`FeatureContract::full`] with the observed vocabulary and
/// drops every column that has no value at all after a training-mode
/// assembly, such as discharge or ice features of a post without those
/// files. Statistics computed over the same rows then cover the contract.
pub fn observed_contract(config: &PipelineConfig, rows: &[StationDay]) -> Result<FeatureContract> {
    let mut contract = FeatureContract::full(&config.all_stations, observed_vocabulary(rows));
    let wide = FeatureAssembler::new(config, &contract).assemble(rows, Mode::Train)?;
    let dropped = contract.retain_columns(|column| wide.coverage(column) > 0.0);
    if dropped > 0 {
        info!("Left {} empty columns out of the contract", dropped);
    }
    Ok(contract)
}

/// Dense vocabulary over every categorical code observed in `rows`, keyed
/// `"<field><code>"`. Indices follow key order.
pub fn observed_vocabulary(rows: &[StationDay]) -> BTreeMap<String, u32> {
    let mut keys = BTreeSet::new();
    for row in rows {
        let coded = std::iter::once((HydroField::WaterCode.name(), row.hydro.get(HydroField::WaterCode)))
            .chain(WeatherCode::ALL.map(|f| (f.name(), row.codes.get(f))));
        for (field, value) in coded {
            if let Some(raw) = value {
                keys.insert(format!("{}{}", field, raw.trunc() as i64));
            }
        }
    }
    keys.into_iter().zip(0u32..).collect()
}
