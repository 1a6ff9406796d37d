//! Typed observation records.
//!
//! Each record family keeps its measured values in a fixed-size slot array
//! indexed by a field enum, so a record always carries exactly the fields of
//! its schema and a typo in a field name is a compile error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// A named field of a record family.
pub trait Field: Copy + 'static {
    /// Position of the field in the record's slot array.
    fn index(self) -> usize;
    /// Column name used in feature names and source files.
    fn name(self) -> &'static str;
}

/// Hydrological post fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HydroField {
    LevelMax,
    LevelMin,
    WaterTemp,
    WaterCode,
    IceThickness,
    SnowHeight,
    WaterFlow,
}

impl HydroField {
    pub const ALL: [HydroField; 7] = [
        HydroField::LevelMax,
        HydroField::LevelMin,
        HydroField::WaterTemp,
        HydroField::WaterCode,
        HydroField::IceThickness,
        HydroField::SnowHeight,
        HydroField::WaterFlow,
    ];
}

impl Field for HydroField {
    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            HydroField::LevelMax => "sealevel_max",
            HydroField::LevelMin => "sealevel_min",
            HydroField::WaterTemp => "water_temp",
            HydroField::WaterCode => "water_code",
            HydroField::IceThickness => "ice_thickness",
            HydroField::SnowHeight => "snow_height",
            HydroField::WaterFlow => "water_flow",
        }
    }
}

/// Continuous meteorological fields. These are kriged onto hydro posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeteoField {
    WindDirection,
    WindSpeed,
    MaxWindGustSpeed,
    Precipitation,
    SoilTemperature,
    AirTemperatureMin,
    AirTemperatureMax,
    RelativeHumidity,
    PressureSeaLevel,
    Pressure,
}

impl MeteoField {
    pub const ALL: [MeteoField; 10] = [
        MeteoField::WindDirection,
        MeteoField::WindSpeed,
        MeteoField::MaxWindGustSpeed,
        MeteoField::Precipitation,
        MeteoField::SoilTemperature,
        MeteoField::AirTemperatureMin,
        MeteoField::AirTemperatureMax,
        MeteoField::RelativeHumidity,
        MeteoField::PressureSeaLevel,
        MeteoField::Pressure,
    ];

    /// Look a field up by its source column name.
    pub fn from_name(name: &str) -> Option<MeteoField> {
        MeteoField::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl Field for MeteoField {
    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            MeteoField::WindDirection => "windDirection",
            MeteoField::WindSpeed => "windSpeed",
            MeteoField::MaxWindGustSpeed => "maximumWindGustSpeed",
            MeteoField::Precipitation => "totalAccumulatedPrecipitation",
            MeteoField::SoilTemperature => "soilTemperature",
            MeteoField::AirTemperatureMin => "airTemperature_min",
            MeteoField::AirTemperatureMax => "airTemperature_max",
            MeteoField::RelativeHumidity => "relativeHumidity",
            MeteoField::PressureSeaLevel => "pressureReducedToMeanSeaLevel",
            MeteoField::Pressure => "pressure",
        }
    }
}

/// Coded (categorical) weather fields. These take the nearest station's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherCode {
    CloudCover,
    PastWeather,
    PresentWeather,
}

impl WeatherCode {
    pub const ALL: [WeatherCode; 3] = [
        WeatherCode::CloudCover,
        WeatherCode::PastWeather,
        WeatherCode::PresentWeather,
    ];
}

impl Field for WeatherCode {
    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            WeatherCode::CloudCover => "cloudCoverTotal",
            WeatherCode::PastWeather => "pastWeather",
            WeatherCode::PresentWeather => "presentWeather",
        }
    }
}

/// Fixed-size value slots for one record family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Values<F, const N: usize> {
    slots: [Option<f64>; N],
    _field: PhantomData<F>,
}

impl<F: Field, const N: usize> Values<F, N> {
    pub fn get(&self, field: F) -> Option<f64> {
        self.slots[field.index()]
    }

    pub fn set(&mut self, field: F, value: Option<f64>) {
        self.slots[field.index()] = value;
    }

    /// Take every present value of `other`, keeping ours where `other` is missing.
    pub fn overlay(&mut self, other: &Self) {
        for (mine, theirs) in self.slots.iter_mut().zip(other.slots.iter()) {
            if theirs.is_some() {
                *mine = *theirs;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

impl<F, const N: usize> Default for Values<F, N> {
    fn default() -> Self {
        Values {
            slots: [None; N],
            _field: PhantomData,
        }
    }
}

pub type HydroValues = Values<HydroField, 7>;
pub type MeteoValues = Values<MeteoField, 10>;
pub type CodeValues = Values<WeatherCode, 3>;

/// One daily record from a hydrological post.
#[derive(Debug, Clone, PartialEq)]
pub struct HydroRecord {
    pub identifier: String,
    pub date: NaiveDate,
    pub values: HydroValues,
}

/// One daily record from a meteorological station.
#[derive(Debug, Clone, PartialEq)]
pub struct MeteoRecord {
    pub identifier: String,
    pub date: NaiveDate,
    pub codes: CodeValues,
    pub values: MeteoValues,
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// A meteo record carrying its station's location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedMeteo {
    pub record: MeteoRecord,
    pub location: Location,
}

/// Hydro post day joined with interpolated weather. Rows appended from
/// weather sources alone (dates past the hydro archive) have empty hydro
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct StationDay {
    pub identifier: String,
    pub date: NaiveDate,
    pub location: Option<Location>,
    pub hydro: HydroValues,
    pub codes: CodeValues,
    pub meteo: MeteoValues,
}

impl StationDay {
    pub fn from_hydro(record: HydroRecord, location: Location) -> Self {
        StationDay {
            identifier: record.identifier,
            date: record.date,
            location: Some(location),
            hydro: record.values,
            codes: CodeValues::default(),
            meteo: MeteoValues::default(),
        }
    }

    /// A weather-only row for a station and day.
    pub fn weather_only(identifier: &str, date: NaiveDate, meteo: MeteoValues) -> Self {
        StationDay {
            identifier: identifier.to_string(),
            date,
            location: None,
            hydro: HydroValues::default(),
            codes: CodeValues::default(),
            meteo,
        }
    }
}
