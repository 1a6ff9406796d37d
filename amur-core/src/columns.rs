//! Feature column naming.
//!
//! Every per-station feature produced by the assembler has a base name
//! (`shift_10_days_sealevel_max`, `accumulate_3_days_relativeHumidity_sum`,
//! ...). In the wide table each base name is suffixed with `_<station_id>`.
//! The names are part of the frozen model contract.

use crate::observation::{Field, HydroField, MeteoField, WeatherCode};

pub const SIN_DAY_OF_YEAR: &str = "sin_day_of_year";
pub const COS_DAY_OF_YEAR: &str = "cos_day_of_year";
pub const DRY_DAYS: &str = "perc_days";
pub const DEMODULATION_365: &str = "demodule_365_sealevel_max";
pub const DEMODULATION_121: &str = "demodule_121_sealevel_max";
pub const DEMODULATION_RESIDUAL: &str = "demodule_diff";
pub const PAST_YEAR_LEVEL: &str = "past_year_sealevel_max";
pub const PAST_YEAR_LEVEL_3D: &str = "past_year_sealevel_max_3D";

/// Lag horizons in days.
pub const LAG_SHORT: i64 = 1;
pub const LAG_FORECAST: i64 = 10;
pub const LAG_LONG: [i64; 2] = [20, 30];

/// Trailing windows (calendar days) for rolling means.
pub const ROLLING_WINDOWS: [i64; 3] = [7, 3, 45];

/// Coded fields mapped through the category vocabulary.
pub fn categorical_sources() -> [&'static str; 4] {
    [
        HydroField::WaterCode.name(),
        WeatherCode::PresentWeather.name(),
        WeatherCode::PastWeather.name(),
        WeatherCode::CloudCover.name(),
    ]
}

/// Columns lagged by 10 days.
pub fn lag_forecast_sources() -> Vec<&'static str> {
    vec![
        HydroField::LevelMax.name(),
        HydroField::IceThickness.name(),
        HydroField::SnowHeight.name(),
        HydroField::WaterFlow.name(),
        HydroField::WaterCode.name(),
        HydroField::WaterTemp.name(),
        WeatherCode::PastWeather.name(),
        WeatherCode::PresentWeather.name(),
        WeatherCode::CloudCover.name(),
        MeteoField::WindDirection.name(),
        MeteoField::WindSpeed.name(),
        MeteoField::MaxWindGustSpeed.name(),
        MeteoField::Precipitation.name(),
        MeteoField::SoilTemperature.name(),
        MeteoField::AirTemperatureMin.name(),
        MeteoField::AirTemperatureMax.name(),
        MeteoField::RelativeHumidity.name(),
        MeteoField::Pressure.name(),
        SIN_DAY_OF_YEAR,
        COS_DAY_OF_YEAR,
    ]
}

/// Hydro columns lagged by 20 and 30 days.
pub fn lag_long_sources() -> [&'static str; 5] {
    [
        HydroField::LevelMax.name(),
        HydroField::IceThickness.name(),
        HydroField::SnowHeight.name(),
        HydroField::WaterFlow.name(),
        HydroField::WaterTemp.name(),
    ]
}

/// Meteo fields used both as same-day features and lagged by one day.
pub fn daily_meteo_fields() -> [MeteoField; 7] {
    [
        MeteoField::WindDirection,
        MeteoField::WindSpeed,
        MeteoField::Precipitation,
        MeteoField::AirTemperatureMin,
        MeteoField::AirTemperatureMax,
        MeteoField::RelativeHumidity,
        MeteoField::Pressure,
    ]
}

/// Fields averaged over trailing windows.
pub fn rolling_sources() -> [MeteoField; 2] {
    [MeteoField::RelativeHumidity, MeteoField::Precipitation]
}

pub fn shift_name(days: i64, column: &str) -> String {
    format!("shift_{days}_days_{column}")
}

pub fn accumulate_name(days: i64, column: &str) -> String {
    format!("accumulate_{days}_days_{column}_sum")
}

/// Wide-table name of a station's feature.
pub fn station_column(feature: &str, station: &str) -> String {
    format!("{feature}_{station}")
}

/// Wide-table name of a station's target (the daily max level).
pub fn target_column(station: &str) -> String {
    station_column(HydroField::LevelMax.name(), station)
}

/// Categorical per-station features: the 10-day lags of the coded fields.
pub fn categorical_station_features() -> Vec<String> {
    categorical_sources()
        .iter()
        .map(|c| shift_name(LAG_FORECAST, c))
        .collect()
}

/// Every per-station feature the assembler produces, in a stable order.
pub fn station_features() -> Vec<String> {
    let mut features = vec![SIN_DAY_OF_YEAR.to_string(), COS_DAY_OF_YEAR.to_string()];
    features.push(DRY_DAYS.to_string());
    for column in lag_forecast_sources() {
        features.push(shift_name(LAG_FORECAST, column));
    }
    for days in LAG_LONG {
        for column in lag_long_sources() {
            features.push(shift_name(days, column));
        }
    }
    features.extend([
        DEMODULATION_365.to_string(),
        DEMODULATION_121.to_string(),
        DEMODULATION_RESIDUAL.to_string(),
    ]);
    for field in daily_meteo_fields() {
        features.push(shift_name(LAG_SHORT, field.name()));
    }
    for field in daily_meteo_fields() {
        features.push(field.name().to_string());
    }
    for field in rolling_sources() {
        for days in ROLLING_WINDOWS {
            features.push(accumulate_name(days, field.name()));
            if days != 45 {
                let lagged = shift_name(LAG_FORECAST, field.name());
                features.push(accumulate_name(days, &lagged));
            }
        }
    }
    features.push(PAST_YEAR_LEVEL_3D.to_string());
    features.push(PAST_YEAR_LEVEL.to_string());
    features
}
