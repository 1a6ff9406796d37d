//! Weather forecast providers and their reconciliation.
//!
//! Two providers are normalised to the same daily field set: Yandex.Weather
//! (7 days, reported in day parts) and OpenWeather (10 days). The merged
//! forecast follows the OpenWeather dates; Yandex fills in where it has
//! the day.

use amur_core::observation::{Field, MeteoField, MeteoValues, StationDay};
use amur_core::{PipelineError, Result};
use amur_utils::dates::format_date;
use amur_utils::stats::median;
use chrono::{DateTime, NaiveDate};
use csv::Writer;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "api")]
use amur_core::observation::Location;
#[cfg(feature = "api")]
use reqwest::{Client, RequestBuilder};

pub const YANDEX_URL: &str = "https://api.weather.yandex.ru/v2/forecast";
pub const OPEN_WEATHER_URL: &str = "https://community-open-weather-map.p.rapidapi.com/forecast/daily";
pub const OPEN_WEATHER_HOST: &str = "community-open-weather-map.p.rapidapi.com";

/// Fields a forecast provides.
pub const FORECAST_FIELDS: [MeteoField; 7] = [
    MeteoField::AirTemperatureMax,
    MeteoField::AirTemperatureMin,
    MeteoField::Precipitation,
    MeteoField::RelativeHumidity,
    MeteoField::WindSpeed,
    MeteoField::WindDirection,
    MeteoField::Pressure,
];

/// Fields reconciled by taking the larger of the two forecasts.
const MAX_FIELDS: [MeteoField; 4] = [
    MeteoField::AirTemperatureMax,
    MeteoField::Precipitation,
    MeteoField::RelativeHumidity,
    MeteoField::Pressure,
];

/// Fields reconciled by taking the smaller of the two forecasts.
const MIN_FIELDS: [MeteoField; 1] = [MeteoField::AirTemperatureMin];

/// Fields taken from Yandex when present, else from OpenWeather.
const WIND_FIELDS: [MeteoField; 2] = [MeteoField::WindSpeed, MeteoField::WindDirection];

/// One forecast day normalised to the meteo archive's field names.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub values: MeteoValues,
}

/// A weather forecast service.
pub trait ForecastProvider {
    fn name(&self) -> &'static str;

    /// Normalise a response body into daily forecasts.
    fn parse(&self, body: &str) -> Result<Vec<DailyForecast>>;

    /// The forecast request for a location.
    #[cfg(feature = "api")]
    fn request(&self, client: &Client, location: &Location) -> RequestBuilder;
}

/// Fetch and normalise a provider's forecast for a location.
#[cfg(feature = "api")]
pub async fn fetch_forecast<P: ForecastProvider>(
    client: &Client,
    provider: &P,
    location: &Location,
) -> Result<Vec<DailyForecast>> {
    info!(
        "GET {} forecast for lat={} lon={}",
        provider.name(),
        location.lat,
        location.lon
    );
    let body = provider
        .request(client, location)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    provider.parse(&body)
}

/// Compass point to degrees. Unknown points (e.g. calm) have no direction.
pub fn wind_degrees(compass: &str) -> Option<f64> {
    match compass {
        "n" => Some(0.0),
        "ne" => Some(45.0),
        "e" => Some(90.0),
        "se" => Some(135.0),
        "s" => Some(180.0),
        "sw" => Some(225.0),
        "w" => Some(270.0),
        "nw" => Some(315.0),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct YandexResponse {
    forecasts: Vec<YandexDay>,
}

#[derive(Debug, Deserialize)]
struct YandexDay {
    date: NaiveDate,
    parts: YandexParts,
}

#[derive(Debug, Deserialize)]
struct YandexParts {
    evening: YandexPart,
    morning: YandexPart,
    night: YandexPart,
    day: YandexPart,
}

#[derive(Debug, Deserialize)]
struct YandexPart {
    temp_min: f64,
    temp_max: f64,
    prec_mm: f64,
    humidity: Option<f64>,
    wind_speed: Option<f64>,
    pressure_pa: Option<f64>,
    wind_dir: String,
}

/// Yandex.Weather daily forecast.
#[derive(Debug, Clone)]
pub struct Yandex {
    pub key: String,
    pub url: String,
}

impl Yandex {
    pub fn new(key: &str) -> Self {
        Yandex {
            key: key.to_string(),
            url: YANDEX_URL.to_string(),
        }
    }
}

impl ForecastProvider for Yandex {
    fn name(&self) -> &'static str {
        "yandex"
    }

    /// Day parts are combined: lowest minimum and highest maximum
    /// temperature, summed precipitation, highest humidity, mean wind speed
    /// and pressure, median wind direction.
    fn parse(&self, body: &str) -> Result<Vec<DailyForecast>> {
        let response: YandexResponse = serde_json::from_str(body)?;
        let forecasts = response
            .forecasts
            .into_iter()
            .map(|day| {
                let p = &day.parts;
                let parts = [&p.evening, &p.morning, &p.night, &p.day];
                let count = parts.len() as f64;

                let temp_min = parts.iter().fold(100.0, |acc: f64, part| acc.min(part.temp_min));
                let temp_max = parts.iter().fold(-100.0, |acc: f64, part| acc.max(part.temp_max));
                let precipitation: f64 = parts.iter().map(|part| part.prec_mm).sum();
                let humidity = parts
                    .iter()
                    .map(|part| part.humidity.unwrap_or(0.0))
                    .fold(f64::NEG_INFINITY, f64::max);
                let wind_speed = parts.iter().map(|part| part.wind_speed.unwrap_or(0.0)).sum::<f64>() / count;
                let pressure = parts.iter().map(|part| part.pressure_pa.unwrap_or(1002.0)).sum::<f64>() / count;
                let directions: Vec<f64> = parts.iter().filter_map(|part| wind_degrees(&part.wind_dir)).collect();

                let mut values = MeteoValues::default();
                values.set(MeteoField::AirTemperatureMin, Some(temp_min));
                values.set(MeteoField::AirTemperatureMax, Some(temp_max));
                values.set(MeteoField::Precipitation, Some(precipitation));
                values.set(MeteoField::RelativeHumidity, Some(humidity));
                values.set(MeteoField::WindSpeed, Some(wind_speed));
                values.set(MeteoField::Pressure, Some(pressure));
                values.set(MeteoField::WindDirection, median(&directions));
                DailyForecast { date: day.date, values }
            })
            .collect();
        Ok(forecasts)
    }

    #[cfg(feature = "api")]
    fn request(&self, client: &Client, location: &Location) -> RequestBuilder {
        client
            .get(&self.url)
            .header("X-Yandex-API-Key", &self.key)
            .query(&[
                ("lat", location.lat.to_string()),
                ("lon", location.lon.to_string()),
                ("extra", "true".to_string()),
            ])
    }
}

#[derive(Debug, Deserialize)]
struct OpenWeatherResponse {
    list: Vec<OpenWeatherDay>,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherTemp {
    min: f64,
    max: f64,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherDay {
    dt: i64,
    temp: OpenWeatherTemp,
    humidity: Option<f64>,
    speed: Option<f64>,
    deg: Option<f64>,
    pressure: Option<f64>,
    #[serde(default)]
    rain: f64,
    #[serde(default)]
    snow: f64,
}

/// OpenWeather daily forecast (via RapidAPI).
#[derive(Debug, Clone)]
pub struct OpenWeather {
    pub key: String,
    pub url: String,
    pub host: String,
}

impl OpenWeather {
    pub fn new(key: &str) -> Self {
        OpenWeather {
            key: key.to_string(),
            url: OPEN_WEATHER_URL.to_string(),
            host: OPEN_WEATHER_HOST.to_string(),
        }
    }
}

impl ForecastProvider for OpenWeather {
    fn name(&self) -> &'static str {
        "openweather"
    }

    /// The forecast date is the UTC date of the `dt` timestamp.
    fn parse(&self, body: &str) -> Result<Vec<DailyForecast>> {
        let response: OpenWeatherResponse = serde_json::from_str(body)?;
        let mut forecasts = Vec::with_capacity(response.list.len());
        for day in response.list {
            let date = DateTime::from_timestamp(day.dt, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| PipelineError::InvalidConfig(format!("forecast timestamp {} out of range", day.dt)))?;
            let mut values = MeteoValues::default();
            values.set(MeteoField::AirTemperatureMin, Some(day.temp.min));
            values.set(MeteoField::AirTemperatureMax, Some(day.temp.max));
            values.set(MeteoField::Precipitation, Some(day.rain + day.snow));
            values.set(MeteoField::RelativeHumidity, day.humidity);
            values.set(MeteoField::WindSpeed, day.speed);
            values.set(MeteoField::WindDirection, day.deg);
            values.set(MeteoField::Pressure, day.pressure);
            forecasts.push(DailyForecast { date, values });
        }
        Ok(forecasts)
    }

    #[cfg(feature = "api")]
    fn request(&self, client: &Client, location: &Location) -> RequestBuilder {
        client
            .get(&self.url)
            .header("x-rapidapi-key", &self.key)
            .header("x-rapidapi-host", &self.host)
            .query(&[
                ("lat", location.lat.to_string()),
                ("lon", location.lon.to_string()),
                ("cnt", "10".to_string()),
                ("units", "metric".to_string()),
                ("mode", "JSON".to_string()),
                ("lang", "ru".to_string()),
            ])
    }
}

fn combine(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

/// Reconcile the two forecasts into one per OpenWeather date.
///
/// Temperature maximum, precipitation, humidity and pressure take the larger
/// value, temperature minimum the smaller; wind speed and direction come
/// from Yandex, falling back to OpenWeather where Yandex has nothing.
/// OpenWeather dates without a Yandex day keep the OpenWeather values.
pub fn merge_forecasts(yandex: &[DailyForecast], open_weather: &[DailyForecast]) -> Vec<DailyForecast> {
    let by_date: HashMap<NaiveDate, &MeteoValues> = yandex.iter().map(|f| (f.date, &f.values)).collect();
    open_weather
        .iter()
        .map(|ow| {
            let ya = by_date.get(&ow.date);
            let field = |f: MeteoField| ya.and_then(|v| v.get(f));
            let mut values = MeteoValues::default();
            for f in MAX_FIELDS {
                values.set(f, combine(field(f), ow.values.get(f), f64::max));
            }
            for f in MIN_FIELDS {
                values.set(f, combine(field(f), ow.values.get(f), f64::min));
            }
            for f in WIND_FIELDS {
                values.set(f, field(f).or(ow.values.get(f)));
            }
            DailyForecast { date: ow.date, values }
        })
        .collect()
}

/// Put a station's forecast into the joined station table.
///
/// A forecast day that already has a row replaces that row's forecast
/// fields; other days are appended as weather-only rows. The table is
/// re-sorted by (identifier, date).
pub fn apply_forecasts(rows: &mut Vec<StationDay>, identifier: &str, forecasts: &[DailyForecast]) {
    let index: HashMap<NaiveDate, usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.identifier == identifier)
        .map(|(i, r)| (r.date, i))
        .collect();
    let mut appended = 0;
    for forecast in forecasts {
        match index.get(&forecast.date) {
            Some(&i) => rows[i].meteo.overlay(&forecast.values),
            None => {
                rows.push(StationDay::weather_only(identifier, forecast.date, forecast.values));
                appended += 1;
            }
        }
    }
    if appended > 0 {
        info!("Appended {} forecast days for {}", appended, identifier);
    }
    rows.sort_by(|a, b| (&a.identifier, a.date).cmp(&(&b.identifier, b.date)));
}

/// Write merged forecasts of every station as CSV
/// (`identifier,date,<forecast fields>`).
pub fn write_forecast_csv(path: &Path, forecasts: &[(String, Vec<DailyForecast>)]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    let mut header = vec!["identifier", "date"];
    header.extend(FORECAST_FIELDS.iter().map(|f| f.name()));
    writer.write_record(&header)?;
    for (identifier, days) in forecasts {
        if days.is_empty() {
            warn!("No forecast days for {}", identifier);
        }
        for day in days {
            let mut record = vec![identifier.clone(), format_date(&day.date)];
            record.extend(
                FORECAST_FIELDS
                    .iter()
                    .map(|f| day.values.get(*f).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))
}
