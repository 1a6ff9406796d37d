//! End-to-end scenarios across readers, interpolation, assembly and windowing.

use amur_core::columns::shift_name;
use amur_core::config::FeatureStats;
use amur_core::date_range::DateRange;
use amur_core::observation::{
    CodeValues, Field, HydroField, HydroValues, Location, MeteoField, MeteoValues, StationDay, WeatherCode,
};
use amur_core::{FeatureContract, NormalizationStats, PipelineConfig};
use amur_data::demodulation::periodic_component;
use amur_data::features::{observed_contract, observed_vocabulary};
use amur_data::tensor::compute_stats;
use amur_data::forecast::{merge_forecasts, DailyForecast};
use amur_data::hydro::read_hydro_all;
use amur_data::interpolation::{interpolate_field, merge_hydro_meteo};
use amur_data::meteo::read_meteo_all;
use amur_data::registry::{locate_hydro, locate_meteo, StationRegistry};
use amur_data::{train_test_split, FeatureAssembler, Mode};
use chrono::{Days, NaiveDate};
use std::f64::consts::PI;
use std::fs;
use tempfile::TempDir;

const REGISTRY: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"properties": {"gidro": "A", "ktoCategory": "post_gidro", "lat": 50.0, "lon": 128.0}},
        {"properties": {"gidro": "B", "ktoCategory": "post_gidro", "lat": 51.0, "lon": 130.0}},
        {"properties": {"meteo": "M1", "ktoCategory": "meteo_station", "lat": 50.5, "lon": 127.0}},
        {"properties": {"meteo": "M2", "ktoCategory": "meteo_station", "lat": 51.5, "lon": 131.0}}
    ]
}"#;

const OBSERVED: [&str; 12] = [
    "cloudCoverTotal",
    "pastWeather",
    "presentWeather",
    "windDirection",
    "windSpeed",
    "maximumWindGustSpeed",
    "totalAccumulatedPrecipitation",
    "soilTemperature",
    "airTemperature",
    "relativeHumidity",
    "pressureReducedToMeanSeaLevel",
    "pressure",
];

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap() + Days::new(offset)
}

fn level_a(i: u64) -> f64 {
    300.0 + (i % 10) as f64
}

fn write_archives(dir: &TempDir, days: u64) {
    let hydro = dir.path().join("hydro");
    let meteo = dir.path().join("meteo_new");
    fs::create_dir_all(&hydro).unwrap();
    fs::create_dir_all(&meteo).unwrap();

    let level_b = |i: u64| 150.0 + i as f64;
    for (id, level) in [("A", level_a as fn(u64) -> f64), ("B", level_b as fn(u64) -> f64)] {
        let mut body = String::from("header\nunits\n");
        for i in 0..days {
            let l = level(i);
            body.push_str(&format!(
                "{};{};{};{};4.5;open;\n",
                day(i).format("%d.%m.%Y"),
                l,
                l - 1.0,
                l
            ));
        }
        fs::write(hydro.join(format!("{id}_daily.csv")), body).unwrap();
    }

    let mut header = vec!["localYear", "localMonth", "localDay", "localTimePeriod"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    for c in OBSERVED {
        header.push(c.to_string());
        header.push(format!("{c}Quality"));
    }
    for (id, offset) in [("M1", 0.0), ("M2", 1.0)] {
        let mut body = header.join(",");
        for i in 0..days {
            let date = day(i);
            for hour in [0, 12] {
                let value = 5.0 + (i % 7) as f64 + offset;
                let mut cells = vec![
                    date.format("%Y").to_string(),
                    date.format("%-m").to_string(),
                    date.format("%-d").to_string(),
                    hour.to_string(),
                ];
                for _ in OBSERVED {
                    cells.push(value.to_string());
                    cells.push("0".to_string());
                }
                body.push('\n');
                body.push_str(&cells.join(","));
            }
        }
        body.push('\n');
        fs::write(meteo.join(format!("{id}.csv")), body).unwrap();
    }
}

fn joined_rows(config: &PipelineConfig, range: &DateRange) -> Vec<StationDay> {
    let hydro = read_hydro_all(config, range).unwrap();
    let meteo = read_meteo_all(config, range).unwrap();
    let registry = StationRegistry::from_geojson(REGISTRY).unwrap();
    let posts = registry.hydro_stations(config);
    let meteo_stations = registry.meteo_stations(["M1", "M2"]);
    merge_hydro_meteo(
        locate_hydro(hydro, &posts),
        &locate_meteo(meteo, &meteo_stations),
        &posts,
    )
}

fn unit_stats(contract: &FeatureContract) -> NormalizationStats {
    let mut stats = NormalizationStats::default();
    for name in &contract.numerical {
        stats.0.insert(name.clone(), FeatureStats { mean: 0.0, std: 1.0 });
    }
    stats
}

/// A fully populated synthetic row.
fn synthetic_day(id: &str, offset: u64, level: Option<f64>) -> StationDay {
    let mut hydro = HydroValues::default();
    for field in HydroField::ALL {
        hydro.set(field, Some(1.0 + offset as f64));
    }
    hydro.set(HydroField::WaterCode, Some(2.0));
    hydro.set(HydroField::LevelMax, level);
    let mut codes = CodeValues::default();
    for field in WeatherCode::ALL {
        codes.set(field, Some((offset % 3) as f64));
    }
    let mut meteo = MeteoValues::default();
    for field in MeteoField::ALL {
        meteo.set(field, Some((offset % 5) as f64));
    }
    StationDay {
        identifier: id.to_string(),
        date: day(offset),
        location: None,
        hydro,
        codes,
        meteo,
    }
}

#[test]
fn test_archives_to_training_tensors() {
    let dir = TempDir::new().unwrap();
    write_archives(&dir, 60);
    let config = PipelineConfig::with_stations(dir.path(), vec!["A".into(), "B".into()]).unwrap();
    let range = DateRange::new(day(0), day(59));
    assert_eq!(read_hydro_all(&config, &range).unwrap().len(), 120);

    let rows = joined_rows(&config, &range);
    assert_eq!(rows.len(), 120);
    assert!(rows.iter().all(|r| r.meteo.get(MeteoField::Pressure).is_some()));

    let contract = FeatureContract::full(&config.all_stations, observed_vocabulary(&rows));
    let table = FeatureAssembler::new(&config, &contract)
        .assemble(&rows, Mode::Train)
        .unwrap();
    assert_eq!(table.len(), 60);

    let stats = unit_stats(&contract);
    let split = train_test_split(&table, &contract, &stats, &config, day(60), day(70)).unwrap();
    let n_features = contract.input_columns().len();
    assert_eq!(split.x_train.shape(), &[49, 10, n_features]);
    assert_eq!(split.y_train.shape(), &[49, 10, 2]);
    assert_eq!(split.x_test.shape(), &[0, 10, n_features]);
    assert_eq!(split.y_train[[0, 3, 0]], level_a(3) as f32);
    assert_eq!(split.y_train[[5, 0, 1]], 155.0);
}

#[test]
fn test_statistics_cover_contract_without_optional_files() {
    let dir = TempDir::new().unwrap();
    write_archives(&dir, 60);
    // discharge for A only; no post has ice records
    let mut discharge = String::from("header\nunits\n");
    for i in 0..60 {
        discharge.push_str(&format!("{};{};\n", day(i).format("%d.%m.%Y"), 1000.0 + i as f64));
    }
    fs::write(dir.path().join("hydro").join("A_disch_d.csv"), discharge).unwrap();

    let config = PipelineConfig::with_stations(dir.path(), vec!["A".into(), "B".into()]).unwrap();
    let rows = joined_rows(&config, &DateRange::new(day(0), day(59)));

    let contract = observed_contract(&config, &rows).unwrap();
    assert!(contract.is_allowed("shift_10_days_water_flow_A"));
    assert!(!contract.is_allowed("shift_10_days_water_flow_B"));
    assert!(!contract.is_allowed("shift_10_days_ice_thickness_A"));
    assert!(!contract.is_allowed("shift_20_days_snow_height_B"));
    assert!(contract.is_allowed("shift_10_days_sealevel_max_B"));
    assert!(contract.is_allowed("shift_10_days_water_code_A"));

    let table = FeatureAssembler::new(&config, &contract)
        .assemble(&rows, Mode::Train)
        .unwrap();
    let stats = compute_stats(&table.filter_rows(|d| *d < day(50)), &contract).unwrap();
    stats.ensure_covers(&contract.numerical).unwrap();

    let split = train_test_split(&table, &contract, &stats, &config, day(50), day(60)).unwrap();
    assert!(split.x_train.shape()[0] > 0);
    assert_eq!(split.x_train.shape()[2], contract.input_columns().len());
}

#[test]
fn test_windows_require_complete_targets() {
    let config = PipelineConfig::with_stations("/data", vec!["A".into(), "B".into()]).unwrap();
    let mut rows = Vec::new();
    for offset in 0..60 {
        rows.push(synthetic_day("A", offset, Some(100.0)));
        let level = (offset != 30).then_some(200.0);
        rows.push(synthetic_day("B", offset, level));
    }
    let contract = FeatureContract::full(&config.all_stations, observed_vocabulary(&rows));
    let table = FeatureAssembler::new(&config, &contract)
        .assemble(&rows, Mode::Train)
        .unwrap();
    assert_eq!(table.column("sealevel_max_B").unwrap()[30], None);

    let split = train_test_split(&table, &contract, &unit_stats(&contract), &config, day(60), day(60)).unwrap();
    // 49 candidates, of which those starting at 21..=30 cover the gap
    assert_eq!(split.x_train.shape()[0], 39);
    assert!(split.y_train.iter().all(|v| v.is_finite()));
}

#[test]
fn test_lags_never_look_ahead() {
    let config = PipelineConfig::with_stations("/data", vec!["A".into()]).unwrap();
    let rows: Vec<StationDay> = (0..80)
        .filter(|o| *o != 15 && *o != 41)
        .map(|o| synthetic_day("A", o, Some(10.0 * o as f64)))
        .collect();
    let contract = FeatureContract::full(&config.all_stations, observed_vocabulary(&rows));
    let frames = FeatureAssembler::new(&config, &contract).station_frames(&rows).unwrap();
    let frame = &frames["A"];
    let source = frame.column(HydroField::LevelMax.name()).unwrap();
    let dates = frame.dates();

    for k in [1, 10, 20, 30] {
        let lagged = frame.column(&shift_name(k, HydroField::LevelMax.name()));
        let Some(lagged) = lagged else {
            // level is lagged at 10, 20 and 30 days only
            assert_eq!(k, 1);
            continue;
        };
        for (i, date) in dates.iter().enumerate() {
            let earlier = *date - Days::new(k as u64);
            let expected = dates.iter().position(|d| *d == earlier).and_then(|j| source[j]);
            assert_eq!(lagged[i], expected, "lag {k} on {date}");
        }
    }
    let lagged_humidity = frame.column(&shift_name(1, MeteoField::RelativeHumidity.name())).unwrap();
    let position = dates.iter().position(|d| *d == day(16)).unwrap();
    assert_eq!(lagged_humidity[position], None);
}

#[test]
fn test_forecast_merge_takes_max_and_wind_fallback() {
    let date = day(0);
    let mut a = MeteoValues::default();
    a.set(MeteoField::AirTemperatureMax, Some(10.0));
    let mut b = MeteoValues::default();
    b.set(MeteoField::AirTemperatureMax, Some(15.0));
    b.set(MeteoField::WindSpeed, Some(5.0));

    let merged = merge_forecasts(
        &[DailyForecast { date, values: a }],
        &[DailyForecast { date, values: b }],
    );
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].values.get(MeteoField::AirTemperatureMax), Some(15.0));
    assert_eq!(merged[0].values.get(MeteoField::WindSpeed), Some(5.0));
}

#[test]
fn test_constant_field_broadcasts_exactly() {
    let v = 1013.25;
    let points = vec![
        (Location { lat: 50.0, lon: 127.0 }, v),
        (Location { lat: 48.0, lon: 135.0 }, v),
        (Location { lat: 53.0, lon: 126.0 }, v),
    ];
    let targets = [Location { lat: 49.0, lon: 131.0 }, Location { lat: 60.0, lon: 100.0 }];
    assert_eq!(interpolate_field(&points, &targets), vec![Some(v), Some(v)]);
}

#[test]
fn test_demodulation_recovers_short_period() {
    let signal: Vec<f64> = (0..40).map(|i| 3.0 * (2.0 * PI * i as f64 / 10.0).sin()).collect();
    let input: Vec<Option<f64>> = signal.iter().map(|v| Some(v + 250.0)).collect();
    let first = periodic_component(&input, 10);
    let second = periodic_component(&input, 10);
    assert_eq!(first, second);

    let recovered: Vec<f64> = first.iter().map(|v| v.unwrap() - 250.0).collect();
    let n = signal.len() as f64;
    let (ms, mr) = (signal.iter().sum::<f64>() / n, recovered.iter().sum::<f64>() / n);
    let cov: f64 = signal.iter().zip(&recovered).map(|(s, r)| (s - ms) * (r - mr)).sum();
    let vs: f64 = signal.iter().map(|s| (s - ms).powi(2)).sum();
    let vr: f64 = recovered.iter().map(|r| (r - mr).powi(2)).sum();
    assert!(cov / (vs * vr).sqrt() > 0.95);
}
