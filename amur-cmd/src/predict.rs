//! Inference-side commands: the input window and the level report.

use crate::output::{read_predictions, write_tensor};
use crate::sources::{join_archives, load_registry, parse_day, read_hydro, read_meteo};
use crate::train::stats_path;
use crate::{ContractArgs, DataArgs};
use amur_core::date_range::DateRange;
use amur_core::observation::StationDay;
use amur_core::station::Station;
use amur_core::{FeatureContract, NormalizationStats, PipelineConfig};
use amur_data::report::LevelReport;
use amur_data::{prepare_inputs, FeatureAssembler, Mode};
use chrono::{Days, Local, NaiveDate};
use log::{info, warn};
use std::path::Path;

/// Years of hydro history needed for the lag and past-year features.
const HYDRO_HISTORY_YEARS: u64 = 4;
/// Meteo history before the forecast window, in days.
const METEO_HISTORY_DAYS: u64 = 60;

/// File the merged provider forecasts are written to.
pub const FORECAST_FILE: &str = "full_weather.csv";

/// Provider API keys.
#[derive(Debug, Clone, Default)]
pub struct ForecastKeys {
    pub yandex: Option<String>,
    pub open_weather: Option<String>,
}

/// Date windows read for one prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionWindows {
    /// First forecast day
    pub from: NaiveDate,
    /// Day after the last forecast day
    pub to: NaiveDate,
    pub hydro: DateRange,
    pub meteo: DateRange,
}

impl PredictionWindows {
    pub fn new(from: NaiveDate, days_forecast: usize, today: NaiveDate) -> anyhow::Result<Self> {
        let days = days_forecast as u64;
        let shift_back = |n: u64| {
            from.checked_sub_days(Days::new(n))
                .ok_or_else(|| anyhow::anyhow!("{from} is too early for {n} days of history"))
        };
        let to = from
            .checked_add_days(Days::new(days))
            .ok_or_else(|| anyhow::anyhow!("{from} is too late for a {days}-day forecast"))?;
        let yesterday = today.pred_opt().unwrap_or(today);
        Ok(PredictionWindows {
            from,
            to,
            hydro: DateRange::new(shift_back(days + HYDRO_HISTORY_YEARS * 365 + 1)?, shift_back(1)?),
            meteo: DateRange::new(shift_back(days + METEO_HISTORY_DAYS)?, yesterday.min(to)),
        })
    }

    /// Whether the window reaches days the archives cannot hold yet.
    pub fn needs_forecast(&self, today: NaiveDate) -> bool {
        self.to >= today
    }
}

fn warn_if_stale(source: &str, last: Option<NaiveDate>, windows: &PredictionWindows) {
    if let Some(last) = last.filter(|last| *last < windows.hydro.end) {
        warn!(
            "The last date in {} is {} and the prediction period is {} - {}. \
             Update the historical {} data or results will be worse",
            source,
            last,
            windows.from,
            windows.to.pred_opt().unwrap_or(windows.to),
            source
        );
    }
}

pub async fn run_predict_inputs(
    data: &DataArgs,
    contract_args: &ContractArgs,
    from: &str,
    output: &Path,
    keys: &ForecastKeys,
) -> anyhow::Result<()> {
    let config = PipelineConfig::new(&data.datasets_path)?;
    let today = Local::now().date_naive();
    let windows = PredictionWindows::new(parse_day(from)?, config.days_forecast, today)?;
    let contract = FeatureContract::load(&contract_args.contract)?;
    let stats = NormalizationStats::load(&stats_path(&config, contract_args.stats.as_deref()))?;
    stats.ensure_covers(&contract.numerical)?;
    info!("Prediction. Period {} - {}", windows.from, windows.to);

    let registry = load_registry(data).await?;
    let hydro = read_hydro(&config, &windows.hydro)?;
    warn_if_stale("hydro", hydro.iter().map(|r| r.date).max(), &windows);
    let meteo = read_meteo(&config, &windows.meteo)?;
    warn_if_stale("meteo", meteo.iter().map(|r| r.date).max(), &windows);

    let (posts, mut rows) = join_archives(&registry, &config, hydro, meteo);
    if windows.needs_forecast(today) {
        info!("Use weather forecast");
        merge_provider_forecasts(&config, &posts, &mut rows, keys).await?;
        info!("rows after merge with forecast weather {}", rows.len());
    }

    let table = FeatureAssembler::new(&config, &contract).assemble(&rows, Mode::Inference)?;
    let inputs = prepare_inputs(&table, &contract, &stats, &config, windows.from, windows.to)?;
    write_tensor(output, &inputs)
}

#[cfg(feature = "api")]
async fn merge_provider_forecasts(
    config: &PipelineConfig,
    posts: &[Station],
    rows: &mut Vec<StationDay>,
    keys: &ForecastKeys,
) -> anyhow::Result<()> {
    use amur_data::forecast::{
        apply_forecasts, fetch_forecast, merge_forecasts, write_forecast_csv, OpenWeather, Yandex,
    };

    let (Some(yandex_key), Some(open_weather_key)) = (&keys.yandex, &keys.open_weather) else {
        warn!("Forecast keys are not set (YANDEX_KEY, OPEN_WEATHER_KEY); predicting without forecasts");
        return Ok(());
    };
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let yandex = Yandex::new(yandex_key);
    let open_weather = OpenWeather::new(open_weather_key);

    let mut merged = Vec::with_capacity(posts.len());
    for post in posts {
        let ya = fetch_forecast(&client, &yandex, &post.location).await?;
        let ow = fetch_forecast(&client, &open_weather, &post.location).await?;
        let days = merge_forecasts(&ya, &ow);
        apply_forecasts(rows, &post.id, &days);
        merged.push((post.id.clone(), days));
    }
    write_forecast_csv(&config.datasets_path.join(FORECAST_FILE), &merged)?;
    Ok(())
}

#[cfg(not(feature = "api"))]
async fn merge_provider_forecasts(
    _config: &PipelineConfig,
    _posts: &[Station],
    _rows: &mut Vec<StationDay>,
    _keys: &ForecastKeys,
) -> anyhow::Result<()> {
    warn!("Built without the `api` feature; predicting without forecasts");
    Ok(())
}

pub fn run_report(datasets_path: &Path, from: &str, predictions: &Path) -> anyhow::Result<()> {
    let config = PipelineConfig::new(datasets_path)?;
    let from = parse_day(from)?;
    let values = read_predictions(predictions)?;
    let report = LevelReport::from_predictions(&config, from, &values)?;
    report.write(&config.datasets_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_prediction_windows() {
        let windows = PredictionWindows::new(day(2020, 11, 1), 10, day(2021, 6, 1)).unwrap();
        assert_eq!(windows.to, day(2020, 11, 11));
        assert_eq!(windows.hydro.end, day(2020, 10, 31));
        assert_eq!(windows.hydro.len_days(), 10 + 4 * 365 + 1);
        assert_eq!(windows.meteo.start, day(2020, 8, 23));
        assert_eq!(windows.meteo.end, day(2020, 11, 11));
        assert!(!windows.needs_forecast(day(2021, 6, 1)));
    }

    #[test]
    fn test_meteo_window_stops_yesterday() {
        let windows = PredictionWindows::new(day(2021, 6, 1), 10, day(2021, 6, 3)).unwrap();
        assert_eq!(windows.meteo.end, day(2021, 6, 2));
        assert!(windows.needs_forecast(day(2021, 6, 3)));
    }

    #[test]
    fn test_report_command_writes_table() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = dir.path().join("preds.json");
        let values: Vec<Vec<f64>> = (0..10).map(|d| vec![d as f64; 33]).collect();
        std::fs::write(&predictions, serde_json::to_string(&values).unwrap()).unwrap();
        run_report(dir.path(), "2020-11-01", &predictions).unwrap();
        let table = std::fs::read_to_string(dir.path().join("level_2020-11-01_2020-11-10.csv")).unwrap();
        assert_eq!(table.lines().count(), 11);
        assert!(table.starts_with("date,05004,"));
    }
}
