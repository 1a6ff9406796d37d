//! Command implementations for the Amur level CLI.
//!
//! Each subcommand loads the archives under the datasets path, runs the
//! pipeline stages it needs and writes its artifacts as JSON or CSV.

use clap::{Args, Subcommand};
use std::path::PathBuf;

pub mod output;
pub mod predict;
pub mod sources;
pub mod train;

/// Paths shared by every data-reading command.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Root directory holding `hydro/` and `meteo_new/`
    #[arg(short = 'd', long, env = "AMUR_DATASETS_PATH", default_value = "/data")]
    pub datasets_path: PathBuf,

    /// Station registry GeoJSON; downloaded when omitted (requires the `api` feature)
    #[arg(long)]
    pub registry: Option<PathBuf>,
}

/// Frozen model contract shared by the tensor commands.
#[derive(Args, Debug, Clone)]
pub struct ContractArgs {
    /// Feature allow-lists and category vocabulary (JSON)
    #[arg(short = 'c', long)]
    pub contract: PathBuf,

    /// Normalization statistics; defaults to `mean_std_stats.json` in the datasets path
    #[arg(short = 's', long)]
    pub stats: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build training and test tensors
    TrainSet {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        contract: ContractArgs,

        /// First day of the test period (YYYY-MM-DD)
        #[arg(long)]
        test_start: String,

        /// Day after the test period (YYYY-MM-DD)
        #[arg(long, default_value = "2021-01-01")]
        test_end: String,

        /// Directory for X_train/y_train/X_test/y_test JSON files
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },

    /// Build the model input window for a 10-day forecast
    PredictInputs {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        contract: ContractArgs,

        /// First forecast day (YYYY-MM-DD)
        #[arg(short = 'f', long)]
        from: String,

        /// Output path for the input tensor JSON
        #[arg(short = 'o', long, default_value = "inputs.json")]
        output: PathBuf,

        /// Yandex weather API key
        #[arg(long, env = "YANDEX_KEY", hide_env_values = true)]
        yandex_key: Option<String>,

        /// OpenWeather (RapidAPI) key
        #[arg(long, env = "OPEN_WEATHER_KEY", hide_env_values = true)]
        open_weather_key: Option<String>,
    },

    /// Compute normalization statistics over the training period
    Stats {
        #[command(flatten)]
        data: DataArgs,

        /// Feature allow-lists and category vocabulary (JSON)
        #[arg(short = 'c', long)]
        contract: PathBuf,

        /// First day excluded from the statistics (YYYY-MM-DD)
        #[arg(long)]
        test_start: String,

        /// Output path; defaults to `mean_std_stats.json` in the datasets path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Scan the archives for categorical codes and write a full contract
    Vocabulary {
        #[command(flatten)]
        data: DataArgs,

        /// Last day scanned (YYYY-MM-DD)
        #[arg(long, default_value = "2021-01-01")]
        end: String,

        /// Output path for the contract JSON
        #[arg(short = 'o', long, default_value = "contract.json")]
        output: PathBuf,
    },

    /// Turn model predictions into the dated level table
    Report {
        /// Datasets path the level table is written to
        #[arg(short = 'd', long, env = "AMUR_DATASETS_PATH", default_value = "/data")]
        datasets_path: PathBuf,

        /// First forecast day (YYYY-MM-DD)
        #[arg(short = 'f', long)]
        from: String,

        /// Model output as a JSON array (flat or nested)
        #[arg(short = 'p', long)]
        predictions: PathBuf,
    },
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::TrainSet {
            data,
            contract,
            test_start,
            test_end,
            output,
        } => train::run_train_set(&data, &contract, &test_start, &test_end, &output).await,
        Command::PredictInputs {
            data,
            contract,
            from,
            output,
            yandex_key,
            open_weather_key,
        } => {
            let keys = predict::ForecastKeys {
                yandex: yandex_key,
                open_weather: open_weather_key,
            };
            predict::run_predict_inputs(&data, &contract, &from, &output, &keys).await
        }
        Command::Stats {
            data,
            contract,
            test_start,
            output,
        } => train::run_stats(&data, &contract, &test_start, output.as_deref()).await,
        Command::Vocabulary { data, end, output } => train::run_vocabulary(&data, &end, &output).await,
        Command::Report {
            datasets_path,
            from,
            predictions,
        } => predict::run_report(&datasets_path, &from, &predictions),
    }
}
