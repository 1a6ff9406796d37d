//! Window tensors for the level model.
//!
//! Windows are runs of `days_forecast` consecutive rows of the sorted wide
//! table. Inputs are shaped `[windows, days, features]` with the contract's
//! numerical features (standardized) first, then its categorical ones.
//! Targets are shaped `[windows, days, stations]` in station order. Missing
//! values are NaN.

use crate::frame::Frame;
use amur_core::config::FeatureStats;
use amur_core::{FeatureContract, NormalizationStats, PipelineConfig, PipelineError, Result};
use amur_utils::stats::{mean, std};
use chrono::NaiveDate;
use log::{info, warn};
use ndarray::Array3;

/// Train and test tensors of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub x_train: Array3<f32>,
    pub y_train: Array3<f32>,
    pub x_test: Array3<f32>,
    pub y_test: Array3<f32>,
}

/// Model input columns, numerical ones standardized.
fn input_columns(table: &Frame, contract: &FeatureContract, stats: &NormalizationStats) -> Result<Vec<Vec<Option<f64>>>> {
    stats.ensure_covers(&contract.numerical)?;
    let mut columns = Vec::with_capacity(contract.numerical.len() + contract.categorical.len());
    for name in &contract.numerical {
        let feature = stats.get(name)?;
        let values = table.require(name)?;
        columns.push(values.iter().map(|v| v.map(|v| feature.standardize(v))).collect());
    }
    for name in &contract.categorical {
        columns.push(table.require(name)?.to_vec());
    }
    Ok(columns)
}

fn target_columns(table: &Frame, config: &PipelineConfig) -> Result<Vec<Vec<Option<f64>>>> {
    config
        .targets()
        .iter()
        .map(|name| table.require(name).map(<[_]>::to_vec))
        .collect()
}

/// True when every target has a value on each of the `days` rows from `start`.
fn window_complete(targets: &[Vec<Option<f64>>], start: usize, days: usize) -> bool {
    targets.iter().all(|column| {
        column
            .get(start..start + days)
            .is_some_and(|window| window.iter().all(Option::is_some))
    })
}

/// Starts of training windows: stride 1, incomplete windows skipped.
pub fn train_window_starts(len: usize, days: usize, complete: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut step = 0;
    while step + days + 1 < len {
        if complete(step) {
            starts.push(step);
        }
        step += 1;
    }
    starts
}

/// Starts of test windows: stride `days`, incomplete windows skipped.
pub fn test_window_starts(len: usize, days: usize, complete: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut step = 0;
    while step < len {
        if !complete(step) {
            step += days;
            continue;
        }
        starts.push(step);
        if step + 2 * days + 1 >= len {
            break;
        }
        step += days;
    }
    starts
}

/// Gather `columns` over the windows starting at `starts`.
fn stack(columns: &[Vec<Option<f64>>], starts: &[usize], days: usize) -> Array3<f32> {
    let mut tensor = Array3::<f32>::from_elem((starts.len(), days, columns.len()), f32::NAN);
    for (w, &start) in starts.iter().enumerate() {
        for d in 0..days {
            for (c, column) in columns.iter().enumerate() {
                if let Some(Some(v)) = column.get(start + d) {
                    tensor[[w, d, c]] = *v as f32;
                }
            }
        }
    }
    tensor
}

fn windows(
    table: &Frame,
    contract: &FeatureContract,
    stats: &NormalizationStats,
    config: &PipelineConfig,
    starts_for: impl Fn(usize, &dyn Fn(usize) -> bool) -> Vec<usize>,
) -> Result<(Array3<f32>, Array3<f32>)> {
    let days = config.days_forecast;
    let inputs = input_columns(table, contract, stats)?;
    let targets = target_columns(table, config)?;
    let starts = starts_for(table.len(), &|start| window_complete(&targets, start, days));
    Ok((stack(&inputs, &starts, days), stack(&targets, &starts, days)))
}

/// Split the wide table at `test_start`. Training rows precede it; test rows
/// fall in `[test_start, test_end)`.
pub fn train_test_split(
    table: &Frame,
    contract: &FeatureContract,
    stats: &NormalizationStats,
    config: &PipelineConfig,
    test_start: NaiveDate,
    test_end: NaiveDate,
) -> Result<TrainTestSplit> {
    let days = config.days_forecast;
    let train = table.filter_rows(|d| *d < test_start);
    let test = table.between(test_start, test_end);

    let (x_train, y_train) = windows(&train, contract, stats, config, |len, complete| {
        train_window_starts(len, days, complete)
    })?;
    let (x_test, y_test) = windows(&test, contract, stats, config, |len, complete| {
        test_window_starts(len, days, complete)
    })?;
    info!(
        "Train windows {:?}, test windows {:?}",
        x_train.shape(),
        x_test.shape()
    );
    Ok(TrainTestSplit {
        x_train,
        y_train,
        x_test,
        y_test,
    })
}

/// Model inputs for the rows in `[from, to)`, stride `days_forecast`.
/// Every window must be full.
pub fn prepare_inputs(
    table: &Frame,
    contract: &FeatureContract,
    stats: &NormalizationStats,
    config: &PipelineConfig,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Array3<f32>> {
    let days = config.days_forecast;
    let rows = table.between(from, to);
    let inputs = input_columns(&rows, contract, stats)?;

    let mut starts = Vec::new();
    let mut step = 0;
    loop {
        let found = rows.len().saturating_sub(step);
        if found < days {
            return Err(PipelineError::InsufficientRows { needed: days, found });
        }
        starts.push(step);
        if step + days + 1 >= rows.len() {
            break;
        }
        step += days;
    }
    let tensor = stack(&inputs, &starts, days);
    info!("Model inputs {:?}", tensor.shape());
    Ok(tensor)
}

/// Mean and sample standard deviation of each numerical contract feature.
/// Constant or single-valued columns get a unit deviation.
pub fn compute_stats(table: &Frame, contract: &FeatureContract) -> Result<NormalizationStats> {
    let mut stats = NormalizationStats::default();
    for name in &contract.numerical {
        let values = table.require(name)?;
        let Some(m) = mean(values) else {
            return Err(PipelineError::MissingNormalization(name.clone()));
        };
        let s = match std(values) {
            Some(s) if s > 0.0 => s,
            _ => {
                warn!("Feature {} has no spread; using unit deviation", name);
                1.0
            }
        };
        stats.0.insert(name.clone(), FeatureStats { mean: m, std: s });
    }
    info!("Computed statistics for {} features", stats.0.len());
    Ok(stats)
}
