//! JSON artifacts exchanged with the model runner.

use anyhow::Context;
use log::info;
use ndarray::Array3;
use serde_json::Value;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Write a tensor as nested JSON arrays `[window][day][column]`. Missing
/// values (NaN) are written as `null`.
pub fn write_tensor(path: &Path, tensor: &Array3<f32>) -> anyhow::Result<()> {
    let nested: Vec<Vec<Vec<f32>>> = tensor
        .outer_iter()
        .map(|window| window.outer_iter().map(|day| day.to_vec()).collect())
        .collect();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), &nested)?;
    info!("Wrote {:?} tensor to {}", tensor.shape(), path.display());
    Ok(())
}

/// Flatten a JSON array of any nesting depth into its numbers, row-major.
pub fn flatten_numbers(value: &Value) -> anyhow::Result<Vec<f64>> {
    let mut numbers = Vec::new();
    collect(value, &mut numbers)?;
    Ok(numbers)
}

fn collect(value: &Value, numbers: &mut Vec<f64>) -> anyhow::Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, numbers)?;
            }
            Ok(())
        }
        Value::Number(n) => {
            numbers.push(n.as_f64().context("prediction out of f64 range")?);
            Ok(())
        }
        other => anyhow::bail!("unexpected value in predictions: {other}"),
    }
}

/// Model predictions stored as a JSON array.
pub fn read_predictions(path: &Path) -> anyhow::Result<Vec<f64>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)?;
    flatten_numbers(&value)
}
