//! Prediction report: model output as a dated level table.

use amur_core::{PipelineConfig, PipelineError, Result};
use amur_utils::dates::format_date;
use chrono::{Days, NaiveDate};
use csv::Writer;
use log::info;
use std::path::{Path, PathBuf};

/// Predicted levels for the reported stations, one row per forecast day.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub stations: Vec<String>,
    pub rows: Vec<(NaiveDate, Vec<f64>)>,
}

impl LevelReport {
    /// Reshape flat model output to `[days, all_stations]` and keep the
    /// reported stations. The output must hold exactly `days_forecast` rows.
    pub fn from_predictions(config: &PipelineConfig, from: NaiveDate, predictions: &[f64]) -> Result<Self> {
        let width = config.all_stations.len();
        if predictions.len() % width != 0 {
            return Err(PipelineError::Shape(format!(
                "{} predictions do not divide into {} stations",
                predictions.len(),
                width
            )));
        }
        let days = predictions.len() / width;
        if days != config.days_forecast {
            return Err(PipelineError::Shape(format!(
                "expected {} forecast days, got {}",
                config.days_forecast, days
            )));
        }

        let reported = config.reported_stations();
        let mut rows = Vec::with_capacity(days);
        for (offset, chunk) in predictions.chunks(width).enumerate() {
            let date = from
                .checked_add_days(Days::new(offset as u64))
                .ok_or_else(|| PipelineError::InvalidConfig(format!("forecast day {offset} out of range")))?;
            rows.push((date, chunk[..reported.len()].to_vec()));
        }
        Ok(LevelReport {
            stations: reported.to_vec(),
            rows,
        })
    }

    /// `level_<first>_<last>.csv`
    pub fn file_name(&self) -> String {
        match (self.rows.first(), self.rows.last()) {
            (Some((first, _)), Some((last, _))) => {
                format!("level_{}_{}.csv", format_date(first), format_date(last))
            }
            _ => "level.csv".to_string(),
        }
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = Writer::from_writer(vec![]);
        let mut header = vec!["date".to_string()];
        header.extend(self.stations.iter().cloned());
        writer.write_record(&header)?;
        for (date, levels) in &self.rows {
            let mut record = vec![format_date(date)];
            record.extend(levels.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::Shape(format!("flushing report: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write the report into `dir`, returning the file path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_csv()?).map_err(|e| PipelineError::io(&path, e))?;
        info!("Results saved to {}", path.display());
        Ok(path)
    }
}
