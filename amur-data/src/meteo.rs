//! Reader for the synoptic meteo archive (`meteo_new/<identifier>.csv`).
//!
//! Files are comma-separated with a header row. Every observed column has a
//! companion `<column>Quality` flag; flagged values are discarded before
//! gap filling. Observations are several per day and are aggregated to one
//! record per day and station.

use amur_core::date_range::DateRange;
use amur_core::observation::{CodeValues, Field, MeteoField, MeteoRecord, MeteoValues, WeatherCode};
use amur_core::{PipelineConfig, PipelineError, Result};
use amur_utils::fill::{interpolate_linear, interpolate_with_edges, pad_both_ways};
use amur_utils::stats::{mean, median};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// Quality flags marking a doubtful or erroneous value.
pub const INVALID_QUALITY: [i64; 4] = [3, 4, 6, 7];

const TIME_COLUMNS: [&str; 4] = ["localYear", "localMonth", "localDay", "localTimePeriod"];

/// Daily aggregation applied to a field's intraday samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Max,
    Min,
    Mean,
    Median,
    /// Sum of present values; a day without any is zero
    Sum,
}

impl Aggregation {
    pub fn apply(self, samples: &[Option<f64>]) -> Option<f64> {
        let present: Vec<f64> = samples.iter().flatten().copied().collect();
        match self {
            Aggregation::Max => present.into_iter().reduce(f64::max),
            Aggregation::Min => present.into_iter().reduce(f64::min),
            Aggregation::Mean => mean(samples),
            Aggregation::Median => median(&present),
            Aggregation::Sum => Some(present.iter().sum()),
        }
    }
}

pub fn field_aggregation(field: MeteoField) -> Aggregation {
    match field {
        MeteoField::WindDirection => Aggregation::Median,
        MeteoField::WindSpeed | MeteoField::MaxWindGustSpeed => Aggregation::Max,
        MeteoField::Precipitation => Aggregation::Sum,
        MeteoField::AirTemperatureMax | MeteoField::RelativeHumidity => Aggregation::Max,
        MeteoField::AirTemperatureMin => Aggregation::Min,
        MeteoField::SoilTemperature | MeteoField::PressureSeaLevel | MeteoField::Pressure => Aggregation::Mean,
    }
}

/// Source column of a field. Both air temperature bounds come from the
/// single `airTemperature` observation.
pub fn source_column(field: MeteoField) -> &'static str {
    match field {
        MeteoField::AirTemperatureMin | MeteoField::AirTemperatureMax => "airTemperature",
        other => other.name(),
    }
}

/// One intraday observation after quality screening.
#[derive(Debug, Clone)]
struct Sample {
    at: NaiveDateTime,
    codes: [Option<f64>; 3],
    values: [Option<f64>; 10],
}

struct Columns {
    time: [usize; 4],
    codes: [(usize, Option<usize>); 3],
    values: [(usize, Option<usize>); 10],
}

fn column_index(headers: &ByteRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim_ascii() == name.as_bytes())
        .ok_or_else(|| PipelineError::MissingColumn {
            column: name.to_string(),
            path: path.to_path_buf(),
        })
}

fn value_columns(headers: &ByteRecord, name: &str, path: &Path) -> Result<(usize, Option<usize>)> {
    let value = column_index(headers, name, path)?;
    let quality = column_index(headers, &format!("{name}Quality"), path).ok();
    Ok((value, quality))
}

impl Columns {
    fn locate(headers: &ByteRecord, path: &Path) -> Result<Self> {
        let mut time = [0; 4];
        for (slot, name) in time.iter_mut().zip(TIME_COLUMNS) {
            *slot = column_index(headers, name, path)?;
        }
        let mut codes = [(0, None); 3];
        for code in WeatherCode::ALL {
            codes[code.index()] = value_columns(headers, code.name(), path)?;
        }
        let mut values = [(0, None); 10];
        for field in MeteoField::ALL {
            values[field.index()] = value_columns(headers, source_column(field), path)?;
        }
        Ok(Columns { time, codes, values })
    }
}

fn cell(record: &ByteRecord, i: usize) -> Option<f64> {
    let text = std::str::from_utf8(record.get(i)?).ok()?;
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn screened(record: &ByteRecord, (value, quality): (usize, Option<usize>)) -> Option<f64> {
    let flag = quality.and_then(|q| cell(record, q)).map(|q| q as i64);
    match flag {
        Some(q) if INVALID_QUALITY.contains(&q) => None,
        _ => cell(record, value),
    }
}

fn timestamp(record: &ByteRecord, time: &[usize; 4]) -> Option<NaiveDateTime> {
    let year = cell(record, time[0])? as i32;
    let month = cell(record, time[1])? as u32;
    let day = cell(record, time[2])? as u32;
    let hour = cell(record, time[3])? as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)
}

/// Apply a positional fill to one slot across all samples.
fn fill_slot<const N: usize>(
    samples: &mut [Sample],
    slot: usize,
    pick: fn(&mut Sample) -> &mut [Option<f64>; N],
    fill: fn(&[Option<f64>]) -> Vec<Option<f64>>,
) {
    let column: Vec<Option<f64>> = samples.iter_mut().map(|s| pick(s)[slot]).collect();
    for (sample, value) in samples.iter_mut().zip(fill(&column)) {
        pick(sample)[slot] = value;
    }
}

/// Read and aggregate one station file.
///
/// Observations are kept for timestamps within `[range.start 00:00,
/// range.end 00:00]`. Within the day-sorted intraday series, coded fields are
/// padded both ways and continuous fields linearly interpolated. After daily
/// aggregation the same fills run again over the calendar days so that
/// every field with any data is populated on every day.
pub fn read_meteo_file(path: &Path, identifier: &str, range: &DateRange, bad_fields: &[MeteoField]) -> Result<Vec<MeteoRecord>> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(bytes.as_slice());
    let columns = Columns::locate(rdr.byte_headers()?, path)?;

    let from = range.start.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN);
    let until = range.end.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MAX);

    let mut samples = Vec::new();
    for row in rdr.byte_records() {
        let record = row?;
        let Some(at) = timestamp(&record, &columns.time) else {
            debug!("Skipping row without a valid timestamp in {}", path.display());
            continue;
        };
        if at < from || at > until {
            continue;
        }
        let mut sample = Sample {
            at,
            codes: [None; 3],
            values: [None; 10],
        };
        for (slot, source) in sample.codes.iter_mut().zip(columns.codes) {
            *slot = screened(&record, source);
        }
        for field in MeteoField::ALL {
            if !bad_fields.contains(&field) {
                sample.values[field.index()] = screened(&record, columns.values[field.index()]);
            }
        }
        samples.push(sample);
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    samples.sort_by_key(|s| s.at);
    for code in WeatherCode::ALL {
        fill_slot(&mut samples, code.index(), |s| &mut s.codes, pad_both_ways);
    }
    for field in MeteoField::ALL {
        fill_slot(&mut samples, field.index(), |s| &mut s.values, interpolate_linear);
    }

    let mut by_day: BTreeMap<NaiveDate, Vec<&Sample>> = BTreeMap::new();
    for sample in &samples {
        by_day.entry(sample.at.date()).or_default().push(sample);
    }
    let first = samples[0].at.date();
    let last = samples[samples.len() - 1].at.date();

    let mut records: Vec<MeteoRecord> = DateRange::new(first, last)
        .days()
        .map(|date| {
            let day = by_day.get(&date).map(Vec::as_slice).unwrap_or(&[]);
            let mut codes = CodeValues::default();
            for code in WeatherCode::ALL {
                let rounded: Vec<Option<f64>> = day.iter().map(|s| s.codes[code.index()].map(f64::round)).collect();
                codes.set(code, Aggregation::Max.apply(&rounded));
            }
            let mut values = MeteoValues::default();
            for field in MeteoField::ALL {
                if bad_fields.contains(&field) {
                    continue;
                }
                let column: Vec<Option<f64>> = day.iter().map(|s| s.values[field.index()]).collect();
                values.set(field, field_aggregation(field).apply(&column));
            }
            MeteoRecord {
                identifier: identifier.to_string(),
                date,
                codes,
                values,
            }
        })
        .collect();

    for code in WeatherCode::ALL {
        let column: Vec<Option<f64>> = records.iter().map(|r| r.codes.get(code)).collect();
        for (record, value) in records.iter_mut().zip(pad_both_ways(&column)) {
            record.codes.set(code, value);
        }
    }
    for field in MeteoField::ALL {
        let column: Vec<Option<f64>> = records.iter().map(|r| r.values.get(field)).collect();
        for (record, value) in records.iter_mut().zip(interpolate_with_edges(&column)) {
            record.values.set(field, value);
        }
    }
    Ok(records)
}

/// Read every `*.csv` in the meteo directory. The file stem is the station
/// identifier. Records are sorted by date, then identifier.
pub fn read_meteo_all(config: &PipelineConfig, range: &DateRange) -> Result<Vec<MeteoRecord>> {
    let dir = config.meteo_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| PipelineError::io(&dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(&dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "csv") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::new();
    for path in &paths {
        let identifier = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let part = read_meteo_file(path, &identifier, range, config.bad_fields(&identifier))?;
        debug!("Read {} meteo days for {}", part.len(), identifier);
        records.extend(part);
    }
    records.sort_by(|a, b| (a.date, &a.identifier).cmp(&(b.date, &b.identifier)));
    info!("Read {} meteo records from {} files", records.len(), paths.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

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

    fn header() -> String {
        let mut columns: Vec<String> = TIME_COLUMNS.iter().map(|c| c.to_string()).collect();
        for c in OBSERVED {
            columns.push(c.to_string());
            columns.push(format!("{c}Quality"));
        }
        columns.join(",")
    }

    /// A row where every field shares `value` (quality 0) except overrides.
    fn row(y: i32, m: u32, d: u32, h: u32, value: f64, overrides: &[(&str, &str, i64)]) -> String {
        let mut cells = vec![y.to_string(), m.to_string(), d.to_string(), h.to_string()];
        for c in OBSERVED {
            match overrides.iter().find(|(name, _, _)| *name == c) {
                Some((_, v, q)) => {
                    cells.push(v.to_string());
                    cells.push(q.to_string());
                }
                None => {
                    cells.push(value.to_string());
                    cells.push("0".to_string());
                }
            }
        }
        cells.join(",")
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, rows: &[String]) -> std::path::PathBuf {
        let meteo = dir.path().join("meteo_new");
        fs::create_dir_all(&meteo).unwrap();
        let path = meteo.join(name);
        let mut body = header();
        for r in rows {
            body.push('\n');
            body.push_str(r);
        }
        body.push('\n');
        fs::write(&path, body).unwrap();
        path
    }

    fn range() -> DateRange {
        DateRange::new(day(1980, 1, 1), day(2100, 1, 1))
    }

    #[test]
    fn test_daily_aggregation() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "4923800.csv",
            &[
                row(2019, 7, 1, 0, 10.0, &[("airTemperature", "12", 0), ("totalAccumulatedPrecipitation", "1.5", 0)]),
                row(2019, 7, 1, 12, 20.0, &[("airTemperature", "25", 0), ("totalAccumulatedPrecipitation", "2", 0)]),
                row(2019, 7, 1, 18, 30.0, &[("airTemperature", "18", 0), ("totalAccumulatedPrecipitation", "0", 0)]),
            ],
        );
        let records = read_meteo_file(&path, "4923800", &range(), &[]).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.values.get(MeteoField::AirTemperatureMax), Some(25.0));
        assert_eq!(r.values.get(MeteoField::AirTemperatureMin), Some(12.0));
        assert_relative_eq!(r.values.get(MeteoField::Precipitation).unwrap(), 3.5);
        assert_eq!(r.values.get(MeteoField::WindDirection), Some(20.0));
        assert_eq!(r.values.get(MeteoField::WindSpeed), Some(30.0));
        assert_relative_eq!(r.values.get(MeteoField::Pressure).unwrap(), 20.0);
        assert_eq!(r.codes.get(WeatherCode::CloudCover), Some(30.0));
    }

    #[test]
    fn test_bad_quality_is_interpolated() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "A.csv",
            &[
                row(2019, 7, 1, 0, 10.0, &[]),
                row(2019, 7, 1, 6, 10.0, &[("windSpeed", "99", 3), ("relativeHumidity", "99", 7)]),
                row(2019, 7, 1, 12, 10.0, &[("windSpeed", "14", 0), ("relativeHumidity", "40", 0)]),
            ],
        );
        let records = read_meteo_file(&path, "A", &range(), &[]).unwrap();
        // 99 is discarded; the interpolated value (12) does not exceed 14
        assert_eq!(records[0].values.get(MeteoField::WindSpeed), Some(14.0));
        assert_eq!(records[0].values.get(MeteoField::RelativeHumidity), Some(40.0));
    }

    #[test]
    fn test_gap_days_are_filled() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "A.csv",
            &[
                row(2019, 7, 1, 0, 10.0, &[("presentWeather", "2.4", 0)]),
                row(2019, 7, 4, 0, 40.0, &[("presentWeather", "5", 0)]),
            ],
        );
        let records = read_meteo_file(&path, "A", &range(), &[]).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].date, day(2019, 7, 2));
        assert_relative_eq!(records[1].values.get(MeteoField::Pressure).unwrap(), 20.0);
        assert_relative_eq!(records[2].values.get(MeteoField::Pressure).unwrap(), 30.0);
        // a day without observations sums to zero precipitation
        assert_eq!(records[1].values.get(MeteoField::Precipitation), Some(0.0));
        assert_eq!(records[0].codes.get(WeatherCode::PresentWeather), Some(2.0));
        assert_eq!(records[2].codes.get(WeatherCode::PresentWeather), Some(2.0));
        assert_eq!(records[3].codes.get(WeatherCode::PresentWeather), Some(5.0));
    }

    #[test]
    fn test_range_end_is_midnight() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "A.csv",
            &[
                row(2019, 7, 1, 12, 10.0, &[]),
                row(2019, 7, 2, 0, 20.0, &[]),
                row(2019, 7, 2, 6, 90.0, &[]),
            ],
        );
        let range = DateRange::new(day(2019, 7, 1), day(2019, 7, 2));
        let records = read_meteo_file(&path, "A", &range, &[]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].values.get(MeteoField::WindSpeed), Some(20.0));
    }

    #[test]
    fn test_bad_identifier_fields_and_directory() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "4923811.csv", &[row(2019, 7, 2, 0, 5.0, &[])]);
        write_file(&dir, "4923800.csv", &[row(2019, 7, 1, 0, 5.0, &[])]);
        fs::write(dir.path().join("meteo_new/readme.txt"), "ignored").unwrap();

        let config = PipelineConfig::with_stations(dir.path(), vec!["05004".to_string()]).unwrap();
        let records = read_meteo_all(&config, &range()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier, "4923800");
        assert_eq!(records[0].values.get(MeteoField::SoilTemperature), Some(5.0));
        assert_eq!(records[1].identifier, "4923811");
        assert_eq!(records[1].values.get(MeteoField::SoilTemperature), None);
        assert_eq!(records[1].values.get(MeteoField::Pressure), Some(5.0));
    }

    #[test]
    fn test_missing_column_is_error() {
        let dir = TempDir::new().unwrap();
        let meteo = dir.path().join("meteo_new");
        fs::create_dir_all(&meteo).unwrap();
        let path = meteo.join("A.csv");
        fs::write(&path, "localYear,localMonth\n2019,1\n").unwrap();
        let err = read_meteo_file(&path, "A", &range(), &[]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }
}
