//! Readers for the hydro post archives.
//!
//! # File Formats
//!
//! All files are `;`-separated, with two preamble lines and no header:
//!
//! - **Levels** `hydro/<id>_daily.csv`: `date;level_avg;level_min;level_max;water_temp;water_code;`
//! - **Ice/snow** `hydro/<id>_ice.csv`: `date;ice_thickness;snow_height;ice_place;`
//! - **Discharge** `hydro/<id>_disch_d.csv`: `date;water_flow;`
//!
//! Dates are `DD.MM.YYYY`. Files may be UTF-8 or cp1251; they are read as
//! raw bytes since only dates and numbers are decoded and water-state text
//! is compared for equality only.

use amur_core::date_range::DateRange;
use amur_core::observation::{HydroField, HydroRecord, HydroValues};
use amur_core::{PipelineConfig, PipelineError, Result};
use amur_utils::dates::parse_hydro_date;
use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;

/// Day-over-day rise of the max level above which a day is rejected.
pub const MAX_LEVEL_DIFF: f64 = 1000.0;

/// Preamble lines before the first data row.
const SKIP_LINES: usize = 2;

/// Daily values of one hydro post, keyed by date.
pub type DailyHydro = BTreeMap<NaiveDate, HydroValues>;

fn skip_lines(bytes: &[u8], n: usize) -> &[u8] {
    let mut rest = bytes;
    for _ in 0..n {
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return &[],
        }
    }
    rest
}

fn read_rows(path: &Path) -> Result<Vec<ByteRecord>> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(skip_lines(&bytes, SKIP_LINES));
    let mut rows = Vec::new();
    for record in rdr.byte_records() {
        rows.push(record?);
    }
    Ok(rows)
}

fn field_str(record: &ByteRecord, i: usize) -> &str {
    record
        .get(i)
        .and_then(|b| std::str::from_utf8(b).ok())
        .map(str::trim)
        .unwrap_or("")
}

/// Parse a numeric cell; anything that is not a finite number is missing.
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First decimal number in a cell: digits, an optional point and at most two
/// fraction digits. Water temperature cells carry annotations around the
/// number.
pub fn extract_decimal(cell: &str) -> Option<f64> {
    let bytes = cell.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        let mut fraction = 0;
        while end < bytes.len() && bytes[end].is_ascii_digit() && fraction < 2 {
            end += 1;
            fraction += 1;
        }
    }
    cell[start..end].trim_end_matches('.').parse().ok()
}

fn row_date(record: &ByteRecord) -> NaiveDate {
    parse_hydro_date(field_str(record, 0))
}

/// Read a level file into a gap-aware daily series.
///
/// The result has one entry per calendar day between the first and last
/// observed day; days without observations carry empty values. Water-state
/// codes become dense ids in order of first appearance. A day whose max
/// level rises by more than [`MAX_LEVEL_DIFF`] over the previous day is
/// rejected (all values cleared).
pub fn read_level_file(path: &Path, range: &DateRange) -> Result<DailyHydro> {
    let rows = read_rows(path)?;

    let mut codes: Vec<Vec<u8>> = Vec::new();
    let mut by_date: BTreeMap<NaiveDate, HydroValues> = BTreeMap::new();
    for record in &rows {
        let date = row_date(record);
        if !range.contains(&date) {
            continue;
        }
        let code = record.get(5).map(|b| b.trim_ascii().to_vec()).unwrap_or_default();
        let code_id = match codes.iter().position(|c| *c == code) {
            Some(id) => id,
            None => {
                codes.push(code);
                codes.len() - 1
            }
        };
        let mut values = HydroValues::default();
        values.set(HydroField::LevelMin, parse_number(field_str(record, 2)));
        values.set(HydroField::LevelMax, parse_number(field_str(record, 3)));
        values.set(HydroField::WaterTemp, extract_decimal(field_str(record, 4)));
        values.set(HydroField::WaterCode, Some(code_id as f64));
        // later rows for the same date win
        by_date.insert(date, values);
    }

    let (first, last) = match (by_date.keys().next(), by_date.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(BTreeMap::new()),
    };

    let mut daily: DailyHydro = DateRange::new(first, last)
        .days()
        .map(|day| (day, by_date.get(&day).copied().unwrap_or_default()))
        .collect();

    let rejected: Vec<NaiveDate> = daily
        .iter()
        .zip(daily.iter().skip(1))
        .filter_map(|((_, prev), (day, cur))| {
            match (prev.get(HydroField::LevelMax), cur.get(HydroField::LevelMax)) {
                (Some(p), Some(c)) if c - p > MAX_LEVEL_DIFF => Some(*day),
                _ => None,
            }
        })
        .collect();
    for day in &rejected {
        warn!("Rejecting level jump on {} in {}", day, path.display());
        daily.insert(*day, HydroValues::default());
    }
    Ok(daily)
}

/// Read an ice/snow file, aggregating several rows per day with max.
pub fn read_ice_file(path: &Path, range: &DateRange) -> Result<DailyHydro> {
    let rows = read_rows(path)?;
    let mut daily: DailyHydro = BTreeMap::new();
    for record in &rows {
        let date = row_date(record);
        if !range.contains(&date) {
            continue;
        }
        let entry = daily.entry(date).or_default();
        for (i, field) in [(1, HydroField::IceThickness), (2, HydroField::SnowHeight)] {
            let value = parse_number(field_str(record, i));
            let merged = match (entry.get(field), value) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            entry.set(field, merged);
        }
    }
    Ok(daily)
}

/// Read a daily discharge file. The last row wins for repeated dates.
pub fn read_discharge_file(path: &Path, range: &DateRange) -> Result<DailyHydro> {
    let rows = read_rows(path)?;
    let mut daily: DailyHydro = BTreeMap::new();
    for record in &rows {
        let date = row_date(record);
        if !range.contains(&date) {
            continue;
        }
        let mut values = HydroValues::default();
        values.set(HydroField::WaterFlow, parse_number(field_str(record, 1)));
        daily.insert(date, values);
    }
    Ok(daily)
}

/// Left-join an optional auxiliary file onto the level series. A missing
/// file is logged and leaves its columns empty.
fn join_optional(
    daily: &mut DailyHydro,
    path: &Path,
    range: &DateRange,
    reader: fn(&Path, &DateRange) -> Result<DailyHydro>,
) -> Result<()> {
    match reader(path, range) {
        Ok(aux) => {
            for (day, values) in daily.iter_mut() {
                if let Some(extra) = aux.get(day) {
                    values.overlay(extra);
                }
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            warn!("File not found {}", path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Read levels, ice/snow and discharge for one post and join them by day.
/// The level file is required; the other two are optional.
pub fn read_hydro_archive(config: &PipelineConfig, identifier: &str, range: &DateRange) -> Result<Vec<HydroRecord>> {
    let dir = config.hydro_dir();
    let mut daily = read_level_file(&dir.join(format!("{identifier}_daily.csv")), range)?;
    join_optional(&mut daily, &dir.join(format!("{identifier}_ice.csv")), range, read_ice_file)?;
    join_optional(&mut daily, &dir.join(format!("{identifier}_disch_d.csv")), range, read_discharge_file)?;

    Ok(daily
        .into_iter()
        .map(|(date, values)| HydroRecord {
            identifier: identifier.to_string(),
            date,
            values,
        })
        .collect())
}

/// Read every configured post. Records are unique per (date, identifier),
/// the later read winning, and sorted by date.
pub fn read_hydro_all(config: &PipelineConfig, range: &DateRange) -> Result<Vec<HydroRecord>> {
    let mut merged: BTreeMap<(NaiveDate, String), HydroRecord> = BTreeMap::new();
    for identifier in &config.all_stations {
        for record in read_hydro_archive(config, identifier, range)? {
            merged.insert((record.date, record.identifier.clone()), record);
        }
    }
    info!(
        "Read {} hydro records for {} stations ({} - {})",
        merged.len(),
        config.all_stations.len(),
        range.start,
        range.end
    );
    Ok(merged.into_values().collect())
}
