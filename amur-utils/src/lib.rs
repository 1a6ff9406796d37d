//! Shared utility functions for Amur crates.

/// Date utility functions
pub mod dates {
    use chrono::{Datelike, Months, NaiveDate};

    /// Date format used by the hydro archive files: "DD.MM.YYYY"
    pub const HYDRO_DATE_FORMAT: &str = "%d.%m.%Y";

    /// Date format used on the command line and in reports: "YYYY-MM-DD"
    pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

    /// Date substituted for unparseable archive dates. It sorts after any
    /// real observation and falls outside every sensible end date.
    pub fn sentinel_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2100, 12, 31).unwrap_or(NaiveDate::MAX)
    }

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format(ISO_DATE_FORMAT).to_string()
    }

    /// Parse a date string in "YYYY-MM-DD" format
    pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
        NaiveDate::parse_from_str(s.trim(), ISO_DATE_FORMAT)
    }

    /// Parse an archive date ("DD.MM.YYYY"). Anything that does not parse
    /// becomes the sentinel date.
    pub fn parse_hydro_date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s.trim(), HYDRO_DATE_FORMAT).unwrap_or_else(|_| sentinel_date())
    }

    /// One-based day of the year (Jan 1 = 1).
    pub fn day_of_year(date: &NaiveDate) -> u32 {
        date.ordinal()
    }

    /// Same calendar day one year later. Feb 29 maps to Feb 28.
    pub fn add_one_year(date: &NaiveDate) -> NaiveDate {
        date.checked_add_months(Months::new(12)).unwrap_or(*date)
    }

}

/// Gap filling for positional series where `None` marks a missing value.
pub mod fill {
    /// Linear interpolation by position. Interior gaps are filled on the line
    /// between their neighbours, trailing gaps hold the last known value and
    /// leading gaps stay missing.
    pub fn interpolate_linear(values: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut result = values.to_vec();
        let mut last_known: Option<(usize, f64)> = None;

        for (i, value) in values.iter().enumerate() {
            if let Some(v) = value {
                if let Some((j, prev)) = last_known {
                    let span = (i - j) as f64;
                    for (k, slot) in result.iter_mut().enumerate().take(i).skip(j + 1) {
                        let t = (k - j) as f64 / span;
                        *slot = Some(prev + (v - prev) * t);
                    }
                }
                last_known = Some((i, *v));
            }
        }

        if let Some((j, prev)) = last_known {
            for slot in result.iter_mut().skip(j + 1) {
                *slot = Some(prev);
            }
        }
        result
    }

    /// Carry the last known value forward over gaps.
    pub fn fill_forward(values: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut last = None;
        values
            .iter()
            .map(|v| {
                if v.is_some() {
                    last = *v;
                }
                last
            })
            .collect()
    }

    /// Carry the next known value backward over gaps.
    pub fn fill_backward(values: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut result = fill_forward(&values.iter().rev().copied().collect::<Vec<_>>());
        result.reverse();
        result
    }

    /// Linear interpolation followed by forward and backward edge fill.
    /// Every slot is populated unless the series has no value at all.
    pub fn interpolate_with_edges(values: &[Option<f64>]) -> Vec<Option<f64>> {
        fill_backward(&fill_forward(&interpolate_linear(values)))
    }

    /// Forward fill then backward fill, used for coded (categorical) values.
    pub fn pad_both_ways(values: &[Option<f64>]) -> Vec<Option<f64>> {
        fill_backward(&fill_forward(values))
    }

}

/// Statistics that skip missing values.
pub mod stats {
    /// Mean of the present values, `None` when nothing is present.
    pub fn mean(values: &[Option<f64>]) -> Option<f64> {
        let (sum, count) = values
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Sample standard deviation (n - 1 denominator) of the present values.
    pub fn std(values: &[Option<f64>]) -> Option<f64> {
        let m = mean(values)?;
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.len() < 2 {
            return None;
        }
        let ss: f64 = present.iter().map(|v| (v - m).powi(2)).sum();
        Some((ss / (present.len() - 1) as f64).sqrt())
    }

    /// Median of a non-empty slice; the mean of the two middle values for
    /// even lengths.
    pub fn median(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

}
