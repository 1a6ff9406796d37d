//! Date-indexed column tables.
//!
//! A [`Frame`] holds named columns of optional values over a sorted,
//! duplicate-free list of dates. It backs both the per-station feature
//! tables and the wide table keyed by date alone.

use amur_core::{PipelineError, Result};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

pub type Column = Vec<Option<f64>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    dates: Vec<NaiveDate>,
    names: Vec<String>,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl Frame {
    /// An empty frame over `dates`, which must be sorted and unique.
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        debug_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        Frame {
            dates,
            ..Default::default()
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.index.get(name).map(|&i| self.columns[i].as_slice())
    }

    /// A column the caller cannot do without.
    pub fn require(&self, name: &str) -> Result<&[Option<f64>]> {
        self.column(name)
            .ok_or_else(|| PipelineError::MissingFeature(name.to_string()))
    }

    /// Add or replace a column.
    pub fn insert(&mut self, name: impl Into<String>, values: Column) -> Result<()> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(PipelineError::Shape(format!(
                "column {} has {} values for {} dates",
                name,
                values.len(),
                self.dates.len()
            )));
        }
        match self.index.get(&name) {
            Some(&i) => self.columns[i] = values,
            None => {
                self.index.insert(name.clone(), self.columns.len());
                self.names.push(name);
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Keep only the columns for which `keep` holds.
    pub fn retain_columns(&mut self, keep: impl Fn(&str) -> bool) {
        let names = std::mem::take(&mut self.names);
        let columns = std::mem::take(&mut self.columns);
        self.index.clear();
        for (name, column) in names.into_iter().zip(columns) {
            if keep(&name) {
                self.index.insert(name.clone(), self.columns.len());
                self.names.push(name);
                self.columns.push(column);
            }
        }
    }

    /// Apply `f` to every column in place.
    pub fn map_columns(&mut self, mut f: impl FnMut(&str, &mut Column)) {
        for (name, column) in self.names.iter().zip(self.columns.iter_mut()) {
            f(name, column);
        }
    }

    /// Share of rows where the column has a value.
    pub fn coverage(&self, name: &str) -> f64 {
        match self.column(name) {
            Some(column) if !column.is_empty() => {
                column.iter().filter(|v| v.is_some()).count() as f64 / column.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Rows whose date satisfies `keep`.
    pub fn filter_rows(&self, keep: impl Fn(&NaiveDate) -> bool) -> Frame {
        let rows: Vec<usize> = (0..self.dates.len()).filter(|&i| keep(&self.dates[i])).collect();
        Frame {
            dates: rows.iter().map(|&i| self.dates[i]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&i| c[i]).collect())
                .collect(),
            index: self.index.clone(),
        }
    }

    /// Rows with `from <= date < to`.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> Frame {
        self.filter_rows(|d| *d >= from && *d < to)
    }

    /// Outer join on date. Columns keep their names; a name present in more
    /// than one frame takes the later frame's values.
    pub fn outer_join(frames: Vec<Frame>) -> Result<Frame> {
        let dates: BTreeSet<NaiveDate> = frames.iter().flat_map(|f| f.dates.iter().copied()).collect();
        let dates: Vec<NaiveDate> = dates.into_iter().collect();
        let position: HashMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut joined = Frame::new(dates);
        for frame in frames {
            let rows: Vec<usize> = frame.dates.iter().map(|d| position[d]).collect();
            for (name, column) in frame.names.into_iter().zip(frame.columns) {
                let mut aligned = vec![None; joined.len()];
                for (value, &row) in column.into_iter().zip(&rows) {
                    aligned[row] = value;
                }
                joined.insert(name, aligned)?;
            }
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn test_insert_and_replace() {
        let mut frame = Frame::new(vec![day(1), day(2)]);
        frame.insert("a", vec![Some(1.0), None]).unwrap();
        frame.insert("b", vec![None, None]).unwrap();
        frame.insert("a", vec![Some(3.0), Some(4.0)]).unwrap();
        assert_eq!(frame.names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.column("a"), Some(&[Some(3.0), Some(4.0)][..]));
        assert!(matches!(frame.insert("c", vec![None]), Err(PipelineError::Shape(_))));
        assert!(matches!(frame.require("z"), Err(PipelineError::MissingFeature(_))));
    }

    #[test]
    fn test_outer_join_aligns_dates() {
        let mut left = Frame::new(vec![day(1), day(2)]);
        left.insert("x_A", vec![Some(1.0), Some(2.0)]).unwrap();
        let mut right = Frame::new(vec![day(2), day(3)]);
        right.insert("x_B", vec![Some(5.0), Some(6.0)]).unwrap();

        let joined = Frame::outer_join(vec![left, right]).unwrap();
        assert_eq!(joined.dates(), &[day(1), day(2), day(3)]);
        assert_eq!(joined.column("x_A").unwrap(), &[Some(1.0), Some(2.0), None]);
        assert_eq!(joined.column("x_B").unwrap(), &[None, Some(5.0), Some(6.0)]);
        assert_eq!(joined.coverage("x_A"), 2.0 / 3.0);
    }

    #[test]
    fn test_retain_and_between() {
        let mut frame = Frame::new(vec![day(1), day(2), day(3)]);
        frame.insert("keep", vec![Some(1.0), Some(2.0), Some(3.0)]).unwrap();
        frame.insert("drop", vec![None, None, None]).unwrap();
        frame.retain_columns(|name| name != "drop");
        assert_eq!(frame.names(), &["keep".to_string()]);

        let slice = frame.between(day(2), day(3));
        assert_eq!(slice.dates(), &[day(2)]);
        assert_eq!(slice.column("keep").unwrap(), &[Some(2.0)]);
    }
}
