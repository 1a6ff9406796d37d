use chrono::{Days, NaiveDate};

/// An inclusive calendar range `[start, end]` of daily steps.
#[derive(Clone, Eq, PartialEq, Copy, Debug)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        *date >= self.start && *date <= self.end
    }

    /// Number of calendar days covered, zero for an inverted range.
    pub fn len_days(&self) -> usize {
        let days = (self.end - self.start).num_days() + 1;
        days.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len_days() == 0
    }

    /// Every day in the range, in order.
    pub fn days(&self) -> DayIter {
        DayIter {
            next: self.start,
            end: self.end,
        }
    }
}

/// Iterator over the days of a [`DateRange`].
#[derive(Clone, Debug)]
pub struct DayIter {
    next: NaiveDate,
    end: NaiveDate,
}

impl Iterator for DayIter {
    type Item = NaiveDate;
    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let current = self.next;
        match current.checked_add_days(Days::new(1)) {
            Some(following) => self.next = following,
            // past the last representable date: make the range exhausted
            None => self.end = NaiveDate::MIN,
        }
        Some(current)
    }
}
