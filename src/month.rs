use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Serialize, Serializer};

use crate::error::GoalError;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Calendar month bucket, rendered as "March 2026". Field order gives the
/// (year, month) ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Month of a `DD/MM/YYYY` row date. Days past the end of the month roll
    /// into the following month, so `31/04/2026` buckets as May 2026.
    pub fn from_row_date(raw: &str) -> Option<Self> {
        let token = raw.split_whitespace().next()?;
        let parts: Vec<&str> = token.split(|c: char| c == '/' || c == '-').collect();
        if parts.len() != 3 {
            return None;
        }
        let numbers: Vec<u32> = parts
            .iter()
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<_>>()?;
        let (day, month, year) = if parts[0].len() == 4 {
            (numbers[2], numbers[1], numbers[0])
        } else {
            (numbers[0], numbers[1], numbers[2])
        };
        let first = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, 1)?;
        let date = first
            .checked_add_days(Days::new(u64::from(day)))?
            .checked_sub_days(Days::new(1))?;
        Some(Self::from_date(date))
    }

    /// Accepts "May 2026", "05/2026" (or "05-2026") and "2026/05" (or "2026-05").
    pub fn parse_target(input: &str) -> Result<Self, GoalError> {
        let reject = || GoalError::UnknownMonthFormat(input.to_string());
        let text = input.trim();

        if let Ok(key) = text.parse::<MonthKey>() {
            return Ok(key);
        }

        let (left, right) = text.split_once(|c: char| c == '/' || c == '-').ok_or_else(reject)?;
        let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(left) || !all_digits(right) {
            return Err(reject());
        }
        let (month, year) = match (left.len(), right.len()) {
            (1 | 2, 4) => (left, right),
            (4, 1 | 2) => (right, left),
            _ => return Err(reject()),
        };
        let month = month.parse::<u32>().map_err(|_| reject())?;
        let year = year.parse::<i32>().map_err(|_| reject())?;
        MonthKey::new(year, month).ok_or_else(reject)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.year)
    }
}

impl FromStr for MonthKey {
    type Err = GoalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reject = || GoalError::UnknownMonthFormat(s.to_string());
        let mut words = s.split_whitespace();
        let (Some(name), Some(year), None) = (words.next(), words.next(), words.next()) else {
            return Err(reject());
        };
        let month = MONTH_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .ok_or_else(reject)?;
        if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
            return Err(reject());
        }
        let year = year.parse::<i32>().map_err(|_| reject())?;
        MonthKey::new(year, month as u32 + 1).ok_or_else(reject)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
