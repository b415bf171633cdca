//! Month-granularity calendar periods.
//!
//! A [`Period`] is a calendar month with total ordering and month arithmetic.
//! Every temporal key in a panel is a `Period`; native dates never reach the
//! aligned panel.

use crate::PanelError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A calendar month.
///
/// Stored as the number of months since January of year 0, so ordering and
/// differences are plain integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(i32);

impl Period {
    /// Month containing the given date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() * 12 + date.month0() as i32)
    }

    /// Period for a year and a 1-based month, `None` if the month is out of range.
    pub const fn from_year_month(year: i32, month: u8) -> Option<Self> {
        if month >= 1 && month <= 12 {
            Some(Self(year * 12 + month as i32 - 1))
        } else {
            None
        }
    }

    /// Parse the `YYYYMM` integer key used in predictor output files.
    pub const fn from_yyyymm(yyyymm: i32) -> Option<Self> {
        let month = yyyymm.rem_euclid(100);
        if month < 1 || month > 12 {
            return None;
        }
        Self::from_year_month(yyyymm.div_euclid(100), month as u8)
    }

    /// Shift by `months` (negative moves backwards).
    ///
    /// Saturates at the representable range instead of wrapping.
    pub fn add_months(self, months: i64) -> Self {
        let shifted = i64::from(self.0) + months;
        Self(shifted.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    /// Number of months from `a` to `b` (`b - a`).
    pub fn months_between(a: Self, b: Self) -> i64 {
        i64::from(b.0) - i64::from(a.0)
    }

    /// Year and 1-based month.
    pub const fn to_year_month(self) -> (i32, u8) {
        (self.0.div_euclid(12), (self.0.rem_euclid(12) + 1) as u8)
    }

    /// `YYYYMM` integer key.
    pub const fn yyyymm(self) -> i32 {
        let (year, month) = self.to_year_month();
        year * 100 + month as i32
    }

    /// First calendar day of the month.
    pub fn first_day(self) -> Option<NaiveDate> {
        let (year, month) = self.to_year_month();
        NaiveDate::from_ymd_opt(year, u32::from(month), 1)
    }

    /// Next month.
    pub fn succ(self) -> Self {
        self.add_months(1)
    }

    /// Every month from `start` through `end` inclusive; empty when `end < start`.
    pub fn range(start: Self, end: Self) -> impl Iterator<Item = Self> {
        (start.0..=end.0).map(Self)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (year, month) = self.to_year_month();
        write!(f, "{year:04}-{month:02}")
    }
}

impl FromStr for Period {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PanelError::InvalidPeriod(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        Self::from_year_month(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Period {
    type Error = PanelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl From<NaiveDate> for Period {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}
