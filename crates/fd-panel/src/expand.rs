//! Carry-forward expansion of coarse-frequency records to monthly rows.
//!
//! An annual or quarterly record stays the entity's current information from
//! its available month until a later record supersedes it. [`CarryForward`]
//! yields those months lazily instead of duplicating rows up front; it borrows
//! the anchors and can be recreated at any time to restart the sequence.

use crate::period::Period;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How far a record is carried forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expansion {
    /// Native-monthly data: each record covers its own available month only.
    None,
    /// Each record covers at most this many months, ending earlier if superseded.
    Months {
        /// Maximum number of months covered, including the available month
        months: u32,
    },
    /// Each record covers every month until superseded; the last one is carried
    /// through `through` (inclusive).
    UntilSuperseded {
        /// Last month of the sample
        through: Period,
    },
}

impl Expansion {
    /// First month after the span a record available in `available` may cover.
    pub fn cap(self, available: Period) -> Period {
        match self {
            Self::None => available.succ(),
            Self::Months { months } => available.add_months(i64::from(months)),
            Self::UntilSuperseded { through } => through.succ(),
        }
    }
}

/// One deduplicated record of an entity's history, ordered by available month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// First month the record is known
    pub available: Period,
    /// Real-world date the record pertains to
    pub native: NaiveDate,
    /// Position of the record in its source; identifies it and breaks ties
    pub index: usize,
}

/// Lazy `(month, anchor position)` sequence for one entity.
///
/// Anchors must be sorted by available month with at most one anchor per month.
/// Each anchor covers `[available, expansion cap)`. A month goes to the most
/// recently available anchor covering it. With `prefer_latest_native` set it
/// goes to the covering anchor with the latest native date instead, so a record
/// that arrives after newer information only fills the months where nothing
/// newer is still carried.
#[derive(Debug, Clone)]
pub struct CarryForward<'a> {
    anchors: &'a [Anchor],
    expansion: Expansion,
    prefer_latest_native: bool,
    month: Option<Period>,
    entered: usize,
    active: Vec<usize>,
}

impl<'a> CarryForward<'a> {
    /// Start the sequence at the first anchor.
    pub fn new(anchors: &'a [Anchor], expansion: Expansion, prefer_latest_native: bool) -> Self {
        debug_assert!(anchors.windows(2).all(|w| w[0].available < w[1].available));
        Self {
            anchors,
            expansion,
            prefer_latest_native,
            month: anchors.first().map(|a| a.available),
            entered: 0,
            active: Vec::new(),
        }
    }

    /// Number of anchors that could cover some month but never win one because
    /// newer information was carried over their whole span.
    pub fn stale_count(&self) -> usize {
        let mut applied = vec![false; self.anchors.len()];
        for (_, pos) in Self::new(self.anchors, self.expansion, self.prefer_latest_native) {
            applied[pos] = true;
        }
        self.anchors
            .iter()
            .zip(&applied)
            .filter(|(a, applied)| !**applied && self.expansion.cap(a.available) > a.available)
            .count()
    }

    fn priority(&self, pos: usize) -> (NaiveDate, Period) {
        let anchor = self.anchors[pos];
        if self.prefer_latest_native {
            (anchor.native, anchor.available)
        } else {
            (NaiveDate::MIN, anchor.available)
        }
    }

    fn cap(&self, pos: usize) -> Period {
        self.expansion.cap(self.anchors[pos].available)
    }

    /// Add an anchor to the active set, dropping anchors it outranks for
    /// the rest of their span.
    fn activate(&mut self, pos: usize) {
        let (priority, cap) = (self.priority(pos), self.cap(pos));
        if self.active.iter().any(|&j| self.priority(j) > priority && self.cap(j) >= cap) {
            return;
        }
        let active = std::mem::take(&mut self.active);
        self.active = active
            .into_iter()
            .filter(|&j| priority <= self.priority(j) || cap < self.cap(j))
            .collect();
        self.active.push(pos);
    }
}

impl Iterator for CarryForward<'_> {
    type Item = (Period, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let month = self.month?;
            while self.entered < self.anchors.len() && self.anchors[self.entered].available <= month {
                self.activate(self.entered);
                self.entered += 1;
            }
            let active = std::mem::take(&mut self.active);
            self.active = active.into_iter().filter(|&j| self.cap(j) > month).collect();

            let Some(winner) = self.active.iter().copied().max_by_key(|&j| self.priority(j)) else {
                self.month = self.anchors.get(self.entered).map(|a| a.available);
                continue;
            };
            self.month = Some(month.succ());
            return Some((month, winner));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u8) -> Period {
        Period::from_year_month(year, month).unwrap()
    }

    fn anchor(available: Period, native: (i32, u32), index: usize) -> Anchor {
        Anchor {
            available,
            native: NaiveDate::from_ymd_opt(native.0, native.1, 1).unwrap(),
            index,
        }
    }

    #[test]
    fn test_carry_until_superseded() {
        let anchors = [
            anchor(ym(2020, 1), (2019, 10), 0),
            anchor(ym(2020, 5), (2020, 2), 1),
        ];
        let months: Vec<_> = CarryForward::new(
            &anchors,
            Expansion::UntilSuperseded { through: ym(2020, 7) },
            true,
        )
        .collect();
        assert_eq!(
            months,
            vec![
                (ym(2020, 1), 0),
                (ym(2020, 2), 0),
                (ym(2020, 3), 0),
                (ym(2020, 4), 0),
                (ym(2020, 5), 1),
                (ym(2020, 6), 1),
                (ym(2020, 7), 1),
            ]
        );
    }

    #[test]
    fn test_horizon_before_anchor_emits_nothing() {
        let anchors = [anchor(ym(2021, 1), (2020, 9), 0)];
        let mut carry = CarryForward::new(&anchors, Expansion::UntilSuperseded { through: ym(2020, 12) }, false);
        assert_eq!(carry.next(), None);
    }

    #[test]
    fn test_months_cap_leaves_gap() {
        let anchors = [
            anchor(ym(2020, 1), (2019, 10), 0),
            anchor(ym(2020, 6), (2020, 3), 1),
        ];
        let months: Vec<_> = CarryForward::new(&anchors, Expansion::Months { months: 3 }, false)
            .map(|(m, _)| m)
            .collect();
        assert_eq!(
            months,
            vec![ym(2020, 1), ym(2020, 2), ym(2020, 3), ym(2020, 6), ym(2020, 7), ym(2020, 8)]
        );
    }

    #[test]
    fn test_months_cap_truncated_by_next() {
        let anchors = [
            anchor(ym(2020, 1), (2019, 1), 0),
            anchor(ym(2020, 3), (2019, 4), 1),
        ];
        let months: Vec<_> = CarryForward::new(&anchors, Expansion::Months { months: 12 }, false).collect();
        assert_eq!(months.len(), 2 + 12);
        assert_eq!(months[1], (ym(2020, 2), 0));
        assert_eq!(months[2], (ym(2020, 3), 1));
    }

    #[test]
    fn test_native_only() {
        let anchors = [
            anchor(ym(2020, 1), (2020, 1), 0),
            anchor(ym(2020, 3), (2020, 3), 1),
        ];
        let months: Vec<_> = CarryForward::new(&anchors, Expansion::None, false).collect();
        assert_eq!(months, vec![(ym(2020, 1), 0), (ym(2020, 3), 1)]);
    }

    #[test]
    fn test_stale_anchor_does_not_supersede() {
        // The record available in 2020-03 pertains to an older period than the
        // one carried until the horizon and never wins a month.
        let anchors = [
            anchor(ym(2020, 1), (2019, 9), 0),
            anchor(ym(2020, 3), (2019, 6), 1),
            anchor(ym(2020, 5), (2019, 12), 2),
        ];
        let expansion = Expansion::UntilSuperseded { through: ym(2020, 5) };
        let months: Vec<_> = CarryForward::new(&anchors, expansion, true).map(|(_, i)| i).collect();
        assert_eq!(months, vec![0, 0, 0, 0, 2]);
        assert_eq!(CarryForward::new(&anchors, expansion, true).stale_count(), 1);

        let by_arrival: Vec<_> = CarryForward::new(&anchors, expansion, false).map(|(_, i)| i).collect();
        assert_eq!(by_arrival, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_older_record_fills_after_newer_cap() {
        // The record available in 2020-02 pertains to an older quarter. It loses
        // 2020-02 to the record carried since 2019-12 and covers the months after
        // that record's cap.
        let anchors = [
            anchor(ym(2019, 12), (2019, 9), 0),
            anchor(ym(2020, 2), (2019, 6), 1),
        ];
        let carry = CarryForward::new(&anchors, Expansion::Months { months: 3 }, true);
        assert_eq!(
            carry.clone().collect::<Vec<_>>(),
            vec![
                (ym(2019, 12), 0),
                (ym(2020, 1), 0),
                (ym(2020, 2), 0),
                (ym(2020, 3), 1),
                (ym(2020, 4), 1),
            ]
        );
        assert_eq!(carry.stale_count(), 0);
    }

    #[test]
    fn test_native_only_prefers_latest_native() {
        let anchors = [
            anchor(ym(2020, 1), (2019, 12), 0),
            anchor(ym(2020, 2), (2020, 1), 1),
        ];
        let months: Vec<_> = CarryForward::new(&anchors, Expansion::None, true).collect();
        assert_eq!(months, vec![(ym(2020, 1), 0), (ym(2020, 2), 1)]);
    }

    #[test]
    fn test_restartable() {
        let anchors = [anchor(ym(2020, 1), (2019, 10), 0)];
        let carry = CarryForward::new(&anchors, Expansion::Months { months: 3 }, false);
        let first: Vec<_> = carry.clone().collect();
        let second: Vec<_> = carry.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_empty() {
        assert_eq!(CarryForward::new(&[], Expansion::None, true).count(), 0);
    }
}
