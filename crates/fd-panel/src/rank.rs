//! Per-period cross-sectional ranking.
//!
//! Ranks are computed within each available month against a reference
//! distribution: the rows of that month that have a value and satisfy a
//! subpopulation predicate (e.g. NYSE-listed stocks for size breakpoints).
//! Every row with a value is then ranked against that distribution, members or
//! not.
//!
//! Values for all entities are collected before any period is ranked; periods
//! are then ranked independently in parallel.

use crate::{
    PanelError, Result,
    executor::Executor,
    panel::{Column, Panel, PeriodTable, RowRef},
    period::Period,
    types::{FieldType, Schema},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Form of the rank written back to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOutput {
    /// Share of the reference distribution at or below the row, in `[0, 1]`
    Percentile,
    /// Equal-count bucket in `[1, n]`
    NTile(u32),
}

/// One period's rows with a value, and which of them form the reference set.
#[derive(Debug)]
struct PeriodGroup {
    month: Period,
    rows: Vec<usize>,
    members: Vec<bool>,
}

/// Cross-sectional ranking, cutoffs and standardization.
#[derive(Debug, Clone, Default)]
pub struct CrossSectionalRanker {
    executor: Executor,
}

impl CrossSectionalRanker {
    /// Ranker on rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranker on a given executor.
    pub const fn with_executor(executor: Executor) -> Self {
        Self { executor }
    }

    /// Derive a panel with the per-month rank of `field` in `output_field`.
    ///
    /// Rows are grouped by their available month, the panel's key month; no
    /// other period field can be chosen, so ranks never mix rows known in
    /// different months. Ties in the reference set are broken by row order, so
    /// identical inputs always produce identical ranks. Rows without a value,
    /// and months whose reference set is empty, get no rank.
    pub fn rank<F>(
        &self,
        panel: &Panel,
        field: &str,
        subpopulation: F,
        output: RankOutput,
        output_field: &str,
    ) -> Result<Panel>
    where
        F: Fn(RowRef<'_>) -> bool,
    {
        if output == RankOutput::NTile(0) {
            return Err(PanelError::InvalidPolicy {
                field: output_field.to_string(),
                reason: "zero buckets".to_string(),
            });
        }
        let values = panel.numeric(field)?;
        let groups = period_groups(panel, values, &subpopulation);

        let ranked = self.executor.map_partitions(&groups, |group| {
            let mut reference: Vec<(f64, usize)> = group
                .rows
                .iter()
                .zip(&group.members)
                .filter(|(_, member)| **member)
                .map(|(&row, _)| (value_at(values, row), row))
                .collect();
            reference.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let n = reference.len();

            Ok(group
                .rows
                .iter()
                .zip(&group.members)
                .map(|(&row, &member)| {
                    if n == 0 {
                        return (row, None);
                    }
                    let x = value_at(values, row);
                    let at_or_below = if member {
                        reference.partition_point(|&(v, r)| v.total_cmp(&x).then(r.cmp(&row)).is_le())
                    } else {
                        reference.partition_point(|&(v, _)| v.total_cmp(&x).is_le())
                    };
                    let rank = match output {
                        RankOutput::Percentile => at_or_below as f64 / n as f64,
                        RankOutput::NTile(buckets) => bucket(at_or_below, n, buckets) as f64,
                    };
                    (row, Some(rank))
                })
                .collect::<Vec<_>>())
        })?;

        let mut out = vec![None; panel.len()];
        for (row, rank) in ranked.into_iter().flatten() {
            out[row] = rank;
        }
        panel.with_column(output_field, Column::Numeric(out))
    }

    /// Per-month `q`-quantile of `field` over the subpopulation, linearly
    /// interpolated. Months without any member are absent from the table.
    pub fn quantile_cutoff<F>(
        &self,
        panel: &Panel,
        field: &str,
        q: f64,
        subpopulation: F,
        output_field: &str,
    ) -> Result<PeriodTable>
    where
        F: Fn(RowRef<'_>) -> bool,
    {
        if !(0.0..=1.0).contains(&q) {
            return Err(PanelError::InvalidPolicy {
                field: output_field.to_string(),
                reason: format!("quantile {q} outside [0, 1]"),
            });
        }
        let values = panel.numeric(field)?;
        let groups = period_groups(panel, values, &subpopulation);
        let cutoffs = self.executor.map_partitions(&groups, |group| {
            let mut reference: Vec<f64> = group
                .rows
                .iter()
                .zip(&group.members)
                .filter(|(_, member)| **member)
                .map(|(&row, _)| value_at(values, row))
                .collect();
            reference.sort_by(f64::total_cmp);
            Ok(interpolate(&reference, q).map(|cutoff| (group.month, cutoff)))
        })?;

        let (months, cutoffs): (Vec<Period>, Vec<Option<f64>>) =
            cutoffs.into_iter().flatten().map(|(m, c)| (m, Some(c))).unzip();
        PeriodTable::from_parts(
            months,
            Schema::new().with(output_field, FieldType::Numeric),
            vec![Column::Numeric(cutoffs)],
        )
    }

    /// Derive a panel with the per-month cross-sectional z-score of `field`.
    ///
    /// Uses the sample standard deviation; months with fewer than two values
    /// or no dispersion get no score.
    pub fn zscore(&self, panel: &Panel, field: &str, output_field: &str) -> Result<Panel> {
        let values = panel.numeric(field)?;
        let groups = period_groups(panel, values, &|_: RowRef<'_>| true);
        let scored = self.executor.map_partitions(&groups, |group| {
            let xs: Vec<f64> = group.rows.iter().map(|&row| value_at(values, row)).collect();
            let n = xs.len() as f64;
            let mean = xs.iter().sum::<f64>() / n;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std = var.sqrt();
            let usable = xs.len() >= 2 && std > 0.0;
            Ok(group
                .rows
                .iter()
                .zip(xs)
                .map(|(&row, x)| (row, usable.then(|| (x - mean) / std)))
                .collect::<Vec<_>>())
        })?;

        let mut out = vec![None; panel.len()];
        for (row, z) in scored.into_iter().flatten() {
            out[row] = z;
        }
        panel.with_column(output_field, Column::Numeric(out))
    }
}

/// Rows with a finite value grouped by month, in row order. Evaluates the
/// predicate for every such row before anything is ranked.
fn period_groups<F>(panel: &Panel, values: &[Option<f64>], subpopulation: &F) -> Vec<PeriodGroup>
where
    F: Fn(RowRef<'_>) -> bool,
{
    let mut by_month: BTreeMap<Period, PeriodGroup> = BTreeMap::new();
    for row in panel.rows() {
        if !values[row.index()].is_some_and(f64::is_finite) {
            continue;
        }
        let month = row.month();
        let group = by_month.entry(month).or_insert_with(|| PeriodGroup {
            month,
            rows: Vec::new(),
            members: Vec::new(),
        });
        group.rows.push(row.index());
        group.members.push(subpopulation(row));
    }
    by_month.into_values().collect()
}

fn value_at(values: &[Option<f64>], row: usize) -> f64 {
    values[row].unwrap_or(f64::NAN)
}

/// `ceil(k * buckets / n)`, at least 1. Integer arithmetic keeps exact
/// boundaries exact.
fn bucket(k: usize, n: usize, buckets: u32) -> u32 {
    let scaled = (k as u64 * u64::from(buckets)).div_ceil(n as u64);
    scaled.clamp(1, u64::from(buckets)) as u32
}

fn interpolate(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        panel::PanelBuilder,
        types::{EntityId, Value},
    };
    use approx::assert_relative_eq;

    fn ym(year: i32, month: u8) -> Period {
        Period::from_year_month(year, month).unwrap()
    }

    /// (entity, month, size, exchange)
    fn panel(rows: &[(u64, Period, Option<f64>, &str)]) -> Panel {
        let mut b = PanelBuilder::new(
            Schema::new()
                .with("size", FieldType::Numeric)
                .with("exchcd", FieldType::Categorical),
        );
        for &(entity, month, size, exchange) in rows {
            let mut values = vec![("exchcd", Value::from(exchange))];
            if let Some(size) = size {
                values.push(("size", Value::from(size)));
            }
            b.push_row(EntityId(entity), month, values).unwrap();
        }
        b.build().unwrap()
    }

    fn is_nyse(row: RowRef<'_>) -> bool {
        row.categorical("exchcd") == Some("1")
    }

    #[test]
    fn test_percentile_all_members() {
        let m = ym(2020, 1);
        let p = panel(&[(1, m, Some(3.0), "1"), (2, m, Some(1.0), "1"), (3, m, Some(4.0), "1"), (4, m, Some(2.0), "1")]);
        let out = CrossSectionalRanker::new()
            .rank(&p, "size", |_| true, RankOutput::Percentile, "size_pct")
            .unwrap();
        assert_eq!(out.numeric("size_pct").unwrap(), &[Some(0.75), Some(0.25), Some(1.0), Some(0.5)]);
    }

    #[test]
    fn test_ranks_within_available_month() {
        let (jan, feb) = (ym(2020, 1), ym(2020, 2));
        let p = panel(&[(1, jan, Some(1.0), "1"), (1, feb, Some(9.0), "1"), (2, jan, Some(2.0), "1"), (2, feb, Some(3.0), "1")]);
        let out = CrossSectionalRanker::new()
            .rank(&p, "size", |_| true, RankOutput::Percentile, "size_pct")
            .unwrap();
        assert_eq!(out.numeric("size_pct").unwrap(), &[Some(0.5), Some(1.0), Some(1.0), Some(0.5)]);
    }

    #[test]
    fn test_ntile_against_subpopulation() {
        let m = ym(2020, 6);
        let p = panel(&[
            (1, m, Some(5.0), "3"),
            (2, m, Some(10.0), "1"),
            (3, m, Some(15.0), "2"),
            (4, m, Some(20.0), "1"),
            (5, m, Some(25.0), "3"),
        ]);
        let out = CrossSectionalRanker::new()
            .rank(&p, "size", is_nyse, RankOutput::NTile(2), "size_half")
            .unwrap();
        assert_eq!(
            out.numeric("size_half").unwrap(),
            &[Some(1.0), Some(1.0), Some(1.0), Some(2.0), Some(2.0)]
        );
    }

    #[test]
    fn test_ties_break_by_row_order() {
        let m = ym(2020, 1);
        let p = panel(&[(1, m, Some(1.0), "1"), (2, m, Some(1.0), "1")]);
        let out = CrossSectionalRanker::new()
            .rank(&p, "size", |_| true, RankOutput::Percentile, "pct")
            .unwrap();
        assert_eq!(out.numeric("pct").unwrap(), &[Some(0.5), Some(1.0)]);
    }

    #[test]
    fn test_missing_and_empty_reference() {
        let (jan, feb) = (ym(2020, 1), ym(2020, 2));
        let p = panel(&[
            (1, jan, Some(1.0), "1"),
            (1, feb, Some(2.0), "3"),
            (2, jan, None, "1"),
            (2, feb, Some(3.0), "3"),
        ]);
        let out = CrossSectionalRanker::new()
            .rank(&p, "size", is_nyse, RankOutput::NTile(10), "dec")
            .unwrap();
        // feb has no NYSE member; entity 2 has no value in jan
        assert_eq!(out.numeric("dec").unwrap(), &[Some(10.0), None, None, None]);
    }

    #[test]
    fn test_decile_boundaries_are_exact() {
        let m = ym(2020, 1);
        let rows: Vec<_> = (1..=10).map(|i| (i, m, Some(i as f64), "1")).collect();
        let out = CrossSectionalRanker::new()
            .rank(&panel(&rows), "size", |_| true, RankOutput::NTile(10), "dec")
            .unwrap();
        let expected: Vec<_> = (1..=10).map(|i| Some(f64::from(i))).collect();
        assert_eq!(out.numeric("dec").unwrap(), expected.as_slice());
    }

    #[test]
    fn test_ranking_is_stable() {
        let m = ym(2020, 1);
        let rows: Vec<_> = (1..=50).map(|i| (i, m, Some(((i * 7) % 13) as f64), "1")).collect();
        let p = panel(&rows);
        let ranker = CrossSectionalRanker::with_executor(Executor::with_workers(3).unwrap());
        let first = ranker.rank(&p, "size", |_| true, RankOutput::NTile(5), "q").unwrap();
        let second = ranker.rank(&p, "size", |_| true, RankOutput::NTile(5), "q").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let p = panel(&[(1, ym(2020, 1), Some(1.0), "1")]);
        let err = CrossSectionalRanker::new().rank(&p, "size", |_| true, RankOutput::NTile(0), "q");
        assert!(matches!(err, Err(PanelError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_quantile_cutoff() {
        let (jan, feb) = (ym(2020, 1), ym(2020, 2));
        let mut rows: Vec<_> = (1..=5).map(|i| (i, jan, Some(i as f64), "1")).collect();
        rows.push((9, jan, Some(100.0), "3"));
        rows.push((9, feb, Some(100.0), "3"));
        let table = CrossSectionalRanker::new()
            .quantile_cutoff(&panel(&rows), "size", 0.2, is_nyse, "me_p20")
            .unwrap();
        assert_eq!(table.months(), &[jan]);
        assert_relative_eq!(table.get(jan, "me_p20").and_then(|v| v.as_f64()).unwrap(), 1.8, epsilon = 1e-12);

        let err = CrossSectionalRanker::new().quantile_cutoff(&panel(&rows), "size", 1.5, is_nyse, "x");
        assert!(err.is_err());
    }

    #[test]
    fn test_zscore() {
        let (jan, feb) = (ym(2024, 1), ym(2024, 2));
        let p = panel(&[
            (1, jan, Some(1.0), "1"),
            (1, feb, Some(4.0), "1"),
            (2, jan, Some(2.0), "1"),
            (2, feb, Some(4.0), "1"),
            (3, jan, Some(3.0), "1"),
        ]);
        let out = CrossSectionalRanker::new().zscore(&p, "size", "size_z").unwrap();
        let z = out.numeric("size_z").unwrap();
        assert_relative_eq!(z[0].unwrap(), -1.0, epsilon = 1e-12);
        assert_relative_eq!(z[2].unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[4].unwrap(), 1.0, epsilon = 1e-12);
        // feb has no dispersion
        assert_eq!(z[1], None);
        assert_eq!(z[3], None);
    }
}
