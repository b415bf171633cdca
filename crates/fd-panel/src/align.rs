//! As-of merging of monthly panels.
//!
//! Every input panel is already keyed by available month, so the as-of join is
//! a relational join on `(entity, available_month)`: no input is shifted and no
//! month is invented. Missing values left by the join are then resolved by a
//! per-field [`FillPolicy`].

use crate::{
    PanelError, Result,
    executor::Executor,
    panel::{Column, EntityMonth, Panel, PeriodTable},
    period::Period,
    types::{FieldType, Schema},
};
use serde::{Deserialize, Serialize};

/// How a missing value of one field is resolved after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FillPolicy {
    /// Drop the row if the field is still missing after filling.
    DropRowIfMissing,
    /// Replace missing numeric values with zero.
    ZeroFill,
    /// Repeat the entity's last observed value if it is at most
    /// `max_gap_months` calendar months old.
    ForwardFillWithinEntity {
        /// Largest distance in months from the last observed value
        max_gap_months: u32,
    },
}

/// Fill policies by field name. Fields not named are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerFieldPolicy {
    policies: Vec<(String, FillPolicy)>,
}

impl PerFieldPolicy {
    /// No policies.
    pub const fn new() -> Self {
        Self { policies: Vec::new() }
    }

    /// Builder-style policy assignment; a later assignment for the same field wins.
    #[must_use]
    pub fn with(mut self, field: &str, policy: FillPolicy) -> Self {
        self.policies.retain(|(name, _)| name != field);
        self.policies.push((field.to_string(), policy));
        self
    }

    /// Policy of a field.
    pub fn get(&self, field: &str) -> Option<FillPolicy> {
        self.policies.iter().find(|(name, _)| name == field).map(|(_, p)| *p)
    }

    /// Policies in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FillPolicy)> {
        self.policies.iter().map(|(name, p)| (name.as_str(), *p))
    }

    /// Whether no policy is set.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Which keys survive a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Keys present in any input.
    #[default]
    Outer,
    /// Keys of the first input only.
    Left,
    /// Keys present in every input.
    Inner,
}

/// Merges panels and attaches month-level series.
#[derive(Debug, Clone, Default)]
pub struct PanelAligner {
    executor: Executor,
}

impl PanelAligner {
    /// Aligner on rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aligner on a given executor.
    pub const fn with_executor(executor: Executor) -> Self {
        Self { executor }
    }

    /// Outer join on `(entity, available_month)`, then apply `policy`.
    pub fn merge(&self, panels: &[&Panel], policy: &PerFieldPolicy) -> Result<Panel> {
        self.merge_with(panels, policy, JoinKind::Outer)
    }

    /// Join on `(entity, available_month)` with an explicit join kind, then
    /// apply `policy`.
    ///
    /// A field present in several inputs must have the same type everywhere
    /// and takes the first non-missing value in input order.
    pub fn merge_with(&self, panels: &[&Panel], policy: &PerFieldPolicy, join: JoinKind) -> Result<Panel> {
        let mut schema = Schema::new();
        for panel in panels {
            schema.merge(panel.schema())?;
        }
        validate_policy(&schema, policy)?;

        let keys = join_keys(panels, join);
        let mut columns: Vec<Option<Column>> = vec![None; schema.len()];
        for panel in panels {
            let rows = gather_rows(&keys, panel.keys());
            for (field, column) in panel.schema().iter().zip(panel.columns()) {
                let Some(i) = schema.position(&field.name) else {
                    continue;
                };
                let taken = column.take(&rows);
                match &mut columns[i] {
                    Some(existing) => existing.coalesce(&taken),
                    slot @ None => *slot = Some(taken),
                }
            }
        }
        let columns = schema
            .iter()
            .zip(columns)
            .map(|(field, column)| column.unwrap_or_else(|| Column::nulls(field.dtype, keys.len())))
            .collect();

        let merged = Panel::from_sorted_parts(keys, schema, columns);
        tracing::debug!(
            inputs = panels.len(),
            rows = merged.len(),
            fields = merged.schema().len(),
            join = ?join,
            "merged panels"
        );
        self.apply_policy(&merged, policy)
    }

    /// Resolve missing values of one panel: fills first, then drops.
    pub fn apply_policy(&self, panel: &Panel, policy: &PerFieldPolicy) -> Result<Panel> {
        validate_policy(panel.schema(), policy)?;
        let mut filled = panel.clone();
        for (field, p) in policy.iter() {
            match p {
                FillPolicy::ForwardFillWithinEntity { max_gap_months } => {
                    let column = self.forward_fill(&filled, field, max_gap_months)?;
                    filled = filled.with_column(field, column)?;
                }
                FillPolicy::ZeroFill => {
                    let values = filled.numeric(field)?.iter().map(|v| Some(v.unwrap_or(0.0))).collect();
                    filled = filled.with_column(field, Column::Numeric(values))?;
                }
                FillPolicy::DropRowIfMissing => {}
            }
        }

        let required: Vec<&Column> = policy
            .iter()
            .filter(|(_, p)| *p == FillPolicy::DropRowIfMissing)
            .map(|(field, _)| filled.column(field))
            .collect::<Result<_>>()?;
        if required.is_empty() {
            return Ok(filled);
        }
        let keep: Vec<usize> = (0..filled.len())
            .filter(|&row| required.iter().all(|c| !c.is_missing(row)))
            .collect();
        let dropped = filled.len() - keep.len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped rows with missing required fields");
        }
        Ok(filled.take_rows(&keep))
    }

    /// Attach month-level fields to every row of the same month.
    ///
    /// Months absent from the table leave the attached fields missing.
    pub fn attach_period_fields(&self, panel: &Panel, table: &PeriodTable) -> Result<Panel> {
        let rows: Vec<Option<usize>> = panel.keys().iter().map(|k| table.position(k.month)).collect();
        let mut attached = panel.clone();
        for (field, column) in table.schema().iter().zip(table.columns()) {
            attached = attached.with_column(&field.name, column.take(&rows))?;
        }
        Ok(attached)
    }

    fn forward_fill(&self, panel: &Panel, field: &str, max_gap_months: u32) -> Result<Column> {
        let column = panel.column(field)?;
        let keys = panel.keys();
        let sources = self.executor.map_partitions(&panel.entity_ranges(), |(_, range)| {
            let mut last: Option<(usize, Period)> = None;
            let mut out = Vec::with_capacity(range.len());
            for row in range.clone() {
                let month = keys[row].month;
                if column.is_missing(row) {
                    out.push(last.and_then(|(source, observed)| {
                        (Period::months_between(observed, month) <= i64::from(max_gap_months)).then_some(source)
                    }));
                } else {
                    last = Some((row, month));
                    out.push(Some(row));
                }
            }
            Ok(out)
        })?;
        let sources: Vec<Option<usize>> = sources.into_iter().flatten().collect();
        Ok(column.take(&sources))
    }
}

fn validate_policy(schema: &Schema, policy: &PerFieldPolicy) -> Result<()> {
    for (field, p) in policy.iter() {
        let dtype = schema.get(field).ok_or_else(|| PanelError::MissingField(field.to_string()))?;
        if p == FillPolicy::ZeroFill && dtype != FieldType::Numeric {
            return Err(PanelError::InvalidPolicy {
                field: field.to_string(),
                reason: format!("zero fill requires a numeric field, found {dtype}"),
            });
        }
    }
    Ok(())
}

fn join_keys(panels: &[&Panel], join: JoinKind) -> Vec<EntityMonth> {
    let Some((first, rest)) = panels.split_first() else {
        return Vec::new();
    };
    match join {
        JoinKind::Left => first.keys().to_vec(),
        JoinKind::Inner => first
            .keys()
            .iter()
            .copied()
            .filter(|k| rest.iter().all(|p| p.keys().binary_search(k).is_ok()))
            .collect(),
        JoinKind::Outer => {
            let mut keys: Vec<EntityMonth> = panels.iter().flat_map(|p| p.keys().iter().copied()).collect();
            keys.sort_unstable();
            keys.dedup();
            keys
        }
    }
}

/// Position in `source` of each key in `keys`. Both slices are sorted.
fn gather_rows(keys: &[EntityMonth], source: &[EntityMonth]) -> Vec<Option<usize>> {
    let mut rows = Vec::with_capacity(keys.len());
    let mut j = 0;
    for key in keys {
        while j < source.len() && source[j] < *key {
            j += 1;
        }
        rows.push((j < source.len() && source[j] == *key).then_some(j));
    }
    rows
}
