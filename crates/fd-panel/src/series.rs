//! Source series and their materialization to monthly panels.
//!
//! A [`SourceSeries`] is an ordered stream of [`Observation`]s from one source
//! (annual filings, quarterly filings, analyst forecasts, ...), each keyed by
//! an external identifier and dated by the period it pertains to.
//! Materialization resolves identifiers, applies the source's reporting lag,
//! deduplicates records that land on the same month and carries each record
//! forward until it is superseded.
//!
//! The resulting panel is keyed by available month only: no row can expose
//! information before `month(native_date) + nominal_lag`.

use crate::{
    PanelError, Result,
    crosswalk::{Crosswalk, Resolver},
    executor::Executor,
    expand::{Anchor, CarryForward, Expansion},
    panel::{Column, EntityMonth, Panel},
    period::Period,
    types::{EntityId, ExternalKey, FieldType, Namespace, Schema, Value},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the audit column added by [`MaterializeOptions::keep_native_date`].
pub const NATIVE_DATE_FIELD: &str = "native_date";

/// One fact about one entity as delivered by the acquisition layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Namespace of the entity key
    pub namespace: Namespace,
    /// Entity key in that namespace
    pub key: ExternalKey,
    /// Real-world date the observation pertains to (fiscal period end, trade date)
    pub native_date: NaiveDate,
    /// Named field values
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Observation {
    /// Observation without fields.
    pub fn new(namespace: Namespace, key: impl Into<ExternalKey>, native_date: NaiveDate) -> Self {
        Self {
            namespace,
            key: key.into(),
            native_date,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }
}

/// Reporting lag of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LagPolicy {
    /// Available a fixed number of months after the native month.
    Fixed {
        /// Lag in months
        months: u32,
    },
    /// Fixed lag, pushed later when the actual disclosure date says so.
    ///
    /// Observations disclosed more than `max_plausible_lag_months` after their
    /// native month are treated as misrecorded and dropped.
    FixedWithDisclosureOverride {
        /// Nominal lag in months
        nominal_months: u32,
        /// Date field holding the actual disclosure date
        disclosure_field: String,
        /// Largest believable gap between native and disclosure month
        max_plausible_lag_months: u32,
    },
}

/// Where a lagged observation lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagOutcome {
    /// First month the observation is known
    Available(Period),
    /// Disclosure too late to be believable
    Implausible,
}

impl LagPolicy {
    /// Nominal lag in months; the minimum lag of any row from this source.
    pub const fn nominal_months(&self) -> u32 {
        match self {
            Self::Fixed { months } => *months,
            Self::FixedWithDisclosureOverride { nominal_months, .. } => *nominal_months,
        }
    }

    /// Available month of an observation.
    pub fn available_month(&self, observation: &Observation) -> LagOutcome {
        let native = Period::from_date(observation.native_date);
        let nominal = native.add_months(i64::from(self.nominal_months()));
        match self {
            Self::Fixed { .. } => LagOutcome::Available(nominal),
            Self::FixedWithDisclosureOverride {
                nominal_months,
                disclosure_field,
                max_plausible_lag_months,
            } => {
                let Some(disclosed) = observation.fields.get(disclosure_field).and_then(Value::as_date) else {
                    return LagOutcome::Available(nominal);
                };
                let disclosed = Period::from_date(disclosed);
                if Period::months_between(native, disclosed) > i64::from(*max_plausible_lag_months) {
                    return LagOutcome::Implausible;
                }
                LagOutcome::Available(nominal.max(disclosed.add_months(i64::from(*nominal_months))))
            }
        }
    }
}

/// Which record survives when several land on the same (entity, month).
///
/// Sources must choose explicitly; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the most recent native date; later insertion wins ties.
    KeepLatestNative,
    /// Keep the earliest native date; earlier insertion wins ties.
    KeepFirstNative,
}

/// Full set of materialization choices for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeOptions {
    /// Reporting lag
    pub lag: LagPolicy,
    /// Same-month deduplication
    pub dedup: DedupPolicy,
    /// Carry-forward horizon
    pub expansion: Expansion,
    /// Add a `native_date` column for auditing; never hand it to signal formulas
    #[serde(default)]
    pub keep_native_date: bool,
}

impl MaterializeOptions {
    /// Options without the audit column.
    pub const fn new(lag: LagPolicy, dedup: DedupPolicy, expansion: Expansion) -> Self {
        Self {
            lag,
            dedup,
            expansion,
            keep_native_date: false,
        }
    }

    /// Add the `native_date` audit column.
    #[must_use]
    pub const fn keep_native_date(mut self) -> Self {
        self.keep_native_date = true;
        self
    }
}

/// Data-quality counts of one materialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Observations in the source
    pub observations: usize,
    /// Observations with no valid identifier link at their native month
    pub unresolved: usize,
    /// Observations dropped for an implausible disclosure lag
    pub implausible_lag: usize,
    /// Observations discarded by same-month deduplication
    pub duplicates: usize,
    /// Observations never applied because newer information was already carried
    pub stale: usize,
    /// Monthly rows produced
    pub rows: usize,
}

/// A materialized panel with its data-quality report.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Monthly panel
    pub panel: Panel,
    /// Counts of dropped and collapsed observations
    pub report: MaterializeReport,
}

/// Typed observation stream from one source.
#[derive(Debug, Clone)]
pub struct SourceSeries {
    name: String,
    schema: Schema,
    observations: Vec<Observation>,
}

impl SourceSeries {
    /// Empty series with a declared field schema.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            observations: Vec::new(),
        }
    }

    /// Series from an ordered observation stream.
    pub fn from_observations<I>(name: impl Into<String>, schema: Schema, observations: I) -> Result<Self>
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut series = Self::new(name, schema);
        for observation in observations {
            series.push(observation)?;
        }
        Ok(series)
    }

    /// Ingest one observation, checking its fields against the schema.
    pub fn push(&mut self, observation: Observation) -> Result<()> {
        for (field, value) in &observation.fields {
            let declared = self
                .schema
                .get(field)
                .ok_or_else(|| PanelError::MissingField(format!("{}.{field}", self.name)))?;
            if declared != value.field_type() {
                return Err(PanelError::SchemaConflict {
                    field: field.clone(),
                    expected: declared,
                    found: value.field_type(),
                });
            }
        }
        self.observations.push(observation);
        Ok(())
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields.
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Observations in insertion order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Materialize on rayon's global pool.
    pub fn materialize(
        &self,
        crosswalk: &Crosswalk,
        lag: LagPolicy,
        dedup: DedupPolicy,
        expansion: Expansion,
    ) -> Result<Materialized> {
        self.materialize_with(&Executor::new(), crosswalk, &MaterializeOptions::new(lag, dedup, expansion))
    }

    /// Materialize to a monthly panel, one entity partition per task.
    pub fn materialize_with(
        &self,
        executor: &Executor,
        crosswalk: &Crosswalk,
        options: &MaterializeOptions,
    ) -> Result<Materialized> {
        self.validate(options)?;
        let mut report = MaterializeReport {
            observations: self.observations.len(),
            ..Default::default()
        };

        // Resolve and lag sequentially; both are cheap lookups.
        let mut resolver = Resolver::new(crosswalk);
        let mut candidates: Vec<(EntityId, Anchor)> = Vec::with_capacity(self.observations.len());
        for (index, observation) in self.observations.iter().enumerate() {
            let native_month = Period::from_date(observation.native_date);
            let Some(entity) = resolver.resolve(&observation.namespace, observation.key.as_str(), native_month)
            else {
                continue;
            };
            match options.lag.available_month(observation) {
                LagOutcome::Available(available) => candidates.push((
                    entity,
                    Anchor {
                        available,
                        native: observation.native_date,
                        index,
                    },
                )),
                LagOutcome::Implausible => report.implausible_lag += 1,
            }
        }
        report.unresolved = resolver.stats().unresolved;

        candidates.sort_by_key(|(entity, a)| (*entity, a.available, a.native, a.index));
        let partitions = entity_partitions(&candidates);

        let dedup = options.dedup;
        let expansion = options.expansion;
        let expanded = executor.map_partitions(&partitions, |(entity, range)| {
            let entity = *entity;
            let anchors = dedup_same_month(candidates[range.clone()].iter().map(|(_, a)| *a), dedup);
            let duplicates = range.len() - anchors.len();
            let carry = CarryForward::new(&anchors, expansion, dedup == DedupPolicy::KeepLatestNative);
            let stale = carry.stale_count();
            let rows: Vec<(EntityMonth, usize)> = carry
                .map(|(month, pos)| (EntityMonth::new(entity, month), anchors[pos].index))
                .collect();
            Ok((rows, duplicates, stale))
        })?;

        let mut keys = Vec::new();
        let mut sources = Vec::new();
        for (rows, duplicates, stale) in expanded {
            report.duplicates += duplicates;
            report.stale += stale;
            for (key, index) in rows {
                keys.push(key);
                sources.push(index);
            }
        }
        report.rows = keys.len();

        let (schema, columns) = self.gather_columns(&sources, options.keep_native_date)?;
        let panel = Panel::from_parts(keys, schema, columns)?;

        tracing::info!(
            source = %self.name,
            observations = report.observations,
            rows = report.rows,
            entities = partitions.len(),
            "materialized source series"
        );
        if report.unresolved > 0 || report.implausible_lag > 0 {
            tracing::warn!(
                source = %self.name,
                unresolved = report.unresolved,
                implausible_lag = report.implausible_lag,
                "observations dropped during materialization"
            );
        }
        Ok(Materialized { panel, report })
    }

    fn validate(&self, options: &MaterializeOptions) -> Result<()> {
        if let LagPolicy::FixedWithDisclosureOverride { disclosure_field, .. } = &options.lag {
            match self.schema.get(disclosure_field) {
                Some(FieldType::Date) => {}
                Some(found) => {
                    return Err(PanelError::TypeMismatch {
                        field: disclosure_field.clone(),
                        required: FieldType::Date,
                        found,
                    });
                }
                None => return Err(PanelError::MissingField(disclosure_field.clone())),
            }
        }
        if options.expansion == (Expansion::Months { months: 0 }) {
            return Err(PanelError::InvalidWindow(format!(
                "source '{}' expands records over zero months",
                self.name
            )));
        }
        if options.keep_native_date && self.schema.contains(NATIVE_DATE_FIELD) {
            return Err(PanelError::SchemaConflict {
                field: NATIVE_DATE_FIELD.to_string(),
                expected: FieldType::Date,
                found: self.schema.get(NATIVE_DATE_FIELD).unwrap_or(FieldType::Date),
            });
        }
        Ok(())
    }

    fn gather_columns(&self, sources: &[usize], keep_native_date: bool) -> Result<(Schema, Vec<Column>)> {
        let mut schema = self.schema.clone();
        let mut columns = Vec::with_capacity(schema.len() + 1);
        for field in self.schema.iter() {
            let mut column = Column::nulls(field.dtype, sources.len());
            for (row, &index) in sources.iter().enumerate() {
                column.set(row, self.observations[index].fields.get(&field.name).cloned());
            }
            columns.push(column);
        }
        if keep_native_date {
            schema.insert(NATIVE_DATE_FIELD, FieldType::Date)?;
            columns.push(Column::Date(
                sources
                    .iter()
                    .map(|&index| Some(self.observations[index].native_date))
                    .collect(),
            ));
        }
        Ok((schema, columns))
    }
}

/// Contiguous candidate ranges per entity; candidates must be sorted by entity.
fn entity_partitions(candidates: &[(EntityId, Anchor)]) -> Vec<(EntityId, std::ops::Range<usize>)> {
    let mut partitions = Vec::new();
    let mut start = 0;
    for i in 1..=candidates.len() {
        if i == candidates.len() || candidates[i].0 != candidates[start].0 {
            partitions.push((candidates[start].0, start..i));
            start = i;
        }
    }
    partitions
}

/// Collapse anchors sharing an available month. Input is sorted by
/// `(available, native, index)`.
fn dedup_same_month(anchors: impl Iterator<Item = Anchor>, policy: DedupPolicy) -> Vec<Anchor> {
    let mut kept: Vec<Anchor> = Vec::new();
    for anchor in anchors {
        match kept.last_mut() {
            Some(last) if last.available == anchor.available => {
                if policy == DedupPolicy::KeepLatestNative {
                    *last = anchor;
                }
            }
            _ => kept.push(anchor),
        }
    }
    kept
}
