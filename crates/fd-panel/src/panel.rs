//! The monthly panel.
//!
//! A [`Panel`] is a columnar table keyed by `(entity, available_month)`. Keys are
//! sorted by entity then month and are unique; every constructor enforces this,
//! so each entity's history is a contiguous, month-ordered block of rows.
//!
//! Panels are immutable. Operations derive new panels.

use crate::{
    PanelError, Result,
    period::Period,
    types::{EntityId, FieldType, Schema, Value},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Row key of a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityMonth {
    /// Canonical entity
    pub entity: EntityId,
    /// Month the row's information is available
    pub month: Period,
}

impl EntityMonth {
    /// Create a key.
    pub const fn new(entity: EntityId, month: Period) -> Self {
        Self { entity, month }
    }
}

/// Typed column storage. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum Column {
    /// Numeric values
    Numeric(Vec<Option<f64>>),
    /// Categorical values
    Categorical(Vec<Option<String>>),
    /// Date values
    Date(Vec<Option<NaiveDate>>),
}

impl Column {
    /// Column of `len` missing values.
    pub fn nulls(dtype: FieldType, len: usize) -> Self {
        match dtype {
            FieldType::Numeric => Self::Numeric(vec![None; len]),
            FieldType::Categorical => Self::Categorical(vec![None; len]),
            FieldType::Date => Self::Date(vec![None; len]),
        }
    }

    /// Semantic type.
    pub const fn dtype(&self) -> FieldType {
        match self {
            Self::Numeric(_) => FieldType::Numeric,
            Self::Categorical(_) => FieldType::Categorical,
            Self::Date(_) => FieldType::Date,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
            Self::Date(v) => v.len(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row`, `None` if missing or out of range.
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            Self::Numeric(v) => v.get(row).copied().flatten().map(Value::Numeric),
            Self::Categorical(v) => v.get(row).cloned().flatten().map(Value::Categorical),
            Self::Date(v) => v.get(row).copied().flatten().map(Value::Date),
        }
    }

    /// Whether the value at `row` is missing.
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Self::Numeric(v) => v.get(row).is_none_or(Option::is_none),
            Self::Categorical(v) => v.get(row).is_none_or(Option::is_none),
            Self::Date(v) => v.get(row).is_none_or(Option::is_none),
        }
    }

    /// Number of missing values.
    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_missing(i)).count()
    }

    /// Gather rows by index; `None` indices produce missing values.
    pub fn take(&self, rows: &[Option<usize>]) -> Self {
        fn gather<T: Clone>(values: &[Option<T>], rows: &[Option<usize>]) -> Vec<Option<T>> {
            rows.iter()
                .map(|r| r.and_then(|i| values.get(i).cloned().flatten()))
                .collect()
        }
        match self {
            Self::Numeric(v) => Self::Numeric(gather(v, rows)),
            Self::Categorical(v) => Self::Categorical(gather(v, rows)),
            Self::Date(v) => Self::Date(gather(v, rows)),
        }
    }

    /// Fill missing values from a same-typed column of equal length.
    pub(crate) fn coalesce(&mut self, other: &Self) {
        fn fill<T: Clone>(values: &mut [Option<T>], other: &[Option<T>]) {
            for (value, candidate) in values.iter_mut().zip(other) {
                if value.is_none() {
                    value.clone_from(candidate);
                }
            }
        }
        match (self, other) {
            (Self::Numeric(v), Self::Numeric(o)) => fill(v, o),
            (Self::Categorical(v), Self::Categorical(o)) => fill(v, o),
            (Self::Date(v), Self::Date(o)) => fill(v, o),
            _ => {}
        }
    }

    /// Overwrite the value at `row`. The value must match the column type.
    pub(crate) fn set(&mut self, row: usize, value: Option<Value>) {
        match (self, value) {
            (Self::Numeric(v), Some(Value::Numeric(x))) => v[row] = Some(x),
            (Self::Categorical(v), Some(Value::Categorical(x))) => v[row] = Some(x),
            (Self::Date(v), Some(Value::Date(x))) => v[row] = Some(x),
            (Self::Numeric(v), None) => v[row] = None,
            (Self::Categorical(v), None) => v[row] = None,
            (Self::Date(v), None) => v[row] = None,
            _ => {}
        }
    }
}

/// Borrowed view of one panel row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    panel: &'a Panel,
    index: usize,
}

impl<'a> RowRef<'a> {
    /// Row position in the panel.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Row key.
    pub fn key(&self) -> EntityMonth {
        self.panel.keys[self.index]
    }

    /// Entity of the row.
    pub fn entity(&self) -> EntityId {
        self.key().entity
    }

    /// Month of the row.
    pub fn month(&self) -> Period {
        self.key().month
    }

    /// Typed value of a field.
    pub fn value(&self, field: &str) -> Option<Value> {
        self.panel.column(field).ok()?.get(self.index)
    }

    /// Numeric value of a field; `None` if missing or not numeric.
    pub fn numeric(&self, field: &str) -> Option<f64> {
        match self.panel.column(field).ok()? {
            Column::Numeric(v) => v[self.index],
            _ => None,
        }
    }

    /// Categorical value of a field; `None` if missing or not categorical.
    pub fn categorical(&self, field: &str) -> Option<&'a str> {
        match self.panel.column(field).ok()? {
            Column::Categorical(v) => v[self.index].as_deref(),
            _ => None,
        }
    }
}

/// Point-in-time monthly panel keyed by `(entity, available_month)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    keys: Vec<EntityMonth>,
    schema: Schema,
    columns: Vec<Column>,
}

impl Panel {
    /// Panel with a schema and no rows.
    pub fn empty(schema: Schema) -> Self {
        let columns = schema.iter().map(|f| Column::nulls(f.dtype, 0)).collect();
        Self {
            keys: Vec::new(),
            schema,
            columns,
        }
    }

    /// Assemble a panel from parts, validating shape, types and key order.
    ///
    /// Keys must be strictly increasing; a repeated key fails with
    /// [`PanelError::DuplicateKey`]. Unsorted keys are sorted together with
    /// their rows.
    pub fn from_parts(keys: Vec<EntityMonth>, schema: Schema, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(PanelError::InvalidShape(format!(
                "{} columns for {} schema fields",
                columns.len(),
                schema.len()
            )));
        }
        for (field, column) in schema.iter().zip(&columns) {
            if column.dtype() != field.dtype {
                return Err(PanelError::SchemaConflict {
                    field: field.name.clone(),
                    expected: field.dtype,
                    found: column.dtype(),
                });
            }
            if column.len() != keys.len() {
                return Err(PanelError::InvalidShape(format!(
                    "field '{}' has {} values for {} rows",
                    field.name,
                    column.len(),
                    keys.len()
                )));
            }
        }

        if keys.windows(2).all(|w| w[0] < w[1]) {
            return Ok(Self::from_sorted_parts(keys, schema, columns));
        }

        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by_key(|&i| keys[i]);
        if let Some(w) = order.windows(2).find(|w| keys[w[0]] == keys[w[1]]) {
            let dup = keys[w[0]];
            return Err(PanelError::DuplicateKey {
                entity: dup.entity,
                month: dup.month,
            });
        }
        let rows: Vec<Option<usize>> = order.iter().copied().map(Some).collect();
        let keys = order.iter().map(|&i| keys[i]).collect();
        let columns = columns.iter().map(|c| c.take(&rows)).collect();
        Ok(Self::from_sorted_parts(keys, schema, columns))
    }

    /// Assemble a panel whose keys are already sorted and unique.
    pub(crate) fn from_sorted_parts(keys: Vec<EntityMonth>, schema: Schema, columns: Vec<Column>) -> Self {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(columns.iter().all(|c| c.len() == keys.len()));
        Self {
            keys,
            schema,
            columns,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the panel has no rows.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Field schema.
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Row keys in `(entity, month)` order.
    pub fn keys(&self) -> &[EntityMonth] {
        &self.keys
    }

    /// Columns in schema order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column by field name.
    pub fn column(&self, field: &str) -> Result<&Column> {
        self.schema
            .position(field)
            .map(|i| &self.columns[i])
            .ok_or_else(|| PanelError::MissingField(field.to_string()))
    }

    /// Numeric column values.
    pub fn numeric(&self, field: &str) -> Result<&[Option<f64>]> {
        match self.column(field)? {
            Column::Numeric(v) => Ok(v),
            other => Err(PanelError::TypeMismatch {
                field: field.to_string(),
                required: FieldType::Numeric,
                found: other.dtype(),
            }),
        }
    }

    /// Categorical column values.
    pub fn categorical(&self, field: &str) -> Result<&[Option<String>]> {
        match self.column(field)? {
            Column::Categorical(v) => Ok(v),
            other => Err(PanelError::TypeMismatch {
                field: field.to_string(),
                required: FieldType::Categorical,
                found: other.dtype(),
            }),
        }
    }

    /// Row view.
    pub fn row(&self, index: usize) -> RowRef<'_> {
        RowRef { panel: self, index }
    }

    /// Iterate over rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.len()).map(|index| RowRef { panel: self, index })
    }

    /// Row position of a key.
    pub fn position(&self, entity: EntityId, month: Period) -> Option<usize> {
        self.keys.binary_search(&EntityMonth::new(entity, month)).ok()
    }

    /// Value of `field` for `(entity, month)`; the signal layer's lookup.
    pub fn get(&self, entity: EntityId, month: Period, field: &str) -> Option<Value> {
        let row = self.position(entity, month)?;
        self.column(field).ok()?.get(row)
    }

    /// Contiguous row ranges, one per entity, in entity order.
    pub fn entity_ranges(&self) -> Vec<(EntityId, Range<usize>)> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..=self.keys.len() {
            if i == self.keys.len() || self.keys[i].entity != self.keys[start].entity {
                ranges.push((self.keys[start].entity, start..i));
                start = i;
            }
        }
        ranges
    }

    /// Distinct entities.
    pub fn entities(&self) -> Vec<EntityId> {
        self.entity_ranges().into_iter().map(|(e, _)| e).collect()
    }

    /// Earliest and latest month present.
    pub fn month_range(&self) -> Option<(Period, Period)> {
        let min = self.keys.iter().map(|k| k.month).min()?;
        let max = self.keys.iter().map(|k| k.month).max()?;
        Some((min, max))
    }

    /// Derive a panel with one more column, or with a same-typed column replaced.
    pub fn with_column(&self, field: &str, column: Column) -> Result<Self> {
        if column.len() != self.len() {
            return Err(PanelError::InvalidShape(format!(
                "field '{field}' has {} values for {} rows",
                column.len(),
                self.len()
            )));
        }
        let mut derived = self.clone();
        match derived.schema.position(field) {
            Some(i) => {
                let existing = derived.columns[i].dtype();
                if existing != column.dtype() {
                    return Err(PanelError::SchemaConflict {
                        field: field.to_string(),
                        expected: existing,
                        found: column.dtype(),
                    });
                }
                derived.columns[i] = column;
            }
            None => {
                derived.schema.insert(field, column.dtype())?;
                derived.columns.push(column);
            }
        }
        Ok(derived)
    }

    /// Derive a panel restricted to the named fields, in the given order.
    pub fn select(&self, fields: &[&str]) -> Result<Self> {
        let mut schema = Schema::new();
        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            let column = self.column(field)?;
            schema.insert(field, column.dtype())?;
            columns.push(column.clone());
        }
        Ok(Self::from_sorted_parts(self.keys.clone(), schema, columns))
    }

    /// Derive a panel keeping the rows for which `keep` is true.
    pub fn filter<F>(&self, keep: F) -> Self
    where
        F: Fn(RowRef<'_>) -> bool,
    {
        let rows: Vec<usize> = self.rows().filter(|r| keep(*r)).map(|r| r.index).collect();
        self.take_rows(&rows)
    }

    /// Derive a panel from a subset of row positions, which must be increasing.
    pub(crate) fn take_rows(&self, rows: &[usize]) -> Self {
        let gather: Vec<Option<usize>> = rows.iter().copied().map(Some).collect();
        Self::from_sorted_parts(
            rows.iter().map(|&i| self.keys[i]).collect(),
            self.schema.clone(),
            self.columns.iter().map(|c| c.take(&gather)).collect(),
        )
    }
}

/// Row-wise panel construction.
///
/// Rows may be pushed in any order; [`PanelBuilder::build`] sorts them and
/// rejects repeated keys.
#[derive(Debug)]
pub struct PanelBuilder {
    schema: Schema,
    rows: Vec<(EntityMonth, Vec<Option<Value>>)>,
}

impl PanelBuilder {
    /// Start a panel with a fixed schema.
    pub const fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Add one row. Fields not mentioned are missing.
    pub fn push_row<'v, I>(&mut self, entity: EntityId, month: Period, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'v str, Value)>,
    {
        let mut row = vec![None; self.schema.len()];
        for (field, value) in values {
            let (i, expected) = self
                .schema
                .position(field)
                .zip(self.schema.get(field))
                .ok_or_else(|| PanelError::MissingField(field.to_string()))?;
            if expected != value.field_type() {
                return Err(PanelError::SchemaConflict {
                    field: field.to_string(),
                    expected,
                    found: value.field_type(),
                });
            }
            row[i] = Some(value);
        }
        self.rows.push((EntityMonth::new(entity, month), row));
        Ok(())
    }

    /// Number of rows pushed so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row has been pushed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sort, validate uniqueness and convert to columns.
    pub fn build(mut self) -> Result<Panel> {
        self.rows.sort_by_key(|(key, _)| *key);
        if let Some(w) = self.rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(PanelError::DuplicateKey {
                entity: w[0].0.entity,
                month: w[0].0.month,
            });
        }

        let len = self.rows.len();
        let mut columns: Vec<Column> = self.schema.iter().map(|f| Column::nulls(f.dtype, len)).collect();
        let mut keys = Vec::with_capacity(len);
        for (r, (key, values)) in self.rows.into_iter().enumerate() {
            keys.push(key);
            for (column, value) in columns.iter_mut().zip(values) {
                column.set(r, value);
            }
        }
        Ok(Panel::from_sorted_parts(keys, self.schema, columns))
    }
}

/// Month-level table with one row per month, such as a market return series or
/// a per-month size cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTable {
    months: Vec<Period>,
    schema: Schema,
    columns: Vec<Column>,
}

impl PeriodTable {
    /// Assemble a table; months must be strictly increasing.
    pub fn from_parts(months: Vec<Period>, schema: Schema, columns: Vec<Column>) -> Result<Self> {
        if let Some(w) = months.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PanelError::InvalidShape(format!(
                "period table months not increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        if columns.len() != schema.len() {
            return Err(PanelError::InvalidShape(format!(
                "{} columns for {} schema fields",
                columns.len(),
                schema.len()
            )));
        }
        for (field, column) in schema.iter().zip(&columns) {
            if column.dtype() != field.dtype || column.len() != months.len() {
                return Err(PanelError::InvalidShape(format!(
                    "field '{}' does not match the period table",
                    field.name
                )));
            }
        }
        Ok(Self {
            months,
            schema,
            columns,
        })
    }

    /// Single numeric series keyed by month, in any order.
    pub fn from_numeric<I>(field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Period, f64)>,
    {
        let mut values: Vec<(Period, f64)> = values.into_iter().collect();
        values.sort_by_key(|(month, _)| *month);
        let (months, values): (Vec<_>, Vec<_>) = values.into_iter().map(|(m, v)| (m, Some(v))).unzip();
        Self::from_parts(
            months,
            Schema::new().with(field, FieldType::Numeric),
            vec![Column::Numeric(values)],
        )
    }

    /// Months in increasing order.
    pub fn months(&self) -> &[Period] {
        &self.months
    }

    /// Field schema.
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Columns in schema order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of months.
    pub fn len(&self) -> usize {
        self.months.len()
    }

    /// Whether the table has no months.
    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// Row position of a month.
    pub fn position(&self, month: Period) -> Option<usize> {
        self.months.binary_search(&month).ok()
    }

    /// Value of `field` at `month`.
    pub fn get(&self, month: Period, field: &str) -> Option<Value> {
        let column = self.columns.get(self.schema.position(field)?)?;
        column.get(self.position(month)?)
    }
}
