//! Polars interop for the signal-formula layer.
//!
//! Panels convert to and from a `DataFrame` with an `entity` (`u64`) and a
//! `yyyymm` (`i32`) key column followed by one column per field. Formulas that
//! prefer expression-style code work on the frame and hand the result back
//! through [`from_dataframe`], which re-validates keys and types.

use crate::{
    PanelError, Result,
    panel::{Column, EntityMonth, Panel},
    period::Period,
    types::{EntityId, FieldType, Schema},
};
use chrono::{Datelike, NaiveDate};
use polars::prelude::{Column as FrameColumn, DataFrame, DataType, NamedFrom, Series};

/// Entity key column.
pub const ENTITY_COLUMN: &str = "entity";
/// Month key column, as a `YYYYMM` integer.
pub const MONTH_COLUMN: &str = "yyyymm";

/// Days from 0001-01-01 to 1970-01-01, the offset of polars dates.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Convert a panel to a `DataFrame`.
pub fn to_dataframe(panel: &Panel) -> Result<DataFrame> {
    let entities: Vec<u64> = panel.keys().iter().map(|k| k.entity.0).collect();
    let months: Vec<i32> = panel.keys().iter().map(|k| k.month.yyyymm()).collect();
    let mut columns: Vec<FrameColumn> = vec![
        Series::new(ENTITY_COLUMN.into(), entities).into(),
        Series::new(MONTH_COLUMN.into(), months).into(),
    ];
    for (field, column) in panel.schema().iter().zip(panel.columns()) {
        let series = match column {
            Column::Numeric(values) => Series::new(field.name.as_str().into(), values.clone()),
            Column::Categorical(values) => Series::new(field.name.as_str().into(), values.clone()),
            Column::Date(values) => {
                let days: Vec<Option<i32>> = values
                    .iter()
                    .map(|d| d.map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
                    .collect();
                Series::new(field.name.as_str().into(), days).cast(&DataType::Date)?
            }
        };
        columns.push(series.into());
    }
    Ok(DataFrame::new(columns)?)
}

/// Convert a `DataFrame` with `entity` and `yyyymm` key columns to a panel.
///
/// Float and 32/64-bit integer columns become numeric fields, string columns
/// categorical fields and date columns date fields.
pub fn from_dataframe(df: &DataFrame) -> Result<Panel> {
    let entities = df.column(ENTITY_COLUMN)?.cast(&DataType::UInt64)?;
    let entities = entities.u64()?;
    let months = df.column(MONTH_COLUMN)?.cast(&DataType::Int32)?;
    let months = months.i32()?;

    let mut keys = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(entity), Some(yyyymm)) = (entities.get(i), months.get(i)) else {
            return Err(PanelError::InvalidShape(format!("missing key in frame row {i}")));
        };
        let month = Period::from_yyyymm(yyyymm).ok_or_else(|| PanelError::InvalidPeriod(yyyymm.to_string()))?;
        keys.push(EntityMonth::new(EntityId(entity), month));
    }

    let mut schema = Schema::new();
    let mut columns = Vec::new();
    for frame_column in df.get_columns() {
        let name = frame_column.name().as_str();
        if name == ENTITY_COLUMN || name == MONTH_COLUMN {
            continue;
        }
        let column = match field_type_of(frame_column.dtype()) {
            Some(FieldType::Numeric) => {
                let values = frame_column.cast(&DataType::Float64)?;
                Column::Numeric(values.f64()?.into_iter().collect())
            }
            Some(FieldType::Categorical) => {
                let values = frame_column.str()?;
                Column::Categorical(values.into_iter().map(|v| v.map(str::to_string)).collect())
            }
            Some(FieldType::Date) => {
                let days = frame_column.cast(&DataType::Int32)?;
                Column::Date(
                    days.i32()?
                        .into_iter()
                        .map(|d| d.and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + UNIX_EPOCH_DAYS_FROM_CE)))
                        .collect(),
                )
            }
            None => {
                return Err(PanelError::InvalidShape(format!(
                    "column '{name}' has unsupported dtype {}",
                    frame_column.dtype()
                )));
            }
        };
        schema.insert(name, column.dtype())?;
        columns.push(column);
    }
    Panel::from_parts(keys, schema, columns)
}

/// Field type a frame column converts to, `None` if unsupported.
pub fn field_type_of(dtype: &DataType) -> Option<FieldType> {
    match dtype {
        DataType::Float64 | DataType::Float32 | DataType::Int32 | DataType::Int64 | DataType::UInt32 | DataType::UInt64 => {
            Some(FieldType::Numeric)
        }
        DataType::String => Some(FieldType::Categorical),
        DataType::Date => Some(FieldType::Date),
        _ => None,
    }
}
