//! JSON persistence of panels.
//!
//! A stored panel carries its field-type tags, so a reload can be checked
//! against the schema the reader expects instead of coercing values. Reloads
//! go through the same validation as any other panel constructor.
//!
//! JSON has no NaN or infinity, so writing a panel with a non-finite numeric
//! value fails with [`PanelError::NonFiniteValue`] instead of storing it as
//! missing.

use crate::{
    PanelError, Result,
    panel::{Column, EntityMonth, Panel},
    types::{Field, Schema},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

#[derive(Serialize)]
struct StoredPanelRef<'a> {
    schema: &'a Schema,
    keys: &'a [EntityMonth],
    columns: &'a [Column],
}

#[derive(Deserialize)]
struct StoredPanel {
    schema: Vec<Field>,
    keys: Vec<EntityMonth>,
    columns: Vec<Column>,
}

/// Serialize a panel as JSON.
pub fn to_writer<W: Write>(panel: &Panel, writer: W) -> Result<()> {
    check_finite(panel)?;
    let stored = StoredPanelRef {
        schema: panel.schema(),
        keys: panel.keys(),
        columns: panel.columns(),
    };
    serde_json::to_writer(writer, &stored)?;
    Ok(())
}

fn check_finite(panel: &Panel) -> Result<()> {
    for (field, column) in panel.schema().iter().zip(panel.columns()) {
        let Column::Numeric(values) = column else {
            continue;
        };
        if let Some(row) = values.iter().position(|v| v.is_some_and(|v| !v.is_finite())) {
            let key = panel.keys()[row];
            return Err(PanelError::NonFiniteValue {
                field: field.name.clone(),
                entity: key.entity,
                month: key.month,
            });
        }
    }
    Ok(())
}

/// Deserialize and validate a panel from JSON.
pub fn from_reader<R: Read>(reader: R) -> Result<Panel> {
    let stored: StoredPanel = serde_json::from_reader(reader)?;
    let schema = Schema::try_from(stored.schema)?;
    Panel::from_parts(stored.keys, schema, stored.columns)
}

/// Write a panel to a JSON file.
pub fn write_json(panel: &Panel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    to_writer(panel, &mut writer)?;
    writer.flush()?;
    tracing::debug!(path = %path.display(), rows = panel.len(), "wrote panel");
    Ok(())
}

/// Read a panel from a JSON file.
pub fn read_json(path: impl AsRef<Path>) -> Result<Panel> {
    from_reader(BufReader::new(File::open(path)?))
}

/// Read a panel and check that every expected field is present with the
/// expected type. Extra stored fields are allowed.
pub fn read_json_expecting(path: impl AsRef<Path>, expected: &Schema) -> Result<Panel> {
    let panel = read_json(path)?;
    check_schema(&panel, expected)?;
    Ok(panel)
}

fn check_schema(panel: &Panel, expected: &Schema) -> Result<()> {
    for field in expected.iter() {
        match panel.schema().get(&field.name) {
            Some(found) if found == field.dtype => {}
            Some(found) => {
                return Err(PanelError::SchemaConflict {
                    field: field.name.clone(),
                    expected: field.dtype,
                    found,
                });
            }
            None => return Err(PanelError::MissingField(field.name.clone())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        panel::PanelBuilder,
        period::Period,
        types::{EntityId, FieldType, Value},
    };
    use chrono::NaiveDate;

    fn ym(year: i32, month: u8) -> Period {
        Period::from_year_month(year, month).unwrap()
    }

    fn sample() -> Panel {
        let schema = Schema::new()
            .with("be", FieldType::Numeric)
            .with("sic", FieldType::Categorical)
            .with("rdq", FieldType::Date);
        let mut b = PanelBuilder::new(schema);
        b.push_row(
            EntityId(10107),
            ym(2020, 4),
            [
                ("be", Value::from(1.5)),
                ("sic", Value::from("7372")),
                ("rdq", Value::from(NaiveDate::from_ymd_opt(2020, 4, 23).unwrap())),
            ],
        )
        .unwrap();
        b.push_row(EntityId(10107), ym(2020, 5), [("be", Value::from(1.5))]).unwrap();
        b.build().unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fd-panel-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn test_reload_preserves_panel() {
        let panel = sample();
        let path = temp_path("reload");
        write_json(&panel, &path).unwrap();
        let reloaded = read_json(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(reloaded, panel);
    }

    #[test]
    fn test_reload_against_changed_schema() {
        let panel = sample();
        let path = temp_path("schema");
        write_json(&panel, &path).unwrap();

        let expected = Schema::new().with("be", FieldType::Numeric).with("sic", FieldType::Numeric);
        let err = read_json_expecting(&path, &expected);
        assert!(matches!(err, Err(PanelError::SchemaConflict { ref field, .. }) if field == "sic"));

        let subset = Schema::new().with("rdq", FieldType::Date);
        assert!(read_json_expecting(&path, &subset).is_ok());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_rejects_non_finite() {
        let mut b = PanelBuilder::new(Schema::new().with("bm", FieldType::Numeric));
        b.push_row(EntityId(10107), ym(2020, 4), [("bm", Value::from(0.4))]).unwrap();
        b.push_row(EntityId(10107), ym(2020, 5), [("bm", Value::from(f64::INFINITY))]).unwrap();
        let panel = b.build().unwrap();
        let mut buffer = Vec::new();
        let err = to_writer(&panel, &mut buffer);
        assert!(matches!(
            err,
            Err(PanelError::NonFiniteValue { ref field, month, .. }) if field == "bm" && month == ym(2020, 5)
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reload_rejects_duplicate_keys() {
        let json = r#"{
            "schema": [{"name": "be", "dtype": "numeric"}],
            "keys": [{"entity": 1, "month": "2020-01"}, {"entity": 1, "month": "2020-01"}],
            "columns": [{"dtype": "numeric", "values": [1.0, 2.0]}]
        }"#;
        assert!(matches!(from_reader(json.as_bytes()), Err(PanelError::DuplicateKey { .. })));
    }

    #[test]
    fn test_reload_rejects_field_declared_twice() {
        let json = r#"{
            "schema": [{"name": "be", "dtype": "numeric"}, {"name": "be", "dtype": "categorical"}],
            "keys": [{"entity": 1, "month": "2020-01"}],
            "columns": [{"dtype": "numeric", "values": [1.0]}, {"dtype": "categorical", "values": ["x"]}]
        }"#;
        let err = from_reader(json.as_bytes());
        assert!(matches!(err, Err(PanelError::SchemaConflict { ref field, .. }) if field == "be"));

        let repeated = r#"{
            "schema": [{"name": "be", "dtype": "numeric"}, {"name": "be", "dtype": "numeric"}],
            "keys": [{"entity": 1, "month": "2020-01"}],
            "columns": [{"dtype": "numeric", "values": [1.0]}, {"dtype": "numeric", "values": [2.0]}]
        }"#;
        assert!(matches!(from_reader(repeated.as_bytes()), Err(PanelError::InvalidShape(_))));
    }

    #[test]
    fn test_reload_rejects_mistyped_column() {
        let json = r#"{
            "schema": [{"name": "be", "dtype": "numeric"}],
            "keys": [{"entity": 1, "month": "2020-01"}],
            "columns": [{"dtype": "categorical", "values": ["x"]}]
        }"#;
        assert!(matches!(from_reader(json.as_bytes()), Err(PanelError::SchemaConflict { .. })));
    }
}
