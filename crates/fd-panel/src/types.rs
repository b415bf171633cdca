//! Common types: entity identifiers, identifier namespaces and typed field values.

use crate::{PanelError, Result};
use chrono::NaiveDate;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Canonical identity of a firm or security across time.
///
/// Assigned by the crosswalk; never derived from whichever source key named it.
#[derive(
    Debug, Display, From, Into, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

/// Identifier system an external key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Firm-level key of the accounting filings database
    Filing,
    /// Security-level key of the market database
    Market,
    /// Ticker of the analyst forecast database
    Analyst,
    /// Any other reference source (option or ownership databases)
    Other(String),
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filing => f.write_str("filing"),
            Self::Market => f.write_str("market"),
            Self::Analyst => f.write_str("analyst"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Key of an entity inside one identifier namespace.
///
/// Numeric keys are stored in their decimal form so `"10107"` and `10107u64`
/// name the same key.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalKey(String);

impl ExternalKey {
    /// The key as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Lets maps keyed by `ExternalKey` be queried with `&str`.
impl std::borrow::Borrow<str> for ExternalKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExternalKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ExternalKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<u64> for ExternalKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

/// Semantic type of a panel field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Floating point measurement
    Numeric,
    /// Label such as an exchange code or industry classification
    Categorical,
    /// Calendar date
    Date,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => f.write_str("numeric"),
            Self::Categorical => f.write_str("categorical"),
            Self::Date => f.write_str("date"),
        }
    }
}

/// A single typed field value. Missing values are represented by absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Numeric value
    Numeric(f64),
    /// Categorical value
    Categorical(String),
    /// Date value
    Date(NaiveDate),
}

impl Value {
    /// Type tag of this value.
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::Numeric(_) => FieldType::Numeric,
            Self::Categorical(_) => FieldType::Categorical,
            Self::Date(_) => FieldType::Date,
        }
    }

    /// Numeric content, if any.
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Categorical content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Categorical(v) => Some(v),
            _ => None,
        }
    }

    /// Date content, if any.
    pub const fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Categorical(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Categorical(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

/// Named, typed field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Semantic type
    pub dtype: FieldType,
}

/// Ordered set of typed fields.
///
/// Field types are explicit so merges and reloads can detect incompatible
/// definitions instead of coercing values. Every field goes through
/// [`Schema::insert`], deserialized ones included, so a name is declared once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Create an empty schema.
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder-style [`Schema::insert`] for literal schemas.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already declared with another type.
    #[must_use]
    pub fn with(mut self, name: &str, dtype: FieldType) -> Self {
        if let Err(e) = self.insert(name, dtype) {
            panic!("{e}");
        }
        self
    }

    /// Declare a field. Re-declaring with the same type is a no-op.
    pub fn insert(&mut self, name: &str, dtype: FieldType) -> Result<()> {
        match self.get(name) {
            Some(existing) if existing != dtype => Err(PanelError::SchemaConflict {
                field: name.to_string(),
                expected: existing,
                found: dtype,
            }),
            Some(_) => Ok(()),
            None => {
                self.fields.push(Field {
                    name: name.to_string(),
                    dtype,
                });
                Ok(())
            }
        }
    }

    /// Union of two schemas, failing on the first incompatible field.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for field in &other.fields {
            self.insert(&field.name, field.dtype)?;
        }
        Ok(())
    }

    /// Type of a field.
    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.dtype)
    }

    /// Position of a field.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Whether the field is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = PanelError;

    fn try_from(fields: Vec<Field>) -> Result<Self> {
        let mut schema = Self::new();
        for field in fields {
            schema.insert(&field.name, field.dtype)?;
        }
        Ok(schema)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}
