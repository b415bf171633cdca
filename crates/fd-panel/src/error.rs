//! Error types for panel construction.

use crate::{
    period::Period,
    types::{EntityId, FieldType, Namespace},
};
use thiserror::Error;

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Half-open validity window of an identifier link, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkWindow {
    /// First month the link is valid.
    pub start: Period,
    /// First month the link is no longer valid, `None` if open-ended.
    pub end: Option<Period>,
    /// Entity the link points to.
    pub entity: EntityId,
}

impl std::fmt::Display for LinkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {}) -> {}", self.start, end, self.entity),
            None => write!(f, "[{}, ..) -> {}", self.start, self.entity),
        }
    }
}

/// Errors that can occur while linking, materializing, merging or deriving panels.
///
/// Conditions that are normal in this domain (unresolved identifiers, implausible
/// disclosure lags, under-populated rolling windows) are not errors: they are
/// counted or degrade to missing values.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Two primary identifier links for the same key overlap in time
    #[error("Overlapping primary links for {namespace} key '{key}': {existing} and {incoming}")]
    OverlapConflict {
        /// Identifier namespace of the key
        namespace: Namespace,
        /// External key with ambiguous primaries
        key: String,
        /// Link already registered
        existing: LinkWindow,
        /// Link being registered
        incoming: LinkWindow,
    },

    /// A field is declared with incompatible types
    #[error("Schema conflict on field '{field}': expected {expected}, found {found}")]
    SchemaConflict {
        /// Field name
        field: String,
        /// Type already declared
        expected: FieldType,
        /// Conflicting type
        found: FieldType,
    },

    /// Field not present in the panel schema
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Field exists but has the wrong type for the requested operation
    #[error("Field '{field}' is {found}, operation requires {required}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Type the operation needs
        required: FieldType,
        /// Actual type of the field
        found: FieldType,
    },

    /// The (entity, month) key appears more than once
    #[error("Duplicate row for entity {entity} at {month}")]
    DuplicateKey {
        /// Entity of the duplicated row
        entity: EntityId,
        /// Month of the duplicated row
        month: Period,
    },

    /// A numeric value is NaN or infinite where it cannot be represented
    #[error("Non-finite value in field '{field}' for entity {entity} at {month}")]
    NonFiniteValue {
        /// Field name
        field: String,
        /// Entity of the row
        entity: EntityId,
        /// Month of the row
        month: Period,
    },

    /// Fill policy not applicable to the field
    #[error("Invalid policy for field '{field}': {reason}")]
    InvalidPolicy {
        /// Field name
        field: String,
        /// Why the policy does not apply
        reason: String,
    },

    /// Columns and keys disagree in length or count
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Rolling window parameters are unusable
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Calendar value out of range
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// The run was cancelled before all partitions completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Worker pool could not be built
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Polars DataFrame error
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
