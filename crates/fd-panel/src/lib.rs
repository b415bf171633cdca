#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/fd-panel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod align;
pub mod config;
pub mod crosswalk;
pub mod error;
pub mod executor;
pub mod expand;
pub mod frame;
pub mod panel;
pub mod period;
pub mod persist;
pub mod rank;
pub mod rolling;
pub mod series;
pub mod traits;
pub mod types;

// Re-export core types
pub use align::{FillPolicy, JoinKind, PanelAligner, PerFieldPolicy};
pub use config::{EngineConfig, SourceConfig};
pub use crosswalk::{Crosswalk, CrosswalkBuilder, IdentifierLink, ResolveStats, Resolver};
pub use error::{LinkWindow, PanelError, Result};
pub use executor::Executor;
pub use expand::{CarryForward, Expansion};
pub use panel::{Column, EntityMonth, Panel, PanelBuilder, PeriodTable, RowRef};
pub use period::Period;
pub use rank::{CrossSectionalRanker, RankOutput};
pub use rolling::{RollingOp, RollingOps, RollingSpec};
pub use series::{
    DedupPolicy, LagPolicy, MaterializeOptions, MaterializeReport, Materialized, Observation, SourceSeries,
};
pub use traits::{ConfigurableFormula, FormulaConfig, SignalFormula};
pub use types::{EntityId, ExternalKey, Field, FieldType, Namespace, Schema, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
