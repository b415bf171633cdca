//! Engine and per-source configuration.

use crate::{
    Result,
    expand::Expansion,
    series::{DedupPolicy, LagPolicy, MaterializeOptions},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for entity-partitioned work (default: available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,
}

impl EngineConfig {
    /// Parse from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Materialization policies of one data source.
///
/// The dedup policy has no default and must be spelled out in every source
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, used in logs and reports
    pub name: String,
    /// Reporting lag
    pub lag: LagPolicy,
    /// Same-month deduplication
    pub dedup: DedupPolicy,
    /// Carry-forward horizon (default: native month only)
    #[serde(default = "default_expansion")]
    pub expansion: Expansion,
}

const fn default_expansion() -> Expansion {
    Expansion::None
}

impl SourceConfig {
    /// Parse one source from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a list of sources from a JSON file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Materialization options for this source.
    pub fn options(&self) -> MaterializeOptions {
        MaterializeOptions::new(self.lag.clone(), self.dedup, self.expansion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PanelError, period::Period};

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(EngineConfig::from_json(r#"{"workers": 4}"#).unwrap().workers, Some(4));
    }

    #[test]
    fn test_quarterly_source() {
        let json = r#"{
            "name": "compustat_quarterly",
            "lag": {
                "kind": "fixed_with_disclosure_override",
                "nominal_months": 3,
                "disclosure_field": "rdq",
                "max_plausible_lag_months": 6
            },
            "dedup": "keep_latest_native",
            "expansion": { "kind": "months", "months": 3 }
        }"#;
        let source = SourceConfig::from_json(json).unwrap();
        assert_eq!(source.lag.nominal_months(), 3);
        assert_eq!(source.expansion, Expansion::Months { months: 3 });
        let options = source.options();
        assert!(!options.keep_native_date);
        assert_eq!(options.dedup, DedupPolicy::KeepLatestNative);
    }

    #[test]
    fn test_horizon_parses_as_month() {
        let json = r#"{
            "name": "ibes",
            "lag": { "kind": "fixed", "months": 0 },
            "dedup": "keep_first_native",
            "expansion": { "kind": "until_superseded", "through": "2023-12" }
        }"#;
        let source = SourceConfig::from_json(json).unwrap();
        assert_eq!(
            source.expansion,
            Expansion::UntilSuperseded {
                through: Period::from_year_month(2023, 12).unwrap()
            }
        );
    }

    #[test]
    fn test_load_all() {
        let path = std::env::temp_dir().join(format!("fd-panel-sources-{}.json", std::process::id()));
        let json = r#"[
            { "name": "annual", "lag": { "kind": "fixed", "months": 6 }, "dedup": "keep_latest_native",
              "expansion": { "kind": "months", "months": 12 } },
            { "name": "crsp_monthly", "lag": { "kind": "fixed", "months": 0 }, "dedup": "keep_latest_native" }
        ]"#;
        std::fs::write(&path, json).unwrap();
        let sources = SourceConfig::load_all(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].expansion, Expansion::None);
        assert_eq!(sources[0].options().lag, LagPolicy::Fixed { months: 6 });
    }

    #[test]
    fn test_dedup_is_required() {
        let json = r#"{ "name": "annual", "lag": { "kind": "fixed", "months": 6 } }"#;
        assert!(matches!(SourceConfig::from_json(json), Err(PanelError::Serialization(_))));
    }
}
