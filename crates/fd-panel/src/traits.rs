//! Interface of the signal-formula layer.
//!
//! Formulas consume the aligned monthly panel and nothing else: they never see
//! observations, native dates or identifier links, so a formula cannot
//! introduce look-ahead through the data it is handed.

use crate::{PanelError, Panel, Result, types::FieldType};

/// A predictor computed from the aligned panel.
pub trait SignalFormula: Send + Sync + std::fmt::Debug {
    /// Unique identifier, also the name of the output field.
    ///
    /// Should be stable across versions.
    fn name(&self) -> &str;

    /// Human-readable description of what the signal measures.
    fn description(&self) -> &str;

    /// Fields the formula reads, with their types.
    fn required_fields(&self) -> &[(&str, FieldType)];

    /// Calendar months of history the formula looks back over.
    fn lookback_months(&self) -> u32;

    /// Derive a panel carrying the signal in the field named [`Self::name`].
    fn compute(&self, panel: &Panel) -> Result<Panel>;

    /// Check the required fields, then [`SignalFormula::compute`].
    fn compute_checked(&self, panel: &Panel) -> Result<Panel> {
        for &(field, required) in self.required_fields() {
            let found = panel
                .schema()
                .get(field)
                .ok_or_else(|| PanelError::MissingField(field.to_string()))?;
            if found != required {
                return Err(PanelError::TypeMismatch {
                    field: field.to_string(),
                    required,
                    found,
                });
            }
        }
        let out = self.compute(panel)?;
        tracing::debug!(signal = self.name(), rows = out.len(), "computed signal");
        Ok(out)
    }
}

/// Marker trait for formula configuration types.
///
/// All config types should implement Default, Clone, Send, Sync, and Debug.
pub trait FormulaConfig: Default + Clone + Send + Sync + std::fmt::Debug {}

/// Blanket implementation for any type that satisfies the trait bounds.
impl<T: Default + Clone + Send + Sync + std::fmt::Debug> FormulaConfig for T {}

/// A formula with runtime-adjustable parameters (window lengths, floors).
pub trait ConfigurableFormula: SignalFormula {
    /// Configuration type for this formula.
    type Config: FormulaConfig;

    /// Create the formula with the given configuration.
    fn with_config(config: Self::Config) -> Self;

    /// Current configuration.
    fn config(&self) -> &Self::Config;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        panel::PanelBuilder,
        period::Period,
        rolling::{RollingOp, RollingOps, RollingSpec},
        types::{EntityId, Schema, Value},
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct MomentumConfig {
        window_months: u32,
    }

    impl Default for MomentumConfig {
        fn default() -> Self {
            Self { window_months: 3 }
        }
    }

    /// Trailing mean return, a minimal formula over the panel.
    #[derive(Debug, Default)]
    struct Momentum {
        config: MomentumConfig,
    }

    impl SignalFormula for Momentum {
        fn name(&self) -> &str {
            "mom"
        }

        fn description(&self) -> &str {
            "Trailing mean monthly return"
        }

        fn required_fields(&self) -> &[(&str, FieldType)] {
            &[("ret", FieldType::Numeric)]
        }

        fn lookback_months(&self) -> u32 {
            self.config.window_months
        }

        fn compute(&self, panel: &Panel) -> Result<Panel> {
            let spec = RollingSpec::new("ret", self.config.window_months, RollingOp::Mean, self.name());
            RollingOps::new().rolling(panel, &spec)
        }
    }

    impl ConfigurableFormula for Momentum {
        type Config = MomentumConfig;

        fn with_config(config: Self::Config) -> Self {
            Self { config }
        }

        fn config(&self) -> &Self::Config {
            &self.config
        }
    }

    fn returns(field_type: FieldType) -> Panel {
        let mut b = PanelBuilder::new(Schema::new().with("ret", field_type));
        let value = match field_type {
            FieldType::Numeric => Value::from(0.01),
            _ => Value::from("0.01"),
        };
        b.push_row(EntityId(1), Period::from_year_month(2020, 1).unwrap(), [("ret", value)])
            .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_compute_checked() {
        let formula = Momentum::with_config(MomentumConfig { window_months: 12 });
        assert_eq!(formula.lookback_months(), 12);
        let out = formula.compute_checked(&returns(FieldType::Numeric)).unwrap();
        assert_eq!(out.numeric("mom").unwrap(), &[Some(0.01)]);
    }

    #[test]
    fn test_compute_checked_rejects_wrong_type() {
        let err = Momentum::default().compute_checked(&returns(FieldType::Categorical));
        assert!(matches!(err, Err(PanelError::TypeMismatch { .. })));
    }

    #[test]
    fn test_formulas_are_object_safe() {
        let formulas: Vec<Box<dyn SignalFormula>> = vec![Box::new(Momentum::default())];
        assert_eq!(formulas[0].name(), "mom");
        assert_eq!(formulas[0].required_fields().len(), 1);
    }
}
