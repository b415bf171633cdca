//! Per-entity rolling-window statistics over calendar months.
//!
//! A window of `w` months ending at month `M` covers `[M - w + 1, M]` for the
//! same entity. Only months present in the panel contribute, so gaps in an
//! entity's history reduce the observation count instead of stretching the
//! window back in time.

use crate::{
    PanelError, Result,
    executor::Executor,
    panel::{Column, Panel},
    period::Period,
};
use serde::{Deserialize, Serialize};

/// Statistic computed over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollingOp {
    /// Arithmetic mean
    Mean,
    /// Sum
    Sum,
    /// Number of non-missing values
    Count,
    /// Sample standard deviation (n - 1 denominator)
    Std,
    /// Bias-adjusted sample skewness
    Skewness,
    /// Slope of the least-squares regression of the window field on `x`
    OlsSlope {
        /// Regressor field
        x: String,
    },
}

/// Parameters of one rolling computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingSpec {
    /// Input field (the dependent variable for [`RollingOp::OlsSlope`])
    pub field: String,
    /// Window length in calendar months
    pub window_months: u32,
    /// Fewest non-missing observations that produce a value
    pub min_observations: usize,
    /// Statistic
    pub op: RollingOp,
    /// Output field
    pub output: String,
}

impl RollingSpec {
    /// Spec requiring a single observation.
    pub fn new(field: &str, window_months: u32, op: RollingOp, output: &str) -> Self {
        Self {
            field: field.to_string(),
            window_months,
            min_observations: 1,
            op,
            output: output.to_string(),
        }
    }

    /// Set the observation floor.
    #[must_use]
    pub const fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.min_observations = min_observations;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.window_months == 0 {
            return Err(PanelError::InvalidWindow(format!("'{}': empty window", self.output)));
        }
        if self.min_observations == 0 || self.min_observations > self.window_months as usize {
            return Err(PanelError::InvalidWindow(format!(
                "'{}': minimum of {} observations in a {}-month window",
                self.output, self.min_observations, self.window_months
            )));
        }
        Ok(())
    }
}

/// Rolling statistics and calendar lags.
#[derive(Debug, Clone, Default)]
pub struct RollingOps {
    executor: Executor,
}

impl RollingOps {
    /// Rolling operations on rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rolling operations on a given executor.
    pub const fn with_executor(executor: Executor) -> Self {
        Self { executor }
    }

    /// Derive a panel with the rolling statistic in `spec.output`.
    pub fn rolling(&self, panel: &Panel, spec: &RollingSpec) -> Result<Panel> {
        spec.validate()?;
        let y = panel.numeric(&spec.field)?;
        let x = match &spec.op {
            RollingOp::OlsSlope { x } => Some(panel.numeric(x)?),
            _ => None,
        };
        let keys = panel.keys();

        let parts = self.executor.map_partitions(&panel.entity_ranges(), |(_, range)| {
            let mut out = Vec::with_capacity(range.len());
            let mut start = range.start;
            for row in range.clone() {
                let first_month = window_start(keys[row].month, spec.window_months);
                while keys[start].month < first_month {
                    start += 1;
                }
                out.push(window_stat(&spec.op, spec.min_observations, &y[start..=row], x.map(|x| &x[start..=row])));
            }
            Ok(out)
        })?;

        let values: Vec<Option<f64>> = parts.into_iter().flatten().collect();
        panel.with_column(&spec.output, Column::Numeric(values))
    }

    /// Derive a panel with `field` lagged by `months` calendar months into `output`.
    ///
    /// A row gets the entity's value at `M - months` if that month is present,
    /// and a missing value otherwise.
    pub fn lag(&self, panel: &Panel, field: &str, months: u32, output: &str) -> Result<Panel> {
        let column = panel.column(field)?;
        let keys = panel.keys();
        let parts = self.executor.map_partitions(&panel.entity_ranges(), |(_, range)| {
            let block = &keys[range.clone()];
            Ok(block
                .iter()
                .map(|key| {
                    let target = key.month.add_months(-i64::from(months));
                    block
                        .binary_search_by_key(&target, |k| k.month)
                        .ok()
                        .map(|i| range.start + i)
                })
                .collect::<Vec<_>>())
        })?;
        let rows: Vec<Option<usize>> = parts.into_iter().flatten().collect();
        panel.with_column(output, column.take(&rows))
    }
}

fn window_stat(op: &RollingOp, min_observations: usize, y: &[Option<f64>], x: Option<&[Option<f64>]>) -> Option<f64> {
    if let (RollingOp::OlsSlope { .. }, Some(x)) = (op, x) {
        let pairs: Vec<(f64, f64)> = x.iter().zip(y).filter_map(|(x, y)| x.zip(*y)).collect();
        if pairs.len() < min_observations.max(2) {
            return None;
        }
        return ols_slope(&pairs);
    }

    let values: Vec<f64> = y.iter().flatten().copied().collect();
    if values.len() < min_observations {
        return None;
    }
    let n = values.len() as f64;
    match op {
        RollingOp::Count => Some(n),
        RollingOp::Sum => Some(values.iter().sum()),
        RollingOp::Mean => Some(values.iter().sum::<f64>() / n),
        RollingOp::Std => {
            if values.len() < 2 {
                return None;
            }
            let mean = values.iter().sum::<f64>() / n;
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((ss / (n - 1.0)).sqrt())
        }
        RollingOp::Skewness => {
            if values.len() < 3 {
                return None;
            }
            let mean = values.iter().sum::<f64>() / n;
            let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
            let scale = f64::EPSILON * mean.abs();
            if m2 <= scale * scale {
                return None;
            }
            let g1 = m3 / m2.powf(1.5);
            Some(g1 * (n * (n - 1.0)).sqrt() / (n - 2.0))
        }
        RollingOp::OlsSlope { .. } => None,
    }
}

fn ols_slope(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (sxx, sxy) = pairs.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
        let dx = x - mean_x;
        (sxx + dx * dx, sxy + dx * (y - mean_y))
    });
    (sxx > 0.0).then(|| sxy / sxx)
}

/// First month of the window ending at `month`.
pub fn window_start(month: Period, window_months: u32) -> Period {
    month.add_months(1 - i64::from(window_months))
}
