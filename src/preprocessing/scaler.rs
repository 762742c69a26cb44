//! Feature scaling over the final feature columns

use crate::error::{FeatureError, Result};
use crate::record::{float_column, FrameExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::stage::{Context, Stage};

/// Type of scaling applied to every feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// (x - mean) / std, with the population standard deviation
    #[default]
    Standard,
    /// (x - min) / (max - min)
    MinMax,
    /// Each row divided by its L2 norm over the feature columns
    Normalize,
}

/// Fitted parameters of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    /// mean or min
    pub center: f64,
    /// std or range; 1 when the column is constant
    pub scale: f64,
}

impl ScalerParams {
    fn apply(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }
}

/// Scales every column except the excluded ones (the target).
///
/// Missing values are skipped when fitting and stay missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    kind: ScalerKind,
    exclude: Vec<String>,
    params: BTreeMap<String, ScalerParams>,
    is_fitted: bool,
}

impl Scaler {
    pub fn new(kind: ScalerKind) -> Self {
        Self {
            kind,
            exclude: Vec::new(),
            params: BTreeMap::new(),
            is_fitted: false,
        }
    }

    /// Columns left untouched
    pub fn excluding<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.exclude = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn scaler_kind(&self) -> ScalerKind {
        self.kind
    }

    /// Fitted center and scale of a column; `None` for row normalization.
    pub fn params(&self, column: &str) -> Option<&ScalerParams> {
        self.params.get(column)
    }

    fn feature_names(&self, df: &DataFrame) -> Vec<String> {
        df.column_names()
            .into_iter()
            .filter(|name| !self.exclude.contains(name))
            .collect()
    }

    fn compute_params(&self, values: Vec<Option<f64>>) -> ScalerParams {
        let ca: Float64Chunked = values.into_iter().collect();
        match self.kind {
            ScalerKind::Standard => {
                let mean = ca.mean().unwrap_or(0.0);
                let std = ca.std(0).unwrap_or(1.0);
                ScalerParams {
                    center: mean,
                    scale: if std == 0.0 { 1.0 } else { std },
                }
            }
            ScalerKind::MinMax => {
                let min = ca.min().unwrap_or(0.0);
                let max = ca.max().unwrap_or(1.0);
                let range = max - min;
                ScalerParams {
                    center: min,
                    scale: if range == 0.0 { 1.0 } else { range },
                }
            }
            ScalerKind::Normalize => ScalerParams {
                center: 0.0,
                scale: 1.0,
            },
        }
    }

    fn normalize_rows(&self, df: &DataFrame) -> Result<DataFrame> {
        let names = self.feature_names(df);
        let columns = names
            .iter()
            .map(|name| df.float_values(name))
            .collect::<Result<Vec<_>>>()?;

        let norms: Vec<f64> = (0..df.height())
            .map(|row| {
                let norm = columns
                    .iter()
                    .filter_map(|values| values[row])
                    .map(|v| v * v)
                    .sum::<f64>()
                    .sqrt();
                if norm == 0.0 {
                    1.0
                } else {
                    norm
                }
            })
            .collect();

        let mut result = df.clone();
        for (name, values) in names.iter().zip(columns) {
            let scaled = values
                .into_iter()
                .zip(&norms)
                .map(|(v, norm)| v.map(|v| v / norm))
                .collect();
            result.with_column(float_column(name, scaled))?;
        }
        Ok(result)
    }
}

impl Stage for Scaler {
    fn kind(&self) -> &'static str {
        "scale"
    }

    fn input_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input.to_vec()
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut params = BTreeMap::new();
        if self.kind != ScalerKind::Normalize {
            for name in self.feature_names(df) {
                params.insert(name.clone(), self.compute_params(df.float_values(&name)?));
            }
        }
        debug!(kind = ?self.kind, columns = params.len(), "Scaler fitted");

        self.params = params;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }
        if self.kind == ScalerKind::Normalize {
            return self.normalize_rows(df);
        }

        let mut result = df.clone();
        for (name, params) in &self.params {
            let scaled = df
                .float_values(name)?
                .into_iter()
                .map(|v| v.map(|v| params.apply(v)))
                .collect();
            result.with_column(float_column(name, scaled))?;
        }
        Ok(result)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
