//! Missing value imputation stages

use crate::error::{FeatureError, Result};
use crate::imputation::{Imputer, KnnImputer, KnnMetric, KnnWeights};
use crate::record::{float_column, text_column, FrameExt};
use crate::utils::stats;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::stage::{extend_names, Context, Stage};

/// Fill used for a categorical column with no observed value at fit time
pub const DEFAULT_CATEGORY: &str = "Missing";

/// Prefix of the columns written by [`NumericImputer`]
pub const IMPUTED_PREFIX: &str = "imputed_";

/// Strategy for categorical columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CategoricalStrategy {
    /// Replace with the most frequent value; ties go to the smallest value
    MostFrequent,
    /// Replace with a constant string
    Constant(String),
}

impl Default for CategoricalStrategy {
    fn default() -> Self {
        CategoricalStrategy::MostFrequent
    }
}

/// Strategy for numeric columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumericStrategy {
    Mean,
    Median,
    /// Average of the nearest complete fit-time rows
    Knn {
        n_neighbors: usize,
        weights: KnnWeights,
        #[serde(default)]
        metric: KnnMetric,
    },
}

impl Default for NumericStrategy {
    fn default() -> Self {
        NumericStrategy::Knn {
            n_neighbors: 5,
            weights: KnnWeights::Uniform,
            metric: KnnMetric::Euclidean,
        }
    }
}

/// Replaces missing categorical cells in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalImputer {
    strategy: CategoricalStrategy,
    columns: Vec<String>,
    /// Used instead of [`DEFAULT_CATEGORY`] when a column has no observed value
    #[serde(default)]
    defaults: BTreeMap<String, String>,
    fill_values: BTreeMap<String, String>,
    is_fitted: bool,
}

impl CategoricalImputer {
    pub fn new<S: Into<String>>(
        strategy: CategoricalStrategy,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            strategy,
            columns: columns.into_iter().map(Into::into).collect(),
            defaults: BTreeMap::new(),
            fill_values: BTreeMap::new(),
            is_fitted: false,
        }
    }

    /// Fill `column` with `value` when the fit batch never observes it.
    pub fn with_default(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(column.into(), value.into());
        self
    }

    pub fn fill_value(&self, column: &str) -> Option<&str> {
        self.fill_values.get(column).map(String::as_str)
    }

    /// Value used for `column` when the fit batch has none.
    pub fn default_for(&self, column: &str) -> &str {
        self.defaults.get(column).map_or(DEFAULT_CATEGORY, String::as_str)
    }

    fn compute_fill_value(&self, name: &str, values: Vec<Option<String>>) -> String {
        let fallback = || self.default_for(name).to_string();
        match &self.strategy {
            CategoricalStrategy::Constant(value) => value.clone(),
            CategoricalStrategy::MostFrequent => {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for value in values.into_iter().flatten() {
                    *counts.entry(value).or_insert(0) += 1;
                }
                // BTreeMap iterates ascending, so the first maximum is the smallest value
                let mut best: Option<(&String, usize)> = None;
                for (value, &count) in &counts {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((value, count));
                    }
                }
                best.map(|(value, _)| value.clone()).unwrap_or_else(fallback)
            }
        }
    }
}

impl Stage for CategoricalImputer {
    fn kind(&self) -> &'static str {
        "categorical_imputer"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input.to_vec()
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut fill_values = BTreeMap::new();
        for name in &self.columns {
            let fill = self.compute_fill_value(name, df.text_values(name)?);
            fill_values.insert(name.clone(), fill);
        }
        debug!(?fill_values, "Categorical imputer fitted");
        self.fill_values = fill_values;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let mut result = df.clone();
        for (name, fill) in &self.fill_values {
            let values = df
                .text_values(name)?
                .into_iter()
                .map(|v| Some(v.unwrap_or_else(|| fill.clone())))
                .collect();
            result.with_column(text_column(name, values))?;
        }
        Ok(result)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

/// Imputes numeric columns into new `imputed_<field>` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericImputer {
    strategy: NumericStrategy,
    columns: Vec<String>,
    fill_values: BTreeMap<String, f64>,
    knn: Option<KnnImputer>,
    is_fitted: bool,
}

impl NumericImputer {
    pub fn new<S: Into<String>>(
        strategy: NumericStrategy,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            strategy,
            columns: columns.into_iter().map(Into::into).collect(),
            fill_values: BTreeMap::new(),
            knn: None,
            is_fitted: false,
        }
    }

    pub fn output_name(column: &str) -> String {
        format!("{IMPUTED_PREFIX}{column}")
    }

    fn to_matrix(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let mut data = Array2::from_elem((df.height(), self.columns.len()), f64::NAN);
        for (j, name) in self.columns.iter().enumerate() {
            for (i, value) in df.float_values(name)?.into_iter().enumerate() {
                if let Some(v) = value {
                    data[[i, j]] = v;
                }
            }
        }
        Ok(data)
    }
}

impl Stage for NumericImputer {
    fn kind(&self) -> &'static str {
        "numeric_imputer"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.columns.iter().map(|c| Self::output_name(c)))
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let data = self.to_matrix(df)?;
        self.fill_values.clear();
        self.knn = None;

        match &self.strategy {
            NumericStrategy::Mean | NumericStrategy::Median => {
                for (j, name) in self.columns.iter().enumerate() {
                    let observed: Vec<f64> =
                        data.column(j).iter().copied().filter(|v| !v.is_nan()).collect();
                    let fill = match self.strategy {
                        NumericStrategy::Median => stats::median(&observed),
                        _ => stats::mean(&observed),
                    };
                    self.fill_values.insert(name.clone(), fill.unwrap_or(0.0));
                }
            }
            NumericStrategy::Knn {
                n_neighbors,
                weights,
                metric,
            } => {
                let mut knn = KnnImputer::new(*n_neighbors)
                    .with_weights(*weights)
                    .with_metric(*metric);
                knn.fit(&data)?;
                self.knn = Some(knn);
            }
        }

        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let data = self.to_matrix(df)?;
        let imputed = match &self.knn {
            Some(knn) => knn.transform(&data)?,
            None => {
                let mut filled = data;
                for (j, name) in self.columns.iter().enumerate() {
                    let fill = self.fill_values.get(name).copied().unwrap_or(0.0);
                    filled.column_mut(j).mapv_inplace(|v| if v.is_nan() { fill } else { v });
                }
                filled
            }
        };

        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(j, name)| {
                float_column(
                    &Self::output_name(name),
                    imputed.column(j).iter().map(|&v| Some(v)).collect(),
                )
            })
            .collect();
        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::default()
    }

    fn texts(name: &str, values: &[Option<&str>]) -> DataFrame {
        DataFrame::new(vec![Series::new(name.into(), values).into()]).unwrap()
    }

    #[test]
    fn test_most_frequent_tie_takes_smallest() {
        let df = texts(
            "OrgClass",
            &[Some("OTHER"), Some("INDUSTRY"), None, Some("OTHER"), Some("INDUSTRY")],
        );

        let mut imputer = CategoricalImputer::new(CategoricalStrategy::MostFrequent, ["OrgClass"]);
        let out = imputer.fit_transform(&df, &ctx()).unwrap();
        assert_eq!(imputer.fill_value("OrgClass"), Some("INDUSTRY"));
        let values = out.text_values("OrgClass").unwrap();
        assert_eq!(values[2].as_deref(), Some("INDUSTRY"));
        assert_eq!(values[0].as_deref(), Some("OTHER"));
    }

    #[test]
    fn test_constant_strategy() {
        let df = texts("Gender", &[None]);
        let mut imputer = CategoricalImputer::new(
            CategoricalStrategy::Constant("All".to_string()),
            ["Gender"],
        );
        let out = imputer.fit_transform(&df, &ctx()).unwrap();
        assert_eq!(out.text_values("Gender").unwrap(), vec![Some("All".to_string())]);
    }

    #[test]
    fn test_all_missing_uses_default_category() {
        let df = texts("Gender", &[None, None]);
        let mut imputer = CategoricalImputer::new(CategoricalStrategy::MostFrequent, ["Gender"]);
        imputer.fit(&df, &ctx()).unwrap();
        assert_eq!(imputer.fill_value("Gender"), Some(DEFAULT_CATEGORY));
    }

    #[test]
    fn test_all_missing_uses_column_default() {
        let df = texts("MaximumAge", &[None, None]);
        let mut imputer = CategoricalImputer::new(CategoricalStrategy::MostFrequent, ["MaximumAge"])
            .with_default("MaximumAge", "100 Years");
        imputer.fit(&df, &ctx()).unwrap();
        assert_eq!(imputer.fill_value("MaximumAge"), Some("100 Years"));
    }

    #[test]
    fn test_numeric_median() {
        let df = DataFrame::new(vec![float_column(
            "EnrollmentCount",
            vec![Some(10.0), None, Some(30.0), Some(40.0)],
        )])
        .unwrap();
        let mut imputer = NumericImputer::new(NumericStrategy::Median, ["EnrollmentCount"]);
        let out = imputer.fit_transform(&df, &ctx()).unwrap();
        let imputed = out.float_values("imputed_EnrollmentCount").unwrap();
        assert_eq!(imputed[1], Some(30.0));
        assert_eq!(imputed[0], Some(10.0));
        assert!(out.has_column("EnrollmentCount"));
    }

    #[test]
    fn test_numeric_knn_single_column() {
        let df = DataFrame::new(vec![float_column(
            "EnrollmentCount",
            vec![Some(10.0), Some(20.0), None],
        )])
        .unwrap();
        let mut imputer = NumericImputer::new(NumericStrategy::default(), ["EnrollmentCount"]);
        let out = imputer.fit_transform(&df, &ctx()).unwrap();
        assert_eq!(out.float_values("imputed_EnrollmentCount").unwrap()[2], Some(15.0));
    }

    #[test]
    fn test_knn_metric_changes_neighbor() {
        // Euclidean picks row 0 as nearest, Manhattan picks row 1
        let df = DataFrame::new(vec![
            float_column("a", vec![Some(3.0), Some(0.0), Some(0.0)]),
            float_column("b", vec![Some(3.0), Some(5.0), Some(0.0)]),
            float_column("c", vec![Some(100.0), Some(200.0), None]),
        ])
        .unwrap();
        let imputed_c = |metric: KnnMetric| {
            let strategy = NumericStrategy::Knn {
                n_neighbors: 1,
                weights: KnnWeights::Uniform,
                metric,
            };
            let mut imputer = NumericImputer::new(strategy, ["a", "b", "c"]);
            let out = imputer.fit_transform(&df, &ctx()).unwrap();
            out.float_values("imputed_c").unwrap()[2]
        };
        assert_eq!(imputed_c(KnnMetric::Euclidean), Some(100.0));
        assert_eq!(imputed_c(KnnMetric::Manhattan), Some(200.0));
    }

    #[test]
    fn test_knn_metric_defaults_when_absent() {
        let strategy: NumericStrategy =
            serde_json::from_str(r#"{"Knn":{"n_neighbors":3,"weights":"Distance"}}"#).unwrap();
        assert_eq!(
            strategy,
            NumericStrategy::Knn {
                n_neighbors: 3,
                weights: KnnWeights::Distance,
                metric: KnnMetric::Euclidean,
            }
        );
    }

    #[test]
    fn test_transform_before_fit() {
        let df = DataFrame::new(vec![float_column("x", vec![Some(1.0)])]).unwrap();
        let imputer = NumericImputer::new(NumericStrategy::Mean, ["x"]);
        assert!(matches!(
            imputer.transform(&df, &ctx()),
            Err(FeatureError::NotFitted(_))
        ));
    }
}
