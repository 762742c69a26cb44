//! Final numeric feature table

use crate::error::{FeatureError, Result};
use super::FrameExt;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// One transformed row, addressed by column name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Row-aligned numeric features plus an optional target column
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    data: Array2<f64>,
    target_name: Option<String>,
    target: Option<Array1<f64>>,
}

impl FeatureMatrix {
    /// Convert a transformed frame. Every column must be numeric; nulls
    /// become NaN.
    pub fn from_dataframe(df: &DataFrame, target: Option<&str>) -> Result<Self> {
        let feature_columns: Vec<&Series> = df
            .get_columns()
            .iter()
            .map(Column::as_materialized_series)
            .filter(|s| Some(s.name().as_str()) != target)
            .collect();

        let mut data = Array2::from_elem((df.height(), feature_columns.len()), f64::NAN);
        for (j, series) in feature_columns.iter().enumerate() {
            for (i, value) in numeric_values(series)?.into_iter().enumerate() {
                data[[i, j]] = value;
            }
        }

        let target_values = match target {
            Some(name) => Some(Array1::from_vec(numeric_values(df.series(name)?)?)),
            None => None,
        };

        Ok(Self {
            columns: feature_columns.iter().map(|s| s.name().to_string()).collect(),
            data,
            target_name: target.map(str::to_string),
            target: target_values,
        })
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn target(&self) -> Option<&Array1<f64>> {
        self.target.as_ref()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|j| self.data.column(j).to_vec())
    }

    pub fn row(&self, idx: usize) -> Option<FeatureVector> {
        if idx >= self.nrows() {
            return None;
        }
        Some(FeatureVector {
            names: self.columns.clone(),
            values: self.data.row(idx).to_vec(),
        })
    }

    /// Export as a polars DataFrame, target last.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(j, name)| Column::new(name.as_str().into(), self.data.column(j).to_vec()))
            .collect();

        if let (Some(name), Some(target)) = (&self.target_name, &self.target) {
            columns.push(Column::new(name.as_str().into(), target.to_vec()));
        }

        DataFrame::new(columns).map_err(|e| FeatureError::DataError(e.to_string()))
    }
}

fn numeric_values(series: &Series) -> Result<Vec<f64>> {
    if matches!(series.dtype(), DataType::String | DataType::List(_)) {
        return Err(FeatureError::NonNumericColumn(series.name().to_string()));
    }
    let values = series
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dataframe_splits_target() {
        let df = DataFrame::new(vec![
            Series::new("x".into(), &[Some(1.0), None]).into(),
            Series::new("y".into(), &[5.0, 6.0]).into(),
        ])
        .unwrap();

        let matrix = FeatureMatrix::from_dataframe(&df, Some("y")).unwrap();
        assert_eq!(matrix.column_names(), &["x".to_string()]);
        assert_eq!(matrix.nrows(), 2);
        assert!(matrix.data()[[1, 0]].is_nan());
        assert_eq!(matrix.target().unwrap().to_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_text_column_rejected() {
        let df = DataFrame::new(vec![Series::new("t".into(), &["abc"]).into()]).unwrap();
        let err = FeatureMatrix::from_dataframe(&df, None).unwrap_err();
        assert!(matches!(err, FeatureError::NonNumericColumn(name) if name == "t"));
    }

    #[test]
    fn test_to_dataframe() {
        let df = DataFrame::new(vec![
            Series::new("a".into(), &[1.0, 2.0]).into(),
            Series::new("target".into(), &[3.0, 4.0]).into(),
        ])
        .unwrap();
        let matrix = FeatureMatrix::from_dataframe(&df, Some("target")).unwrap();
        let out = matrix.to_dataframe().unwrap();
        assert_eq!(out.width(), 2);
        assert_eq!(out.column_names(), vec!["a", "target"]);
    }
}
