//! Matrix imputation
//!
//! Row-wise imputers over `ndarray` matrices where NaN marks a missing cell.
//! The preprocessing stages convert frame columns to a matrix, impute, and
//! write the result back as new columns.

mod knn;

pub use knn::{KnnImputer, KnnMetric, KnnWeights};

use crate::error::Result;
use ndarray::Array2;

/// Trait for imputers
pub trait Imputer: Send + Sync {
    /// Fit the imputer on data with missing values
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    /// Transform data by imputing missing values.
    ///
    /// Each output row depends only on the matching input row and the
    /// fitted state.
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Fit and transform in one step
    fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}

/// Check if value is missing (NaN)
#[inline]
pub fn is_missing(v: f64) -> bool {
    v.is_nan()
}
