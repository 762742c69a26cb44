//! Training-only row filters
//!
//! Both stages drop rows and therefore run after the feature union, on the
//! joined table. Inference skips them.

use crate::error::{FeatureError, Result};
use crate::record::FrameExt;
use crate::utils::stats;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::stage::{Context, Stage};

/// Trial-phase stratum. Buckets overlap: a trial tagged Phase 1, 2 and 3
/// matches both `Phase1_2` and `Phase2_3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseBucket {
    Phase1,
    Phase1_2,
    Phase2,
    Phase2_3,
    Phase3,
}

impl PhaseBucket {
    pub const ALL: [PhaseBucket; 5] = [
        PhaseBucket::Phase1,
        PhaseBucket::Phase1_2,
        PhaseBucket::Phase2,
        PhaseBucket::Phase2_3,
        PhaseBucket::Phase3,
    ];

    /// Whether a record with the given phase indicators belongs here.
    pub fn matches(self, p1: bool, p2: bool, p3: bool) -> bool {
        match self {
            PhaseBucket::Phase1 => p1 && !p2,
            PhaseBucket::Phase1_2 => p1 && p2,
            PhaseBucket::Phase2 => !p1 && p2 && !p3,
            PhaseBucket::Phase2_3 => p2 && p3,
            PhaseBucket::Phase3 => !p2 && p3,
        }
    }
}

/// Range statistic computed per bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutlierMethod {
    /// `[median - lower * IQR, median + upper * IQR]`
    Iqr { lower: f64, upper: f64 },
    /// `median ± factor * MAD` with MAD the median absolute deviation
    Mad { factor: f64 },
}

impl Default for OutlierMethod {
    fn default() -> Self {
        OutlierMethod::Iqr {
            lower: 1.5,
            upper: 2.0,
        }
    }
}

/// Fitted bounds for a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    pub lower: f64,
    pub upper: f64,
    pub median: f64,
}

impl OutlierBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Drops rows whose value falls outside the bounds of any phase bucket the
/// row belongs to. Buckets with no fit-time values have no bounds and filter
/// nothing; rows in no bucket are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutlierFilter {
    value_column: String,
    phase_columns: [String; 3],
    method: OutlierMethod,
    bounds: BTreeMap<PhaseBucket, OutlierBounds>,
    is_fitted: bool,
}

impl PhaseOutlierFilter {
    /// Filter on `value_column`, reading the `Phase=Phase 1..3` indicators.
    pub fn new(value_column: impl Into<String>, method: OutlierMethod) -> Self {
        Self {
            value_column: value_column.into(),
            phase_columns: [
                "Phase=Phase 1".to_string(),
                "Phase=Phase 2".to_string(),
                "Phase=Phase 3".to_string(),
            ],
            method,
            bounds: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn with_phase_columns(mut self, columns: [String; 3]) -> Self {
        self.phase_columns = columns;
        self
    }

    pub fn bounds(&self, bucket: PhaseBucket) -> Option<&OutlierBounds> {
        self.bounds.get(&bucket)
    }

    fn compute_bounds(&self, values: &[f64]) -> Option<OutlierBounds> {
        let median = stats::median(values)?;
        let (lower, upper) = match self.method {
            OutlierMethod::Iqr { lower, upper } => {
                let iqr = stats::quantile(values, 0.75)? - stats::quantile(values, 0.25)?;
                (median - lower * iqr, median + upper * iqr)
            }
            OutlierMethod::Mad { factor } => {
                let mad = stats::median_abs_deviation(values)?;
                (median - factor * mad, median + factor * mad)
            }
        };
        Some(OutlierBounds {
            lower,
            upper,
            median,
        })
    }

    /// Phase flags of every row. A missing indicator column reads as 0.
    fn phase_flags(&self, df: &DataFrame) -> Result<Vec<[bool; 3]>> {
        let mut flags = vec![[false; 3]; df.height()];
        for (i, name) in self.phase_columns.iter().enumerate() {
            if !df.has_column(name) {
                continue;
            }
            for (row, value) in df.float_values(name)?.into_iter().enumerate() {
                flags[row][i] = value == Some(1.0);
            }
        }
        Ok(flags)
    }
}

impl Stage for PhaseOutlierFilter {
    fn kind(&self) -> &'static str {
        "phase_outlier_filter"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.value_column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input.to_vec()
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let values = df.float_values(&self.value_column)?;
        let flags = self.phase_flags(df)?;

        let mut bounds = BTreeMap::new();
        for bucket in PhaseBucket::ALL {
            let bucket_values: Vec<f64> = values
                .iter()
                .zip(&flags)
                .filter(|(_, [p1, p2, p3])| bucket.matches(*p1, *p2, *p3))
                .filter_map(|(v, _)| *v)
                .collect();
            match self.compute_bounds(&bucket_values) {
                Some(b) => {
                    debug!(?bucket, lower = b.lower, upper = b.upper, "Outlier bounds");
                    bounds.insert(bucket, b);
                }
                None => debug!(?bucket, "Empty phase bucket, no bounds"),
            }
        }

        self.bounds = bounds;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let values = df.float_values(&self.value_column)?;
        let keep: Vec<bool> = values
            .iter()
            .zip(self.phase_flags(df)?)
            .map(|(value, [p1, p2, p3])| match value {
                Some(v) => PhaseBucket::ALL
                    .iter()
                    .filter(|bucket| bucket.matches(p1, p2, p3))
                    .filter_map(|bucket| self.bounds.get(bucket))
                    .all(|b| b.contains(*v)),
                None => true,
            })
            .collect();

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            info!(dropped, column = %self.value_column, "Phase outliers removed");
        }
        df.filter_rows(&keep)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn alters_rows(&self) -> bool {
        true
    }
}

/// Keeps rows whose start year lies in an inclusive window. Rows without a
/// start year are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartYearFilter {
    column: String,
    min_year: i32,
    max_year: i32,
}

impl StartYearFilter {
    pub fn new(column: impl Into<String>, min_year: i32, max_year: i32) -> Self {
        Self {
            column: column.into(),
            min_year,
            max_year,
        }
    }
}

impl Default for StartYearFilter {
    fn default() -> Self {
        Self::new("start_year", 1995, 2018)
    }
}

impl Stage for StartYearFilter {
    fn kind(&self) -> &'static str {
        "start_year_filter"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input.to_vec()
    }

    fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
        if self.min_year > self.max_year {
            return Err(FeatureError::InvalidParameter {
                name: "min_year".to_string(),
                value: self.min_year.to_string(),
                reason: format!("must not exceed max_year {}", self.max_year),
            });
        }
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let (min, max) = (self.min_year as f64, self.max_year as f64);
        let keep: Vec<bool> = df
            .float_values(&self.column)?
            .into_iter()
            .map(|year| year.is_some_and(|y| y >= min && y <= max))
            .collect();

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            info!(dropped, min_year = self.min_year, max_year = self.max_year, "Rows outside start-year window removed");
        }
        df.filter_rows(&keep)
    }

    fn alters_rows(&self) -> bool {
        true
    }
}
