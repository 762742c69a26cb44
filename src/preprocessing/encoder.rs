//! One-hot encoders for scalar, list and high-cardinality categorical fields

use crate::error::{FeatureError, Result};
use crate::record::{indicator_column, FrameExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::stage::{extend_names, Context, Stage};

/// Rank categories by count descending, then by value ascending.
fn rank_by_count(counts: BTreeMap<String, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// One indicator per category of a scalar field, named `<field>=<value>`.
///
/// With `max_categories` set only the most frequent categories get a column.
/// Unseen values encode to all zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleOneHotEncoder {
    columns: Vec<String>,
    max_categories: Option<usize>,
    vocabulary: BTreeMap<String, Vec<String>>,
    is_fitted: bool,
}

impl SingleOneHotEncoder {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            max_categories: None,
            vocabulary: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn with_max_categories(mut self, max_categories: usize) -> Self {
        self.max_categories = Some(max_categories);
        self
    }

    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.vocabulary.get(column).map(Vec::as_slice)
    }

    fn output_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|col| {
                self.vocabulary
                    .get(col)
                    .into_iter()
                    .flatten()
                    .map(move |value| format!("{col}={value}"))
            })
            .collect()
    }
}

impl Stage for SingleOneHotEncoder {
    fn kind(&self) -> &'static str {
        "single_one_hot"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.output_names())
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut vocabulary = BTreeMap::new();
        for name in &self.columns {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for value in df.text_values(name)?.into_iter().flatten() {
                *counts.entry(value).or_insert(0) += 1;
            }

            let mut categories: Vec<String> = match self.max_categories {
                Some(k) => rank_by_count(counts).into_iter().take(k).map(|(v, _)| v).collect(),
                None => counts.into_keys().collect(),
            };
            categories.sort();
            debug!(column = %name, n_categories = categories.len(), "One-hot vocabulary");
            vocabulary.insert(name.clone(), categories);
        }

        self.vocabulary = vocabulary;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let mut columns = Vec::new();
        for name in &self.columns {
            let cells = df.text_values(name)?;
            for category in self.vocabulary.get(name).into_iter().flatten() {
                columns.push(indicator_column(
                    &format!("{name}={category}"),
                    cells.iter().map(|c| c.as_deref() == Some(category.as_str())),
                ));
            }
        }
        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

/// One indicator per element value of a list field, named `<field>=<value>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiOneHotEncoder {
    columns: Vec<String>,
    vocabulary: BTreeMap<String, Vec<String>>,
    is_fitted: bool,
}

impl MultiOneHotEncoder {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            vocabulary: BTreeMap::new(),
            is_fitted: false,
        }
    }

    fn output_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|col| {
                self.vocabulary
                    .get(col)
                    .into_iter()
                    .flatten()
                    .map(move |value| format!("{col}={value}"))
            })
            .collect()
    }
}

impl Stage for MultiOneHotEncoder {
    fn kind(&self) -> &'static str {
        "multi_one_hot"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.output_names())
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut vocabulary = BTreeMap::new();
        for name in &self.columns {
            let values: BTreeSet<String> = df.text_lists(name)?.into_iter().flatten().collect();
            vocabulary.insert(name.clone(), values.into_iter().collect());
        }
        self.vocabulary = vocabulary;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let mut columns = Vec::new();
        for name in &self.columns {
            let cells: Vec<BTreeSet<String>> = df
                .text_lists(name)?
                .into_iter()
                .map(|items| items.into_iter().collect())
                .collect();
            for category in self.vocabulary.get(name).into_iter().flatten() {
                columns.push(indicator_column(
                    &format!("{name}={category}"),
                    cells.iter().map(|set| set.contains(category)),
                ));
            }
        }
        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

/// How many high-cardinality categories keep a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopKStrategy {
    /// The K values with the highest document frequency
    Top(usize),
    /// Every value whose document frequency exceeds the threshold
    MinCount(usize),
}

impl Default for TopKStrategy {
    fn default() -> Self {
        TopKStrategy::Top(20)
    }
}

/// One indicator per frequent element of a list field, named
/// `<field>_top=<value>`.
///
/// Frequency counts each value at most once per record. Ties at the cut-off
/// are broken by value, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKOneHotEncoder {
    columns: Vec<String>,
    strategy: TopKStrategy,
    vocabulary: BTreeMap<String, Vec<String>>,
    is_fitted: bool,
}

impl TopKOneHotEncoder {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>, strategy: TopKStrategy) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            strategy,
            vocabulary: BTreeMap::new(),
            is_fitted: false,
        }
    }

    /// Retained values for a field, most frequent first.
    pub fn top_values(&self, column: &str) -> Option<&[String]> {
        self.vocabulary.get(column).map(Vec::as_slice)
    }

    fn output_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|col| {
                self.vocabulary
                    .get(col)
                    .into_iter()
                    .flatten()
                    .map(move |value| format!("{col}_top={value}"))
            })
            .collect()
    }
}

impl Stage for TopKOneHotEncoder {
    fn kind(&self) -> &'static str {
        "top_k_one_hot"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.output_names())
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut vocabulary = BTreeMap::new();
        for name in &self.columns {
            let mut document_frequency: BTreeMap<String, usize> = BTreeMap::new();
            for cell in df.text_lists(name)? {
                let distinct: BTreeSet<String> = cell.into_iter().collect();
                for value in distinct {
                    *document_frequency.entry(value).or_insert(0) += 1;
                }
            }

            let ranked = rank_by_count(document_frequency);
            let retained: Vec<String> = match self.strategy {
                TopKStrategy::Top(k) => ranked.into_iter().take(k).map(|(v, _)| v).collect(),
                TopKStrategy::MinCount(min) => ranked
                    .into_iter()
                    .filter(|(_, count)| *count > min)
                    .map(|(v, _)| v)
                    .collect(),
            };
            debug!(column = %name, retained = retained.len(), "Top-K vocabulary");
            vocabulary.insert(name.clone(), retained);
        }
        self.vocabulary = vocabulary;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let mut columns = Vec::new();
        for name in &self.columns {
            let cells: Vec<BTreeSet<String>> = df
                .text_lists(name)?
                .into_iter()
                .map(|items| items.into_iter().collect())
                .collect();
            for value in self.vocabulary.get(name).into_iter().flatten() {
                columns.push(indicator_column(
                    &format!("{name}_top={value}"),
                    cells.iter().map(|set| set.contains(value)),
                ));
            }
        }
        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
