//! Stateless per-record derivations
//!
//! Every stage here computes its outputs from the row alone, so `fit` only
//! marks the stage ready.

use crate::error::Result;
use crate::record::{float_column, text_column, FrameExt};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::stage::{extend_names, Context, Stage};

/// Placeholder used when a trial lists a single condition
pub const NO_SECOND_CONDITION: &str = "No second Condition";

/// Prefix of the columns written by [`AgeConverter`]
pub const YEARS_PREFIX: &str = "years_";

/// Units per year for each age unit
const AGE_UNITS: &[(&str, f64)] = &[
    ("years", 1.0),
    ("year", 1.0),
    ("months", 12.0),
    ("month", 12.0),
    ("weeks", 52.0),
    ("week", 52.0),
    ("days", 365.0),
    ("day", 365.0),
    ("hours", 8760.0),
    ("hour", 8760.0),
];

/// Convert an age string such as `"18 Years"` or `"6 Months"` to years.
///
/// A bare number is taken as years. Unknown units give `None`.
pub fn parse_age_years(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;

    let unit = unit.trim().to_lowercase();
    if unit.is_empty() {
        return Some(number);
    }
    AGE_UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, per_year)| number / per_year)
}

/// Parse a trial start date. Accepts `"January 2015"`, `"January 15, 2015"`
/// and ISO `"2015-01-15"`.
pub fn parse_start_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%B %d, %Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("1 {text}"), "%d %B %Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d"))
        .ok()
}

macro_rules! stateless_fit {
    () => {
        fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
            Ok(())
        }
    };
}

/// Splits the condition list into `Condition1` and `Condition2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSplitter {
    column: String,
}

impl ConditionSplitter {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    fn names(&self) -> [String; 2] {
        [format!("{}1", self.column), format!("{}2", self.column)]
    }
}

impl Stage for ConditionSplitter {
    fn kind(&self) -> &'static str {
        "condition_split"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.names())
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let mut first = Vec::with_capacity(df.height());
        let mut second = Vec::with_capacity(df.height());
        for conditions in df.text_lists(&self.column)? {
            let mut conditions = conditions.into_iter();
            first.push(conditions.next());
            second.push(Some(
                conditions
                    .next()
                    .unwrap_or_else(|| NO_SECOND_CONDITION.to_string()),
            ));
        }

        let [first_name, second_name] = self.names();
        df.append_columns(vec![
            text_column(&first_name, first),
            text_column(&second_name, second),
        ])
    }
}

/// Converts age strings to numeric years in `years_<field>` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeConverter {
    columns: Vec<String>,
}

impl AgeConverter {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Stage for AgeConverter {
    fn kind(&self) -> &'static str {
        "age"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.columns.iter().map(|c| format!("{YEARS_PREFIX}{c}")))
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let years = df
                .text_values(name)?
                .into_iter()
                .map(|v| v.and_then(|t| parse_age_years(&t)))
                .collect();
            columns.push(float_column(&format!("{YEARS_PREFIX}{name}"), years));
        }
        df.append_columns(columns)
    }
}

/// Extracts `start_month` and `start_year` from the start date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDateExtractor {
    column: String,
}

impl StartDateExtractor {
    pub const MONTH: &'static str = "start_month";
    pub const YEAR: &'static str = "start_year";

    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Stage for StartDateExtractor {
    fn kind(&self) -> &'static str {
        "start_date"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, [Self::MONTH.to_string(), Self::YEAR.to_string()])
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let dates: Vec<Option<NaiveDate>> = df
            .text_values(&self.column)?
            .into_iter()
            .map(|v| v.and_then(|t| parse_start_date(&t)))
            .collect();

        df.append_columns(vec![
            float_column(Self::MONTH, dates.iter().map(|d| d.map(|d| d.month() as f64)).collect()),
            float_column(Self::YEAR, dates.iter().map(|d| d.map(|d| d.year() as f64)).collect()),
        ])
    }
}

/// Element counts of list fields (`count_<field>`) and character lengths of
/// text fields (`length_<field>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctCounter {
    count_columns: Vec<String>,
    length_columns: Vec<String>,
}

impl DistinctCounter {
    pub fn new<S: Into<String>>(count_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            count_columns: count_columns.into_iter().map(Into::into).collect(),
            length_columns: Vec::new(),
        }
    }

    pub fn with_length_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.length_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    fn names(&self) -> Vec<String> {
        self.count_columns
            .iter()
            .map(|c| format!("count_{c}"))
            .chain(self.length_columns.iter().map(|c| format!("length_{c}")))
            .collect()
    }
}

impl Stage for DistinctCounter {
    fn kind(&self) -> &'static str {
        "count"
    }

    fn input_columns(&self) -> Vec<String> {
        let mut columns = self.count_columns.clone();
        for name in &self.length_columns {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        columns
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.names())
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let mut columns = Vec::new();
        for name in &self.count_columns {
            let counts = df
                .list_lengths(name)?
                .into_iter()
                .map(|len| Some(len as f64))
                .collect();
            columns.push(float_column(&format!("count_{name}"), counts));
        }
        for name in &self.length_columns {
            let lengths = df
                .text_lists(name)?
                .iter()
                .map(|texts| {
                    let total: usize = texts.iter().map(|t| t.chars().count()).sum();
                    Some(total as f64)
                })
                .collect();
            columns.push(float_column(&format!("length_{name}"), lengths));
        }
        df.append_columns(columns)
    }
}

/// Numeric parts of the first three MeSH identifiers, `mesh_id_1..3`.
///
/// `"D003924"` becomes `3924`; absent or malformed identifiers give 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshIdExtractor {
    column: String,
}

impl MeshIdExtractor {
    pub const SLOTS: usize = 3;

    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    fn names() -> Vec<String> {
        (1..=Self::SLOTS).map(|i| format!("mesh_id_{i}")).collect()
    }
}

impl Stage for MeshIdExtractor {
    fn kind(&self) -> &'static str {
        "mesh_id"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, Self::names())
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let ids = df.text_lists(&self.column)?;

        let columns = Self::names()
            .into_iter()
            .enumerate()
            .map(|(slot, name)| {
                let values = ids
                    .iter()
                    .map(|row| {
                        let id = row
                            .get(slot)
                            .and_then(|id| id.trim().trim_start_matches('D').parse::<f64>().ok());
                        Some(id.unwrap_or(0.0))
                    })
                    .collect();
                float_column(&name, values)
            })
            .collect();
        df.append_columns(columns)
    }
}

/// Enrollment divided by the number of distinct entries of each site
/// field, `patients_per_<field>`. Zero when either side is unusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDistribution {
    enrollment_column: String,
    columns: Vec<String>,
}

impl PatientDistribution {
    pub fn new<S: Into<String>>(
        enrollment_column: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            enrollment_column: enrollment_column.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Stage for PatientDistribution {
    fn kind(&self) -> &'static str {
        "patient_distribution"
    }

    fn input_columns(&self) -> Vec<String> {
        let mut columns = vec![self.enrollment_column.clone()];
        columns.extend(self.columns.iter().cloned());
        columns
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.columns.iter().map(|c| format!("patients_per_{c}")))
    }

    stateless_fit!();

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        let enrollment = df.float_values(&self.enrollment_column)?;
        let mut columns = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let ratios = df
                .text_lists(name)?
                .into_iter()
                .zip(&enrollment)
                .map(|(cell, count)| {
                    let distinct: BTreeSet<String> = cell.into_iter().collect();
                    match count {
                        Some(count) if !distinct.is_empty() => Some(count / distinct.len() as f64),
                        _ => Some(0.0),
                    }
                })
                .collect();
            columns.push(float_column(&format!("patients_per_{name}"), ratios));
        }
        df.append_columns(columns)
    }
}
