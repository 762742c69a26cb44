//! Local population of the age groups a trial recruits from

use crate::error::Result;
use crate::preprocessing::{extend_names, parse_age_years, Context, Stage};
use crate::record::{float_column, FrameExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::reference::{AgePopulation, Resolution};

/// Lower age bound assumed when a trial states none
pub const DEFAULT_MIN_AGE: f64 = 0.0;
/// Upper age bound assumed when a trial states none
pub const DEFAULT_MAX_AGE: f64 = 100.0;

/// Age segments overlapped by an eligibility age range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgeSegments {
    pub youth: bool,
    pub working: bool,
    pub elderly: bool,
}

impl AgeSegments {
    /// Youth up to 16, working age 16 to 65, elderly from 65.
    pub fn classify(min_age: f64, max_age: f64) -> Self {
        Self {
            youth: min_age <= 16.0,
            working: min_age < 65.0 && max_age > 16.0,
            elderly: max_age >= 65.0,
        }
    }

    /// Population of the covered segments in one area.
    pub fn population(&self, area: &AgePopulation) -> f64 {
        let mut total = 0.0;
        if self.youth {
            total += area.youth;
        }
        if self.working {
            total += area.working;
        }
        if self.elderly {
            total += area.elderly;
        }
        total
    }
}

/// Sums the regional population of the covered age segments over every site,
/// written to `local_age_population`.
///
/// A site matches by city name; failing that, and only when the record's
/// city and state lists have equal length, by the state at the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalAgeEnrichment {
    city_column: String,
    state_column: String,
    min_age_column: String,
    max_age_column: String,
}

impl RegionalAgeEnrichment {
    pub const OUTPUT: &'static str = "local_age_population";

    pub fn new() -> Self {
        Self {
            city_column: "LocationCity".to_string(),
            state_column: "LocationState".to_string(),
            min_age_column: "MinimumAge".to_string(),
            max_age_column: "MaximumAge".to_string(),
        }
    }

    pub fn with_age_columns(mut self, min_age: impl Into<String>, max_age: impl Into<String>) -> Self {
        self.min_age_column = min_age.into();
        self.max_age_column = max_age.into();
        self
    }

    /// Ages in years, read as numbers or parsed from "<n> <unit>" text.
    fn ages(&self, df: &DataFrame, column: &str, default: f64) -> Result<Vec<f64>> {
        let numbers = df.float_values(column)?;
        let texts = df.text_values(column)?;
        Ok(numbers
            .into_iter()
            .zip(texts)
            .map(|(number, text)| {
                number
                    .or_else(|| text.and_then(|t| parse_age_years(&t)))
                    .unwrap_or(default)
            })
            .collect())
    }
}

impl Default for RegionalAgeEnrichment {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for RegionalAgeEnrichment {
    fn kind(&self) -> &'static str {
        "regional_age"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![
            self.city_column.clone(),
            self.state_column.clone(),
            self.max_age_column.clone(),
            self.min_age_column.clone(),
        ]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, [Self::OUTPUT.to_string()])
    }

    fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        let regional = &ctx.references().regional;
        let mut unmatched = 0usize;

        let min_ages = self.ages(df, &self.min_age_column, DEFAULT_MIN_AGE)?;
        let max_ages = self.ages(df, &self.max_age_column, DEFAULT_MAX_AGE)?;
        let city_lists = df.text_lists(&self.city_column)?;
        let state_lists = df.text_lists(&self.state_column)?;

        let mut totals = Vec::with_capacity(df.height());
        for row in 0..df.height() {
            let segments = AgeSegments::classify(min_ages[row], max_ages[row]);
            let (cities, states) = (&city_lists[row], &state_lists[row]);

            let mut total = 0.0;
            for (j, city) in cities.iter().enumerate() {
                let area = match regional.lookup(city) {
                    Resolution::Resolved(area) => Some(area),
                    Resolution::Unresolved(_) if cities.len() == states.len() => {
                        regional.lookup(&states[j]).resolved()
                    }
                    Resolution::Unresolved(_) => None,
                };
                match area {
                    Some(area) => total += segments.population(area),
                    None => unmatched += 1,
                }
            }
            totals.push(Some(total));
        }

        debug!(unmatched, "Sites without regional data");
        df.append_columns(vec![float_column(Self::OUTPUT, totals)])
    }
}
