//! Static lookup tables joined onto trial records
//!
//! Tables are loaded once per run and shared read-only through the stage
//! context. Every lookup returns a [`Resolution`] so callers always see
//! whether a key matched.

use crate::error::{FeatureError, Result};
use crate::feature_engineering::ENGLISH_STOP_WORDS;
use crate::record::FrameExt;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Historical or alternative country names mapped to their canonical table key
pub const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("Former Yugoslavia", "Serbia"),
    ("Former Serbia and Montenegro", "Serbia"),
    ("Holy See (Vatican City State)", "Italy"),
    ("Macedonia, The Former Yugoslav Republic of", "North Macedonia"),
    ("Swaziland", "Eswatini"),
    ("Netherlands Antilles", "Curacao"),
];

/// Outcome of a reference lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    Unresolved(String),
}

impl<T> Resolution<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            Resolution::Resolved(value) => Some(value),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Per-country numeric metrics keyed by canonical country name.
///
/// Missing metric cells are stored as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountryTable {
    metrics: Vec<String>,
    rows: BTreeMap<String, Vec<f64>>,
    aliases: BTreeMap<String, String>,
}

impl CountryTable {
    pub fn new<S: Into<String>>(
        metrics: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> Result<Self> {
        let metrics: Vec<String> = metrics.into_iter().map(Into::into).collect();
        let mut table = BTreeMap::new();
        for (country, values) in rows {
            if values.len() != metrics.len() {
                return Err(FeatureError::ShapeError {
                    expected: format!("{} metrics", metrics.len()),
                    actual: format!("{} metrics for `{country}`", values.len()),
                });
            }
            table.insert(country, values);
        }

        Ok(Self {
            metrics,
            rows: table,
            aliases: COUNTRY_ALIASES
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        })
    }

    /// Build from a frame with one key column and one numeric column per metric.
    pub fn from_dataframe(df: &DataFrame, key_column: &str) -> Result<Self> {
        let keys = string_column(df, key_column)?;
        let metrics: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .filter(|name| name != key_column)
            .collect();

        let mut columns = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            columns.push(df.float_values(metric)?);
        }

        let mut rows = Vec::with_capacity(keys.len());
        for (i, key) in keys.into_iter().enumerate() {
            let Some(key) = key else {
                warn!(row = i, "Country row without a name skipped");
                continue;
            };
            let values = columns.iter().map(|c| c[i].unwrap_or(0.0)).collect();
            rows.push((key, values));
        }

        let table = Self::new(metrics, rows)?;
        debug!(countries = table.len(), metrics = table.metrics.len(), "Country table loaded");
        Ok(table)
    }

    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact name first, then the alias table.
    pub fn resolve(&self, name: &str) -> Resolution<&[f64]> {
        if let Some(values) = self.rows.get(name) {
            return Resolution::Resolved(values);
        }
        match self.aliases.get(name).and_then(|canonical| self.rows.get(canonical)) {
            Some(values) => Resolution::Resolved(values),
            None => Resolution::Unresolved(name.to_string()),
        }
    }

    fn metric_values(&self, metric: usize) -> Vec<f64> {
        self.rows.values().map(|row| row[metric]).collect()
    }

    /// Mean of a metric over every country in the table
    pub fn global_mean(&self, metric: usize) -> Option<f64> {
        crate::utils::stats::mean(&self.metric_values(metric))
    }

    pub fn global_min(&self, metric: usize) -> Option<f64> {
        crate::utils::stats::min(&self.metric_values(metric))
    }

    pub fn global_max(&self, metric: usize) -> Option<f64> {
        crate::utils::stats::max(&self.metric_values(metric))
    }
}

/// Population of one area split by age segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgePopulation {
    pub youth: f64,
    pub working: f64,
    pub elderly: f64,
}

/// Sub-national age-segment populations keyed by area (city or region) name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionalTable {
    areas: BTreeMap<String, AgePopulation>,
}

impl RegionalTable {
    /// Duplicate areas keep the first entry.
    pub fn new(entries: impl IntoIterator<Item = (String, AgePopulation)>) -> Self {
        let mut areas = BTreeMap::new();
        for (area, population) in entries {
            areas.entry(area).or_insert(population);
        }
        Self { areas }
    }

    /// Build from a frame with `area_column` and `Youth`, `Working`,
    /// `Elderly` columns. Rows with any missing segment are skipped.
    pub fn from_dataframe(df: &DataFrame, area_column: &str) -> Result<Self> {
        let areas = string_column(df, area_column)?;
        let youth = df.float_values("Youth")?;
        let working = df.float_values("Working")?;
        let elderly = df.float_values("Elderly")?;

        let mut skipped = 0usize;
        let entries: Vec<(String, AgePopulation)> = areas
            .into_iter()
            .enumerate()
            .filter_map(|(i, area)| match (area, youth[i], working[i], elderly[i]) {
                (Some(area), Some(youth), Some(working), Some(elderly)) => Some((
                    area,
                    AgePopulation {
                        youth,
                        working,
                        elderly,
                    },
                )),
                _ => {
                    skipped += 1;
                    None
                }
            })
            .collect();

        if skipped > 0 {
            debug!(skipped, "Incomplete regional rows skipped");
        }
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn lookup(&self, area: &str) -> Resolution<&AgePopulation> {
        match self.areas.get(area) {
            Some(population) => Resolution::Resolved(population),
            None => Resolution::Unresolved(area.to_string()),
        }
    }
}

/// Research-activity rank per facility, keyed by normalized facility name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityRankTable {
    ranks: BTreeMap<String, f64>,
    stop_words: BTreeSet<String>,
}

impl FacilityRankTable {
    /// Names are normalized on insert; duplicates keep the first rank.
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        let mut table = Self {
            ranks: BTreeMap::new(),
            stop_words: ENGLISH_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        };
        for (name, rank) in entries {
            let key = table.normalize(&name);
            if !key.is_empty() {
                table.ranks.entry(key).or_insert(rank);
            }
        }
        table
    }

    /// Build from a frame with a name column and a numeric `rank_column`.
    pub fn from_dataframe(df: &DataFrame, name_column: &str, rank_column: &str) -> Result<Self> {
        let names = string_column(df, name_column)?;
        let ranks = df.float_values(rank_column)?;
        let entries: Vec<(String, f64)> = names
            .into_iter()
            .zip(ranks)
            .filter_map(|(name, rank)| Some((name?, rank?)))
            .collect();
        Ok(Self::new(entries))
    }

    /// Strip punctuation, lowercase and drop stop words.
    pub fn normalize(&self, name: &str) -> String {
        let stripped: String = name.chars().filter(|c| !c.is_ascii_punctuation()).collect();
        stripped
            .to_lowercase()
            .split_whitespace()
            .filter(|word| !self.stop_words.contains(*word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn resolve(&self, facility: &str) -> Resolution<f64> {
        match self.ranks.get(&self.normalize(facility)) {
            Some(&rank) => Resolution::Resolved(rank),
            None => Resolution::Unresolved(facility.to_string()),
        }
    }
}

impl Default for FacilityRankTable {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

/// Every lookup table an enrichment stage may consult
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub countries: CountryTable,
    pub regional: RegionalTable,
    pub facilities: FacilityRankTable,
}

impl ReferenceTables {
    pub fn new(countries: CountryTable, regional: RegionalTable, facilities: FacilityRankTable) -> Self {
        Self {
            countries,
            regional,
            facilities,
        }
    }
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    Ok(df
        .text_values(name)?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect())
}
