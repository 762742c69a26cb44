//! Country and city aggregates over a trial's site list

use crate::error::{FeatureError, Result};
use crate::preprocessing::{extend_names, Context, Stage};
use crate::record::{float_column, FrameExt};
use crate::utils::stats;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::reference::{CountryTable, Resolution};

/// How repeated sites count towards the aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationStrategy {
    /// Each distinct country (or city) once
    #[default]
    Simple,
    /// Each site, so countries with many sites weigh more
    Weighted,
}

/// Fill for rows whose countries all fail to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Statistics of the resolved rows of the fit batch, stored at fit time
    Trials,
    /// Statistics of the whole country table
    #[default]
    Worldwide,
}

/// Aggregates of one country metric for one row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MetricAggregate {
    avg: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    main: Option<f64>,
}

#[derive(Debug, Default)]
struct RowAggregate {
    metrics: Vec<MetricAggregate>,
    city: [f64; 3],
    unresolved: Vec<String>,
}

/// Joins per-country metrics onto each trial and summarizes them as
/// `avg_/min_/max_/main_country_<metric>`, plus
/// `avg_/min_/max_city_population` from the site population densities.
///
/// The main country is the most frequent site country; ties average the
/// tied countries that resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEnrichment {
    city_column: String,
    country_column: String,
    density_column: String,
    strategy: AggregationStrategy,
    fill: FillPolicy,
    metrics: Vec<String>,
    fallback: BTreeMap<String, f64>,
    is_fitted: bool,
}

impl LocationEnrichment {
    pub const CITY_OUTPUTS: [&'static str; 3] =
        ["avg_city_population", "min_city_population", "max_city_population"];

    pub fn new(strategy: AggregationStrategy, fill: FillPolicy) -> Self {
        Self {
            city_column: "LocationCity".to_string(),
            country_column: "LocationCountry".to_string(),
            density_column: "LocationPopulationDensity".to_string(),
            strategy,
            fill,
            metrics: Vec::new(),
            fallback: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn with_columns(
        mut self,
        city: impl Into<String>,
        country: impl Into<String>,
        density: impl Into<String>,
    ) -> Self {
        self.city_column = city.into();
        self.country_column = country.into();
        self.density_column = density.into();
        self
    }

    /// Fill value for an output column, learned at fit time.
    pub fn fallback(&self, column: &str) -> Option<f64> {
        self.fallback.get(column).copied()
    }

    fn metric_names(metric: &str) -> [String; 4] {
        [
            format!("avg_{metric}"),
            format!("min_{metric}"),
            format!("max_{metric}"),
            format!("main_country_{metric}"),
        ]
    }

    fn output_names(&self) -> Vec<String> {
        self.metrics
            .iter()
            .flat_map(|m| Self::metric_names(m))
            .chain(Self::CITY_OUTPUTS.iter().map(|s| s.to_string()))
            .collect()
    }

    fn aggregate_rows(&self, df: &DataFrame, table: &CountryTable) -> Result<Vec<RowAggregate>> {
        let countries = df.text_lists(&self.country_column)?;
        let cities = df.text_lists(&self.city_column)?;
        let densities = df.float_lists(&self.density_column)?;
        Ok(countries
            .iter()
            .zip(&cities)
            .zip(&densities)
            .map(|((countries, cities), densities)| self.aggregate_row(countries, cities, densities, table))
            .collect())
    }

    fn aggregate_row(
        &self,
        countries: &[String],
        cities: &[String],
        densities: &[Option<f64>],
        table: &CountryTable,
    ) -> RowAggregate {
        let n_metrics = table.metrics().len();

        let mut aggregate = RowAggregate {
            metrics: vec![MetricAggregate::default(); n_metrics],
            ..Default::default()
        };

        // Country metrics over the site countries
        let considered: Vec<&String> = match self.strategy {
            AggregationStrategy::Weighted => countries.iter().collect(),
            AggregationStrategy::Simple => {
                let mut seen = BTreeSet::new();
                countries.iter().filter(|c| seen.insert(c.as_str())).collect()
            }
        };

        let mut resolved: Vec<&[f64]> = Vec::with_capacity(considered.len());
        for country in considered {
            match table.resolve(country) {
                Resolution::Resolved(values) => resolved.push(values),
                Resolution::Unresolved(name) => {
                    if !aggregate.unresolved.contains(&name) {
                        aggregate.unresolved.push(name);
                    }
                }
            }
        }

        // Main country: most frequent site country, ties averaged
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for country in countries {
            *counts.entry(country.as_str()).or_insert(0) += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        let main: Vec<&[f64]> = counts
            .iter()
            .filter(|(_, &count)| count == top)
            .filter_map(|(country, _)| table.resolve(country).resolved())
            .collect();

        for (m, slot) in aggregate.metrics.iter_mut().enumerate() {
            let values: Vec<f64> = resolved.iter().map(|row| row[m]).collect();
            let main_values: Vec<f64> = main.iter().map(|row| row[m]).collect();
            *slot = MetricAggregate {
                avg: stats::mean(&values),
                min: stats::min(&values),
                max: stats::max(&values),
                main: stats::mean(&main_values),
            };
        }

        // City densities keyed by (city, country)
        let mut seen = BTreeSet::new();
        let city_densities: Vec<f64> = cities
            .iter()
            .enumerate()
            .filter(|(i, city)| match self.strategy {
                AggregationStrategy::Weighted => true,
                AggregationStrategy::Simple => {
                    seen.insert((city.as_str(), countries.get(*i).map(String::as_str)))
                }
            })
            .filter_map(|(i, _)| densities.get(i).copied().flatten())
            .collect();
        aggregate.city = [
            stats::mean(&city_densities).unwrap_or(0.0),
            stats::min(&city_densities).unwrap_or(0.0),
            stats::max(&city_densities).unwrap_or(0.0),
        ];

        aggregate
    }

    fn worldwide_fallback(&self, table: &CountryTable) -> Result<BTreeMap<String, f64>> {
        let mut fallback = BTreeMap::new();
        for (m, metric) in self.metrics.iter().enumerate() {
            let unavailable = || FeatureError::FallbackUnavailable {
                stage: self.kind().to_string(),
                metric: metric.clone(),
            };
            let mean = table.global_mean(m).ok_or_else(unavailable)?;
            let [avg, min, max, main] = Self::metric_names(metric);
            fallback.insert(avg, mean);
            fallback.insert(min, table.global_min(m).ok_or_else(unavailable)?);
            fallback.insert(max, table.global_max(m).ok_or_else(unavailable)?);
            fallback.insert(main, mean);
        }
        Ok(fallback)
    }

    fn trials_fallback(&self, rows: &[RowAggregate]) -> Result<BTreeMap<String, f64>> {
        let mut fallback = BTreeMap::new();
        for (m, metric) in self.metrics.iter().enumerate() {
            let collect = |pick: fn(&MetricAggregate) -> Option<f64>| -> Vec<f64> {
                rows.iter().filter_map(|r| pick(&r.metrics[m])).collect()
            };
            let unavailable = || FeatureError::FallbackUnavailable {
                stage: self.kind().to_string(),
                metric: metric.clone(),
            };

            let [avg, min, max, main] = Self::metric_names(metric);
            fallback.insert(avg, stats::mean(&collect(|a| a.avg)).ok_or_else(unavailable)?);
            fallback.insert(min, stats::min(&collect(|a| a.min)).ok_or_else(unavailable)?);
            fallback.insert(max, stats::max(&collect(|a| a.max)).ok_or_else(unavailable)?);
            fallback.insert(main, stats::mean(&collect(|a| a.main)).ok_or_else(unavailable)?);
        }
        Ok(fallback)
    }
}

impl Stage for LocationEnrichment {
    fn kind(&self) -> &'static str {
        "location"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![
            self.city_column.clone(),
            self.country_column.clone(),
            self.density_column.clone(),
        ]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.output_names())
    }

    fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()> {
        let table = &ctx.references().countries;
        self.metrics = table.metrics().to_vec();

        self.fallback = match self.fill {
            FillPolicy::Worldwide => self.worldwide_fallback(table)?,
            FillPolicy::Trials => {
                let rows = self.aggregate_rows(df, table)?;
                self.trials_fallback(&rows)?
            }
        };
        debug!(fill = ?self.fill, metrics = self.metrics.len(), "Location fallbacks computed");

        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }
        let table = &ctx.references().countries;
        if table.metrics() != self.metrics.as_slice() {
            return Err(FeatureError::ConfigError(
                "country table metrics differ from the ones seen at fit time".to_string(),
            ));
        }

        let rows = self.aggregate_rows(df, table)?;

        let unresolved: BTreeSet<&str> = rows
            .iter()
            .flat_map(|r| r.unresolved.iter().map(String::as_str))
            .collect();
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), countries = ?unresolved, "Countries not found in reference table");
        }

        let mut columns = Vec::with_capacity(self.metrics.len() * 4 + 3);
        for (m, metric) in self.metrics.iter().enumerate() {
            let picks: [fn(&MetricAggregate) -> Option<f64>; 4] =
                [|a| a.avg, |a| a.min, |a| a.max, |a| a.main];
            for (name, pick) in Self::metric_names(metric).into_iter().zip(picks) {
                let fill = self.fallback.get(&name).copied();
                let values = rows.iter().map(|r| pick(&r.metrics[m]).or(fill)).collect();
                columns.push(float_column(&name, values));
            }
        }
        for (k, name) in Self::CITY_OUTPUTS.iter().enumerate() {
            columns.push(float_column(name, rows.iter().map(|r| Some(r.city[k])).collect()));
        }

        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
