//! Validated feature pipeline and its fitted, persistable form

use crate::error::{FeatureError, Result};
use crate::record::{frame_from_rows, FeatureMatrix, FeatureVector, FrameExt, Record, Schema};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::compose::{Mode, Pipeline};
use super::config::{standard_pipeline, PipelineConfig};
use super::stage::Context;

/// Artifact format written by [`FittedPipeline::save`]
pub const FORMAT_VERSION: u32 = 1;

/// What happened during the one-time fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub output_columns: usize,
    /// Seconds spent in fit
    pub fit_time: f64,
}

/// A pipeline checked against the declared schema, not yet fitted.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    pipeline: Pipeline,
    target: String,
    output_columns: Vec<String>,
}

impl FeaturePipeline {
    /// Validate `pipeline` against `schema`. Fails on any stage reading an
    /// undeclared field, duplicate union outputs, or filters inside a union.
    pub fn new(pipeline: Pipeline, schema: &Schema, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        let output_columns = pipeline.validate(schema)?;
        if !output_columns.contains(&target) {
            return Err(FeatureError::ConfigError(format!(
                "target `{target}` is not among the pipeline outputs"
            )));
        }
        Ok(Self {
            pipeline,
            target,
            output_columns,
        })
    }

    /// The standard clinical-trial pipeline for `config`.
    pub fn standard(config: &PipelineConfig, schema: &Schema) -> Result<Self> {
        config.validate()?;
        Self::new(standard_pipeline(config), schema, config.target.clone())
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Output columns predicted from the schema; vocabulary columns appear
    /// only after fit.
    pub fn declared_columns(&self) -> &[String] {
        &self.output_columns
    }

    pub fn required_inputs(&self) -> Vec<String> {
        self.pipeline.required_inputs()
    }

    /// Fit on the training batch. Returns the fitted pipeline and the
    /// training-path output, filters applied.
    pub fn fit(mut self, df: &DataFrame, ctx: &Context) -> Result<(FittedPipeline, DataFrame)> {
        let start = Instant::now();
        let output = self.pipeline.fit_transform(df, ctx)?;

        let summary = FitSummary {
            rows_in: df.height(),
            rows_out: output.height(),
            output_columns: output.width(),
            fit_time: start.elapsed().as_secs_f64(),
        };
        info!(
            rows_in = summary.rows_in,
            rows_out = summary.rows_out,
            columns = summary.output_columns,
            seconds = summary.fit_time,
            "Pipeline fitted"
        );

        let fitted = FittedPipeline {
            format_version: FORMAT_VERSION,
            required_inputs: self.pipeline.required_inputs(),
            output_columns: output.column_names(),
            target: self.target,
            pipeline: self.pipeline,
            summary,
        };
        Ok((fitted, output))
    }
}

/// Fitted pipeline. Immutable: it only transforms, so it can be shared
/// across request threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    format_version: u32,
    pipeline: Pipeline,
    target: String,
    required_inputs: Vec<String>,
    output_columns: Vec<String>,
    summary: FitSummary,
}

impl FittedPipeline {
    /// Transform with row filters skipped; the output has one row per input row.
    pub fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        let output = self.pipeline.transform(df, ctx, Mode::Inference)?;
        debug!(rows = output.height(), "Frame transformed");
        Ok(output)
    }

    /// Transform and convert to a numeric matrix with the target split off.
    pub fn transform_matrix(&self, df: &DataFrame, ctx: &Context) -> Result<FeatureMatrix> {
        FeatureMatrix::from_dataframe(&self.transform(df, ctx)?, Some(&self.target))
    }

    /// Transform a single record into a feature vector.
    pub fn transform_record(&self, record: &Record, ctx: &Context) -> Result<FeatureVector> {
        let df = frame_from_rows([record], ctx.schema())?;
        self.transform_matrix(&df, ctx)?
            .row(0)
            .ok_or_else(|| FeatureError::DataError("transform produced no rows".to_string()))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Raw fields the pipeline reads
    pub fn required_inputs(&self) -> &[String] {
        &self.required_inputs
    }

    /// Column names of a transformed frame, target included
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Feature column names, target excluded
    pub fn feature_columns(&self) -> Vec<String> {
        self.output_columns
            .iter()
            .filter(|c| **c != self.target)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> &FitSummary {
        &self.summary
    }

    /// Write the artifact through a temporary sibling file renamed into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), "Pipeline saved");
        Ok(())
    }

    /// Load an artifact. Returns a usable pipeline or an error, never a
    /// partially fitted one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let fitted: Self = serde_json::from_str(&json)?;

        if fitted.format_version != FORMAT_VERSION {
            return Err(FeatureError::SerializationError(format!(
                "artifact format {} is not supported (expected {FORMAT_VERSION})",
                fitted.format_version
            )));
        }
        if !fitted.pipeline.is_fitted() {
            return Err(FeatureError::NotFitted(path.display().to_string()));
        }
        info!(path = %path.display(), columns = fitted.output_columns.len(), "Pipeline loaded");
        Ok(fitted)
    }
}
