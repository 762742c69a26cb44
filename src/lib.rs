//! Trial Features - fit/transform feature pipeline for clinical trials
//!
//! Turns heterogeneous clinical-trial registry records into a fixed-width
//! numeric feature matrix for enrollment-duration regression.
//!
//! # Modules
//!
//! ## Core
//! - [`record`] - Record values, declared schema, polars frame ingestion, feature matrix
//! - [`preprocessing`] - Stage contract, stages, pipeline/union composition, persistence
//! - [`imputation`] - KNN imputation over numeric matrices
//! - [`feature_engineering`] - Text tokenization and keyword extraction
//! - [`enrichment`] - Country, regional-age and facility-rank enrichment
//!
//! ## Services
//! - [`inference`] - Request-time feature service and predictor seam
//! - [`cli`] - Command-line interface
//!
//! ## Utilities
//! - [`utils`] - Record and reference-table loading, statistics

// Core error handling
pub mod error;

// Core modules
pub mod record;
pub mod preprocessing;
pub mod imputation;
pub mod feature_engineering;
pub mod enrichment;

// Services
pub mod inference;
pub mod cli;

// Utilities
pub mod utils;

pub use error::{FeatureError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::enrichment::{
        AggregationStrategy, CountryTable, FacilityRankTable, FillPolicy, ReferenceTables,
        RegionalTable, Resolution,
    };
    pub use crate::error::{FeatureError, Result};
    pub use crate::inference::{FeatureService, Prediction, Predictor};
    pub use crate::preprocessing::{
        standard_pipeline, Context, FeaturePipeline, FittedPipeline, Mode, Pipeline,
        PipelineConfig, Stage, Union,
    };
    pub use crate::record::{
        frame_from_records, FeatureMatrix, FeatureVector, FieldKind, FieldSpec, FrameExt, Record,
        Schema, Value,
    };
    pub use crate::utils::DataLoader;
}
