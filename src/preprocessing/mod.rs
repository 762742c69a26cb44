//! Feature preprocessing module
//!
//! Provides the two-phase stage contract and the stages built on it:
//! - Column selection and exclusion
//! - Missing value imputation (most frequent, constant, mean, median, KNN)
//! - Categorical encoding (single, multi-valued and top-K one-hot)
//! - Field derivations (condition split, ages, start date, counters, MeSH ids)
//! - Phase-stratified outlier and start-year filtering
//! - Feature subset selection and scaling (standard, min-max, row normalization)
//! - Pipeline and union composition, persistence of fitted state

mod compose;
mod config;
mod encoder;
mod imputer;
mod pipeline;
mod scaler;
mod select;
mod stage;
pub mod outlier;
pub mod transforms;

pub use compose::{Mode, Pipeline, Step, Union};
pub use config::{
    standard_pipeline, KeywordGroup, LocationConfig, PipelineConfig, TextCleaning, TopKGroup,
};
pub use encoder::{MultiOneHotEncoder, SingleOneHotEncoder, TopKOneHotEncoder, TopKStrategy};
pub use imputer::{
    CategoricalImputer, CategoricalStrategy, NumericImputer, NumericStrategy, DEFAULT_CATEGORY,
    IMPUTED_PREFIX,
};
pub use outlier::{OutlierBounds, OutlierMethod, PhaseBucket, PhaseOutlierFilter, StartYearFilter};
pub use pipeline::{FeaturePipeline, FitSummary, FittedPipeline, FORMAT_VERSION};
pub use scaler::{Scaler, ScalerKind, ScalerParams};
pub use select::{Excluder, Selector};
pub use stage::{AnyStage, Context, Stage};
pub use transforms::{
    parse_age_years, parse_start_date, AgeConverter, ConditionSplitter, DistinctCounter,
    MeshIdExtractor, PatientDistribution, StartDateExtractor, NO_SECOND_CONDITION, YEARS_PREFIX,
};

pub(crate) use stage::extend_names;
