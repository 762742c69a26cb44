//! Two-phase stage contract and the serializable stage wrapper

use crate::enrichment::{
    FacilityRankEnrichment, LocationEnrichment, ReferenceTables, RegionalAgeEnrichment,
};
use crate::error::Result;
use crate::feature_engineering::KeywordExtractor;
use crate::record::Schema;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::encoder::{MultiOneHotEncoder, SingleOneHotEncoder, TopKOneHotEncoder};
use super::imputer::{CategoricalImputer, NumericImputer};
use super::outlier::{PhaseOutlierFilter, StartYearFilter};
use super::scaler::Scaler;
use super::select::{Excluder, Selector};
use super::transforms::{
    AgeConverter, ConditionSplitter, DistinctCounter, MeshIdExtractor, PatientDistribution,
    StartDateExtractor,
};

/// Read-only run context: reference tables and the declared schema.
///
/// Shared by every fit and transform call; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Context {
    references: Arc<ReferenceTables>,
    schema: Arc<Schema>,
}

impl Context {
    pub fn new(references: ReferenceTables, schema: Schema) -> Self {
        Self {
            references: Arc::new(references),
            schema: Arc::new(schema),
        }
    }

    pub fn references(&self) -> &ReferenceTables {
        &self.references
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// A fit/transform transformation unit.
///
/// `fit` learns state from a batch and must give the same state when called
/// twice on the same batch. `transform` is a pure function of its input rows
/// and the learned state.
pub trait Stage {
    /// Short stage type name used in logs and errors
    fn kind(&self) -> &'static str;

    /// Columns the stage reads
    fn input_columns(&self) -> Vec<String>;

    /// Columns the stage emits, given the columns it receives
    fn output_columns(&self, input: &[String]) -> Vec<String>;

    /// Learn state from a batch
    fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()>;

    /// Apply learned state
    fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame>;

    fn is_fitted(&self) -> bool {
        true
    }

    /// Whether `transform` may drop rows
    fn alters_rows(&self) -> bool {
        false
    }

    fn fit_transform(&mut self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        self.fit(df, ctx)?;
        self.transform(df, ctx)
    }
}

/// `input` followed by `added`.
pub(crate) fn extend_names(input: &[String], added: impl IntoIterator<Item = String>) -> Vec<String> {
    input.iter().cloned().chain(added).collect()
}

/// Every stage type, in a form that serializes with its learned state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnyStage {
    Select(Selector),
    Exclude(Excluder),
    CategoricalImpute(CategoricalImputer),
    NumericImpute(NumericImputer),
    SingleOneHot(SingleOneHotEncoder),
    MultiOneHot(MultiOneHotEncoder),
    TopKOneHot(TopKOneHotEncoder),
    Keywords(KeywordExtractor),
    ConditionSplit(ConditionSplitter),
    Age(AgeConverter),
    StartDate(StartDateExtractor),
    Count(DistinctCounter),
    MeshId(MeshIdExtractor),
    PatientDistribution(PatientDistribution),
    Location(LocationEnrichment),
    RegionalAge(RegionalAgeEnrichment),
    FacilityRank(FacilityRankEnrichment),
    PhaseOutlier(PhaseOutlierFilter),
    StartYear(StartYearFilter),
    Scale(Scaler),
    #[cfg(test)]
    Scripted(testing::ScriptedStage),
}

macro_rules! each_stage {
    ($value:expr, $stage:ident => $body:expr) => {
        match $value {
            AnyStage::Select($stage) => $body,
            AnyStage::Exclude($stage) => $body,
            AnyStage::CategoricalImpute($stage) => $body,
            AnyStage::NumericImpute($stage) => $body,
            AnyStage::SingleOneHot($stage) => $body,
            AnyStage::MultiOneHot($stage) => $body,
            AnyStage::TopKOneHot($stage) => $body,
            AnyStage::Keywords($stage) => $body,
            AnyStage::ConditionSplit($stage) => $body,
            AnyStage::Age($stage) => $body,
            AnyStage::StartDate($stage) => $body,
            AnyStage::Count($stage) => $body,
            AnyStage::MeshId($stage) => $body,
            AnyStage::PatientDistribution($stage) => $body,
            AnyStage::Location($stage) => $body,
            AnyStage::RegionalAge($stage) => $body,
            AnyStage::FacilityRank($stage) => $body,
            AnyStage::PhaseOutlier($stage) => $body,
            AnyStage::StartYear($stage) => $body,
            AnyStage::Scale($stage) => $body,
            #[cfg(test)]
            AnyStage::Scripted($stage) => $body,
        }
    };
}

impl Stage for AnyStage {
    fn kind(&self) -> &'static str {
        each_stage!(self, s => s.kind())
    }

    fn input_columns(&self) -> Vec<String> {
        each_stage!(self, s => s.input_columns())
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        each_stage!(self, s => s.output_columns(input))
    }

    fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()> {
        each_stage!(self, s => s.fit(df, ctx))
    }

    fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        each_stage!(self, s => s.transform(df, ctx))
    }

    fn is_fitted(&self) -> bool {
        each_stage!(self, s => s.is_fitted())
    }

    fn alters_rows(&self) -> bool {
        each_stage!(self, s => s.alters_rows())
    }
}

macro_rules! impl_from_stage {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AnyStage {
                fn from(stage: $ty) -> Self {
                    AnyStage::$variant(stage)
                }
            }
        )*
    };
}

impl_from_stage! {
    Select => Selector,
    Exclude => Excluder,
    CategoricalImpute => CategoricalImputer,
    NumericImpute => NumericImputer,
    SingleOneHot => SingleOneHotEncoder,
    MultiOneHot => MultiOneHotEncoder,
    TopKOneHot => TopKOneHotEncoder,
    Keywords => KeywordExtractor,
    ConditionSplit => ConditionSplitter,
    Age => AgeConverter,
    StartDate => StartDateExtractor,
    Count => DistinctCounter,
    MeshId => MeshIdExtractor,
    PatientDistribution => PatientDistribution,
    Location => LocationEnrichment,
    RegionalAge => RegionalAgeEnrichment,
    FacilityRank => FacilityRankEnrichment,
    PhaseOutlier => PhaseOutlierFilter,
    StartYear => StartYearFilter,
    Scale => Scaler,
}

#[cfg(test)]
impl_from_stage! {
    Scripted => testing::ScriptedStage,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::record::{indicator_column, FrameExt};

    /// Stage whose behavior is set by the test: it may keep only the first
    /// rows, or emit a column its declared outputs leave out.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ScriptedStage {
        pub keep_rows: Option<usize>,
        pub extra_column: Option<String>,
    }

    impl Stage for ScriptedStage {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn input_columns(&self) -> Vec<String> {
            Vec::new()
        }

        fn output_columns(&self, input: &[String]) -> Vec<String> {
            input.to_vec()
        }

        fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
            Ok(())
        }

        fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
            let mut out = df.clone();
            if let Some(keep) = self.keep_rows {
                let flags: Vec<bool> = (0..df.height()).map(|i| i < keep).collect();
                out = out.filter_rows(&flags)?;
            }
            if let Some(name) = &self.extra_column {
                out = out.append_columns(vec![indicator_column(name, vec![true; out.height()])])?;
            }
            Ok(out)
        }
    }
}
