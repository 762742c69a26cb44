//! Sequential pipelines and feature unions

use crate::error::{FeatureError, Result};
use crate::record::{FrameExt, Schema};
use polars::prelude::{Column, DataFrame};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info_span};

use super::stage::{AnyStage, Context, Stage};

/// Whether row-altering stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fit-time path: filters apply
    Training,
    /// Request-time path: filters are skipped so row count is preserved
    Inference,
}

/// One element of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Stage(AnyStage),
    Union(Union),
    Pipeline(Pipeline),
}

impl Step {
    fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()> {
        match self {
            Step::Stage(stage) => stage.fit(df, ctx),
            Step::Union(union) => union.fit(df, ctx),
            Step::Pipeline(pipeline) => pipeline.fit(df, ctx),
        }
    }

    fn transform(&self, df: &DataFrame, ctx: &Context, mode: Mode) -> Result<DataFrame> {
        match self {
            Step::Stage(stage) if stage.alters_rows() && mode == Mode::Inference => Ok(df.clone()),
            Step::Stage(stage) => stage.transform(df, ctx),
            Step::Union(union) => union.transform(df, ctx, mode),
            Step::Pipeline(pipeline) => pipeline.transform(df, ctx, mode),
        }
    }

    fn fit_transform(&mut self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        match self {
            Step::Pipeline(pipeline) => pipeline.fit_transform(df, ctx),
            other => {
                other.fit(df, ctx)?;
                other.transform(df, ctx, Mode::Training)
            }
        }
    }

    fn required_inputs(&self) -> Vec<String> {
        match self {
            Step::Stage(stage) => stage.input_columns(),
            Step::Union(union) => union.required_inputs(),
            Step::Pipeline(pipeline) => pipeline.required_inputs(),
        }
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        match self {
            Step::Stage(stage) => stage.output_columns(input),
            Step::Union(union) => union.output_columns(input),
            Step::Pipeline(pipeline) => pipeline.output_columns(input),
        }
    }

    fn is_fitted(&self) -> bool {
        match self {
            Step::Stage(stage) => stage.is_fitted(),
            Step::Union(union) => union.is_fitted(),
            Step::Pipeline(pipeline) => pipeline.is_fitted(),
        }
    }

    fn alters_rows(&self) -> bool {
        match self {
            Step::Stage(stage) => stage.alters_rows(),
            Step::Union(_) => false,
            Step::Pipeline(pipeline) => pipeline.alters_rows(),
        }
    }

    /// Check every read column is available; returns the step's outputs.
    fn check_columns(&self, name: &str, available: &[String]) -> Result<Vec<String>> {
        match self {
            Step::Stage(stage) => {
                for field in stage.input_columns() {
                    if !available.contains(&field) {
                        return Err(FeatureError::UnknownField {
                            stage: name.to_string(),
                            field,
                        });
                    }
                }
                Ok(stage.output_columns(available))
            }
            Step::Union(union) => union.check_columns(available),
            Step::Pipeline(pipeline) => pipeline.check_columns(available),
        }
    }
}

impl From<AnyStage> for Step {
    fn from(stage: AnyStage) -> Self {
        Step::Stage(stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamedStep {
    name: String,
    step: Step,
}

/// Ordered stages; each sees the cumulative output of its predecessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    steps: Vec<NamedStep>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named stage.
    pub fn stage(mut self, name: impl Into<String>, stage: impl Into<AnyStage>) -> Self {
        self.steps.push(NamedStep {
            name: name.into(),
            step: Step::Stage(stage.into()),
        });
        self
    }

    /// Append a named union.
    pub fn union(mut self, name: impl Into<String>, union: Union) -> Self {
        self.steps.push(NamedStep {
            name: name.into(),
            step: Step::Union(union),
        });
        self
    }

    /// Append a nested pipeline.
    pub fn pipeline(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.steps.push(NamedStep {
            name: name.into(),
            step: Step::Pipeline(pipeline),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Fit each step on the output of the fitted steps before it.
    pub fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()> {
        let mut current = df.clone();
        let last = self.steps.len().saturating_sub(1);
        for (i, named) in self.steps.iter_mut().enumerate() {
            let _span = info_span!("fit", step = %named.name).entered();
            if i == last {
                named.step.fit(&current, ctx)?;
            } else {
                current = named.step.fit_transform(&current, ctx)?;
            }
        }
        Ok(())
    }

    /// Fit every step and return the training-path output.
    pub fn fit_transform(&mut self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        let mut current = df.clone();
        for named in &mut self.steps {
            let _span = info_span!("fit", step = %named.name).entered();
            current = named.step.fit_transform(&current, ctx)?;
            debug!(rows = current.height(), columns = current.width(), "Step fitted");
        }
        Ok(current)
    }

    pub fn transform(&self, df: &DataFrame, ctx: &Context, mode: Mode) -> Result<DataFrame> {
        let mut current = df.clone();
        for named in &self.steps {
            if !named.step.is_fitted() {
                return Err(FeatureError::NotFitted(named.name.clone()));
            }
            current = named.step.transform(&current, ctx, mode)?;
        }
        Ok(current)
    }

    pub fn is_fitted(&self) -> bool {
        self.steps.iter().all(|s| s.step.is_fitted())
    }

    pub fn alters_rows(&self) -> bool {
        self.steps.iter().any(|s| s.step.alters_rows())
    }

    /// Columns the pipeline reads from its input.
    pub fn required_inputs(&self) -> Vec<String> {
        let mut needed: Vec<String> = Vec::new();
        let mut available: Vec<String> = Vec::new();
        for named in &self.steps {
            for field in named.step.required_inputs() {
                if !available.contains(&field) {
                    available.push(field.clone());
                    needed.push(field);
                }
            }
            available = named.step.output_columns(&available);
        }
        needed
    }

    /// Output columns for the given input columns.
    pub fn output_columns(&self, input: &[String]) -> Vec<String> {
        self.steps
            .iter()
            .fold(input.to_vec(), |columns, named| named.step.output_columns(&columns))
    }

    /// Walk the steps from `available`, failing on the first column read
    /// before it exists.
    pub fn check_columns(&self, available: &[String]) -> Result<Vec<String>> {
        let mut current = available.to_vec();
        for named in &self.steps {
            current = named.step.check_columns(&named.name, &current)?;
        }
        Ok(current)
    }

    /// Check the pipeline against the declared fields; returns the output
    /// columns it will produce.
    pub fn validate(&self, schema: &Schema) -> Result<Vec<String>> {
        let outputs = self.check_columns(&schema.names())?;
        debug!(steps = self.steps.len(), outputs = outputs.len(), "pipeline validated");
        Ok(outputs)
    }
}

/// Named branches run on the same input, joined side by side on row position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Union {
    branches: Vec<(String, Pipeline)>,
    passthrough: Vec<String>,
}

impl Union {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.branches.push((name.into(), pipeline));
        self
    }

    /// Input columns copied to the output untouched.
    pub fn passthrough<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.passthrough = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn fit(&mut self, df: &DataFrame, ctx: &Context) -> Result<()> {
        for (name, branch) in &mut self.branches {
            if branch.alters_rows() {
                return Err(FeatureError::RowAlteringInUnion(name.clone()));
            }
            let _span = info_span!("branch", branch = %name).entered();
            branch.fit(df, ctx)?;
        }
        Ok(())
    }

    pub fn transform(&self, df: &DataFrame, ctx: &Context, mode: Mode) -> Result<DataFrame> {
        let input_columns = df.column_names();
        let mut columns: Vec<Column> = Vec::new();

        for (name, branch) in &self.branches {
            let output = branch.transform(df, ctx, mode)?;
            if output.width() > 0 && output.height() != df.height() {
                return Err(FeatureError::RowCountMismatch {
                    branch: name.clone(),
                    expected: df.height(),
                    actual: output.height(),
                });
            }
            if output.column_names() != branch.output_columns(&input_columns) {
                return Err(FeatureError::UndeclaredOutput {
                    branch: name.clone(),
                });
            }
            columns.extend(output.take_columns());
        }
        if !self.passthrough.is_empty() {
            columns.extend(df.select(self.passthrough.iter().map(String::as_str))?.take_columns());
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name().clone()) {
                return Err(FeatureError::DuplicateColumn(column.name().to_string()));
            }
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn is_fitted(&self) -> bool {
        self.branches.iter().all(|(_, b)| b.is_fitted())
    }

    pub fn required_inputs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.branches
            .iter()
            .flat_map(|(_, b)| b.required_inputs())
            .chain(self.passthrough.iter().cloned())
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }

    pub fn output_columns(&self, input: &[String]) -> Vec<String> {
        self.branches
            .iter()
            .flat_map(|(_, b)| b.output_columns(input))
            .chain(self.passthrough.iter().cloned())
            .collect()
    }

    fn check_columns(&self, available: &[String]) -> Result<Vec<String>> {
        let mut outputs = Vec::new();
        let mut seen = HashSet::new();
        for (name, branch) in &self.branches {
            if branch.alters_rows() {
                return Err(FeatureError::RowAlteringInUnion(name.clone()));
            }
            outputs.extend(branch.check_columns(available)?);
        }
        for column in &self.passthrough {
            if !available.contains(column) {
                return Err(FeatureError::UnknownField {
                    stage: "passthrough".to_string(),
                    field: column.clone(),
                });
            }
            outputs.push(column.clone());
        }
        for column in &outputs {
            if !seen.insert(column.as_str()) {
                return Err(FeatureError::DuplicateColumn(column.clone()));
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::{
        CategoricalImputer, CategoricalStrategy, Excluder, MultiOneHotEncoder, PhaseOutlierFilter,
        Selector, SingleOneHotEncoder, StartYearFilter,
    };
    use crate::preprocessing::stage::testing::ScriptedStage;
    use crate::record::{float_column, text_column, text_list_column};

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            text_column(
                "OrgClass",
                vec![Some("INDUSTRY".into()), Some("OTHER".into()), None],
            ),
            text_list_column(
                "Phase",
                &[vec!["Phase 2"], vec!["Phase 1", "Phase 2"], vec!["Phase 3"]],
            ),
            float_column("EnrollmentCount", vec![Some(10.0), Some(20.0), Some(30.0)]),
        ])
        .unwrap()
    }

    fn union() -> Union {
        Union::new()
            .branch(
                "org",
                Pipeline::new()
                    .stage("select", Selector::new(["OrgClass"]))
                    .stage("impute", CategoricalImputer::new(CategoricalStrategy::MostFrequent, ["OrgClass"]))
                    .stage("encode", SingleOneHotEncoder::new(["OrgClass"]))
                    .stage("exclude", Excluder::new(["OrgClass"])),
            )
            .branch(
                "phase",
                Pipeline::new()
                    .stage("select", Selector::new(["Phase"]))
                    .stage("encode", MultiOneHotEncoder::new(["Phase"]))
                    .stage("exclude", Excluder::new(["Phase"])),
            )
            .passthrough(["EnrollmentCount"])
    }

    #[test]
    fn test_union_joins_branches() {
        let mut union = union();
        union.fit(&frame(), &Context::default()).unwrap();
        let out = union.transform(&frame(), &Context::default(), Mode::Training).unwrap();

        assert_eq!(
            out.column_names(),
            vec![
                "OrgClass=INDUSTRY",
                "OrgClass=OTHER",
                "Phase=Phase 1",
                "Phase=Phase 2",
                "Phase=Phase 3",
                "EnrollmentCount"
            ]
        );
        assert_eq!(out.height(), 3);
        assert_eq!(union.output_columns(&frame().column_names()), out.column_names());
    }

    #[test]
    fn test_required_inputs() {
        let pipeline = Pipeline::new().union("features", union());
        assert_eq!(
            pipeline.required_inputs(),
            vec!["OrgClass", "Phase", "EnrollmentCount"]
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let pipeline = Pipeline::new().stage("select", Selector::new(["Nope"]));
        let err = pipeline.check_columns(&frame().column_names()).unwrap_err();
        assert!(matches!(err, FeatureError::UnknownField { stage, field } if stage == "select" && field == "Nope"));
    }

    #[test]
    fn test_duplicate_union_output_rejected() {
        let union = Union::new()
            .branch("a", Pipeline::new().stage("select", Selector::new(["OrgClass"])))
            .branch("b", Pipeline::new().stage("select", Selector::new(["OrgClass"])));
        let err = union.check_columns(&frame().column_names()).unwrap_err();
        assert!(matches!(err, FeatureError::DuplicateColumn(_)));
    }

    #[test]
    fn test_row_altering_branch_rejected() {
        let mut union = Union::new().branch(
            "filter",
            Pipeline::new().stage("years", StartYearFilter::default()),
        );
        let err = union.fit(&frame(), &Context::default()).unwrap_err();
        assert!(matches!(err, FeatureError::RowAlteringInUnion(name) if name == "filter"));
    }

    #[test]
    fn test_transform_before_fit() {
        let pipeline = Pipeline::new().union("features", union());
        let err = pipeline
            .transform(&frame(), &Context::default(), Mode::Inference)
            .unwrap_err();
        assert!(matches!(err, FeatureError::NotFitted(name) if name == "features"));
    }

    #[test]
    fn test_inference_skips_filters() {
        let mut pipeline = Pipeline::new()
            .union("features", union())
            .stage(
                "outliers",
                PhaseOutlierFilter::new("EnrollmentCount", Default::default()),
            );
        let training = pipeline.fit_transform(&frame(), &Context::default()).unwrap();
        let inference = pipeline
            .transform(&frame(), &Context::default(), Mode::Inference)
            .unwrap();
        assert!(training.height() <= 3);
        assert_eq!(inference.height(), 3);
    }

    #[test]
    fn test_branch_dropping_rows_rejected() {
        let scripted = ScriptedStage {
            keep_rows: Some(2),
            ..Default::default()
        };
        let mut union = Union::new()
            .branch("org", Pipeline::new().stage("select", Selector::new(["OrgClass"])))
            .branch(
                "shrinking",
                Pipeline::new()
                    .stage("select", Selector::new(["EnrollmentCount"]))
                    .stage("scripted", scripted),
            );
        union.fit(&frame(), &Context::default()).unwrap();

        let err = union
            .transform(&frame(), &Context::default(), Mode::Training)
            .unwrap_err();
        assert!(matches!(
            err,
            FeatureError::RowCountMismatch { branch, expected: 3, actual: 2 } if branch == "shrinking"
        ));
    }

    #[test]
    fn test_branch_with_undeclared_column_rejected() {
        let scripted = ScriptedStage {
            extra_column: Some("surprise".into()),
            ..Default::default()
        };
        let mut union = Union::new().branch(
            "leaky",
            Pipeline::new()
                .stage("select", Selector::new(["OrgClass"]))
                .stage("scripted", scripted),
        );
        union.fit(&frame(), &Context::default()).unwrap();
        assert_eq!(union.output_columns(&frame().column_names()), vec!["OrgClass"]);

        let err = union
            .transform(&frame(), &Context::default(), Mode::Inference)
            .unwrap_err();
        assert!(matches!(err, FeatureError::UndeclaredOutput { branch } if branch == "leaky"));
    }
}
