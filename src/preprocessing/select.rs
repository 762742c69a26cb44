//! Column selection and exclusion

use crate::error::{FeatureError, Result};
use crate::record::FrameExt;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use super::stage::{Context, Stage};

/// Keep only the listed columns, in the listed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    columns: Vec<String>,
    /// Columns are checked against the data, not the schema
    #[serde(default)]
    on_fitted_columns: bool,
}

impl Selector {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            on_fitted_columns: false,
        }
    }

    /// Select columns that only exist once earlier stages are fitted, such
    /// as one-hot indicators. Validation skips them; a missing one fails
    /// at fit or transform.
    pub fn on_fitted_columns(mut self) -> Self {
        self.on_fitted_columns = true;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Stage for Selector {
    fn kind(&self) -> &'static str {
        "select"
    }

    fn input_columns(&self) -> Vec<String> {
        if self.on_fitted_columns {
            return Vec::new();
        }
        self.columns.clone()
    }

    fn output_columns(&self, _input: &[String]) -> Vec<String> {
        self.columns.clone()
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        if let Some(missing) = self.columns.iter().find(|name| !df.has_column(name)) {
            return Err(FeatureError::FeatureNotFound(missing.clone()));
        }
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if let Some(missing) = self.columns.iter().find(|name| !df.has_column(name)) {
            return Err(FeatureError::FeatureNotFound(missing.clone()));
        }
        Ok(df.select(self.columns.iter().map(String::as_str))?)
    }
}

/// Drop the listed columns. Absent columns are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excluder {
    columns: Vec<String>,
}

impl Excluder {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Stage for Excluder {
    fn kind(&self) -> &'static str {
        "exclude"
    }

    fn input_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input
            .iter()
            .filter(|name| !self.columns.contains(name))
            .cloned()
            .collect()
    }

    fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        Ok(df.drop_many(self.columns.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{NamedFrom, Series};

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("a".into(), &[1.0]).into(),
            Series::new("b".into(), &["x"]).into(),
            Series::new("c".into(), &[None::<f64>]).into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_selector_orders_columns() {
        let selector = Selector::new(["c", "a"]);
        let out = selector.transform(&frame(), &Context::default()).unwrap();
        assert_eq!(out.column_names(), vec!["c", "a"]);
        assert_eq!(selector.output_columns(&[]), vec!["c", "a"]);
    }

    #[test]
    fn test_selector_missing_column() {
        let selector = Selector::new(["zzz"]);
        let err = selector.transform(&frame(), &Context::default()).unwrap_err();
        assert!(matches!(err, FeatureError::FeatureNotFound(_)));
    }

    #[test]
    fn test_selector_on_fitted_columns() {
        let strict = Selector::new(["a", "OrgClass=NIH"]);
        assert_eq!(strict.input_columns(), vec!["a", "OrgClass=NIH"]);

        let mut deferred = Selector::new(["a", "OrgClass=NIH"]).on_fitted_columns();
        assert!(deferred.input_columns().is_empty());
        let err = deferred.fit(&frame(), &Context::default()).unwrap_err();
        assert!(matches!(err, FeatureError::FeatureNotFound(ref c) if c == "OrgClass=NIH"));
    }

    #[test]
    fn test_excluder() {
        let excluder = Excluder::new(["b", "nope"]);
        let out = excluder.transform(&frame(), &Context::default()).unwrap();
        assert_eq!(out.column_names(), vec!["a", "c"]);
        assert_eq!(
            excluder.output_columns(&frame().column_names()),
            vec!["a".to_string(), "c".to_string()]
        );
    }
}
