//! Polars frames built from raw records, and typed column views

use crate::error::{FeatureError, Result};
use super::value::format_number;
use super::{FieldKind, FieldSpec, Record, Schema, ValidationReport, Value};
use polars::prelude::*;
use std::collections::HashSet;
use tracing::{info, warn};

/// Build a training batch from raw records, excluding schema violations.
///
/// Every declared field becomes a column typed by its [`FieldKind`]:
/// scalar categoricals, dates and ages as `String`, numerics as `Float64`,
/// list and text fields as `List(String)` or `List(Float64)`.
pub fn frame_from_records(records: &[Record], schema: &Schema) -> Result<(DataFrame, ValidationReport)> {
    let mut report = ValidationReport::default();
    let accepted: Vec<&Record> = records
        .iter()
        .filter(|record| match schema.validate(record) {
            Some(violation) => {
                *report.excluded.entry(violation).or_insert(0) += 1;
                false
            }
            None => true,
        })
        .collect();
    report.accepted = accepted.len();

    for (violation, count) in &report.excluded {
        warn!(%violation, count, "Excluded records");
    }
    info!(
        accepted = report.accepted,
        excluded = report.excluded_total(),
        "Records ingested"
    );

    Ok((frame_from_rows(accepted, schema)?, report))
}

/// Build a frame from rows without validation; absent fields read as null.
pub fn frame_from_rows<'a>(rows: impl IntoIterator<Item = &'a Record>, schema: &Schema) -> Result<DataFrame> {
    let rows: Vec<&Record> = rows.into_iter().collect();
    let columns = schema
        .fields()
        .iter()
        .map(|field| field_column(field, &rows))
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn field_column(field: &FieldSpec, rows: &[&Record]) -> Column {
    let name = field.name.as_str();
    let cells = rows
        .iter()
        .map(|row| row.get(name).unwrap_or(&Value::Null));
    match field.kind {
        FieldKind::Numeric => float_column(name, cells.map(Value::as_f64).collect()),
        FieldKind::Categorical | FieldKind::Date | FieldKind::Age => {
            text_column(name, cells.map(Value::as_text).collect())
        }
        FieldKind::CategoricalList | FieldKind::Text => list_column(
            name,
            cells
                .map(|cell| Series::new(PlSmallStr::EMPTY, cell.text_elements()))
                .collect(),
            DataType::String,
        ),
        FieldKind::NumericList => list_column(
            name,
            cells
                .map(|cell| Series::new(PlSmallStr::EMPTY, cell.numbers()))
                .collect(),
            DataType::Float64,
        ),
    }
}

/// `Float64` column; `None` is stored as null.
pub fn float_column(name: &str, values: Vec<Option<f64>>) -> Column {
    Series::new(name.into(), values).into()
}

/// 0/1 `Float64` indicator column.
pub fn indicator_column(name: &str, flags: impl IntoIterator<Item = bool>) -> Column {
    let values: Vec<f64> = flags
        .into_iter()
        .map(|flag| if flag { 1.0 } else { 0.0 })
        .collect();
    Series::new(name.into(), values).into()
}

pub fn text_column(name: &str, values: Vec<Option<String>>) -> Column {
    Series::new(name.into(), values).into()
}

/// `List(String)` column, one list per row.
pub fn text_list_column<S: AsRef<str>>(name: &str, rows: &[Vec<S>]) -> Column {
    let cells = rows
        .iter()
        .map(|row| {
            let items: Vec<&str> = row.iter().map(AsRef::as_ref).collect();
            Series::new(PlSmallStr::EMPTY, items)
        })
        .collect();
    list_column(name, cells, DataType::String)
}

/// `List(Float64)` column, one list per row.
pub fn float_list_column(name: &str, rows: &[Vec<Option<f64>>]) -> Column {
    let cells = rows
        .iter()
        .map(|row| Series::new(PlSmallStr::EMPTY, row.as_slice()))
        .collect();
    list_column(name, cells, DataType::Float64)
}

fn list_column(name: &str, cells: Vec<Series>, inner: DataType) -> Column {
    if cells.is_empty() {
        Series::new_empty(name.into(), &DataType::List(Box::new(inner))).into()
    } else {
        Series::new(name.into(), cells).into()
    }
}

/// Text view of every element of a flat series. Blank text reads as `None`.
fn element_texts(series: &Series) -> Result<Vec<Option<String>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.filter(|s| !s.trim().is_empty()).map(str::to_string))
            .collect()),
        DataType::Boolean => Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| b.to_string()))
            .collect()),
        DataType::Null => Ok(vec![None; series.len()]),
        DataType::List(_) => Err(FeatureError::DataError(format!(
            "nested list in column `{}`",
            series.name()
        ))),
        _ => Ok(series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|n| !n.is_nan()).map(format_number))
            .collect()),
    }
}

/// Numeric view of every element of a flat series. Numeric text is parsed;
/// NaN reads as `None`.
fn element_numbers(series: &Series) -> Result<Vec<Option<f64>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect()),
        DataType::Boolean => Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| if b { 1.0 } else { 0.0 }))
            .collect()),
        DataType::Null => Ok(vec![None; series.len()]),
        DataType::List(_) => Err(FeatureError::NonNumericColumn(series.name().to_string())),
        _ => Ok(series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|n| !n.is_nan()))
            .collect()),
    }
}

/// Typed reads of the columns stages consume.
///
/// Scalar views treat a one-element list as its element; list views treat
/// a present scalar as a one-element list.
pub trait FrameExt {
    fn series(&self, name: &str) -> Result<&Series>;

    /// Column names, in order
    fn column_names(&self) -> Vec<String>;

    fn has_column(&self, name: &str) -> bool;

    fn text_values(&self, name: &str) -> Result<Vec<Option<String>>>;

    fn float_values(&self, name: &str) -> Result<Vec<Option<f64>>>;

    /// Present elements of each row, as text
    fn text_lists(&self, name: &str) -> Result<Vec<Vec<String>>>;

    /// Elements of each row as numbers, positions kept
    fn float_lists(&self, name: &str) -> Result<Vec<Vec<Option<f64>>>>;

    /// Element count of each row, missing elements included
    fn list_lengths(&self, name: &str) -> Result<Vec<usize>>;

    /// Append new columns, rejecting names already present.
    fn append_columns(&self, columns: Vec<Column>) -> Result<DataFrame>;

    /// Keep the rows whose flag is set.
    fn filter_rows(&self, keep: &[bool]) -> Result<DataFrame>;
}

impl FrameExt for DataFrame {
    fn series(&self, name: &str) -> Result<&Series> {
        self.column(name)
            .map(Column::as_materialized_series)
            .map_err(|_| FeatureError::FeatureNotFound(name.to_string()))
    }

    fn column_names(&self) -> Vec<String> {
        self.get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn has_column(&self, name: &str) -> bool {
        self.column(name).is_ok()
    }

    fn text_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::List(_)) {
            return element_texts(series);
        }
        series
            .list()?
            .into_iter()
            .map(|cell| match cell {
                Some(items) if items.len() == 1 => Ok(element_texts(&items)?.pop().flatten()),
                _ => Ok(None),
            })
            .collect()
    }

    fn float_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::List(_)) {
            return element_numbers(series);
        }
        series
            .list()?
            .into_iter()
            .map(|cell| match cell {
                Some(items) if items.len() == 1 => Ok(element_numbers(&items)?.pop().flatten()),
                _ => Ok(None),
            })
            .collect()
    }

    fn text_lists(&self, name: &str) -> Result<Vec<Vec<String>>> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::List(_)) {
            return Ok(element_texts(series)?
                .into_iter()
                .map(|v| v.into_iter().collect())
                .collect());
        }
        series
            .list()?
            .into_iter()
            .map(|cell| match cell {
                Some(items) => Ok(element_texts(&items)?.into_iter().flatten().collect()),
                None => Ok(Vec::new()),
            })
            .collect()
    }

    fn float_lists(&self, name: &str) -> Result<Vec<Vec<Option<f64>>>> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::List(_)) {
            return Ok(element_numbers(series)?
                .into_iter()
                .map(|v| v.map(|n| vec![Some(n)]).unwrap_or_default())
                .collect());
        }
        series
            .list()?
            .into_iter()
            .map(|cell| match cell {
                Some(items) => element_numbers(&items),
                None => Ok(Vec::new()),
            })
            .collect()
    }

    fn list_lengths(&self, name: &str) -> Result<Vec<usize>> {
        let series = self.series(name)?;
        if !matches!(series.dtype(), DataType::List(_)) {
            return Ok(element_texts(series)?
                .iter()
                .map(|v| usize::from(v.is_some()))
                .collect());
        }
        Ok(series
            .list()?
            .into_iter()
            .map(|cell| cell.map_or(0, |items| items.len()))
            .collect())
    }

    fn append_columns(&self, columns: Vec<Column>) -> Result<DataFrame> {
        let mut seen: HashSet<String> = self.column_names().into_iter().collect();
        for column in &columns {
            if !seen.insert(column.name().to_string()) {
                return Err(FeatureError::DuplicateColumn(column.name().to_string()));
            }
            if column.len() != self.height() && self.width() > 0 {
                return Err(FeatureError::ShapeError {
                    expected: format!("{} rows", self.height()),
                    actual: format!("{} rows in column `{}`", column.len(), column.name()),
                });
            }
        }
        Ok(self.hstack(&columns)?)
    }

    fn filter_rows(&self, keep: &[bool]) -> Result<DataFrame> {
        if keep.len() != self.height() {
            return Err(FeatureError::ShapeError {
                expected: format!("{} flags", self.height()),
                actual: format!("{} flags", keep.len()),
            });
        }
        let mask = BooleanChunked::from_slice("keep".into(), keep);
        Ok(self.filter(&mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldSpec::new("OrgClass", FieldKind::Categorical),
            FieldSpec::new("Phase", FieldKind::CategoricalList),
            FieldSpec::new("LocationPopulationDensity", FieldKind::NumericList),
            FieldSpec::new("EnrollmentCount", FieldKind::Numeric),
        ])
        .unwrap()
    }

    fn rows() -> Vec<Record> {
        vec![
            serde_json::from_value(json!({
                "OrgClass": ["NIH"],
                "Phase": ["Phase 1", null, "Phase 2"],
                "LocationPopulationDensity": [1.5, null],
                "EnrollmentCount": "12"
            }))
            .unwrap(),
            serde_json::from_value(json!({"OrgClass": " ", "Phase": "Phase 3"})).unwrap(),
        ]
    }

    #[test]
    fn test_field_kinds_become_typed_columns() {
        let df = frame_from_rows(&rows(), &schema()).unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.series("OrgClass").unwrap().dtype(), &DataType::String);
        assert_eq!(
            df.series("Phase").unwrap().dtype(),
            &DataType::List(Box::new(DataType::String))
        );
        assert_eq!(
            df.series("LocationPopulationDensity").unwrap().dtype(),
            &DataType::List(Box::new(DataType::Float64))
        );
        assert_eq!(df.series("EnrollmentCount").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_typed_views() {
        let df = frame_from_rows(&rows(), &schema()).unwrap();
        assert_eq!(df.text_values("OrgClass").unwrap(), vec![Some("NIH".to_string()), None]);
        assert_eq!(df.float_values("EnrollmentCount").unwrap(), vec![Some(12.0), None]);
        assert_eq!(
            df.text_lists("Phase").unwrap(),
            vec![vec!["Phase 1".to_string(), "Phase 2".to_string()], vec!["Phase 3".to_string()]]
        );
        assert_eq!(df.list_lengths("Phase").unwrap(), vec![3, 1]);
        assert_eq!(
            df.float_lists("LocationPopulationDensity").unwrap(),
            vec![vec![Some(1.5), None], vec![]]
        );
        assert!(matches!(df.text_values("Nope"), Err(FeatureError::FeatureNotFound(_))));
    }

    #[test]
    fn test_empty_batch_keeps_list_types() {
        let df = frame_from_rows(std::iter::empty::<&Record>(), &schema()).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(
            df.series("Phase").unwrap().dtype(),
            &DataType::List(Box::new(DataType::String))
        );
    }

    #[test]
    fn test_append_rejects_duplicate() {
        let df = frame_from_rows(&rows(), &schema()).unwrap();
        let err = df
            .append_columns(vec![float_column("EnrollmentCount", vec![None, None])])
            .unwrap_err();
        assert!(matches!(err, FeatureError::DuplicateColumn(name) if name == "EnrollmentCount"));

        let out = df
            .append_columns(vec![indicator_column("flag", [true, false])])
            .unwrap();
        assert_eq!(out.float_values("flag").unwrap(), vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_filter_rows() {
        let df = frame_from_rows(&rows(), &schema()).unwrap();
        let filtered = df.filter_rows(&[false, true]).unwrap();
        assert_eq!(filtered.height(), 1);
        assert_eq!(filtered.text_lists("Phase").unwrap(), vec![vec!["Phase 3".to_string()]]);
        assert!(df.filter_rows(&[true]).is_err());
    }
}
