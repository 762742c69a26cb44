//! Clinical-trial records and the tables built from them
//!
//! - [`Value`]: scalar or list-valued cell
//! - [`Schema`]: declared fields, validated before any stage runs
//! - [`frame_from_records`]: polars batch that stages consume and produce
//! - [`FeatureMatrix`]: final numeric table handed to a model

mod frame;
mod matrix;
mod schema;
mod value;

pub use frame::{
    float_column, float_list_column, frame_from_records, frame_from_rows, indicator_column,
    text_column, text_list_column, FrameExt,
};
pub use matrix::{FeatureMatrix, FeatureVector};
pub use schema::{
    FieldKind, FieldSpec, Schema, ValidationReport, Violation, PLACEHOLDER_ELIGIBILITY,
    PLACEHOLDER_FACILITY,
};
pub use value::Value;

use std::collections::BTreeMap;

/// A raw record as received from the document store or a request body
pub type Record = BTreeMap<String, Value>;
