//! Inference module
//!
//! Serves single-record feature requests from a fitted pipeline:
//! - Mandatory and consumed field checks before transform
//! - Shared, read-only pipeline state
//! - A predictor seam that reports model failures without failing the request

mod service;

pub use service::{FeatureService, Prediction, Predictor, ServiceStats};
