//! Request-time feature service

use crate::error::{FeatureError, Result};
use crate::preprocessing::{Context, FittedPipeline};
use crate::record::{FeatureVector, Record};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Model seam: anything that maps a feature vector to a prediction.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<f64>;
}

impl<F> Predictor for F
where
    F: Fn(&FeatureVector) -> Result<f64> + Send + Sync,
{
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self(features)
    }
}

/// Outcome of a prediction request that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prediction {
    Value(f64),
    /// The model failed; the reason is reported to the caller.
    Unavailable(String),
}

impl Prediction {
    pub fn value(&self) -> Option<f64> {
        match self {
            Prediction::Value(v) => Some(*v),
            Prediction::Unavailable(_) => None,
        }
    }
}

/// Request counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub served: u64,
    pub rejected: u64,
    pub unavailable: u64,
    /// Mean transform latency in milliseconds
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    served: AtomicU64,
    rejected: AtomicU64,
    unavailable: AtomicU64,
    latency_us: AtomicU64,
}

/// Transforms prediction requests with a fitted pipeline.
///
/// Never fits: the pipeline state is shared read-only, so one service can
/// serve concurrent requests.
#[derive(Debug, Clone)]
pub struct FeatureService {
    pipeline: Arc<FittedPipeline>,
    ctx: Arc<Context>,
    counters: Arc<Counters>,
}

impl FeatureService {
    pub fn new(pipeline: FittedPipeline, ctx: Context) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            ctx: Arc::new(ctx),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn pipeline(&self) -> &FittedPipeline {
        &self.pipeline
    }

    /// Fields a request must carry: the schema's mandatory fields plus every
    /// raw field the pipeline reads, target excluded.
    pub fn expected_fields(&self) -> Vec<String> {
        let mut fields = self.ctx.schema().mandatory_fields();
        for name in self.pipeline.required_inputs() {
            if name != self.pipeline.target() && !fields.contains(name) {
                fields.push(name.clone());
            }
        }
        fields
    }

    /// Validate a request and transform it into a feature vector.
    ///
    /// Missing mandatory fields are rejected before any transform runs.
    pub fn features(&self, record: &Record) -> Result<FeatureVector> {
        if let Err(err) = self.check_request(record) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%err, "Request rejected");
            return Err(err);
        }

        let start = Instant::now();
        let features = self.pipeline.transform_record(record, &self.ctx)?;
        let elapsed = start.elapsed().as_micros() as u64;

        self.counters.served.fetch_add(1, Ordering::Relaxed);
        self.counters.latency_us.fetch_add(elapsed, Ordering::Relaxed);
        debug!(features = features.len(), elapsed_us = elapsed, "Request transformed");
        Ok(features)
    }

    /// Transform a request and hand it to `predictor`. Model failures become
    /// `Prediction::Unavailable`; request errors are returned as errors.
    pub fn predict(&self, record: &Record, predictor: &dyn Predictor) -> Result<Prediction> {
        let features = self.features(record)?;
        match predictor.predict(&features) {
            Ok(value) => Ok(Prediction::Value(value)),
            Err(err) => {
                self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "Prediction unavailable");
                Ok(Prediction::Unavailable(err.to_string()))
            }
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let served = self.counters.served.load(Ordering::Relaxed);
        let latency = self.counters.latency_us.load(Ordering::Relaxed);
        ServiceStats {
            served,
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
            avg_latency_ms: if served > 0 {
                latency as f64 / served as f64 / 1000.0
            } else {
                0.0
            },
        }
    }

    fn check_request(&self, record: &Record) -> Result<()> {
        self.ctx.schema().check_request(record)?;
        let missing: Vec<String> = self
            .pipeline
            .required_inputs()
            .iter()
            .filter(|name| *name != self.pipeline.target())
            .filter(|name| !record.contains_key(name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeatureError::MissingFields(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::{Excluder, FeaturePipeline, Pipeline, Selector, SingleOneHotEncoder, Union};
    use crate::record::{frame_from_rows, FieldKind, FieldSpec, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            FieldSpec::new("OrgClass", FieldKind::Categorical).mandatory(),
            FieldSpec::new("Gender", FieldKind::Categorical),
            FieldSpec::new("EnrollmentDuration", FieldKind::Numeric).required(),
        ])
        .unwrap()
    }

    fn record(org: &str, gender: &str, duration: Option<f64>) -> Record {
        let mut record = Record::new();
        record.insert("OrgClass".into(), Value::from(org));
        record.insert("Gender".into(), Value::from(gender));
        record.insert("EnrollmentDuration".into(), Value::number(duration));
        record
    }

    fn service() -> FeatureService {
        let encode = |field: &str| {
            Pipeline::new()
                .stage("select", Selector::new([field]))
                .stage("encode", SingleOneHotEncoder::new([field]))
                .stage("exclude", Excluder::new([field]))
        };
        let pipeline = Pipeline::new().union(
            "features",
            Union::new()
                .branch("org", encode("OrgClass"))
                .branch("gender", encode("Gender"))
                .passthrough(["EnrollmentDuration"]),
        );
        let ctx = Context::new(Default::default(), schema());
        let batch = frame_from_rows(
            &[record("NIH", "All", Some(10.0)), record("INDUSTRY", "Female", Some(20.0))],
            &schema(),
        )
        .unwrap();
        let (fitted, _) = FeaturePipeline::new(pipeline, &schema(), "EnrollmentDuration")
            .unwrap()
            .fit(&batch, &ctx)
            .unwrap();
        FeatureService::new(fitted, ctx)
    }

    #[test]
    fn test_missing_mandatory_field_rejected() {
        let service = service();
        let mut request = record("NIH", "All", None);
        request.remove("OrgClass");

        let err = service.features(&request).unwrap_err();
        assert!(matches!(err, FeatureError::MissingFields(ref f) if f == &vec!["OrgClass".to_string()]));
        assert!(err.is_client_error());
        assert_eq!(service.stats().rejected, 1);
    }

    #[test]
    fn test_missing_consumed_field_rejected() {
        let service = service();
        let mut request = record("NIH", "All", None);
        request.remove("Gender");
        assert!(matches!(service.features(&request), Err(FeatureError::MissingFields(_))));
    }

    #[test]
    fn test_target_not_expected() {
        let service = service();
        let mut request = record("NIH", "All", None);
        request.remove("EnrollmentDuration");
        assert!(service.features(&request).is_ok());
        assert!(!service.expected_fields().contains(&"EnrollmentDuration".to_string()));
    }

    #[test]
    fn test_predictor_failure_is_unavailable() {
        let service = service();
        let failing = |_: &FeatureVector| -> Result<f64> {
            Err(FeatureError::DataError("model offline".into()))
        };
        let prediction = service.predict(&record("NIH", "All", None), &failing).unwrap();
        assert!(matches!(prediction, Prediction::Unavailable(ref r) if r.contains("model offline")));

        let constant = |features: &FeatureVector| -> Result<f64> {
            Ok(features.get("OrgClass=NIH").unwrap_or(0.0) * 5.0)
        };
        let prediction = service.predict(&record("NIH", "All", None), &constant).unwrap();
        assert_eq!(prediction.value(), Some(5.0));
        assert_eq!(service.stats().unavailable, 1);
    }
}
