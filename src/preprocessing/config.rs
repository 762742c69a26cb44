//! Feature pipeline configuration

use crate::enrichment::{
    AggregationStrategy, FacilityRankEnrichment, FillPolicy, LocationEnrichment,
    RegionalAgeEnrichment, DEFAULT_MAX_AGE, DEFAULT_MIN_AGE,
};
use crate::error::{FeatureError, Result};
use crate::feature_engineering::{KeywordExtractor, TextTokenizer};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::compose::{Pipeline, Union};
use super::encoder::{MultiOneHotEncoder, SingleOneHotEncoder, TopKOneHotEncoder, TopKStrategy};
use super::imputer::{CategoricalImputer, CategoricalStrategy, NumericImputer, NumericStrategy};
use super::outlier::{OutlierMethod, PhaseOutlierFilter, StartYearFilter};
use super::scaler::{Scaler, ScalerKind};
use super::select::{Excluder, Selector};
use super::stage::Stage;
use super::transforms::{
    AgeConverter, ConditionSplitter, DistinctCounter, MeshIdExtractor, PatientDistribution,
    StartDateExtractor,
};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// List fields encoded by document-frequency rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKGroup {
    pub fields: Vec<String>,
    pub strategy: TopKStrategy,
}

/// Text fields sharing a keyword budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub fields: Vec<String>,
    pub n_keywords: usize,
}

/// Token cleaning switches for keyword extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCleaning {
    pub lowercase: bool,
    pub strip_digits: bool,
    pub strip_punctuation: bool,
}

impl Default for TextCleaning {
    fn default() -> Self {
        Self {
            lowercase: true,
            strip_digits: true,
            strip_punctuation: true,
        }
    }
}

impl TextCleaning {
    pub fn tokenizer(&self) -> TextTokenizer {
        TextTokenizer::default()
            .with_lowercase(self.lowercase)
            .with_strip_digits(self.strip_digits)
            .with_strip_punctuation(self.strip_punctuation)
    }
}

/// Country and city enrichment options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub strategy: AggregationStrategy,
    pub fill: FillPolicy,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::Weighted,
            fill: FillPolicy::Worldwide,
        }
    }
}

/// Configuration of the clinical-trial feature pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Regression target, passed through unchanged
    pub target: String,

    /// List field split into first and second condition
    pub condition_field: String,

    /// Categories kept per split condition column
    pub condition_max_categories: usize,

    /// Scalar categorical fields, one-hot encoded after imputation
    pub single_categoricals: Vec<String>,

    /// Strategy for missing scalar categoricals and ages
    pub categorical_impute_strategy: CategoricalStrategy,

    /// List categorical fields, one indicator per element value
    pub multi_categoricals: Vec<String>,

    /// High-cardinality list fields
    pub top_categoricals: Vec<TopKGroup>,

    pub date_field: String,

    pub age_fields: Vec<String>,

    /// List fields reduced to element counts
    pub count_fields: Vec<String>,

    /// Text fields reduced to character lengths
    pub length_fields: Vec<String>,

    pub keyword_groups: Vec<KeywordGroup>,

    pub text_cleaning: TextCleaning,

    pub numeric_fields: Vec<String>,

    pub numeric_impute_strategy: NumericStrategy,

    pub mesh_field: String,

    pub facility_field: String,

    /// Site fields divided into enrollment
    pub distribution_fields: Vec<String>,

    /// Site-level fields kept for the cross-cutting enrichment stages
    pub site_fields: Vec<String>,

    pub location: LocationConfig,

    /// Phase-stratified target filter (training only)
    pub outlier_method: Option<OutlierMethod>,

    /// Inclusive start-year window (training only)
    pub start_year_window: Option<(i32, i32)>,

    /// Output features to keep, target aside; all when unset
    #[serde(default)]
    pub feature_subset: Option<Vec<String>>,

    /// Scaling fitted on the training output, target aside
    #[serde(default)]
    pub scaling: Option<ScalerKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target: "EnrollmentDuration".to_string(),
            condition_field: "Condition".to_string(),
            condition_max_categories: 20,
            single_categoricals: strings(&[
                "HealthyVolunteers",
                "Gender",
                "IsFDARegulatedDrug",
                "IsFDARegulatedDevice",
                "DesignPrimaryPurpose",
                "EnrollmentType",
                "OrgClass",
                "DesignAllocation",
                "DesignInterventionModel",
            ]),
            categorical_impute_strategy: CategoricalStrategy::MostFrequent,
            multi_categoricals: strings(&[
                "Phase",
                "StdAge",
                "CollaboratorClass",
                "LeadSponsorClass",
                "ConditionBrowseBranchAbbrev",
                "InterventionType",
                "ArmGroupType",
            ]),
            top_categoricals: vec![
                TopKGroup {
                    fields: strings(&[
                        "LocationCountry",
                        "LocationCity",
                        "LocationFacility",
                        "OrgFullName",
                        "LeadSponsorName",
                        "CollaboratorName",
                    ]),
                    strategy: TopKStrategy::Top(20),
                },
                TopKGroup {
                    fields: strings(&["Condition", "ConditionAncestorTerm", "Keyword"]),
                    strategy: TopKStrategy::Top(40),
                },
            ],
            date_field: "StartDate".to_string(),
            age_fields: strings(&["MaximumAge", "MinimumAge"]),
            count_fields: strings(&[
                "Condition",
                "ConditionAncestorTerm",
                "CollaboratorClass",
                "LocationFacility",
                "LocationCity",
                "LocationCountry",
                "ArmGroupLabel",
            ]),
            length_fields: strings(&["EligibilityCriteria"]),
            keyword_groups: vec![
                KeywordGroup {
                    fields: strings(&[
                        "InterventionName",
                        "EligibilityCriteria",
                        "OfficialTitle",
                        "BriefSummary",
                    ]),
                    n_keywords: 25,
                },
                KeywordGroup {
                    fields: strings(&[
                        "ArmGroupDescription",
                        "ArmGroupInterventionName",
                        "ArmGroupLabel",
                    ]),
                    n_keywords: 10,
                },
            ],
            text_cleaning: TextCleaning::default(),
            numeric_fields: strings(&["EnrollmentCount"]),
            numeric_impute_strategy: NumericStrategy::default(),
            mesh_field: "ConditionMeshId".to_string(),
            facility_field: "LocationFacility".to_string(),
            distribution_fields: strings(&["LocationFacility", "LocationCountry"]),
            site_fields: strings(&[
                "EnrollmentCount",
                "LocationFacility",
                "LocationCity",
                "LocationState",
                "LocationCountry",
                "LocationPopulationDensity",
            ]),
            location: LocationConfig::default(),
            outlier_method: Some(OutlierMethod::default()),
            start_year_window: None,
            feature_subset: None,
            scaling: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_numeric_impute(mut self, strategy: NumericStrategy) -> Self {
        self.numeric_impute_strategy = strategy;
        self
    }

    pub fn with_categorical_impute(mut self, strategy: CategoricalStrategy) -> Self {
        self.categorical_impute_strategy = strategy;
        self
    }

    pub fn with_location(mut self, strategy: AggregationStrategy, fill: FillPolicy) -> Self {
        self.location = LocationConfig { strategy, fill };
        self
    }

    pub fn with_outlier_method(mut self, method: Option<OutlierMethod>) -> Self {
        self.outlier_method = method;
        self
    }

    pub fn with_start_year_window(mut self, min_year: i32, max_year: i32) -> Self {
        self.start_year_window = Some((min_year, max_year));
        self
    }

    pub fn with_text_cleaning(mut self, cleaning: TextCleaning) -> Self {
        self.text_cleaning = cleaning;
        self
    }

    pub fn with_feature_subset<S: Into<String>>(mut self, features: impl IntoIterator<Item = S>) -> Self {
        self.feature_subset = Some(features.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_scaling(mut self, kind: Option<ScalerKind>) -> Self {
        self.scaling = kind;
        self
    }

    /// Reject parameter values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, value: String, reason: &str| FeatureError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };

        if let NumericStrategy::Knn { n_neighbors: 0, .. } = self.numeric_impute_strategy {
            return Err(invalid("n_neighbors", "0".into(), "must be at least 1"));
        }
        for group in &self.top_categoricals {
            if let TopKStrategy::Top(0) = group.strategy {
                return Err(invalid("top_k", "0".into(), "must be at least 1"));
            }
        }
        if let Some((min, max)) = self.start_year_window {
            if min > max {
                return Err(invalid("start_year_window", format!("{min}..{max}"), "min exceeds max"));
            }
        }
        if let Some(OutlierMethod::Iqr { lower, upper }) = self.outlier_method {
            if lower < 0.0 || upper < 0.0 {
                return Err(invalid("iqr", format!("{lower}/{upper}"), "multipliers must be non-negative"));
            }
        }
        if let Some(features) = &self.feature_subset {
            if features.is_empty() {
                return Err(invalid("feature_subset", "[]".into(), "must name at least one feature"));
            }
            if features.contains(&self.target) {
                return Err(invalid("feature_subset", self.target.clone(), "the target is always kept"));
            }
        }
        Ok(())
    }
}

/// The clinical-trial feature pipeline.
///
/// Every feature group runs in its own union branch (select, transform,
/// drop raw columns). Site fields pass through the union for patient
/// distribution and location enrichment, then get dropped. Row filters
/// run next, then the optional feature subset and scaling.
pub fn standard_pipeline(config: &PipelineConfig) -> Pipeline {
    let branch = |fields: &[String]| Pipeline::new().stage("select", Selector::new(fields.iter().cloned()));
    let exclude = |fields: &[String]| Excluder::new(fields.iter().cloned());

    let condition = config.condition_field.clone();
    let split = [format!("{condition}1"), format!("{condition}2")];

    let mut union = Union::new()
        .branch("target", branch(&[config.target.clone()]))
        .branch(
            "condition",
            branch(&[condition.clone()])
                .stage("split", ConditionSplitter::new(condition.clone()))
                .stage("exclude_raw", Excluder::new([condition]))
                .stage(
                    "encode",
                    SingleOneHotEncoder::new(split.clone())
                        .with_max_categories(config.condition_max_categories),
                )
                .stage("exclude", exclude(&split)),
        )
        .branch(
            "categorical_single",
            branch(&config.single_categoricals)
                .stage(
                    "impute",
                    CategoricalImputer::new(
                        config.categorical_impute_strategy.clone(),
                        config.single_categoricals.clone(),
                    ),
                )
                .stage("encode", SingleOneHotEncoder::new(config.single_categoricals.clone()))
                .stage("exclude", exclude(&config.single_categoricals)),
        )
        .branch(
            "categorical_multiple",
            branch(&config.multi_categoricals)
                .stage("encode", MultiOneHotEncoder::new(config.multi_categoricals.clone()))
                .stage("exclude", exclude(&config.multi_categoricals)),
        );

    for (i, group) in config.top_categoricals.iter().enumerate() {
        union = union.branch(
            format!("categorical_top_{}", i + 1),
            branch(&group.fields)
                .stage("encode", TopKOneHotEncoder::new(group.fields.clone(), group.strategy))
                .stage("exclude", exclude(&group.fields)),
        );
    }

    let date = [config.date_field.clone()];
    let mut counted = config.count_fields.clone();
    counted.extend(config.length_fields.iter().filter(|f| !config.count_fields.contains(f)).cloned());

    union = union
        .branch(
            "start_date",
            branch(&date)
                .stage("extract", StartDateExtractor::new(config.date_field.clone()))
                .stage("exclude", exclude(&date)),
        )
        .branch(
            "age",
            branch(&config.age_fields)
                .stage("impute", age_imputer(config))
                .stage("convert", AgeConverter::new(config.age_fields.clone()))
                .stage("exclude", exclude(&config.age_fields)),
        )
        .branch(
            "count",
            branch(&counted)
                .stage(
                    "count",
                    DistinctCounter::new(config.count_fields.clone())
                        .with_length_columns(config.length_fields.clone()),
                )
                .stage("exclude", exclude(&counted)),
        );

    for (i, group) in config.keyword_groups.iter().enumerate() {
        union = union.branch(
            format!("keywords_{}", i + 1),
            branch(&group.fields)
                .stage(
                    "extract",
                    KeywordExtractor::new(group.fields.clone(), group.n_keywords)
                        .with_tokenizer(config.text_cleaning.tokenizer()),
                )
                .stage("exclude", exclude(&group.fields)),
        );
    }

    let mesh = [config.mesh_field.clone()];
    let facility = [config.facility_field.clone()];
    let regional = RegionalAgeEnrichment::new();
    let regional_fields = regional.input_columns();

    union = union
        .branch(
            "numeric",
            branch(&config.numeric_fields)
                .stage(
                    "impute",
                    NumericImputer::new(
                        config.numeric_impute_strategy.clone(),
                        config.numeric_fields.clone(),
                    ),
                )
                .stage("exclude", exclude(&config.numeric_fields)),
        )
        .branch(
            "mesh_id",
            branch(&mesh)
                .stage("extract", MeshIdExtractor::new(config.mesh_field.clone()))
                .stage("exclude", exclude(&mesh)),
        )
        .branch(
            "facility_rank",
            branch(&facility)
                .stage("rank", FacilityRankEnrichment::new(config.facility_field.clone()))
                .stage("exclude", exclude(&facility)),
        )
        .branch(
            "regional_age",
            branch(&regional_fields)
                .stage("population", regional)
                .stage("exclude", exclude(&regional_fields)),
        )
        .passthrough(config.site_fields.clone());

    let enrollment = config
        .numeric_fields
        .first()
        .cloned()
        .unwrap_or_else(|| "EnrollmentCount".to_string());

    let mut pipeline = Pipeline::new()
        .union("features", union)
        .stage(
            "patient_distribution",
            PatientDistribution::new(enrollment, config.distribution_fields.clone()),
        )
        .stage(
            "location",
            LocationEnrichment::new(config.location.strategy, config.location.fill),
        )
        .stage("exclude_sites", exclude(&config.site_fields));

    if let Some((min_year, max_year)) = config.start_year_window {
        pipeline = pipeline.stage(
            "start_year_filter",
            StartYearFilter::new(StartDateExtractor::YEAR, min_year, max_year),
        );
    }
    if let Some(method) = &config.outlier_method {
        pipeline = pipeline.stage(
            "outlier_filter",
            PhaseOutlierFilter::new(config.target.clone(), method.clone()),
        );
    }
    if let Some(features) = &config.feature_subset {
        let kept = std::iter::once(config.target.clone()).chain(features.iter().cloned());
        pipeline = pipeline.stage("feature_subset", Selector::new(kept).on_fitted_columns());
    }
    if let Some(kind) = config.scaling {
        pipeline = pipeline.stage("scaling", Scaler::new(kind).excluding([config.target.clone()]));
    }
    pipeline
}

/// Age imputer whose all-missing fallback is the open age bound of each
/// field: `0 Years` for minimum ages, `100 Years` otherwise.
fn age_imputer(config: &PipelineConfig) -> CategoricalImputer {
    let mut imputer = CategoricalImputer::new(
        config.categorical_impute_strategy.clone(),
        config.age_fields.clone(),
    );
    for field in &config.age_fields {
        let bound = if field.to_lowercase().contains("min") {
            DEFAULT_MIN_AGE
        } else {
            DEFAULT_MAX_AGE
        };
        imputer = imputer.with_default(field.clone(), format!("{bound} Years"));
    }
    imputer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.target, "EnrollmentDuration");
        assert_eq!(config.top_categoricals[1].strategy, TopKStrategy::Top(40));
        assert_eq!(config.keyword_groups[0].n_keywords, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PipelineConfig::new()
            .with_location(AggregationStrategy::Simple, FillPolicy::Trials)
            .with_outlier_method(Some(OutlierMethod::Mad { factor: 2.0 }))
            .with_start_year_window(1995, 2018);

        assert_eq!(config.location.fill, FillPolicy::Trials);
        assert_eq!(config.start_year_window, Some((1995, 2018)));
        assert!(matches!(config.outlier_method, Some(OutlierMethod::Mad { .. })));
    }

    #[test]
    fn test_validation() {
        let config = PipelineConfig::new().with_numeric_impute(NumericStrategy::Knn {
            n_neighbors: 0,
            weights: Default::default(),
            metric: Default::default(),
        });
        assert!(matches!(
            config.validate(),
            Err(FeatureError::InvalidParameter { name, .. }) if name == "n_neighbors"
        ));

        let config = PipelineConfig::new().with_start_year_window(2020, 2000);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new().with_feature_subset(["EnrollmentDuration"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_age_imputer_defaults() {
        let imputer = age_imputer(&PipelineConfig::default());
        assert_eq!(imputer.default_for("MinimumAge"), "0 Years");
        assert_eq!(imputer.default_for("MaximumAge"), "100 Years");
    }

    #[test]
    fn test_json_without_new_fields() {
        let mut value = serde_json::to_value(PipelineConfig::default()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("feature_subset");
        object.remove("scaling");
        let config: PipelineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.scaling, None);
        assert_eq!(config.feature_subset, None);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = PipelineConfig::new().with_target("Duration");
        config.to_json_file(&path).unwrap();
        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_build_layout() {
        let pipeline = standard_pipeline(&PipelineConfig::default());
        assert_eq!(
            pipeline.step_names(),
            vec!["features", "patient_distribution", "location", "exclude_sites", "outlier_filter"]
        );

        let config = PipelineConfig::default()
            .with_feature_subset(["avg_population"])
            .with_scaling(Some(ScalerKind::MinMax));
        assert_eq!(
            standard_pipeline(&config).step_names(),
            vec![
                "features",
                "patient_distribution",
                "location",
                "exclude_sites",
                "outlier_filter",
                "feature_subset",
                "scaling"
            ]
        );
    }
}
