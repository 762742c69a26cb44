//! Integration test: standard feature pipeline end-to-end

use polars::prelude::DataFrame;
use serde_json::json;
use trial_features::enrichment::{CountryTable, ReferenceTables};
use trial_features::preprocessing::{
    Context, Excluder, FeaturePipeline, MultiOneHotEncoder, Pipeline, PipelineConfig, ScalerKind,
    Selector, SingleOneHotEncoder, Union,
};
use trial_features::record::{
    frame_from_records, FeatureMatrix, FieldKind, FieldSpec, FrameExt, Record, Schema, Violation,
};

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

fn trial(i: usize) -> Record {
    let countries = [["France", "Germany"], ["France", "France"], ["Germany", "Spain"]][i % 3];
    let phases: &[&str] = [&["Phase 1"][..], &["Phase 2"], &["Phase 2", "Phase 3"], &["Phase 3"]][i % 4];
    record(json!({
        "EnrollmentDuration": 100.0 + (i as f64) * 10.0,
        "EnrollmentCount": 20.0 + (i as f64) * 5.0,
        "Condition": if i % 2 == 0 { json!(["Diabetes", "Obesity"]) } else { json!(["Asthma"]) },
        "ConditionMeshId": ["D003920", "D009765"],
        "ConditionAncestorTerm": ["Metabolic Diseases"],
        "Keyword": ["insulin"],
        "Phase": phases,
        "OrgClass": if i % 2 == 0 { "NIH" } else { "INDUSTRY" },
        "Gender": "All",
        "StdAge": ["Adult"],
        "LocationFacility": [format!("Hospital {i}"), "Mayo Clinic"],
        "LocationCity": ["Paris", "Berlin"],
        "LocationState": ["Ile-de-France"],
        "LocationCountry": countries,
        "LocationPopulationDensity": [2000.0 + i as f64, 4000.0],
        "StartDate": format!("{} 201{}", ["January", "June", "October"][i % 3], i % 9),
        "MinimumAge": "18 Years",
        "MaximumAge": if i % 2 == 0 { json!("65 Years") } else { json!(null) },
        "EligibilityCriteria": format!("Inclusion criteria: adults with type {} diabetes", i % 2 + 1),
        "OfficialTitle": "A study of insulin dosing in adults",
        "BriefSummary": "Insulin dosing and glucose control",
        "InterventionName": ["Insulin glargine"],
    }))
}

fn tables() -> ReferenceTables {
    let countries = CountryTable::new(
        ["population", "gdp"],
        [
            ("France".to_string(), vec![67.0, 2.9]),
            ("Germany".to_string(), vec![83.0, 4.2]),
            ("Spain".to_string(), vec![47.0, 1.4]),
        ],
    )
    .unwrap();
    ReferenceTables::new(countries, Default::default(), Default::default())
}

fn fit_standard(config: &PipelineConfig) -> (trial_features::preprocessing::FittedPipeline, DataFrame, Context) {
    fit_records(config, (0..12).map(trial).collect())
}

fn fit_records(
    config: &PipelineConfig,
    records: Vec<Record>,
) -> (trial_features::preprocessing::FittedPipeline, DataFrame, Context) {
    let schema = Schema::clinical_trials();
    let (frame, report) = frame_from_records(&records, &schema).unwrap();
    assert_eq!(report.accepted, records.len());

    let ctx = Context::new(tables(), schema.clone());
    let (fitted, _) = FeaturePipeline::standard(config, &schema)
        .unwrap()
        .fit(&frame, &ctx)
        .unwrap();
    (fitted, frame, ctx)
}

fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

#[test]
fn test_end_to_end_example() {
    let schema = Schema::new(vec![
        FieldSpec::new("OrgClass", FieldKind::Categorical),
        FieldSpec::new("Phase", FieldKind::CategoricalList),
        FieldSpec::new("EnrollmentDuration", FieldKind::Numeric).required(),
    ])
    .unwrap();
    let encode = |field: &str, multi: bool| {
        let pipeline = Pipeline::new().stage("select", Selector::new([field]));
        let pipeline = if multi {
            pipeline.stage("encode", MultiOneHotEncoder::new([field]))
        } else {
            pipeline.stage("encode", SingleOneHotEncoder::new([field]))
        };
        pipeline.stage("exclude", Excluder::new([field]))
    };
    let pipeline = Pipeline::new().union(
        "features",
        Union::new()
            .branch("org", encode("OrgClass", false))
            .branch("phase", encode("Phase", true))
            .passthrough(["EnrollmentDuration"]),
    );

    let batch = vec![
        record(json!({"OrgClass": ["NIH"], "Phase": ["Phase 2"], "EnrollmentDuration": 10})),
        record(json!({"OrgClass": ["INDUSTRY"], "Phase": ["Phase 2"], "EnrollmentDuration": 20})),
    ];
    let (frame, _) = frame_from_records(&batch, &schema).unwrap();
    let ctx = Context::new(ReferenceTables::default(), schema.clone());
    let (fitted, _) = FeaturePipeline::new(pipeline, &schema, "EnrollmentDuration")
        .unwrap()
        .fit(&frame, &ctx)
        .unwrap();

    let features = fitted
        .transform_record(&record(json!({"OrgClass": ["NIH"], "Phase": ["Phase 2"]})), &ctx)
        .unwrap();
    assert_eq!(features.get("OrgClass=NIH"), Some(1.0));
    assert_eq!(features.get("OrgClass=INDUSTRY"), Some(0.0));
    assert_eq!(features.get("Phase=Phase 2"), Some(1.0));
}

#[test]
fn test_standard_pipeline_drops_raw_fields() {
    let (fitted, _, _) = fit_standard(&PipelineConfig::default());
    let columns = fitted.output_columns();

    for raw in ["Phase", "LocationCountry", "LocationFacility", "Condition", "StartDate", "EnrollmentCount"] {
        assert!(!columns.contains(&raw.to_string()), "raw field {raw} leaked");
    }
    for derived in [
        "EnrollmentDuration",
        "Condition1=Diabetes",
        "Condition2=No second Condition",
        "Phase=Phase 1",
        "OrgClass=NIH",
        "LocationCountry_top=France",
        "start_month",
        "start_year",
        "years_MinimumAge",
        "count_LocationCountry",
        "length_EligibilityCriteria",
        "imputed_EnrollmentCount",
        "mesh_id_1",
        "avg_facility_rank",
        "local_age_population",
        "patients_per_LocationFacility",
        "avg_population",
        "main_country_gdp",
        "max_city_population",
    ] {
        assert!(columns.contains(&derived.to_string()), "missing {derived}");
    }
}

#[test]
fn test_single_row_parity() {
    let (fitted, frame, ctx) = fit_standard(&PipelineConfig::default().with_outlier_method(None));
    let batch = fitted.transform_matrix(&frame, &ctx).unwrap();
    assert_eq!(batch.nrows(), 12);

    for i in 0..12 {
        let single = fitted.transform_record(&trial(i), &ctx).unwrap();
        let row = batch.row(i).unwrap();
        assert_eq!(single.names, row.names);
        assert!(
            single.values.iter().zip(&row.values).all(|(a, b)| same(*a, *b)),
            "row {i} differs"
        );
    }
}

#[test]
fn test_single_row_parity_with_scaling() {
    for kind in [ScalerKind::Standard, ScalerKind::MinMax, ScalerKind::Normalize] {
        let config = PipelineConfig::default()
            .with_outlier_method(None)
            .with_scaling(Some(kind));
        let (fitted, frame, ctx) = fit_standard(&config);
        let batch = fitted.transform_matrix(&frame, &ctx).unwrap();

        for i in 0..12 {
            let single = fitted.transform_record(&trial(i), &ctx).unwrap();
            let row = batch.row(i).unwrap();
            assert_eq!(single.names, row.names);
            assert!(
                single
                    .values
                    .iter()
                    .zip(&row.values)
                    .all(|(a, b)| same(*a, *b) || (a - b).abs() < 1e-12),
                "{kind:?} row {i} differs"
            );
        }
    }
}

#[test]
fn test_standard_scaling_centers_training_features() {
    let config = PipelineConfig::default()
        .with_outlier_method(None)
        .with_scaling(Some(ScalerKind::Standard));
    let (fitted, frame, ctx) = fit_standard(&config);
    let output = fitted.transform(&frame, &ctx).unwrap();

    let values: Vec<f64> = output.float_values("avg_population").unwrap().into_iter().flatten().collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    assert!(mean.abs() < 1e-9);
    // target is never scaled
    let target = output.float_values("EnrollmentDuration").unwrap();
    assert_eq!(target[0], Some(100.0));
}

#[test]
fn test_feature_subset_keeps_target_and_listed() {
    let config = PipelineConfig::default()
        .with_outlier_method(None)
        .with_feature_subset(["OrgClass=NIH", "avg_population"]);
    let (fitted, frame, ctx) = fit_standard(&config);
    assert_eq!(
        fitted.output_columns(),
        &["EnrollmentDuration", "OrgClass=NIH", "avg_population"]
    );
    assert_eq!(fitted.feature_columns(), vec!["OrgClass=NIH", "avg_population"]);

    let features = fitted.transform_record(&trial(0), &ctx).unwrap();
    assert_eq!(features.get("OrgClass=NIH"), Some(1.0));
    assert_eq!(fitted.transform(&frame, &ctx).unwrap().width(), 3);
}

#[test]
fn test_unknown_subset_feature_fails_fit() {
    let config = PipelineConfig::default().with_feature_subset(["OrgClass=UNKNOWN"]);
    let schema = Schema::clinical_trials();
    let records: Vec<Record> = (0..12).map(trial).collect();
    let (frame, _) = frame_from_records(&records, &schema).unwrap();
    let ctx = Context::new(tables(), schema.clone());

    let result = FeaturePipeline::standard(&config, &schema).unwrap().fit(&frame, &ctx);
    assert!(matches!(
        result,
        Err(trial_features::FeatureError::FeatureNotFound(ref c)) if c == "OrgClass=UNKNOWN"
    ));
}

#[test]
fn test_ages_absent_from_fit_batch_use_open_bounds() {
    let records: Vec<Record> = (0..12)
        .map(|i| {
            let mut record = trial(i);
            record.remove("MinimumAge");
            record.remove("MaximumAge");
            record
        })
        .collect();
    let config = PipelineConfig::default().with_outlier_method(None);
    let (fitted, frame, ctx) = fit_records(&config, records);
    let output = fitted.transform(&frame, &ctx).unwrap();

    assert_eq!(output.float_values("years_MinimumAge").unwrap(), vec![Some(0.0); 12]);
    assert_eq!(output.float_values("years_MaximumAge").unwrap(), vec![Some(100.0); 12]);
}

#[test]
fn test_fit_is_idempotent() {
    let config = PipelineConfig::default();
    let (first, _, _) = fit_standard(&config);
    let (second, _, _) = fit_standard(&config);

    let first = serde_json::to_value(&first).unwrap();
    let second = serde_json::to_value(&second).unwrap();
    assert_eq!(first["pipeline"], second["pipeline"]);
}

#[test]
fn test_transform_is_deterministic() {
    let (fitted, frame, ctx) = fit_standard(&PipelineConfig::default());
    let a = fitted.transform_matrix(&frame, &ctx).unwrap();
    let b = fitted.transform_matrix(&frame, &ctx).unwrap();
    assert_eq!(a.column_names(), b.column_names());
    assert!(a.data().iter().zip(b.data().iter()).all(|(x, y)| same(*x, *y)));
}

#[test]
fn test_top_k_vocabulary_size() {
    let (fitted, _, _) = fit_standard(&PipelineConfig::default());
    let country_columns = fitted
        .output_columns()
        .iter()
        .filter(|c| c.starts_with("LocationCountry_top="))
        .count();
    // three distinct countries, fewer than K = 20
    assert_eq!(country_columns, 3);
}

#[test]
fn test_multi_one_hot_row_sums() {
    let (fitted, frame, ctx) = fit_standard(&PipelineConfig::default().with_outlier_method(None));
    let output = fitted.transform(&frame, &ctx).unwrap();
    let matrix = FeatureMatrix::from_dataframe(&output, Some("EnrollmentDuration")).unwrap();
    let phase_columns: Vec<String> = matrix
        .column_names()
        .iter()
        .filter(|c| c.starts_with("Phase="))
        .cloned()
        .collect();

    for i in 0..12 {
        let row = matrix.row(i).unwrap();
        let sum: f64 = phase_columns.iter().filter_map(|c| row.get(c)).sum();
        let distinct = trial(i)["Phase"].texts().len();
        assert_eq!(sum, distinct as f64, "row {i}");
    }
}

#[test]
fn test_records_missing_required_fields_excluded() {
    let schema = Schema::clinical_trials();
    let mut incomplete = trial(0);
    incomplete.remove("EnrollmentCount");
    let mut mismatched = trial(1);
    mismatched.insert("LocationCity".into(), trial_features::record::Value::text_list(["Paris"]));

    let (frame, report) = frame_from_records(&[trial(2), incomplete, mismatched], &schema).unwrap();
    assert_eq!(frame.height(), 1);
    assert_eq!(report.count(Violation::MissingRequired), 1);
    assert_eq!(report.count(Violation::SiteLengthMismatch), 1);
}

#[test]
fn test_start_year_window_filters_training_rows() {
    let config = PipelineConfig::default()
        .with_outlier_method(None)
        .with_start_year_window(2010, 2014);
    let schema = Schema::clinical_trials();
    let records: Vec<Record> = (0..12).map(trial).collect();
    let (frame, _) = frame_from_records(&records, &schema).unwrap();
    let ctx = Context::new(tables(), schema.clone());

    let (fitted, training) = FeaturePipeline::standard(&config, &schema)
        .unwrap()
        .fit(&frame, &ctx)
        .unwrap();

    // start years are 2010 + i % 9
    let expected = (0..12).filter(|i| i % 9 <= 4).count();
    assert_eq!(training.height(), expected);
    // inference keeps every row
    assert_eq!(fitted.transform(&frame, &ctx).unwrap().height(), 12);
}
