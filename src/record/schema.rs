//! Declared record fields and record-level validation

use crate::error::{FeatureError, Result};
use super::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of the facility entry used when sites are not disclosed.
pub const PLACEHOLDER_FACILITY: &str =
    "For additional information regarding investigative sites for this trial,";

/// Eligibility text used when criteria are not disclosed.
pub const PLACEHOLDER_ELIGIBILITY: &str = "Please contact site for information";

/// Type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Single categorical value
    Categorical,
    /// List of categorical values
    CategoricalList,
    /// Free text, scalar or list of strings
    Text,
    /// Single numeric value
    Numeric,
    /// List of numeric values
    NumericList,
    /// Month-year date such as "January 2015"
    Date,
    /// Age with a unit such as "18 Years"
    Age,
}

/// Descriptor of one declared field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Must be present and non-missing for a training record
    #[serde(default)]
    pub required: bool,
    /// Must be supplied by a prediction request
    #[serde(default)]
    pub mandatory: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            mandatory: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// Reason a record is excluded from a training batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Violation {
    MissingRequired,
    SiteLengthMismatch,
    PlaceholderFacility,
    PlaceholderEligibility,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Violation::MissingRequired => "missing required field",
            Violation::SiteLengthMismatch => "site list length mismatch",
            Violation::PlaceholderFacility => "placeholder facility",
            Violation::PlaceholderEligibility => "placeholder eligibility",
        };
        f.write_str(label)
    }
}

/// Counts of accepted and excluded records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub accepted: usize,
    pub excluded: BTreeMap<Violation, usize>,
}

impl ValidationReport {
    pub fn excluded_total(&self) -> usize {
        self.excluded.values().sum()
    }

    pub fn count(&self, violation: Violation) -> usize {
        self.excluded.get(&violation).copied().unwrap_or(0)
    }
}

/// Explicit mapping from declared field names to typed descriptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    /// Parallel per-site lists that must have equal length
    site_fields: Vec<String>,
    /// Per-site list that may be shorter than the others
    state_field: Option<String>,
    facility_field: Option<String>,
    eligibility_field: Option<String>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(FeatureError::ConfigError(format!(
                    "field `{}` declared twice",
                    field.name
                )));
            }
        }
        Ok(Self {
            fields,
            site_fields: Vec::new(),
            state_field: None,
            facility_field: None,
            eligibility_field: None,
        })
    }

    /// Declare the parallel per-site lists.
    pub fn with_site_fields(mut self, fields: &[&str], state: Option<&str>) -> Result<Self> {
        for name in fields.iter().chain(state.iter()) {
            self.spec(name)?;
        }
        self.site_fields = fields.iter().map(|s| s.to_string()).collect();
        self.state_field = state.map(str::to_string);
        Ok(self)
    }

    /// Declare fields whose placeholder texts mark a record as unusable.
    pub fn with_placeholder_checks(mut self, facility: &str, eligibility: &str) -> Result<Self> {
        self.spec(facility)?;
        self.spec(eligibility)?;
        self.facility_field = Some(facility.to_string());
        self.eligibility_field = Some(eligibility.to_string());
        Ok(self)
    }

    /// Field layout of the clinical-trial documents.
    pub fn clinical_trials() -> Self {
        use FieldKind::*;
        let fields = vec![
            FieldSpec::new("EnrollmentDuration", Numeric).required(),
            FieldSpec::new("EnrollmentCount", Numeric).required().mandatory(),
            FieldSpec::new("Condition", CategoricalList).required().mandatory(),
            FieldSpec::new("ConditionMeshId", CategoricalList),
            FieldSpec::new("ConditionAncestorTerm", CategoricalList),
            FieldSpec::new("ConditionBrowseBranchAbbrev", CategoricalList),
            FieldSpec::new("Keyword", CategoricalList),
            FieldSpec::new("HealthyVolunteers", Categorical),
            FieldSpec::new("Gender", Categorical),
            FieldSpec::new("IsFDARegulatedDrug", Categorical),
            FieldSpec::new("IsFDARegulatedDevice", Categorical),
            FieldSpec::new("DesignPrimaryPurpose", Categorical),
            FieldSpec::new("EnrollmentType", Categorical),
            FieldSpec::new("OrgClass", Categorical).mandatory(),
            FieldSpec::new("DesignAllocation", Categorical),
            FieldSpec::new("DesignInterventionModel", Categorical),
            FieldSpec::new("Phase", CategoricalList).mandatory(),
            FieldSpec::new("StdAge", CategoricalList),
            FieldSpec::new("CollaboratorClass", CategoricalList),
            FieldSpec::new("LeadSponsorClass", CategoricalList),
            FieldSpec::new("InterventionType", CategoricalList),
            FieldSpec::new("ArmGroupType", CategoricalList),
            FieldSpec::new("OrgFullName", CategoricalList),
            FieldSpec::new("LeadSponsorName", CategoricalList),
            FieldSpec::new("CollaboratorName", CategoricalList),
            FieldSpec::new("LocationFacility", CategoricalList).required().mandatory(),
            FieldSpec::new("LocationCity", CategoricalList).mandatory(),
            FieldSpec::new("LocationState", CategoricalList),
            FieldSpec::new("LocationCountry", CategoricalList).required().mandatory(),
            FieldSpec::new("LocationPopulationDensity", NumericList),
            FieldSpec::new("StartDate", Date).mandatory(),
            FieldSpec::new("MinimumAge", Age),
            FieldSpec::new("MaximumAge", Age),
            FieldSpec::new("EligibilityCriteria", Text).required(),
            FieldSpec::new("InterventionName", Text),
            FieldSpec::new("OfficialTitle", Text),
            FieldSpec::new("BriefSummary", Text),
            FieldSpec::new("ArmGroupDescription", Text),
            FieldSpec::new("ArmGroupInterventionName", Text),
            FieldSpec::new("ArmGroupLabel", Text),
        ];
        Self {
            fields,
            site_fields: vec![
                "LocationFacility".into(),
                "LocationCity".into(),
                "LocationCountry".into(),
                "LocationPopulationDensity".into(),
            ],
            state_field: Some("LocationState".into()),
            facility_field: Some("LocationFacility".into()),
            eligibility_field: Some("EligibilityCriteria".into()),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn spec(&self, name: &str) -> Result<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| FeatureError::FeatureNotFound(name.to_string()))
    }

    /// Fields a prediction request must carry.
    pub fn mandatory_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.mandatory)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Reject a prediction request that lacks any mandatory field.
    pub fn check_request(&self, record: &Record) -> Result<()> {
        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.mandatory)
            .filter(|f| record.get(&f.name).map_or(true, Value::is_missing))
            .map(|f| f.name.clone())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeatureError::MissingFields(missing))
        }
    }

    /// First violation that excludes a training record, if any.
    pub fn validate(&self, record: &Record) -> Option<Violation> {
        let missing_required = self
            .fields
            .iter()
            .filter(|f| f.required)
            .any(|f| record.get(&f.name).map_or(true, Value::is_missing));
        if missing_required {
            return Some(Violation::MissingRequired);
        }

        let lengths: Vec<usize> = self
            .site_fields
            .iter()
            .filter_map(|name| record.get(name))
            .map(Value::list_len)
            .collect();
        if let Some(&first) = lengths.first() {
            if lengths.iter().any(|&len| len != first) {
                return Some(Violation::SiteLengthMismatch);
            }
            if let Some(state) = self.state_field.as_ref().and_then(|s| record.get(s)) {
                if state.list_len() > first {
                    return Some(Violation::SiteLengthMismatch);
                }
            }
        }

        if let Some(facilities) = self.facility_field.as_ref().and_then(|f| record.get(f)) {
            if facilities
                .texts()
                .iter()
                .any(|fac| fac.starts_with(PLACEHOLDER_FACILITY))
            {
                return Some(Violation::PlaceholderFacility);
            }
        }

        if let Some(eligibility) = self.eligibility_field.as_ref().and_then(|f| record.get(f)) {
            if eligibility
                .texts()
                .first()
                .is_some_and(|text| text.starts_with(PLACEHOLDER_ELIGIBILITY))
            {
                return Some(Violation::PlaceholderEligibility);
            }
        }

        None
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::clinical_trials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn valid_record() -> Record {
        record(json!({
            "EnrollmentDuration": 12.0,
            "EnrollmentCount": 100,
            "Condition": ["Asthma"],
            "EligibilityCriteria": ["Adults with asthma"],
            "LocationFacility": ["Mayo Clinic", "Charite"],
            "LocationCity": ["Rochester", "Berlin"],
            "LocationCountry": ["United States", "Germany"],
            "LocationPopulationDensity": [200.0, 4000.0],
            "LocationState": ["Minnesota"]
        }))
    }

    #[test]
    fn test_valid_record_passes() {
        let schema = Schema::clinical_trials();
        assert_eq!(schema.validate(&valid_record()), None);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = Schema::clinical_trials();
        let mut rec = valid_record();
        rec.insert("Condition".into(), Value::List(vec![]));
        assert_eq!(schema.validate(&rec), Some(Violation::MissingRequired));
    }

    #[test]
    fn test_site_length_mismatch() {
        let schema = Schema::clinical_trials();
        let mut rec = valid_record();
        rec.insert("LocationCity".into(), Value::text_list(["Rochester"]));
        assert_eq!(schema.validate(&rec), Some(Violation::SiteLengthMismatch));
    }

    #[test]
    fn test_placeholder_facility() {
        let schema = Schema::clinical_trials();
        let mut rec = valid_record();
        rec.insert(
            "LocationFacility".into(),
            Value::text_list([
                "For additional information regarding investigative sites for this trial, contact us",
                "Charite",
            ]),
        );
        assert_eq!(schema.validate(&rec), Some(Violation::PlaceholderFacility));
    }

    #[test]
    fn test_check_request_lists_missing() {
        let schema = Schema::clinical_trials();
        let err = schema.check_request(&valid_record()).unwrap_err();
        match err {
            FeatureError::MissingFields(fields) => {
                assert!(fields.contains(&"OrgClass".to_string()));
                assert!(fields.contains(&"Phase".to_string()));
                assert!(!fields.contains(&"Condition".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let fields = vec![
            FieldSpec::new("Phase", FieldKind::CategoricalList),
            FieldSpec::new("Phase", FieldKind::Categorical),
        ];
        assert!(Schema::new(fields).is_err());
    }
}
