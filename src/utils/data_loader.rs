//! Data loading utilities

use crate::enrichment::{CountryTable, FacilityRankTable, ReferenceTables, RegionalTable};
use crate::error::{FeatureError, Result};
use crate::record::Record;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Key column of the country metrics table
pub const COUNTRY_KEY: &str = "countryName";
/// Key column of the regional age table
pub const REGION_KEY: &str = "Area";
/// Name and rank columns of the facility table
pub const FACILITY_NAME: &str = "Name";
pub const FACILITY_RANK: &str = "World Rank";

/// Loader for record batches and reference tables
pub struct DataLoader {
    /// Rows scanned to infer CSV column types
    infer_schema_length: Option<usize>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: Some(100),
        }
    }

    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load a CSV file
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let file = File::open(path.as_ref())?;
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| FeatureError::DataError(e.to_string()))
    }

    /// Load raw records from a JSON array file or a JSON-lines file
    /// (`.jsonl`, one object per line).
    pub fn load_records(&self, path: impl AsRef<Path>) -> Result<Vec<Record>> {
        let path = path.as_ref();
        let records: Vec<Record> = if path.extension().is_some_and(|ext| ext == "jsonl") {
            let reader = BufReader::new(File::open(path)?);
            let mut records = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                records.push(serde_json::from_str(&line)?);
            }
            records
        } else {
            serde_json::from_reader(BufReader::new(File::open(path)?))?
        };
        info!(path = %path.display(), records = records.len(), "Records loaded");
        Ok(records)
    }

    /// Load a single JSON object as a record
    pub fn load_record(&self, path: impl AsRef<Path>) -> Result<Record> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Load the reference tables. Regional and facility tables are optional;
    /// a missing table resolves nothing.
    pub fn load_reference_tables(
        &self,
        countries: impl AsRef<Path>,
        regional: Option<&Path>,
        facilities: Option<&Path>,
    ) -> Result<ReferenceTables> {
        let countries = CountryTable::from_dataframe(&self.load_csv(countries)?, COUNTRY_KEY)?;
        let regional = match regional {
            Some(path) => RegionalTable::from_dataframe(&self.load_csv(path)?, REGION_KEY)?,
            None => RegionalTable::default(),
        };
        let facilities = match facilities {
            Some(path) => {
                FacilityRankTable::from_dataframe(&self.load_csv(path)?, FACILITY_NAME, FACILITY_RANK)?
            }
            None => FacilityRankTable::default(),
        };
        info!(
            countries = countries.len(),
            regions = regional.len(),
            facilities = facilities.len(),
            "Reference tables loaded"
        );
        Ok(ReferenceTables::new(countries, regional, facilities))
    }
}

/// Write a frame to CSV
pub fn save_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let mut file = File::create(path.as_ref())?;
    CsvWriter::new(&mut file)
        .finish(df)
        .map_err(|e| FeatureError::DataError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use std::io::Write;

    #[test]
    fn test_load_records_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();

        let array = dir.path().join("records.json");
        std::fs::write(&array, r#"[{"OrgClass": "NIH", "Phase": ["Phase 2"]}, {"EnrollmentCount": 12}]"#).unwrap();
        let records = DataLoader::new().load_records(&array).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["OrgClass"], Value::from("NIH"));
        assert_eq!(records[1]["EnrollmentCount"].as_f64(), Some(12.0));

        let lines = dir.path().join("records.jsonl");
        let mut file = File::create(&lines).unwrap();
        writeln!(file, r#"{{"OrgClass": "NIH"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"OrgClass": "INDUSTRY"}}"#).unwrap();
        assert_eq!(DataLoader::new().load_records(&lines).unwrap().len(), 2);
    }

    #[test]
    fn test_load_reference_tables() {
        let dir = tempfile::tempdir().unwrap();
        let countries = dir.path().join("countries.csv");
        std::fs::write(&countries, "countryName,population\nFrance,67\nGermany,83\n").unwrap();
        let facilities = dir.path().join("facilities.csv");
        std::fs::write(&facilities, "Name,World Rank\nMayo Clinic,1\n").unwrap();

        let tables = DataLoader::new()
            .load_reference_tables(&countries, None, Some(facilities.as_path()))
            .unwrap();
        assert_eq!(tables.countries.len(), 2);
        assert_eq!(tables.countries.resolve("France").resolved(), Some(&[67.0][..]));
        assert!(tables.regional.is_empty());
        assert_eq!(tables.facilities.resolve("Mayo Clinic").resolved(), Some(1.0));
    }
}
