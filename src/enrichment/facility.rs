//! Average research rank of a trial's facilities

use crate::error::Result;
use crate::preprocessing::{extend_names, Context, Stage};
use crate::record::{float_column, FrameExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Mean rank of the facilities found in the rank table, written to
/// `avg_facility_rank`. Rows with no ranked facility get 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityRankEnrichment {
    facility_column: String,
}

impl FacilityRankEnrichment {
    pub const OUTPUT: &'static str = "avg_facility_rank";

    pub fn new(facility_column: impl Into<String>) -> Self {
        Self {
            facility_column: facility_column.into(),
        }
    }
}

impl Default for FacilityRankEnrichment {
    fn default() -> Self {
        Self::new("LocationFacility")
    }
}

impl Stage for FacilityRankEnrichment {
    fn kind(&self) -> &'static str {
        "facility_rank"
    }

    fn input_columns(&self) -> Vec<String> {
        vec![self.facility_column.clone()]
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, [Self::OUTPUT.to_string()])
    }

    fn fit(&mut self, _df: &DataFrame, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &DataFrame, ctx: &Context) -> Result<DataFrame> {
        let table = &ctx.references().facilities;
        let mut matched = 0usize;
        let mut unmatched = 0usize;

        let lengths = df.list_lengths(&self.facility_column)?;
        let ranks: Vec<Option<f64>> = df
            .text_lists(&self.facility_column)?
            .iter()
            .zip(lengths)
            .map(|(facilities, len)| {
                let found: Vec<f64> = facilities
                    .iter()
                    .filter_map(|facility| table.resolve(facility).resolved())
                    .collect();
                matched += found.len();
                unmatched += len.saturating_sub(found.len());
                Some(crate::utils::stats::mean(&found).unwrap_or(0.0))
            })
            .collect();

        debug!(matched, unmatched, "Facility rank lookups");
        df.append_columns(vec![float_column(Self::OUTPUT, ranks)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{FacilityRankTable, ReferenceTables};
    use crate::record::{text_list_column, Schema};

    #[test]
    fn test_average_rank() {
        let facilities = FacilityRankTable::new(vec![
            ("Mayo Clinic".to_string(), 10.0),
            ("Charité - Universitätsmedizin Berlin".to_string(), 30.0),
        ]);
        let ctx = Context::new(
            ReferenceTables {
                facilities,
                ..Default::default()
            },
            Schema::default(),
        );
        let df = DataFrame::new(vec![text_list_column(
            "LocationFacility",
            &[
                vec!["mayo clinic", "Charité Universitätsmedizin Berlin", "Unknown Site"],
                vec!["Unknown Site"],
            ],
        )])
        .unwrap();

        let out = FacilityRankEnrichment::default().transform(&df, &ctx).unwrap();
        assert_eq!(
            out.float_values(FacilityRankEnrichment::OUTPUT).unwrap(),
            vec![Some(20.0), Some(0.0)]
        );
    }
}
