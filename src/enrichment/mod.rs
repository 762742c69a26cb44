//! Reference-data enrichment
//!
//! Joins country metrics, regional age populations and facility ranks onto
//! trial records. The tables live in [`ReferenceTables`] and reach the
//! stages through the run context.

mod facility;
mod location;
mod reference;
mod regional;

pub use facility::FacilityRankEnrichment;
pub use location::{AggregationStrategy, FillPolicy, LocationEnrichment};
pub use reference::{
    AgePopulation, CountryTable, FacilityRankTable, ReferenceTables, RegionalTable, Resolution,
    COUNTRY_ALIASES,
};
pub use regional::{AgeSegments, RegionalAgeEnrichment, DEFAULT_MAX_AGE, DEFAULT_MIN_AGE};
