//! Utility functions and types

pub mod data_loader;
pub mod stats;

pub use data_loader::{save_csv, DataLoader};
