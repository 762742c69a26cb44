//! Trial features - Main Entry Point
//!
//! Fits the clinical-trial feature pipeline and serves single-record transforms.

use clap::Parser;
use trial_features::cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trial_features=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
