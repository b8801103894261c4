//! # Consumer Perf - Main Entry Point
//!
//! 1. **Parse arguments** and install logging
//! 2. **Validate** the configuration
//! 3. **Run** the consumers and the collector until the run time is over
//! 4. **Report**: print the summary and write it as JSON

use anyhow::Result;
use clap::Parser;
use consumer_perf::{cli::Args, logging, Harness, HarnessConfig};
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    info!("Starting consumer perf harness v{}", consumer_perf::VERSION);
    let config = HarnessConfig::from_args(&args)?;
    let harness = Harness::new(config);
    info!("Configuration: {:?}", harness.config());

    let summary = harness.run()?;

    summary.print();
    summary.write_json(&args.summary_file)?;

    let missing = summary.unacknowledged_workers();
    if !missing.is_empty() {
        warn!("{} consumers never acknowledged shutdown", missing.len());
    }

    info!("Run {} completed", summary.run_id);
    Ok(())
}
