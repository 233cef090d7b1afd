//! # rawmidi-bench - Main Entry Point
//!
//! Binary wrapper around the benchmark library: install logging, parse and
//! validate the command line, then hand the configuration to the
//! orchestrator. The process exits nonzero when any setup step fails; a
//! signal-driven shutdown of a running benchmark exits zero.

use anyhow::Result;
use clap::Parser;
use rawmidi_bench::{cli::Args, logging, BenchmarkConfiguration, BenchmarkRunner};
use tracing::info;

fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout carries only measurement columns.
    // Verbosity is controlled through RUST_LOG (default: info).
    logging::init();

    let args = Args::parse();
    let config = BenchmarkConfiguration::from_args(&args)?;

    info!(
        "starting rawmidi-bench {} with {} channels",
        rawmidi_bench::VERSION,
        config.channels.len()
    );

    BenchmarkRunner::new(config).run()
}
