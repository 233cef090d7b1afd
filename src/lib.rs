//! # rawmidi-bench Library
//!
//! A round-trip latency benchmark suite for raw MIDI device channels,
//! implemented in Rust. The library measures how quickly a full-duplex
//! byte-oriented device echoes synthetic traffic under three distinct
//! concurrency/load patterns and publishes live per-channel statistics.
//!
//! ## Test Strategies
//!
//! - **Serialized**: one thread drives up to 16 channels round-robin with a
//!   single event in flight across the whole group
//! - **Parallel single**: one thread per channel, exactly one event in
//!   flight per channel at steady state
//! - **Streaming**: one thread per channel, eight events in flight,
//!   sparsely timestamped to keep measurement overhead out of the pipeline
//!
//! ## Architecture Overview
//!
//! - `benchmark`: orchestration of a run (setup, workers, reporting,
//!   shutdown)
//! - `channel`: the per-device handle tying a port to its measurement
//!   identity
//! - `cli`: command-line parsing and the validated core configuration
//! - `message`: deterministic payload generation for self-verifying round
//!   trips
//! - `port`: the duplex device seam (kernel rawmidi and pipe loopback)
//! - `stats`: lock-free publication of per-channel running statistics
//! - `timing`: monotonic timestamps and checked delta arithmetic
//! - `tuning`: process-wide real-time setup
//! - `worker`: the three measurement strategies and their shared machinery
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rawmidi_bench::{BenchmarkConfiguration, BenchmarkRunner};
//! use clap::Parser;
//!
//! fn main() -> anyhow::Result<()> {
//!     let args = rawmidi_bench::cli::Args::parse_from([
//!         "rawmidi-bench",
//!         "--test",
//!         "single:loopback",
//!     ]);
//!     let config = BenchmarkConfiguration::from_args(&args)?;
//!     BenchmarkRunner::new(config).run()
//! }
//! ```
//!
//! ## Performance Characteristics
//!
//! - Workers are plain OS threads; the only blocking operation is a
//!   poll-style readiness wait with an explicit timeout
//! - Ring buffers, credit counters, and running sums stay private to their
//!   owning thread; the sole cross-thread state is an atomic pair per
//!   channel, written by one worker and read by one reporting loop
//! - Timestamps come from `CLOCK_MONOTONIC_RAW` and every delta is
//!   validated before it can enter a running average

/// Benchmark orchestration: channel setup, worker lifecycle, the reporting
/// loop, and ordered shutdown.
pub mod benchmark;

/// Channel handle combining a device port with its test mode, payload
/// index, termination flag, and published statistics.
pub mod channel;

/// Command-line interface and the validated configuration object handed to
/// the core.
pub mod cli;

/// Tracing subscriber setup with a level-tinted stderr formatter.
pub mod logging;

/// Deterministic synthetic event generation.
pub mod message;

/// The duplex device seam: trait, rawmidi implementation, pipe loopback.
pub mod port;

/// Lock-free per-channel statistics publication.
pub mod stats;

/// Monotonic timestamps and checked delta arithmetic.
pub mod timing;

/// Process-wide real-time tuning (affinity, scheduler class, latency
/// floor).
pub mod tuning;

/// The three measurement workers and their shared ring/credit machinery.
pub mod worker;

pub use benchmark::BenchmarkRunner;
pub use channel::Channel;
pub use cli::{Args, BenchmarkConfiguration, ChannelSpec, TestStrategy};
pub use message::{generate, Event, EventMode};
pub use port::{DuplexPort, LoopbackPort, RawmidiPort};
pub use stats::ChannelStats;
pub use worker::WorkerError;

/// The current version of the benchmark suite, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values shared by the CLI layer and the core.
pub mod defaults {
    use std::time::Duration;

    /// Serialized-strategy pause between events, in milliseconds. Tunable
    /// from 1 to 100 on the command line.
    pub const EVENT_DELAY_MS: u64 = 1;

    /// Interval between reported statistics lines.
    pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);

    /// Quiet period before the first reported line, giving pipelines time
    /// to fill and warm-up windows time to drain.
    pub const SETTLE_DELAY: Duration = Duration::from_secs(4);

    /// Negotiated rawmidi stream buffer capacity in bytes (the kernel
    /// default).
    pub const OUTPUT_BUFFER_BYTES: usize = 4096;

    /// Pause between discarding queued output and draining pending input
    /// while flushing a channel to its known-empty starting state.
    pub const FLUSH_SETTLE: Duration = Duration::from_millis(10);
}
