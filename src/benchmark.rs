//! # Benchmark Orchestrator
//!
//! Owns the complete run lifecycle: apply real-time tuning, install the
//! shutdown descriptor, open every configured channel, spawn one worker per
//! parallel channel (plus one shared worker for the serialized group), poll
//! the published statistics every 500 ms, and tear everything down in
//! order when a termination signal arrives.
//!
//! ## Failure phases
//!
//! - **Setup phase** (tuning, channel open, thread spawn): any failure
//!   aborts the run. Already-acquired resources roll back in reverse
//!   acquisition order, mostly through drop glue; already-spawned workers
//!   are signaled and joined before the error propagates.
//! - **Run phase**: worker failures are isolated to the affected channel
//!   (or the serialized group). The reporting loop keeps running and the
//!   dead channel's column freezes at its last published value.
//!
//! ## Shutdown ordering
//!
//! Streaming workers are signaled and joined first, then the single-event
//! workers, then the serialized group: heaviest-load producers stop first.
//! Channels travel back through the thread join and are closed afterwards,
//! here, never inside a worker.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::AsFd;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::cli::{BenchmarkConfiguration, TestStrategy};
use crate::defaults;
use crate::stats::ChannelStats;
use crate::tuning;
use crate::worker::{
    self,
    serialized::SerializedGroup,
    SINGLE_IN_FLIGHT, STREAMING_IN_FLIGHT,
};

/// Coordinates one benchmark run from setup through shutdown.
pub struct BenchmarkRunner {
    config: BenchmarkConfiguration,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfiguration) -> Self {
        Self { config }
    }

    /// Execute the run until a termination signal arrives.
    pub fn run(self) -> Result<()> {
        let _tuning = tuning::apply(&self.config)?;
        let shutdown = ShutdownSignal::install()?;

        let opened = self.open_channels()?;
        let columns = opened.columns.clone();
        info!(
            "running {} channels ({} serialized, {} single, {} streaming)",
            columns.len(),
            opened.serialized.len(),
            opened.singles.len(),
            opened.streams.len()
        );

        let workers = Self::spawn_workers(opened, self.config.event_delay)?;

        // Teardown must run even if the reporting loop fails, so the loop
        // result is only propagated after workers have joined.
        let report_result = self.report_loop(&shutdown, &columns);
        println!();
        workers.shutdown();
        debug!("all workers joined, channels closed");
        report_result
    }

    /// Open every configured channel in column order.
    ///
    /// Each channel gets its position within its strategy group as the
    /// payload-parameterizing index, and an in-flight byte window sized for
    /// its strategy's depth. A failure drops everything opened so far.
    fn open_channels(&self) -> Result<OpenedChannels> {
        let mut opened = OpenedChannels::default();

        for spec in &self.config.channels {
            let (depth, group) = match spec.strategy {
                TestStrategy::Serialized => (1, &mut opened.serialized),
                TestStrategy::ParallelSingle => (SINGLE_IN_FLIGHT, &mut opened.singles),
                TestStrategy::Streaming => (STREAMING_IN_FLIGHT, &mut opened.streams),
            };
            let index = group.len() as u8;
            let max_in_flight_bytes = depth * spec.mode.payload_len();

            let channel = Channel::open(spec, index, max_in_flight_bytes).with_context(|| {
                format!("failed to open {} channel {}", spec.strategy, spec.device)
            })?;
            debug!(
                "opened {} channel {} ({} events)",
                spec.strategy,
                spec.device,
                spec.mode
            );

            opened.columns.push(channel.stats());
            group.push(channel);
        }

        Ok(opened)
    }

    /// Spawn the serialized group worker and one worker per parallel
    /// channel. If any spawn fails, every worker started so far is signaled
    /// and joined before the error is returned.
    fn spawn_workers(mut opened: OpenedChannels, delay: Duration) -> Result<Workers> {
        let mut workers = Workers::default();

        if !opened.serialized.is_empty() {
            let mut group = SerializedGroup::new(std::mem::take(&mut opened.serialized), delay);
            let term = Arc::clone(&group.term);
            let handle = thread::Builder::new()
                .name("serialized".to_string())
                .spawn(move || {
                    let _ = worker::serialized::run(&mut group);
                    group
                })
                .context("failed to spawn serialized group worker")?;
            workers.serialized = Some((term, handle));
        }

        for chan in std::mem::take(&mut opened.singles) {
            match spawn_channel_worker("single", chan, worker::single::run) {
                Ok(spawned) => workers.singles.push(spawned),
                Err(err) => {
                    workers.shutdown();
                    return Err(err);
                }
            }
        }

        for chan in std::mem::take(&mut opened.streams) {
            match spawn_channel_worker("streaming", chan, worker::streaming::run) {
                Ok(spawned) => workers.streams.push(spawned),
                Err(err) => {
                    workers.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(workers)
    }

    /// Poll the shutdown descriptor and print one statistics line per
    /// interval until termination is requested.
    ///
    /// The first wait is the settle delay, giving the pipelines time to
    /// warm before the first line; a termination request during the settle
    /// window is honored immediately.
    fn report_loop(&self, shutdown: &ShutdownSignal, columns: &[Arc<ChannelStats>]) -> Result<()> {
        let start = Instant::now();
        let mut timeout = defaults::SETTLE_DELAY;

        loop {
            if shutdown.wait(timeout)? {
                info!("termination requested");
                return Ok(());
            }
            timeout = defaults::REPORT_INTERVAL;

            let elapsed_secs = start.elapsed().as_secs().max(1);
            let mut line = String::new();
            for stats in columns {
                if self.config.show_event_rate {
                    let _ = write!(
                        line,
                        "{:7}/{:4} ",
                        stats.avg_ns_per_byte(),
                        stats.events() / elapsed_secs
                    );
                } else {
                    let _ = write!(line, "{:7} ", stats.avg_ns_per_byte());
                }
            }

            let mut out = std::io::stdout().lock();
            writeln!(out, "{line}").context("failed to write report line")?;
            out.flush().context("failed to flush report output")?;
        }
    }
}

/// Channels opened for one run, grouped by strategy, plus the statistics
/// handles in column order.
#[derive(Default)]
struct OpenedChannels {
    columns: Vec<Arc<ChannelStats>>,
    serialized: Vec<Channel>,
    singles: Vec<Channel>,
    streams: Vec<Channel>,
}

type SpawnedWorker = (Arc<AtomicBool>, JoinHandle<Channel>);

/// Live worker threads with their termination flags. Channels come back
/// through the joins so the orchestrator closes them after the workers have
/// stopped.
#[derive(Default)]
struct Workers {
    serialized: Option<(Arc<AtomicBool>, JoinHandle<SerializedGroup>)>,
    singles: Vec<SpawnedWorker>,
    streams: Vec<SpawnedWorker>,
}

impl Workers {
    /// Signal and join everything: streaming first, then single-event, then
    /// the serialized group. Joined channels are dropped (closed) here.
    fn shutdown(self) {
        join_channel_workers(self.streams);
        join_channel_workers(self.singles);

        if let Some((term, handle)) = self.serialized {
            term.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
    }
}

fn join_channel_workers(workers: Vec<SpawnedWorker>) {
    for (term, _) in &workers {
        term.store(true, Ordering::Relaxed);
    }
    for (_, handle) in workers {
        let _ = handle.join();
    }
}

/// Spawn one parallel worker thread owning `chan`.
fn spawn_channel_worker(
    kind: &str,
    mut chan: Channel,
    run: fn(&mut Channel) -> Result<(), worker::WorkerError>,
) -> Result<SpawnedWorker> {
    let term = chan.termination();
    let name = format!("{kind}-{}", chan.index());
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let _ = run(&mut chan);
            chan
        })
        .with_context(|| format!("failed to spawn {kind} worker"))?;
    Ok((term, handle))
}

/// Signal-driven termination request, delivered through a non-blocking
/// signalfd that the reporting loop polls.
///
/// All signals are blocked process-wide at install time, before any worker
/// thread exists, so workers inherit the mask and delivery is confined to
/// the descriptor.
struct ShutdownSignal {
    fd: SignalFd,
}

impl ShutdownSignal {
    fn install() -> Result<Self> {
        let everything = SigSet::all();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&everything), None)
            .context("failed to block signals")?;

        let mut requested = SigSet::empty();
        for sig in [
            Signal::SIGINT,
            Signal::SIGHUP,
            Signal::SIGQUIT,
            Signal::SIGTERM,
        ] {
            requested.add(sig);
        }
        let fd = SignalFd::with_flags(&requested, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .context("failed to create signal descriptor")?;

        Ok(Self { fd })
    }

    /// Wait up to `timeout` for a termination request.
    fn wait(&self, timeout: Duration) -> Result<bool> {
        let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let ready =
            poll(&mut fds, PollTimeout::from(ms)).context("poll on signal descriptor failed")?;
        Ok(ready != 0)
    }
}
