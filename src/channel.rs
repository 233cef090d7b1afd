//! Channel handle: one device connection plus its measurement identity.
//!
//! A `Channel` bundles the duplex port with everything a worker needs to
//! drive it: the test mode, the per-strategy channel index that
//! parameterizes generated payloads, the cooperative termination flag, and
//! the published statistics pair. The orchestrator opens channels before
//! workers start, each worker owns its channel exclusively while running,
//! and the handle travels back to the orchestrator through the thread join
//! so teardown happens after the worker has stopped.

use std::io;
use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;

use crate::cli::ChannelSpec;
use crate::defaults::FLUSH_SETTLE;
use crate::message::EventMode;
use crate::port::{self, DuplexPort};
use crate::stats::ChannelStats;

/// One duplex device channel under test.
pub struct Channel {
    port: Box<dyn DuplexPort>,
    mode: EventMode,
    index: u8,
    device: String,
    term: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
}

impl Channel {
    /// Open the device named by `spec` and flush it to a known-empty state.
    ///
    /// `index` is the channel's position within its strategy group (0..16)
    /// and feeds the payload generator. `max_in_flight_bytes` is the output
    /// window the worker will keep queued. Any failure releases everything
    /// acquired so far; no half-initialized handle is ever returned.
    pub fn open(spec: &ChannelSpec, index: u8, max_in_flight_bytes: usize) -> Result<Self> {
        let port = port::open(&spec.device, max_in_flight_bytes)?;
        let mut channel = Self::with_port(port, spec.mode, index, spec.device.clone());
        channel.flush();
        Ok(channel)
    }

    /// Wrap an already-open port. Used by [`Channel::open`] and by tests
    /// that build ports with injected behavior.
    pub fn with_port(
        port: Box<dyn DuplexPort>,
        mode: EventMode,
        index: u8,
        device: String,
    ) -> Self {
        Self {
            port,
            mode,
            index,
            device,
            term: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ChannelStats::new()),
        }
    }

    /// Establish a known-empty starting state: discard queued output, give
    /// in-flight bytes a moment to clear, then drop whatever arrived.
    fn flush(&mut self) {
        self.port.discard_output();
        thread::sleep(FLUSH_SETTLE);
        self.port.drain_input();
    }

    pub fn mode(&self) -> EventMode {
        self.mode
    }

    /// Position within the strategy group; parameterizes generated payloads.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Device identifier, for log and error context.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Shared handle to this channel's published statistics.
    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }

    /// Shared handle to this channel's termination flag.
    pub fn termination(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.term)
    }

    /// Cooperative cancellation check; polled once per worker loop
    /// iteration.
    pub fn should_stop(&self) -> bool {
        self.term.load(Ordering::Relaxed)
    }

    pub fn input_fd(&self) -> BorrowedFd<'_> {
        self.port.input_fd()
    }

    pub fn output_fd(&self) -> BorrowedFd<'_> {
        self.port.output_fd()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    /// Publish the running average for this channel, in ns/byte.
    pub fn publish_avg(&self, ns_per_byte: u64) {
        self.stats.publish_avg(ns_per_byte);
    }

    /// Count one verified round trip.
    pub fn record_event(&self) {
        self.stats.record_event();
    }
}

impl Drop for Channel {
    /// Best-effort teardown; also runs during shutdown and setup rollback.
    fn drop(&mut self) {
        self.port.discard_output();
        self.port.drain_input();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TestStrategy;

    fn loopback_spec() -> ChannelSpec {
        ChannelSpec {
            strategy: TestStrategy::ParallelSingle,
            mode: EventMode::ThreeByte,
            device: port::LOOPBACK_DEVICE.to_string(),
        }
    }

    #[test]
    fn test_open_flushes_to_empty() {
        let mut channel = Channel::open(&loopback_spec(), 0, 3).unwrap();

        // A fresh channel must have no pending input.
        let mut buf = [0u8; 3];
        channel.write(&[0x90, 1, 0x7e]).unwrap();
        assert_eq!(channel.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x90, 1, 0x7e]);
    }

    #[test]
    fn test_termination_flag_roundtrip() {
        let channel = Channel::open(&loopback_spec(), 0, 3).unwrap();
        assert!(!channel.should_stop());

        channel.termination().store(true, Ordering::Relaxed);
        assert!(channel.should_stop());
    }

    #[test]
    fn test_stats_handle_is_shared() {
        let channel = Channel::open(&loopback_spec(), 0, 3).unwrap();
        let stats = channel.stats();

        channel.record_event();
        channel.publish_avg(321);
        assert_eq!(stats.events(), 1);
        assert_eq!(stats.avg_ns_per_byte(), 321);
    }
}
