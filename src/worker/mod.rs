//! Measurement workers and their shared machinery.
//!
//! The three execution strategies share one toolbox: a fixed-capacity ring
//! of in-flight event records, a warm-up-aware running average, a sparse
//! window sampler for the streaming strategy, poll helpers with the two
//! timeout disciplines (1 s expected-event wait, 0 ms write probe), and the
//! worker error taxonomy. Everything here is private to one worker thread;
//! only the published statistics cross thread boundaries.

use std::os::fd::BorrowedFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::time::TimeSpec;
use thiserror::Error;

use crate::message::{self, Event, EventMode, MAX_EVENT_LEN};
use crate::timing::TimingError;

pub mod serialized;
pub mod single;
pub mod streaming;

/// In-flight record ring capacity; a power of two so index advance is a
/// mask operation.
pub const RING_CAPACITY: usize = 8192;
const RING_MASK: usize = RING_CAPACITY - 1;

/// Maximum in-flight events for the parallel-single strategy.
pub const SINGLE_IN_FLIGHT: usize = 1;

/// Maximum in-flight events for the streaming strategy.
pub const STREAMING_IN_FLIGHT: usize = 8;

/// Completed round trips a parallel-single worker discards before it starts
/// accumulating statistics.
pub const SINGLE_WARMUP_EVENTS: u64 = 200;

/// Sampled windows a streaming worker discards before it starts
/// accumulating statistics.
pub const STREAMING_WARMUP_WINDOWS: u32 = 5;

/// Streaming strategy samples timestamps every this many ring indices.
pub const SAMPLE_INTERVAL: usize = 512;

/// Expected-echo wait bound in milliseconds.
pub const ECHO_TIMEOUT_MS: u16 = 1000;

/// Fatal worker conditions. Any of these stops the affected worker (for the
/// serialized strategy, the whole group); none are ever retried.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for echo")]
    ReceiveTimeout,

    #[error("device entered an error state")]
    DeviceError,

    #[error("short transfer: expected {expected} bytes, moved {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("echoed event does not match transmitted event")]
    DataMismatch,

    #[error("timing anomaly: {0}")]
    Timing(#[from] TimingError),
}

/// One in-flight event record.
pub struct EventSlot {
    pub event: Event,
    pub sent_at: TimeSpec,
    pub received_at: TimeSpec,
}

/// Fixed-capacity single-threaded ring of in-flight event records.
///
/// Slot payloads are generated once at construction; the generator repeats
/// with the ring period, so a slot's payload stays valid across wraps. Head
/// and tail always satisfy `0 <= head, tail < RING_CAPACITY`.
pub struct EventRing {
    slots: Vec<EventSlot>,
    head: usize,
    tail: usize,
}

impl EventRing {
    pub fn new(mode: EventMode, channel: u8) -> Self {
        let slots = (0..RING_CAPACITY)
            .map(|i| EventSlot {
                event: message::generate(mode, channel, i),
                sent_at: TimeSpec::new(0, 0),
                received_at: TimeSpec::new(0, 0),
            })
            .collect();
        Self {
            slots,
            head: 0,
            tail: 0,
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Events written but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        (self.head + RING_CAPACITY - self.tail) & RING_MASK
    }

    pub fn head_event(&self) -> &Event {
        &self.slots[self.head].event
    }

    pub fn tail_event(&self) -> &Event {
        &self.slots[self.tail].event
    }

    pub fn slot(&self, index: usize) -> &EventSlot {
        &self.slots[index]
    }

    /// Stamp the send time of the event about to go out at the head.
    pub fn mark_sent(&mut self, at: TimeSpec) {
        self.slots[self.head].sent_at = at;
    }

    /// Stamp the receive time of the event expected at the tail.
    pub fn mark_received(&mut self, at: TimeSpec) {
        self.slots[self.tail].received_at = at;
    }

    pub fn advance_head(&mut self) {
        self.head = (self.head + 1) & RING_MASK;
    }

    pub fn advance_tail(&mut self) {
        self.tail = (self.tail + 1) & RING_MASK;
    }
}

/// Warm-up-aware running average in nanoseconds per byte.
///
/// Samples recorded during the warm-up window are dropped entirely; once
/// warm, each sample updates the running sum and the published value is
/// `sum / (samples * payload_len)`.
pub struct RunningAverage {
    warmup_left: u64,
    sum: u64,
    samples: u64,
    payload_len: u64,
}

impl RunningAverage {
    pub fn new(warmup: u64, payload_len: usize) -> Self {
        Self {
            warmup_left: warmup,
            sum: 0,
            samples: 0,
            payload_len: payload_len as u64,
        }
    }

    /// Fold in one per-event latency sample. Returns the new publishable
    /// average once past warm-up, `None` while still warming.
    pub fn record(&mut self, delta_ns: u64) -> Option<u64> {
        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return None;
        }
        self.sum += delta_ns;
        self.samples += 1;
        Some(self.sum / (self.samples * self.payload_len))
    }
}

/// Sparse sampling state for the streaming strategy.
///
/// Timestamps exist only at ring indices that are multiples of
/// [`SAMPLE_INTERVAL`]. Each sampled completion measures back to the send
/// stamp of the previous sampled index, so the first sampled completion can
/// only anchor, and the configured number of warm-up windows is discarded
/// before any measurement is released.
pub struct SparseWindow {
    warmup_left: u32,
    anchor: Option<usize>,
}

impl SparseWindow {
    pub fn new() -> Self {
        Self {
            warmup_left: STREAMING_WARMUP_WINDOWS,
            anchor: None,
        }
    }

    /// True when `index` is one of the sparse timestamp points.
    pub fn is_sample_index(index: usize) -> bool {
        index & (SAMPLE_INTERVAL - 1) == 0
    }

    /// Register the completion of ring index `index`. Returns the previous
    /// sampled index to measure from when this completion should produce a
    /// latency sample.
    pub fn complete(&mut self, index: usize) -> Option<usize> {
        if !Self::is_sample_index(index) {
            return None;
        }
        let prev = self.anchor.replace(index);
        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return None;
        }
        prev
    }
}

impl Default for SparseWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Block up to `timeout_ms` for readable input on `fd`.
///
/// Timeout, device error state, and poll failure are all fatal; the caller
/// is entitled to read after `Ok`.
pub(crate) fn await_input(fd: BorrowedFd<'_>, timeout_ms: u16) -> Result<(), WorkerError> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::from(timeout_ms))
        .map_err(|e| WorkerError::Io(e.into()))?;
    if ready < 1 {
        return Err(WorkerError::ReceiveTimeout);
    }

    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
        return Err(WorkerError::DeviceError);
    }
    if !revents.contains(PollFlags::POLLIN) {
        return Err(WorkerError::DeviceError);
    }
    Ok(())
}

/// Zero-timeout probe for output room on `fd`.
///
/// `Ok(true)` when another write can be issued immediately; `Ok(false)`
/// when the buffer has no room yet. Never blocks.
pub(crate) fn probe_output(fd: BorrowedFd<'_>) -> Result<bool, WorkerError> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
    let ready = poll(&mut fds, PollTimeout::ZERO).map_err(|e| WorkerError::Io(e.into()))?;
    if ready < 1 {
        return Ok(false);
    }

    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
        return Err(WorkerError::DeviceError);
    }
    Ok(revents.contains(PollFlags::POLLOUT))
}

/// Write one event and require the full payload to be accepted.
pub(crate) fn write_event(
    chan: &mut crate::channel::Channel,
    bytes: &[u8],
) -> Result<(), WorkerError> {
    let written = chan.write(bytes)?;
    if written != bytes.len() {
        return Err(WorkerError::ShortTransfer {
            expected: bytes.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Read one event and verify it against the `expected` payload.
pub(crate) fn read_and_verify(
    chan: &mut crate::channel::Channel,
    expected: &[u8],
) -> Result<(), WorkerError> {
    let mut buf = [0u8; MAX_EVENT_LEN];
    let len = expected.len();
    let got = chan.read(&mut buf[..len])?;
    if got != len {
        return Err(WorkerError::ShortTransfer {
            expected: len,
            actual: got,
        });
    }
    if buf[..len] != *expected {
        return Err(WorkerError::DataMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::generate;

    #[test]
    fn test_ring_indices_stay_in_bounds() {
        let mut ring = EventRing::new(EventMode::ThreeByte, 0);
        for _ in 0..(3 * RING_CAPACITY + 17) {
            ring.advance_head();
            ring.advance_tail();
            assert!(ring.head() < RING_CAPACITY);
            assert!(ring.tail() < RING_CAPACITY);
        }
        assert_eq!(ring.head(), 17 & RING_MASK);
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_ring_wraps_to_zero() {
        let mut ring = EventRing::new(EventMode::OneByte, 0);
        for _ in 0..RING_CAPACITY {
            ring.advance_head();
        }
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_ring_in_flight_tracks_gap() {
        let mut ring = EventRing::new(EventMode::ThreeByte, 1);
        for expected in 1..=8 {
            ring.advance_head();
            assert_eq!(ring.in_flight(), expected);
        }
        ring.advance_tail();
        assert_eq!(ring.in_flight(), 7);
    }

    #[test]
    fn test_ring_slots_hold_generated_payloads() {
        let ring = EventRing::new(EventMode::TwoByte, 4);
        for i in [0, 1, 127, 128, 8191] {
            assert_eq!(ring.slot(i).event, generate(EventMode::TwoByte, 4, i));
        }
    }

    #[test]
    fn test_running_average_discards_warmup() {
        let mut avg = RunningAverage::new(SINGLE_WARMUP_EVENTS, 3);
        for _ in 0..SINGLE_WARMUP_EVENTS {
            assert_eq!(avg.record(9_000), None);
        }
        // The 201st completion triggers the first publication.
        assert_eq!(avg.record(9_000), Some(9_000 / 3));
    }

    #[test]
    fn test_running_average_divides_by_samples_and_bytes() {
        let mut avg = RunningAverage::new(0, 2);
        assert_eq!(avg.record(1_000), Some(500));
        assert_eq!(avg.record(3_000), Some(1_000));
    }

    #[test]
    fn test_sparse_window_sampling_law() {
        let mut window = SparseWindow::new();
        let mut published = Vec::new();

        for index in 0..3 * RING_CAPACITY {
            let index = index & RING_MASK;
            if let Some(prev) = window.complete(index) {
                published.push((prev, index));
            }
        }

        // Five sampled windows (anchor included) discarded; the sixth
        // sampled completion produces the first measurement.
        assert_eq!(published.first(), Some(&(2048, 2560)));
        assert_eq!(published.get(1), Some(&(2560, 3072)));
    }

    #[test]
    fn test_sparse_window_sample_indices() {
        assert!(SparseWindow::is_sample_index(0));
        assert!(SparseWindow::is_sample_index(512));
        assert!(SparseWindow::is_sample_index(7680));
        assert!(!SparseWindow::is_sample_index(1));
        assert!(!SparseWindow::is_sample_index(511));
        assert!(!SparseWindow::is_sample_index(513));
    }

    #[test]
    fn test_no_sample_before_first_interval_completes() {
        let mut window = SparseWindow::new();
        for index in 0..SAMPLE_INTERVAL {
            assert_eq!(window.complete(index), None);
        }
    }
}
