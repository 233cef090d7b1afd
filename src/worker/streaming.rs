//! Parallel streaming-block worker.
//!
//! One thread per channel with a deep pipeline: eight events in flight to
//! simulate sustained streaming load. Timestamping is sparse to keep the
//! measurement overhead out of the pipeline: stamps are taken only at ring
//! indices that are multiples of 512, and each sampled completion measures
//! back to the previous sampled send stamp, divided by the interval to
//! yield an estimated per-event latency. The estimate assumes steady
//! inter-event pacing; it is not an exact per-event measurement.

use tracing::{debug, error};

use super::{
    await_input, probe_output, read_and_verify, write_event, EventRing, RunningAverage,
    SparseWindow, WorkerError, ECHO_TIMEOUT_MS, SAMPLE_INTERVAL, STREAMING_IN_FLIGHT,
};
use crate::channel::Channel;
use crate::timing::{delta_ns, monotonic_now};

/// Drive one channel until termination is requested or it fails.
pub fn run(chan: &mut Channel) -> Result<(), WorkerError> {
    match drive(chan) {
        Ok(()) => {
            debug!("channel {}: streaming worker stopping", chan.device());
            Ok(())
        }
        Err(err) => {
            error!("channel {}: {err}; stopping worker", chan.device());
            Err(err)
        }
    }
}

fn drive(chan: &mut Channel) -> Result<(), WorkerError> {
    let mut ring = EventRing::new(chan.mode(), chan.index());
    let mut avg = RunningAverage::new(0, chan.mode().payload_len());
    let mut window = SparseWindow::new();
    let mut credit = STREAMING_IN_FLIGHT;

    while !chan.should_stop() {
        while credit > 0 && probe_output(chan.output_fd())? {
            if SparseWindow::is_sample_index(ring.head()) {
                ring.mark_sent(monotonic_now()?);
            }
            write_event(chan, ring.head_event().as_bytes())?;
            ring.advance_head();
            credit -= 1;
        }
        debug_assert!(credit + ring.in_flight() == STREAMING_IN_FLIGHT);

        await_input(chan.input_fd(), ECHO_TIMEOUT_MS)?;
        if SparseWindow::is_sample_index(ring.tail()) {
            ring.mark_received(monotonic_now()?);
        }
        read_and_verify(chan, ring.tail_event().as_bytes())?;
        chan.record_event();

        let completed = ring.tail();
        ring.advance_tail();
        credit += 1;

        if let Some(anchor) = window.complete(completed) {
            let delta = delta_ns(
                ring.slot(anchor).sent_at,
                ring.slot(completed).received_at,
            )?;
            if let Some(published) = avg.record(delta / SAMPLE_INTERVAL as u64) {
                chan.publish_avg(published);
            }
        }
    }
    Ok(())
}
