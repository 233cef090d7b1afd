//! Parallel single-event worker.
//!
//! One thread per channel, keeping exactly one event in flight at steady
//! state. The credit refill loop probes output readiness with a zero
//! timeout so the in-flight depth invariant is never traded for a blocking
//! write. The first 200 completed round trips are warm-up: deltas are still
//! validated, but nothing is accumulated or published until the pipeline
//! has reached steady state.

use tracing::{debug, error};

use super::{
    await_input, probe_output, read_and_verify, write_event, EventRing, RunningAverage,
    WorkerError, ECHO_TIMEOUT_MS, SINGLE_IN_FLIGHT, SINGLE_WARMUP_EVENTS,
};
use crate::channel::Channel;
use crate::timing::{delta_ns, monotonic_now};

/// Drive one channel until termination is requested or it fails.
pub fn run(chan: &mut Channel) -> Result<(), WorkerError> {
    match drive(chan) {
        Ok(()) => {
            debug!("channel {}: single-event worker stopping", chan.device());
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
    let mut avg = RunningAverage::new(SINGLE_WARMUP_EVENTS, chan.mode().payload_len());
    let mut credit = SINGLE_IN_FLIGHT;

    while !chan.should_stop() {
        while credit > 0 && probe_output(chan.output_fd())? {
            ring.mark_sent(monotonic_now()?);
            write_event(chan, ring.head_event().as_bytes())?;
            ring.advance_head();
            credit -= 1;
        }
        debug_assert_eq!(credit + ring.in_flight(), SINGLE_IN_FLIGHT);

        await_input(chan.input_fd(), ECHO_TIMEOUT_MS)?;
        ring.mark_received(monotonic_now()?);
        read_and_verify(chan, ring.tail_event().as_bytes())?;
        chan.record_event();

        let slot = ring.slot(ring.tail());
        let delta = delta_ns(slot.sent_at, slot.received_at)?;
        ring.advance_tail();
        credit += 1;

        if let Some(published) = avg.record(delta) {
            chan.publish_avg(published);
        }
    }
    Ok(())
}
