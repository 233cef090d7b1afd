//! Serialized round-robin worker.
//!
//! One thread drives the whole group of up to 16 channels in configuration
//! order with exactly one event in flight across the group at any instant.
//! The pass counter doubles as the generator position index, so the status
//! toggle alternates each full pass. A failure on any channel stops the
//! whole group: the channels share one thread and one pass counter, so no
//! per-channel recovery is possible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use super::{await_input, read_and_verify, write_event, RunningAverage, WorkerError, ECHO_TIMEOUT_MS};
use crate::channel::Channel;
use crate::message::generate;
use crate::timing::{delta_ns, monotonic_now};

/// The serialized strategy's channel group and its shared controls.
pub struct SerializedGroup {
    pub channels: Vec<Channel>,
    /// Pause after each event before moving to the next channel.
    pub delay: Duration,
    /// Group-wide termination flag, checked once per pass.
    pub term: Arc<AtomicBool>,
}

impl SerializedGroup {
    pub fn new(channels: Vec<Channel>, delay: Duration) -> Self {
        Self {
            channels,
            delay,
            term: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Drive the group until termination is requested or a channel fails.
pub fn run(group: &mut SerializedGroup) -> Result<(), WorkerError> {
    let mut averages: Vec<RunningAverage> = group
        .channels
        .iter()
        .map(|c| RunningAverage::new(0, c.mode().payload_len()))
        .collect();
    let mut pass: usize = 0;

    while !group.term.load(Ordering::Relaxed) {
        pass += 1;
        run_pass(&mut group.channels, &mut averages, pass, group.delay)?;
    }

    debug!("serialized group worker stopping after {pass} passes");
    Ok(())
}

/// One full round-robin pass over the group.
///
/// Separated from [`run`] so a single pass is directly exercisable: after
/// one pass over a perfect loopback, every channel has exactly one counted
/// event and a published average of `delta / payload_len`.
pub fn run_pass(
    channels: &mut [Channel],
    averages: &mut [RunningAverage],
    pass: usize,
    delay: Duration,
) -> Result<(), WorkerError> {
    for (chan, avg) in channels.iter_mut().zip(averages.iter_mut()) {
        if let Err(err) = round_trip(chan, avg, pass) {
            error!("channel {}: {err}; stopping serialized group", chan.device());
            return Err(err);
        }
        thread::sleep(delay);
    }
    Ok(())
}

/// One send/echo/account cycle on one channel.
fn round_trip(chan: &mut Channel, avg: &mut RunningAverage, pass: usize) -> Result<(), WorkerError> {
    let event = generate(chan.mode(), chan.index(), pass);

    let sent_at = monotonic_now()?;
    write_event(chan, event.as_bytes())?;

    await_input(chan.input_fd(), ECHO_TIMEOUT_MS)?;
    let received_at = monotonic_now()?;
    read_and_verify(chan, event.as_bytes())?;
    chan.record_event();

    let delta = delta_ns(sent_at, received_at)?;
    if let Some(published) = avg.record(delta) {
        chan.publish_avg(published);
    }
    Ok(())
}
