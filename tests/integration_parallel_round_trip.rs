use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rawmidi_bench::cli::{ChannelSpec, TestStrategy};
use rawmidi_bench::stats::ChannelStats;
use rawmidi_bench::worker::{self, WorkerError, SAMPLE_INTERVAL, SINGLE_WARMUP_EVENTS};
use rawmidi_bench::{Channel, EventMode, LoopbackPort};

fn open_loopback(strategy: TestStrategy, mode: EventMode, index: u8) -> Channel {
    let spec = ChannelSpec {
        strategy,
        mode,
        device: "loopback".to_string(),
    };
    Channel::open(&spec, index, 8 * mode.payload_len()).unwrap()
}

/// Poll `stats` until `cond` holds or the deadline passes.
fn wait_for(stats: &Arc<ChannelStats>, cond: impl Fn(&ChannelStats) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond(stats) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn parallel_single_measures_and_stops_cooperatively() {
    let mut chan = open_loopback(TestStrategy::ParallelSingle, EventMode::ThreeByte, 0);
    let stats = chan.stats();
    let term = chan.termination();

    let handle = thread::spawn(move || worker::single::run(&mut chan));

    // Statistics appear only after the warm-up window has drained.
    assert!(
        wait_for(&stats, |s| s.avg_ns_per_byte() > 0),
        "no average published within the deadline"
    );
    assert!(stats.events() > SINGLE_WARMUP_EVENTS);

    term.store(true, Ordering::Relaxed);
    let joined_at = Instant::now();
    handle.join().unwrap().unwrap();
    assert!(
        joined_at.elapsed() < Duration::from_secs(2),
        "worker exceeded the shutdown bound"
    );
}

#[test]
fn streaming_publishes_after_sampled_windows() {
    let mut chan = open_loopback(TestStrategy::Streaming, EventMode::OneByte, 0);
    let stats = chan.stats();
    let term = chan.termination();

    let handle = thread::spawn(move || worker::streaming::run(&mut chan));

    assert!(
        wait_for(&stats, |s| s.avg_ns_per_byte() > 0),
        "no average published within the deadline"
    );
    // The first publication requires the discarded warm-up windows plus one
    // measured window of completions.
    assert!(stats.events() as usize >= 5 * SAMPLE_INTERVAL);

    term.store(true, Ordering::Relaxed);
    handle.join().unwrap().unwrap();
}

/// A corrupted echo kills only the affected channel's worker; the sibling
/// keeps measuring.
#[test]
fn payload_mismatch_is_fatal_to_one_channel_only() {
    let mut healthy = open_loopback(TestStrategy::ParallelSingle, EventMode::ThreeByte, 0);
    let healthy_stats = healthy.stats();
    let healthy_term = healthy.termination();

    // Build the faulty channel by hand so a cloned write handle can inject
    // a stray byte ahead of the first echo.
    let (reader, writer) = os_pipe::pipe().unwrap();
    let mut injector = writer.try_clone().unwrap();
    let port = Box::new(LoopbackPort::from_pair(reader, writer));
    let mut faulty = Channel::with_port(port, EventMode::ThreeByte, 1, "loopback".to_string());
    injector.write_all(&[0x55]).unwrap();

    let healthy_worker = thread::spawn(move || worker::single::run(&mut healthy));
    let faulty_worker = thread::spawn(move || worker::single::run(&mut faulty));

    let faulty_result = faulty_worker.join().unwrap();
    assert!(matches!(faulty_result, Err(WorkerError::DataMismatch)));

    // The healthy channel must still be advancing after its sibling died.
    let before = healthy_stats.events();
    assert!(
        wait_for(&healthy_stats, |s| s.events() > before),
        "healthy channel stopped advancing"
    );

    healthy_term.store(true, Ordering::Relaxed);
    healthy_worker.join().unwrap().unwrap();
}

#[test]
fn two_byte_mode_round_trips_cleanly() {
    let mut chan = open_loopback(TestStrategy::ParallelSingle, EventMode::TwoByte, 3);
    let stats = chan.stats();
    let term = chan.termination();

    let handle = thread::spawn(move || worker::single::run(&mut chan));
    assert!(wait_for(&stats, |s| s.events() > 50));

    term.store(true, Ordering::Relaxed);
    handle.join().unwrap().unwrap();
}
