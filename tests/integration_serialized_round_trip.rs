use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use rawmidi_bench::cli::{ChannelSpec, TestStrategy};
use rawmidi_bench::worker::serialized::{self, SerializedGroup};
use rawmidi_bench::worker::RunningAverage;
use rawmidi_bench::{Channel, EventMode};

fn loopback_spec(mode: EventMode) -> ChannelSpec {
    ChannelSpec {
        strategy: TestStrategy::Serialized,
        mode,
        device: "loopback".to_string(),
    }
}

fn open_group(count: usize, mode: EventMode) -> Vec<Channel> {
    (0..count)
        .map(|i| Channel::open(&loopback_spec(mode), i as u8, mode.payload_len()).unwrap())
        .collect()
}

/// One pass over two loopback channels in 3-byte mode: both event counters
/// hit exactly one and both publish `delta / 3`.
#[test]
fn serialized_single_pass_accounts_every_channel() {
    let mut channels = open_group(2, EventMode::ThreeByte);
    let mut averages: Vec<RunningAverage> = channels
        .iter()
        .map(|c| RunningAverage::new(0, c.mode().payload_len()))
        .collect();

    let started = Instant::now();
    serialized::run_pass(&mut channels, &mut averages, 1, Duration::ZERO).unwrap();
    let elapsed_ns = started.elapsed().as_nanos() as u64;

    for chan in &channels {
        let stats = chan.stats();
        assert_eq!(stats.events(), 1);
        let avg = stats.avg_ns_per_byte();
        assert!(avg > 0, "expected a published average, got {avg}");
        // One channel's round trip is bounded by the whole pass.
        assert!(
            avg * 3 <= elapsed_ns,
            "published {avg} ns/byte exceeds the {elapsed_ns} ns pass"
        );
    }
}

/// A full serialized run keeps all channels advancing until the group flag
/// is raised, then stops within one pending-wait timeout.
#[test]
fn serialized_group_runs_and_stops_cooperatively() {
    let channels = open_group(2, EventMode::TwoByte);
    let stats: Vec<_> = channels.iter().map(|c| c.stats()).collect();

    let mut group = SerializedGroup::new(channels, Duration::from_millis(1));
    let term = group.term.clone();
    let worker = thread::spawn(move || {
        let result = serialized::run(&mut group);
        (result, group)
    });

    thread::sleep(Duration::from_millis(60));
    term.store(true, Ordering::Relaxed);

    let joined_at = Instant::now();
    let (result, group) = worker.join().unwrap();
    assert!(result.is_ok());
    assert!(
        joined_at.elapsed() < Duration::from_secs(2),
        "worker exceeded the shutdown bound"
    );

    for stats in &stats {
        assert!(stats.events() >= 1);
        assert!(stats.avg_ns_per_byte() > 0);
    }
    drop(group);
}

/// The pass counter is the generator position index, so event counters of a
/// multi-pass run match the number of passes.
#[test]
fn serialized_pass_counter_drives_generation() {
    let mut channels = open_group(1, EventMode::OneByte);
    let mut averages = vec![RunningAverage::new(0, 1)];

    for pass in 1..=5 {
        serialized::run_pass(&mut channels, &mut averages, pass, Duration::ZERO).unwrap();
    }

    assert_eq!(channels[0].stats().events(), 5);
}
