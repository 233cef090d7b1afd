use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::message::EventMode;

/// Channels allowed per test strategy.
pub const MAX_CHANNELS_PER_STRATEGY: usize = 16;

/// rawmidi-bench - round-trip latency measurement for raw MIDI devices
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = LONG_ABOUT)]
pub struct Args {
    /// Channels to exercise, in column order: STRATEGY[.BYTES]:DEVICE
    /// (e.g. serialized.3:hw:1,0  single:/dev/snd/midiC2D0  streaming.1:loopback)
    #[clap(short = 't', long = "test", value_name = "SPEC", value_parser = parse_channel_spec, required = true)]
    pub tests: Vec<ChannelSpec>,

    /// Delay between events for the serialized strategy, in milliseconds
    #[clap(short = 'w', long, value_name = "MS", default_value_t = crate::defaults::EVENT_DELAY_MS, value_parser = clap::value_parser!(u64).range(1..=100))]
    pub event_delay_ms: u64,

    /// Minimum system latency written to /dev/cpu_dma_latency, in microseconds
    #[clap(short = 'l', long, value_name = "US", value_parser = clap::value_parser!(i32).range(0..=9999))]
    pub system_latency_us: Option<i32>,

    /// SCHED_RR realtime priority for the whole process
    #[clap(short = 'r', long, value_name = "PRIO", value_parser = clap::value_parser!(i32).range(1..=99))]
    pub rt_priority: Option<i32>,

    /// Pin the process to a single CPU
    #[clap(short = 'c', long, value_name = "CPU")]
    pub cpu: Option<usize>,

    /// Append events per second to each reported column
    #[clap(short = 'e', long, default_value_t = false)]
    pub events_per_second: bool,
}

const LONG_ABOUT: &str = "\
Measures round-trip latency of raw MIDI device channels under three load \
patterns. Each reported column corresponds to one --test spec, in the order \
given, and shows the running average round-trip time per byte in \
nanoseconds (optionally followed by /events-per-second).

Strategies: 'serialized' drives all its channels round-robin from one \
thread with a single event in flight across the group; 'single' keeps one \
event in flight per channel from a dedicated thread; 'streaming' keeps \
eight events in flight per channel. DEVICE is a rawmidi node path, an \
ALSA-style hw:CARD,DEV name, or 'loopback'.";

/// Worker execution strategy for one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestStrategy {
    /// One thread, round-robin over the group, one event in flight total.
    Serialized,
    /// One thread per channel, one event in flight per channel.
    ParallelSingle,
    /// One thread per channel, eight events in flight per channel.
    Streaming,
}

impl std::fmt::Display for TestStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStrategy::Serialized => write!(f, "serialized"),
            TestStrategy::ParallelSingle => write!(f, "single"),
            TestStrategy::Streaming => write!(f, "streaming"),
        }
    }
}

/// One (strategy, mode, device) test channel request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub strategy: TestStrategy,
    pub mode: EventMode,
    pub device: String,
}

/// Parse `STRATEGY[.BYTES]:DEVICE` into a channel spec.
fn parse_channel_spec(s: &str) -> Result<ChannelSpec, String> {
    let (selector, device) = s
        .split_once(':')
        .ok_or_else(|| format!("expected STRATEGY[.BYTES]:DEVICE, got '{s}'"))?;
    if device.is_empty() {
        return Err(format!("missing device in test spec '{s}'"));
    }

    let (strategy_name, bytes) = match selector.split_once('.') {
        Some((name, bytes)) => (name, bytes),
        None => (selector, "3"),
    };

    let strategy = match strategy_name {
        "serialized" | "serial" | "s" => TestStrategy::Serialized,
        "single" | "p" => TestStrategy::ParallelSingle,
        "streaming" | "stream" | "b" => TestStrategy::Streaming,
        other => return Err(format!("unknown test strategy '{other}'")),
    };

    let mode = match bytes {
        "3" => EventMode::ThreeByte,
        "2" => EventMode::TwoByte,
        "1" => EventMode::OneByte,
        other => return Err(format!("event size must be 1, 2 or 3 bytes, got '{other}'")),
    };

    Ok(ChannelSpec {
        strategy,
        mode,
        device: device.to_string(),
    })
}

/// Validated configuration handed to the benchmark core.
#[derive(Clone, Debug)]
pub struct BenchmarkConfiguration {
    /// Requested channels in column (command-line) order.
    pub channels: Vec<ChannelSpec>,
    /// Serialized-strategy pause between events.
    pub event_delay: Duration,
    pub system_latency_us: Option<i32>,
    pub rt_priority: Option<i32>,
    pub cpu_affinity: Option<usize>,
    pub show_event_rate: bool,
}

impl BenchmarkConfiguration {
    /// Build and validate the core configuration from parsed arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        for strategy in [
            TestStrategy::Serialized,
            TestStrategy::ParallelSingle,
            TestStrategy::Streaming,
        ] {
            let count = args.tests.iter().filter(|t| t.strategy == strategy).count();
            if count > MAX_CHANNELS_PER_STRATEGY {
                anyhow::bail!(
                    "{count} channels requested for the {strategy} strategy \
                     (maximum {MAX_CHANNELS_PER_STRATEGY})"
                );
            }
        }

        if let Some(cpu) = args.cpu {
            let cores = num_cpus::get();
            if cpu >= cores {
                anyhow::bail!("CPU {cpu} requested but only {cores} cores are present");
            }
        }

        Ok(Self {
            channels: args.tests.clone(),
            event_delay: Duration::from_millis(args.event_delay_ms),
            system_latency_us: args.system_latency_us,
            rt_priority: args.rt_priority,
            cpu_affinity: args.cpu,
            show_event_rate: args.events_per_second,
        })
    }
}
