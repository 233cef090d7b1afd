//! Process-wide real-time tuning.
//!
//! Applied once by the orchestrator before any channel is opened: CPU
//! pinning, SCHED_RR scheduling, and the `/dev/cpu_dma_latency` floor. The
//! latency floor only holds while the requesting descriptor stays open, so
//! the returned guard keeps the file alive for the rest of the run.

use std::fs::OpenOptions;
use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::cli::BenchmarkConfiguration;

const CPU_DMA_LATENCY: &str = "/dev/cpu_dma_latency";

/// Holds tuning state that must persist for the duration of the run.
pub struct TuningGuard {
    _latency_floor: Option<std::fs::File>,
}

/// Apply the configured tuning knobs, in the order the kernel wants them:
/// affinity first, then scheduler class, then the latency floor.
pub fn apply(config: &BenchmarkConfiguration) -> Result<TuningGuard> {
    if let Some(cpu) = config.cpu_affinity {
        if !core_affinity::set_for_current(core_affinity::CoreId { id: cpu }) {
            bail!("failed to pin process to CPU {cpu}");
        }
        info!("pinned to CPU {cpu}");
    }

    if let Some(priority) = config.rt_priority {
        set_realtime_priority(priority)
            .with_context(|| format!("failed to set SCHED_RR priority {priority}"))?;
        info!("scheduling with SCHED_RR priority {priority}");
    }

    let latency_floor = match config.system_latency_us {
        Some(us) => Some(
            request_latency_floor(us)
                .with_context(|| format!("failed to request {us}us system latency floor"))?,
        ),
        None => None,
    };

    Ok(TuningGuard {
        _latency_floor: latency_floor,
    })
}

/// Switch the whole process to the SCHED_RR class.
fn set_realtime_priority(priority: i32) -> Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall on our own pid with a fully initialized param.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Ask the power-management layer to keep wakeup latency at or below `us`
/// microseconds. The request lasts as long as the returned file is open.
fn request_latency_floor(us: i32) -> Result<std::fs::File> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(CPU_DMA_LATENCY)
        .with_context(|| format!("opening {CPU_DMA_LATENCY}"))?;
    file.write_all(&us.to_ne_bytes())
        .with_context(|| format!("writing to {CPU_DMA_LATENCY}"))?;
    info!("holding system latency floor at {us}us");
    Ok(file)
}
