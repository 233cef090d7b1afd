//! Lock-free per-channel statistics publication.
//!
//! Each channel's worker is the only writer of its statistics pair and the
//! reporting loop is the only reader, so plain atomic store/fetch-add/load
//! with relaxed ordering is sufficient. The two fields are individually
//! atomic with no ordering guaranteed between them; a reporting tick may
//! observe an average one event ahead of the counter, which is acceptable
//! for a monitoring display.

use std::sync::atomic::{AtomicU64, Ordering};

/// Published running statistics for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    avg_ns_per_byte: AtomicU64,
    events: AtomicU64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the current running average, in nanoseconds per byte.
    /// Called only by the owning worker.
    pub fn publish_avg(&self, ns_per_byte: u64) {
        self.avg_ns_per_byte.store(ns_per_byte, Ordering::Relaxed);
    }

    /// Count one verified round trip. Called only by the owning worker.
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest published running average in nanoseconds per byte.
    pub fn avg_ns_per_byte(&self) -> u64 {
        self.avg_ns_per_byte.load(Ordering::Relaxed)
    }

    /// Cumulative verified round trips.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_overwrites() {
        let stats = ChannelStats::new();
        assert_eq!(stats.avg_ns_per_byte(), 0);

        stats.publish_avg(1200);
        stats.publish_avg(900);
        assert_eq!(stats.avg_ns_per_byte(), 900);
    }

    #[test]
    fn test_event_counter_accumulates() {
        let stats = ChannelStats::new();
        for _ in 0..5 {
            stats.record_event();
        }
        assert_eq!(stats.events(), 5);
    }

    #[test]
    fn test_cross_thread_visibility() {
        use std::sync::Arc;

        let stats = Arc::new(ChannelStats::new());
        let writer = {
            let stats = Arc::clone(&stats);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_event();
                }
                stats.publish_avg(777);
            })
        };
        writer.join().unwrap();

        assert_eq!(stats.events(), 1000);
        assert_eq!(stats.avg_ns_per_byte(), 777);
    }
}
