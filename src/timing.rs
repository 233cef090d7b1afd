//! Monotonic timestamps and checked delta arithmetic.
//!
//! All round-trip measurements are taken from `CLOCK_MONOTONIC_RAW`, which
//! is immune to NTP slewing. The delta calculation is shared by all three
//! worker strategies: the expected-echo poll already bounds a round trip to
//! one second, so a delta that still carries a seconds component (or an
//! out-of-range nanosecond component) indicates a clock or scheduling fault
//! and invalidates further measurement from that worker.

use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use thiserror::Error;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Timestamp capture or validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("monotonic clock read failed: {0}")]
    Clock(#[from] nix::Error),

    #[error("round trip spanned {secs}s, expected sub-second completion")]
    SpansSeconds { secs: i64 },

    #[error("nanosecond delta {nsec} outside [0, 999999999]")]
    NanosOutOfRange { nsec: i64 },
}

/// Read the raw monotonic clock.
pub fn monotonic_now() -> Result<TimeSpec, TimingError> {
    Ok(clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)?)
}

/// Elapsed nanoseconds from `start` to `end`.
///
/// Borrows one second into the nanosecond field when `end` has fewer
/// nanoseconds than `start`, then rejects any result that is not a plain
/// sub-second nanosecond count.
pub fn delta_ns(start: TimeSpec, end: TimeSpec) -> Result<u64, TimingError> {
    let mut secs = end.tv_sec() - start.tv_sec();
    let mut nsec = end.tv_nsec() - start.tv_nsec();

    if nsec < 0 {
        nsec += NANOS_PER_SEC;
        secs -= 1;
    }

    if secs != 0 {
        return Err(TimingError::SpansSeconds { secs });
    }
    if !(0..NANOS_PER_SEC).contains(&nsec) {
        return Err(TimingError::NanosOutOfRange { nsec });
    }

    Ok(nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: i64, nsec: i64) -> TimeSpec {
        TimeSpec::new(sec, nsec)
    }

    #[test]
    fn test_delta_borrows_across_second_boundary() {
        assert_eq!(delta_ns(ts(5, 999_999_900), ts(6, 100)).unwrap(), 200);
    }

    #[test]
    fn test_delta_same_second() {
        assert_eq!(delta_ns(ts(7, 1_000), ts(7, 4_500)).unwrap(), 3_500);
        assert_eq!(delta_ns(ts(7, 0), ts(7, 0)).unwrap(), 0);
    }

    #[test]
    fn test_delta_rejects_multi_second_round_trip() {
        assert_eq!(
            delta_ns(ts(5, 0), ts(6, 500)),
            Err(TimingError::SpansSeconds { secs: 1 })
        );
        assert_eq!(
            delta_ns(ts(5, 999_999_999), ts(7, 0)),
            Err(TimingError::SpansSeconds { secs: 1 })
        );
    }

    #[test]
    fn test_delta_rejects_backwards_time() {
        // end < start borrows into a negative seconds component
        assert_eq!(
            delta_ns(ts(5, 100), ts(5, 50)),
            Err(TimingError::SpansSeconds { secs: -1 })
        );
        assert_eq!(
            delta_ns(ts(9, 0), ts(8, 0)),
            Err(TimingError::SpansSeconds { secs: -1 })
        );
    }

    #[test]
    fn test_monotonic_now_advances() {
        let a = monotonic_now().unwrap();
        let b = monotonic_now().unwrap();
        assert!(b >= a);
    }
}
