//! Device port abstraction.
//!
//! A port is one duplex byte-oriented connection under test: a pollable
//! input descriptor, a pollable output descriptor, and non-blocking byte
//! transfer between them. The workers only ever talk to this trait, so the
//! same measurement engine drives real rawmidi hardware and the pipe-based
//! loopback used for hardware-free runs and the test suite.

use std::io;
use std::os::fd::BorrowedFd;

use anyhow::{Context, Result};

pub mod loopback;
pub mod rawmidi;

pub use loopback::LoopbackPort;
pub use rawmidi::RawmidiPort;

/// One duplex device connection.
///
/// Implementations keep both directions open for the lifetime of the value
/// and release them on drop; a port is never half-open.
pub trait DuplexPort: Send {
    /// Pollable descriptor that signals readable input.
    fn input_fd(&self) -> BorrowedFd<'_>;

    /// Pollable descriptor that signals output buffer room.
    fn output_fd(&self) -> BorrowedFd<'_>;

    /// Non-blocking read of pending input bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Non-blocking write.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Best-effort discard of queued but unsent output. Must not fail
    /// loudly; runs during shutdown and rollback.
    fn discard_output(&mut self);

    /// Best-effort discard of pending input. Same teardown contract as
    /// [`DuplexPort::discard_output`].
    fn drain_input(&mut self);
}

/// Device identifier selecting the loopback port.
pub const LOOPBACK_DEVICE: &str = "loopback";

/// Open the port named by `device`.
///
/// `loopback` selects the pipe-based echo port; anything else is treated as
/// a rawmidi device, either a device node path (`/dev/snd/midiC1D0`) or an
/// ALSA-style `hw:CARD,DEV` name. `max_in_flight_bytes` is the in-flight
/// window the caller intends to keep queued; opening fails when the device
/// output buffer cannot guarantee it.
pub fn open(device: &str, max_in_flight_bytes: usize) -> Result<Box<dyn DuplexPort>> {
    if device == LOOPBACK_DEVICE {
        let port = LoopbackPort::open(max_in_flight_bytes)
            .context("failed to open loopback port")?;
        Ok(Box::new(port))
    } else {
        let port = RawmidiPort::open(device, max_in_flight_bytes)
            .with_context(|| format!("failed to open rawmidi device {device}"))?;
        Ok(Box::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_loopback() {
        let mut port = open(LOOPBACK_DEVICE, 3).unwrap();
        assert_eq!(port.write(&[0x90, 0x10, 0x6f]).unwrap(), 3);

        let mut buf = [0u8; 3];
        assert_eq!(port.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x90, 0x10, 0x6f]);
    }

    #[test]
    fn test_factory_rejects_missing_device() {
        assert!(open("/dev/snd/midiC200D0", 3).is_err());
    }
}
