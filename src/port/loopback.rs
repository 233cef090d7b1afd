//! Pipe-based loopback port.
//!
//! Bytes written to the output side appear verbatim on the input side, so a
//! loopback channel echoes every event with near-zero latency. Used for
//! hardware-free runs (device identifier `loopback`) and throughout the
//! test suite.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, IntoRawFd};

use anyhow::{bail, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::DuplexPort;

/// Default pipe capacity on Linux; the loopback's equivalent of a device
/// output buffer.
const PIPE_CAPACITY: usize = 65536;

/// A duplex port whose output feeds its own input.
pub struct LoopbackPort {
    reader: File,
    writer: File,
}

impl LoopbackPort {
    /// Create a fresh loopback with room for `max_in_flight_bytes`.
    pub fn open(max_in_flight_bytes: usize) -> Result<Self> {
        if max_in_flight_bytes > PIPE_CAPACITY {
            bail!(
                "in-flight window of {max_in_flight_bytes} bytes exceeds the \
                 {PIPE_CAPACITY}-byte pipe capacity"
            );
        }
        let (reader, writer) = os_pipe::pipe()?;
        Ok(Self::from_pair(reader, writer))
    }

    /// Build a loopback from an existing pipe pair.
    ///
    /// Exposed so tests can keep a cloned write handle for fault injection.
    pub fn from_pair(reader: os_pipe::PipeReader, writer: os_pipe::PipeWriter) -> Self {
        // SAFETY: into_raw_fd transfers sole ownership of each descriptor.
        let reader = unsafe { File::from_raw_fd(reader.into_raw_fd()) };
        let writer = unsafe { File::from_raw_fd(writer.into_raw_fd()) };
        Self { reader, writer }
    }
}

impl DuplexPort for LoopbackPort {
    fn input_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    fn output_fd(&self) -> BorrowedFd<'_> {
        self.writer.as_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn discard_output(&mut self) {
        // Pipe writes are already "sent"; nothing queued on the output side.
    }

    fn drain_input(&mut self) {
        // The pipe descriptors are blocking, so probe before each read.
        let mut scratch = [0u8; 64];
        loop {
            let mut fds = [PollFd::new(self.reader.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(n) if n > 0 => {
                    let readable = fds[0]
                        .revents()
                        .map_or(false, |r| r.contains(PollFlags::POLLIN));
                    if !readable || self.reader.read(&mut scratch).unwrap_or(0) == 0 {
                        break;
                    }
                }
                _ => break,
            }
        }
    }
}
