//! Kernel rawmidi device port.
//!
//! Talks to the ALSA rawmidi character device (`/dev/snd/midiC<card>D<dev>`)
//! directly: one non-blocking open per direction, stream parameters
//! negotiated through the rawmidi param ioctl, pending data discarded
//! through the drop/drain ioctls. Input and output are separate file
//! handles so each direction has its own pollable descriptor and its own
//! kernel substream buffer.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;

use anyhow::{bail, Context, Result};

use super::DuplexPort;
use crate::defaults::OUTPUT_BUFFER_BYTES;

const STREAM_OUTPUT: libc::c_int = 0;
const STREAM_INPUT: libc::c_int = 1;

/// `no_active_sensing` bit of the param flags word.
const NO_ACTIVE_SENSING: libc::c_uint = 1;

/// Layout of `struct snd_rawmidi_params` from the kernel uapi
/// (`sound/asound.h`); the single C bitfield occupies bit 0 of `flags`.
#[repr(C)]
struct SndRawmidiParams {
    stream: libc::c_int,
    buffer_size: libc::size_t,
    avail_min: libc::size_t,
    flags: libc::c_uint,
    reserved: [u8; 16],
}

mod ioctl {
    use super::SndRawmidiParams;

    nix::ioctl_readwrite!(rawmidi_params, b'W', 0x10, SndRawmidiParams);
    nix::ioctl_write_ptr!(rawmidi_drop, b'W', 0x30, libc::c_int);
    nix::ioctl_write_ptr!(rawmidi_drain, b'W', 0x31, libc::c_int);
}

/// One rawmidi device, both directions open and negotiated.
#[derive(Debug)]
pub struct RawmidiPort {
    input: File,
    output: File,
}

impl RawmidiPort {
    /// Open `device` with room for `max_in_flight_bytes` of queued output.
    ///
    /// The output readiness threshold is set so poll wakes once the buffer
    /// can accept another full in-flight window; the input threshold is one
    /// byte so poll wakes on any data. Active-sensing injection is disabled
    /// in both directions. On any failure the already-opened direction is
    /// released before returning.
    pub fn open(device: &str, max_in_flight_bytes: usize) -> Result<Self> {
        if max_in_flight_bytes > OUTPUT_BUFFER_BYTES {
            bail!(
                "in-flight window of {max_in_flight_bytes} bytes exceeds the \
                 {OUTPUT_BUFFER_BYTES}-byte device output buffer"
            );
        }

        let path = device_node_path(device)?;

        let input = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .with_context(|| format!("opening {path} for input"))?;
        let output = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .with_context(|| format!("opening {path} for output"))?;

        negotiate(&input, STREAM_INPUT, 1)
            .with_context(|| format!("negotiating input parameters on {path}"))?;
        negotiate(
            &output,
            STREAM_OUTPUT,
            OUTPUT_BUFFER_BYTES - max_in_flight_bytes,
        )
        .with_context(|| format!("negotiating output parameters on {path}"))?;

        Ok(Self { input, output })
    }
}

impl DuplexPort for RawmidiPort {
    fn input_fd(&self) -> BorrowedFd<'_> {
        self.input.as_fd()
    }

    fn output_fd(&self) -> BorrowedFd<'_> {
        self.output.as_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn discard_output(&mut self) {
        let _ = unsafe { ioctl::rawmidi_drop(self.output.as_raw_fd(), &STREAM_OUTPUT) };
    }

    fn drain_input(&mut self) {
        let _ = unsafe { ioctl::rawmidi_drain(self.input.as_raw_fd(), &STREAM_INPUT) };

        // Sweep anything the reset left behind; stops at EAGAIN.
        let mut scratch = [0u8; 64];
        while matches!(self.input.read(&mut scratch), Ok(n) if n > 0) {}
    }
}

/// Negotiate one direction's stream parameters.
fn negotiate(file: &File, stream: libc::c_int, avail_min: usize) -> Result<()> {
    let mut params = SndRawmidiParams {
        stream,
        buffer_size: OUTPUT_BUFFER_BYTES,
        avail_min,
        flags: NO_ACTIVE_SENSING,
        reserved: [0; 16],
    };
    unsafe { ioctl::rawmidi_params(file.as_raw_fd(), &mut params) }
        .context("rawmidi params ioctl failed")?;
    Ok(())
}

/// Resolve a device identifier to its device node path.
///
/// Accepts a node path as-is, or an ALSA-style `hw:CARD[,DEV]` name.
fn device_node_path(device: &str) -> Result<String> {
    let Some(spec) = device.strip_prefix("hw:") else {
        return Ok(device.to_string());
    };

    let mut fields = spec.splitn(2, ',');
    let card: u32 = fields
        .next()
        .unwrap_or_default()
        .parse()
        .with_context(|| format!("bad card number in device name {device}"))?;
    let dev: u32 = match fields.next() {
        Some(d) => d
            .parse()
            .with_context(|| format!("bad device number in device name {device}"))?,
        None => 0,
    };

    Ok(format!("/dev/snd/midiC{card}D{dev}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_node_path_passthrough() {
        assert_eq!(
            device_node_path("/dev/snd/midiC1D0").unwrap(),
            "/dev/snd/midiC1D0"
        );
    }

    #[test]
    fn test_device_node_path_hw_names() {
        assert_eq!(device_node_path("hw:1,0").unwrap(), "/dev/snd/midiC1D0");
        assert_eq!(device_node_path("hw:2,3").unwrap(), "/dev/snd/midiC2D3");
        assert_eq!(device_node_path("hw:4").unwrap(), "/dev/snd/midiC4D0");
    }

    #[test]
    fn test_device_node_path_rejects_garbage() {
        assert!(device_node_path("hw:").is_err());
        assert!(device_node_path("hw:x,0").is_err());
        assert!(device_node_path("hw:0,y").is_err());
    }

    #[test]
    fn test_oversized_in_flight_window_rejected() {
        let err = RawmidiPort::open("hw:0,0", OUTPUT_BUFFER_BYTES + 1).unwrap_err();
        assert!(err.to_string().contains("in-flight window"));
    }
}
