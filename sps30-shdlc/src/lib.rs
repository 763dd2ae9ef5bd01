//! Driver for the Sensirion SPS30 particulate matter sensor over its
//! SHDLC serial interface.
//!
//! The crate is split into the transport layer ([`shdlc`]) and the
//! device layer ([`sps30`]). The [`ShdlcTransport`] trait is the seam
//! between them: the device wrapper only needs something that can run
//! one command/response round trip, so tests drive it with a scripted
//! transport instead of a serial port.

pub mod shdlc;
pub mod sps30;

pub use shdlc::{FrameError, SerialLink, ShdlcTransport};
pub use sps30::{Measurement, Sps30, Version, CHANNEL_COUNT};

use std::time::Duration;

/// One SHDLC command: opcode, payload and the timing the device
/// requires around the round trip.
pub trait ShdlcCommand {
    fn opcode(&self) -> u8;

    fn data(&self) -> &[u8] {
        &[]
    }

    /// How long to wait for the response frame.
    fn response_timeout(&self) -> Duration;

    /// Upper bound on the response payload size.
    fn max_response_length(&self) -> usize;

    /// Delay the device needs after the response before it accepts the
    /// next command.
    fn settle_time(&self) -> Duration;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open serial port: {0}")]
    Open(#[source] std::io::Error),
    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for a response frame")]
    Timeout,
    #[error("malformed response frame: {0}")]
    Frame(#[from] FrameError),
    #[error("device rejected the command with state 0x{0:02x}")]
    DeviceState(u8),
    #[error("response payload too long: {got} bytes, at most {max} expected")]
    ResponseTooLong { max: usize, got: usize },
    #[error("unexpected response payload length: {got} bytes, {expected} expected")]
    PayloadLength { expected: usize, got: usize },
}
