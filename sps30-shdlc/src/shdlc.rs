//! SHDLC framing and the serial transport.
//!
//! MOSI frames are `0x7E addr cmd len data.. chk 0x7E`, MISO frames
//! carry an additional state byte after the command. The checksum is
//! the inverted byte sum of everything between the delimiters, and
//! 0x7E/0x7D/0x11/0x13 inside the frame body are byte-stuffed.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use serial2::SerialPort;

use crate::{Error, ShdlcCommand};

const FRAME_DELIMITER: u8 = 0x7e;
const ESCAPE: u8 = 0x7d;

/// Byte written on the wire to bring the sensor out of sleep before
/// the wake command is framed and sent.
const WAKE_PULSE: u8 = 0xff;

// Minimum MISO frame body: addr, cmd, state, len, chk.
const MIN_MISO_BODY: usize = 5;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("missing frame delimiter")]
    MissingDelimiter,
    #[error("frame shorter than the fixed header")]
    TooShort,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("checksum mismatch")]
    Checksum,
    #[error("payload length does not match the length field")]
    LengthMismatch,
}

/// Opaque command/response channel the device layer runs on.
pub trait ShdlcTransport {
    fn execute<C: ShdlcCommand>(&mut self, command: &C) -> Result<Vec<u8>, Error>;

    /// Raw wake pulse, sent outside any frame.
    fn wake_pulse(&mut self) -> Result<(), Error>;
}

fn stuff(byte: u8, out: &mut Vec<u8>) {
    match byte {
        0x7e => out.extend_from_slice(&[ESCAPE, 0x5e]),
        0x7d => out.extend_from_slice(&[ESCAPE, 0x5d]),
        0x11 => out.extend_from_slice(&[ESCAPE, 0x31]),
        0x13 => out.extend_from_slice(&[ESCAPE, 0x33]),
        byte => out.push(byte),
    }
}

fn unstuff(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(0x5e) => out.push(0x7e),
            Some(0x5d) => out.push(0x7d),
            Some(0x31) => out.push(0x11),
            Some(0x33) => out.push(0x13),
            _ => return Err(FrameError::InvalidEscape),
        }
    }
    Ok(out)
}

fn checksum(content: &[u8]) -> u8 {
    !content.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Encodes one MOSI frame, delimiters included.
pub fn encode_mosi(address: u8, opcode: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![FRAME_DELIMITER];
    let mut content = Vec::with_capacity(3 + data.len());
    content.push(address);
    content.push(opcode);
    content.push(data.len() as u8);
    content.extend_from_slice(data);
    for &byte in &content {
        stuff(byte, &mut frame);
    }
    stuff(checksum(&content), &mut frame);
    frame.push(FRAME_DELIMITER);
    frame
}

/// Decoded MISO frame.
#[derive(Debug, PartialEq, Eq)]
pub struct MisoFrame {
    pub address: u8,
    pub opcode: u8,
    pub state: u8,
    pub data: Vec<u8>,
}

impl MisoFrame {
    /// Rejects frames where the device signalled a command error.
    pub fn into_data(self) -> Result<Vec<u8>, Error> {
        if self.state != 0 {
            return Err(Error::DeviceState(self.state));
        }
        Ok(self.data)
    }
}

/// Decodes the first complete MISO frame found in `raw`. Leading noise
/// and stray delimiters before the frame are skipped.
pub fn decode_miso(raw: &[u8]) -> Result<MisoFrame, FrameError> {
    let mut start = raw
        .iter()
        .position(|&byte| byte == FRAME_DELIMITER)
        .ok_or(FrameError::MissingDelimiter)?;
    while raw.get(start + 1) == Some(&FRAME_DELIMITER) {
        start += 1;
    }
    let end = raw[start + 1..]
        .iter()
        .position(|&byte| byte == FRAME_DELIMITER)
        .map(|offset| start + 1 + offset)
        .ok_or(FrameError::MissingDelimiter)?;

    let body = unstuff(&raw[start + 1..end])?;
    if body.len() < MIN_MISO_BODY {
        return Err(FrameError::TooShort);
    }
    let (content, check) = body.split_at(body.len() - 1);
    if checksum(content) != check[0] {
        return Err(FrameError::Checksum);
    }
    let data = content[4..].to_vec();
    if data.len() != content[3] as usize {
        return Err(FrameError::LengthMismatch);
    }
    Ok(MisoFrame {
        address: content[0],
        opcode: content[1],
        state: content[2],
        data,
    })
}

fn frame_complete(raw: &[u8]) -> bool {
    let Some(start) = raw.iter().position(|&byte| byte == FRAME_DELIMITER) else {
        return false;
    };
    raw[start + 1..]
        .iter()
        .enumerate()
        .any(|(offset, &byte)| byte == FRAME_DELIMITER && offset >= MIN_MISO_BODY)
}

/// Transport over a real serial port. The port is acquired on
/// [`open`](SerialLink::open) and released when the link is dropped,
/// on every exit path.
pub struct SerialLink {
    port: SerialPort,
    address: u8,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32, address: u8) -> Result<Self, Error> {
        let port = SerialPort::open(path, baud_rate).map_err(Error::Open)?;
        Ok(Self { port, address })
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;
        let mut raw = Vec::new();
        let mut buffer = [0u8; 64];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            self.port.set_read_timeout(deadline - now)?;
            match self.port.read(&mut buffer) {
                Ok(0) => return Err(Error::Timeout),
                Ok(read) => {
                    raw.extend_from_slice(&buffer[..read]);
                    if frame_complete(&raw) {
                        return Ok(raw);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(Error::Timeout),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(Error::Timeout),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ShdlcTransport for SerialLink {
    fn execute<C: ShdlcCommand>(&mut self, command: &C) -> Result<Vec<u8>, Error> {
        let frame = encode_mosi(self.address, command.opcode(), command.data());
        log::trace!("tx {:02x?}", frame);
        self.port.discard_buffers()?;
        self.port.write_all(&frame)?;

        let raw = self.read_frame(command.response_timeout())?;
        log::trace!("rx {:02x?}", raw);
        let data = decode_miso(&raw)?.into_data()?;
        if data.len() > command.max_response_length() {
            return Err(Error::ResponseTooLong {
                max: command.max_response_length(),
                got: data.len(),
            });
        }
        std::thread::sleep(command.settle_time());
        Ok(data)
    }

    fn wake_pulse(&mut self) -> Result<(), Error> {
        self.port.write_all(&[WAKE_PULSE])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MOSI frame for "start measurement" from the SPS30 datasheet.
    #[test]
    fn encodes_start_measurement_frame() {
        let frame = encode_mosi(0x00, 0x00, &[0x01, 0x03]);
        assert_eq!(frame, [0x7e, 0x00, 0x00, 0x02, 0x01, 0x03, 0xf9, 0x7e]);
    }

    #[test]
    fn encodes_read_measured_values_frame() {
        let frame = encode_mosi(0x00, 0x03, &[]);
        assert_eq!(frame, [0x7e, 0x00, 0x03, 0x00, 0xfc, 0x7e]);
    }

    #[test]
    fn stuffs_reserved_bytes() {
        let frame = encode_mosi(0x00, 0xd0, &[0x7e, 0x7d, 0x11, 0x13]);
        // No plain reserved byte may appear between the delimiters.
        let body = &frame[1..frame.len() - 1];
        assert!(!body.contains(&0x7e));
        assert!(!body.contains(&0x11));
        assert!(!body.contains(&0x13));
        let decoded = unstuff(body).unwrap();
        assert_eq!(&decoded[3..7], &[0x7e, 0x7d, 0x11, 0x13]);
    }

    #[test]
    fn decodes_empty_response_frame() {
        let frame = decode_miso(&[0x7e, 0x00, 0x00, 0x00, 0x00, 0xff, 0x7e]).unwrap();
        assert_eq!(
            frame,
            MisoFrame {
                address: 0x00,
                opcode: 0x00,
                state: 0x00,
                data: vec![],
            }
        );
    }

    #[test]
    fn decodes_frame_with_payload_and_leading_noise() {
        // Stray bytes and an extra delimiter before the actual frame.
        let raw = [0xaa, 0x7e, 0x7e, 0x00, 0x03, 0x00, 0x02, 0x12, 0x34, 0xb4, 0x7e];
        let frame = decode_miso(&raw).unwrap();
        assert_eq!(frame.opcode, 0x03);
        assert_eq!(frame.data, vec![0x12, 0x34]);
    }

    #[test]
    fn unstuffs_escaped_payload() {
        // Payload byte 0x13 arrives as 0x7d 0x33.
        let check = checksum(&[0x00, 0x03, 0x00, 0x01, 0x13]);
        let raw = [0x7e, 0x00, 0x03, 0x00, 0x01, 0x7d, 0x33, check, 0x7e];
        let frame = decode_miso(&raw).unwrap();
        assert_eq!(frame.data, vec![0x13]);
    }

    #[test]
    fn rejects_bad_checksum() {
        let raw = [0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7e];
        assert_eq!(decode_miso(&raw), Err(FrameError::Checksum));
    }

    #[test]
    fn rejects_length_field_mismatch() {
        let content = [0x00u8, 0x03, 0x00, 0x05, 0x12, 0x34];
        let mut raw = vec![0x7e];
        raw.extend_from_slice(&content);
        raw.push(checksum(&content));
        raw.push(0x7e);
        assert_eq!(decode_miso(&raw), Err(FrameError::LengthMismatch));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert_eq!(
            decode_miso(&[0x7e, 0x00, 0x00, 0x7e]),
            Err(FrameError::TooShort)
        );
        assert_eq!(decode_miso(&[0x00]), Err(FrameError::MissingDelimiter));
    }

    #[test]
    fn device_state_is_a_command_error() {
        let frame = MisoFrame {
            address: 0,
            opcode: 0x03,
            state: 0x43,
            data: vec![],
        };
        assert!(matches!(frame.into_data(), Err(Error::DeviceState(0x43))));
    }

    #[test]
    fn frame_is_complete_once_both_delimiters_arrived() {
        assert!(!frame_complete(&[0x7e, 0x00, 0x00]));
        assert!(!frame_complete(&[0x7e, 0x7e]));
        assert!(frame_complete(&[
            0x7e, 0x00, 0x00, 0x00, 0x00, 0xff, 0x7e
        ]));
    }
}
