//! SPS30 device operations on top of an SHDLC transport.

use std::time::Duration;

use crate::{Error, ShdlcCommand, ShdlcTransport};

/// Number of value channels in one measurement.
pub const CHANNEL_COUNT: usize = 10;

const MEASUREMENT_PAYLOAD: usize = CHANNEL_COUNT * 4;
const VERSION_PAYLOAD: usize = 7;

#[derive(Clone, Copy, Debug)]
pub enum Sps30Command {
    StartMeasurement,
    StopMeasurement,
    ReadMeasuredValues,
    Sleep,
    WakeUp,
    StartFanCleaning,
    ReadProductType,
    ReadSerialNumber,
    ReadVersion,
}

impl ShdlcCommand for Sps30Command {
    fn opcode(&self) -> u8 {
        match self {
            Self::StartMeasurement => 0x00,
            Self::StopMeasurement => 0x01,
            Self::ReadMeasuredValues => 0x03,
            Self::Sleep => 0x10,
            Self::WakeUp => 0x11,
            Self::StartFanCleaning => 0x56,
            Self::ReadProductType | Self::ReadSerialNumber => 0xd0,
            Self::ReadVersion => 0xd1,
        }
    }

    fn data(&self) -> &[u8] {
        match self {
            // IEEE754 float output format.
            Self::StartMeasurement => &[0x01, 0x03],
            Self::ReadProductType => &[0x00],
            Self::ReadSerialNumber => &[0x03],
            _ => &[],
        }
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn max_response_length(&self) -> usize {
        match self {
            Self::StartMeasurement | Self::ReadProductType | Self::ReadSerialNumber => 32,
            Self::ReadMeasuredValues => MEASUREMENT_PAYLOAD,
            Self::ReadVersion => VERSION_PAYLOAD,
            _ => 0,
        }
    }

    fn settle_time(&self) -> Duration {
        match self {
            Self::ReadMeasuredValues => Duration::from_millis(500),
            Self::StartFanCleaning => Duration::from_secs(15),
            Self::ReadProductType | Self::ReadSerialNumber | Self::ReadVersion => Duration::ZERO,
            _ => Duration::from_secs(2),
        }
    }
}

/// One measurement, parsed from the 40 byte response payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// Mass Concentration PM1.0 [μg/m³]
    pub mass_pm1_0: f32,
    /// Mass Concentration PM2.5 [μg/m³]
    pub mass_pm2_5: f32,
    /// Mass Concentration PM4.0 [μg/m³]
    pub mass_pm4_0: f32,
    /// Mass Concentration PM10 [μg/m³]
    pub mass_pm10: f32,
    /// Number Concentration PM0.5 [#/cm³]
    pub number_pm0_5: f32,
    /// Number Concentration PM1.0 [#/cm³]
    pub number_pm1_0: f32,
    /// Number Concentration PM2.5 [#/cm³]
    pub number_pm2_5: f32,
    /// Number Concentration PM4.0 [#/cm³]
    pub number_pm4_0: f32,
    /// Number Concentration PM10 [#/cm³]
    pub number_pm10: f32,
    /// Typical Particle Size [μm]
    pub typical_size: f32,
}

impl Measurement {
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        if payload.len() != MEASUREMENT_PAYLOAD {
            return Err(Error::PayloadLength {
                expected: MEASUREMENT_PAYLOAD,
                got: payload.len(),
            });
        }
        let channel = |index: usize| {
            let offset = index * 4;
            f32::from_be_bytes([
                payload[offset],
                payload[offset + 1],
                payload[offset + 2],
                payload[offset + 3],
            ])
        };
        Ok(Self {
            mass_pm1_0: channel(0),
            mass_pm2_5: channel(1),
            mass_pm4_0: channel(2),
            mass_pm10: channel(3),
            number_pm0_5: channel(4),
            number_pm1_0: channel(5),
            number_pm2_5: channel(6),
            number_pm4_0: channel(7),
            number_pm10: channel(8),
            typical_size: channel(9),
        })
    }

    /// Channel values in wire order.
    pub fn channels(&self) -> [f32; CHANNEL_COUNT] {
        [
            self.mass_pm1_0,
            self.mass_pm2_5,
            self.mass_pm4_0,
            self.mass_pm10,
            self.number_pm0_5,
            self.number_pm1_0,
            self.number_pm2_5,
            self.number_pm4_0,
            self.number_pm10,
            self.typical_size,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub hardware_revision: u8,
    pub shdlc_major: u8,
    pub shdlc_minor: u8,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "firmware {}.{}, hardware {}, SHDLC {}.{}",
            self.firmware_major,
            self.firmware_minor,
            self.hardware_revision,
            self.shdlc_major,
            self.shdlc_minor
        )
    }
}

pub struct Sps30<T>
where
    T: ShdlcTransport,
{
    link: T,
}

impl<T> Sps30<T>
where
    T: ShdlcTransport,
{
    pub fn new(link: T) -> Self {
        Self { link }
    }

    /// Wake pulse followed by the wake command. The pulse alone only
    /// powers the interface up, the framed command completes the wake.
    pub fn wake(&mut self) -> Result<(), Error> {
        self.link.wake_pulse()?;
        self.link.execute(&Sps30Command::WakeUp)?;
        Ok(())
    }

    pub fn start_measurement(&mut self) -> Result<(), Error> {
        self.link.execute(&Sps30Command::StartMeasurement)?;
        Ok(())
    }

    pub fn stop_measurement(&mut self) -> Result<(), Error> {
        self.link.execute(&Sps30Command::StopMeasurement)?;
        Ok(())
    }

    pub fn sleep(&mut self) -> Result<(), Error> {
        self.link.execute(&Sps30Command::Sleep)?;
        Ok(())
    }

    pub fn start_fan_cleaning(&mut self) -> Result<(), Error> {
        self.link.execute(&Sps30Command::StartFanCleaning)?;
        Ok(())
    }

    pub fn read_measurement(&mut self) -> Result<Measurement, Error> {
        let payload = self.link.execute(&Sps30Command::ReadMeasuredValues)?;
        Measurement::parse(&payload)
    }

    pub fn serial_number(&mut self) -> Result<String, Error> {
        let payload = self.link.execute(&Sps30Command::ReadSerialNumber)?;
        Ok(parse_ascii(&payload))
    }

    pub fn product_type(&mut self) -> Result<String, Error> {
        let payload = self.link.execute(&Sps30Command::ReadProductType)?;
        Ok(parse_ascii(&payload))
    }

    pub fn version(&mut self) -> Result<Version, Error> {
        let payload = self.link.execute(&Sps30Command::ReadVersion)?;
        if payload.len() != VERSION_PAYLOAD {
            return Err(Error::PayloadLength {
                expected: VERSION_PAYLOAD,
                got: payload.len(),
            });
        }
        Ok(Version {
            firmware_major: payload[0],
            firmware_minor: payload[1],
            hardware_revision: payload[3],
            shdlc_major: payload[5],
            shdlc_minor: payload[6],
        })
    }
}

// Null-terminated ASCII, as in the device information responses.
fn parse_ascii(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShdlcCommand;

    struct ScriptedLink {
        responses: Vec<Result<Vec<u8>, Error>>,
        executed: Vec<u8>,
        pulses: usize,
    }

    impl ScriptedLink {
        fn new(responses: Vec<Result<Vec<u8>, Error>>) -> Self {
            Self {
                responses,
                executed: Vec::new(),
                pulses: 0,
            }
        }
    }

    impl ShdlcTransport for ScriptedLink {
        fn execute<C: ShdlcCommand>(&mut self, command: &C) -> Result<Vec<u8>, Error> {
            self.executed.push(command.opcode());
            self.responses.remove(0)
        }

        fn wake_pulse(&mut self) -> Result<(), Error> {
            self.pulses += 1;
            Ok(())
        }
    }

    fn measurement_payload(channels: [f32; CHANNEL_COUNT]) -> Vec<u8> {
        channels.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn parses_measurement_in_wire_order() {
        let channels = [1.5, 2.5, 4.0, 10.0, 0.5, 1.0, 2.5, 4.0, 10.0, 0.65];
        let measurement = Measurement::parse(&measurement_payload(channels)).unwrap();
        assert_eq!(measurement.channels(), channels);
        assert_eq!(measurement.mass_pm2_5, 2.5);
        assert_eq!(measurement.typical_size, 0.65);
    }

    #[test]
    fn rejects_short_measurement_payload() {
        let result = Measurement::parse(&[0u8; 39]);
        assert!(matches!(
            result,
            Err(Error::PayloadLength {
                expected: 40,
                got: 39
            })
        ));
    }

    #[test]
    fn wake_sends_pulse_then_command() {
        let mut device = Sps30::new(ScriptedLink::new(vec![Ok(vec![])]));
        device.wake().unwrap();
        assert_eq!(device.link.pulses, 1);
        assert_eq!(device.link.executed, vec![0x11]);
    }

    #[test]
    fn reads_null_terminated_serial_number() {
        let mut device = Sps30::new(ScriptedLink::new(vec![Ok(b"5D3A6F21B8C90E74\0".to_vec())]));
        assert_eq!(device.serial_number().unwrap(), "5D3A6F21B8C90E74");
    }

    #[test]
    fn parses_version_payload() {
        let mut device = Sps30::new(ScriptedLink::new(vec![Ok(vec![2, 2, 0, 7, 0, 2, 0])]));
        let version = device.version().unwrap();
        assert_eq!(
            version,
            Version {
                firmware_major: 2,
                firmware_minor: 2,
                hardware_revision: 7,
                shdlc_major: 2,
                shdlc_minor: 0,
            }
        );
        assert_eq!(version.to_string(), "firmware 2.2, hardware 7, SHDLC 2.0");
    }

    #[test]
    fn command_table_matches_the_device_protocol() {
        assert_eq!(Sps30Command::StartMeasurement.opcode(), 0x00);
        assert_eq!(Sps30Command::StartMeasurement.data(), &[0x01, 0x03]);
        assert_eq!(Sps30Command::StopMeasurement.opcode(), 0x01);
        assert_eq!(Sps30Command::ReadMeasuredValues.opcode(), 0x03);
        assert_eq!(Sps30Command::Sleep.opcode(), 0x10);
        assert_eq!(Sps30Command::WakeUp.opcode(), 0x11);
        assert_eq!(Sps30Command::StartFanCleaning.opcode(), 0x56);
        assert_eq!(
            Sps30Command::StartFanCleaning.settle_time(),
            Duration::from_secs(15)
        );
        assert_eq!(Sps30Command::ReadSerialNumber.opcode(), 0xd0);
        assert_eq!(Sps30Command::ReadSerialNumber.data(), &[0x03]);
        assert_eq!(Sps30Command::ReadVersion.opcode(), 0xd1);
    }
}
