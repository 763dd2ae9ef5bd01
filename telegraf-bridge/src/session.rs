//! One acquisition cycle against the sensor, driven as an explicit
//! state machine.
//!
//! Wake, stop and sleep command failures are tolerated and logged; a
//! failed serial number read, a failed measurement read or a failed
//! port open abort the cycle. The serial link for wake through the
//! read loop is released before stop and sleep each reopen the port,
//! mirroring how the sensor expects to be shut down after a burst of
//! reads.

use std::time::Duration;

use sps30_shdlc::{Measurement, ShdlcTransport, Sps30};

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub warmup: Duration,
    pub read_delay: Duration,
    pub readings: u32,
    /// Log firmware version and product type once per cycle (-vvv).
    pub device_info_dump: bool,
}

/// Result of one completed cycle: the device identity and the raw
/// reading batch, ready for averaging.
#[derive(Debug)]
pub struct Acquisition {
    pub sensor_id: String,
    pub readings: Vec<Measurement>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to open the serial port: {0}")]
    Connect(#[source] sps30_shdlc::Error),
    #[error("failed to read the sensor serial number: {0}")]
    Identify(#[source] sps30_shdlc::Error),
    #[error("measurement read failed: {0}")]
    Read(#[source] sps30_shdlc::Error),
}

enum State<T: ShdlcTransport> {
    Idle,
    Waking(Sps30<T>),
    Starting(Sps30<T>, String),
    WarmingUp(Sps30<T>, String),
    Reading(Sps30<T>, String, Vec<Measurement>),
    Stopping(String, Vec<Measurement>),
    Sleeping(String, Vec<Measurement>),
    Done(Acquisition),
    Aborted(CycleError),
}

/// Runs one full wake → read → stop → sleep cycle. `open` is called
/// once for the acquisition phase and once each for stop and sleep.
pub fn run_cycle<T, F>(config: &SessionConfig, mut open: F) -> Result<Acquisition, CycleError>
where
    T: ShdlcTransport,
    F: FnMut() -> Result<T, sps30_shdlc::Error>,
{
    let mut state = State::Idle;
    loop {
        state = match state {
            State::Idle => match open() {
                Ok(link) => State::Waking(Sps30::new(link)),
                Err(e) => State::Aborted(CycleError::Connect(e)),
            },
            State::Waking(mut device) => {
                log::debug!("waking device");
                if let Err(e) = device.wake() {
                    log::warn!("something went wrong while waking up the sensor: {e}");
                }
                match device.serial_number() {
                    Ok(sensor_id) => {
                        if config.device_info_dump {
                            dump_device_info(&mut device, &sensor_id);
                        }
                        State::Starting(device, sensor_id)
                    }
                    Err(e) => State::Aborted(CycleError::Identify(e)),
                }
            }
            State::Starting(mut device, sensor_id) => {
                log::debug!("starting up fan");
                if let Err(e) = device.start_measurement() {
                    log::error!("failed to start up fan: {e}");
                }
                State::WarmingUp(device, sensor_id)
            }
            State::WarmingUp(device, sensor_id) => {
                log::debug!("warmup for {:?}", config.warmup);
                std::thread::sleep(config.warmup);
                let batch = Vec::with_capacity(config.readings as usize);
                State::Reading(device, sensor_id, batch)
            }
            State::Reading(mut device, sensor_id, mut batch) => {
                log::debug!("reading");
                let mut failure = None;
                for _ in 0..config.readings {
                    match device.read_measurement() {
                        Ok(measurement) => {
                            log::debug!("measurement: {:?}", measurement.channels());
                            batch.push(measurement);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                    std::thread::sleep(config.read_delay);
                }
                // The acquisition link must be released before stop
                // reopens the port.
                drop(device);
                match failure {
                    None => State::Stopping(sensor_id, batch),
                    Some(e) => State::Aborted(CycleError::Read(e)),
                }
            }
            State::Stopping(sensor_id, batch) => match open() {
                Ok(link) => {
                    log::debug!("stopping device");
                    if let Err(e) = Sps30::new(link).stop_measurement() {
                        log::error!("failed to stop the sensor: {e}");
                    }
                    State::Sleeping(sensor_id, batch)
                }
                Err(e) => State::Aborted(CycleError::Connect(e)),
            },
            State::Sleeping(sensor_id, batch) => match open() {
                Ok(link) => {
                    log::debug!("putting device to sleep");
                    if let Err(e) = Sps30::new(link).sleep() {
                        log::error!("failed to put the sensor to sleep: {e}");
                    }
                    State::Done(Acquisition {
                        sensor_id,
                        readings: batch,
                    })
                }
                Err(e) => State::Aborted(CycleError::Connect(e)),
            },
            State::Done(acquisition) => return Ok(acquisition),
            State::Aborted(error) => return Err(error),
        };
    }
}

fn dump_device_info<T: ShdlcTransport>(device: &mut Sps30<T>, sensor_id: &str) {
    match device.version() {
        Ok(version) => log::debug!("version: {version}"),
        Err(e) => log::warn!("failed to read the device version: {e}"),
    }
    match device.product_type() {
        Ok(product) => log::debug!("product type: {product}"),
        Err(e) => log::warn!("failed to read the product type: {e}"),
    }
    log::debug!("serial number: {sensor_id}");
}
