//! Per-channel arithmetic mean over a batch of readings.

use sps30_shdlc::{Measurement, CHANNEL_COUNT};

/// Channel means in wire order. Sums are accumulated in f64 so large
/// batches do not drift.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AveragedReading(pub [f64; CHANNEL_COUNT]);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot average an empty batch of readings")]
pub struct EmptyBatch;

pub fn average(readings: &[Measurement]) -> Result<AveragedReading, EmptyBatch> {
    if readings.is_empty() {
        return Err(EmptyBatch);
    }
    let mut sums = [0.0f64; CHANNEL_COUNT];
    for reading in readings {
        for (sum, value) in sums.iter_mut().zip(reading.channels()) {
            *sum += f64::from(value);
        }
    }
    let count = readings.len() as f64;
    for sum in &mut sums {
        *sum /= count;
    }
    Ok(AveragedReading(sums))
}
