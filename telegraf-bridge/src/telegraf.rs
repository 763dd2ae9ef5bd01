//! Line-protocol formatting and the HTTP push to telegraf.

use std::time::{SystemTime, UNIX_EPOCH};

use sps30_shdlc::CHANNEL_COUNT;

use crate::average::AveragedReading;

pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = [
    "PM1.0", "PM2.5", "PM4.0", "PM10", "N_PM0.5", "N_PM1.0", "N_PM2.5", "N_PM4.0", "N_PM10",
    "avg_size",
];

// Some existing database schemas were created with a column called
// PM2.4 instead of PM2.5; the legacy table keeps feeding them.
pub const CHANNEL_NAMES_LEGACY: [&str; CHANNEL_COUNT] = [
    "PM1.0", "PM2.4", "PM4.0", "PM10", "N_PM0.5", "N_PM1.0", "N_PM2.5", "N_PM4.0", "N_PM10",
    "avg_size",
];

/// Channel name table for the lifetime of the process, selected once
/// at startup and never mutated.
pub fn channel_names(legacy_pm24: bool) -> &'static [&'static str; CHANNEL_COUNT] {
    if legacy_pm24 {
        &CHANNEL_NAMES_LEGACY
    } else {
        &CHANNEL_NAMES
    }
}

/// Upload timestamp in nanoseconds, truncated to whole seconds. The
/// sub-second part is always zero in the emitted records.
pub fn upload_timestamp(now: SystemTime) -> i64 {
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    seconds as i64 * 1_000_000_000
}

/// Layout of the emitted records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One record per channel, channel name in a `pm` tag.
    PerChannel,
    /// One record with every channel as a field.
    Combined,
}

/// Formats one averaged reading as line-protocol records:
/// `<measurement>[,<tag>=<value>]* <field>=<value>[,..] <unix_nanos>`.
pub fn format_records(
    measurement: &str,
    location: &str,
    sensor_id: &str,
    names: &[&str; CHANNEL_COUNT],
    reading: &AveragedReading,
    layout: Layout,
    timestamp: i64,
) -> Vec<String> {
    match layout {
        Layout::Combined => {
            let fields = names
                .iter()
                .zip(reading.0)
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(",");
            vec![format!(
                "{measurement},location={location},sensor_id={sensor_id} {fields} {timestamp}"
            )]
        }
        Layout::PerChannel => names
            .iter()
            .zip(reading.0)
            .map(|(name, value)| {
                format!(
                    "{measurement},location={location},sensor_id={sensor_id},pm={name} \
                     value={value} {timestamp}"
                )
            })
            .collect(),
    }
}

/// Pushes records to the telegraf HTTP listener. Each record is sent
/// independently; a failed send is logged and the remaining records
/// are still attempted.
pub struct Uploader {
    client: reqwest::blocking::Client,
    url: String,
    dry_run: bool,
}

impl Uploader {
    pub fn new(url: &str, dry_run: bool) -> Result<Self, reqwest::Error> {
        // Proxy environment variables must not redirect the push.
        let client = reqwest::blocking::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
            dry_run,
        })
    }

    pub fn upload(&self, records: &[String]) {
        for record in records {
            self.send(record);
        }
    }

    fn send(&self, record: &str) {
        log::info!("{record}");
        if self.dry_run {
            return;
        }
        match self.client.post(&self.url).body(record.to_owned()).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    log::debug!("http response code   : {status}");
                } else {
                    log::error!("telegraf rejected record {record}: {status}");
                }
                log::debug!("http response headers: {:?}", response.headers());
                match response.text() {
                    Ok(body) => log::debug!("http response content: {body}"),
                    Err(e) => log::debug!("failed to read the response body: {e}"),
                }
            }
            Err(e) => log::error!("failed to submit data string {record}: {e}"),
        }
    }
}
