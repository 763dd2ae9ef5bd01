//! Daemon entry point: runs the acquisition cycle on a fixed cadence
//! and pushes the averaged batch to telegraf.

mod average;
mod config;
mod session;
mod telegraf;

use std::time::{Duration, Instant, SystemTime};

use clap::Parser;
use sps30_shdlc::SerialLink;

use config::Config;
use session::SessionConfig;
use telegraf::{Layout, Uploader};

fn main() {
    let config = Config::parse();
    pretty_env_logger::formatted_builder()
        .filter_level(config.log_level())
        .init();

    let uploader = match Uploader::new(&config.telegraf_address, config.dry_run) {
        Ok(uploader) => uploader,
        Err(e) => {
            log::error!("failed to set up the http client: {e}");
            return;
        }
    };
    let names = telegraf::channel_names(config.pm24);
    let layout = if config.pm_as_field {
        Layout::Combined
    } else {
        Layout::PerChannel
    };
    let session_config = SessionConfig {
        warmup: config.warmup(),
        read_delay: config.read_delay(),
        readings: config.num_measurements,
        device_info_dump: config.verbose >= 3,
    };

    loop {
        let started = Instant::now();
        run_once(&config, &session_config, &uploader, names, layout);
        if let Some(idle) = idle_time(config.cycle_interval(), started.elapsed()) {
            log::debug!("sleeping {:?} until the next cycle", idle);
            std::thread::sleep(idle);
        }
    }
}

/// One cycle: acquire, average, upload. Failures are logged and the
/// scheduler carries on with the next interval.
fn run_once(
    config: &Config,
    session_config: &SessionConfig,
    uploader: &Uploader,
    names: &'static [&'static str; sps30_shdlc::CHANNEL_COUNT],
    layout: Layout,
) {
    let open = || SerialLink::open(&config.port, config.baud_rate, config.slave_address);
    let acquisition = match session::run_cycle(session_config, open) {
        Ok(acquisition) => acquisition,
        Err(e) => {
            log::error!("acquisition cycle aborted: {e}");
            return;
        }
    };
    let averaged = match average::average(&acquisition.readings) {
        Ok(averaged) => averaged,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::debug!("{}: {:?}", acquisition.sensor_id, averaged.0);

    let timestamp = telegraf::upload_timestamp(SystemTime::now());
    let records = telegraf::format_records(
        &config.measurement,
        &config.location,
        &acquisition.sensor_id,
        names,
        &averaged,
        layout,
        timestamp,
    );
    uploader.upload(&records);
}

/// Remaining idle time in the current interval slot. `None` when the
/// cycle overran the interval; the overrun is absorbed, skipped slots
/// are not caught up.
fn idle_time(interval: Duration, elapsed: Duration) -> Option<Duration> {
    interval.checked_sub(elapsed).filter(|idle| !idle.is_zero())
}
