use std::time::Duration;

use clap::Parser;

/// Periodically wakes an SPS30 particulate matter sensor, averages a
/// batch of readings and pushes them to a telegraf HTTP listener.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the serial port device file
    #[clap(short, long, default_value = "/dev/ttyAMA0")]
    pub port: String,

    /// Serial communications port baud rate
    #[clap(short, long, default_value_t = 115200)]
    pub baud_rate: u32,

    /// Sensor slave address on the SHDLC bus
    #[clap(short = 'a', long, default_value_t = 0)]
    pub slave_address: u8,

    /// Number of measurements to perform and average
    #[clap(short, long, default_value_t = 20)]
    pub num_measurements: u32,

    /// Seconds to wait between measurement iterations
    #[clap(short, long, default_value_t = 1.0)]
    pub sleep_interval: f64,

    /// Seconds to wait for the fan to spin up before measuring
    #[clap(short, long, default_value_t = 20.0)]
    pub warmup_time: f64,

    /// Seconds between waking up and capturing data
    #[clap(short, long, default_value_t = 300)]
    pub interval: u64,

    /// Location tag attached to every record
    #[clap(short, long, default_value = "UnderStairs")]
    pub location: String,

    /// Measurement name used when submitting to telegraf
    #[clap(short, long, default_value = "sps30")]
    pub measurement: String,

    /// URL of the telegraf HTTP listener
    #[clap(short, long, default_value = "http://192.168.160.220:8090/telegraf")]
    pub telegraf_address: String,

    /// Read the sensor but do not actually send data to telegraf
    #[clap(short, long)]
    pub dry_run: bool,

    /// Backward compatibility: store PM2.5 values with a PM2.4 tag
    #[clap(long)]
    pub pm24: bool,

    /// Submit all sensor values as fields of one record instead of one
    /// record per channel with a "pm" tag
    #[clap(long)]
    pub pm_as_field: bool,

    /// Log verbosity, use -vvv for more logging
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u64,
}

impl Config {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs_f64(self.warmup_time)
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_interval)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_options() {
        let config = Config::parse_from(["sps30-telegraf"]);
        assert_eq!(config.port, "/dev/ttyAMA0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.num_measurements, 20);
        assert_eq!(config.interval, 300);
        assert_eq!(config.measurement, "sps30");
        assert!(!config.dry_run);
        assert!(!config.pm24);
        assert!(!config.pm_as_field);
        assert_eq!(config.log_level(), log::LevelFilter::Error);
    }

    #[test]
    fn verbosity_selects_the_log_level() {
        let config = Config::parse_from(["sps30-telegraf", "-v"]);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
        let config = Config::parse_from(["sps30-telegraf", "-vvv"]);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn durations_come_from_fractional_seconds() {
        let config = Config::parse_from(["sps30-telegraf", "-s", "0.5", "-w", "2.5"]);
        assert_eq!(config.read_delay(), Duration::from_millis(500));
        assert_eq!(config.warmup(), Duration::from_millis(2500));
    }
}
