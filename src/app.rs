//! Core application runner for `hydrometer-listener`.
//!
//! This module is intentionally decoupled from process exit codes and from
//! the concrete radio and broker, so it can be tested deterministically.

use crate::beacon::BeaconFamily;
use crate::calibration::{Calibration, CalibrationArg, parse_calibration};
use crate::config::{Config, parse_duration};
use crate::output::{OutputKind, Publisher};
use crate::scanner::{Backend, ScanError, Scanner};
use crate::scheduler::Scheduler;
use clap::Parser;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "mqtt")]
use crate::output::mqtt::MqttSettings;

/// Listen for RAPT Pill and Tilt hydrometers and publish their readings.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Where readings are published
    #[arg(long, default_value_t, value_enum)]
    pub output: OutputKind,

    /// MQTT broker host
    #[arg(long, env = "MQTT_IP", default_value = "127.0.0.1")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    #[arg(long, default_value = "hydrometer-listener")]
    pub mqtt_client_id: String,

    /// Publish without the retain flag
    #[arg(long)]
    pub no_retain: bool,

    /// How long each listen window stays open.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = parse_duration, default_value = "75s")]
    pub scan_window: Duration,

    /// Idle time between listen windows
    #[arg(long, value_parser = parse_duration, default_value = "5m")]
    pub sleep_interval: Duration,

    /// Calibration offsets for a hydrometer, in specific gravity and °C.
    /// Format: --calibrate orange=0.002,-0.5 (or pill=...)
    #[arg(long = "calibrate", value_parser = parse_calibration, value_name = "IDENTITY=GRAVITY,TEMPERATURE")]
    pub calibrations: Vec<CalibrationArg>,

    /// Close the listen window early once this hydrometer has reported.
    /// May be given several times.
    #[arg(long = "expect", value_name = "IDENTITY")]
    pub expected: Vec<BeaconFamily>,

    /// Name used in the topic of RAPT Pill readings
    #[arg(long, default_value = "unknown")]
    pub pill_name: String,

    /// Run a single scan cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Verbose output, log every decoded advertisement
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn config(&self) -> Config {
        Config {
            scan_window: self.scan_window,
            sleep_interval: self.sleep_interval,
            expected: self.expected.iter().copied().collect(),
            pill_name: self.pill_name.clone(),
            calibration: Calibration::from_args(&self.calibrations),
        }
    }

    #[cfg(feature = "mqtt")]
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            credentials: self
                .mqtt_username
                .clone()
                .map(|username| (username, self.mqtt_password.clone().unwrap_or_default())),
            retain: !self.no_retain,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Run the scan loop until `shutdown` completes, or one cycle when `once` is set.
///
/// Only a single cycle can fail: the continuous loop logs radio and publish
/// failures and keeps going.
pub async fn run_with(
    config: &Config,
    once: bool,
    scanner: &dyn Scanner,
    publisher: &dyn Publisher,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    tracing::info!(
        scan_window = ?config.scan_window,
        sleep_interval = ?config.sleep_interval,
        expected = config.expected.len(),
        "starting hydrometer listener"
    );

    let mut scheduler = Scheduler::new(config, scanner, publisher);
    if once {
        scheduler.run_cycle().await?;
    } else {
        scheduler.run(shutdown).await;
    }
    Ok(())
}
