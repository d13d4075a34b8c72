//! Duty-cycled scan loop.
//!
//! Each cycle opens one bounded listen window, decodes and calibrates every
//! advertisement as it arrives, keeps the latest reading per identity, then
//! publishes those readings and sleeps. Failures are logged and counted;
//! nothing short of the shutdown signal ends the loop.

use crate::advertisement::{Hex, RawAdvertisement};
use crate::beacon::BeaconFamily;
use crate::codec::{self, Decoded};
use crate::config::Config;
use crate::output::{self, PublishError, Publisher, json};
use crate::reading::CalibratedReading;
use crate::scanner::{ScanError, Scanner};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Latest reading per identity within one window.
pub type Readings = BTreeMap<BeaconFamily, CalibratedReading>;

/// Scheduler states. `Stopped` is only reached through the shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scanning,
    Draining,
    Sleeping,
    Stopped,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub advertisements: usize,
    pub decoded: usize,
    pub malformed: usize,
    pub published: usize,
    pub publish_failures: usize,
}

/// Counters accumulated across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub cycles: u64,
    pub readings_published: u64,
    pub publish_failures: u64,
    pub malformed: u64,
    pub radio_failures: u64,
}

pub struct Scheduler<'a> {
    config: &'a Config,
    scanner: &'a dyn Scanner,
    publisher: &'a dyn Publisher,
    stats: Stats,
}

impl<'a> Scheduler<'a> {
    pub fn new(config: &'a Config, scanner: &'a dyn Scanner, publisher: &'a dyn Publisher) -> Self {
        Self {
            config,
            scanner,
            publisher,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Run cycles until `shutdown` completes.
    ///
    /// Shutdown interrupts both the listen window and the sleep.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut state = CycleState::Idle;
        let mut pending = Readings::new();
        let mut report = CycleReport::default();

        loop {
            tracing::debug!(?state, "scheduler state");
            state = match state {
                CycleState::Idle => CycleState::Scanning,
                CycleState::Scanning => {
                    report = CycleReport::default();
                    let outcome = tokio::select! {
                        _ = &mut shutdown => None,
                        result = self.listen(&mut report) => Some(result),
                    };
                    match outcome {
                        None => CycleState::Stopped,
                        Some(Ok(readings)) => {
                            pending = readings;
                            CycleState::Draining
                        }
                        Some(Err(err)) => {
                            self.radio_failed(&err);
                            CycleState::Sleeping
                        }
                    }
                }
                CycleState::Draining => {
                    self.drain(std::mem::take(&mut pending), &mut report);
                    CycleState::Sleeping
                }
                CycleState::Sleeping => {
                    tokio::select! {
                        _ = &mut shutdown => CycleState::Stopped,
                        _ = tokio::time::sleep(self.config.sleep_interval) => CycleState::Scanning,
                    }
                }
                CycleState::Stopped => {
                    tracing::info!(stats = ?self.stats, "scheduler stopped");
                    return;
                }
            };
        }
    }

    /// Scan and publish once, without sleeping.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ScanError> {
        let mut report = CycleReport::default();
        let readings = match self.listen(&mut report).await {
            Ok(readings) => readings,
            Err(err) => {
                self.radio_failed(&err);
                return Err(err);
            }
        };
        self.drain(readings, &mut report);
        Ok(report)
    }

    /// Keep one listen window open and collect the latest reading per identity.
    async fn listen(&self, report: &mut CycleReport) -> Result<Readings, ScanError> {
        let mut adverts = self.scanner.start_scan().await?;
        let deadline = Instant::now()
            .checked_add(self.config.scan_window)
            .unwrap_or_else(far_future);
        let mut latest = Readings::new();

        loop {
            match tokio::time::timeout_at(deadline, adverts.recv()).await {
                Ok(Some(adv)) => {
                    self.process(&adv, &mut latest, report);
                    if self.expected_seen(&latest) {
                        tracing::debug!("all expected hydrometers seen, closing window early");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("scanner ended the window early");
                    break;
                }
                Err(_elapsed) => break,
            }
        }

        // Stops the backend's scan
        adverts.close();
        Ok(latest)
    }

    fn process(&self, adv: &RawAdvertisement, latest: &mut Readings, report: &mut CycleReport) {
        report.advertisements += 1;

        match codec::decode_advertisement(adv) {
            Ok(Decoded::Measurement(raw)) => {
                let reading = self.config.calibration.calibrate(&raw, adv);
                tracing::debug!(
                    identity = %reading.family,
                    address = %reading.address,
                    specific_gravity = reading.specific_gravity,
                    temperature = reading.temperature_celsius,
                    "decoded reading"
                );
                report.decoded += 1;
                latest.insert(raw.family, reading);
            }
            Ok(Decoded::Announcement(text)) => {
                tracing::info!(address = %adv.address, "hydrometer {text}");
            }
            Ok(Decoded::Unrecognized) => {}
            Err(err) => {
                report.malformed += 1;
                let bytes: Vec<String> = adv
                    .manufacturer_data
                    .iter()
                    .map(|(company_id, data)| format!("{company_id:04x}:{}", Hex(data)))
                    .collect();
                tracing::warn!(
                    %err,
                    address = %adv.address,
                    data = %bytes.join(" "),
                    "malformed hydrometer payload"
                );
            }
        }
    }

    fn expected_seen(&self, latest: &Readings) -> bool {
        let expected = &self.config.expected;
        !expected.is_empty() && expected.iter().all(|identity| latest.contains_key(identity))
    }

    fn publish(&self, identity: BeaconFamily, reading: &CalibratedReading) -> Result<String, PublishError> {
        let topic = output::topic(identity, &self.config.pill_name);
        let payload = json::to_json(reading)?;
        self.publisher.publish(&topic, &payload)?;
        Ok(topic)
    }

    /// Publish every reading of the window; one failure never stops the rest.
    fn drain(&mut self, readings: Readings, report: &mut CycleReport) {
        for (identity, reading) in &readings {
            match self.publish(*identity, reading) {
                Ok(topic) => {
                    report.published += 1;
                    tracing::info!(
                        %topic,
                        specific_gravity = format_args!("{:.4}", reading.specific_gravity),
                        temperature = format_args!("{:.1}", reading.temperature_celsius),
                        calibrated = self.config.calibration.is_calibrated(*identity),
                        "published reading"
                    );
                }
                Err(err) => {
                    report.publish_failures += 1;
                    tracing::warn!(%err, %identity, "failed to publish reading");
                }
            }
        }

        self.stats.cycles += 1;
        self.stats.readings_published += report.published as u64;
        self.stats.publish_failures += report.publish_failures as u64;
        self.stats.malformed += report.malformed as u64;

        tracing::info!(
            advertisements = report.advertisements,
            readings = readings.len(),
            published = report.published,
            malformed = report.malformed,
            stats = ?self.stats,
            "scan cycle complete"
        );
    }

    fn radio_failed(&mut self, err: &ScanError) {
        self.stats.cycles += 1;
        self.stats.radio_failures += 1;
        tracing::warn!(
            %err,
            retry_in = ?self.config.sleep_interval,
            "could not open BLE listen window"
        );
    }
}

/// Deadline for windows too long to represent; about 30 years out.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
