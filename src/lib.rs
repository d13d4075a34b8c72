//! `hydrometer-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The scan loop lives in [`crate::scheduler`] and is
//! driven through [`crate::app`], where it can be tested deterministically
//! with an injected scanner and publisher.

pub mod advertisement;
pub mod app;
pub mod beacon;
pub mod calibration;
pub mod codec;
pub mod config;
pub mod output;
pub mod reading;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{MacAddress, RawAdvertisement};
pub use beacon::{BeaconFamily, TiltColor, classify};
pub use calibration::{Calibration, CalibrationEntry, parse_calibration};
pub use codec::{DecodeError, Decoded, RawMeasurement, decode_advertisement};
pub use config::{Config, parse_duration};
pub use output::{PublishError, Publisher};
pub use reading::CalibratedReading;
pub use scanner::{Backend, RealScanner, ScanError, Scanner};
pub use scheduler::{CycleReport, Scheduler, Stats};
