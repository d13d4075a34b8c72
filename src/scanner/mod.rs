//! BLE scanner abstraction for hydrometer advertisements.
//!
//! A backend opens a listen window and streams [`RawAdvertisement`]s through
//! a channel. The caller bounds the window; closing the receiver stops the
//! scan and lets the backend release the adapter.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::RawAdvertisement;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error, e.g. the radio is unavailable
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for advertisements within one window.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Future returned by [`Scanner::start_scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + 'a>>;

/// Source of advertisements, abstracted so the scheduler can be tested
/// without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    /// Open a listen window.
    ///
    /// Advertisements arrive on the returned receiver until it is closed or
    /// dropped, which stops the scan.
    fn start_scan(&self) -> ScanFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Scanner that opens windows on the compiled-in backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner {
    pub backend: Backend,
}

impl RealScanner {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

impl Scanner for RealScanner {
    fn start_scan(&self) -> ScanFuture<'_> {
        Box::pin(async move {
            match self.backend {
                #[cfg(feature = "bluer")]
                Backend::Bluer => bluer::start_scan().await,
                #[cfg(feature = "hci")]
                Backend::Hci => hci::start_scan().await,
            }
        })
    }
}
