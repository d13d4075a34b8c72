//! Line-oriented publisher for piping and dry runs.

use super::{PublishError, Publisher};
use std::io::Write;
use std::sync::Mutex;

/// Writes one `<topic> <payload>` line per reading.
pub struct WritePublisher<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> WritePublisher<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> Publisher for WritePublisher<W> {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| PublishError::Bus("output lock poisoned".into()))?;
        writeln!(out, "{topic} {payload}")?;
        out.flush()?;
        Ok(())
    }
}
