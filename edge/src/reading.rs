use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One sample as transmitted to the ingestor. The server adds the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub adc_value: u8,
    pub voltage: f64,
    pub temperature_c: f64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// A bad sample. The tick is skipped and the loop carries on.
    #[error("recoverable sensor error: {0}")]
    Recoverable(String),

    /// The sensor handle is unusable. The loop stops and releases the source.
    #[error("fatal sensor error: {0}")]
    Fatal(String),
}

/// Produces one reading per tick.
pub trait ReadingSource: Send {
    fn read(&mut self) -> Result<Reading, SourceError>;

    /// Releases the underlying device. Called exactly once when the loop exits.
    fn close(&mut self) {}
}
