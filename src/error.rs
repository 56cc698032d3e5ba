//! Fault taxonomy shared across the crate
//!
//! Per-card faults (`Decode`, `Validation`) are recoverable at the capture
//! loop; `Link` faults end the in-progress device operation; `Format` faults
//! end the affected file load only.

use thiserror::Error;

/// Errors raised by the capture, persistence and decoding pipeline.
#[derive(Debug, Error)]
pub enum Fault {
    /// Bad caller input (track mask, filename suffix, out-of-range slot).
    /// Raised before any I/O happens.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// Device link framing mismatch or non-response.
    #[error("device link fault: {0}")]
    Link(String),

    /// Structural violation in a persisted .mag file.
    #[error("capture file fault: {0}")]
    Format(String),

    /// Biphase demodulation could not classify the next interval pair.
    #[error("biphase decode fault: {0}")]
    Decode(String),

    /// Sentinel, mirror or checksum mismatch in a decoded bitstream.
    #[error("payload validation fault: {0}")]
    Validation(String),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Fault {
    /// True for faults scoped to a single card or track; the capture loop
    /// reports these and keeps going.
    pub fn is_per_card(&self) -> bool {
        matches!(self, Fault::Decode(_) | Fault::Validation(_))
    }
}
