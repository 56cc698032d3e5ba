//! Decoding pipeline: biphase demodulation and payload validation.

pub mod biphase;
pub mod payload;

pub use payload::{CardProfile, PARKING1};

use crate::capture::{CaptureRecord, Track};
use crate::error::Fault;

/// Decoder applied to one track of a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Space-joined raw transition intervals.
    Raw,
    /// Biphase bitstream, unvalidated.
    F2fRaw,
    /// Biphase bitstream checked against the type 1 parking card profile.
    P1v,
}

impl Decoder {
    /// Parse a decoder selector. `none` maps to no decoder.
    pub fn from_name(name: &str) -> Result<Option<Self>, Fault> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(None),
            "raw" => Ok(Some(Decoder::Raw)),
            "f2fraw" => Ok(Some(Decoder::F2fRaw)),
            "p1v" => Ok(Some(Decoder::P1v)),
            other => Err(Fault::Parameter(format!("invalid decoder {other:?}"))),
        }
    }

    /// Run this decoder over one track of a capture.
    pub fn run(self, record: &CaptureRecord, track: Track) -> Result<String, Fault> {
        let intervals = record.track_intervals(track);
        match self {
            Decoder::Raw => Ok(intervals
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")),
            Decoder::F2fRaw => biphase::demodulate(intervals),
            Decoder::P1v => {
                let bitstream = biphase::demodulate(intervals)?;
                payload::validate(&bitstream, &PARKING1)
            }
        }
    }
}
