//! Raw capture model: tick events, per-track transition intervals,
//! and the .mag persistence codec.

pub mod magfile;
pub mod record;

pub use magfile::SaveCounter;
pub use record::{CaptureRecord, TickEvent, Track, TrackSet};
