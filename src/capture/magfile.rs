//! .mag capture file codec
//!
//! Layout (the compatibility contract, little-endian throughout):
//! a 4-byte tick count, then one 8-byte record per tick holding the track
//! mask shifted into bits 4..6 of an i32 and the cumulative time since the
//! first tick as an f32, at 150 internal ticks per second. File size is
//! exactly `4 + tickcount * 8` bytes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::record::{CaptureRecord, TickEvent};
use crate::error::Fault;

/// Internal reader ticks per second of cumulative time.
pub const TICKS_PER_SECOND: f32 = 150.0;

/// Required capture file suffix.
pub const MAG_SUFFIX: &str = ".mag";

const MASK_SHIFT: i32 = 4;
const MASK_BITS: i32 = 0x07;
const MAX_INTERVAL: u32 = 0x1FF;

fn check_suffix(path: &Path) -> Result<(), Fault> {
    let name = path.to_string_lossy();
    if !name.ends_with(MAG_SUFFIX) {
        return Err(Fault::Parameter(format!(
            "filename must end with a {MAG_SUFFIX} extension: {name}"
        )));
    }
    Ok(())
}

/// Write a capture record to a .mag file.
pub fn save(record: &CaptureRecord, path: &Path) -> Result<(), Fault> {
    check_suffix(path)?;
    let mut buf = Vec::with_capacity(4 + record.tick_count() * 8);
    buf.extend_from_slice(&(record.tick_count() as i32).to_le_bytes());
    let mut elapsed = 0f32;
    for event in record.events() {
        elapsed += event.interval as f32 / TICKS_PER_SECOND;
        buf.extend_from_slice(&((event.toggles as i32) << MASK_SHIFT).to_le_bytes());
        buf.extend_from_slice(&elapsed.to_le_bytes());
    }
    fs::write(path, buf)?;
    Ok(())
}

/// Load a capture record from a .mag file, reconstructing the original
/// tick intervals from the cumulative timestamps.
pub fn load(path: &Path) -> Result<CaptureRecord, Fault> {
    check_suffix(path)?;
    let data = fs::read(path)?;
    if data.len() < 4 {
        return Err(Fault::Format("file too short for tick count".into()));
    }
    let count = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if count < 0 || data.len() != 4 + count as usize * 8 {
        return Err(Fault::Format("file length mismatch".into()));
    }

    let mut events = Vec::with_capacity(count as usize);
    let mut last = 0f32;
    for chunk in data[4..].chunks_exact(8) {
        let raw = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let mask = raw >> MASK_SHIFT;
        if mask & !MASK_BITS != 0 {
            return Err(Fault::Format("transition mask mismatch".into()));
        }
        let stamp = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        if !stamp.is_finite() || stamp < last {
            return Err(Fault::Format("non-monotonic timestamp".into()));
        }
        let interval = ((stamp - last) * TICKS_PER_SECOND).round() as u32;
        if interval > MAX_INTERVAL {
            return Err(Fault::Format("tick interval out of range".into()));
        }
        events.push(TickEvent {
            interval: interval as u16,
            toggles: mask as u8,
        });
        last = stamp;
    }
    Ok(CaptureRecord::from_events(events))
}

/// Incremental save-file numbering, threaded explicitly through the command
/// dispatcher. Resumes from existing `{prefix}-NNN.mag` files.
#[derive(Debug)]
pub struct SaveCounter {
    prefix: String,
    next: u32,
}

impl SaveCounter {
    pub fn init(prefix: &str) -> Self {
        let mut next = 1;
        if let Ok(paths) = glob::glob(&format!("{prefix}-*{MAG_SUFFIX}")) {
            for path in paths.flatten() {
                let num = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(MAG_SUFFIX))
                    .and_then(|n| n.rsplit('-').next())
                    .and_then(|n| n.parse::<u32>().ok());
                if let Some(num) = num {
                    next = next.max(num + 1);
                }
            }
        }
        SaveCounter {
            prefix: prefix.to_string(),
            next,
        }
    }

    /// Path for the next save, advancing the counter.
    pub fn next_path(&mut self) -> PathBuf {
        let path = PathBuf::from(format!("{}-{:03}{}", self.prefix, self.next, MAG_SUFFIX));
        self.next += 1;
        path
    }
}
