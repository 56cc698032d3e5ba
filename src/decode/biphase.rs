//! Biphase (F2F) demodulation
//!
//! Self-clocking encoding: a "1" cell carries two transitions, a "0" cell
//! one. The expected single-transition interval (the baseline) is seeded
//! from the swipe lead-in and re-estimated from every accepted cell, which
//! absorbs the speed drift of a hand swipe.

use crate::error::Fault;

/// Cells consumed as warm-up before classification starts.
const WARMUP_CELLS: usize = 10;

/// Demodulate one track's transition intervals into a bitstring.
///
/// The baseline seeds from intervals 1..=9 (the first is typically a
/// partial cell) and the warm-up window is emitted as ten "0" symbols.
/// From there: a short interval followed by a plausible second half is a
/// "1" consuming both; an interval within 25% of the baseline is a "0";
/// anything else is a hard decode fault. The last two intervals are never
/// classified, trailing cells are unreliable.
pub fn demodulate(intervals: &[u32]) -> Result<String, Fault> {
    if intervals.len() < WARMUP_CELLS {
        return Err(Fault::Decode(format!(
            "too few transitions to demodulate ({})",
            intervals.len()
        )));
    }

    let warmup = &intervals[1..WARMUP_CELLS];
    let mut baseline = warmup.iter().sum::<u32>() as f64 / warmup.len() as f64;

    let mut bits = "0".repeat(WARMUP_CELLS);
    let mut i = WARMUP_CELLS;
    while i + 2 < intervals.len() {
        let current = intervals[i] as f64;
        if current < baseline * 0.75 && intervals[i + 1] as f64 > baseline * 0.25 {
            baseline = current + intervals[i + 1] as f64;
            i += 2;
            bits.push('1');
        } else if current > baseline * 0.75 && current < baseline * 1.25 {
            baseline = current;
            i += 1;
            bits.push('0');
        } else {
            return Err(Fault::Decode(format!(
                "unclassifiable interval {current} against baseline {baseline:.1} at {i}"
            )));
        }
    }
    Ok(bits)
}
