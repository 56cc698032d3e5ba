//! Tick events and per-track transition interval derivation
//!
//! The reader reports a flat stream of tick events. Each event is a byte
//! pair: an interval low byte, then a mask byte whose bit 7 carries the
//! ninth interval bit and whose low 3 bits give the per-track toggle state.
//! A track records one transition interval every time its toggle flips.

use crate::error::Fault;

/// Bit carrying the high interval bit in the mask byte.
const CARRY_BIT: u8 = 0x80;

/// All three track toggle bits.
const TRACK_BITS: u8 = 0x07;

/// Minimum transitions for a track to count as real signal.
const MIN_TRANSITIONS: usize = 10;

/// One of the three magnetic tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    One,
    Two,
    Three,
}

impl Track {
    /// Track from its 1-based card position.
    pub fn from_number(n: u8) -> Result<Self, Fault> {
        match n {
            1 => Ok(Track::One),
            2 => Ok(Track::Two),
            3 => Ok(Track::Three),
            _ => Err(Fault::Parameter(format!("invalid track number {n}"))),
        }
    }

    /// Toggle-mask bit for this track.
    pub fn bit(self) -> u8 {
        1 << self.index()
    }

    /// Zero-based storage index.
    pub fn index(self) -> usize {
        match self {
            Track::One => 0,
            Track::Two => 1,
            Track::Three => 2,
        }
    }
}

/// Validated non-empty subset of the three tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSet(u8);

impl TrackSet {
    pub const ALL: TrackSet = TrackSet(TRACK_BITS);

    pub fn new(mask: u8) -> Result<Self, Fault> {
        if mask & !TRACK_BITS != 0 || mask & TRACK_BITS == 0 {
            return Err(Fault::Parameter(format!(
                "invalid track mask {mask:#04x}"
            )));
        }
        Ok(TrackSet(mask))
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn contains(self, track: Track) -> bool {
        self.0 & track.bit() != 0
    }
}

impl From<Track> for TrackSet {
    fn from(track: Track) -> Self {
        TrackSet(track.bit())
    }
}

/// One raw reader tick: a 9-bit elapsed interval plus the simultaneous
/// per-track toggle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    /// Elapsed internal ticks since the previous event (9 bits).
    pub interval: u16,
    /// Low 3 bits, one toggle per track.
    pub toggles: u8,
}

impl TickEvent {
    /// Decode one (interval-low, mask) byte pair. Mask bits outside the
    /// three toggle positions and the carry bit are a framing fault.
    pub fn from_pair(low: u8, mask: u8) -> Result<Self, Fault> {
        if mask & !(TRACK_BITS | CARRY_BIT) != 0 {
            return Err(Fault::Link(format!(
                "unexpected bits in tick mask {mask:#04x}"
            )));
        }
        Ok(TickEvent {
            interval: low as u16 | (((mask & CARRY_BIT) as u16) << 1),
            toggles: mask & TRACK_BITS,
        })
    }
}

/// A completed swipe: the tick events as received plus the per-track
/// transition interval sequences derived from them.
///
/// Built once per swipe or file load, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    events: Vec<TickEvent>,
    tracks: [Vec<u32>; 3],
}

impl CaptureRecord {
    /// Build from the raw byte payload of a capture response.
    pub fn from_raw(raw: &[u8]) -> Result<Self, Fault> {
        if raw.len() % 2 != 0 {
            return Err(Fault::Link("raw tick data length mismatch".into()));
        }
        let events = raw
            .chunks_exact(2)
            .map(|pair| TickEvent::from_pair(pair[0], pair[1]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_events(events))
    }

    /// Build from already-decoded tick events.
    ///
    /// Track toggle state is seeded from the first event; every later event
    /// adds its interval to each track's accumulator and emits the
    /// accumulated value when that track's toggle flips. Tracks with fewer
    /// than 10 transitions are cleared (weak or absent signal).
    pub fn from_events(events: Vec<TickEvent>) -> Self {
        let mut tracks: [Vec<u32>; 3] = Default::default();

        if let Some(first) = events.first() {
            let mut state = [false; 3];
            let mut pending = [0u32; 3];
            for (i, s) in state.iter_mut().enumerate() {
                *s = first.toggles & (1 << i) != 0;
            }
            for event in &events[1..] {
                for i in 0..3 {
                    pending[i] += event.interval as u32;
                    let toggled = event.toggles & (1 << i) != 0;
                    if toggled != state[i] {
                        tracks[i].push(pending[i]);
                        pending[i] = 0;
                        state[i] = toggled;
                    }
                }
            }
        }

        for track in tracks.iter_mut() {
            if track.len() < MIN_TRANSITIONS {
                track.clear();
            }
        }

        CaptureRecord { events, tracks }
    }

    /// Transition intervals recorded for one track. Empty when the track
    /// carried no usable signal.
    pub fn track_intervals(&self, track: Track) -> &[u32] {
        &self.tracks[track.index()]
    }

    /// The tick events this record was derived from.
    pub fn events(&self) -> &[TickEvent] {
        &self.events
    }

    /// Number of tick events in the capture.
    pub fn tick_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(interval: u16, toggles: u8) -> TickEvent {
        TickEvent { interval, toggles }
    }

    #[test]
    fn test_track_set_rejects_bad_masks() {
        assert!(TrackSet::new(0x00).is_err());
        assert!(TrackSet::new(0x08).is_err());
        assert!(TrackSet::new(0xFF).is_err());
        assert_eq!(TrackSet::new(0x07).unwrap(), TrackSet::ALL);
        assert!(TrackSet::new(0x02).unwrap().contains(Track::Two));
    }

    #[test]
    fn test_tick_event_nine_bit_interval() {
        let ev = TickEvent::from_pair(0xFF, CARRY_BIT | 0x05).unwrap();
        assert_eq!(ev.interval, 0x1FF);
        assert_eq!(ev.toggles, 0x05);

        let ev = TickEvent::from_pair(0x10, 0x03).unwrap();
        assert_eq!(ev.interval, 0x10);
    }

    #[test]
    fn test_tick_event_framing_fault() {
        let err = TickEvent::from_pair(0x00, 0x40).unwrap_err();
        assert!(matches!(err, Fault::Link(_)));
        // from_raw propagates the same fault
        assert!(matches!(
            CaptureRecord::from_raw(&[0x01, 0x00, 0x02, 0x48]),
            Err(Fault::Link(_))
        ));
    }

    #[test]
    fn test_odd_raw_payload_rejected() {
        assert!(matches!(
            CaptureRecord::from_raw(&[0x01, 0x00, 0x02]),
            Err(Fault::Link(_))
        ));
    }

    #[test]
    fn test_interval_conservation() {
        // First event seeds state, then 40 events each flipping all tracks:
        // every interval is attributed and emitted, none left pending.
        let mut events = vec![event(9, 0)];
        let mut expected_sum = 0u32;
        for k in 1..=40u16 {
            let toggles = if k % 2 == 1 { 0x07 } else { 0x00 };
            events.push(event(k, toggles));
            expected_sum += k as u32;
        }
        let record = CaptureRecord::from_events(events);
        for track in [Track::One, Track::Two, Track::Three] {
            let intervals = record.track_intervals(track);
            assert_eq!(intervals.len(), 40);
            assert_eq!(intervals.iter().sum::<u32>(), expected_sum);
        }
    }

    #[test]
    fn test_intervals_accumulate_until_toggle_flips() {
        // Track 1 flips on every second event, so each emitted interval is
        // the sum of two event intervals. Track 2 never flips.
        let mut events = vec![event(0, 0)];
        for k in 0..24u16 {
            let toggles = (((k + 1) / 2) % 2) as u8;
            events.push(event(10, toggles));
        }
        let record = CaptureRecord::from_events(events);
        let t1 = record.track_intervals(Track::One);
        assert_eq!(t1.len(), 12);
        assert!(t1.iter().all(|&v| v == 20));
        assert!(record.track_intervals(Track::Two).is_empty());
    }

    #[test]
    fn test_weak_track_cleared() {
        // Only 9 transitions on track 1: below the 10-transition floor.
        let mut events = vec![event(0, 0)];
        for k in 0..9u16 {
            let toggles = if k % 2 == 0 { 0x01 } else { 0x00 };
            events.push(event(5, toggles));
        }
        let record = CaptureRecord::from_events(events);
        assert!(record.track_intervals(Track::One).is_empty());
    }

    #[test]
    fn test_state_seeded_from_first_event() {
        // First event already has track 1 high. The next ten events keep it
        // high and must not emit; the accumulated 40 ticks flush into the
        // first real transition.
        let mut events = vec![event(0, 0x01)];
        for _ in 0..10 {
            events.push(event(4, 0x01));
        }
        for k in 0..12u16 {
            let toggles = if k % 2 == 0 { 0x00 } else { 0x01 };
            events.push(event(4, toggles));
        }
        let record = CaptureRecord::from_events(events);
        let t1 = record.track_intervals(Track::One);
        assert_eq!(t1.len(), 12);
        assert_eq!(t1[0], 44);
        assert!(t1[1..].iter().all(|&v| v == 4));
    }
}
