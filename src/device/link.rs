//! MSUSB reader command/response protocol
//!
//! Opcodes are single ASCII bytes, optionally followed by fixed binary
//! parameters; responses are fixed ASCII markers or length-prefixed binary
//! payloads. Every stage waits under an explicit timeout. The link holds
//! the one mutable timeout, so it supports a single logical owner.

use std::time::Duration;

use crate::capture::{CaptureRecord, TrackSet};
use crate::device::port::{LinkPort, SerialLink};
use crate::error::Fault;

/// Fixed reader baud rate.
pub const BAUD_RATE: u32 = 38_400;

/// Default wait for a card swipe.
pub const DEFAULT_SWIPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity marker at the head of the version response.
const IDENTITY_MARKER: &[u8] = b"MSUSB";
const IDENTITY_LEN: usize = 15;

/// Wait for short acknowledgement frames.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const EEPROM_LINE_TIMEOUT: Duration = Duration::from_secs(2);
const EEPROM_ERASE_TIMEOUT: Duration = Duration::from_secs(10);

const CMD_IDENTITY: u8 = b'?';
const CMD_CAPTURE: u8 = b'R';
const CMD_FORMAT: u8 = b'F';
const CMD_ERASE_FWD: u8 = b'E';
const CMD_ERASE_REV: u8 = b'e';
const CMD_EEPROM_READ: u8 = b'I';
const CMD_EEPROM_ERASE: u8 = b'H';
const FORMAT_TERMINATOR: u8 = b'\\';

pub const EEPROM_SLOTS: u8 = 20;

/// Result of waiting for one swipe.
#[derive(Debug)]
pub enum SwipeOutcome {
    /// A card was swiped and its raw timing captured.
    Capture(CaptureRecord),
    /// The swipe window elapsed with no card; ends a capture sequence
    /// cleanly, never a fault.
    EndOfStream,
}

/// Exclusive handle on one reader.
#[derive(Debug)]
pub struct MagLink<P: LinkPort> {
    port: P,
    version: Vec<u8>,
    swipe_timeout: Duration,
}

impl MagLink<SerialLink> {
    /// Open the serial port and verify the reader identity.
    pub fn open(port_name: &str) -> Result<Self, Fault> {
        Self::attach(SerialLink::open(port_name, BAUD_RATE)?)
    }
}

impl<P: LinkPort> MagLink<P> {
    /// Take ownership of an already-open byte port and run the identity
    /// handshake.
    pub fn attach(mut port: P) -> Result<Self, Fault> {
        port.set_timeout(ACK_TIMEOUT)?;
        port.write_all(&[CMD_IDENTITY])?;
        let version = port.read_upto(IDENTITY_LEN)?;
        if version.is_empty() {
            return Err(Fault::Link("reader not responding".into()));
        }
        if !version.starts_with(IDENTITY_MARKER) {
            return Err(Fault::Link(format!(
                "reader not valid: {:?}",
                String::from_utf8_lossy(&version)
            )));
        }
        Ok(MagLink {
            port,
            version,
            swipe_timeout: DEFAULT_SWIPE_TIMEOUT,
        })
    }

    /// Raw version response from the identity handshake.
    pub fn version(&self) -> String {
        String::from_utf8_lossy(&self.version).into_owned()
    }

    pub fn set_swipe_timeout(&mut self, timeout: Duration) {
        self.swipe_timeout = timeout;
    }

    fn expect(&mut self, want: &[u8], stage: &str) -> Result<(), Fault> {
        let got = self.port.read_upto(want.len())?;
        if got != want {
            return Err(Fault::Link(format!(
                "{stage}: expected {:?}, got {:?}",
                String::from_utf8_lossy(want),
                String::from_utf8_lossy(&got)
            )));
        }
        Ok(())
    }

    /// Wait for one card swipe on the selected tracks.
    pub fn capture(&mut self, tracks: TrackSet) -> Result<SwipeOutcome, Fault> {
        self.port.set_timeout(ACK_TIMEOUT)?;
        self.port.write_all(&[CMD_CAPTURE, tracks.mask()])?;
        self.expect(b"Ready", "capture arm")?;

        self.port.set_timeout(self.swipe_timeout)?;
        let header = self.port.read_upto(3)?;
        if header.is_empty() {
            return Ok(SwipeOutcome::EndOfStream);
        }
        if header != b"RD " {
            return Err(Fault::Link(format!(
                "capture header: expected \"RD \", got {:?}",
                String::from_utf8_lossy(&header)
            )));
        }

        self.port.set_timeout(ACK_TIMEOUT)?;
        let count = self.port.read_upto(2)?;
        if count.len() != 2 {
            return Err(Fault::Link("truncated tick count".into()));
        }
        let ticks = u16::from_be_bytes([count[0], count[1]]) as usize;
        // The reader pads the payload to an even tick count.
        let padded = ticks * 2 + if ticks % 2 != 0 { 2 } else { 0 };
        let payload = self.port.read_upto(padded)?;
        if payload.len() != padded {
            return Err(Fault::Link(format!(
                "truncated tick payload: {} of {padded} bytes",
                payload.len()
            )));
        }
        self.expect(b"RD=OK", "capture alignment")?;

        let record = CaptureRecord::from_raw(&payload[..ticks * 2])?;
        Ok(SwipeOutcome::Capture(record))
    }

    /// Pull-based sequence of swipes; ends cleanly at the first swipe
    /// window that elapses without a card.
    pub fn swipes(&mut self, tracks: TrackSet) -> Swipes<'_, P> {
        Swipes {
            link: self,
            tracks,
            done: false,
        }
    }

    /// Format the selected tracks to a known state for `secs` seconds.
    ///
    /// Framing per the documented protocol; pending hardware validation.
    pub fn format_tracks(&mut self, tracks: TrackSet, secs: u8) -> Result<(), Fault> {
        if secs == 0 || secs > 31 {
            return Err(Fault::Parameter(format!(
                "format duration {secs}s out of range 1..=31"
            )));
        }
        self.port.set_timeout(ACK_TIMEOUT)?;
        self.port
            .write_all(&[CMD_FORMAT, tracks.mask(), secs * 8, FORMAT_TERMINATOR])?;
        self.expect(b"FM ", "format arm")?;
        self.port
            .set_timeout(Duration::from_secs(1 + secs as u64 * 8))?;
        self.expect(b"FM=OK", "format completion")?;
        Ok(())
    }

    /// Erase the selected tracks for `secs` seconds, forward or reverse.
    ///
    /// Framing per the documented protocol; pending hardware validation.
    pub fn erase_tracks(&mut self, tracks: TrackSet, secs: u8, reverse: bool) -> Result<(), Fault> {
        if secs == 0 {
            return Err(Fault::Parameter("erase duration must be non-zero".into()));
        }
        let (cmd, arm, done): (u8, &[u8], &[u8]) = if reverse {
            (CMD_ERASE_REV, b"eR ", b"eR=OK")
        } else {
            (CMD_ERASE_FWD, b"Er ", b"Er=OK")
        };
        self.port.set_timeout(ACK_TIMEOUT)?;
        self.port.write_all(&[cmd, tracks.mask(), secs])?;
        self.expect(arm, "erase arm")?;
        self.port.set_timeout(Duration::from_secs(1 + secs as u64))?;
        self.expect(done, "erase completion")?;
        Ok(())
    }

    /// Read one stored card entry (three track lines) from the EEPROM.
    pub fn read_eeprom_slot(&mut self, slot: u8) -> Result<Vec<String>, Fault> {
        if slot < 1 || slot > EEPROM_SLOTS {
            return Err(Fault::Parameter(format!(
                "invalid eeprom slot {slot}, valid 1..={EEPROM_SLOTS}"
            )));
        }
        self.port.set_timeout(EEPROM_LINE_TIMEOUT)?;
        self.port.write_all(&[CMD_EEPROM_READ, slot, 0x01])?;
        let mut tracks = Vec::with_capacity(3);
        for _ in 0..3 {
            let line = self.port.read_ascii_line()?;
            if line.len() < 4 || !line.starts_with('#') {
                return Err(Fault::Link(format!("malformed eeprom line {line:?}")));
            }
            let data = line
                .split('\'')
                .nth(1)
                .ok_or_else(|| Fault::Link(format!("unquoted eeprom line {line:?}")))?;
            tracks.push(data.to_string());
        }
        Ok(tracks)
    }

    /// Read all stored card entries.
    pub fn read_eeprom_all(&mut self) -> Result<Vec<Vec<String>>, Fault> {
        (1..=EEPROM_SLOTS)
            .map(|slot| self.read_eeprom_slot(slot))
            .collect()
    }

    /// Erase the reader's EEPROM.
    pub fn erase_eeprom(&mut self) -> Result<(), Fault> {
        self.port.set_timeout(EEPROM_ERASE_TIMEOUT)?;
        self.port.write_all(&[CMD_EEPROM_ERASE])?;
        let ack = self.port.read_upto(5)?;
        if ack.is_empty() {
            return Err(Fault::Link("timeout while erasing eeprom".into()));
        }
        if ack != b"EZ=OK" {
            return Err(Fault::Link(format!(
                "invalid erase confirmation {:?}",
                String::from_utf8_lossy(&ack)
            )));
        }
        Ok(())
    }
}

/// Iterator over successive swipes; a timed-out window ends the sequence,
/// a link fault is yielded once and ends it too.
pub struct Swipes<'a, P: LinkPort> {
    link: &'a mut MagLink<P>,
    tracks: TrackSet,
    done: bool,
}

impl<P: LinkPort> Iterator for Swipes<'_, P> {
    type Item = Result<CaptureRecord, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.link.capture(self.tracks) {
            Ok(SwipeOutcome::Capture(record)) => Some(Ok(record)),
            Ok(SwipeOutcome::EndOfStream) => {
                self.done = true;
                None
            }
            Err(fault) => {
                self.done = true;
                Some(Err(fault))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Scripted port: each `Some` step is data the reader sends, each
    /// `None` is a read that times out. Writes are collected for framing
    /// assertions.
    #[derive(Debug)]
    struct ScriptedPort {
        steps: VecDeque<Option<Vec<u8>>>,
        current: Vec<u8>,
        written: Vec<u8>,
    }

    impl ScriptedPort {
        fn new<const N: usize>(steps: [Option<&[u8]>; N]) -> Self {
            ScriptedPort {
                steps: steps
                    .into_iter()
                    .map(|s| s.map(|bytes| bytes.to_vec()))
                    .collect(),
                current: Vec::new(),
                written: Vec::new(),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.current.is_empty() {
                match self.steps.pop_front() {
                    Some(Some(bytes)) => self.current = bytes,
                    Some(None) | None => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout"))
                    }
                }
            }
            let n = self.current.len().min(buf.len());
            buf[..n].copy_from_slice(&self.current[..n]);
            self.current.drain(..n);
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkPort for ScriptedPort {
        fn set_timeout(&mut self, _timeout: std::time::Duration) -> io::Result<()> {
            Ok(())
        }
    }

    const IDENT: Option<&[u8]> = Some(b"MSUSB CZ.090211");

    #[test]
    fn test_identity_handshake() {
        let link = MagLink::attach(ScriptedPort::new([IDENT])).unwrap();
        assert_eq!(link.version(), "MSUSB CZ.090211");
        assert_eq!(link.port.written, b"?");
    }

    #[test]
    fn test_silent_reader_is_link_fault() {
        let err = MagLink::attach(ScriptedPort::new([None])).unwrap_err();
        assert!(matches!(err, Fault::Link(_)));
    }

    #[test]
    fn test_foreign_identity_is_link_fault() {
        let err = MagLink::attach(ScriptedPort::new([Some(b"XYUSB CZ.090211")])).unwrap_err();
        assert!(matches!(err, Fault::Link(_)));
    }

    #[test]
    fn test_swipe_window_timeout_is_end_of_stream() {
        let port = ScriptedPort::new([IDENT, Some(b"Ready"), None]);
        let mut link = MagLink::attach(port).unwrap();
        let outcome = link.capture(TrackSet::ALL).unwrap();
        assert!(matches!(outcome, SwipeOutcome::EndOfStream));
    }

    #[test]
    fn test_garbage_after_ready_is_link_fault() {
        // Must stay distinguishable from the clean end-of-stream above.
        let port = ScriptedPort::new([IDENT, Some(b"Ready"), Some(b"XX ")]);
        let mut link = MagLink::attach(port).unwrap();
        let err = link.capture(TrackSet::ALL).unwrap_err();
        assert!(matches!(err, Fault::Link(_)));
    }

    #[test]
    fn test_capture_reads_padded_payload() {
        // 3 ticks: payload padded to 8 bytes, only 6 carry events.
        let port = ScriptedPort::new([
            IDENT,
            Some(b"Ready"),
            Some(b"RD "),
            Some(&[0x00, 0x03]),
            Some(&[0, 0x00, 5, 0x01, 5, 0x00, 0xEE, 0xEE]),
            Some(b"RD=OK"),
        ]);
        let mut link = MagLink::attach(port).unwrap();
        match link.capture(TrackSet::ALL).unwrap() {
            SwipeOutcome::Capture(record) => {
                assert_eq!(record.tick_count(), 3);
                assert_eq!(link.port.written, &[b'?', b'R', 0x07][..]);
            }
            SwipeOutcome::EndOfStream => panic!("expected a capture"),
        }
    }

    #[test]
    fn test_missing_trailer_is_link_fault() {
        let port = ScriptedPort::new([
            IDENT,
            Some(b"Ready"),
            Some(b"RD "),
            Some(&[0x00, 0x02]),
            Some(&[0, 0x00, 5, 0x01]),
            Some(b"RD=KO"),
        ]);
        let mut link = MagLink::attach(port).unwrap();
        assert!(matches!(
            link.capture(TrackSet::ALL),
            Err(Fault::Link(_))
        ));
    }

    #[test]
    fn test_swipes_iterator_ends_on_timeout() {
        let port = ScriptedPort::new([
            IDENT,
            Some(b"Ready"),
            Some(b"RD "),
            Some(&[0x00, 0x02]),
            Some(&[0, 0x00, 5, 0x01]),
            Some(b"RD=OK"),
            Some(b"Ready"),
            None,
        ]);
        let mut link = MagLink::attach(port).unwrap();
        let records: Vec<_> = link.swipes(TrackSet::ALL).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
    }

    #[test]
    fn test_format_framing() {
        let port = ScriptedPort::new([IDENT, Some(b"FM "), Some(b"FM=OK")]);
        let mut link = MagLink::attach(port).unwrap();
        link.format_tracks(TrackSet::ALL, 10).unwrap();
        assert_eq!(link.port.written, &[b'?', b'F', 0x07, 80, b'\\'][..]);
    }

    #[test]
    fn test_format_duration_bounds() {
        let port = ScriptedPort::new([IDENT]);
        let mut link = MagLink::attach(port).unwrap();
        assert!(matches!(
            link.format_tracks(TrackSet::ALL, 32),
            Err(Fault::Parameter(_))
        ));
        // Nothing was written past the handshake.
        assert_eq!(link.port.written, b"?");
    }

    #[test]
    fn test_erase_framing_forward_and_reverse() {
        let port = ScriptedPort::new([IDENT, Some(b"Er "), Some(b"Er=OK")]);
        let mut link = MagLink::attach(port).unwrap();
        link.erase_tracks(TrackSet::ALL, 5, false).unwrap();
        assert_eq!(link.port.written, &[b'?', b'E', 0x07, 5][..]);

        let port = ScriptedPort::new([IDENT, Some(b"eR "), Some(b"eR=OK")]);
        let mut link = MagLink::attach(port).unwrap();
        link.erase_tracks(TrackSet::ALL, 5, true).unwrap();
        assert_eq!(link.port.written, &[b'?', b'e', 0x07, 5][..]);
    }

    #[test]
    fn test_eeprom_slot_read() {
        let port = ScriptedPort::new([
            IDENT,
            Some(b"#1 'AAA111'\r\n#2 'BBB222'\r\n#3 'CCC333'\r\n"),
        ]);
        let mut link = MagLink::attach(port).unwrap();
        let tracks = link.read_eeprom_slot(4).unwrap();
        assert_eq!(tracks, vec!["AAA111", "BBB222", "CCC333"]);
        assert_eq!(link.port.written, &[b'?', b'I', 4, 0x01][..]);
    }

    #[test]
    fn test_eeprom_slot_bounds() {
        let mut link = MagLink::attach(ScriptedPort::new([IDENT])).unwrap();
        assert!(matches!(
            link.read_eeprom_slot(0),
            Err(Fault::Parameter(_))
        ));
        assert!(matches!(
            link.read_eeprom_slot(21),
            Err(Fault::Parameter(_))
        ));
    }

    #[test]
    fn test_eeprom_erase_acknowledgements() {
        let mut link =
            MagLink::attach(ScriptedPort::new([IDENT, Some(b"EZ=OK")])).unwrap();
        link.erase_eeprom().unwrap();

        let mut link =
            MagLink::attach(ScriptedPort::new([IDENT, Some(b"EZ=NO")])).unwrap();
        assert!(matches!(link.erase_eeprom(), Err(Fault::Link(_))));

        let mut link = MagLink::attach(ScriptedPort::new([IDENT, None])).unwrap();
        assert!(matches!(link.erase_eeprom(), Err(Fault::Link(_))));
    }
}
