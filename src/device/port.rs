//! Byte-port seam between the link protocol and the serial hardware
//!
//! The protocol code only needs blocking reads and writes with a mutable
//! timeout, so that is the whole trait. Tests drive the link with scripted
//! ports; production uses a `serialport` handle.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::Fault;

/// Blocking byte channel with a settable read timeout.
///
/// A timed-out read surfaces as a short (possibly empty) result from
/// [`LinkPort::read_upto`], never as an error; the reader protocol treats
/// "nothing arrived" as meaningful.
pub trait LinkPort: Read + Write {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Read up to `n` bytes, stopping early on timeout or end of stream.
    fn read_upto(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Read bytes until a newline or timeout; returns the line without the
    /// trailing newline.
    fn read_ascii_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_upto(1)?;
            match byte.first() {
                None => break,
                Some(b'\n') => break,
                Some(&b) => line.push(b),
            }
        }
        while matches!(line.last(), Some(b'\r')) {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Serial port at the fixed reader baud rate.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(name: &str, baud: u32) -> Result<Self, Fault> {
        let port = serialport::new(name, baud)
            .timeout(Duration::from_secs(1))
            .open()?;
        Ok(SerialLink { port })
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl LinkPort for SerialLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
