//! mag-capture - MSUSB magnetic stripe reader toolkit
//!
//! Captures raw transition timing from a serial-attached MSUSB reader,
//! persists captures as .mag files, and decodes them: biphase (F2F)
//! demodulation into a bitstream, then fixed-layout payload validation.

pub mod capture;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;

pub use error::Fault;
