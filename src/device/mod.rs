//! Reader device access: byte-port seam, link protocol, capture worker.

pub mod link;
pub mod port;
pub mod worker;

pub use link::{MagLink, SwipeOutcome, BAUD_RATE, DEFAULT_SWIPE_TIMEOUT};
pub use port::{LinkPort, SerialLink};
pub use worker::{CaptureStats, SwipeCapture};
