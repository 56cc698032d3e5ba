//! Capture worker thread
//!
//! The link is single-owner, so one dedicated thread drives the swipe loop
//! and hands completed records to the main loop over a bounded channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use crate::capture::{CaptureRecord, TrackSet};
use crate::device::link::{MagLink, SwipeOutcome};
use crate::error::Fault;

/// Statistics for the capture loop (atomic for cross-thread reads).
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub swipes_captured: AtomicU64,
    pub ticks_captured: AtomicU64,
    pub link_faults: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Swipe capture controller. Owns the running flag and stats; the link
/// itself lives on the capture thread.
pub struct SwipeCapture {
    port_name: String,
    tracks: TrackSet,
    swipe_timeout: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl SwipeCapture {
    pub fn new(port_name: &str, tracks: TrackSet, swipe_timeout: Duration) -> Self {
        SwipeCapture {
            port_name: port_name.to_string(),
            tracks,
            swipe_timeout,
            running: Arc::new(AtomicBool::new(false)),
            stats: CaptureStats::new(),
        }
    }

    /// Start capturing and return a receiver for completed swipe records.
    pub fn start(&self) -> Result<Receiver<CaptureRecord>> {
        info!("Starting swipe capture on {}", self.port_name);
        info!("  Tracks: {:#04x}", self.tracks.mask());
        info!("  Swipe window: {:?}", self.swipe_timeout);

        let (record_tx, record_rx) = bounded::<CaptureRecord>(64);

        let port_name = self.port_name.clone();
        let tracks = self.tracks;
        let swipe_timeout = self.swipe_timeout;
        let running = self.running.clone();
        let stats = self.stats.clone();

        running.store(true, Ordering::SeqCst);

        thread::Builder::new()
            .name("swipe-capture".to_string())
            .spawn(move || {
                if let Err(e) = run_capture(
                    &port_name,
                    tracks,
                    swipe_timeout,
                    &running,
                    &stats,
                    record_tx,
                ) {
                    error!("Swipe capture error: {e}");
                }
                running.store(false, Ordering::SeqCst);
            })
            .context("Failed to spawn capture thread")?;

        Ok(record_rx)
    }

    /// Request an orderly stop; takes effect after the in-flight swipe
    /// window resolves.
    pub fn stop(&self) {
        info!("Stopping swipe capture...");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

/// Capture loop body (runs on the dedicated thread).
fn run_capture(
    port_name: &str,
    tracks: TrackSet,
    swipe_timeout: Duration,
    running: &AtomicBool,
    stats: &CaptureStats,
    record_tx: Sender<CaptureRecord>,
) -> Result<()> {
    let mut link = MagLink::open(port_name)
        .with_context(|| format!("failed to attach reader on {port_name}"))?;
    link.set_swipe_timeout(swipe_timeout);
    info!("Reader attached: {}", link.version());
    info!("Swipe next card");

    while running.load(Ordering::SeqCst) {
        match link.capture(tracks) {
            Ok(SwipeOutcome::Capture(record)) => {
                stats.swipes_captured.fetch_add(1, Ordering::Relaxed);
                stats
                    .ticks_captured
                    .fetch_add(record.tick_count() as u64, Ordering::Relaxed);
                info!("Swipe captured: {} ticks", record.tick_count());
                if record_tx.send(record).is_err() {
                    warn!("Record channel closed, stopping capture");
                    break;
                }
                info!("Swipe next card");
            }
            Ok(SwipeOutcome::EndOfStream) => {
                info!("No swipe within the window, ending capture sequence");
                break;
            }
            Err(fault @ Fault::Link(_)) => {
                // Mid-protocol framing faults are hard: never folded into
                // end-of-stream.
                stats.link_faults.fetch_add(1, Ordering::Relaxed);
                return Err(fault.into());
            }
            Err(fault) => return Err(fault.into()),
        }
    }

    info!(
        "Capture loop finished: {} swipes, {} ticks",
        stats.swipes_captured.load(Ordering::Relaxed),
        stats.ticks_captured.load(Ordering::Relaxed)
    );
    Ok(())
}
