//! mag-capture - MSUSB magnetic stripe reader CLI
//!
//! Captures raw transition timing from the reader, optionally decodes it
//! (raw intervals, F2F bitstream, or validated parking-card records) and
//! saves swipes as .mag files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mag_capture::capture::{magfile, CaptureRecord, SaveCounter, Track, TrackSet};
use mag_capture::config::Config;
use mag_capture::decode::Decoder;
use mag_capture::device::{MagLink, SerialLink, SwipeCapture};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   mag-capture - MSUSB stripe reader");
    info!("===========================================");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Mode: {}", config.mode);
    info!("  Capture tracks: {:#04x}", config.tracks);
    info!("  Decode track: {}", config.track);
    info!("  Decoder: {}", config.decoder);
    info!("  Swipe window: {}s", config.swipe_timeout_secs);

    match config.mode.as_str() {
        "read" => command_read(&config).await,
        "format" => command_format(&config),
        "erase" => command_erase(&config, false),
        "erase-reverse" => command_erase(&config, true),
        "eeprom-read" => command_eeprom_read(&config),
        "eeprom-read-all" => command_eeprom_read_all(&config),
        "eeprom-erase" => command_eeprom_erase(&config),
        other => bail!("unknown mode {other:?}"),
    }
}

/// Decode/save one completed swipe. Per-card faults are reported and the
/// loop keeps going.
fn process_record(
    record: &CaptureRecord,
    decoder: Option<Decoder>,
    track: Track,
    saver: &mut Option<SaveCounter>,
) {
    if let Some(decoder) = decoder {
        match decoder.run(record, track) {
            Ok(text) => info!("[{:?}] {}", decoder, text),
            Err(fault) => warn!("Card rejected: {fault}"),
        }
    }
    if let Some(counter) = saver {
        let path = counter.next_path();
        match magfile::save(record, &path) {
            Ok(()) => info!("Saved {}", path.display()),
            Err(fault) => error!("Failed to save {}: {fault}", path.display()),
        }
    }
}

async fn command_read(config: &Config) -> Result<()> {
    let decoder = Decoder::from_name(&config.decoder)?;
    let track = Track::from_number(config.track)?;
    let mut saver = config.save_prefix.as_deref().map(SaveCounter::init);

    if !config.load_files.is_empty() {
        // Decode previously captured .mag files instead of the device.
        for file in &config.load_files {
            let record = magfile::load(Path::new(file))?;
            info!("Loaded {} ({} ticks)", file, record.tick_count());
            process_record(&record, decoder, track, &mut saver);
        }
        return Ok(());
    }

    if decoder.is_none() && saver.is_none() {
        bail!("reading requires a decoder or a save prefix");
    }

    let tracks = TrackSet::new(config.tracks)?;
    let capture = Arc::new(SwipeCapture::new(
        &config.port,
        tracks,
        Duration::from_secs(config.swipe_timeout_secs),
    ));
    let record_rx = capture.start()?;

    // Ctrl-C is a clean stop, not an error: flip the running flag and let
    // the in-flight swipe window drain.
    let stopper = capture.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing up");
            stopper.stop();
        }
    });

    info!("===========================================");
    info!("  Reading cards, press Ctrl+C to quit.");
    info!("===========================================");

    let mut swipes_processed = 0u64;
    loop {
        match record_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(record) => {
                swipes_processed += 1;
                process_record(&record, decoder, track, &mut saver);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if !capture.is_running() && record_rx.is_empty() {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Shutdown complete. Swipes processed: {swipes_processed}");
    Ok(())
}

fn open_link(config: &Config) -> Result<MagLink<SerialLink>> {
    let link = MagLink::open(&config.port)?;
    info!("Reader attached: {}", link.version());
    Ok(link)
}

fn command_format(config: &Config) -> Result<()> {
    let tracks = TrackSet::new(config.tracks)?;
    let mut link = open_link(config)?;
    info!(
        "Formatting tracks {:#04x} for {}s",
        tracks.mask(),
        config.op_secs
    );
    link.format_tracks(tracks, config.op_secs)?;
    info!("Format complete");
    Ok(())
}

fn command_erase(config: &Config, reverse: bool) -> Result<()> {
    let tracks = TrackSet::new(config.tracks)?;
    let mut link = open_link(config)?;
    info!(
        "Erasing tracks {:#04x} for {}s ({})",
        tracks.mask(),
        config.op_secs,
        if reverse { "reverse" } else { "forward" }
    );
    link.erase_tracks(tracks, config.op_secs, reverse)?;
    info!("Erase complete");
    Ok(())
}

fn command_eeprom_read(config: &Config) -> Result<()> {
    let mut link = open_link(config)?;
    let tracks = link.read_eeprom_slot(config.eeprom_slot)?;
    info!("Slot {} data:", config.eeprom_slot);
    for track in tracks {
        info!("  {track}");
    }
    Ok(())
}

fn command_eeprom_read_all(config: &Config) -> Result<()> {
    let mut link = open_link(config)?;
    info!("All eeprom data:");
    for (slot, tracks) in link.read_eeprom_all()?.iter().enumerate() {
        info!("Slot {}:", slot + 1);
        for track in tracks {
            info!("  {track}");
        }
    }
    Ok(())
}

fn command_eeprom_erase(config: &Config) -> Result<()> {
    let mut link = open_link(config)?;
    info!("Erasing eeprom");
    link.erase_eeprom()?;
    info!("Eeprom erased");
    Ok(())
}
