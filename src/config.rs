//! Configuration loaded from environment variables

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Serial port the reader is attached to
    pub port: String,

    /// Track mask for capture operations (bits 0..2)
    pub tracks: u8,

    /// Track number (1..=3) for decode operations
    pub track: u8,

    /// Card swipe wait window in seconds
    pub swipe_timeout_secs: u64,

    /// Decoder selector: none | raw | f2fraw | p1v
    pub decoder: String,

    /// Prefix for incremental .mag saves ({prefix}-NNN.mag)
    pub save_prefix: Option<String>,

    /// Comma-separated .mag files to decode instead of the device
    pub load_files: Vec<String>,

    /// Command mode: read | format | erase | erase-reverse |
    /// eeprom-read | eeprom-read-all | eeprom-erase
    pub mode: String,

    /// Duration in seconds for format/erase operations
    pub op_secs: u8,

    /// EEPROM slot (1..=20) for eeprom-read
    pub eeprom_slot: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("MAG_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string()),

            tracks: std::env::var("MAG_TRACKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0x07),

            track: std::env::var("MAG_TRACK")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),

            swipe_timeout_secs: std::env::var("MAG_SWIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            decoder: std::env::var("MAG_DECODER").unwrap_or_else(|_| "none".to_string()),

            save_prefix: std::env::var("MAG_SAVE_PREFIX")
                .ok()
                .filter(|s| !s.is_empty()),

            load_files: std::env::var("MAG_LOAD")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            mode: std::env::var("MAG_MODE").unwrap_or_else(|_| "read".to_string()),

            op_secs: std::env::var("MAG_OP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            eeprom_slot: std::env::var("MAG_EEPROM_SLOT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        }
    }
}
