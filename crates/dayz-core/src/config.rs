//! Tracker limits and runtime configuration

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Maximum number of tracked servers
pub const MAX_SERVERS: usize = 5;

/// Secondary servers shown next to the active one
pub const MAX_SECONDARY_SLOTS: usize = 3;

/// 7 days at 1 sample per minute
pub const HISTORY_CAPACITY: usize = 10_080;

/// Most recent samples mirrored into NVS flash
pub const NVS_HISTORY_MAX: usize = 500;

/// Samples appended between two wholesale snapshot rewrites
pub const SAVE_INTERVAL: usize = 10;

pub const MAX_RESTART_HISTORY: usize = 10;
pub const MIN_RESTART_INTERVAL_SECS: u32 = 1800;
pub const RESTART_DETECT_MIN_PLAYERS: i16 = 5;
pub const RESTART_DETECT_DROP_TO: i16 = 0;

pub const TREND_WINDOW_SECS: u32 = 2 * 3600;
pub const TREND_CAPACITY: usize = 256;

/// Nov 2023. Anything earlier means SNTP has not synced yet.
pub const TIMESTAMP_MIN_VALID: u32 = 1_700_000_000;

pub const HISTORY_FILE_MAGIC: u32 = 0xDA12_0002;
pub const JSON_HISTORY_VERSION: u8 = 1;
pub const JSON_LOAD_WINDOW_SECS: u32 = 7 * 86_400;
pub const JSON_RETENTION_DAYS: u16 = 365;

/// Journal days summarized by the weekly heatmap. Deleting a server moves
/// this many days of journal files down with the following slots.
pub const HEATMAP_LOOKBACK_DAYS: u64 = 28;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u16 = 30;
pub const MIN_REFRESH_INTERVAL_SECS: u16 = 10;
pub const MAX_REFRESH_INTERVAL_SECS: u16 = 300;
pub const SECONDARY_REFRESH_SECS: u16 = 60;

pub const DEFAULT_MAX_PLAYERS: u16 = 60;
pub const DEFAULT_ALERT_THRESHOLD: u16 = 50;

pub const DEFAULT_SERVER_ID: &str = "29986583";
pub const DEFAULT_SERVER_NAME: &str = "3833 | EUROPE - DE";

/// Runtime configuration for the tracker
///
/// Every field has a default, so a partial JSON document only overrides the
/// keys it names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Entries held by the in-memory history ring
    pub history_capacity: usize,
    /// Dirty samples that trigger an NVS + binary snapshot flush
    pub save_interval: usize,
    /// Entries kept in the NVS mirror
    pub nvs_history_max: usize,
    /// Bounded wait for the shared application state
    pub state_lock_timeout_ms: u64,
    /// Bounded wait for the storage handle (SD card + NVS)
    pub storage_lock_timeout_ms: u64,
    pub secondary_refresh_secs: u16,
    /// Offset applied to compute local calendar dates and restart schedules
    pub utc_offset_secs: i32,
    pub json_retention_days: u16,
    /// Look-back used when restoring a server from the JSON journal
    pub json_load_window_secs: u32,
    pub trend_window_secs: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: HISTORY_CAPACITY,
            save_interval: SAVE_INTERVAL,
            nvs_history_max: NVS_HISTORY_MAX,
            state_lock_timeout_ms: 100,
            storage_lock_timeout_ms: 2000,
            secondary_refresh_secs: SECONDARY_REFRESH_SECS,
            // CET
            utc_offset_secs: 3600,
            json_retention_days: JSON_RETENTION_DAYS,
            json_load_window_secs: JSON_LOAD_WINDOW_SECS,
            trend_window_secs: TREND_WINDOW_SECS,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config document")]
    Malformed,
    #[error("Invalid value for {0}")]
    OutOfRange(&'static str),
}

impl TrackerConfig {
    /// Parse a JSON configuration document (e.g. `config.json` on the SD card)
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::OutOfRange("history_capacity"));
        }
        if self.save_interval == 0 {
            return Err(ConfigError::OutOfRange("save_interval"));
        }
        // Packed NVS metadata keeps head and count in 16 bits each
        if self.history_capacity > u16::MAX as usize {
            return Err(ConfigError::OutOfRange("history_capacity"));
        }
        if !(-14 * 3600..=14 * 3600).contains(&self.utc_offset_secs) {
            return Err(ConfigError::OutOfRange("utc_offset_secs"));
        }
        Ok(())
    }

    pub fn state_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.state_lock_timeout_ms)
    }

    pub fn storage_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_lock_timeout_ms)
    }
}

/// Clamp a user supplied refresh interval to the supported range
pub fn clamp_refresh_interval(secs: u16) -> u16 {
    secs.clamp(MIN_REFRESH_INTERVAL_SECS, MAX_REFRESH_INTERVAL_SECS)
}
