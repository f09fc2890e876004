pub mod backend;
pub mod binary_snapshot;
pub mod coordinator;
pub mod date;
pub mod json_log;
pub mod memory;
pub mod nvs_blob;
pub mod ring;
pub mod sample;
pub mod sd_card;

use alloc::vec::Vec;
use core::fmt::Write as _;

use heapless::String;
use thiserror_no_std::Error;

pub use backend::{BackendKind, HistoryBackend, RestorePolicy, SlotRef, SnapshotBackend};
pub use ring::{RingSnapshot, RingStore};
pub use sample::Sample;

use crate::app_state::TimedMutex;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("SD card not mounted")]
    NotMounted,
    #[error("Write failed")]
    WriteFailed,
    #[error("Read failed")]
    ReadFailed,
    #[error("Not found")]
    NotFound,
    #[error("Corrupt data")]
    Corrupt,
    #[error("Clock not synced")]
    ClockNotSynced,
    #[error("Storage busy")]
    Busy,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },
    #[error("Invalid server slot {0}")]
    InvalidSlot(usize),
    #[error("History store is owned by another server")]
    NotOwner,
}

/// Minimal file API over the SD card
///
/// Paths are `/`-separated, relative to the volume root and use 8.3 names.
pub trait FileSystem {
    fn is_mounted(&self) -> bool;

    /// Probe for a card again after it was marked unmounted
    fn try_remount(&mut self) -> bool {
        self.is_mounted()
    }

    fn exists(&mut self, path: &str) -> bool;

    fn read_to_end(&mut self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// At most the first `len` bytes of `path`
    fn read_head(&mut self, path: &str, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut bytes = self.read_to_end(path)?;
        bytes.truncate(len);
        Ok(bytes)
    }

    /// Create or truncate `path` and write `data`
    fn write_all(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Append `data` to `path`, creating it if needed
    ///
    /// The data must be on the medium when this returns `Ok`.
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    fn create_dir_all(&mut self, path: &str) -> Result<(), StorageError>;

    fn remove(&mut self, path: &str) -> Result<(), StorageError>;
}

/// Flash key/value namespace (ESP-IDF NVS style)
pub trait KeyValueStore {
    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, StorageError>;

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError>;

    fn get_blob(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Both persistence media, guarded together by the storage lock
pub struct Storage<F, K> {
    pub fs: F,
    pub nvs: K,
}

impl<F: FileSystem, K: KeyValueStore> Storage<F, K> {
    pub fn new(fs: F, nvs: K) -> Self {
        Self { fs, nvs }
    }
}

/// Storage handle shared between workers
pub type SharedStorage<F, K> = TimedMutex<Storage<F, K>>;

pub type PathBuf = String<40>;
pub type NvsKey = String<15>;

pub const HISTORY_DIR: &str = "HISTORY";

/// `HISTORY/SRV{slot}`
pub fn slot_dir(slot: usize) -> PathBuf {
    let mut path = PathBuf::new();
    let _ = write!(path, "{}/SRV{}", HISTORY_DIR, slot);
    path
}

/// `HIST{slot}.BIN`
pub fn snapshot_path(slot: usize) -> PathBuf {
    let mut path = PathBuf::new();
    let _ = write!(path, "HIST{}.BIN", slot);
    path
}

/// `h{slot}_{suffix}` (NVS keys are limited to 15 characters)
pub fn nvs_key(slot: usize, suffix: &str) -> NvsKey {
    let mut key = NvsKey::new();
    let _ = write!(key, "h{}_{}", slot, suffix);
    key
}

/// Range shown by the history graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRange {
    #[default]
    OneHour,
    EightHours,
    OneDay,
    OneWeek,
}

impl HistoryRange {
    pub const ALL: [Self; 4] = [Self::OneHour, Self::EightHours, Self::OneDay, Self::OneWeek];

    /// Get a short label for display
    pub const fn label(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::EightHours => "8h",
            Self::OneDay => "24h",
            Self::OneWeek => "7d",
        }
    }

    pub const fn duration_secs(self) -> u32 {
        match self {
            Self::OneHour => 3600,
            Self::EightHours => 8 * 3600,
            Self::OneDay => 86_400,
            Self::OneWeek => 7 * 86_400,
        }
    }

    /// Next range in the selector, wrapping around
    pub const fn next(self) -> Self {
        match self {
            Self::OneHour => Self::EightHours,
            Self::EightHours => Self::OneDay,
            Self::OneDay => Self::OneWeek,
            Self::OneWeek => Self::OneHour,
        }
    }
}
