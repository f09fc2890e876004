//! Append-only daily JSON-lines journal
//!
//! One file per server slot and local calendar day:
//! `HISTORY/SRV{slot}/YYYYMMDD.JSL`. The first line is a header naming the
//! format version, the server id and the date; every further line is one
//! sample:
//!
//! ```text
//! {"v":1,"sid":"29986583","d":"2024-11-05"}
//! {"t":1730800000,"p":42}
//! ```
//!
//! This is the only backend written on every sample and the authoritative
//! source when a server is restored.

use alloc::string::String;
use alloc::vec::Vec;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::backend::{BackendKind, HistoryBackend, LoadWindow, SlotRef};
use super::date::{date_range, day_file_name, days_before, iso_date, local_date};
use super::{FileSystem, KeyValueStore, PathBuf, Sample, Storage, StorageError, slot_dir};
use crate::config::{JSON_HISTORY_VERSION, MAX_SERVERS, TIMESTAMP_MIN_VALID};

/// Days before the retention cutoff probed by [`JsonDailyLog::prune`]
pub const PRUNE_LOOKBACK_DAYS: u64 = 31;

/// Enough bytes for the longest header line
const HEADER_READ_LEN: usize = 96;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct HeaderLine {
    v: u8,
    sid: String,
    d: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct EntryLine {
    t: u32,
    p: i16,
}

enum Line {
    Header(HeaderLine),
    Entry(Sample),
}

fn parse_line(line: &[u8]) -> Option<Line> {
    if let Ok(entry) = serde_json::from_slice::<EntryLine>(line) {
        return Some(Line::Entry(Sample::new(entry.t, entry.p)));
    }
    serde_json::from_slice::<HeaderLine>(line)
        .ok()
        .map(Line::Header)
}

fn header_line(server_id: &str, date: NaiveDate) -> Result<String, StorageError> {
    let header = HeaderLine {
        v: JSON_HISTORY_VERSION,
        sid: String::from(server_id),
        d: String::from(iso_date(date).as_str()),
    };
    let mut text = serde_json::to_string(&header).map_err(|_| StorageError::WriteFailed)?;
    text.push('\n');
    Ok(text)
}

/// Whether `head` starts with a complete header line for `server_id`
fn header_matches(head: &[u8], server_id: &str) -> bool {
    let Some(end) = head.iter().position(|b| *b == b'\n') else {
        return false;
    };
    let line = &head[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    matches!(
        parse_line(line),
        Some(Line::Header(header)) if header.v == JSON_HISTORY_VERSION && header.sid == server_id
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Missing,
    Valid,
    /// Another server or format version
    Foreign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseStats {
    pub accepted: usize,
    pub out_of_range: usize,
    pub malformed: usize,
}

/// Parse one day file, pushing samples inside `window` onto `out`
///
/// A missing or mismatching header skips the whole file.
fn parse_day(
    bytes: &[u8],
    server_id: &str,
    window: LoadWindow,
    out: &mut Vec<Sample>,
) -> Result<ParseStats, StorageError> {
    let mut lines = bytes
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty());

    match lines.next().and_then(parse_line) {
        Some(Line::Header(header)) if header.v == JSON_HISTORY_VERSION && header.sid == server_id => {}
        Some(Line::Header(header)) => {
            warn!(
                "Journal: header mismatch (v {}, sid {}), expected sid {}",
                header.v, header.sid, server_id
            );
            return Err(StorageError::Corrupt);
        }
        _ => return Err(StorageError::Corrupt),
    }

    let mut stats = ParseStats::default();
    for line in lines {
        match parse_line(line) {
            Some(Line::Entry(sample)) => {
                if (window.start..=window.end).contains(&sample.timestamp()) {
                    out.push(sample);
                    stats.accepted += 1;
                } else {
                    stats.out_of_range += 1;
                }
            }
            // A repeated header after an interrupted write is harmless
            Some(Line::Header(_)) => {}
            None => stats.malformed += 1,
        }
    }
    Ok(stats)
}

pub struct JsonDailyLog {
    utc_offset_secs: i32,
    retention_days: u16,
}

impl JsonDailyLog {
    pub const fn new(utc_offset_secs: i32, retention_days: u16) -> Self {
        Self {
            utc_offset_secs,
            retention_days,
        }
    }

    pub fn day_path(&self, slot: usize, date: NaiveDate) -> PathBuf {
        let mut path = slot_dir(slot);
        let _ = path.push('/');
        let _ = path.push_str(&day_file_name(date));
        path
    }

    /// Journal one sample, creating the day file with its header if needed
    ///
    /// A day file whose header names another server (the slot changed hands
    /// earlier that day) or was cut short is started over.
    pub fn append<F: FileSystem>(
        &self,
        fs: &mut F,
        slot: SlotRef<'_>,
        sample: Sample,
    ) -> Result<(), StorageError> {
        if !fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        if sample.timestamp() < TIMESTAMP_MIN_VALID {
            return Err(StorageError::ClockNotSynced);
        }

        let date = local_date(sample.timestamp(), self.utc_offset_secs);
        let path = self.day_path(slot.index, date);

        let entry = EntryLine {
            t: sample.timestamp(),
            p: sample.player_count(),
        };
        let line = serde_json::to_string(&entry).map_err(|_| StorageError::WriteFailed)?;

        let header = if !fs.exists(&path) {
            fs.create_dir_all(&slot_dir(slot.index))?;
            info!("Journal: starting {}", path);
            HeaderState::Missing
        } else {
            match fs.read_head(&path, HEADER_READ_LEN) {
                Ok(head) if header_matches(&head, slot.server_id) => HeaderState::Valid,
                Ok(_) => HeaderState::Foreign,
                Err(StorageError::NotFound) => HeaderState::Missing,
                Err(e) => return Err(e),
            }
        };
        if header == HeaderState::Valid {
            let mut text = line;
            text.push('\n');
            return fs.append(&path, text.as_bytes());
        }

        let mut text = header_line(slot.server_id, date)?;
        text.push_str(&line);
        text.push('\n');
        if header == HeaderState::Foreign {
            warn!("Journal: header of {} does not match server {}, starting over", path, slot.server_id);
            fs.write_all(&path, text.as_bytes())
        } else {
            fs.append(&path, text.as_bytes())
        }
    }

    /// Move the recent day files of every slot after `first` down one slot
    ///
    /// Runs when the server in `first` is deleted and the following servers
    /// take over its slot. Files of `first` itself are removed, and the last
    /// slot is left empty. Days older than `days` stay where they are; their
    /// header no longer matches the slot's server, so they are skipped on
    /// load until pruned.
    ///
    /// Returns the number of files moved.
    pub fn shift_down<F: FileSystem>(
        &self,
        fs: &mut F,
        first: usize,
        now: u32,
        days: u64,
    ) -> Result<usize, StorageError> {
        if !fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        if now < TIMESTAMP_MIN_VALID {
            return Err(StorageError::ClockNotSynced);
        }
        let today = local_date(now, self.utc_offset_secs);
        let oldest = days_before(today, days);

        let mut moved = 0;
        for index in first..MAX_SERVERS {
            for date in date_range(oldest, today) {
                let target = self.day_path(index, date);
                if fs.exists(&target) {
                    fs.remove(&target)?;
                }
                if index + 1 >= MAX_SERVERS {
                    continue;
                }
                let source = self.day_path(index + 1, date);
                if !fs.exists(&source) {
                    continue;
                }
                let bytes = fs.read_to_end(&source)?;
                fs.create_dir_all(&slot_dir(index))?;
                fs.write_all(&target, &bytes)?;
                fs.remove(&source)?;
                moved += 1;
            }
        }
        if moved > 0 {
            info!("Journal: moved {} files down from slot {}", moved, first + 1);
        }
        Ok(moved)
    }

    /// All journaled samples of `slot` with timestamps in `[start, end]`,
    /// sorted ascending
    pub fn load_range<F: FileSystem>(
        &self,
        fs: &mut F,
        slot: SlotRef<'_>,
        start: u32,
        end: u32,
    ) -> Result<Vec<Sample>, StorageError> {
        if !fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        let mut samples = Vec::new();
        if start > end {
            return Ok(samples);
        }

        let window = LoadWindow { start, end };
        let first = local_date(start, self.utc_offset_secs);
        let last = local_date(end, self.utc_offset_secs);
        for date in date_range(first, last) {
            let path = self.day_path(slot.index, date);
            let bytes = match fs.read_to_end(&path) {
                Ok(bytes) => bytes,
                Err(StorageError::NotFound) => continue,
                Err(e) => {
                    warn!("Journal: reading {} failed: {:?}", path, e);
                    continue;
                }
            };
            match parse_day(&bytes, slot.server_id, window, &mut samples) {
                Ok(stats) => {
                    if stats.malformed > 0 {
                        warn!("Journal: {} malformed lines skipped in {}", stats.malformed, path);
                    }
                    debug!("Journal: {} -> {:?}", path, stats);
                }
                Err(_) => warn!("Journal: skipping {}", path),
            }
        }

        // Lines are journaled in arrival order, which is not guaranteed to
        // be timestamp order across clock corrections
        samples.sort_by_key(|sample| sample.timestamp());
        Ok(samples)
    }

    /// Delete day files older than the retention period
    ///
    /// Returns the number of files removed.
    pub fn prune<F: FileSystem>(&self, fs: &mut F, slot: usize, now: u32) -> Result<usize, StorageError> {
        if !fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        let today = local_date(now, self.utc_offset_secs);
        let cutoff = days_before(today, u64::from(self.retention_days));
        let oldest = days_before(cutoff, PRUNE_LOOKBACK_DAYS);

        let mut removed = 0;
        for date in date_range(oldest, cutoff).filter(|date| *date < cutoff) {
            let path = self.day_path(slot, date);
            if fs.exists(&path) {
                fs.remove(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Journal: pruned {} files of slot {}", removed, slot);
        }
        Ok(removed)
    }
}

impl<F: FileSystem, K: KeyValueStore> HistoryBackend<F, K> for JsonDailyLog {
    fn kind(&self) -> BackendKind {
        BackendKind::JsonLog
    }

    fn load(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        window: LoadWindow,
    ) -> Result<Vec<Sample>, StorageError> {
        self.load_range(&mut storage.fs, slot, window.start, window.end)
    }

    fn exists(&self, storage: &mut Storage<F, K>, slot: SlotRef<'_>) -> bool {
        storage.fs.is_mounted() && storage.fs.exists(&slot_dir(slot.index))
    }
}
