//! Binary snapshot of the whole ring on the SD card
//!
//! Binary format (little-endian), one file per slot (`HIST{slot}.BIN`):
//! - magic: 4 bytes (u32, [`HISTORY_FILE_MAGIC`])
//! - head: 4 bytes (u32)
//! - count: 4 bytes (u32)
//! - count x sample (6 bytes each) in physical ring order

use alloc::vec::Vec;

use log::{debug, warn};

use super::backend::{BackendKind, HistoryBackend, LoadWindow, SlotRef, SnapshotBackend};
use super::ring::logical_order;
use super::sample::{decode_samples, encode_samples};
use super::{
    FileSystem, KeyValueStore, RingSnapshot, Sample, Storage, StorageError, snapshot_path,
};
use crate::config::HISTORY_FILE_MAGIC;

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Default)]
pub struct BinarySnapshot;

impl BinarySnapshot {
    pub const fn new() -> Self {
        Self
    }
}

/// Serialize a snapshot into the file layout
pub fn encode(snapshot: &RingSnapshot) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + snapshot.raw.len() * Sample::ENCODED_LEN);
    bytes.extend_from_slice(&HISTORY_FILE_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&(snapshot.head as u32).to_le_bytes());
    bytes.extend_from_slice(&(snapshot.raw.len() as u32).to_le_bytes());
    encode_samples(snapshot.raw.iter().copied(), &mut bytes);
    bytes
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parse a snapshot file into oldest-first samples
///
/// A ring that was not yet full is saved with `head == count`; if its body
/// is short the complete records are kept. A short body of a full ring
/// cannot be put back in order and is rejected.
pub fn decode(bytes: &[u8]) -> Result<Vec<Sample>, StorageError> {
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Corrupt);
    }
    let magic = read_u32(bytes, 0);
    if magic != HISTORY_FILE_MAGIC {
        warn!("Snapshot: bad magic {:#010x}", magic);
        return Err(StorageError::Corrupt);
    }
    let head = read_u32(bytes, 4) as usize;
    let count = read_u32(bytes, 8) as usize;
    if head > count {
        return Err(StorageError::Corrupt);
    }

    let body = &bytes[HEADER_LEN..];
    let available = body.len() / Sample::ENCODED_LEN;
    let full = head < count;
    if available < count {
        if full {
            warn!("Snapshot: truncated full ring ({} of {} records)", available, count);
            return Err(StorageError::Corrupt);
        }
        debug!("Snapshot: truncated, keeping {} of {} records", available, count);
    }

    let raw: Vec<Sample> = decode_samples(body).take(count).collect();
    Ok(logical_order(&raw, head).collect())
}

impl<F: FileSystem, K: KeyValueStore> HistoryBackend<F, K> for BinarySnapshot {
    fn kind(&self) -> BackendKind {
        BackendKind::Binary
    }

    fn load(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        _window: LoadWindow,
    ) -> Result<Vec<Sample>, StorageError> {
        if !storage.fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        let bytes = storage.fs.read_to_end(&snapshot_path(slot.index))?;
        let samples = decode(&bytes)?;
        debug!("Snapshot slot {}: loaded {} samples", slot.index, samples.len());
        Ok(samples)
    }

    fn exists(&self, storage: &mut Storage<F, K>, slot: SlotRef<'_>) -> bool {
        storage.fs.is_mounted() && storage.fs.exists(&snapshot_path(slot.index))
    }
}

impl<F: FileSystem, K: KeyValueStore> SnapshotBackend<F, K> for BinarySnapshot {
    fn save(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        snapshot: &RingSnapshot,
    ) -> Result<usize, StorageError> {
        if !storage.fs.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        storage
            .fs
            .write_all(&snapshot_path(slot.index), &encode(snapshot))?;
        debug!("Snapshot slot {}: saved {} samples", slot.index, snapshot.count);
        Ok(snapshot.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RingStore;
    use crate::storage::memory::{MemoryFileSystem, MemoryKeyValueStore};

    const SLOT: SlotRef<'static> = SlotRef {
        index: 0,
        server_id: "29986583",
    };
    const WINDOW: LoadWindow = LoadWindow { start: 0, end: u32::MAX };

    fn ring_with(capacity: usize, n: u32) -> RingStore {
        let mut ring = RingStore::new(capacity, 1000);
        for t in 1..=n {
            ring.append(Sample::new(t, (t * 2) as i16));
        }
        ring
    }

    fn stamps(samples: &[Sample]) -> Vec<u32> {
        samples.iter().map(|s| s.timestamp()).collect()
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&ring_with(4, 2).snapshot());
        assert_eq!(bytes.len(), HEADER_LEN + 2 * Sample::ENCODED_LEN);
        assert_eq!(&bytes[0..4], &HISTORY_FILE_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes(), "head");
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes(), "count");
    }

    #[test]
    fn test_wrapped_ring_restores_in_order() {
        let bytes = encode(&ring_with(4, 7).snapshot());
        let samples = decode(&bytes).unwrap_or_default();
        assert_eq!(stamps(&samples), [4, 5, 6, 7]);
    }

    #[test]
    fn test_bad_magic_fails_closed() {
        let mut bytes = encode(&ring_with(4, 3).snapshot());
        bytes[0] ^= 0xFF;
        assert_eq!(decode(&bytes), Err(StorageError::Corrupt));
    }

    #[test]
    fn test_truncated_linear_body_keeps_whole_records() {
        let mut bytes = encode(&ring_with(8, 5).snapshot());
        bytes.truncate(HEADER_LEN + 3 * Sample::ENCODED_LEN + 2);
        let samples = decode(&bytes).unwrap_or_default();
        assert_eq!(stamps(&samples), [1, 2, 3]);
    }

    #[test]
    fn test_truncated_full_body_is_corrupt() {
        let mut bytes = encode(&ring_with(4, 6).snapshot());
        bytes.truncate(bytes.len() - 1);
        assert_eq!(decode(&bytes), Err(StorageError::Corrupt));

        // Exactly wrapped: head is back at 0 but the buffer is full
        let mut bytes = encode(&ring_with(4, 8).snapshot());
        bytes.truncate(bytes.len() - Sample::ENCODED_LEN);
        assert_eq!(decode(&bytes), Err(StorageError::Corrupt));
    }

    #[test]
    fn test_save_load_through_file_system() {
        let mut storage = Storage::new(MemoryFileSystem::new(), MemoryKeyValueStore::new());
        let ring = ring_with(4, 9);
        let backend = BinarySnapshot::new();

        assert_eq!(backend.save(&mut storage, SLOT, &ring.snapshot()), Ok(4));
        assert!(backend.exists(&mut storage, SLOT));
        let samples = backend.load(&mut storage, SLOT, WINDOW).unwrap_or_default();
        assert_eq!(stamps(&samples), [6, 7, 8, 9]);
    }

    #[test]
    fn test_unmounted_card() {
        let mut storage = Storage::new(MemoryFileSystem::new(), MemoryKeyValueStore::new());
        storage.fs.set_mounted(false);
        let backend = BinarySnapshot::new();

        assert_eq!(
            backend.save(&mut storage, SLOT, &ring_with(4, 1).snapshot()),
            Err(StorageError::NotMounted)
        );
        assert_eq!(
            backend.load(&mut storage, SLOT, WINDOW),
            Err(StorageError::NotMounted)
        );
    }
}
