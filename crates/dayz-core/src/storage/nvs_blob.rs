//! NVS flash mirror of the newest samples
//!
//! Two keys per slot:
//! - `h{slot}_meta`: u32 packing the ring's `head << 16 | count`
//! - `h{slot}_data`: up to `max_entries` samples, oldest first
//!
//! NVS survives SD card removal, so it is written on every flush and
//! consulted first on restore.

use alloc::vec::Vec;

use log::{debug, warn};

use super::backend::{BackendKind, HistoryBackend, LoadWindow, SlotRef, SnapshotBackend};
use super::sample::{decode_samples, encode_samples};
use super::{FileSystem, KeyValueStore, RingSnapshot, Sample, Storage, StorageError, nvs_key};

pub struct NvsBlob {
    max_entries: usize,
}

impl NvsBlob {
    pub const fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }
}

pub const fn pack_meta(head: usize, count: usize) -> u32 {
    (((head & 0xFFFF) as u32) << 16) | ((count & 0xFFFF) as u32)
}

/// `(head, count)`
pub const fn unpack_meta(meta: u32) -> (usize, usize) {
    ((meta >> 16) as usize, (meta & 0xFFFF) as usize)
}

impl<F: FileSystem, K: KeyValueStore> HistoryBackend<F, K> for NvsBlob {
    fn kind(&self) -> BackendKind {
        BackendKind::Nvs
    }

    fn load(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        _window: LoadWindow,
    ) -> Result<Vec<Sample>, StorageError> {
        let Some(meta) = storage.nvs.get_u32(&nvs_key(slot.index, "meta"))? else {
            return Ok(Vec::new());
        };
        let Some(blob) = storage.nvs.get_blob(&nvs_key(slot.index, "data"))? else {
            return Ok(Vec::new());
        };
        if blob.len() % Sample::ENCODED_LEN != 0 {
            warn!(
                "NVS slot {}: blob length {} is not a whole number of samples",
                slot.index,
                blob.len()
            );
            return Err(StorageError::Corrupt);
        }

        let (head, count) = unpack_meta(meta);
        let samples: Vec<Sample> = decode_samples(&blob).collect();
        debug!(
            "NVS slot {}: loaded {} samples (saved ring head {}, count {})",
            slot.index,
            samples.len(),
            head,
            count
        );
        Ok(samples)
    }

    fn exists(&self, storage: &mut Storage<F, K>, slot: SlotRef<'_>) -> bool {
        matches!(storage.nvs.get_u32(&nvs_key(slot.index, "meta")), Ok(Some(_)))
    }
}

impl<F: FileSystem, K: KeyValueStore> SnapshotBackend<F, K> for NvsBlob {
    fn save(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        snapshot: &RingSnapshot,
    ) -> Result<usize, StorageError> {
        let stored = snapshot.count.min(self.max_entries);
        let mut blob = Vec::with_capacity(stored * Sample::ENCODED_LEN);
        encode_samples(snapshot.most_recent(stored), &mut blob);

        storage.nvs.set_u32(
            &nvs_key(slot.index, "meta"),
            pack_meta(snapshot.head, snapshot.count),
        )?;
        storage.nvs.set_blob(&nvs_key(slot.index, "data"), &blob)?;
        storage.nvs.commit()?;

        debug!("NVS slot {}: saved {} samples", slot.index, stored);
        Ok(stored)
    }
}
