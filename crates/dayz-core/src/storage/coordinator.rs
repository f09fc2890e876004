//! History orchestration across the ring and the three backends
//!
//! The coordinator owns no data itself. It moves samples between the hot
//! [`RingStore`](super::RingStore) inside [`AppState`] and the persistence
//! backends, taking the state lock only for in-memory work and the storage
//! lock only for I/O, never both at once.
//!
//! Switching the active server follows a save-before-switch barrier:
//! ownership of the ring is released and the snapshot to save is captured in
//! the same critical section, so no sample for the old server can slip in
//! between the save and the clear.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::MutexGuard;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use super::backend::{LoadWindow, RestoreSelection};
use super::binary_snapshot::BinarySnapshot;
use super::json_log::JsonDailyLog;
use super::nvs_blob::NvsBlob;
use super::{
    BackendKind, FileSystem, HistoryBackend, HistoryError, KeyValueStore, RestorePolicy,
    RingSnapshot, Sample, SharedStorage, SlotRef, SnapshotBackend, Storage, StorageError,
};
use crate::app_state::{AppState, BoundedLock, LockFailure, LockOutcome, ServerId, SharedState};
use crate::clock::Clock;
use crate::config::{HEATMAP_LOOKBACK_DAYS, MAX_SERVERS, TrackerConfig};
use crate::heatmap::Heatmap;

/// Result of [`HistoryCoordinator::add_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored in the ring; `flushed` is set when the dirty threshold
    /// triggered a successful snapshot flush
    Stored { flushed: bool },
    /// The ring belongs to another slot or a switch is in progress; the
    /// sample was only journaled
    NotOwner,
    /// The slot no longer holds the server that was polled
    Stale,
    /// State lock unavailable, sample dropped
    Skipped(LockFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStage {
    /// Releasing the ring and capturing the snapshot to save
    Barrier,
    /// Installing the restored samples
    Install,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchError {
    #[error("Invalid server slot {0}")]
    InvalidSlot(usize),
    #[error("State lock unavailable during {stage:?}")]
    Busy { stage: SwitchStage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchReport {
    /// Samples of the old slot written by the barrier flush
    pub saved: usize,
    /// Backend the new slot's history came from
    pub source: Option<BackendKind>,
    pub restored: usize,
}

/// What the barrier captured
enum Barrier {
    /// Old and new slot are the same and already own the ring
    Unchanged {
        server_id: ServerId,
        snapshot: RingSnapshot,
    },
    Handover {
        old: Option<(usize, ServerId, RingSnapshot)>,
        new_id: ServerId,
    },
}

type StorageGuard<'a, F, K> = MutexGuard<'a, CriticalSectionRawMutex, Storage<F, K>>;

pub struct HistoryCoordinator<'a, L, F, K> {
    state: &'a SharedState<L>,
    storage: &'a SharedStorage<F, K>,
    clock: &'a dyn Clock,
    config: &'a TrackerConfig,
    nvs: NvsBlob,
    binary: BinarySnapshot,
    journal: JsonDailyLog,
    policy: RestorePolicy,
}

impl<'a, L, F, K> HistoryCoordinator<'a, L, F, K>
where
    L: BoundedLock<Target = AppState>,
    F: FileSystem,
    K: KeyValueStore,
{
    pub fn new(
        state: &'a SharedState<L>,
        storage: &'a SharedStorage<F, K>,
        clock: &'a dyn Clock,
        config: &'a TrackerConfig,
    ) -> Self {
        Self {
            state,
            storage,
            clock,
            config,
            nvs: NvsBlob::new(config.nvs_history_max),
            binary: BinarySnapshot::new(),
            journal: JsonDailyLog::new(config.utc_offset_secs, config.json_retention_days),
            policy: RestorePolicy::FAST_THEN_AUTHORITATIVE,
        }
    }

    pub fn with_policy(mut self, policy: RestorePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RestorePolicy {
        self.policy
    }

    fn backend(&self, kind: BackendKind) -> &dyn HistoryBackend<F, K> {
        match kind {
            BackendKind::Nvs => &self.nvs,
            BackendKind::Binary => &self.binary,
            BackendKind::JsonLog => &self.journal,
        }
    }

    fn snapshot_backend(&self, kind: BackendKind) -> Option<&dyn SnapshotBackend<F, K>> {
        match kind {
            BackendKind::Nvs => Some(&self.nvs),
            BackendKind::Binary => Some(&self.binary),
            BackendKind::JsonLog => None,
        }
    }

    async fn lock_storage(&self) -> Result<StorageGuard<'a, F, K>, StorageError> {
        self.storage
            .acquire(self.config.storage_lock_timeout())
            .await
            .map_err(|failure| {
                warn!("Storage lock unavailable: {:?}", failure);
                StorageError::Busy
            })
    }

    /// Record a player count polled for `slot`
    ///
    /// The sample goes into the ring if `slot` owns it, and into the slot's
    /// journal either way. A flush of the fast backends follows once enough
    /// samples are dirty.
    pub async fn add_entry(&self, slot: SlotRef<'_>, players: i16) -> AppendOutcome {
        let sample = Sample::new(self.clock.now_unix(), players);

        let appended = self
            .state
            .with(|state| {
                let current = state.settings.server(slot.index).map(|s| s.server_id.as_str());
                if current != Some(slot.server_id) {
                    return None;
                }
                Some(state.history.append_for(slot.index, sample))
            })
            .await;

        let appended = match appended {
            LockOutcome::Applied(Some(result)) => result,
            LockOutcome::Applied(None) => {
                debug!("Slot {} changed server, dropping sample", slot.index);
                return AppendOutcome::Stale;
            }
            skipped => {
                let failure = skipped.failure().unwrap_or(LockFailure::Timeout);
                warn!("History append skipped: {:?}", failure);
                return AppendOutcome::Skipped(failure);
            }
        };

        self.journal_append(slot, sample).await;

        match appended {
            Ok(true) => AppendOutcome::Stored {
                flushed: self.flush_slot(slot.index).await.is_ok(),
            },
            Ok(false) => AppendOutcome::Stored { flushed: false },
            Err(_) => {
                debug!("Slot {} does not own the ring, sample only journaled", slot.index);
                AppendOutcome::NotOwner
            }
        }
    }

    /// Journal a secondary server's player count
    pub async fn record_secondary(&self, slot: SlotRef<'_>, players: i16) -> Result<(), StorageError> {
        if players < 0 {
            return Ok(());
        }
        let sample = Sample::new(self.clock.now_unix(), players);
        let mut storage = self.lock_storage().await?;
        self.journal.append(&mut storage.fs, slot, sample)
    }

    async fn journal_append(&self, slot: SlotRef<'_>, sample: Sample) {
        let result = match self.lock_storage().await {
            Ok(mut storage) => self.journal.append(&mut storage.fs, slot, sample),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(StorageError::NotMounted) => debug!("Journal skipped: SD card not mounted"),
            Err(e) => warn!("Journal append for slot {} failed: {:?}", slot.index, e),
        }
    }

    /// Write `snapshot` to every flush backend, NVS first
    ///
    /// Succeeds when at least one backend took it.
    async fn save_snapshot(&self, slot: SlotRef<'_>, snapshot: &RingSnapshot) -> Result<usize, StorageError> {
        let mut guard = self.lock_storage().await?;
        let storage = &mut *guard;

        let mut written = 0;
        let mut last_error = StorageError::NotMounted;
        for &kind in self.policy.flush {
            let Some(backend) = self.snapshot_backend(kind) else {
                continue;
            };
            match backend.save(storage, slot, snapshot) {
                Ok(saved) => {
                    debug!("Flush: {} took {} samples of slot {}", kind.label(), saved, slot.index);
                    written += 1;
                }
                Err(StorageError::NotMounted) => {
                    debug!("Flush: {} skipped, not mounted", kind.label());
                }
                Err(e) => {
                    warn!("Flush: {} failed for slot {}: {:?}", kind.label(), slot.index, e);
                    last_error = e;
                }
            }
        }
        if written == 0 {
            return Err(last_error);
        }
        Ok(snapshot.count)
    }

    async fn flush_slot(&self, slot: usize) -> Result<usize, StorageError> {
        let captured = self
            .state
            .with(|state| {
                if state.history.owner() != Some(slot) {
                    return None;
                }
                let server_id = state.settings.server(slot)?.server_id.clone();
                Some((server_id, state.history.ring().snapshot()))
            })
            .await;
        let Some((server_id, snapshot)) = captured.applied().flatten() else {
            return Err(StorageError::Busy);
        };

        let slot_ref = SlotRef {
            index: slot,
            server_id: &server_id,
        };
        let saved = self.save_snapshot(slot_ref, &snapshot).await?;

        // A switch may have taken the ring away while we were writing
        let _ = self
            .state
            .with(|state| {
                if state.history.owner() == Some(slot) {
                    state.history.ring_mut().mark_flushed(snapshot.dirty);
                }
            })
            .await;
        Ok(saved)
    }

    /// Flush the ring's owner regardless of the dirty count
    ///
    /// Returns the number of samples written, 0 when nobody owns the ring or
    /// nothing is dirty.
    pub async fn flush_now(&self) -> Result<usize, StorageError> {
        let owner = self
            .state
            .with(|state| {
                state
                    .history
                    .owner()
                    .filter(|_| state.history.ring().dirty_count() > 0)
            })
            .await;
        match owner {
            LockOutcome::Applied(Some(slot)) => self.flush_slot(slot).await,
            LockOutcome::Applied(None) => Ok(0),
            _ => Err(StorageError::Busy),
        }
    }

    /// Forget the server deleted from slot `first`
    ///
    /// Slots shift down when a server is deleted. Snapshots of every slot
    /// from `first` on are emptied, since they would otherwise be restored
    /// for the wrong server. Recent journal files move down with their
    /// servers.
    pub async fn discard_from(&self, first: usize) -> Result<(), StorageError> {
        let now = self.clock.now_unix();
        let mut guard = self.lock_storage().await?;
        let storage = &mut *guard;
        let empty = RingSnapshot::default();

        for index in first..MAX_SERVERS {
            let slot = SlotRef { index, server_id: "" };
            for &kind in self.policy.flush {
                let Some(backend) = self.snapshot_backend(kind) else {
                    continue;
                };
                match backend.save(storage, slot, &empty) {
                    Ok(_) | Err(StorageError::NotMounted) => {}
                    Err(e) => warn!("Discarding {} of slot {} failed: {:?}", kind.label(), index, e),
                }
            }
        }
        debug!("Snapshots discarded from slot {}", first);

        match self
            .journal
            .shift_down(&mut storage.fs, first, now, HEATMAP_LOOKBACK_DAYS)
        {
            Ok(_) | Err(StorageError::NotMounted) => Ok(()),
            Err(e) => {
                warn!("Moving journals down from slot {} failed: {:?}", first, e);
                Err(e)
            }
        }
    }

    /// Move the hot ring from `old` to `new`
    ///
    /// `old` is `None` when the previous server's data must not be saved
    /// (it was deleted, or nothing owns the ring yet at boot).
    pub async fn switch_active_server(
        &self,
        old: Option<usize>,
        new: usize,
    ) -> Result<SwitchReport, SwitchError> {
        let barrier = self
            .state
            .with(|state| {
                let count = state.settings.server_count();
                if new >= count {
                    return Err(SwitchError::InvalidSlot(new));
                }
                if let Some(old) = old.filter(|&old| old >= count) {
                    return Err(SwitchError::InvalidSlot(old));
                }
                let server_id = |index: usize| {
                    state
                        .settings
                        .server(index)
                        .map(|s| s.server_id.clone())
                        .unwrap_or_default()
                };
                let new_id = server_id(new);

                if old == Some(new) && state.history.owner() == Some(new) {
                    return Ok(Barrier::Unchanged {
                        server_id: new_id,
                        snapshot: state.history.ring().snapshot(),
                    });
                }

                let previous = state.history.release();
                let ring = state.history.ring_mut();
                let saved = match old {
                    Some(old) if previous == Some(old) && !ring.is_empty() => {
                        Some((old, server_id(old), ring.snapshot()))
                    }
                    _ => None,
                };
                ring.clear();
                Ok(Barrier::Handover { old: saved, new_id })
            })
            .await;

        let barrier = match barrier {
            LockOutcome::Applied(result) => result?,
            _ => {
                return Err(SwitchError::Busy {
                    stage: SwitchStage::Barrier,
                });
            }
        };

        let (old, new_id) = match barrier {
            Barrier::Unchanged { server_id, snapshot } => {
                return Ok(self.flush_unchanged(new, &server_id, snapshot).await);
            }
            Barrier::Handover { old, new_id } => (old, new_id),
        };

        let old_index = old.as_ref().map(|(index, _, _)| *index);
        let mut report = SwitchReport::default();
        if let Some((index, server_id, snapshot)) = old {
            let slot = SlotRef {
                index,
                server_id: server_id.as_str(),
            };
            match self.save_snapshot(slot, &snapshot).await {
                Ok(saved) => report.saved = saved,
                Err(e) => warn!("Switch: saving slot {} failed: {:?}", index, e),
            }
        }

        let slot = SlotRef {
            index: new,
            server_id: &new_id,
        };
        let selection = self.restore(slot).await;
        report.source = selection.source;
        report.restored = selection.samples.len();

        let installed = self
            .state
            .with(|state| state.history.install(new, &selection.samples))
            .await;
        if !installed.is_applied() {
            return Err(SwitchError::Busy {
                stage: SwitchStage::Install,
            });
        }

        info!(
            "History switched {:?} -> {}: saved {}, restored {} from {}",
            old_index,
            new,
            report.saved,
            report.restored,
            report.source.map_or("nothing", BackendKind::label)
        );
        Ok(report)
    }

    async fn flush_unchanged(&self, slot: usize, server_id: &str, snapshot: RingSnapshot) -> SwitchReport {
        let mut report = SwitchReport {
            restored: snapshot.count,
            ..SwitchReport::default()
        };
        if snapshot.dirty == 0 {
            return report;
        }
        let slot_ref = SlotRef { index: slot, server_id };
        if let Ok(saved) = self.save_snapshot(slot_ref, &snapshot).await {
            report.saved = saved;
            let _ = self
                .state
                .with(|state| {
                    if state.history.owner() == Some(slot) {
                        state.history.ring_mut().mark_flushed(snapshot.dirty);
                    }
                })
                .await;
        }
        report
    }

    /// Load `slot`'s history following the restore policy
    ///
    /// Without the storage lock the result is empty.
    pub async fn restore(&self, slot: SlotRef<'_>) -> RestoreSelection {
        let window = LoadWindow::ending_at(self.clock.now_unix(), self.config.json_load_window_secs);
        let Ok(mut guard) = self.lock_storage().await else {
            return RestoreSelection::default();
        };
        let storage = &mut *guard;

        let fast = self.policy.pick_fast(
            self.policy
                .fast
                .iter()
                .map(|&kind| (kind, self.backend(kind).load(storage, slot, window))),
        );
        match self.policy.authoritative {
            Some(kind) => {
                let result = self.backend(kind).load(storage, slot, window);
                self.policy.apply_authoritative(fast, kind, result)
            }
            None => fast,
        }
    }

    /// Restore the active server's history at boot
    pub async fn restore_active(&self) -> Result<SwitchReport, SwitchError> {
        let active = self
            .state
            .with(|state| state.settings.active_index())
            .await
            .applied()
            .ok_or(SwitchError::Busy {
                stage: SwitchStage::Barrier,
            })?;
        self.switch_active_server(None, active).await
    }

    pub async fn get_entry(&self, index: usize) -> LockOutcome<Result<Sample, HistoryError>> {
        self.state.with(|state| state.history.ring().get(index)).await
    }

    pub async fn count(&self) -> LockOutcome<usize> {
        self.state.with(|state| state.history.ring().len()).await
    }

    /// Samples from the last `seconds`
    pub async fn count_in_range(&self, seconds: u32) -> LockOutcome<usize> {
        let cutoff = self.clock.now_unix().saturating_sub(seconds);
        self.state
            .with(|state| state.history.ring().count_since(cutoff))
            .await
    }

    /// Samples of the selected graph range, oldest first
    pub async fn entries_in_range(&self, seconds: u32) -> LockOutcome<Vec<Sample>> {
        let cutoff = self.clock.now_unix().saturating_sub(seconds);
        self.state
            .with(|state| {
                state
                    .history
                    .ring()
                    .iter()
                    .filter(|sample| sample.timestamp() >= cutoff)
                    .collect()
            })
            .await
    }

    /// Weekly activity of the server in `slot` over the last four weeks of
    /// its journal
    pub async fn heatmap(&self, slot: usize) -> Result<Heatmap, StorageError> {
        let server_id = self
            .state
            .with(|state| state.settings.server(slot).map(|s| s.server_id.clone()))
            .await
            .applied()
            .ok_or(StorageError::Busy)?
            .ok_or(StorageError::NotFound)?;
        let end = self.clock.now_unix();
        let start = end.saturating_sub(HEATMAP_LOOKBACK_DAYS as u32 * 86_400);

        let samples = {
            let mut storage = self.lock_storage().await?;
            let slot = SlotRef {
                index: slot,
                server_id: server_id.as_str(),
            };
            self.journal.load_range(&mut storage.fs, slot, start, end)?
        };
        let heatmap = Heatmap::from_samples(&samples, self.config.utc_offset_secs);
        info!(
            "Heatmap for slot {}: {} samples, averages {}..{}",
            slot, heatmap.samples, heatmap.min_avg, heatmap.max_avg
        );
        Ok(heatmap)
    }

    /// Periodic upkeep: remount a pulled card and prune old journal files
    ///
    /// Returns the number of files pruned.
    pub async fn maintain(&self) -> Result<usize, StorageError> {
        let slots = self
            .state
            .with(|state| state.settings.server_count())
            .await
            .applied()
            .ok_or(StorageError::Busy)?;
        let now = self.clock.now_unix();

        let mut storage = self.lock_storage().await?;
        if !storage.fs.is_mounted() && !storage.fs.try_remount() {
            return Err(StorageError::NotMounted);
        }
        if !self.clock.is_synced() {
            return Err(StorageError::ClockNotSynced);
        }
        let mut pruned = 0;
        for slot in 0..slots {
            pruned += self.journal.prune(&mut storage.fs, slot, now)?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::{FaultInjectingLock, Settings, TimedMutex};
    use crate::clock::ManualClock;
    use crate::storage::memory::{MemoryFileSystem, MemoryKeyValueStore};
    use embassy_futures::block_on;
    use embassy_time::Duration;

    const T0: u32 = 1_730_764_800;

    type State = SharedState<FaultInjectingLock<AppState>>;
    type Store = SharedStorage<MemoryFileSystem, MemoryKeyValueStore>;

    fn config() -> TrackerConfig {
        TrackerConfig {
            history_capacity: 32,
            save_interval: 4,
            utc_offset_secs: 0,
            ..TrackerConfig::default()
        }
    }

    fn fixture(config: &TrackerConfig) -> (State, Store, ManualClock) {
        let mut settings = Settings::default();
        let _ = settings.add_server("111", "second");
        let _ = settings.select(0);
        let state = SharedState::new(
            FaultInjectingLock::new(AppState::new(config, settings)),
            Duration::from_millis(10),
        );
        let storage = TimedMutex::new(Storage::new(
            MemoryFileSystem::new(),
            MemoryKeyValueStore::new(),
        ));
        (state, storage, ManualClock::new(T0))
    }

    fn active_ref(index: usize) -> SlotRef<'static> {
        let server_id = if index == 0 {
            crate::config::DEFAULT_SERVER_ID
        } else {
            "111"
        };
        SlotRef { index, server_id }
    }

    #[test]
    fn test_flush_after_threshold() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            assert!(coordinator.restore_active().await.is_ok());
            for i in 0..4 {
                clock.advance(60);
                let outcome = coordinator.add_entry(active_ref(0), 10 + i).await;
                let expected = AppendOutcome::Stored { flushed: i == 3 };
                assert_eq!(outcome, expected, "append {}", i);
            }
            let dirty = state.with(|s| s.history.ring().dirty_count()).await;
            assert_eq!(dirty, LockOutcome::Applied(0));
        });
        let mut storage = storage.into_inner();
        assert_eq!(
            storage.nvs.get_u32("h0_meta"),
            Ok(Some(crate::storage::nvs_blob::pack_meta(4, 4)))
        );
        assert!(storage.fs.file("HIST0.BIN").is_some());
    }

    #[test]
    fn test_stale_slot_is_dropped() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            let _ = coordinator.restore_active().await;
            let stale = SlotRef {
                index: 1,
                server_id: "999",
            };
            assert_eq!(coordinator.add_entry(stale, 5).await, AppendOutcome::Stale);
        });
    }

    #[test]
    fn test_skipped_append_leaves_ring_untouched() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            let _ = coordinator.restore_active().await;
            state.lock().fail_next(LockFailure::Timeout);
            assert_eq!(
                coordinator.add_entry(active_ref(0), 5).await,
                AppendOutcome::Skipped(LockFailure::Timeout)
            );
            assert_eq!(coordinator.count().await, LockOutcome::Applied(0));
        });
        let storage = storage.into_inner();
        assert_eq!(storage.fs.file_names().count(), 0, "Nothing journaled");
    }

    #[test]
    fn test_invalid_switch_is_rejected_without_mutation() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            let _ = coordinator.restore_active().await;
            let _ = coordinator.add_entry(active_ref(0), 5).await;
            assert_eq!(
                coordinator.switch_active_server(Some(0), 7).await,
                Err(SwitchError::InvalidSlot(7))
            );
            assert_eq!(
                coordinator.switch_active_server(Some(9), 1).await,
                Err(SwitchError::InvalidSlot(9))
            );
            let owner = state.with(|s| s.history.owner()).await;
            assert_eq!(owner, LockOutcome::Applied(Some(0)));
            assert_eq!(coordinator.count().await, LockOutcome::Applied(1));
        });
    }

    #[test]
    fn test_switch_busy_at_barrier() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            state.lock().fail_next(LockFailure::Contention);
            assert_eq!(
                coordinator.switch_active_server(None, 0).await,
                Err(SwitchError::Busy {
                    stage: SwitchStage::Barrier
                })
            );
        });
    }

    #[test]
    fn test_count_in_range() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            let _ = coordinator.restore_active().await;
            for _ in 0..3 {
                let _ = coordinator.add_entry(active_ref(0), 1).await;
                clock.advance(1800);
            }
            // Samples at T0, T0+1800, T0+3600; now is T0+5400
            assert_eq!(coordinator.count_in_range(3600).await, LockOutcome::Applied(2));
            assert_eq!(
                coordinator.get_entry(0).await.applied().and_then(Result::ok),
                Some(Sample::new(T0, 1))
            );
            assert!(matches!(
                coordinator.get_entry(3).await,
                LockOutcome::Applied(Err(HistoryError::OutOfRange { index: 3, count: 3 }))
            ));
        });
    }

    #[test]
    fn test_heatmap_from_journal() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
        block_on(async {
            for players in [20, 30, 40] {
                clock.advance(600);
                assert_eq!(coordinator.record_secondary(active_ref(1), players).await, Ok(()));
            }

            // T0 is a Tuesday midnight
            let heatmap = coordinator.heatmap(1).await.expect("journal readable");
            assert_eq!(heatmap.samples, 3);
            assert_eq!(heatmap.busiest(), Some((1, 0, 30)));
            assert_eq!((heatmap.min_avg, heatmap.max_avg), (30, 30));

            let empty = coordinator.heatmap(0).await.expect("journal readable");
            assert_eq!((empty.samples, empty.min_avg, empty.max_avg), (0, 0, 60));
            assert_eq!(coordinator.heatmap(4).await, Err(StorageError::NotFound));
        });
    }

    #[test]
    fn test_maintain_reports_unmounted_card() {
        let config = config();
        let (state, storage, clock) = fixture(&config);
        block_on(async {
            if let Ok(mut guard) = storage.acquire(Duration::from_millis(10)).await {
                guard.fs.set_mounted(false);
            }
            let coordinator = HistoryCoordinator::new(&state, &storage, &clock, &config);
            assert_eq!(coordinator.maintain().await, Err(StorageError::NotMounted));
        });
    }
}
