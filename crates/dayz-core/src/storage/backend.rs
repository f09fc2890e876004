//! Persistence backend chain and restore precedence

use alloc::vec::Vec;

use log::{debug, warn};

use super::{FileSystem, KeyValueStore, RingSnapshot, Sample, Storage, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Flash key/value mirror of the newest samples
    Nvs,
    /// Wholesale binary dump of the ring on the SD card
    Binary,
    /// Append-only daily JSON-lines files on the SD card
    JsonLog,
}

impl BackendKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Nvs => "nvs",
            Self::Binary => "binary",
            Self::JsonLog => "json",
        }
    }
}

/// Server slot being persisted or restored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef<'a> {
    pub index: usize,
    /// BattleMetrics id, checked against journal headers
    pub server_id: &'a str,
}

/// Inclusive timestamp bounds of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadWindow {
    pub start: u32,
    pub end: u32,
}

impl LoadWindow {
    /// The `span` seconds up to and including `now`
    pub fn ending_at(now: u32, span: u32) -> Self {
        Self {
            start: now.saturating_sub(span),
            end: now,
        }
    }
}

/// A place history can be restored from
pub trait HistoryBackend<F: FileSystem, K: KeyValueStore> {
    fn kind(&self) -> BackendKind;

    /// Samples of `slot` in oldest-first order
    ///
    /// Backends that cannot filter by time ignore `window`.
    fn load(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        window: LoadWindow,
    ) -> Result<Vec<Sample>, StorageError>;

    fn exists(&self, storage: &mut Storage<F, K>, slot: SlotRef<'_>) -> bool;
}

/// A backend rewritten wholesale from a ring snapshot
pub trait SnapshotBackend<F: FileSystem, K: KeyValueStore>: HistoryBackend<F, K> {
    /// Returns the number of samples written
    fn save(
        &self,
        storage: &mut Storage<F, K>,
        slot: SlotRef<'_>,
        snapshot: &RingSnapshot,
    ) -> Result<usize, StorageError>;
}

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreSelection {
    /// Backend the samples came from, `None` when nothing was found
    pub source: Option<BackendKind>,
    pub samples: Vec<Sample>,
}

/// Which backends are written on flush and in which order restores consult them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePolicy {
    /// Snapshot backends written on every flush, in order
    pub flush: &'static [BackendKind],
    /// Consulted in order until one yields samples
    pub fast: &'static [BackendKind],
    /// Consulted last; a non-empty result replaces the fast result
    pub authoritative: Option<BackendKind>,
}

impl RestorePolicy {
    pub const FAST_THEN_AUTHORITATIVE: Self = Self {
        flush: &[BackendKind::Nvs, BackendKind::Binary],
        fast: &[BackendKind::Nvs, BackendKind::Binary],
        authoritative: Some(BackendKind::JsonLog),
    };

    /// Pick the first fast result that yielded samples
    ///
    /// `results` is consumed lazily, so backends after the winning one are
    /// never loaded.
    pub fn pick_fast(
        &self,
        results: impl IntoIterator<Item = (BackendKind, Result<Vec<Sample>, StorageError>)>,
    ) -> RestoreSelection {
        for (kind, result) in results {
            match result {
                Ok(samples) if !samples.is_empty() => {
                    debug!("Restore: {} yielded {} samples", kind.label(), samples.len());
                    return RestoreSelection {
                        source: Some(kind),
                        samples,
                    };
                }
                Ok(_) | Err(StorageError::NotFound) => {
                    debug!("Restore: {} empty", kind.label());
                }
                Err(e) => {
                    warn!("Restore: {} failed: {:?}", kind.label(), e);
                }
            }
        }
        RestoreSelection::default()
    }

    /// Apply the authoritative backend's result on top of the fast selection
    ///
    /// An empty or failed authoritative load keeps the fast selection.
    pub fn apply_authoritative(
        &self,
        fast: RestoreSelection,
        kind: BackendKind,
        result: Result<Vec<Sample>, StorageError>,
    ) -> RestoreSelection {
        match result {
            Ok(samples) if !samples.is_empty() => {
                debug!(
                    "Restore: {} authoritative with {} samples (fast had {})",
                    kind.label(),
                    samples.len(),
                    fast.samples.len()
                );
                RestoreSelection {
                    source: Some(kind),
                    samples,
                }
            }
            Ok(_) => fast,
            Err(e) => {
                if e != StorageError::NotMounted {
                    warn!("Restore: {} failed: {:?}", kind.label(), e);
                }
                fast
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn samples(stamps: &[u32]) -> Vec<Sample> {
        stamps.iter().map(|&t| Sample::new(t, 1)).collect()
    }

    #[test]
    fn test_fast_chain_falls_back() {
        let policy = RestorePolicy::FAST_THEN_AUTHORITATIVE;
        let selection = policy.pick_fast(vec![
            (BackendKind::Nvs, Ok(Vec::new())),
            (BackendKind::Binary, Ok(samples(&[1, 2]))),
        ]);
        assert_eq!(selection.source, Some(BackendKind::Binary));
        assert_eq!(selection.samples, samples(&[1, 2]));
    }

    #[test]
    fn test_fast_chain_stops_at_first_hit() {
        let policy = RestorePolicy::FAST_THEN_AUTHORITATIVE;
        let mut consulted = Vec::new();
        let results = [BackendKind::Nvs, BackendKind::Binary].into_iter().map(|kind| {
            consulted.push(kind);
            (kind, Ok(samples(&[7])))
        });
        let selection = policy.pick_fast(results);

        assert_eq!(selection.source, Some(BackendKind::Nvs));
        assert_eq!(consulted, [BackendKind::Nvs], "Binary must not be loaded");
    }

    #[test]
    fn test_authoritative_replaces() {
        let policy = RestorePolicy::FAST_THEN_AUTHORITATIVE;
        let fast = RestoreSelection {
            source: Some(BackendKind::Nvs),
            samples: samples(&[1, 2, 3]),
        };
        let selection =
            policy.apply_authoritative(fast, BackendKind::JsonLog, Ok(samples(&[2, 3])));
        assert_eq!(selection.source, Some(BackendKind::JsonLog));
        assert_eq!(selection.samples, samples(&[2, 3]), "Replace, never merge");
    }

    #[test]
    fn test_empty_or_failed_authoritative_keeps_fast() {
        let policy = RestorePolicy::FAST_THEN_AUTHORITATIVE;
        let fast = RestoreSelection {
            source: Some(BackendKind::Binary),
            samples: samples(&[1]),
        };

        let kept = policy.apply_authoritative(fast.clone(), BackendKind::JsonLog, Ok(Vec::new()));
        assert_eq!(kept, fast);

        let kept = policy.apply_authoritative(
            fast.clone(),
            BackendKind::JsonLog,
            Err(StorageError::NotMounted),
        );
        assert_eq!(kept, fast);
    }

    #[test]
    fn test_nothing_found() {
        let policy = RestorePolicy::FAST_THEN_AUTHORITATIVE;
        let selection = policy.pick_fast(vec![
            (BackendKind::Nvs, Err(StorageError::NotFound)),
            (BackendKind::Binary, Err(StorageError::Corrupt)),
        ]);
        assert_eq!(selection, RestoreSelection::default());
    }
}
