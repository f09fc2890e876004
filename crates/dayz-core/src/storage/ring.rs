//! Fixed-capacity in-memory history for the active server
//!
//! The backing buffer is allocated once from the heap (PSRAM on the device).
//! Logical index 0 is always the oldest retained sample. Until the buffer
//! wraps, samples sit at physical indices `0..count`; once full, `head` is
//! both the next write position and the physical index of the oldest sample.

use alloc::vec;
use alloc::vec::Vec;

use super::{HistoryError, Sample};

pub struct RingStore {
    buffer: Vec<Sample>,
    /// Next write position
    head: usize,
    count: usize,
    /// Appends not yet captured by a successful flush
    dirty: usize,
    flush_threshold: usize,
}

impl RingStore {
    /// Allocate a store for `capacity` samples
    ///
    /// A zero capacity or threshold is bumped to 1.
    pub fn new(capacity: usize, flush_threshold: usize) -> Self {
        Self {
            buffer: vec![Sample::default(); capacity.max(1)],
            head: 0,
            count: 0,
            dirty: 0,
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty
    }

    /// Append a sample, overwriting the oldest one when full
    ///
    /// Returns `true` once enough samples are pending to warrant a flush.
    pub fn append(&mut self, sample: Sample) -> bool {
        let capacity = self.capacity();
        self.buffer[self.head] = sample;
        self.head = (self.head + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
        self.dirty = self.dirty.saturating_add(1);
        self.dirty >= self.flush_threshold
    }

    fn physical_index(&self, logical: usize) -> usize {
        let capacity = self.capacity();
        (self.head + capacity - self.count + logical) % capacity
    }

    /// Sample at logical index `index` (0 = oldest)
    pub fn get(&self, index: usize) -> Result<Sample, HistoryError> {
        if index >= self.count {
            return Err(HistoryError::OutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(self.buffer[self.physical_index(index)])
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Sample> + '_ {
        (0..self.count).map(move |i| self.buffer[self.physical_index(i)])
    }

    pub fn latest(&self) -> Option<Sample> {
        self.iter().next_back()
    }

    /// Number of samples with a timestamp at or after `cutoff`
    pub fn count_since(&self, cutoff: u32) -> usize {
        self.iter()
            .filter(|sample| sample.timestamp() >= cutoff)
            .count()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
        self.dirty = 0;
    }

    /// Replace the contents with `samples` (oldest first)
    ///
    /// Only the most recent `capacity` samples are kept. The restored set
    /// counts as already persisted.
    pub fn restore(&mut self, samples: &[Sample]) {
        let capacity = self.capacity();
        let keep = &samples[samples.len().saturating_sub(capacity)..];
        self.buffer[..keep.len()].copy_from_slice(keep);
        self.count = keep.len();
        self.head = keep.len() % capacity;
        self.dirty = 0;
    }

    /// Copy of the raw buffer and its indices, for persisting outside the lock
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            head: self.head,
            count: self.count,
            raw: self.buffer[..self.count].to_vec(),
            dirty: self.dirty,
        }
    }

    /// Account for a flush that captured `flushed` dirty samples
    ///
    /// Samples appended after the snapshot stay dirty.
    pub fn mark_flushed(&mut self, flushed: usize) {
        self.dirty = self.dirty.saturating_sub(flushed);
    }
}

/// Point-in-time copy of a [`RingStore`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RingSnapshot {
    pub head: usize,
    pub count: usize,
    /// Physical buffer contents, `count` samples long
    pub raw: Vec<Sample>,
    pub dirty: usize,
}

impl RingSnapshot {
    /// Samples from oldest to newest
    pub fn logical(&self) -> impl DoubleEndedIterator<Item = Sample> + '_ {
        logical_order(&self.raw, self.head)
    }

    /// The newest `n` samples, oldest first
    pub fn most_recent(&self, n: usize) -> impl Iterator<Item = Sample> + '_ {
        self.logical().skip(self.count.saturating_sub(n))
    }
}

/// Reorder a physical buffer into oldest-first order
///
/// A buffer that has not wrapped has `head == raw.len()` (or `head == 0`)
/// and is already in order. Otherwise the oldest sample sits at `head`.
pub(crate) fn logical_order(raw: &[Sample], head: usize) -> impl DoubleEndedIterator<Item = Sample> + '_ {
    let len = raw.len();
    let start = if head >= len { 0 } else { head };
    (0..len).map(move |i| raw[(start + i) % len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, n: u32) -> RingStore {
        let mut ring = RingStore::new(capacity, 10);
        for t in 1..=n {
            ring.append(Sample::new(t, t as i16));
        }
        ring
    }

    #[test]
    fn test_append_until_wrap() {
        let ring = filled(4, 6);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.head(), 2);
        let stamps: Vec<u32> = ring.iter().map(|s| s.timestamp()).collect();
        assert_eq!(stamps, [3, 4, 5, 6], "Oldest two samples must be evicted");
    }

    #[test]
    fn test_get_out_of_range() {
        let ring = filled(4, 2);
        assert_eq!(ring.get(1).map(|s| s.timestamp()), Ok(2));
        assert_eq!(
            ring.get(2),
            Err(HistoryError::OutOfRange { index: 2, count: 2 })
        );
    }

    #[test]
    fn test_flush_due_every_threshold() {
        let mut ring = RingStore::new(100, 3);
        assert!(!ring.append(Sample::new(1, 0)));
        assert!(!ring.append(Sample::new(2, 0)));
        assert!(ring.append(Sample::new(3, 0)));

        let snapshot = ring.snapshot();
        ring.append(Sample::new(4, 0));
        ring.mark_flushed(snapshot.dirty);
        assert_eq!(ring.dirty_count(), 1, "Append after snapshot stays dirty");
    }

    #[test]
    fn test_failed_flush_keeps_dirty() {
        let mut ring = RingStore::new(100, 2);
        ring.append(Sample::new(1, 0));
        assert!(ring.append(Sample::new(2, 0)));
        // No mark_flushed: the next append must still report a pending flush
        assert!(ring.append(Sample::new(3, 0)));
    }

    #[test]
    fn test_restore_keeps_newest() {
        let mut ring = RingStore::new(3, 10);
        let samples: Vec<Sample> = (1..=5).map(|t| Sample::new(t, 0)).collect();
        ring.restore(&samples);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.dirty_count(), 0);
        let stamps: Vec<u32> = ring.iter().map(|s| s.timestamp()).collect();
        assert_eq!(stamps, [3, 4, 5]);

        ring.append(Sample::new(6, 0));
        let stamps: Vec<u32> = ring.iter().map(|s| s.timestamp()).collect();
        assert_eq!(stamps, [4, 5, 6]);
    }

    #[test]
    fn test_snapshot_logical_order() {
        let ring = filled(4, 6);
        let snapshot = ring.snapshot();
        let stamps: Vec<u32> = snapshot.logical().map(|s| s.timestamp()).collect();
        assert_eq!(stamps, [3, 4, 5, 6]);

        let recent: Vec<u32> = snapshot.most_recent(2).map(|s| s.timestamp()).collect();
        assert_eq!(recent, [5, 6]);
    }

    #[test]
    fn test_count_since() {
        let ring = filled(10, 8);
        assert_eq!(ring.count_since(6), 3);
        assert_eq!(ring.count_since(100), 0);
        assert_eq!(ring.count_since(0), 8);
    }

    #[test]
    fn test_clear() {
        let mut ring = filled(4, 6);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
    }
}
