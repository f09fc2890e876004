use dayz_core::storage::binary_snapshot::{decode, encode};
use dayz_core::storage::{RingStore, Sample};
use proptest::prelude::*;

fn filled(capacity: usize, appends: usize) -> RingStore {
    let mut ring = RingStore::new(capacity, usize::MAX);
    for i in 0..appends {
        ring.append(Sample::new(1_700_000_000 + i as u32, (i % 100) as i16));
    }
    ring
}

proptest! {
    #[test]
    fn ring_keeps_newest_in_order(capacity in 1usize..64, appends in 0usize..200) {
        let ring = filled(capacity, appends);
        let kept = appends.min(capacity);
        prop_assert_eq!(ring.len(), kept);

        let stamps: Vec<u32> = ring.iter().map(|s| s.timestamp()).collect();
        let expected: Vec<u32> = ((appends - kept)..appends)
            .map(|i| 1_700_000_000 + i as u32)
            .collect();
        prop_assert_eq!(stamps, expected);

        for i in 0..kept {
            prop_assert_eq!(ring.get(i).map(|s| s.timestamp()), Ok(expected_at(appends, kept, i)));
        }
        prop_assert!(ring.get(kept).is_err());
    }

    #[test]
    fn snapshot_file_restores_logical_order(capacity in 1usize..64, appends in 0usize..200) {
        let ring = filled(capacity, appends);
        let decoded = decode(&encode(&ring.snapshot())).expect("own encoding decodes");
        let logical: Vec<Sample> = ring.iter().collect();
        prop_assert_eq!(decoded, logical);
    }

    #[test]
    fn restore_keeps_most_recent(capacity in 1usize..64, restored in 0usize..200) {
        let samples: Vec<Sample> = (0..restored)
            .map(|i| Sample::new(1_700_000_000 + i as u32, 1))
            .collect();
        let mut ring = RingStore::new(capacity, 4);
        ring.restore(&samples);

        let kept = restored.min(capacity);
        prop_assert_eq!(ring.len(), kept);
        prop_assert_eq!(ring.dirty_count(), 0);
        let tail: Vec<Sample> = samples[restored - kept..].to_vec();
        prop_assert_eq!(ring.iter().collect::<Vec<_>>(), tail);

        // Appending after a restore continues from the newest sample
        ring.append(Sample::new(2_000_000_000, 2));
        prop_assert_eq!(ring.latest().map(|s| s.timestamp()), Some(2_000_000_000));
        prop_assert_eq!(ring.len(), (kept + 1).min(capacity));
    }
}

fn expected_at(appends: usize, kept: usize, logical: usize) -> u32 {
    1_700_000_000 + (appends - kept + logical) as u32
}
