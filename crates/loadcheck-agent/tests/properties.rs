//! Property tests for the schedulable distribution, multipart chunking, and
//! name allocation.

use std::collections::{BTreeMap, BTreeSet};

use loadcheck_agent::{plan_chunks, ActionKind, BucketNameAllocator, FrequencyTable};
use proptest::prelude::*;

proptest! {
    /// Every action occupies exactly as many table slots as its weight.
    #[test]
    fn frequency_table_mirrors_weights(a in 0u32..=100) {
        let b = 100 - a;
        let mut distribution = BTreeMap::new();
        distribution.insert("archive-new-key".to_string(), a);
        distribution.insert("delete-key".to_string(), b);
        let table = FrequencyTable::build(&distribution).unwrap();

        prop_assert_eq!(table.weight_of(ActionKind::ArchiveNewKey), a as usize);
        prop_assert_eq!(table.weight_of(ActionKind::DeleteKey), b as usize);
        prop_assert_eq!(table.weight_of(ActionKind::CreateBucket), 0);
    }

    /// Chunk plans cover the payload exactly, with every part but the last at
    /// the configured size and the last absorbing the remainder.
    #[test]
    fn chunk_plan_partitions_the_payload(size in 1u64..1_000_000, part in 1u64..10_000) {
        let chunks = plan_chunks(size, part);
        prop_assert_eq!(chunks.iter().sum::<u64>(), size);
        prop_assert!(!chunks.is_empty());
        if size < part {
            prop_assert_eq!(&chunks, &vec![size]);
        } else {
            for chunk in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(*chunk, part);
            }
            let last = chunks[chunks.len() - 1];
            prop_assert!(last >= part);
            prop_assert!(last < 2 * part);
        }
    }

    /// Fresh bucket names always take the lowest suffix not already in use,
    /// and a full run hands out every free suffix exactly once.
    #[test]
    fn bucket_allocation_fills_lowest_gap(taken in prop::collection::btree_set(1u32..=20, 0..10)) {
        let mut alloc = BucketNameAllocator::new("u", 20);
        for suffix in &taken {
            alloc.observe_existing(&format!("u-{suffix:08}")).unwrap();
        }
        let expected = (1..=20).find(|s| !taken.contains(s));
        let next_suffix = alloc
            .next()
            .map(|name| name.trim_start_matches("u-").parse::<u32>().unwrap());
        prop_assert_eq!(next_suffix, expected);

        let mut seen: BTreeSet<u32> = taken.clone();
        if let Some(s) = next_suffix {
            seen.insert(s);
        }
        while let Some(name) = alloc.next() {
            let suffix: u32 = name.trim_start_matches("u-").parse().unwrap();
            prop_assert!(seen.insert(suffix));
        }
        prop_assert_eq!(seen.len(), 20);
    }
}
