use std::collections::BTreeSet;

use ordered_lists::{ConcurrentOrderedSet, LockFreeList, LockedList};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Operation {
    Insert(u8),
    Remove(u8),
    Contains(u8),
}

fn operations() -> impl Strategy<Value = Vec<Operation>> {
    proptest::collection::vec(
        prop_oneof![
            any::<u8>().prop_map(Operation::Insert),
            any::<u8>().prop_map(Operation::Remove),
            any::<u8>().prop_map(Operation::Contains),
        ],
        1..200,
    )
}

/// Replays `ops` against `S` and a `BTreeSet`, asserting identical outcomes.
fn check_against_model<S: ConcurrentOrderedSet<u8>>(ops: &[Operation]) {
    let set = S::new();
    let mut model = BTreeSet::new();
    for op in ops {
        match op {
            Operation::Insert(k) => assert_eq!(set.insert(k), model.insert(*k), "insert {k}"),
            Operation::Remove(k) => assert_eq!(set.remove(k), model.remove(k), "remove {k}"),
            Operation::Contains(k) => assert_eq!(set.contains(k), model.contains(k), "contains {k}"),
        }
        assert_eq!(set.size(), model.len());
    }
    for k in 0..=u8::MAX {
        assert_eq!(set.contains(&k), model.contains(&k), "final contents differ at {k}");
    }
}

proptest! {
    #[test]
    fn locked_list_matches_btreeset(ops in operations()) {
        check_against_model::<LockedList<u8>>(&ops);
    }

    #[test]
    fn lock_free_list_matches_btreeset(ops in operations()) {
        check_against_model::<LockFreeList<u8>>(&ops);
    }

    #[test]
    fn snapshots_stay_sorted(keys in proptest::collection::vec(any::<u16>(), 0..300)) {
        let locked = LockedList::new();
        let lock_free = LockFreeList::new();
        for k in &keys {
            locked.insert(k);
            lock_free.insert(k);
        }
        let expected: Vec<u16> = keys.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        prop_assert_eq!(locked.snapshot(), expected.clone());
        prop_assert_eq!(lock_free.snapshot(), expected);
    }
}

#[test]
fn round_trips() {
    fn round_trip<S: ConcurrentOrderedSet<i64>>() {
        let set = S::new();
        assert!(!set.remove(&5), "remove on empty set");
        assert!(set.insert(&5));
        assert!(set.contains(&5));
        assert!(!set.insert(&5));
        assert!(set.remove(&5));
        assert!(!set.contains(&5));
        assert_eq!(set.size(), 0);
    }
    round_trip::<LockedList<i64>>();
    round_trip::<LockFreeList<i64>>();
}

#[test]
fn sequential_size_conservation() {
    fn conserve<S: ConcurrentOrderedSet<u32>>() {
        let set = S::new();
        let inserted = (0..300u32).filter(|k| set.insert(&(k * 7 % 1000))).count();
        let removed = (0..300u32).step_by(3).filter(|k| set.remove(&(k * 7 % 1000))).count();
        assert_eq!(set.size(), inserted - removed);
    }
    conserve::<LockedList<u32>>();
    conserve::<LockFreeList<u32>>();
}
