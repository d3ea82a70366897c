//! Ordered set with one lock per node and hand-over-hand traversal.
//!
//! Nodes are reference counted so a traversal can keep an owned guard on the next node
//! while it lets go of the previous one. Locks are always taken head to tail.

use std::sync::Arc;

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};
use tracing::debug;

use crate::ConcurrentOrderedSet;

type NodeRef<K> = Arc<Mutex<Node<K>>>;
type NodeGuard<K> = ArcMutexGuard<RawMutex, Node<K>>;

#[derive(Debug)]
pub struct Node<K> {
    // `None` only for the head sentinel
    key: Option<K>,
    next: Option<NodeRef<K>>,
}

impl<K: Ord> Node<K> {
    fn at_or_after(&self, key: &K) -> bool {
        self.key.as_ref().map_or(false, |k| k >= key)
    }

    fn holds(&self, key: &K) -> bool {
        self.key.as_ref() == Some(key)
    }
}

#[derive(Debug)]
pub struct LockedList<K> {
    head: NodeRef<K>,
}

impl<K> LockedList<K> {
    pub fn new() -> Self {
        debug!("locked list created");
        Self { head: Arc::new(Mutex::new(Node { key: None, next: None })) }
    }

    /// Visits every element in order, holding at most two adjacent locks at a time.
    fn walk(&self, mut f: impl FnMut(&K)) {
        let mut prev = self.head.lock_arc();
        while let Some(next) = prev.next.clone() {
            let cur = next.lock_arc();
            if let Some(k) = cur.key.as_ref() {
                f(k);
            }
            prev = cur;
        }
    }

    /// Exact element count, taken by a full locked traversal.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.walk(|_| n += 1);
        n
    }
}

impl<K> Default for LockedList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> LockedList<K> {
    /// Returns `(prev, cur)` locked, where `cur` is the first node with a key `>= key`
    /// (`None` at the end of the list) and `prev` its predecessor.
    fn locate(&self, key: &K) -> (NodeGuard<K>, Option<NodeGuard<K>>) {
        let mut prev = self.head.lock_arc();
        loop {
            let next = match prev.next.clone() {
                Some(next) => next,
                None => return (prev, None),
            };
            let cur = next.lock_arc();
            if cur.at_or_after(key) {
                return (prev, Some(cur));
            }
            // cur is held, so prev can go
            prev = cur;
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let (_prev, cur) = self.locate(key);
        cur.map_or(false, |cur| cur.holds(key))
    }

    pub fn insert(&self, key: &K) -> bool {
        let (mut prev, cur) = self.locate(key);
        if cur.as_ref().map_or(false, |cur| cur.holds(key)) {
            return false;
        }
        drop(cur);
        let next = prev.next.take();
        prev.next = Some(Arc::new(Mutex::new(Node { key: Some(key.clone()), next })));
        true
    }

    pub fn remove(&self, key: &K) -> bool {
        let (mut prev, cur) = self.locate(key);
        match cur {
            Some(mut cur) if cur.holds(key) => {
                prev.next = cur.next.take();
                drop(prev);
                // last strong reference: the node is freed with its guard
                drop(cur);
                true
            }
            _ => false,
        }
    }

    /// Keys in list order, collected under hand-over-hand locking.
    pub fn snapshot(&self) -> Vec<K> {
        let mut keys = vec![];
        self.walk(|k| keys.push(k.clone()));
        keys
    }
}

impl<K> Drop for LockedList<K> {
    fn drop(&mut self) {
        // unlink one node at a time so a long chain is not dropped recursively
        let mut next = self.head.lock().next.take();
        while let Some(node) = next {
            next = node.lock().next.take();
        }
        debug!("locked list dropped");
    }
}

impl<K: Ord + Clone + Send + Sync> ConcurrentOrderedSet<K> for LockedList<K> {
    fn new() -> Self {
        LockedList::new()
    }
    fn contains(&self, key: &K) -> bool {
        LockedList::contains(self, key)
    }
    fn insert(&self, key: &K) -> bool {
        LockedList::insert(self, key)
    }
    fn remove(&self, key: &K) -> bool {
        LockedList::remove(self, key)
    }
    fn size(&self) -> usize {
        LockedList::size(self)
    }
}

#[cfg(test)]
mod test_super {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Barrier,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn locked_test_insert() {
        let list = LockedList::new();
        assert!(list.insert(&1));
        assert!(list.contains(&1));
        assert!(!list.insert(&1));
        assert_eq!(list.snapshot(), vec![1]);
    }

    #[test]
    fn locked_test_remove() {
        let list = LockedList::new();
        assert!(!list.remove(&3), "remove on empty list");
        assert!(!list.contains(&3));
        assert!(list.insert(&3));
        assert!(list.remove(&3));
        assert!(!list.contains(&3));
        assert_eq!(list.size(), 0);
    }

    #[test]
    fn keeps_order_on_front_middle_and_back_inserts() {
        let list = LockedList::new();
        for k in [50, 10, 90, 30, 70] {
            assert!(list.insert(&k));
        }
        assert_eq!(list.snapshot(), vec![10, 30, 50, 70, 90]);
        assert!(list.remove(&10));
        assert!(list.remove(&90));
        assert!(!list.remove(&60));
        assert_eq!(list.snapshot(), vec![30, 50, 70]);
        assert_eq!(list.size(), 3);
    }

    #[test]
    fn head_sentinel_never_matches() {
        let list: LockedList<i32> = LockedList::new();
        assert!(!list.contains(&0));
        assert!(!list.contains(&i32::MIN));
        assert!(list.insert(&i32::MIN));
        assert!(list.contains(&i32::MIN));
        assert!(list.remove(&i32::MIN));
        assert_eq!(list.size(), 0);
    }

    #[test]
    fn long_list_drops_without_recursion() {
        let list = LockedList::new();
        for k in (0..100_000u32).rev() {
            list.insert(&k);
        }
        assert_eq!(list.size(), 100_000);
        drop(list);
    }

    #[test]
    fn locked_disjoint_inserts() {
        let list: Arc<LockedList<u32>> = Arc::new(LockedList::new());
        let (no_t, per_thread) = (8u32, 500u32);
        let threads: Vec<_> = (0..no_t)
            .map(|i| {
                let t = Arc::clone(&list);
                thread::spawn(move || {
                    for k in i * per_thread..(i + 1) * per_thread {
                        assert!(t.insert(&k));
                    }
                })
            })
            .collect();
        for h in threads {
            h.join().unwrap();
        }
        assert_eq!(list.size(), (no_t * per_thread) as usize);
        assert!((0..no_t * per_thread).all(|k| list.contains(&k)));
    }

    #[test]
    fn same_key_race_has_one_winner() {
        for _ in 0..200 {
            let list: Arc<LockedList<u32>> = Arc::new(LockedList::new());
            let barrier = Arc::new(Barrier::new(2));
            let threads: Vec<_> = (0..2)
                .map(|_| {
                    let t = Arc::clone(&list);
                    let c = Arc::clone(&barrier);
                    thread::spawn(move || {
                        c.wait();
                        t.insert(&7)
                    })
                })
                .collect();
            let wins = threads.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
            assert_eq!(wins, 1);
            assert!(list.contains(&7));
        }
    }

    #[test]
    fn size_runs_alongside_writers() {
        let list: Arc<LockedList<u32>> = Arc::new(LockedList::new());
        let stop = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let list = Arc::clone(&list);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut i = 0u32;
                    while !stop.load(Ordering::Relaxed) {
                        let k = (i % 64) * 4 + t;
                        if i % 2 == 0 {
                            list.insert(&k);
                        } else {
                            list.remove(&k);
                        }
                        i += 1;
                    }
                })
            })
            .collect();
        for _ in 0..1_000 {
            assert!(list.size() <= 256);
        }
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        for h in writers {
            h.join().unwrap();
        }
        let snap = list.snapshot();
        assert!(snap.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(snap.len(), list.size());
    }
}
