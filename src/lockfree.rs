//! Harris-style lock-free ordered set.
//!
//! Removal is two-phase: the node's own `next` link is first flipped to [`Link::Deleted`]
//! (logical deletion), then the node is spliced out of the chain by a CAS on its
//! predecessor. Any traversal that passes a deleted run helps splice it out.
//!
//! Spliced nodes are handed to `crossbeam_epoch` for deferred destruction by whichever
//! thread won the splice.

use std::sync::atomic::{AtomicIsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use tracing::{debug, trace};

use crate::atomics::{compare_and_swap, AtomicWord};
use crate::ConcurrentOrderedSet;

const DELETED: usize = 1;

#[derive(Debug)]
pub struct Node<K> {
    // `None` only for the two sentinels
    key: Option<K>,
    next: Atomic<Self>,
}

impl<K> Node<K> {
    fn sentinel(next: Shared<'_, Node<K>>) -> Self {
        Self { key: None, next: next.into() }
    }
}

/// Decoded view of a successor link. The deleted flag lives in the low tag bit of the
/// pointer, so both variants are written and compared as one word.
enum Link<'g, K> {
    Live(Shared<'g, Node<K>>),
    Deleted(Shared<'g, Node<K>>),
}

impl<K> Clone for Link<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for Link<'_, K> {}

impl<'g, K> Link<'g, K> {
    fn load(atm: &Atomic<Node<K>>, g: &'g Guard) -> Self {
        Self::decode(atm.load(Ordering::SeqCst, g))
    }

    fn decode(s: Shared<'g, Node<K>>) -> Self {
        if s.tag() & DELETED == 0 {
            Link::Live(s)
        } else {
            Link::Deleted(s.with_tag(0))
        }
    }

    fn encode(self) -> Shared<'g, Node<K>> {
        match self {
            Link::Live(n) => n,
            Link::Deleted(n) => n.with_tag(DELETED),
        }
    }

    /// The successor with the flag stripped; safe to compare by identity.
    fn target(self) -> Shared<'g, Node<K>> {
        match self {
            Link::Live(n) | Link::Deleted(n) => n,
        }
    }

    fn is_deleted(self) -> bool {
        matches!(self, Link::Deleted(_))
    }
}

/// Left node and the right node it points to, as returned by `search`.
type Window<'g, K> = (&'g Node<K>, Shared<'g, Node<K>>);

#[derive(Debug)]
pub struct LockFreeList<K> {
    head: Atomic<Node<K>>,
    tail: Atomic<Node<K>>,
    // signed: a remove may decrement before the matching insert has incremented
    size: AtomicIsize,
}

impl<K> LockFreeList<K> {
    pub fn new() -> Self {
        let tail = Owned::new(Node::sentinel(Shared::null()));
        // nothing else can see the list yet
        let g = unsafe { epoch::unprotected() };
        let tail = tail.into_shared(g);
        let head = Owned::new(Node::sentinel(tail));
        debug!("lock-free list created");
        Self { head: Atomic::from(head), tail: Atomic::from(tail), size: AtomicIsize::new(0) }
    }

    /// Counter maintained by successful inserts and removes. Exact once the list is quiescent.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst).max(0) as usize
    }
}

impl<K> Default for LockFreeList<K> {
    fn default() -> Self {
        Self::new()
    }
}

// 'static: spliced nodes may be destroyed by the collector after the list is gone
impl<K: Ord + Clone + Send + 'static> LockFreeList<K> {
    pub fn insert(&self, key: &K) -> bool {
        let g = &epoch::pin();
        let mut new_node = Owned::new(Node { key: Some(key.clone()), next: Atomic::null() });
        loop {
            let (ln, rn) = self.search(key, g);
            if unsafe { rn.deref() }.key.as_ref() == Some(key) {
                return false;
            }
            // still private to this thread
            new_node.next = rn.into();
            match compare_and_swap(&ln.next, rn, new_node, g) {
                Ok(_) => {
                    self.size.fetch_and_increment();
                    return true;
                }
                Err((_, node)) => {
                    trace!("insert lost splice race, retrying");
                    new_node = node;
                }
            }
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let g = &epoch::pin();
        let (ln, rn, rn_next) = loop {
            let (ln, rn) = self.search(key, g);
            let rn_node = unsafe { rn.deref() };
            if rn_node.key.as_ref() != Some(key) {
                return false;
            }
            let rn_next = match Link::load(&rn_node.next, g) {
                Link::Live(next) => next,
                Link::Deleted(_) => continue,
            };
            let marked = Link::Deleted(rn_next).encode();
            if compare_and_swap(&rn_node.next, rn_next, marked, g).is_ok() {
                break (ln, rn, rn_next);
            }
            trace!("remove lost mark race, retrying");
        };
        self.size.fetch_and_decrement();
        // one helping attempt, otherwise let a search do the splice
        match compare_and_swap(&ln.next, rn, rn_next, g) {
            Ok(_) => unsafe { retire(rn, rn_next, g) },
            Err(_) => {
                trace!("helping unlink failed, deferring to search");
                let _ = self.search(key, g);
            }
        }
        true
    }

    /// Read-only scan: never splices, never retries.
    pub fn contains(&self, key: &K) -> bool {
        let g = &epoch::pin();
        let tail = self.tail.load(Ordering::SeqCst, g);
        let head = unsafe { self.head.load(Ordering::SeqCst, g).deref() };
        let mut it = Link::load(&head.next, g).target();
        while it != tail {
            let node = unsafe { it.deref() };
            let next = Link::load(&node.next, g);
            if !next.is_deleted() {
                if let Some(k) = node.key.as_ref() {
                    if k >= key {
                        return k == key;
                    }
                }
            }
            it = next.target();
        }
        false
    }

    /// Finds the adjacent pair `(ln, rn)` with `ln.key < key <= rn.key`, both live, splicing
    /// out any deleted run found between them. `rn` may be the tail sentinel.
    fn search<'g>(&self, key: &K, g: &'g Guard) -> Window<'g, K> {
        let tail = self.tail.load(Ordering::SeqCst, g);
        'search_again: loop {
            let head = self.head.load(Ordering::SeqCst, g);
            let mut ln: &'g Node<K> = unsafe { head.deref() };
            let mut ln_next = Shared::null();
            let mut t = head;
            let mut t_next = Link::load(&ln.next, g);
            let rn = loop {
                if let Link::Live(next) = t_next {
                    ln = unsafe { t.deref() };
                    ln_next = next;
                }
                t = t_next.target();
                if t == tail {
                    break t;
                }
                let t_node = unsafe { t.deref() };
                t_next = Link::load(&t_node.next, g);
                if !t_next.is_deleted() && t_node.key.as_ref().map_or(false, |k| k >= key) {
                    break t;
                }
            };

            if ln_next != rn {
                if compare_and_swap(&ln.next, ln_next, rn, g).is_err() {
                    trace!("search cleanup lost race, restarting");
                    continue 'search_again;
                }
                unsafe { retire(ln_next, rn, g) };
            }
            if rn != tail && Link::load(&unsafe { rn.deref() }.next, g).is_deleted() {
                continue 'search_again;
            }
            return (ln, rn);
        }
    }

    /// Live keys in list order. Only meaningful while no other thread is mutating.
    pub fn snapshot(&self) -> Vec<K> {
        let g = &epoch::pin();
        let tail = self.tail.load(Ordering::SeqCst, g);
        let head = unsafe { self.head.load(Ordering::SeqCst, g).deref() };
        let mut keys = vec![];
        let mut it = Link::load(&head.next, g).target();
        while it != tail {
            let node = unsafe { it.deref() };
            let next = Link::load(&node.next, g);
            if !next.is_deleted() {
                keys.extend(node.key.clone());
            }
            it = next.target();
        }
        keys
    }
}

/// Defers destruction of the chain `from..until`, which the caller has just spliced out.
///
/// Safety: every node in the chain must be deleted (so its link is frozen) and the caller's
/// CAS must be the one that made the chain unreachable.
unsafe fn retire<'g, K>(from: Shared<'g, Node<K>>, until: Shared<'g, Node<K>>, g: &'g Guard) {
    let mut cur = from;
    while cur != until {
        let link = Link::load(&cur.deref().next, g);
        debug_assert!(link.is_deleted());
        g.defer_destroy(cur);
        cur = link.target();
    }
}

impl<K> Drop for LockFreeList<K> {
    fn drop(&mut self) {
        // &mut self: no guard can be observing the list any more
        unsafe {
            let g = epoch::unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, g);
            while !cur.is_null() {
                let next = Link::load(&cur.deref().next, g).target();
                drop(cur.into_owned());
                cur = next;
            }
        }
        debug!("lock-free list dropped");
    }
}

impl<K: Ord + Clone + Send + Sync + 'static> ConcurrentOrderedSet<K> for LockFreeList<K> {
    fn new() -> Self {
        LockFreeList::new()
    }
    fn contains(&self, key: &K) -> bool {
        LockFreeList::contains(self, key)
    }
    fn insert(&self, key: &K) -> bool {
        LockFreeList::insert(self, key)
    }
    fn remove(&self, key: &K) -> bool {
        LockFreeList::remove(self, key)
    }
    fn size(&self) -> usize {
        LockFreeList::size(self)
    }
}
