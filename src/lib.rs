
pub mod atomics;
pub mod harness;
pub mod locked;
pub mod lockfree;

pub use locked::LockedList;
pub use lockfree::LockFreeList;

/// The operations both lists expose. Every method takes `&self`; implementations
/// synchronize internally and can be shared across threads directly.
///
/// Failed inserts and removes are ordinary outcomes, not errors: under concurrency a
/// duplicate insert cannot be told apart from one that lost a race to another thread.
pub trait ConcurrentOrderedSet<K>: Send + Sync {
    fn new() -> Self
    where
        Self: Sized;
    /// True iff `key` is present.
    fn contains(&self, key: &K) -> bool;
    /// True iff `key` was absent and is now present.
    fn insert(&self, key: &K) -> bool;
    /// True iff `key` was present and is now absent.
    fn remove(&self, key: &K) -> bool;
    /// Number of elements. Exact for the locked list, eventually consistent for the lock-free one.
    fn size(&self) -> usize;
}
