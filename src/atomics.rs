//! Thin typed wrappers over compare-and-swap and fetch-and-add/subtract.
//!
//! Every operation here is `SeqCst`. The lists only ever go through these helpers when they
//! mutate a shared word, so the ordering story stays in one place.

use std::sync::atomic::{AtomicIsize, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Pointer, Shared};

/// Compare-and-swap on an epoch-managed pointer.
///
/// `Ok` carries the previous value, which is `expected`. `Err` carries the value actually
/// observed along with `new`, handed back so an unpublished node is not lost.
#[inline]
pub fn compare_and_swap<'g, T, P: Pointer<T>>(
    location: &Atomic<T>,
    expected: Shared<'g, T>,
    new: P,
    g: &'g Guard,
) -> Result<Shared<'g, T>, (Shared<'g, T>, P)> {
    match location.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst, g) {
        Ok(_) => Ok(expected),
        Err(err) => Err((err.current, err.new)),
    }
}

/// Machine words usable as CAS targets and counters.
pub trait AtomicWord {
    type Word: Copy + Eq;

    /// Writes `new` iff the current value is `expected`. Returns the value observed before the
    /// attempt, so success is `returned == expected`.
    // std's deprecated inherent `compare_and_swap` would shadow a trait method of that name
    fn compare_and_swap_word(&self, expected: Self::Word, new: Self::Word) -> Self::Word;
    /// Adds one, returns the previous value.
    fn fetch_and_increment(&self) -> Self::Word;
    /// Subtracts one, returns the previous value.
    fn fetch_and_decrement(&self) -> Self::Word;
}

macro_rules! impl_atomic_word {
    ($($atomic:ty => $word:ty),* $(,)?) => {
        $(
            impl AtomicWord for $atomic {
                type Word = $word;

                #[inline]
                fn compare_and_swap_word(&self, expected: $word, new: $word) -> $word {
                    match self.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst) {
                        Ok(old) | Err(old) => old,
                    }
                }
                #[inline]
                fn fetch_and_increment(&self) -> $word {
                    self.fetch_add(1, Ordering::SeqCst)
                }
                #[inline]
                fn fetch_and_decrement(&self) -> $word {
                    self.fetch_sub(1, Ordering::SeqCst)
                }
            }
        )*
    };
}

impl_atomic_word!(
    AtomicU32 => u32,
    AtomicU64 => u64,
    AtomicUsize => usize,
    AtomicIsize => isize,
);
