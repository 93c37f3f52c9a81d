//! Random value sources for consistent sampling decisions.

use std::cell::RefCell;
use std::fmt;

use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A supplier of uniformly distributed random 64-bit values.
///
/// Every consistent sampler takes a `RandomSource` as a constructor
/// argument, which keeps the randomness injectable: tests pass a seeded
/// source to make sampling decisions reproducible. Implementations must be
/// safe for concurrent use from multiple threads and must not produce
/// correlated values across threads.
pub trait RandomSource: fmt::Debug + Send + Sync {
    /// Returns the next uniformly distributed random value.
    fn next_u64(&self) -> u64;
}

/// Default [`RandomSource`] backed by one lazily seeded PRNG per thread.
#[derive(Clone, Debug, Default)]
pub struct ThreadLocalRandomSource {
    _private: (),
}

thread_local! {
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

impl RandomSource for ThreadLocalRandomSource {
    fn next_u64(&self) -> u64 {
        CURRENT_RNG.with(|rng| rng.borrow_mut().random::<u64>())
    }
}

/// Counts the leading one bits of a fresh random value.
///
/// The count follows a geometric distribution: it is at least `p` with
/// probability `2^-p`, which is exactly the property an r-value needs.
/// Callers clamp the result to the valid r-value range.
pub(crate) fn leading_ones_of_random_u64(random_source: &dyn RandomSource) -> u32 {
    random_source.next_u64().leading_ones()
}

/// Builds a uniform draw in `[0.0, 1.0)` from the top 53 bits of a fresh
/// random value.
pub(crate) fn uniform_draw(random_source: &dyn RandomSource) -> f64 {
    (random_source.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
