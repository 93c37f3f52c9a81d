use std::sync::Mutex;

use opentelemetry_consistent_sampling::RandomSource;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Deterministic [`RandomSource`] for reproducible sampling decisions.
#[derive(Debug)]
pub struct SeededRandomSource(Mutex<StdRng>);

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl RandomSource for SeededRandomSource {
    fn next_u64(&self) -> u64 {
        self.0.lock().unwrap().random::<u64>()
    }
}
