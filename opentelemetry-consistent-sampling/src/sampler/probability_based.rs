use std::sync::Arc;

use opentelemetry::{
    trace::{Link, SamplingResult, SpanKind, TraceId},
    Context, KeyValue,
};
use opentelemetry_sdk::trace::ShouldSample;

use crate::random::{uniform_draw, RandomSource, ThreadLocalRandomSource};
use crate::sampler::consistent_should_sample;
use crate::sampling_math::unbiased_rounded_p;
use crate::SamplingConfigError;

/// A consistent sampler that keeps a fixed fraction of traces.
///
/// Probabilities that are not powers of two are realized in expectation by
/// randomized rounding between the two bracketing discrete thresholds, so
/// the fraction of kept traces converges to the configured probability even
/// though every single decision applies a power-of-two threshold.
///
/// The sampler keeps no mutable state and may be shared freely across
/// threads.
///
/// ```
/// use opentelemetry_consistent_sampling::ConsistentProbabilityBasedSampler;
///
/// let sampler = ConsistentProbabilityBasedSampler::new(0.05);
/// assert!(sampler.is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct ConsistentProbabilityBasedSampler {
    sampling_probability: f64,
    random_source: Arc<dyn RandomSource>,
}

impl ConsistentProbabilityBasedSampler {
    /// Creates a sampler that keeps the given fraction of traces.
    ///
    /// Returns an error unless `sampling_probability` is within
    /// `[0.0, 1.0]`.
    pub fn new(sampling_probability: f64) -> Result<Self, SamplingConfigError> {
        Self::with_random_source(
            sampling_probability,
            Arc::new(ThreadLocalRandomSource::default()),
        )
    }

    /// Creates a sampler with an explicit [`RandomSource`], which makes
    /// decisions reproducible under a seeded source.
    pub fn with_random_source(
        sampling_probability: f64,
        random_source: Arc<dyn RandomSource>,
    ) -> Result<Self, SamplingConfigError> {
        if !(0.0..=1.0).contains(&sampling_probability) {
            return Err(SamplingConfigError::InvalidProbability(
                sampling_probability,
            ));
        }
        Ok(Self {
            sampling_probability,
            random_source,
        })
    }
}

impl ShouldSample for ConsistentProbabilityBasedSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        _trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        consistent_should_sample(
            self.random_source.as_ref(),
            parent_context,
            |_parent_p, _is_root| {
                let draw = uniform_draw(self.random_source.as_ref());
                Some(unbiased_rounded_p(self.sampling_probability, draw))
            },
        )
    }
}
