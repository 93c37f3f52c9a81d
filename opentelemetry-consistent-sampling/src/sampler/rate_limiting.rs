use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use opentelemetry::{
    trace::{Link, SamplingResult, SpanKind, TraceId},
    Context, KeyValue,
};
use opentelemetry_sdk::trace::ShouldSample;

use crate::random::{uniform_draw, RandomSource, ThreadLocalRandomSource};
use crate::sampler::consistent_should_sample;
use crate::sampling_math::unbiased_rounded_p;
use crate::SamplingConfigError;

/// A supplier of the current time on a monotonic nanosecond scale.
///
/// Injected into [`ConsistentRateLimitingSampler`] so tests can drive the
/// rate estimation with a simulated clock.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the current time in nanoseconds.
    ///
    /// Only differences between returned values are meaningful; the origin
    /// of the scale is implementation defined.
    fn now_nanos(&self) -> u64;
}

/// Default [`Clock`] counting nanoseconds since its construction.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

#[derive(Debug)]
struct RateEstimatorState {
    effective_window_count: f64,
    effective_window_nanos: f64,
    last_nanos: u64,
}

/// Exponentially smoothed estimate of the span arrival rate on irregularly
/// spaced observations (Wright's extension of Holt's method), turned into
/// the sampling probability that admits the target rate.
#[derive(Debug)]
struct RateEstimator {
    inverse_adaptation_nanos: f64,
    target_spans_per_nano: f64,
    state: Mutex<RateEstimatorState>,
}

impl RateEstimator {
    fn new(target_spans_per_second: f64, adaptation_time_seconds: f64, now_nanos: u64) -> Self {
        Self {
            inverse_adaptation_nanos: 1e-9 / adaptation_time_seconds,
            target_spans_per_nano: 1e-9 * target_spans_per_second,
            state: Mutex::new(RateEstimatorState {
                effective_window_count: 0.0,
                effective_window_nanos: 0.0,
                last_nanos: now_nanos,
            }),
        }
    }

    /// Folds one arrival at `now_nanos` into the estimate and returns the
    /// sampling probability to apply to it.
    ///
    /// The window statistics and the timestamp are updated under one lock
    /// so concurrent arrivals never apply the same elapsed interval twice.
    fn update_and_probability(&self, now_nanos: u64) -> f64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A rewinding clock contributes a zero-length interval.
        let now_nanos = now_nanos.max(state.last_nanos);
        let elapsed_nanos = (now_nanos - state.last_nanos) as f64;
        state.last_nanos = now_nanos;

        let decay = (-elapsed_nanos * self.inverse_adaptation_nanos).exp();
        state.effective_window_count = state.effective_window_count * decay + 1.0;
        state.effective_window_nanos = state.effective_window_nanos * decay + elapsed_nanos;

        (state.effective_window_nanos * self.target_spans_per_nano / state.effective_window_count)
            .min(1.0)
    }
}

/// A consistent sampler that adapts its sampling probability to keep the
/// rate of sampled spans near a configured target.
///
/// The estimated arrival rate follows step changes of the real rate with a
/// settling time governed by the adaptation time constant: after roughly
/// three time constants a step change is absorbed and the sampled rate has
/// returned to the target.
///
/// Cloning shares the rate estimate, so clones jointly converge to the
/// target instead of each admitting it separately.
#[derive(Clone, Debug)]
pub struct ConsistentRateLimitingSampler {
    estimator: Arc<RateEstimator>,
    random_source: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl ConsistentRateLimitingSampler {
    /// Creates a sampler targeting the given number of sampled spans per
    /// second, adapting to rate changes within roughly
    /// `adaptation_time_seconds`.
    ///
    /// Returns an error unless both arguments are finite and positive.
    pub fn new(
        target_spans_per_second: f64,
        adaptation_time_seconds: f64,
    ) -> Result<Self, SamplingConfigError> {
        Self::with_random_source_and_clock(
            target_spans_per_second,
            adaptation_time_seconds,
            Arc::new(ThreadLocalRandomSource::default()),
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Creates a sampler with an explicit [`RandomSource`] and [`Clock`],
    /// which makes its behavior reproducible under a seeded source and a
    /// simulated clock.
    pub fn with_random_source_and_clock(
        target_spans_per_second: f64,
        adaptation_time_seconds: f64,
        random_source: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SamplingConfigError> {
        if !target_spans_per_second.is_finite() || target_spans_per_second <= 0.0 {
            return Err(SamplingConfigError::InvalidTargetRate(
                target_spans_per_second,
            ));
        }
        if !adaptation_time_seconds.is_finite() || adaptation_time_seconds <= 0.0 {
            return Err(SamplingConfigError::InvalidAdaptationTime(
                adaptation_time_seconds,
            ));
        }
        let estimator = Arc::new(RateEstimator::new(
            target_spans_per_second,
            adaptation_time_seconds,
            clock.now_nanos(),
        ));
        Ok(Self {
            estimator,
            random_source,
            clock,
        })
    }
}

impl ShouldSample for ConsistentRateLimitingSampler {
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
                let probability = self
                    .estimator
                    .update_and_probability(self.clock.now_nanos());
                let draw = uniform_draw(self.random_source.as_ref());
                Some(unbiased_rounded_p(probability, draw))
            },
        )
    }
}
