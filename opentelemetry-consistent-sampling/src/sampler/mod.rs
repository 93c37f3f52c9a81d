//! Consistent samplers and their shared decision flow.
//!
//! Both samplers in this crate make their decision the same way: the
//! per-trace random value (r-value) is taken from the parent trace state or
//! generated once at the trace root, the concrete sampler contributes a
//! threshold (p-value), and the span is kept iff `p <= r`. Because every
//! participant of a trace observes the same r-value, participants reach
//! identical decisions without coordination as long as thresholds only
//! tighten along the pipeline.

use opentelemetry::{
    otel_debug,
    trace::{SamplingDecision, SamplingResult, TraceContextExt, TraceState},
    Context,
};

use crate::random::{leading_ones_of_random_u64, RandomSource};
use crate::sampling_math::{MAX_P, MAX_R};
use crate::trace_state::{OtelTraceState, TRACE_STATE_KEY};

mod probability_based;
mod rate_limiting;

pub use probability_based::ConsistentProbabilityBasedSampler;
pub use rate_limiting::{Clock, ConsistentRateLimitingSampler, MonotonicClock};

/// Shared decision flow of all consistent samplers.
///
/// `next_p` receives the p-value applied by the parent (if any survived
/// validation) and whether this span starts a new trace, and returns the
/// threshold for this decision. Returning `None` leaves the decision to the
/// parent's sampled flag.
pub(crate) fn consistent_should_sample<F>(
    random_source: &dyn RandomSource,
    parent_context: Option<&Context>,
    next_p: F,
) -> SamplingResult
where
    F: FnOnce(Option<u32>, bool) -> Option<u32>,
{
    let (is_root, parent_sampled, parent_trace_state) =
        match parent_context.filter(|cx| cx.has_active_span()) {
            Some(cx) => {
                let span = cx.span();
                let span_context = span.span_context();
                (
                    !span_context.is_valid(),
                    span_context.is_sampled(),
                    span_context.trace_state().clone(),
                )
            }
            None => (true, false, TraceState::default()),
        };

    let mut state = OtelTraceState::parse(parent_trace_state.get(TRACE_STATE_KEY).unwrap_or(""));

    // A p-value without an r-value cannot have produced a decision.
    if state.r().is_none() {
        state = state.without_p();
    }
    // Unset the p-value when it contradicts the parent's sampled flag. A
    // sampled parent carrying the zero-probability threshold is tolerated.
    if let (Some(r), Some(p)) = (state.r(), state.p()) {
        let consistent = ((p <= r) == parent_sampled) || (parent_sampled && p == MAX_P);
        if !consistent {
            otel_debug!(
                name: "ConsistentSampler.InconsistentParentState",
                message = "parent p-value contradicts the parent sampled flag, discarding it"
            );
            state = state.without_p();
        }
    }

    let r = match state.r() {
        Some(r) => r,
        None => {
            let r = leading_ones_of_random_u64(random_source).min(MAX_R);
            state = state.with_r(r);
            r
        }
    };

    state = match next_p(state.p(), is_root) {
        Some(p) => state.with_p(p),
        None => state.without_p(),
    };

    let sampled = match state.p() {
        Some(p) => p <= r,
        // Without a valid threshold, respect the parent's decision.
        None => parent_sampled,
    };
    let decision = if sampled {
        SamplingDecision::RecordAndSample
    } else {
        SamplingDecision::Drop
    };

    let trace_state = match parent_trace_state.insert(TRACE_STATE_KEY, state.serialize()) {
        Ok(trace_state) => trace_state,
        // The serialized form never contains bytes the tracestate rejects.
        Err(_) => parent_trace_state,
    };

    SamplingResult {
        decision,
        attributes: Vec::new(),
        trace_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId};

    #[derive(Debug)]
    struct FixedRandomSource(u64);

    impl RandomSource for FixedRandomSource {
        fn next_u64(&self) -> u64 {
            self.0
        }
    }

    fn random_source_generating_r(r: u32) -> FixedRandomSource {
        FixedRandomSource(!(u64::MAX >> r))
    }

    const NOT_SAMPLED: bool = false;
    const SAMPLED: bool = true;

    #[allow(clippy::too_many_arguments)]
    fn assert_consistent_sampling(
        parent_p: Option<u32>,
        parent_r: Option<u32>,
        parent_sampled: bool,
        sampler_p: Option<u32>,
        generated_r: u32,
        expected_p: Option<u32>,
        expected_r: Option<u32>,
        expect_sampled: bool,
    ) {
        let mut parent_state = OtelTraceState::default();
        if let Some(p) = parent_p {
            parent_state = parent_state.with_p(p);
        }
        if let Some(r) = parent_r {
            parent_state = parent_state.with_r(r);
        }
        let parent_trace_state =
            TraceState::from_key_value([(TRACE_STATE_KEY, parent_state.serialize())])
                .expect("serialized sampling state is a valid tracestate value");
        let trace_flags = if parent_sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        let parent_span_context = SpanContext::new(
            TraceId::from_hex("0123456789abcdef0123456789abcdef").unwrap(),
            SpanId::from_hex("0123456789abcdef").unwrap(),
            trace_flags,
            true,
            parent_trace_state,
        );
        let parent_cx = Context::new().with_remote_span_context(parent_span_context);
        let random_source = random_source_generating_r(generated_r);

        let result =
            consistent_should_sample(&random_source, Some(&parent_cx), |_parent_p, is_root| {
                assert!(!is_root);
                sampler_p
            });

        assert_eq!(
            result.decision == SamplingDecision::RecordAndSample,
            expect_sampled
        );
        let state = OtelTraceState::parse(result.trace_state.get(TRACE_STATE_KEY).unwrap_or(""));
        assert_eq!(state.p(), expected_p);
        assert_eq!(state.r(), expected_r);
    }

    #[test]
    fn undefined_parent_trace_state() {
        let rows = [
            (NOT_SAMPLED, 0, 0, SAMPLED),
            (NOT_SAMPLED, 2, 3, SAMPLED),
            (NOT_SAMPLED, 3, 2, NOT_SAMPLED),
            (NOT_SAMPLED, 0, 1, SAMPLED),
            (NOT_SAMPLED, 0, 2, SAMPLED),
            (NOT_SAMPLED, 1, 0, NOT_SAMPLED),
            (NOT_SAMPLED, 2, 0, NOT_SAMPLED),
            (SAMPLED, 0, 0, SAMPLED),
            (SAMPLED, 2, 3, SAMPLED),
            (SAMPLED, 3, 2, NOT_SAMPLED),
        ];
        for (parent_sampled, sampler_p, generated_r, expect_sampled) in rows {
            assert_consistent_sampling(
                None,
                None,
                parent_sampled,
                Some(sampler_p),
                generated_r,
                Some(sampler_p),
                Some(generated_r),
                expect_sampled,
            );
        }
    }

    #[test]
    fn parent_trace_state_with_defined_p_only() {
        // The parent's p-value is unusable without an r-value; a fresh
        // r-value is generated and only the sampler's p-value counts.
        let rows = [
            (6, NOT_SAMPLED, 0, 0, SAMPLED),
            (7, NOT_SAMPLED, 2, 3, SAMPLED),
            (4, NOT_SAMPLED, 3, 2, NOT_SAMPLED),
            (3, NOT_SAMPLED, 0, 1, SAMPLED),
            (2, NOT_SAMPLED, 0, 2, SAMPLED),
            (6, NOT_SAMPLED, 1, 0, NOT_SAMPLED),
            (7, NOT_SAMPLED, 2, 0, NOT_SAMPLED),
            (5, NOT_SAMPLED, 8, 7, NOT_SAMPLED),
            (5, NOT_SAMPLED, 6, 7, SAMPLED),
            (12, SAMPLED, 0, 0, SAMPLED),
            (15, SAMPLED, 2, 3, SAMPLED),
            (18, SAMPLED, 3, 2, NOT_SAMPLED),
        ];
        for (parent_p, parent_sampled, sampler_p, generated_r, expect_sampled) in rows {
            assert_consistent_sampling(
                Some(parent_p),
                None,
                parent_sampled,
                Some(sampler_p),
                generated_r,
                Some(sampler_p),
                Some(generated_r),
                expect_sampled,
            );
        }
    }

    #[test]
    fn parent_trace_state_with_defined_r_only() {
        // The parent's r-value is authoritative; the generated one is unused.
        let rows = [
            (0, NOT_SAMPLED, 0, 5, SAMPLED),
            (3, NOT_SAMPLED, 2, 0, SAMPLED),
            (2, NOT_SAMPLED, 3, 1, NOT_SAMPLED),
            (1, NOT_SAMPLED, 0, 0, SAMPLED),
            (2, NOT_SAMPLED, 0, 5, SAMPLED),
            (0, NOT_SAMPLED, 1, 8, NOT_SAMPLED),
            (0, NOT_SAMPLED, 2, 5, NOT_SAMPLED),
            (0, SAMPLED, 0, 11, SAMPLED),
            (3, SAMPLED, 2, 9, SAMPLED),
            (2, SAMPLED, 3, 1, NOT_SAMPLED),
        ];
        for (parent_r, parent_sampled, sampler_p, generated_r, expect_sampled) in rows {
            assert_consistent_sampling(
                None,
                Some(parent_r),
                parent_sampled,
                Some(sampler_p),
                generated_r,
                Some(sampler_p),
                Some(parent_r),
                expect_sampled,
            );
        }
    }

    #[test]
    fn consistent_parent_trace_state() {
        // ((p <= r) == sampled) holds for the parent state.
        let rows = [
            (3, 5, SAMPLED, 6, 7, NOT_SAMPLED),
            (3, 5, SAMPLED, 2, 7, SAMPLED),
            (5, 3, NOT_SAMPLED, 6, 7, NOT_SAMPLED),
        ];
        for (parent_p, parent_r, parent_sampled, sampler_p, generated_r, expect_sampled) in rows {
            assert_consistent_sampling(
                Some(parent_p),
                Some(parent_r),
                parent_sampled,
                Some(sampler_p),
                generated_r,
                Some(sampler_p),
                Some(parent_r),
                expect_sampled,
            );
        }
    }

    #[test]
    fn inconsistent_parent_trace_state() {
        // ((p <= r) == sampled) is violated; the parent p-value is
        // discarded but the r-value stays authoritative.
        let rows = [
            (5, 3, SAMPLED, 6, 7, NOT_SAMPLED),
            (3, 5, NOT_SAMPLED, 6, 7, NOT_SAMPLED),
            (5, 3, SAMPLED, 1, 7, SAMPLED),
            (3, 5, NOT_SAMPLED, 2, 7, SAMPLED),
        ];
        for (parent_p, parent_r, parent_sampled, sampler_p, generated_r, expect_sampled) in rows {
            assert_consistent_sampling(
                Some(parent_p),
                Some(parent_r),
                parent_sampled,
                Some(sampler_p),
                generated_r,
                Some(sampler_p),
                Some(parent_r),
                expect_sampled,
            );
        }
    }

    #[test]
    fn sampler_without_threshold_respects_the_parent_decision() {
        assert_consistent_sampling(
            Some(3),
            Some(5),
            SAMPLED,
            None,
            7,
            None,
            Some(5),
            SAMPLED,
        );
        assert_consistent_sampling(
            Some(5),
            Some(3),
            NOT_SAMPLED,
            None,
            7,
            None,
            Some(3),
            NOT_SAMPLED,
        );
    }

    #[test]
    fn root_span_generates_fresh_state() {
        let random_source = random_source_generating_r(4);
        let result = consistent_should_sample(&random_source, None, |parent_p, is_root| {
            assert!(is_root);
            assert_eq!(parent_p, None);
            Some(2)
        });
        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
        let state = OtelTraceState::parse(result.trace_state.get(TRACE_STATE_KEY).unwrap_or(""));
        assert_eq!(state.r(), Some(4));
        assert_eq!(state.p(), Some(2));
    }

    #[test]
    fn generated_r_value_is_clamped() {
        let random_source = FixedRandomSource(u64::MAX);
        let result = consistent_should_sample(&random_source, None, |_, _| Some(0));
        let state = OtelTraceState::parse(result.trace_state.get(TRACE_STATE_KEY).unwrap_or(""));
        assert_eq!(state.r(), Some(MAX_R));
    }

    #[test]
    fn malformed_parent_trace_state_is_replaced() {
        let parent_trace_state = TraceState::from_key_value([(TRACE_STATE_KEY, "p5;r:")])
            .expect("valid tracestate value");
        let parent_span_context = SpanContext::new(
            TraceId::from_hex("0123456789abcdef0123456789abcdef").unwrap(),
            SpanId::from_hex("0123456789abcdef").unwrap(),
            TraceFlags::SAMPLED,
            true,
            parent_trace_state,
        );
        let parent_cx = Context::new().with_remote_span_context(parent_span_context);
        let random_source = random_source_generating_r(9);

        let result = consistent_should_sample(&random_source, Some(&parent_cx), |_, _| Some(1));

        let state = OtelTraceState::parse(result.trace_state.get(TRACE_STATE_KEY).unwrap_or(""));
        assert_eq!(state.r(), Some(9));
        assert_eq!(state.p(), Some(1));
        assert_eq!(result.decision, SamplingDecision::RecordAndSample);
    }
}
