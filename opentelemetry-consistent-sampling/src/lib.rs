//! # OpenTelemetry Consistent Sampling
//!
//! Samplers that let every participant of a distributed trace make its
//! sampling decision independently while still arriving at consistent
//! decisions across the whole trace, without any coordination.
//!
//! Consistency rests on two values carried in the `ot` entry of the W3C
//! tracestate header:
//!
//! * the *r-value*, a random value drawn once at the root of a trace and
//!   propagated unchanged to every descendant span, and
//! * the *p-value*, the discrete power-of-two sampling threshold applied by
//!   the most recent sampler.
//!
//! A span is kept iff `p <= r`. Since all participants see the same
//! r-value, a downstream sampler can only tighten (never loosen) the
//! sampling of a trace, and spans kept with threshold `p` represent
//! `2^p` recorded-and-unrecorded spans for statistical reweighting.
//!
//! Two samplers are provided, both implementing
//! [`ShouldSample`](opentelemetry_sdk::trace::ShouldSample):
//!
//! * [`ConsistentProbabilityBasedSampler`] keeps a fixed fraction of
//!   traces;
//! * [`ConsistentRateLimitingSampler`] adapts its sampling probability to
//!   keep the rate of sampled spans near a configured target.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]
#![cfg_attr(test, deny(warnings))]

use thiserror::Error;

mod random;
mod sampler;
pub mod sampling_math;
mod trace_state;

pub use random::{RandomSource, ThreadLocalRandomSource};
pub use sampler::{
    Clock, ConsistentProbabilityBasedSampler, ConsistentRateLimitingSampler, MonotonicClock,
};
pub use trace_state::{OtelTraceState, TRACE_STATE_KEY};

/// Errors returned when a sampler is constructed with invalid
/// configuration.
///
/// Configuration is validated eagerly so that sampling decisions themselves
/// can never fail.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum SamplingConfigError {
    /// The sampling probability lies outside `[0.0, 1.0]`.
    #[error("sampling probability must be within [0.0, 1.0], got {0}")]
    InvalidProbability(f64),
    /// The target rate of sampled spans is not finite and positive.
    #[error("target spans per second must be finite and positive, got {0}")]
    InvalidTargetRate(f64),
    /// The adaptation time constant is not finite and positive.
    #[error("adaptation time must be finite and positive, got {0}")]
    InvalidAdaptationTime(f64),
}
