//! Conversions between discrete sampling thresholds (p-values) and sampling
//! probabilities.
//!
//! Consistent samplers only ever emit one of a small set of discrete
//! power-of-two sampling probabilities, identified by an integer exponent,
//! the *p-value*. A p-value `p` in `[0, MAX_P - 1]` stands for the sampling
//! probability `2^-p`; the largest p-value [`MAX_P`] stands for probability
//! zero. Arbitrary probabilities are realized in expectation by randomized
//! rounding between the two bracketing p-values, see [`unbiased_rounded_p`].

/// Largest valid p-value. Encodes sampling probability zero.
pub const MAX_P: u32 = 63;

/// Largest valid r-value.
///
/// An r-value `r` satisfies `P(r >= p) = 2^-p` for every `p` in
/// `[0, MAX_R]`, so a span with threshold `p` is kept iff `p <= r`.
/// `MAX_R` is one less than [`MAX_P`], which guarantees that the p-value
/// encoding probability zero can never win against any r-value.
pub const MAX_R: u32 = 62;

const MANTISSA_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;
const EXPONENT_BIAS: i64 = 0x3FF;

/// Returns the sampling probability encoded by the given p-value.
///
/// Returns `2^-p` for `p` in `[0, MAX_P - 1]` and `0.0` for `p = MAX_P`.
/// Any larger value is not a valid p-value and yields `NaN`; callers must
/// check for `NaN` before using the result.
pub fn sampling_probability(p: u32) -> f64 {
    if p > MAX_P {
        return f64::NAN;
    }
    if p == MAX_P {
        return 0.0;
    }
    // 2^-p has a zero mantissa, so it can be assembled directly from the
    // biased exponent.
    f64::from_bits(((EXPONENT_BIAS - i64::from(p)) as u64) << 52)
}

fn smallest_positive_sampling_probability() -> f64 {
    sampling_probability(MAX_P - 1)
}

/// Returns the largest p-value whose sampling probability is greater than
/// or equal to `probability`, i.e. the discrete probability that is at
/// least as generous as the requested one.
///
/// `probability` must be in `[0.0, 1.0]`. Zero maps to [`MAX_P`]; positive
/// probabilities below `2^-(MAX_P - 1)` saturate at `MAX_P - 1`.
pub fn lower_bound_p(probability: f64) -> u32 {
    debug_assert!((0.0..=1.0).contains(&probability));
    if probability <= smallest_positive_sampling_probability() {
        if probability > 0.0 {
            MAX_P - 1
        } else {
            MAX_P
        }
    } else {
        let bits = probability.to_bits();
        let mantissa = bits & MANTISSA_MASK;
        let exponent = (bits >> 52) as i64;
        ((EXPONENT_BIAS - exponent) - i64::from(mantissa != 0)).max(0) as u32
    }
}

/// Returns the smallest p-value whose sampling probability is less than or
/// equal to `probability`, i.e. the discrete probability that is at least
/// as strict as the requested one.
///
/// `probability` must be in `[0.0, 1.0]`. Together with [`lower_bound_p`]
/// this brackets any probability `q`:
/// `sampling_probability(upper_bound_p(q)) <= q <=
/// sampling_probability(lower_bound_p(q))`, with equality on both sides
/// exactly when `q` is an in-range power of two.
pub fn upper_bound_p(probability: f64) -> u32 {
    debug_assert!((0.0..=1.0).contains(&probability));
    if probability <= smallest_positive_sampling_probability() {
        MAX_P
    } else {
        let exponent = (probability.to_bits() >> 52) as i64;
        (EXPONENT_BIAS - exponent).max(0) as u32
    }
}

/// Rounds `probability` to one of its two bracketing p-values such that the
/// expected sampling probability over many uniform draws equals
/// `probability` exactly.
///
/// `draw` must be uniformly distributed in `[0.0, 1.0)`. The lower
/// (more generous) p-value is chosen when `draw` falls below the linear
/// interpolation weight of `probability` between the two bracketing
/// discrete probabilities. `probability = 1.0` deterministically yields
/// `0` and `probability = 0.0` deterministically yields [`MAX_P`].
pub fn unbiased_rounded_p(probability: f64, draw: f64) -> u32 {
    if probability >= 1.0 {
        return 0;
    }
    if probability <= 0.0 {
        return MAX_P;
    }
    let lower = lower_bound_p(probability);
    let upper = upper_bound_p(probability);
    if lower == upper {
        return lower;
    }
    let generous = sampling_probability(lower);
    let strict = sampling_probability(upper);
    let weight = (probability - strict) / (generous - strict);
    if draw < weight {
        lower
    } else {
        upper
    }
}

/// Returns the statistical weight a span kept with the given p-value
/// represents, `1 / sampling_probability(p)`.
///
/// Yields `f64::INFINITY` for `p = MAX_P` and `NaN` for invalid p-values.
pub fn adjusted_count(p: u32) -> f64 {
    1.0 / sampling_probability(p)
}
