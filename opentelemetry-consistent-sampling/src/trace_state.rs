//! In-memory representation and wire codec of the `ot` trace state entry.

use opentelemetry::otel_debug;

use crate::sampling_math::{MAX_P, MAX_R};

/// Key of the tracestate entry that carries the consistent sampling state.
pub const TRACE_STATE_KEY: &str = "ot";

const TRACE_STATE_SIZE_LIMIT: usize = 256;

/// The consistent sampling state carried in the `ot` tracestate entry.
///
/// Holds the per-trace random value (r-value) and the threshold applied by
/// the most recent consistent sampler (p-value), both optional. Values are
/// immutable; updates produce a new instance. Key-value pairs in the entry
/// other than `r` and `p` are preserved across a parse/serialize round
/// trip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OtelTraceState {
    r: Option<u32>,
    p: Option<u32>,
    other_entries: Vec<String>,
}

impl OtelTraceState {
    /// Returns the r-value, if present.
    pub fn r(&self) -> Option<u32> {
        self.r
    }

    /// Returns the p-value, if present.
    pub fn p(&self) -> Option<u32> {
        self.p
    }

    /// Returns a copy of this state with the given r-value.
    ///
    /// An r-value larger than the maximum drops the r-value instead.
    pub fn with_r(mut self, r: u32) -> Self {
        self.r = (r <= MAX_R).then_some(r);
        self
    }

    /// Returns a copy of this state with the given p-value.
    ///
    /// A p-value larger than the maximum drops the p-value instead.
    pub fn with_p(mut self, p: u32) -> Self {
        self.p = (p <= MAX_P).then_some(p);
        self
    }

    pub(crate) fn without_p(mut self) -> Self {
        self.p = None;
        self
    }

    /// Parses the consistent sampling state from an `ot` tracestate entry
    /// value.
    ///
    /// Parsing never fails: malformed input yields an empty state, which
    /// downstream samplers treat as "this trace has not been sampled
    /// consistently yet" and self-heal by generating fresh state.
    pub fn parse(value: &str) -> OtelTraceState {
        if value.is_empty() {
            return OtelTraceState::default();
        }
        match Self::try_parse(value) {
            Some(state) => state,
            None => {
                otel_debug!(
                    name: "OtelTraceState.ParseFailure",
                    message = "malformed ot tracestate entry discarded, continuing with empty sampling state"
                );
                OtelTraceState::default()
            }
        }
    }

    fn try_parse(value: &str) -> Option<OtelTraceState> {
        if value.len() > TRACE_STATE_SIZE_LIMIT {
            return None;
        }
        let bytes = value.as_bytes();
        let len = bytes.len();

        let mut r = None;
        let mut p = None;
        let mut other_entries = Vec::new();

        let mut start = 0;
        loop {
            let mut colon = start;
            while colon < len {
                let c = bytes[colon];
                if !(c.is_ascii_lowercase() || (c.is_ascii_digit() && colon > start)) {
                    break;
                }
                colon += 1;
            }
            if colon == start || colon == len || bytes[colon] != b':' {
                return None;
            }

            let mut end = colon + 1;
            while end < len && is_value_byte(bytes[end]) {
                end += 1;
            }

            if colon - start == 1 && bytes[start] == b'p' {
                p = parse_one_or_two_digits(&bytes[colon + 1..end], MAX_P);
            } else if colon - start == 1 && bytes[start] == b'r' {
                r = parse_one_or_two_digits(&bytes[colon + 1..end], MAX_R);
            } else {
                other_entries.push(value[start..end].to_owned());
            }

            if end < len && bytes[end] != b';' {
                return None;
            }
            if end == len {
                break;
            }
            start = end + 1;
            // a trailing separator is malformed
            if start == len {
                return None;
            }
        }

        Some(OtelTraceState {
            r,
            p,
            other_entries,
        })
    }

    /// Serializes this state into an `ot` tracestate entry value.
    ///
    /// The p-value comes first, then the r-value, then any preserved
    /// foreign pairs in their original order. Foreign pairs that would push
    /// the entry over the tracestate size limit are dropped.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if let Some(p) = self.p {
            out.push_str("p:");
            out.push_str(&p.to_string());
        }
        if let Some(r) = self.r {
            if !out.is_empty() {
                out.push(';');
            }
            out.push_str("r:");
            out.push_str(&r.to_string());
        }
        for entry in &self.other_entries {
            let mut projected = out.len();
            if projected != 0 {
                projected += 1;
            }
            if projected + entry.len() > TRACE_STATE_SIZE_LIMIT {
                break;
            }
            if !out.is_empty() {
                out.push(';');
            }
            out.push_str(entry);
        }
        out
    }
}

fn is_value_byte(c: u8) -> bool {
    c.is_ascii_lowercase()
        || c.is_ascii_uppercase()
        || c.is_ascii_digit()
        || c == b'.'
        || c == b'_'
        || c == b'-'
}

fn parse_one_or_two_digits(value: &[u8], max: u32) -> Option<u32> {
    let parsed = match *value {
        [d] if d.is_ascii_digit() => u32::from(d - b'0'),
        [d1, d2] if d1.is_ascii_digit() && d2.is_ascii_digit() => {
            u32::from(d1 - b'0') * 10 + u32::from(d2 - b'0')
        }
        _ => return None,
    };
    (parsed <= max).then_some(parsed)
}
