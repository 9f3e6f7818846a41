//! Caller-visible operation results.
//!
//! The store returns millisecond timestamps and possibly-fractional
//! token counts; results surface whole tokens and UNIX seconds.
//! `reset` is rounded up so a bucket is never reported full early; a
//! fixed bucket reports `reset = 0`.

use serde::Serialize;

/// Outcome of a take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TakeResult {
    /// Whether the request was permitted under the effective capacity.
    pub conformant: bool,
    /// Whole tokens left after this call.
    pub remaining: i64,
    /// UNIX timestamp (seconds) at which the bucket is projected full.
    pub reset: u64,
    /// The effective capacity the decision was made against.
    pub limit: u64,
    /// True when the result was obtained after waiting.
    pub delayed: bool,
}

/// Outcome of an elevated take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElevatedTakeResult {
    pub conformant: bool,
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
    pub delayed: bool,
    /// Whether the elevated regime is active after this call.
    pub erl_activated: bool,
}

/// Outcome of a put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResult {
    /// May be negative after a negative-count put.
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetResult {
    pub remaining: i64,
    pub reset: u64,
    pub limit: u64,
}

/// Milliseconds to whole seconds, rounding up.
pub(crate) fn reset_seconds(reset_ms: u64) -> u64 {
    reset_ms.div_ceil(1000)
}

/// Fractional store tokens to the whole tokens surfaced to callers.
pub(crate) fn whole_tokens(remaining: f64) -> i64 {
    remaining.floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_rounds_up_to_avoid_premature_full_claims() {
        assert_eq!(reset_seconds(0), 0);
        assert_eq!(reset_seconds(1), 1);
        assert_eq!(reset_seconds(1000), 1);
        assert_eq!(reset_seconds(1001), 2);
    }

    #[test]
    fn fractional_tokens_floor() {
        assert_eq!(whole_tokens(9.999), 9);
        assert_eq!(whole_tokens(0.0), 0);
        assert_eq!(whole_tokens(-0.5), -1);
    }
}
