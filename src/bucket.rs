//! # Bucket Definitions and Descriptors
//!
//! Raw, user-supplied bucket definitions ([`BucketDef`]) are normalized
//! into immutable runtime descriptors ([`BucketDescriptor`]) once, at
//! configuration time. All rate math downstream works off the descriptor.
//!
//! ## Rate Shortcuts
//!
//! A definition states its refill pace either explicitly
//! (`interval` + `per_interval`) or through one of the fixed shortcuts:
//!
//! | Shortcut     | interval_ms |
//! |--------------|-------------|
//! | `per_second` | 1 000       |
//! | `per_minute` | 60 000      |
//! | `per_hour`   | 3 600 000   |
//! | `per_day`    | 86 400 000  |
//!
//! Shortcuts are applied in the order above; if several are present the
//! last one wins. Definitions should not rely on that.
//!
//! ## Derived Quantities
//!
//! ```text
//! drip_interval_ms = interval_ms / per_interval      (time per token)
//! tokens_per_ms    = per_interval / interval_ms      (refill slope)
//! ttl_s            = ceil(size × drip_interval_ms / 1000), min 1
//! ```
//!
//! A definition without a refill pace (`per_interval` absent or zero) is
//! a *fixed* bucket: it never refills, and its state entry uses the
//! globally configured TTL.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ERL_ACTIVATION_PERIOD_S;

/// Raw bucket definition as supplied by configuration or as a per-call
/// override. Unknown pacing is legal here; validation happens at
/// dispatch time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketDef {
    /// Maximum content. Defaults to `per_interval` when unset.
    pub size: Option<u64>,
    /// Tokens added per `interval` milliseconds.
    pub per_interval: Option<u64>,
    /// Refill interval in milliseconds (explicit form).
    pub interval: Option<u64>,
    pub per_second: Option<u64>,
    pub per_minute: Option<u64>,
    pub per_hour: Option<u64>,
    pub per_day: Option<u64>,
    /// Takes always conform and never touch the store.
    pub unlimited: bool,
    /// Number of successive takes per key that may be answered from the
    /// in-process cache between store round trips.
    pub skip_n_calls: u32,
    /// Elevated capacity regime entered when the standard one is
    /// exhausted.
    pub elevated: Option<Box<BucketDef>>,
    /// Lifetime in seconds of the elevated-mode activation entry.
    pub erl_activation_period_seconds: Option<u64>,
}

impl BucketDef {
    /// True when the definition states any refill pace at all, via a
    /// shortcut or the explicit pair.
    pub fn has_rate(&self) -> bool {
        self.per_second.is_some()
            || self.per_minute.is_some()
            || self.per_hour.is_some()
            || self.per_day.is_some()
            || self.per_interval.is_some()
    }
}

/// Compiled runtime form of a bucket. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDescriptor {
    pub size: u64,
    /// Zero for fixed buckets.
    pub interval_ms: u64,
    /// Zero for fixed buckets.
    pub per_interval: u64,
    pub tokens_per_ms: f64,
    pub drip_interval_ms: f64,
    /// TTL applied to the state entry on every mutation.
    pub ttl_s: u64,
    pub unlimited: bool,
    pub skip_n_calls: u32,
    pub erl_activation_period_s: u64,
    pub elevated: Option<Box<BucketDescriptor>>,
}

impl BucketDescriptor {
    /// Whether this bucket refills over time.
    pub fn refills(&self) -> bool {
        self.per_interval > 0 && self.interval_ms > 0
    }

    /// An elevated sub-descriptor usable for promotion: present, with a
    /// size and a refill pace of its own.
    pub fn elevated_usable(&self) -> Option<&BucketDescriptor> {
        self.elevated
            .as_deref()
            .filter(|e| e.size > 0 && e.refills())
    }
}

/// Canonicalize a raw definition into a descriptor.
///
/// `default_ttl_s` is applied to fixed buckets, whose state would
/// otherwise never expire on its own.
pub fn normalize(def: &BucketDef, default_ttl_s: u64) -> BucketDescriptor {
    let mut interval_ms = def.interval.unwrap_or(0);
    let mut per_interval = def.per_interval.unwrap_or(0);

    // Fixed shortcut table; later entries override earlier ones.
    let shortcuts = [
        (def.per_second, 1_000u64),
        (def.per_minute, 60_000),
        (def.per_hour, 3_600_000),
        (def.per_day, 86_400_000),
    ];
    for (value, ms) in shortcuts {
        if let Some(v) = value {
            interval_ms = ms;
            per_interval = v;
        }
    }

    let size = def.size.unwrap_or(per_interval);

    let (tokens_per_ms, drip_interval_ms, ttl_s) = if per_interval > 0 && interval_ms > 0 {
        let drip = interval_ms as f64 / per_interval as f64;
        let slope = per_interval as f64 / interval_ms as f64;
        let ttl = ((size as f64 * drip) / 1000.0).ceil().max(1.0) as u64;
        (slope, drip, ttl)
    } else {
        (0.0, 0.0, default_ttl_s)
    };

    let erl_activation_period_s = def
        .erl_activation_period_seconds
        .unwrap_or(DEFAULT_ERL_ACTIVATION_PERIOD_S);

    let elevated = def.elevated.as_ref().map(|e| {
        let mut child = (**e).clone();
        // The activation period may be stated on either level.
        if child.erl_activation_period_seconds.is_none() {
            child.erl_activation_period_seconds = def.erl_activation_period_seconds;
        }
        Box::new(normalize(&child, default_ttl_s))
    });

    BucketDescriptor {
        size,
        interval_ms,
        per_interval,
        tokens_per_ms,
        drip_interval_ms,
        ttl_s,
        unlimited: def.unlimited,
        skip_n_calls: def.skip_n_calls,
        erl_activation_period_s,
        elevated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GLOBAL_TTL_S;

    fn def(json: serde_json::Value) -> BucketDef {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn per_second_shortcut_sets_interval_and_pace() {
        let d = normalize(&def(serde_json::json!({"size": 10, "per_second": 5})), DEFAULT_GLOBAL_TTL_S);
        assert_eq!(d.size, 10);
        assert_eq!(d.interval_ms, 1_000);
        assert_eq!(d.per_interval, 5);
        assert_eq!(d.drip_interval_ms, 200.0);
        assert_eq!(d.tokens_per_ms, 0.005);
        assert_eq!(d.ttl_s, 2);
    }

    #[test]
    fn size_defaults_to_per_interval() {
        let d = normalize(&def(serde_json::json!({"per_minute": 60})), DEFAULT_GLOBAL_TTL_S);
        assert_eq!(d.size, 60);
        assert_eq!(d.interval_ms, 60_000);
    }

    #[test]
    fn last_shortcut_wins() {
        let d = normalize(
            &def(serde_json::json!({"per_second": 5, "per_minute": 30})),
            DEFAULT_GLOBAL_TTL_S,
        );
        assert_eq!(d.interval_ms, 60_000);
        assert_eq!(d.per_interval, 30);
    }

    #[test]
    fn per_day_five_yields_exactly_one_day_ttl() {
        let d = normalize(&def(serde_json::json!({"per_day": 5})), DEFAULT_GLOBAL_TTL_S);
        assert_eq!(d.size, 5);
        assert_eq!(d.ttl_s, 86_400);
    }

    #[test]
    fn missing_pace_is_a_fixed_bucket_with_global_ttl() {
        let d = normalize(&def(serde_json::json!({"size": 3})), DEFAULT_GLOBAL_TTL_S);
        assert!(!d.refills());
        assert_eq!(d.tokens_per_ms, 0.0);
        assert_eq!(d.drip_interval_ms, 0.0);
        assert_eq!(d.ttl_s, DEFAULT_GLOBAL_TTL_S);
    }

    #[test]
    fn zero_pace_is_fixed_too() {
        let d = normalize(&def(serde_json::json!({"size": 3, "per_hour": 0})), DEFAULT_GLOBAL_TTL_S);
        assert!(!d.refills());
        assert_eq!(d.size, 3);
    }

    #[test]
    fn elevated_is_normalized_recursively_with_default_activation() {
        let d = normalize(
            &def(serde_json::json!({
                "size": 1,
                "per_minute": 1,
                "elevated": {"size": 10, "per_minute": 2}
            })),
            DEFAULT_GLOBAL_TTL_S,
        );
        let e = d.elevated_usable().expect("elevated");
        assert_eq!(e.size, 10);
        assert_eq!(e.per_interval, 2);
        assert_eq!(e.erl_activation_period_s, 900);
    }

    #[test]
    fn activation_period_inherits_from_parent_definition() {
        let d = normalize(
            &def(serde_json::json!({
                "size": 1,
                "per_minute": 1,
                "erl_activation_period_seconds": 300,
                "elevated": {"size": 10, "per_minute": 2}
            })),
            DEFAULT_GLOBAL_TTL_S,
        );
        assert_eq!(d.elevated.as_ref().unwrap().erl_activation_period_s, 300);
    }

    #[test]
    fn elevated_without_pace_is_not_usable() {
        let d = normalize(
            &def(serde_json::json!({"size": 1, "per_minute": 1, "elevated": {"size": 10}})),
            DEFAULT_GLOBAL_TTL_S,
        );
        assert!(d.elevated.is_some());
        assert!(d.elevated_usable().is_none());
    }

    #[test]
    fn tiny_refilling_bucket_keeps_a_one_second_ttl_floor() {
        let d = normalize(&def(serde_json::json!({"size": 1, "per_second": 1000})), DEFAULT_GLOBAL_TTL_S);
        assert_eq!(d.ttl_s, 1);
    }
}
