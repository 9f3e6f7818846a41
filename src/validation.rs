//! Request validation.
//!
//! Fail-fast checks applied before any store round trip. Each failure
//! maps to one of the stable validation codes on
//! [`FloodgateError`](crate::error::FloodgateError). A denied take is
//! not a validation failure; these cover malformed requests only.

use crate::bucket::{BucketDef, BucketDescriptor};
use crate::error::{FloodgateError, Result};

/// Requested token count for takes and puts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Count {
    /// Operation default: 1 for takes, `size` for puts.
    #[default]
    Default,
    /// The bucket's full size.
    All,
    N(i64),
}

impl From<i64> for Count {
    fn from(n: i64) -> Self {
        Count::N(n)
    }
}

/// Type and key must both be non-empty.
pub fn validate_request(bucket_type: &str, key: &str) -> Result<()> {
    if bucket_type.is_empty() {
        return Err(FloodgateError::InvalidBucketType);
    }
    if key.is_empty() {
        return Err(FloodgateError::InvalidKey);
    }
    Ok(())
}

/// A per-call override must state a size or some refill pace;
/// anything else cannot produce a meaningful bucket.
pub fn validate_override(def: &BucketDef) -> Result<()> {
    if def.size.is_none() && !def.has_rate() && !def.unlimited {
        return Err(FloodgateError::InvalidOverride(
            "override needs a size or an interval amount".to_string(),
        ));
    }
    Ok(())
}

/// Coerce a take count. Negative counts must never reach the atomic
/// routines.
pub fn take_count(count: Count, size: u64) -> Result<u64> {
    match count {
        Count::Default => Ok(1),
        Count::All => Ok(size),
        Count::N(n) if n >= 0 => Ok(n as u64),
        Count::N(n) => Err(FloodgateError::InvalidCount(format!(
            "take count must not be negative, got {}",
            n
        ))),
    }
}

/// Coerce a put count. Negative values are legal and debit the bucket.
pub fn put_count(count: Count, size: u64) -> i64 {
    match count {
        Count::Default | Count::All => size as i64,
        Count::N(n) => n,
    }
}

/// An elevated take needs a non-empty activation key and a usable
/// elevated sub-descriptor.
pub fn validate_elevated(descriptor: &BucketDescriptor, activation_key: &str) -> Result<()> {
    if activation_key.is_empty() {
        return Err(FloodgateError::MissingErlKey);
    }
    if descriptor.elevated_usable().is_none() {
        return Err(FloodgateError::MissingElevatedConfig);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::normalize;
    use crate::config::DEFAULT_GLOBAL_TTL_S;

    #[test]
    fn empty_type_and_key_are_rejected() {
        assert_eq!(validate_request("", "k").unwrap_err().code(), Some(102));
        assert_eq!(validate_request("ip", "").unwrap_err().code(), Some(103));
        assert!(validate_request("ip", "1.1.1.1").is_ok());
    }

    #[test]
    fn override_needs_size_or_rate() {
        let empty = BucketDef::default();
        assert_eq!(validate_override(&empty).unwrap_err().code(), Some(106));

        let sized: BucketDef = serde_json::from_value(serde_json::json!({"size": 5})).unwrap();
        assert!(validate_override(&sized).is_ok());

        let paced: BucketDef = serde_json::from_value(serde_json::json!({"per_day": 5})).unwrap();
        assert!(validate_override(&paced).is_ok());
    }

    #[test]
    fn take_count_coercion() {
        assert_eq!(take_count(Count::Default, 10).unwrap(), 1);
        assert_eq!(take_count(Count::All, 10).unwrap(), 10);
        assert_eq!(take_count(Count::N(0), 10).unwrap(), 0);
        assert_eq!(take_count(Count::N(-1), 10).unwrap_err().code(), Some(105));
    }

    #[test]
    fn put_count_coercion() {
        assert_eq!(put_count(Count::Default, 10), 10);
        assert_eq!(put_count(Count::All, 10), 10);
        assert_eq!(put_count(Count::N(-3), 10), -3);
    }

    #[test]
    fn elevated_take_requirements() {
        let plain = normalize(
            &serde_json::from_value(serde_json::json!({"size": 1, "per_minute": 1})).unwrap(),
            DEFAULT_GLOBAL_TTL_S,
        );
        assert_eq!(validate_elevated(&plain, "scope").unwrap_err().code(), Some(108));

        let with_erl = normalize(
            &serde_json::from_value(serde_json::json!({
                "size": 1, "per_minute": 1,
                "elevated": {"size": 10, "per_minute": 2}
            }))
            .unwrap(),
            DEFAULT_GLOBAL_TTL_S,
        );
        assert_eq!(validate_elevated(&with_erl, "").unwrap_err().code(), Some(107));
        assert!(validate_elevated(&with_erl, "scope").is_ok());
    }
}
