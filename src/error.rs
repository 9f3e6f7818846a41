//! # Error Types
//!
//! Central error type for all floodgate operations.
//!
//! ## Error Kinds
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Kind         │  Variants                         │  Code        │
//! │  ─────────────┼───────────────────────────────────┼───────────── │
//! │  Validation   │  InvalidParams .. MissingElevated │  101–108     │
//! │  Transport    │  Connection, CommandTimeout       │  —           │
//! │  Store-side   │  Redis (incl. script errors)      │  —           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A non-conformant take is *not* an error: it comes back as a regular
//! result with `conformant: false`.

use std::time::Duration;

/// Error type for all floodgate operations.
///
/// Validation variants carry a stable numeric code retrievable via
/// [`FloodgateError::code`], so callers can branch on the failure class
/// without string matching.
#[derive(Debug, thiserror::Error)]
pub enum FloodgateError {
    /// Request parameters are structurally invalid.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Bucket type name is missing or empty.
    #[error("bucket type must be a non-empty string")]
    InvalidBucketType,

    /// Bucket key is missing or empty.
    #[error("bucket key must be a non-empty string")]
    InvalidKey,

    /// No bucket type with this name has been configured.
    #[error("undefined bucket type {0}")]
    UnknownBucketType(String),

    /// `count` failed coercion (negative take, or otherwise malformed).
    #[error("invalid count: {0}")]
    InvalidCount(String),

    /// A config override carries neither a size nor a rate shortcut.
    #[error("invalid configuration override: {0}")]
    InvalidOverride(String),

    /// Elevated take without an activation key.
    #[error("erlIsActiveKey is required for elevated limits")]
    MissingErlKey,

    /// Elevated take against a bucket whose elevated config is absent
    /// or incomplete.
    #[error("Attempted to takeElevated() for a bucket with no elevated config")]
    MissingElevatedConfig,

    /// Could not establish or re-establish a store connection.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A store command did not complete within the dispatch timeout.
    /// The deduction may or may not have happened (at-least-once).
    #[error("store command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Store-side failure, including script errors.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Malformed reply from an atomic routine.
    #[error("unexpected store reply: {0}")]
    Decode(String),
}

impl FloodgateError {
    /// Stable numeric code for validation errors, `None` otherwise.
    pub fn code(&self) -> Option<u16> {
        match self {
            FloodgateError::InvalidParams(_) => Some(101),
            FloodgateError::InvalidBucketType => Some(102),
            FloodgateError::InvalidKey => Some(103),
            FloodgateError::UnknownBucketType(_) => Some(104),
            FloodgateError::InvalidCount(_) => Some(105),
            FloodgateError::InvalidOverride(_) => Some(106),
            FloodgateError::MissingErlKey => Some(107),
            FloodgateError::MissingElevatedConfig => Some(108),
            _ => None,
        }
    }

    /// True for errors produced by request validation rather than the
    /// store or the transport.
    pub fn is_validation(&self) -> bool {
        self.code().is_some()
    }
}

pub type Result<T> = std::result::Result<T, FloodgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_stable_codes() {
        assert_eq!(FloodgateError::InvalidParams("x".into()).code(), Some(101));
        assert_eq!(FloodgateError::UnknownBucketType("ip".into()).code(), Some(104));
        assert_eq!(FloodgateError::MissingErlKey.code(), Some(107));
        assert_eq!(FloodgateError::MissingElevatedConfig.code(), Some(108));
    }

    #[test]
    fn transport_errors_have_no_code() {
        let err = FloodgateError::CommandTimeout(Duration::from_millis(125));
        assert_eq!(err.code(), None);
        assert!(!err.is_validation());
    }

    #[test]
    fn elevated_error_messages_are_exact() {
        assert_eq!(
            FloodgateError::MissingErlKey.to_string(),
            "erlIsActiveKey is required for elevated limits"
        );
        assert_eq!(
            FloodgateError::MissingElevatedConfig.to_string(),
            "Attempted to takeElevated() for a bucket with no elevated config"
        );
    }
}
