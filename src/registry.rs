//! # Bucket-Type Compiler and Key Resolver
//!
//! A *bucket type* is a base definition plus per-key overrides. This
//! module compiles the raw form into its runtime shape and picks the
//! effective descriptor for each request.
//!
//! ## Resolution Order
//!
//! ```text
//! caller-supplied override          (normalized fresh, never cached)
//!   └─ literal override for key     (exact match)
//!        └─ cached regex override   (match cache, LRU capacity 50)
//!             └─ regex scan         (definition order, first match wins;
//!                                    hit is inserted into the cache)
//!                  └─ type default
//! ```
//!
//! Overrides carrying an `until` timestamp already in the past are
//! dropped at compile time. Overrides that expire *after* compilation
//! stay effective until the next configure call; runtime expiry of
//! compiled overrides is deliberately not implemented.

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bucket::{normalize, BucketDef, BucketDescriptor};
use crate::cache::{LruCache, CACHE_CAPACITY};
use crate::error::{FloodgateError, Result};

/// Raw bucket-type definition: a bucket plus optional overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDef {
    #[serde(flatten)]
    pub bucket: BucketDef,
    /// Keyed by literal key, unless the entry carries a `match` regex.
    pub overrides: IndexMap<String, OverrideDef>,
}

/// A single override entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideDef {
    #[serde(flatten)]
    pub bucket: BucketDef,
    /// Case-insensitive regex; when present the entry applies to every
    /// matching key instead of the entry's own name.
    #[serde(rename = "match")]
    pub match_pattern: Option<String>,
    /// UNIX timestamp (seconds) after which the override no longer
    /// applies. Checked at compile time only.
    pub until: Option<u64>,
}

#[derive(Debug)]
struct RegexOverride {
    pattern: Regex,
    descriptor: Arc<BucketDescriptor>,
}

/// Compiled bucket type.
#[derive(Debug)]
pub struct BucketType {
    base: Arc<BucketDescriptor>,
    literal: HashMap<String, Arc<BucketDescriptor>>,
    regexes: Vec<RegexOverride>,
    /// Allocated only when at least one regex override exists. Maps key
    /// to the index of its first matching override.
    match_cache: Option<Mutex<LruCache<String, usize>>>,
}

impl BucketType {
    /// Compile a raw type definition. `now_s` drives `until` expiry.
    pub fn compile(def: &TypeDef, default_ttl_s: u64, now_s: u64) -> Result<Self> {
        let base = Arc::new(normalize(&def.bucket, default_ttl_s));

        let mut literal = HashMap::new();
        let mut regexes = Vec::new();

        for (name, entry) in &def.overrides {
            if let Some(until) = entry.until {
                if until <= now_s {
                    tracing::debug!(override_name = %name, until, "dropping expired override");
                    continue;
                }
            }
            let descriptor = Arc::new(normalize(&entry.bucket, default_ttl_s));
            match &entry.match_pattern {
                Some(pattern) => {
                    let pattern = RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            FloodgateError::InvalidOverride(format!("bad pattern for {}: {}", name, e))
                        })?;
                    regexes.push(RegexOverride { pattern, descriptor });
                }
                None => {
                    literal.insert(name.clone(), descriptor);
                }
            }
        }

        let match_cache = if regexes.is_empty() {
            None
        } else {
            Some(Mutex::new(LruCache::new(CACHE_CAPACITY)))
        };

        Ok(Self {
            base,
            literal,
            regexes,
            match_cache,
        })
    }

    /// The type's own descriptor.
    pub fn base(&self) -> &Arc<BucketDescriptor> {
        &self.base
    }

    /// Effective descriptor for `key`: literal override, then cached or
    /// scanned regex override, then the base. No negative caching.
    pub fn resolve(&self, key: &str) -> Arc<BucketDescriptor> {
        if let Some(found) = self.literal.get(key) {
            return Arc::clone(found);
        }

        if let Some(cache) = &self.match_cache {
            let mut cache = cache.lock().expect("match cache poisoned");
            if let Some(&index) = cache.get(&key.to_string()) {
                return Arc::clone(&self.regexes[index].descriptor);
            }
            for (index, entry) in self.regexes.iter().enumerate() {
                if entry.pattern.is_match(key) {
                    cache.insert(key.to_string(), index);
                    return Arc::clone(&entry.descriptor);
                }
            }
        }

        Arc::clone(&self.base)
    }
}
