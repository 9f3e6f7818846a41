//! # Floodgate - Distributed Token-Bucket Rate Limiting
//!
//! Floodgate is a Redis-backed token-bucket rate limiting client. Every
//! decision is made in a single atomic round trip: the store-side
//! routine refills the bucket from elapsed time, tests conformance,
//! deducts, persists, and answers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────┐     ┌─────────────┐
//! │   Caller    │────▶│     Floodgate Client     │────▶│    Redis    │
//! │             │     │                          │     │   (State)   │
//! └─────────────┘     └──────────────────────────┘     └─────────────┘
//!                                  │
//!                     ┌────────────┼────────────┐
//!                     ▼            ▼            ▼
//!                ┌─────────┐ ┌──────────┐ ┌──────────┐
//!                │ Bucket  │ │ Override │ │  Atomic  │
//!                │ Registry│ │ Resolver │ │ Routines │
//!                └─────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Core Components
//!
//! - **[`Floodgate`]** - The client: validation, dispatch, decoding
//! - **[`BucketDescriptor`](bucket::BucketDescriptor)** - Compiled bucket configuration
//! - **[`BucketType`](registry::BucketType)** - Base config plus literal/regex overrides
//! - **[`Store`](store::Store)** - Atomic-operation seam (Redis or in-memory)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use floodgate::{Floodgate, Options, TakeParams};
//! use indexmap::IndexMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), floodgate::FloodgateError> {
//!     let mut buckets = IndexMap::new();
//!     buckets.insert(
//!         "ip".to_string(),
//!         serde_json::from_value(serde_json::json!({"size": 10, "per_second": 5})).unwrap(),
//!     );
//!     let limiter = Floodgate::connect(Options {
//!         uri: Some("redis://127.0.0.1:6379".to_string()),
//!         buckets,
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     let res = limiter.take(TakeParams::new("ip", "1.1.1.1")).await?;
//!     if !res.conformant {
//!         println!("limited, retry at {}", res.reset);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Elevated Rate Limits
//!
//! A bucket may carry an `elevated` sub-configuration: when the
//! standard capacity denies a request that the elevated one would
//! admit, the bucket is promoted for a time-boxed activation period
//! (tracked as a separate store entry with its own TTL). Tokens already
//! consumed carry forward into the elevated capacity, so promotion
//! never refunds a charge.
//!
//! ## Storage Modes
//!
//! | Mode        | Use Case                       | State            |
//! |-------------|--------------------------------|------------------|
//! | Redis       | Production, shared across apps | Lua routines     |
//! | In-memory   | Single process, tests          | Mutex-serialized |
//!
//! ## Module Organization
//!
//! - [`bucket`] - Raw definitions and compiled descriptors
//! - [`cache`] - Bounded LRU backing the in-process caches
//! - [`client`] - The client: dispatch, wait loop, lifecycle
//! - [`config`] - Constructor options
//! - [`error`] - Error type with stable validation codes
//! - [`health`] - Lifecycle events and liveness probing
//! - [`registry`] - Bucket-type compiler and key resolver
//! - [`result`] - Caller-visible operation results
//! - [`scripts`] - Server-side atomic Lua routines
//! - [`store`] - Storage backends (Redis, in-memory)
//! - [`validation`] - Request validation

pub mod bucket;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod registry;
pub mod result;
pub mod scripts;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use bucket::{BucketDef, BucketDescriptor};
pub use client::{ElevatedTakeParams, Floodgate, GetParams, PutParams, TakeParams};
pub use config::{Options, PingConfig};
pub use error::FloodgateError;
pub use health::{Event, PingStatus};
pub use registry::{OverrideDef, TypeDef};
pub use result::{ElevatedTakeResult, GetResult, PutResult, TakeResult};
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::Store;
pub use validation::Count;

/// Result type alias for floodgate operations
pub type Result<T> = std::result::Result<T, FloodgateError>;

/// Version of the floodgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
