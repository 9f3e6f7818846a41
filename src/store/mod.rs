//! # Storage Backends
//!
//! The atomic routines run against a [`Store`]. Two backends ship:
//!
//! | Backend                       | Use Case                                  |
//! |-------------------------------|-------------------------------------------|
//! | [`RedisStore`](self::redis::RedisStore)   | Production, shared state across processes |
//! | [`MemoryStore`](self::memory::MemoryStore) | Single process, development, tests        |
//!
//! Both execute the exact same semantics: state is read, refilled from
//! the *store's* clock, mutated, re-TTL'd and returned in one atomic
//! unit. Concurrent operations against the same key are serialized by
//! the backend (script execution in Redis, a mutex in memory), so no
//! two takes can observe the same state and both deduct.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

/// Arguments to the take routines, lifted straight off a descriptor.
#[derive(Debug, Clone, Copy)]
pub struct TakeArgs {
    pub tokens_per_ms: f64,
    pub size: u64,
    pub count: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
}

/// Elevated-regime parameters for [`Store::take_elevated`].
#[derive(Debug, Clone, Copy)]
pub struct ElevatedArgs {
    pub tokens_per_ms: f64,
    pub size: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
    pub activation_period_s: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PutArgs {
    /// May be negative; the routine clamps upward at `size` only.
    pub count: i64,
    pub size: u64,
    pub ttl_s: u64,
    pub drip_interval_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GetArgs {
    pub size: u64,
    pub drip_interval_ms: f64,
}

/// Raw outcome of a take, before client-side decoding.
#[derive(Debug, Clone, Copy)]
pub struct TakeRaw {
    pub remaining: f64,
    pub conformant: bool,
    pub now_ms: u64,
    pub reset_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ElevatedRaw {
    pub remaining: f64,
    pub conformant: bool,
    pub now_ms: u64,
    pub reset_ms: u64,
    /// Whether the elevated regime is active after this call.
    pub erl_active: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PutRaw {
    pub remaining: f64,
    pub now_ms: u64,
    pub reset_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct GetRaw {
    pub remaining: f64,
    pub now_ms: u64,
    pub reset_ms: u64,
}

/// Atomic bucket operations. Implementations load state, run the
/// routine, and persist the result as one unit; the clock is always the
/// store's own.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<TakeRaw>;

    async fn take_elevated(
        &self,
        key: &str,
        activation_key: &str,
        args: TakeArgs,
        elevated: ElevatedArgs,
    ) -> Result<ElevatedRaw>;

    async fn put(&self, key: &str, args: PutArgs) -> Result<PutRaw>;

    async fn get(&self, key: &str, args: GetArgs) -> Result<GetRaw>;

    /// Remove every entry under `prefix`; the whole database when the
    /// prefix is empty.
    async fn reset_namespace(&self, prefix: &str) -> Result<()>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}
