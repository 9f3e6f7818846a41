//! In-memory store.
//!
//! Runs the same routines as the Lua scripts, in-process, under a
//! single mutex — the mutex plays the role of the store's script
//! serialization, so the atomicity and ordering guarantees are the
//! same. TTLs are emulated with absolute expiry instants; expired
//! entries read as absent.
//!
//! Suited to single-process deployments and to exercising the full
//! client without a server.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::{
    ElevatedArgs, ElevatedRaw, GetArgs, GetRaw, PutArgs, PutRaw, Store, TakeArgs, TakeRaw,
};

#[derive(Debug, Clone, Copy)]
struct Entry {
    d_ms: u64,
    r: f64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, Entry>,
    /// Elevated-mode activation flags, managed independently of bucket
    /// state so losing one can never corrupt the other.
    activations: HashMap<String, Instant>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn refill(state: Option<(u64, f64)>, tokens_per_ms: f64, cap: f64, now: u64) -> f64 {
    match state {
        Some((d, r)) if tokens_per_ms > 0.0 => {
            let delta_ms = now.saturating_sub(d) as f64;
            (r + delta_ms * tokens_per_ms).min(cap)
        }
        Some((_, r)) => r,
        None => cap,
    }
}

fn reset_ms(now: u64, cap: f64, remaining: f64, drip_interval_ms: f64) -> u64 {
    if drip_interval_ms > 0.0 {
        (now as f64 + (cap - remaining) * drip_interval_ms).ceil() as u64
    } else {
        0
    }
}

impl Inner {
    fn live_state(&self, key: &str, at: Instant) -> Option<(u64, f64)> {
        self.buckets
            .get(key)
            .filter(|e| e.expires_at > at)
            .map(|e| (e.d_ms, e.r))
    }

    fn write(&mut self, key: &str, d_ms: u64, r: f64, ttl_s: u64, at: Instant) {
        self.buckets.insert(
            key.to_string(),
            Entry {
                d_ms,
                r,
                expires_at: at + Duration::from_secs(ttl_s),
            },
        );
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<TakeRaw> {
        let mut inner = self.inner.lock().await;
        let at = Instant::now();
        let now = now_ms();

        let size = args.size as f64;
        let count = args.count as f64;
        let content = refill(inner.live_state(key, at), args.tokens_per_ms, size, now);

        let conformant = content >= count;
        let remaining = if conformant {
            (content - count).min(size)
        } else {
            content
        };

        inner.write(key, now, remaining, args.ttl_s, at);

        Ok(TakeRaw {
            remaining,
            conformant,
            now_ms: now,
            reset_ms: reset_ms(now, size, remaining, args.drip_interval_ms),
        })
    }

    async fn take_elevated(
        &self,
        key: &str,
        activation_key: &str,
        args: TakeArgs,
        elevated: ElevatedArgs,
    ) -> Result<ElevatedRaw> {
        let mut inner = self.inner.lock().await;
        let at = Instant::now();
        let now = now_ms();

        let mut erl_on = inner
            .activations
            .get(activation_key)
            .is_some_and(|expiry| *expiry > at);

        let size = args.size as f64;
        let erl_size = elevated.size as f64;
        let count = args.count as f64;

        let (rate, cap) = if erl_on {
            (elevated.tokens_per_ms, erl_size)
        } else {
            (args.tokens_per_ms, size)
        };

        let mut content = refill(inner.live_state(key, at), rate, cap, now);
        let mut enough = content >= count;
        let mut cap = cap;

        if !enough && !erl_on {
            let used = size - content;
            let carried = erl_size - used;
            if carried >= count {
                erl_on = true;
                inner.activations.insert(
                    activation_key.to_string(),
                    at + Duration::from_secs(elevated.activation_period_s),
                );
                enough = true;
                content = carried;
                cap = erl_size;
            }
        }

        let remaining = if enough {
            (content - count).min(cap)
        } else {
            content
        };

        let ttl_s = if erl_on { elevated.ttl_s } else { args.ttl_s };
        inner.write(key, now, remaining, ttl_s, at);

        let (drip, reset_cap) = if erl_on {
            (elevated.drip_interval_ms, erl_size)
        } else {
            (args.drip_interval_ms, size)
        };

        Ok(ElevatedRaw {
            remaining,
            conformant: enough,
            now_ms: now,
            reset_ms: reset_ms(now, reset_cap, remaining, drip),
            erl_active: erl_on,
        })
    }

    async fn put(&self, key: &str, args: PutArgs) -> Result<PutRaw> {
        let mut inner = self.inner.lock().await;
        let at = Instant::now();
        let now = now_ms();

        let size = args.size as f64;
        let current = inner.live_state(key, at).map(|(_, r)| r).unwrap_or(size);
        let remaining = (current + args.count as f64).min(size);

        inner.write(key, now, remaining, args.ttl_s, at);

        Ok(PutRaw {
            remaining,
            now_ms: now,
            reset_ms: reset_ms(now, size, remaining, args.drip_interval_ms),
        })
    }

    async fn get(&self, key: &str, args: GetArgs) -> Result<GetRaw> {
        let inner = self.inner.lock().await;
        let at = Instant::now();
        let now = now_ms();

        let size = args.size as f64;
        let remaining = inner.live_state(key, at).map(|(_, r)| r).unwrap_or(size);

        Ok(GetRaw {
            remaining,
            now_ms: now,
            reset_ms: reset_ms(now, size, remaining, args.drip_interval_ms),
        })
    }

    async fn reset_namespace(&self, prefix: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if prefix.is_empty() {
            inner.buckets.clear();
            inner.activations.clear();
        } else {
            inner.buckets.retain(|k, _| !k.starts_with(prefix));
            inner.activations.retain(|k, _| !k.starts_with(prefix));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_args(size: u64, count: u64) -> TakeArgs {
        // 5 tokens per second.
        TakeArgs {
            tokens_per_ms: 0.005,
            size,
            count,
            ttl_s: 2,
            drip_interval_ms: 200.0,
        }
    }

    fn fixed_args(size: u64, count: u64) -> TakeArgs {
        TakeArgs {
            tokens_per_ms: 0.0,
            size,
            count,
            ttl_s: 60,
            drip_interval_ms: 0.0,
        }
    }

    #[tokio::test]
    async fn first_touch_starts_full() {
        let store = MemoryStore::new();
        let res = store.take("ip:1.1.1.1", take_args(10, 1)).await.unwrap();
        assert!(res.conformant);
        assert_eq!(res.remaining, 9.0);
        assert!(res.reset_ms >= res.now_ms);
    }

    #[tokio::test]
    async fn fixed_bucket_never_refills_and_reports_zero_reset() {
        let store = MemoryStore::new();
        let first = store.take("fixed:x", fixed_args(3, 3)).await.unwrap();
        assert!(first.conformant);
        assert_eq!(first.reset_ms, 0);

        let second = store.take("fixed:x", fixed_args(3, 1)).await.unwrap();
        assert!(!second.conformant);
        assert_eq!(second.remaining, 0.0);
    }

    #[tokio::test]
    async fn unsuccessful_take_leaves_state_unchanged() {
        let store = MemoryStore::new();
        store.take("fixed:y", fixed_args(3, 2)).await.unwrap();
        let denied = store.take("fixed:y", fixed_args(3, 5)).await.unwrap();
        assert!(!denied.conformant);
        assert_eq!(denied.remaining, 1.0);
    }

    #[tokio::test]
    async fn put_restores_up_to_size_and_permits_negative_counts() {
        let store = MemoryStore::new();
        store.take("fixed:z", fixed_args(10, 10)).await.unwrap();

        let restored = store
            .put(
                "fixed:z",
                PutArgs { count: 1000, size: 10, ttl_s: 60, drip_interval_ms: 0.0 },
            )
            .await
            .unwrap();
        assert_eq!(restored.remaining, 10.0);

        let debited = store
            .put(
                "fixed:z",
                PutArgs { count: -15, size: 10, ttl_s: 60, drip_interval_ms: 0.0 },
            )
            .await
            .unwrap();
        assert_eq!(debited.remaining, -5.0);
    }

    #[tokio::test]
    async fn get_never_mutates() {
        let store = MemoryStore::new();
        let args = GetArgs { size: 10, drip_interval_ms: 0.0 };
        let fresh = store.get("ip:nobody", args).await.unwrap();
        assert_eq!(fresh.remaining, 10.0);

        store.take("ip:nobody", fixed_args(10, 4)).await.unwrap();
        let first = store.get("ip:nobody", args).await.unwrap();
        let second = store.get("ip:nobody", args).await.unwrap();
        assert_eq!(first.remaining, 6.0);
        assert_eq!(second.remaining, 6.0);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryStore::new();
        let mut args = fixed_args(5, 5);
        args.ttl_s = 0;
        store.take("fixed:gone", args).await.unwrap();

        let res = store.take("fixed:gone", fixed_args(5, 1)).await.unwrap();
        assert!(res.conformant);
        assert_eq!(res.remaining, 4.0);
    }

    #[tokio::test]
    async fn take_refreshes_ttl_with_the_supplied_value() {
        let store = MemoryStore::new();
        let mut args = fixed_args(5, 1);
        args.ttl_s = 86_400;
        store.take("day:k", args).await.unwrap();

        let inner = store.inner.lock().await;
        let entry = inner.buckets.get("day:k").unwrap();
        let ttl = entry.expires_at.duration_since(Instant::now());
        assert!(ttl > Duration::from_secs(86_398) && ttl <= Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn activation_flag_expiry_demotes() {
        let store = MemoryStore::new();
        let args = TakeArgs {
            tokens_per_ms: 1.0 / 60_000.0,
            size: 1,
            count: 1,
            ttl_s: 60,
            drip_interval_ms: 60_000.0,
        };
        let elevated = ElevatedArgs {
            tokens_per_ms: 2.0 / 60_000.0,
            size: 10,
            ttl_s: 300,
            drip_interval_ms: 30_000.0,
            activation_period_s: 0,
        };

        // Exhaust the standard capacity, forcing a promotion.
        store.take_elevated("t:k", "t:erl", args, elevated).await.unwrap();
        let promoted = store.take_elevated("t:k", "t:erl", args, elevated).await.unwrap();
        assert!(promoted.conformant);
        assert!(promoted.erl_active);

        // Zero activation period: the flag is already expired, so the
        // next call runs under standard capacity again.
        let demoted = store.take_elevated("t:k", "t:erl", args, elevated).await.unwrap();
        assert!(!demoted.erl_active);
    }
}
