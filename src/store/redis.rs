//! Redis-backed store.
//!
//! Wraps a [`redis::aio::ConnectionManager`] (which re-establishes the
//! connection on failure) and the four atomic routines as
//! [`redis::Script`] values built once at construction — invoked by
//! hash, uploaded on first use. Every command is bounded by the
//! configured dispatch timeout; on timeout the routine may or may not
//! have executed, so deductions are at-least-once under timeout.

use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FloodgateError, Result};
use crate::scripts;
use crate::store::{
    ElevatedArgs, ElevatedRaw, GetArgs, GetRaw, PutArgs, PutRaw, Store, TakeArgs, TakeRaw,
};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    take: Script,
    take_elevated: Script,
    put: Script,
    get: Script,
    timeout: Duration,
}

impl RedisStore {
    /// Connect and register the atomic routines.
    pub async fn connect(uri: &str, command_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| FloodgateError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| FloodgateError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            take: Script::new(scripts::TAKE),
            take_elevated: Script::new(scripts::TAKE_ELEVATED),
            put: Script::new(scripts::PUT),
            get: Script::new(scripts::GET),
            timeout: command_timeout,
        })
    }

    async fn bounded<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(FloodgateError::from),
            Err(_) => Err(FloodgateError::CommandTimeout(self.timeout)),
        }
    }
}

fn parse_remaining(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| FloodgateError::Decode(format!("non-numeric remaining: {:?}", raw)))
}

#[async_trait]
impl Store for RedisStore {
    async fn take(&self, key: &str, args: TakeArgs) -> Result<TakeRaw> {
        let mut conn = self.conn.clone();
        let mut invocation = self.take.key(key);
        invocation
            .arg(args.tokens_per_ms)
            .arg(args.size)
            .arg(args.count)
            .arg(args.ttl_s)
            .arg(args.drip_interval_ms);

        let (remaining, conformant, now_ms, reset_ms): (String, i64, u64, u64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(TakeRaw {
            remaining: parse_remaining(&remaining)?,
            conformant: conformant == 1,
            now_ms,
            reset_ms,
        })
    }

    async fn take_elevated(
        &self,
        key: &str,
        activation_key: &str,
        args: TakeArgs,
        elevated: ElevatedArgs,
    ) -> Result<ElevatedRaw> {
        let mut conn = self.conn.clone();
        let mut invocation = self.take_elevated.key(key);
        invocation
            .key(activation_key)
            .arg(args.tokens_per_ms)
            .arg(args.size)
            .arg(args.count)
            .arg(args.ttl_s)
            .arg(args.drip_interval_ms)
            .arg(elevated.tokens_per_ms)
            .arg(elevated.size)
            .arg(elevated.ttl_s)
            .arg(elevated.drip_interval_ms)
            .arg(elevated.activation_period_s);

        let (remaining, conformant, now_ms, reset_ms, erl_active): (String, i64, u64, u64, i64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(ElevatedRaw {
            remaining: parse_remaining(&remaining)?,
            conformant: conformant == 1,
            now_ms,
            reset_ms,
            erl_active: erl_active == 1,
        })
    }

    async fn put(&self, key: &str, args: PutArgs) -> Result<PutRaw> {
        let mut conn = self.conn.clone();
        let mut invocation = self.put.key(key);
        invocation
            .arg(args.count)
            .arg(args.size)
            .arg(args.ttl_s)
            .arg(args.drip_interval_ms);

        let (remaining, now_ms, reset_ms): (String, u64, u64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(PutRaw {
            remaining: parse_remaining(&remaining)?,
            now_ms,
            reset_ms,
        })
    }

    async fn get(&self, key: &str, args: GetArgs) -> Result<GetRaw> {
        let mut conn = self.conn.clone();
        let mut invocation = self.get.key(key);
        invocation.arg(args.size).arg(args.drip_interval_ms);

        let (remaining, now_ms, reset_ms): (String, u64, u64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(GetRaw {
            remaining: parse_remaining(&remaining)?,
            now_ms,
            reset_ms,
        })
    }

    async fn reset_namespace(&self, prefix: &str) -> Result<()> {
        // Not bounded by the command timeout: clearing a namespace is an
        // administrative call and may legitimately take longer.
        let mut conn = self.conn.clone();

        if prefix.is_empty() {
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            return Ok(());
        }

        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}
