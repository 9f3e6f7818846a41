//! Lifecycle events and store liveness probing.
//!
//! The client publishes its lifecycle on a broadcast channel: `Ready`
//! once the store connection is up, `Error` for command failures, and
//! `Ping` status from the optional monitor task. Subscribers that join
//! late only see events from that point on.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PingConfig;
use crate::store::Store;

/// Client lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The store connection was established.
    Ready,
    /// A command against the store failed.
    Error(String),
    /// A failure attributable to a single node.
    NodeError { node: String, message: String },
    /// Outcome of one liveness probe.
    Ping(PingStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingStatus {
    Success,
    Error(String),
    /// The failure threshold was crossed and a reconnect is underway.
    Reconnect,
    /// The threshold was crossed but reconnecting is disabled.
    ReconnectDryRun,
}

/// Probe the store every `config.interval`, publishing one `Ping` event
/// per probe. After `max_failed_attempts` consecutive failures a
/// `Reconnect` (or `ReconnectDryRun`) is published; another is only
/// published after `max_failed_attempts_to_retry_reconnect` further
/// failures.
pub(crate) fn spawn_ping_monitor<S: Store>(
    store: Arc<S>,
    config: PingConfig,
    events: broadcast::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so probing starts
        // one interval after construction.
        ticker.tick().await;

        let mut failed: u32 = 0;
        let mut reconnect_at = config.max_failed_attempts.max(1);

        loop {
            ticker.tick().await;
            let started = Instant::now();
            match store.ping().await {
                Ok(()) => {
                    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "store ping ok");
                    failed = 0;
                    reconnect_at = config.max_failed_attempts.max(1);
                    let _ = events.send(Event::Ping(PingStatus::Success));
                }
                Err(e) => {
                    failed += 1;
                    warn!(failed, error = %e, "store ping failed");
                    let _ = events.send(Event::Ping(PingStatus::Error(e.to_string())));
                    if failed >= reconnect_at {
                        let status = if config.reconnect_if_failed {
                            PingStatus::Reconnect
                        } else {
                            PingStatus::ReconnectDryRun
                        };
                        let _ = events.send(Event::Ping(status));
                        reconnect_at =
                            failed + config.max_failed_attempts_to_retry_reconnect.max(1);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FloodgateError, Result};
    use crate::store::{
        ElevatedArgs, ElevatedRaw, GetArgs, GetRaw, PutArgs, PutRaw, TakeArgs, TakeRaw,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn take(&self, _: &str, _: TakeArgs) -> Result<TakeRaw> {
            unimplemented!()
        }
        async fn take_elevated(
            &self,
            _: &str,
            _: &str,
            _: TakeArgs,
            _: ElevatedArgs,
        ) -> Result<ElevatedRaw> {
            unimplemented!()
        }
        async fn put(&self, _: &str, _: PutArgs) -> Result<PutRaw> {
            unimplemented!()
        }
        async fn get(&self, _: &str, _: GetArgs) -> Result<GetRaw> {
            unimplemented!()
        }
        async fn reset_namespace(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn ping(&self) -> Result<()> {
            Err(FloodgateError::Connection("down".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_pings_escalate_to_reconnect() {
        let (tx, mut rx) = broadcast::channel(16);
        let config = PingConfig {
            interval: Duration::from_millis(5),
            max_failed_attempts: 2,
            reconnect_if_failed: true,
            max_failed_attempts_to_retry_reconnect: 10,
        };
        let handle = spawn_ping_monitor(Arc::new(FailingStore), config, tx);

        let mut saw_error = false;
        let mut saw_reconnect = false;
        for _ in 0..4 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Ok(Event::Ping(PingStatus::Error(_)))) => saw_error = true,
                Ok(Ok(Event::Ping(PingStatus::Reconnect))) => {
                    saw_reconnect = true;
                    break;
                }
                Ok(Ok(_)) => {}
                _ => break,
            }
        }
        handle.abort();
        assert!(saw_error);
        assert!(saw_reconnect);
    }

    #[tokio::test]
    async fn dry_run_when_reconnect_is_disabled() {
        let (tx, mut rx) = broadcast::channel(16);
        let config = PingConfig {
            interval: Duration::from_millis(5),
            max_failed_attempts: 1,
            reconnect_if_failed: false,
            max_failed_attempts_to_retry_reconnect: 10,
        };
        let handle = spawn_ping_monitor(Arc::new(FailingStore), config, tx);

        let mut saw_dry_run = false;
        for _ in 0..4 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Ok(Event::Ping(PingStatus::ReconnectDryRun))) => {
                    saw_dry_run = true;
                    break;
                }
                Ok(Ok(_)) => {}
                _ => break,
            }
        }
        handle.abort();
        assert!(saw_dry_run);
    }
}
