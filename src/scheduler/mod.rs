//! Shared polling scheduler, one per device class
//!
//! Viewers subscribe to a host instead of talking to the device. The first
//! subscriber connects; every subscriber after that shares the poll loop's
//! cached snapshot. The last unsubscribe starts a grace period (polling keeps
//! going) and the cleanup sweep tears the host down once it expires; the
//! live connection is kept until then.
//!
//! Viewers that attach while a connect is in flight wait for its outcome.
//!
//! Lock order: a host's poll lock is always taken before the subscription
//! table mutex, never while holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::CacheStore;
use crate::config::MonitorConfig;
use crate::connector::Connector;
use crate::db::{CredentialRegistry, StatusStore};
use crate::error::{redact, MonitorError};
use crate::models::{Credentials, DeviceClass, DeviceState, ResetOutcome};

/// Floor for the poll loop's sleep so a due-now host can't spin it
const MIN_POLL_SLEEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// First subscriber is connecting; later subscribers piggyback
    Connecting,
    Active,
    /// Connect failed while other viewers were attached
    Failed,
}

/// Outcome of an in-flight connect, `None` until it settles
type ConnectOutcome = Option<Result<(), String>>;

#[derive(Debug, Clone)]
struct Subscription {
    ref_count: u32,
    phase: Phase,
    /// Viewers attached since the current connect started
    pending: u32,
    connecting: Option<watch::Receiver<ConnectOutcome>>,
    last_unsubscribe_at: Option<Instant>,
    poll_interval: Duration,
    next_poll_at: Instant,
    last_history_save_at: Option<Instant>,
}

impl Subscription {
    fn is_pending_cleanup(&self) -> bool {
        self.ref_count == 0 && self.last_unsubscribe_at.is_some()
    }

    fn grace_expired(&self, now: Instant, grace: Duration) -> bool {
        self.ref_count == 0
            && self
                .last_unsubscribe_at
                .map(|at| now.duration_since(at) >= grace)
                .unwrap_or(false)
    }
}

/// Survives the subscription so a failed host stays throttled after discard
#[derive(Debug, Clone, Default)]
struct Backoff {
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    subscriptions: HashMap<String, Subscription>,
    backoff: HashMap<String, Backoff>,
}

impl SchedulerState {
    /// Close out an in-flight connect. Every viewer that attached while it
    /// ran receives the outcome, so on failure their references are undone
    /// and a host with nobody left is dropped. Returns the viewers left.
    fn settle_connect(&mut self, host: &str, connected: bool) -> u32 {
        let Some(sub) = self.subscriptions.get_mut(host) else {
            return 0;
        };
        let pending = std::mem::take(&mut sub.pending);
        sub.connecting = None;
        sub.next_poll_at = Instant::now();

        if connected {
            sub.phase = Phase::Active;
            return sub.ref_count;
        }

        sub.phase = Phase::Failed;
        sub.ref_count = sub.ref_count.saturating_sub(pending);
        let left = sub.ref_count;
        if left == 0 {
            self.subscriptions.remove(host);
        }
        left
    }
}

/// Subscription as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Subscribing,
    Active,
    PendingCleanup,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub host: String,
    pub ref_count: u32,
    pub state: SubscriptionState,
    pub poll_interval_ms: u64,
    pub consecutive_failures: u32,
    pub backoff_remaining_secs: Option<u64>,
}

/// `min(base * 2^(failures-1), max)`
pub fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

pub struct MonitorScheduler {
    class: DeviceClass,
    connector: Arc<dyn Connector>,
    cache: Arc<CacheStore>,
    status_store: Arc<dyn StatusStore>,
    registry: Arc<dyn CredentialRegistry>,
    config: MonitorConfig,
    state: Mutex<SchedulerState>,
    poll_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    workers: Arc<Semaphore>,
    history_interval_secs: AtomicU64,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorScheduler {
    pub fn new(
        class: DeviceClass,
        connector: Arc<dyn Connector>,
        cache: Arc<CacheStore>,
        status_store: Arc<dyn StatusStore>,
        registry: Arc<dyn CredentialRegistry>,
        config: MonitorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            class,
            connector,
            cache,
            status_store,
            registry,
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            history_interval_secs: AtomicU64::new(config.history_interval_secs),
            config,
            state: Mutex::new(SchedulerState::default()),
            poll_locks: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    async fn poll_lock(&self, host: &str) -> Arc<Mutex<()>> {
        self.poll_locks
            .lock()
            .await
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.config.backoff_base_secs)
    }

    fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.config.backoff_max_secs)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Attach a viewer to `host`. The first viewer connects; a failure arms
    /// the host's backoff and is returned with secrets redacted. Viewers
    /// arriving mid-connect share its outcome.
    pub async fn subscribe(
        &self,
        host: &str,
        credentials: Credentials,
        poll_interval: Option<Duration>,
    ) -> Result<(), MonitorError> {
        let now = Instant::now();
        let attach = {
            let mut state = self.state.lock().await;

            if let Some(until) = state.backoff.get(host).and_then(|b| b.backoff_until) {
                if now < until {
                    let retry_in_secs = ceil_secs(until - now);
                    tracing::debug!(
                        "[Scheduler:{}] {} is backing off ({}s left)",
                        self.class,
                        host,
                        retry_in_secs
                    );
                    return Err(MonitorError::Backoff {
                        host: host.to_string(),
                        retry_in_secs,
                    });
                }
            }

            let default_interval = self.config.poll_interval();
            let sub = state
                .subscriptions
                .entry(host.to_string())
                .or_insert_with(|| Subscription {
                    ref_count: 0,
                    phase: Phase::Failed,
                    pending: 0,
                    connecting: None,
                    last_unsubscribe_at: None,
                    poll_interval: default_interval,
                    next_poll_at: now,
                    last_history_save_at: None,
                });

            sub.ref_count += 1;
            if sub.last_unsubscribe_at.take().is_some() {
                tracing::info!(
                    "[Scheduler:{}] {} resubscribed during grace period",
                    self.class,
                    host
                );
            }
            if let Some(interval) = poll_interval {
                sub.poll_interval = interval.max(MIN_POLL_SLEEP);
            }

            match sub.phase {
                Phase::Active => Attach::Joined,
                Phase::Connecting => {
                    sub.pending += 1;
                    match &sub.connecting {
                        Some(rx) => Attach::Wait(rx.clone()),
                        None => Attach::Joined,
                    }
                }
                Phase::Failed => {
                    let (tx, rx) = watch::channel(None);
                    sub.phase = Phase::Connecting;
                    sub.pending = 1;
                    sub.connecting = Some(rx);
                    Attach::Connect(tx)
                }
            }
        };

        let outcome = match attach {
            Attach::Joined => return Ok(()),
            Attach::Wait(rx) => return self.await_connect(host, rx).await,
            Attach::Connect(outcome) => outcome,
        };

        let lock = self.poll_lock(host).await;
        let _guard = lock.lock().await;

        match self.connector.subscribe(host, credentials.clone()).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    state.backoff.remove(host);
                    state.settle_connect(host, true);
                }
                outcome.send_replace(Some(Ok(())));
                self.wake.notify_one();
                tracing::info!("[Scheduler:{}] Subscribed {}", self.class, host);
                Ok(())
            }
            Err(e) => {
                let err = sanitize(e, host, &[credentials.password.as_str()]);
                let (failures, delay, viewers_left) = {
                    let mut state = self.state.lock().await;
                    let backoff = state.backoff.entry(host.to_string()).or_default();
                    backoff.consecutive_failures += 1;
                    let delay = backoff_delay(
                        backoff.consecutive_failures,
                        self.backoff_base(),
                        self.backoff_max(),
                    );
                    backoff.backoff_until = Some(Instant::now() + delay);
                    let failures = backoff.consecutive_failures;
                    (failures, delay, state.settle_connect(host, false))
                };
                outcome.send_replace(Some(Err(failure_message(&err))));

                tracing::warn!(
                    "[Scheduler:{}] Subscribe to {} failed ({} in a row, backing off {}s): {}",
                    self.class,
                    host,
                    failures,
                    delay.as_secs(),
                    err
                );
                if viewers_left > 0 {
                    self.write_error_marker(host, &err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    /// Wait for someone else's connect to settle and report its outcome
    async fn await_connect(
        &self,
        host: &str,
        mut rx: watch::Receiver<ConnectOutcome>,
    ) -> Result<(), MonitorError> {
        let outcome = rx.wait_for(|o| o.is_some()).await.map(|o| (*o).clone());
        match outcome {
            Ok(Some(Ok(()))) => Ok(()),
            Ok(Some(Err(message))) => Err(MonitorError::Connection {
                host: host.to_string(),
                message,
            }),
            _ => {
                // The connecting caller went away before settling
                let mut state = self.state.lock().await;
                let stranded = state
                    .subscriptions
                    .get(host)
                    .map(|sub| sub.phase == Phase::Connecting)
                    .unwrap_or(false);
                if stranded {
                    state.settle_connect(host, false);
                }
                Err(MonitorError::Connection {
                    host: host.to_string(),
                    message: "connect was abandoned".to_string(),
                })
            }
        }
    }

    /// Detach a viewer. Excess calls are harmless. The connection stays up
    /// through the grace period; only the sweep tears it down.
    pub async fn unsubscribe(&self, host: &str) {
        let mut state = self.state.lock().await;
        let Some(sub) = state.subscriptions.get_mut(host) else {
            tracing::debug!("[Scheduler:{}] Unsubscribe for unknown {}", self.class, host);
            return;
        };
        sub.ref_count = sub.ref_count.saturating_sub(1);
        if sub.ref_count == 0 && sub.last_unsubscribe_at.is_none() {
            sub.last_unsubscribe_at = Some(Instant::now());
            tracing::info!(
                "[Scheduler:{}] {} has no viewers, cleanup in {}s",
                self.class,
                host,
                self.config.grace_timeout_secs
            );
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Poll one host now (admin refresh). Same side effects as a loop poll.
    pub async fn refresh(&self, host: &str) -> Result<Value, MonitorError> {
        self.poll_host(host).await
    }

    async fn poll_host(&self, host: &str) -> Result<Value, MonitorError> {
        let lock = self.poll_lock(host).await;
        let _guard = lock.lock().await;

        let active = self
            .state
            .lock()
            .await
            .subscriptions
            .get(host)
            .map(|s| s.phase == Phase::Active)
            .unwrap_or(false);
        if !active {
            return Err(MonitorError::NotSubscribed(host.to_string()));
        }

        match self.connector.fetch_stats(host).await {
            Ok(payload) => {
                let value = serde_json::to_value(&payload)
                    .map_err(|e| MonitorError::InternalError(format!("snapshot encode: {}", e)))?;
                self.cache.set(host, value.clone(), None).await;

                if let Err(e) = self
                    .status_store
                    .update_device_status(host, self.class, DeviceState::Online, Some(&value))
                    .await
                {
                    tracing::warn!("[Scheduler:{}] Status update for {} failed: {}", self.class, host, e);
                }
                if self.history_due(host).await {
                    if let Err(e) = self.status_store.append_history(host, self.class, &value).await {
                        tracing::warn!("[Scheduler:{}] History append for {} failed: {}", self.class, host, e);
                    }
                }
                Ok(value)
            }
            Err(e) => {
                tracing::debug!("[Scheduler:{}] Poll of {} failed: {}", self.class, host, e);
                self.write_error_marker(host, &e.to_string()).await;
                if let Err(e) = self
                    .status_store
                    .update_device_status(host, self.class, DeviceState::Offline, None)
                    .await
                {
                    tracing::warn!("[Scheduler:{}] Status update for {} failed: {}", self.class, host, e);
                }
                Err(e)
            }
        }
    }

    async fn write_error_marker(&self, host: &str, message: &str) {
        let marker = json!({
            "host": host,
            "online": false,
            "error": message,
            "polled_at": Utc::now(),
        });
        self.cache.set(host, marker, None).await;
    }

    async fn history_due(&self, host: &str) -> bool {
        let interval = Duration::from_secs(self.history_interval_secs.load(Ordering::Relaxed));
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(sub) = state.subscriptions.get_mut(host) else {
            return false;
        };
        let due = sub
            .last_history_save_at
            .map(|at| now.duration_since(at) >= interval)
            .unwrap_or(true);
        if due {
            sub.last_history_save_at = Some(now);
        }
        due
    }

    async fn refresh_history_interval(&self) {
        match self.status_store.get_history_interval_secs().await {
            Ok(Some(secs)) => self.history_interval_secs.store(secs, Ordering::Relaxed),
            Ok(None) => self
                .history_interval_secs
                .store(self.config.history_interval_secs, Ordering::Relaxed),
            Err(e) => tracing::debug!(
                "[Scheduler:{}] History interval lookup failed, keeping current: {}",
                self.class,
                e
            ),
        }
    }

    /// Poll every due host concurrently and wait for the batch. Returns how
    /// long until the next host is due.
    pub(crate) async fn poll_due(self: &Arc<Self>) -> Duration {
        let now = Instant::now();
        let due: Vec<String> = {
            let mut state = self.state.lock().await;
            state
                .subscriptions
                .iter_mut()
                .filter(|(_, sub)| sub.phase == Phase::Active && sub.next_poll_at <= now)
                .map(|(host, sub)| {
                    sub.next_poll_at = now + sub.poll_interval;
                    host.clone()
                })
                .collect()
        };

        let mut batch = Vec::with_capacity(due.len());
        for host in due {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let task_host = host.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                this.poll_host(&task_host).await
            });
            batch.push((host, handle));
        }

        let finished = join_all(
            batch
                .into_iter()
                .map(|(host, handle)| async move { (host, handle.await) }),
        )
        .await;
        for (host, joined) in finished {
            if let Err(e) = joined {
                tracing::error!("[Scheduler:{}] Poll task for {} panicked: {}", self.class, host, e);
            }
        }

        let state = self.state.lock().await;
        state
            .subscriptions
            .values()
            .filter(|sub| sub.phase == Phase::Active)
            .map(|sub| sub.next_poll_at)
            .min()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_else(|| self.config.poll_interval())
            .max(MIN_POLL_SLEEP)
    }

    // ========================================================================
    // Cleanup & admin
    // ========================================================================

    /// Tear down hosts whose grace period has expired
    pub(crate) async fn sweep(&self) {
        let grace = self.config.grace_timeout();
        let now = Instant::now();
        let expired: Vec<String> = self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.grace_expired(now, grace))
            .map(|(host, _)| host.clone())
            .collect();

        for host in expired {
            let lock = self.poll_lock(&host).await;
            let _guard = lock.lock().await;

            {
                let mut state = self.state.lock().await;
                // A viewer may have come back while we waited for the poll lock
                let still_expired = state
                    .subscriptions
                    .get(&host)
                    .map(|sub| sub.grace_expired(Instant::now(), grace))
                    .unwrap_or(false);
                if !still_expired {
                    continue;
                }
                state.subscriptions.remove(&host);
            }

            self.cache.delete(&host).await;
            self.connector.cleanup(&host).await;

            if !self.state.lock().await.subscriptions.contains_key(&host) {
                self.poll_locks.lock().await.remove(&host);
            }
            tracing::info!("[Scheduler:{}] Cleaned up {} after grace period", self.class, host);
        }

        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            tracing::debug!("[Scheduler:{}] Purged {} expired cache entries", self.class, purged);
        }

        // Forget failure streaks for hosts nobody has retried in a while
        let stale_after = self.backoff_max();
        let mut state = self.state.lock().await;
        let SchedulerState {
            subscriptions,
            backoff,
        } = &mut *state;
        backoff.retain(|host, b| {
            subscriptions.contains_key(host)
                || b.backoff_until
                    .map(|until| now < until + stale_after)
                    .unwrap_or(false)
        });
    }

    /// Admin reset: drop backoff, cached snapshot and the live connection but
    /// keep the viewers. If any remain, reconnect with registry credentials.
    pub async fn reset(&self, host: &str) -> ResetOutcome {
        let lock = self.poll_lock(host).await;
        let _guard = lock.lock().await;

        let (viewers, outcome) = {
            let mut state = self.state.lock().await;
            state.backoff.remove(host);
            match state.subscriptions.get_mut(host) {
                // A subscribe is about to connect with fresh credentials
                Some(sub) if sub.phase == Phase::Connecting => (sub.ref_count, None),
                Some(sub) if sub.ref_count > 0 => {
                    let (tx, rx) = watch::channel(None);
                    sub.phase = Phase::Connecting;
                    sub.pending = 0;
                    sub.connecting = Some(rx);
                    (sub.ref_count, Some(tx))
                }
                _ => (0, None),
            }
        };

        self.cache.delete(host).await;
        self.connector.cleanup(host).await;
        tracing::info!("[Scheduler:{}] Reset {} ({} viewers)", self.class, host, viewers);

        let Some(outcome) = outcome else {
            return ResetOutcome {
                success: true,
                message: format!("Connection to {} reset", host),
            };
        };

        let credentials = match self.registry.get_device_credentials(host, self.class).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                let message = format!("Connection to {} reset; no credentials registered to reconnect", host);
                self.settle_reset(host, &outcome, Err(message.clone())).await;
                return ResetOutcome {
                    success: false,
                    message,
                };
            }
            Err(e) => {
                let message = format!("Connection to {} reset; registry lookup failed: {}", host, e);
                self.settle_reset(host, &outcome, Err(message.clone())).await;
                return ResetOutcome {
                    success: false,
                    message,
                };
            }
        };

        match self.connector.subscribe(host, credentials.clone()).await {
            Ok(()) => {
                self.settle_reset(host, &outcome, Ok(())).await;
                self.wake.notify_one();
                ResetOutcome {
                    success: true,
                    message: format!("Connection to {} reset and re-established", host),
                }
            }
            Err(e) => {
                let err = sanitize(e, host, &[credentials.password.as_str()]);
                self.settle_reset(host, &outcome, Err(failure_message(&err))).await;
                ResetOutcome {
                    success: false,
                    message: format!("Connection to {} reset; reconnect failed: {}", host, err),
                }
            }
        }
    }

    async fn settle_reset(
        &self,
        host: &str,
        outcome: &watch::Sender<ConnectOutcome>,
        result: Result<(), String>,
    ) {
        self.state
            .lock()
            .await
            .settle_connect(host, result.is_ok());
        outcome.send_replace(Some(result));
    }

    pub async fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let now = Instant::now();
        let state = self.state.lock().await;
        let mut infos: Vec<SubscriptionInfo> = state
            .subscriptions
            .iter()
            .map(|(host, sub)| {
                let backoff = state.backoff.get(host);
                SubscriptionInfo {
                    host: host.clone(),
                    ref_count: sub.ref_count,
                    state: match sub.phase {
                        _ if sub.is_pending_cleanup() => SubscriptionState::PendingCleanup,
                        Phase::Connecting => SubscriptionState::Subscribing,
                        Phase::Active => SubscriptionState::Active,
                        Phase::Failed => SubscriptionState::Failed,
                    },
                    poll_interval_ms: sub.poll_interval.as_millis() as u64,
                    consecutive_failures: backoff.map(|b| b.consecutive_failures).unwrap_or(0),
                    backoff_remaining_secs: backoff
                        .and_then(|b| b.backoff_until)
                        .filter(|until| *until > now)
                        .map(|until| ceil_secs(until - now)),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.host.cmp(&b.host));
        infos
    }

    pub async fn ref_count(&self, host: &str) -> u32 {
        self.state
            .lock()
            .await
            .subscriptions
            .get(host)
            .map(|s| s.ref_count)
            .unwrap_or(0)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the poll loop and the cleanup sweep
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::warn!("[Scheduler:{}] Already running", self.class);
            return;
        }
        self.shutdown.send_replace(false);

        let poller = self.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { poller.run_poll_loop(shutdown).await }));

        let sweeper = self.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { sweeper.run_sweep_loop(shutdown).await }));

        tracing::info!(
            "[Scheduler:{}] Started (poll {}ms, grace {}s, workers {})",
            self.class,
            self.config.poll_interval_ms,
            self.config.grace_timeout_secs,
            self.config.max_workers
        );
    }

    /// Stop both loops and release every live connection
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("[Scheduler:{}] Loop ended abnormally: {}", self.class, e);
            }
        }

        let hosts: Vec<String> = {
            let mut state = self.state.lock().await;
            state.backoff.clear();
            state.subscriptions.drain().map(|(host, _)| host).collect()
        };
        for host in &hosts {
            let lock = self.poll_lock(host).await;
            let _guard = lock.lock().await;
            self.cache.delete(host).await;
            self.connector.cleanup(host).await;
        }
        self.poll_locks.lock().await.clear();
        tracing::info!("[Scheduler:{}] Stopped, released {} hosts", self.class, hosts.len());
    }

    async fn run_poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.refresh_history_interval().await;
            let wait = self.poll_due().await;

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("[Scheduler:{}] Poll loop exited", self.class);
    }

    async fn run_sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("[Scheduler:{}] Sweep loop exited", self.class);
    }
}

/// How a subscribe attaches to the host's connection
enum Attach {
    /// Already connected
    Joined,
    /// Another caller is connecting
    Wait(watch::Receiver<ConnectOutcome>),
    /// This caller connects and reports the outcome
    Connect(watch::Sender<ConnectOutcome>),
}

/// Message handed to viewers waiting on a failed connect
fn failure_message(err: &MonitorError) -> String {
    match err {
        MonitorError::Connection { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Strip secrets from a connect error before it leaves the scheduler
fn sanitize(err: MonitorError, host: &str, secrets: &[&str]) -> MonitorError {
    match err {
        MonitorError::Connection { host, message } => MonitorError::Connection {
            host,
            message: redact(&message, secrets),
        },
        MonitorError::Device(e) => MonitorError::Connection {
            host: host.to_string(),
            message: redact(&e.to_string(), secrets),
        },
        MonitorError::InternalError(message) => MonitorError::InternalError(redact(&message, secrets)),
        other => other,
    }
}
