//! Reference-counted pool of authenticated device sessions
//!
//! Keyed by `(host, port, identity)`. The first `acquire` logs in, later ones
//! share the handle; the last `release` tears the session down immediately.
//! `run` gives callers one transparent reconnect when a pooled handle has gone
//! stale.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub identity: String,
}

impl PoolKey {
    pub fn new(host: &str, port: u16, identity: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            identity: identity.to_string(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.identity, self.host, self.port)
    }
}

/// Opens and closes the sessions a pool hands out
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    /// Connect and authenticate
    async fn open(&self, key: &PoolKey, password: &str) -> Result<Self::Session, DeviceError>;

    /// Tear a session down. Must not fail.
    async fn close(&self, session: Arc<Self::Session>);
}

struct PoolEntry<S> {
    session: Arc<S>,
    ref_count: usize,
    password: String,
}

pub struct ConnectionPool<F: SessionFactory> {
    factory: F,
    entries: Mutex<HashMap<PoolKey, PoolEntry<F::Session>>>,
}

impl<F: SessionFactory> ConnectionPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or open) the shared session for this key and take a reference
    pub async fn acquire(
        &self,
        host: &str,
        username: &str,
        password: &str,
        port: u16,
    ) -> Result<Arc<F::Session>, DeviceError> {
        let key = PoolKey::new(host, port, username);

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                entry.ref_count += 1;
                tracing::debug!("[Pool] Reusing {} (refs={})", key, entry.ref_count);
                return Ok(entry.session.clone());
            }
        }

        // Login happens outside the lock so one slow device can't stall the pool
        let session = Arc::new(self.factory.open(&key, password).await?);

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            // Lost a race with a concurrent first acquire; share the winner
            entry.ref_count += 1;
            let shared = entry.session.clone();
            drop(entries);
            self.factory.close(session).await;
            return Ok(shared);
        }

        entries.insert(
            key.clone(),
            PoolEntry {
                session: session.clone(),
                ref_count: 1,
                password: password.to_string(),
            },
        );
        tracing::info!("[Pool] Opened session {}", key);
        Ok(session)
    }

    /// Drop one reference; the last one closes the session
    pub async fn release(&self, key: &PoolKey) {
        let closing = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) if entry.ref_count > 1 => {
                    entry.ref_count -= 1;
                    None
                }
                Some(_) => entries.remove(key).map(|e| e.session),
                None => {
                    tracing::debug!("[Pool] Release of unknown session {}", key);
                    None
                }
            }
        };

        if let Some(session) = closing {
            tracing::info!("[Pool] Closing session {}", key);
            self.factory.close(session).await;
        }
    }

    /// Run `op` against the pooled session. A retryable failure replaces the
    /// session once and re-runs `op` once; the second result is final.
    pub async fn run<T, Op, Fut>(&self, key: &PoolKey, mut op: Op) -> Result<T, DeviceError>
    where
        Op: FnMut(Arc<F::Session>) -> Fut,
        Fut: Future<Output = Result<T, DeviceError>>,
    {
        let session = self
            .session(key)
            .await
            .ok_or_else(|| DeviceError::Transport(format!("no pooled session for {}", key)))?;

        match op(session.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!("[Pool] Session {} failed ({}), reconnecting once", key, e);
                let fresh = self.reconnect(key, &session).await?;
                op(fresh).await
            }
            Err(e) => Err(e),
        }
    }

    /// Current session for a key, without taking a reference
    pub async fn session(&self, key: &PoolKey) -> Option<Arc<F::Session>> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.session.clone())
    }

    pub async fn ref_count(&self, key: &PoolKey) -> usize {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.ref_count)
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Swap a stale session for a fresh one, keeping the reference count
    async fn reconnect(
        &self,
        key: &PoolKey,
        stale: &Arc<F::Session>,
    ) -> Result<Arc<F::Session>, DeviceError> {
        let password = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(key)
                .ok_or_else(|| DeviceError::Closed(format!("session {} was released", key)))?;
            if !Arc::ptr_eq(&entry.session, stale) {
                // Another caller already replaced it
                return Ok(entry.session.clone());
            }
            entry.password.clone()
        };

        let fresh = Arc::new(self.factory.open(key, &password).await?);

        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if Arc::ptr_eq(&entry.session, stale) => {
                let old = std::mem::replace(&mut entry.session, fresh.clone());
                drop(entries);
                self.factory.close(old).await;
                Ok(fresh)
            }
            Some(entry) => {
                let current = entry.session.clone();
                drop(entries);
                self.factory.close(fresh).await;
                Ok(current)
            }
            None => {
                drop(entries);
                self.factory.close(fresh).await;
                Err(DeviceError::Closed(format!("session {} was released", key)))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    pub struct StubSession {
        pub id: usize,
    }

    #[derive(Default)]
    pub struct StubFactory {
        pub opens: AtomicUsize,
        pub closes: AtomicUsize,
        pub reject_password: Option<String>,
        /// Holds every login until this many are in flight
        pub login_barrier: Option<Barrier>,
    }

    #[async_trait]
    impl SessionFactory for Arc<StubFactory> {
        type Session = StubSession;

        async fn open(&self, _key: &PoolKey, password: &str) -> Result<StubSession, DeviceError> {
            if self.reject_password.as_deref() == Some(password) {
                return Err(DeviceError::Auth("invalid user name or password".into()));
            }
            if let Some(barrier) = &self.login_barrier {
                barrier.wait().await;
            }
            let id = self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(StubSession { id })
        }

        async fn close(&self, _session: Arc<StubSession>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool() -> (Arc<StubFactory>, ConnectionPool<Arc<StubFactory>>) {
        let factory = Arc::new(StubFactory::default());
        (factory.clone(), ConnectionPool::new(factory))
    }

    #[tokio::test]
    async fn test_acquire_shares_and_release_closes_at_zero() {
        let (factory, pool) = pool();
        let key = PoolKey::new("10.0.0.1", 8729, "admin");

        let a = pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();
        let b = pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(&key).await, 2);

        pool.release(&key).await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 0);
        pool.release(&key).await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty().await);

        // Excess release is harmless
        pool.release(&key).await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identity_is_part_of_key() {
        let (factory, pool) = pool();
        pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();
        pool.acquire("10.0.0.1", "monitor", "pw", 8729).await.unwrap();
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_nothing_behind() {
        let factory = Arc::new(StubFactory {
            reject_password: Some("wrong".into()),
            ..Default::default()
        });
        let pool = ConnectionPool::new(factory.clone());
        let err = pool.acquire("10.0.0.1", "admin", "wrong", 8729).await;
        assert!(matches!(err, Err(DeviceError::Auth(_))));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_reconnects_once_on_retryable_error() {
        let (factory, pool) = pool();
        let key = PoolKey::new("10.0.0.1", 8729, "admin");
        pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result = pool
            .run(&key, |session| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(DeviceError::Closed("reset by peer".into()))
                    } else {
                        Ok(session.id)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        // Reference count survives the swap
        assert_eq!(pool.ref_count(&key).await, 1);
    }

    #[tokio::test]
    async fn test_run_propagates_second_failure() {
        let (_factory, pool) = pool();
        let key = PoolKey::new("10.0.0.1", 8729, "admin");
        pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = pool
            .run(&key, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DeviceError::Timeout("read".into())) }
            })
            .await;

        assert!(matches!(result, Err(DeviceError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_device_rejections() {
        let (factory, pool) = pool();
        let key = PoolKey::new("10.0.0.1", 8729, "admin");
        pool.acquire("10.0.0.1", "admin", "pw", 8729).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = pool
            .run(&key, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DeviceError::Trap("no such command".into())) }
            })
            .await;

        assert!(matches!(result, Err(DeviceError::Trap(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_acquire_keeps_one_session() {
        let factory = Arc::new(StubFactory {
            login_barrier: Some(Barrier::new(2)),
            ..Default::default()
        });
        let pool = ConnectionPool::new(factory.clone());
        let key = PoolKey::new("10.0.0.1", 8729, "admin");

        // Both logins run before either registers its session
        let (a, b) = tokio::join!(
            pool.acquire("10.0.0.1", "admin", "pw", 8729),
            pool.acquire("10.0.0.1", "admin", "pw", 8729)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        // The loser's session is closed, the winner's is shared
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.ref_count(&key).await, 2);

        pool.release(&key).await;
        pool.release(&key).await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);
        assert!(pool.is_empty().await);
    }
}
