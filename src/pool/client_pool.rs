use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::url_policy::{normalize_url, UrlPolicy, UrlRejection};
use crate::lab_client::{Credentials, LabClient, LabClientError, DEFAULT_API_TIMEOUT};
use crate::server::metrics;

pub const DEFAULT_MAX_SIZE: usize = 50;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_PER_SERVER: usize = 5;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    UrlNotAllowed(#[from] UrlRejection),

    #[error("Too many concurrent requests to {url} (max: {max})")]
    TooManyConcurrentRequests { url: String, max: usize },

    #[error("Failed to create client for {url}: {source}")]
    ClientCreation {
        url: String,
        #[source]
        source: LabClientError,
    },
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: usize,
    pub ttl: Duration,
    pub max_per_server: usize,
    pub request_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            ttl: DEFAULT_TTL,
            max_per_server: DEFAULT_MAX_PER_SERVER,
            request_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

/// Identity of a pooled client: normalized URL plus TLS verification flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub url: String,
    pub verify_tls: bool,
}

struct PooledClient {
    client: Arc<LabClient>,
    last_used: Instant,
    active_requests: usize,
    // Monotonic acquire counter, lowest is least recently used.
    recency: u64,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<PoolKey, PooledClient>,
    tick: u64,
}

impl PoolInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let expired: Vec<PoolKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.active_requests == 0 && now.duration_since(entry.last_used) > ttl
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                entry.client.close();
                info!("Evicted expired client: {}", key.url);
                metrics::record_pool_eviction("expired");
            }
        }
        expired.len()
    }

    /// Make room for one more entry. Idle entries go first, oldest first;
    /// when every entry is busy the oldest one is dropped from tracking
    /// without closing it, so its in-flight requests can finish.
    fn evict_one(&mut self) {
        let idle_lru = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.active_requests == 0)
            .min_by_key(|(_, entry)| entry.recency)
            .map(|(key, _)| key.clone());

        if let Some(key) = idle_lru {
            if let Some(entry) = self.entries.remove(&key) {
                entry.client.close();
                info!("Evicted LRU client: {}", key.url);
                metrics::record_pool_eviction("lru");
            }
            return;
        }

        let busy_lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency)
            .map(|(key, _)| key.clone());

        if let Some(key) = busy_lru {
            if let Some(entry) = self.entries.remove(&key) {
                warn!(
                    "Force-evicted active client: {} ({} active requests)",
                    key.url, entry.active_requests
                );
                metrics::record_pool_eviction("forced");
            }
        }
    }

    fn active_requests(&self) -> usize {
        self.entries.values().map(|e| e.active_requests).sum()
    }
}

/// Bounded pool of [`LabClient`]s with LRU and idle-TTL eviction and a
/// per-server concurrency cap.
///
/// All bookkeeping happens under a single mutex that is never held across
/// an await point.
pub struct ClientPool {
    settings: PoolSettings,
    policy: UrlPolicy,
    inner: Mutex<PoolInner>,
}

impl ClientPool {
    pub fn new(settings: PoolSettings, policy: UrlPolicy) -> Self {
        Self {
            settings,
            policy,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    /// Check `url` against the URL policy and return the normalized form.
    pub fn validate_url(&self, url: &str) -> Result<String, PoolError> {
        Ok(self.policy.validate(url)?)
    }

    /// Get or create the client for `(url, verify_tls)` and count one more
    /// active request against it.
    ///
    /// An existing client has its credentials replaced by `credentials`.
    /// Clients are shared, so a concurrent request on the same key may log
    /// in with whichever credentials were written last.
    pub fn acquire(
        &self,
        url: &str,
        credentials: Credentials,
        verify_tls: bool,
    ) -> Result<Arc<LabClient>, PoolError> {
        let key = PoolKey {
            url: self.validate_url(url)?,
            verify_tls,
        };
        self.acquire_key(&key, credentials)
    }

    /// Like [`ClientPool::acquire`], but the returned lease releases the
    /// request slot when dropped.
    pub fn lease(
        self: &Arc<Self>,
        url: &str,
        credentials: Credentials,
        verify_tls: bool,
    ) -> Result<PoolLease, PoolError> {
        let key = PoolKey {
            url: self.validate_url(url)?,
            verify_tls,
        };
        let client = self.acquire_key(&key, credentials)?;
        Ok(PoolLease {
            pool: Arc::clone(self),
            key,
            client,
        })
    }

    fn acquire_key(
        &self,
        key: &PoolKey,
        credentials: Credentials,
    ) -> Result<Arc<LabClient>, PoolError> {
        {
            let mut inner = self.lock();
            inner.evict_expired(Instant::now(), self.settings.ttl);
            if let Some(client) = self.claim(&mut inner, key, &credentials)? {
                return Ok(client);
            }
        }

        // Built without the lock held; nothing is evicted unless this succeeds.
        let client = LabClient::new(
            &key.url,
            credentials.clone(),
            key.verify_tls,
            self.settings.request_timeout,
        )
        .map_err(|source| PoolError::ClientCreation {
            url: key.url.clone(),
            source,
        })?;

        self.admit(key, credentials, Arc::new(client))
    }

    /// Take a request slot on an existing entry, if there is one.
    fn claim(
        &self,
        inner: &mut PoolInner,
        key: &PoolKey,
        credentials: &Credentials,
    ) -> Result<Option<Arc<LabClient>>, PoolError> {
        match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.active_requests >= self.settings.max_per_server => {
                metrics::record_pool_rejection("max_per_server");
                return Err(PoolError::TooManyConcurrentRequests {
                    url: key.url.clone(),
                    max: self.settings.max_per_server,
                });
            }
            Some(_) => {}
        }

        let tick = inner.next_tick();
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(None);
        };
        entry.client.set_credentials(credentials.clone());
        entry.active_requests += 1;
        entry.last_used = Instant::now();
        entry.recency = tick;
        let client = Arc::clone(&entry.client);
        self.update_gauges(inner);
        Ok(Some(client))
    }

    /// Track a freshly built client, making room for it first.
    fn admit(
        &self,
        key: &PoolKey,
        credentials: Credentials,
        client: Arc<LabClient>,
    ) -> Result<Arc<LabClient>, PoolError> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.evict_expired(now, self.settings.ttl);

        // Another request may have created the same entry in the meantime.
        if let Some(existing) = self.claim(&mut inner, key, &credentials)? {
            client.close();
            return Ok(existing);
        }

        if inner.entries.len() >= self.settings.max_size {
            inner.evict_one();
        }

        let tick = inner.next_tick();
        debug!(
            "Created client for {} (verify_tls: {})",
            key.url, key.verify_tls
        );
        inner.entries.insert(
            key.clone(),
            PooledClient {
                client: Arc::clone(&client),
                last_used: now,
                active_requests: 1,
                recency: tick,
            },
        );
        self.update_gauges(&inner);
        Ok(client)
    }

    /// Give back one active request slot for `(url, verify_tls)`.
    ///
    /// Unknown keys and malformed URLs are ignored.
    pub fn release(&self, url: &str, verify_tls: bool) {
        let Ok(url) = normalize_url(url) else {
            return;
        };
        let key = PoolKey { url, verify_tls };

        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.active_requests = entry.active_requests.saturating_sub(1);
        }
        self.update_gauges(&inner);
    }

    /// Release only if the tracked entry still holds `client`; a lease on a
    /// force-evicted client must not touch its replacement.
    fn release_client(&self, key: &PoolKey, client: &Arc<LabClient>) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            if Arc::ptr_eq(&entry.client, client) {
                entry.active_requests = entry.active_requests.saturating_sub(1);
            }
        }
        self.update_gauges(&inner);
    }

    /// Drop idle clients that have not been used within the TTL.
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.lock();
        let evicted = inner.evict_expired(Instant::now(), self.settings.ttl);
        self.update_gauges(&inner);
        evicted
    }

    /// Close every client and empty the pool.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        for (_, entry) in inner.entries.drain() {
            entry.client.close();
        }
        self.update_gauges(&inner);
        info!("Closed all pooled clients");
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        let now = Instant::now();

        let mut entries: Vec<(&PoolKey, &PooledClient)> = inner.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.recency);

        PoolStats {
            total_clients: inner.entries.len(),
            max_size: self.settings.max_size,
            max_per_server: self.settings.max_per_server,
            active_requests: inner.active_requests(),
            clients: entries
                .into_iter()
                .map(|(key, entry)| PooledClientStats {
                    url: key.url.clone(),
                    verify_tls: key.verify_tls,
                    active_requests: entry.active_requests,
                    idle_secs: now.duration_since(entry.last_used).as_secs_f64(),
                })
                .collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_gauges(&self, inner: &PoolInner) {
        metrics::set_pool_clients(inner.entries.len(), inner.active_requests());
    }
}

/// Snapshot of the pool, least recently used client first.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_clients: usize,
    pub max_size: usize,
    pub max_per_server: usize,
    pub active_requests: usize,
    pub clients: Vec<PooledClientStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PooledClientStats {
    pub url: String,
    pub verify_tls: bool,
    pub active_requests: usize,
    pub idle_secs: f64,
}

impl PooledClientStats {
    pub fn idle(&self) -> Duration {
        Duration::from_secs_f64(self.idle_secs)
    }
}

/// An acquired client that returns its request slot to the pool on drop.
///
/// Dropping happens on every exit path of the owning future, including
/// errors, panics and cancellation.
pub struct PoolLease {
    pool: Arc<ClientPool>,
    key: PoolKey,
    client: Arc<LabClient>,
}

impl PoolLease {
    pub fn client(&self) -> &Arc<LabClient> {
        &self.client
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.release_client(&self.key, &self.client);
    }
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease").field("key", &self.key).finish()
    }
}
