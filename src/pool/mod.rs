//! Multi-tenant pool of lab controller clients.

mod client_pool;
mod eviction;
pub mod url_policy;

pub use client_pool::{
    ClientPool, PoolError, PoolKey, PoolLease, PoolSettings, PoolStats, PooledClientStats,
    DEFAULT_MAX_PER_SERVER, DEFAULT_MAX_SIZE, DEFAULT_TTL,
};
pub use eviction::{run_eviction_loop, DEFAULT_EVICTION_INTERVAL};
pub use url_policy::{normalize_url, redact_url, UrlPolicy, UrlRejection};
