//! Caller-supplied configuration for a [`crate::client::LitNodeClient`].
//!
//! Out of scope per spec.md §1: file-based config loading. Callers build
//! this struct directly, the way the teacher crate's `FileStorage::new`
//! takes an explicit base directory rather than reading one from disk.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LitNodeClientConfig {
    /// Bootstrap node URLs the dispatcher fans requests out to.
    pub bootstrap_urls: Vec<String>,
    /// Quorum threshold `k` — minimum agreeing node responses required to
    /// consider a request or a share-combine successful.
    pub min_node_count: usize,
    /// Per-node request timeout.
    pub request_timeout: Duration,
    /// Non-negative cap on whole-batch retries (spec.md §4.D, §5).
    pub retry_tolerance: u32,
    /// Default per-session-sig expiration when the caller does not override
    /// it (spec.md §4.F step 8): `now + 5 min`.
    pub default_session_sig_expiration: Duration,
    /// Default wallet AuthSig expiration when the caller does not override
    /// it (spec.md §4.C): `now + 24h`.
    pub default_wallet_sig_expiration: Duration,
}

impl LitNodeClientConfig {
    pub fn new(bootstrap_urls: Vec<String>, min_node_count: usize) -> Self {
        Self {
            bootstrap_urls,
            min_node_count,
            request_timeout: Duration::from_secs(30),
            retry_tolerance: 2,
            default_session_sig_expiration: Duration::from_secs(5 * 60),
            default_wallet_sig_expiration: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn node_count(&self) -> usize {
        self.bootstrap_urls.len()
    }
}
