//! Key-value facade (§4.6) and sliding-window rate limiter (§4.5
//! middlewares/rate_limit.py).
//!
//! Grounded on the teacher's `SmartCache`/`CacheManager` (`cache.rs`) for the
//! expiring-entry shape, and `rate_limiter.rs`'s `UserBucket` for the
//! sliding-window technique, both generalized here to the namespaced
//! `saqshy:` key schema spec.md §4.6 defines. Every failure mode is fail-open
//! (§7, §9): a KV outage must never block a message, only degrade the signal
//! that depended on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::Result;

/// §4.6 namespace prefix for every key this crate writes.
pub const KEY_PREFIX: &str = "saqshy";

pub fn key_message_timestamps(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:msg_ts:{chat_id}:{user_id}")
}
pub fn key_user_stats(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:user_stats:{chat_id}:{user_id}")
}
pub fn key_first_message(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:first_msg:{chat_id}:{user_id}")
}
pub fn key_join_time(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:join_time:{chat_id}:{user_id}")
}
pub fn key_rate_limit(scope: &str, id: i64) -> String {
    format!("{KEY_PREFIX}:rate:{scope}:{id}")
}
pub fn key_decision_cache(content_hash: &str) -> String {
    format!("{KEY_PREFIX}:decision_cache:{content_hash}")
}
pub fn key_subscription(channel_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:sub:{channel_id}:{user_id}")
}
pub fn key_admin_list(chat_id: i64) -> String {
    format!("{KEY_PREFIX}:admin:{chat_id}")
}
pub fn key_idempotency(action_key: &str) -> String {
    format!("{KEY_PREFIX}:idempotency:{action_key}")
}
pub fn key_sandbox(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:sandbox:{chat_id}:{user_id}")
}
pub fn key_trust(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:trust:{chat_id}:{user_id}")
}
pub fn key_softwatch(chat_id: i64, user_id: i64) -> String {
    format!("{KEY_PREFIX}:softwatch:{chat_id}:{user_id}")
}

// Cross-group network tracking (§4.2 NetworkAnalyzer), grounded in
// `services/network.py`'s documented Redis key schema: a message hash maps
// to the set of groups it was seen in, and each user has per-purpose sets
// plus a global blocklist/whitelist.
pub fn key_net_message_sighting(content_hash: &str) -> String {
    format!("{KEY_PREFIX}:net:msg:{content_hash}")
}
pub fn key_net_user_groups(user_id: i64) -> String {
    format!("{KEY_PREFIX}:net:user:{user_id}:groups")
}
pub fn key_net_user_bans(user_id: i64) -> String {
    format!("{KEY_PREFIX}:net:user:{user_id}:bans")
}
pub fn key_net_user_flags(user_id: i64) -> String {
    format!("{KEY_PREFIX}:net:user:{user_id}:flags")
}
pub fn key_net_user_reputation(user_id: i64) -> String {
    format!("{KEY_PREFIX}:net:user:{user_id}:reputation")
}
pub fn key_net_blocklist() -> String {
    format!("{KEY_PREFIX}:net:blocklist")
}
pub fn key_net_whitelist() -> String {
    format!("{KEY_PREFIX}:net:whitelist")
}

/// TTLs per §4.6 key table. Callers pass one of these to `set_json`/`incr`.
pub mod ttl {
    use std::time::Duration;

    pub const MESSAGE_TIMESTAMPS: Duration = Duration::from_secs(24 * 3600);
    pub const USER_STATS: Duration = Duration::from_secs(90 * 24 * 3600);
    pub const FIRST_MESSAGE: Duration = Duration::from_secs(90 * 24 * 3600);
    pub const JOIN_TIME: Duration = Duration::from_secs(90 * 24 * 3600);
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
    pub const DECISION_CACHE: Duration = Duration::from_secs(3600);
    pub const SUBSCRIPTION: Duration = Duration::from_secs(3600);
    pub const ADMIN_LIST: Duration = Duration::from_secs(600);
    pub const IDEMPOTENCY: Duration = Duration::from_secs(24 * 3600);
    pub const TRUST: Duration = Duration::from_secs(30 * 24 * 3600);

    // network.py's TTL Strategy table: message hashes 24h, user-group
    // membership 7d, ban history 30d, flag history 14d, reputation 30d.
    // Blocklist/whitelist are documented as "No TTL (persistent)"; the
    // `KeyValueStore` API has no persistent-write variant, so `NET_PERSISTENT`
    // approximates it with a ten-year TTL rather than a magic "no expiry" value.
    pub const NET_MESSAGE_SIGHTING: Duration = Duration::from_secs(24 * 3600);
    pub const NET_USER_GROUPS: Duration = Duration::from_secs(7 * 24 * 3600);
    pub const NET_BAN_HISTORY: Duration = Duration::from_secs(30 * 24 * 3600);
    pub const NET_FLAG_HISTORY: Duration = Duration::from_secs(14 * 24 * 3600);
    pub const NET_REPUTATION: Duration = Duration::from_secs(30 * 24 * 3600);
    pub const NET_PERSISTENT: Duration = Duration::from_secs(10 * 365 * 24 * 3600);
}

/// The external key-value store (§6.1, §4.6). Values are opaque bytes; JSON
/// helpers are provided as default methods so callers don't repeat
/// serialize/deserialize boilerplate at every call site.
///
/// `compare_and_swap` backs the optimistic-concurrency writes `trust_manager.rs`
/// and `sandbox.rs` need for per-(chat_id, user_id) linearizability (§5, §9):
/// callers read a value with its version, then write conditioned on that
/// version still being current, retrying once on conflict.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Increments an integer counter, creating it at 1 with the given TTL if
    /// absent, and returns the post-increment value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Returns the current value and an opaque version token.
    async fn get_versioned(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>>;

    /// Writes only if the stored version still matches `expected_version`
    /// (or the key is absent and `expected_version` is `None`). Returns
    /// `true` on success, `false` on conflict.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool>;

    async fn list_push(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    async fn list_values(&self, key: &str) -> Result<Vec<i64>>;
}

/// Convenience JSON helpers layered over the raw byte API. Fail-open: a
/// deserialize error is treated the same as a miss, never propagated, since a
/// corrupt cache entry should degrade a signal rather than fail the pipeline.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, key, "kv get failed, treating as miss");
                None
            }
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl).await
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

/// In-memory `KeyValueStore` for tests and the demo binary. Expiration is
/// checked lazily on read, matching the teacher's `CacheEntry::is_expired`.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    version: u64,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.get(key) {
            if entry.is_expired() {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.lock();
        let version = guard.get(key).map(|e| e.version + 1).unwrap_or(1);
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                version,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut guard = self.entries.lock();
        let current = guard
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| std::str::from_utf8(&e.value).ok()?.parse::<u64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        let version = guard.get(key).map(|e| e.version + 1).unwrap_or(1);
        guard.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: Instant::now() + ttl,
                version,
            },
        );
        Ok(next)
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.get(key) {
            if entry.is_expired() {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some((entry.value.clone(), entry.version)));
        }
        Ok(None)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut guard = self.entries.lock();
        let current_version = guard.get(key).filter(|e| !e.is_expired()).map(|e| e.version);
        if current_version != expected_version {
            return Ok(false);
        }
        let next_version = current_version.map(|v| v + 1).unwrap_or(1);
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                version: next_version,
            },
        );
        Ok(true)
    }

    async fn list_push(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.lock();
        let mut values: Vec<i64> = guard
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| serde_json::from_slice(&e.value).ok())
            .unwrap_or_default();
        values.push(value);
        let version = guard.get(key).map(|e| e.version + 1).unwrap_or(1);
        guard.insert(
            key.to_string(),
            Entry {
                value: serde_json::to_vec(&values).unwrap_or_default(),
                expires_at: Instant::now() + ttl,
                version,
            },
        );
        Ok(())
    }

    async fn list_values(&self, key: &str) -> Result<Vec<i64>> {
        let guard = self.entries.lock();
        Ok(guard
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| serde_json::from_slice(&e.value).ok())
            .unwrap_or_default())
    }
}

/// Sliding-window rate limiting (§4.5 middlewares/rate_limit.py): per-user and
/// per-group caps, admins/whitelisted users exempt. A KV outage fails open —
/// the message is allowed through rather than blocked on a broken limiter.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    per_user_limit: u32,
    per_user_window: Duration,
    per_group_limit: u32,
    per_group_window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Exceeded,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            per_user_limit: 20,
            per_user_window: Duration::from_secs(60),
            per_group_limit: 200,
            per_group_window: Duration::from_secs(60),
        }
    }

    pub fn with_limits(
        store: Arc<dyn KeyValueStore>,
        per_user_limit: u32,
        per_user_window: Duration,
        per_group_limit: u32,
        per_group_window: Duration,
    ) -> Self {
        Self {
            store,
            per_user_limit,
            per_user_window,
            per_group_limit,
            per_group_window,
        }
    }

    pub async fn check_user(&self, chat_id: i64, user_id: i64, exempt: bool) -> RateLimitDecision {
        if exempt {
            return RateLimitDecision::Allowed;
        }
        let key = key_rate_limit("user", chat_id.wrapping_mul(1_000_003).wrapping_add(user_id));
        self.check(&key, self.per_user_limit, self.per_user_window).await
    }

    pub async fn check_group(&self, chat_id: i64) -> RateLimitDecision {
        let key = key_rate_limit("group", chat_id);
        self.check(&key, self.per_group_limit, self.per_group_window).await
    }

    async fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        match self.store.incr(key, window).await {
            Ok(count) if count as u32 > limit => RateLimitDecision::Exceeded,
            Ok(_) => RateLimitDecision::Allowed,
            Err(err) => {
                warn!(error = %err, key, "rate limiter kv unavailable, failing open");
                RateLimitDecision::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", b"v".to_vec(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn incr_starts_at_one_and_accumulates() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.incr("c", Duration::from_secs(5)).await.unwrap(), 1);
        assert_eq!(kv.incr("c", Duration::from_secs(5)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_version() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", b"v1".to_vec(), Duration::from_secs(5)).await.unwrap();
        let (_, version) = kv.get_versioned("k").await.unwrap().unwrap();

        let ok = kv
            .compare_and_swap("k", Some(version), b"v2".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ok);

        let stale = kv
            .compare_and_swap("k", Some(version), b"v3".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!stale);
    }

    #[tokio::test]
    async fn compare_and_swap_on_absent_key_requires_none() {
        let kv = InMemoryKeyValueStore::new();
        let ok = kv
            .compare_and_swap("new", None, b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn rate_limiter_exempts_admins() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let limiter = RateLimiter::with_limits(kv, 1, Duration::from_secs(60), 200, Duration::from_secs(60));
        assert_eq!(
            limiter.check_user(1, 42, true).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_user(1, 42, true).await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let limiter = RateLimiter::with_limits(kv, 2, Duration::from_secs(60), 200, Duration::from_secs(60));
        assert_eq!(
            limiter.check_user(1, 42, false).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_user(1, 42, false).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_user(1, 42, false).await,
            RateLimitDecision::Exceeded
        );
    }
}
