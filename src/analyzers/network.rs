//! Cross-group/network signal extraction (§4.2 NetworkAnalyzer). Grounded on
//! `services/network.py`: its docstring documents the Redis key schema
//! (`saqshy:net:msg:{message_hash}`, `saqshy:net:user:{user_id}:groups|bans|
//! flags|reputation`, `saqshy:net:blocklist`/`whitelist`) and TTL strategy
//! (24h/7d/30d/14d/30d, blocklist/whitelist persistent), reproduced as the
//! `key_net_*`/`ttl::NET_*` constants in `cache.rs` and implemented against
//! `KeyValueStore` by `KvCrossGroupTracker` below — the same split
//! `sandbox.rs`/`trust_manager.rs` use between frozen records and their KV-backed
//! driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::{
    key_net_blocklist, key_net_message_sighting, key_net_user_bans, key_net_user_flags,
    key_net_user_groups, key_net_whitelist, ttl, KeyValueStore,
};
use crate::error::Result;
use crate::protocols::SpamDatabase;
use crate::signals::NetworkSignals;
use crate::types::MessageContext;

use super::Analyzer;

/// Tracks whether the same message (by content hash) has already been seen
/// in other groups, and per-user block/flag counters and blocklist
/// membership, all normally backed by the external KV (§4.6). This trait
/// exists so `NetworkAnalyzer` can be tested without a live KV; the
/// production implementation is `KvCrossGroupTracker` below.
#[async_trait]
pub trait CrossGroupTracker: Send + Sync {
    async fn duplicate_count(&self, content_hash: &str, origin_chat_id: i64) -> Result<u32>;
    async fn blocked_elsewhere(&self, user_id: i64) -> Result<u32>;
    async fn flagged_elsewhere(&self, user_id: i64) -> Result<u32>;
    async fn groups_in_common(&self, chat_id: i64, user_id: i64) -> Result<u32>;
    async fn is_globally_blocklisted(&self, user_id: i64) -> Result<bool>;
    async fn is_globally_whitelisted(&self, user_id: i64) -> Result<bool>;
    async fn record_sighting(&self, content_hash: &str, chat_id: i64) -> Result<()>;
}

pub struct NetworkAnalyzer {
    spam_db: Arc<dyn SpamDatabase>,
    tracker: Arc<dyn CrossGroupTracker>,
}

impl NetworkAnalyzer {
    pub fn new(spam_db: Arc<dyn SpamDatabase>, tracker: Arc<dyn CrossGroupTracker>) -> Self {
        Self { spam_db, tracker }
    }
}

#[async_trait]
impl Analyzer for NetworkAnalyzer {
    type Output = NetworkSignals;

    fn name(&self) -> &'static str {
        "network"
    }

    async fn analyze(&self, context: &MessageContext) -> Result<NetworkSignals> {
        let text = context.text.as_deref().unwrap_or("");
        let (spam_db_similarity, spam_db_matched_pattern) =
            self.spam_db.check(text).await.unwrap_or_else(|err| {
                warn!(error = %err, "spam database unavailable, defaulting similarity=0");
                (0.0, None)
            });

        let content_hash = content_hash(text);
        let duplicate_messages_in_other_groups = if text.trim().is_empty() {
            0
        } else {
            self.tracker
                .duplicate_count(&content_hash, context.chat_id)
                .await
                .unwrap_or(0)
        };

        let blocked_in_other_groups = self
            .tracker
            .blocked_elsewhere(context.user_id)
            .await
            .unwrap_or(0);
        let flagged_in_other_groups = self
            .tracker
            .flagged_elsewhere(context.user_id)
            .await
            .unwrap_or(0);
        let groups_in_common = self
            .tracker
            .groups_in_common(context.chat_id, context.user_id)
            .await
            .unwrap_or(0);
        let is_in_global_blocklist = self
            .tracker
            .is_globally_blocklisted(context.user_id)
            .await
            .unwrap_or(false);
        let is_in_global_whitelist = self
            .tracker
            .is_globally_whitelisted(context.user_id)
            .await
            .unwrap_or(false);

        if !text.trim().is_empty() {
            let _ = self.tracker.record_sighting(&content_hash, context.chat_id).await;
        }

        NetworkSignals {
            groups_in_common,
            duplicate_messages_in_other_groups,
            flagged_in_other_groups,
            blocked_in_other_groups,
            spam_db_similarity,
            spam_db_matched_pattern,
            is_in_global_blocklist,
            is_in_global_whitelist,
        }
        .validate()
    }
}

fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory `CrossGroupTracker` for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryCrossGroupTracker {
    sightings: parking_lot::Mutex<std::collections::HashMap<String, Vec<i64>>>,
    blocked: parking_lot::Mutex<std::collections::HashMap<i64, u32>>,
    flagged: parking_lot::Mutex<std::collections::HashMap<i64, u32>>,
    common_groups: parking_lot::Mutex<std::collections::HashMap<(i64, i64), u32>>,
    blocklist: parking_lot::Mutex<std::collections::HashSet<i64>>,
    whitelist: parking_lot::Mutex<std::collections::HashSet<i64>>,
}

#[async_trait]
impl CrossGroupTracker for InMemoryCrossGroupTracker {
    async fn duplicate_count(&self, content_hash: &str, origin_chat_id: i64) -> Result<u32> {
        let guard = self.sightings.lock();
        Ok(guard
            .get(content_hash)
            .map(|chats| chats.iter().filter(|&&c| c != origin_chat_id).count() as u32)
            .unwrap_or(0))
    }

    async fn blocked_elsewhere(&self, user_id: i64) -> Result<u32> {
        Ok(self.blocked.lock().get(&user_id).copied().unwrap_or(0))
    }

    async fn flagged_elsewhere(&self, user_id: i64) -> Result<u32> {
        Ok(self.flagged.lock().get(&user_id).copied().unwrap_or(0))
    }

    async fn groups_in_common(&self, chat_id: i64, user_id: i64) -> Result<u32> {
        Ok(self
            .common_groups
            .lock()
            .get(&(chat_id, user_id))
            .copied()
            .unwrap_or(0))
    }

    async fn is_globally_blocklisted(&self, user_id: i64) -> Result<bool> {
        Ok(self.blocklist.lock().contains(&user_id))
    }

    async fn is_globally_whitelisted(&self, user_id: i64) -> Result<bool> {
        Ok(self.whitelist.lock().contains(&user_id))
    }

    async fn record_sighting(&self, content_hash: &str, chat_id: i64) -> Result<()> {
        self.sightings
            .lock()
            .entry(content_hash.to_string())
            .or_default()
            .push(chat_id);
        Ok(())
    }
}

/// `CrossGroupTracker` backed by the shared `KeyValueStore`, following
/// `services/network.py`'s key schema exactly: sets are approximated with
/// `list_push`/`list_values` since the generic `KeyValueStore` has no
/// native SADD/SCARD, and membership is a linear scan over the returned list.
pub struct KvCrossGroupTracker {
    store: Arc<dyn KeyValueStore>,
}

impl KvCrossGroupTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CrossGroupTracker for KvCrossGroupTracker {
    async fn duplicate_count(&self, content_hash: &str, origin_chat_id: i64) -> Result<u32> {
        let sightings = self
            .store
            .list_values(&key_net_message_sighting(content_hash))
            .await?;
        Ok(sightings.iter().filter(|&&c| c != origin_chat_id).count() as u32)
    }

    async fn blocked_elsewhere(&self, user_id: i64) -> Result<u32> {
        Ok(self.store.list_values(&key_net_user_bans(user_id)).await?.len() as u32)
    }

    async fn flagged_elsewhere(&self, user_id: i64) -> Result<u32> {
        Ok(self.store.list_values(&key_net_user_flags(user_id)).await?.len() as u32)
    }

    async fn groups_in_common(&self, chat_id: i64, user_id: i64) -> Result<u32> {
        let groups = self.store.list_values(&key_net_user_groups(user_id)).await?;
        Ok(groups.iter().filter(|&&g| g != chat_id).count() as u32)
    }

    async fn is_globally_blocklisted(&self, user_id: i64) -> Result<bool> {
        Ok(self.store.list_values(&key_net_blocklist()).await?.contains(&user_id))
    }

    async fn is_globally_whitelisted(&self, user_id: i64) -> Result<bool> {
        Ok(self.store.list_values(&key_net_whitelist()).await?.contains(&user_id))
    }

    async fn record_sighting(&self, content_hash: &str, chat_id: i64) -> Result<()> {
        self.store
            .list_push(&key_net_message_sighting(content_hash), chat_id, ttl::NET_MESSAGE_SIGHTING)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::FakeSpamDatabase;
    use crate::types::GroupType;

    #[tokio::test]
    async fn empty_text_never_hits_spam_db_as_duplicate() {
        let spam_db = Arc::new(FakeSpamDatabase::default());
        let tracker = Arc::new(InMemoryCrossGroupTracker::default());
        let analyzer = NetworkAnalyzer::new(spam_db, tracker);
        let ctx = MessageContext::new(1, 100, 42, None, GroupType::General);
        let signals = analyzer.analyze(&ctx).await.unwrap();
        assert_eq!(signals.duplicate_messages_in_other_groups, 0);
    }

    #[tokio::test]
    async fn repeated_message_in_other_group_counts_as_duplicate() {
        let spam_db = Arc::new(FakeSpamDatabase::default());
        let tracker = Arc::new(InMemoryCrossGroupTracker::default());
        let analyzer = NetworkAnalyzer::new(spam_db, tracker);

        let ctx1 = MessageContext::new(1, 100, 42, Some("join now!!".into()), GroupType::General);
        analyzer.analyze(&ctx1).await.unwrap();

        let ctx2 = MessageContext::new(2, 200, 43, Some("join now!!".into()), GroupType::General);
        let signals = analyzer.analyze(&ctx2).await.unwrap();
        assert_eq!(signals.duplicate_messages_in_other_groups, 1);
    }

    #[tokio::test]
    async fn kv_tracker_counts_sightings_via_net_key_schema() {
        use crate::cache::{key_net_message_sighting, InMemoryKeyValueStore};

        let store = Arc::new(InMemoryKeyValueStore::new());
        let tracker = KvCrossGroupTracker::new(store.clone());

        tracker.record_sighting("hash-a", 1).await.unwrap();
        tracker.record_sighting("hash-a", 2).await.unwrap();

        assert_eq!(tracker.duplicate_count("hash-a", 1).await.unwrap(), 1);
        let sightings = store
            .list_values(&key_net_message_sighting("hash-a"))
            .await
            .unwrap();
        assert_eq!(sightings, vec![1, 2]);
    }
}
