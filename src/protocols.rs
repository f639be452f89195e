//! External dependency protocols (§6.1) and in-memory fakes for testing.
//!
//! Every trait here is the seam between the decision core and the outside
//! world (messaging platform, KV store, spam database, LLM, audit store,
//! metrics). Production adapters for these traits live outside this crate;
//! the fakes below exist so the pipeline and its integration tests can run
//! without any live dependency, following the fake-over-mock style used
//! throughout the example pack (e.g. `wg-ragsmith`'s in-memory `VectorStore`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{Decision, GroupType, OverrideReason, Verdict};

/// Permission bitset applied by `restrict_member` (telegram_restrictions.py
/// `SANDBOX_PERMISSIONS` / `FULL_PERMISSIONS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_send_links: bool,
    pub can_invite_users: bool,
}

impl ChatPermissions {
    pub const fn sandboxed() -> Self {
        Self {
            can_send_messages: true,
            can_send_media: false,
            can_send_links: false,
            can_invite_users: false,
        }
    }

    pub const fn text_only() -> Self {
        Self {
            can_send_messages: true,
            can_send_media: false,
            can_send_links: true,
            can_invite_users: false,
        }
    }

    pub const fn full() -> Self {
        Self {
            can_send_messages: true,
            can_send_media: true,
            can_send_links: true,
            can_invite_users: true,
        }
    }
}

/// Administrator record returned by `get_chat_administrators`.
#[derive(Debug, Clone)]
pub struct ChatAdmin {
    pub user_id: i64,
    pub is_owner: bool,
}

/// Outbound calls to the messaging platform (§6.1 MessagingClient).
///
/// Every method returns `Result<_>` with `SaqshyError` variants the action
/// engine already knows how to classify (`Forbidden`, `RateLimited`,
/// `BadRequest`, `Network`), mirroring `telegram_restrictions.py`'s
/// aiogram-exception translation.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: i64,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn remove_restrictions(&self, chat_id: i64, user_id: i64) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&str>,
    ) -> Result<i64>;

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatAdmin>>;

    async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatAdmin>>;
}

/// Sliding-window message history (§6.1 MessageHistoryProvider, §4.6 key schema).
#[async_trait]
pub trait MessageHistoryProvider: Send + Sync {
    async fn record_message(&self, chat_id: i64, user_id: i64, timestamp_ms: i64) -> Result<()>;

    async fn count_in_window(
        &self,
        chat_id: i64,
        user_id: i64,
        window_seconds: i64,
    ) -> Result<u32>;

    async fn get_first_message_time(&self, chat_id: i64, user_id: i64) -> Result<Option<i64>>;

    async fn get_join_time(&self, chat_id: i64, user_id: i64) -> Result<Option<i64>>;

    async fn increment_stat(&self, chat_id: i64, user_id: i64, stat_name: &str) -> Result<u64>;

    async fn get_stat(&self, chat_id: i64, user_id: i64, stat_name: &str) -> Result<u64>;
}

/// Linked-channel subscription lookup (§6.1 ChannelSubscriptionChecker).
#[async_trait]
pub trait ChannelSubscriptionChecker: Send + Sync {
    async fn is_subscribed(
        &self,
        channel_id: i64,
        user_id: i64,
    ) -> Result<(bool, Option<DateTime<Utc>>)>;
}

/// Fuzzy-match spam corpus (§6.1 SpamDatabase).
#[async_trait]
pub trait SpamDatabase: Send + Sync {
    async fn check(&self, text: &str) -> Result<(f64, Option<String>)>;
}

/// Gray-zone adjudicator (§6.1 LLMAdjudicator, invoked only when
/// `RiskResult::needs_llm` is set).
#[async_trait]
pub trait LLMAdjudicator: Send + Sync {
    async fn adjudicate(
        &self,
        context_summary: &str,
        signals_summary: &str,
        risk_score: u8,
    ) -> Result<LLMVerdict>;
}

#[derive(Debug, Clone)]
pub struct LLMVerdict {
    pub verdict: Verdict,
    pub explanation: String,
    pub confidence: f64,
    pub latency_ms: u64,
}

/// Append-only decision persistence (§6.1 DecisionStore, §4.7).
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn save(&self, decision: Decision) -> Result<()>;

    async fn load(&self, decision_id: uuid::Uuid) -> Result<Option<Decision>>;

    async fn list_by_group(&self, chat_id: i64, limit: usize) -> Result<Vec<Decision>>;

    async fn list_by_user(&self, user_id: i64, limit: usize) -> Result<Vec<Decision>>;

    async fn record_override(
        &self,
        decision_id: uuid::Uuid,
        admin_user_id: i64,
        reason: OverrideReason,
        note: Option<String>,
        new_verdict: Verdict,
    ) -> Result<()>;

    async fn stats(&self, chat_id: i64) -> Result<DecisionStats>;
}

#[derive(Debug, Clone, Default)]
pub struct DecisionStats {
    pub total: u64,
    pub by_verdict: HashMap<Verdict, u64>,
    pub average_processing_time_ms: f64,
    pub llm_usage_fraction: f64,
}

/// Metrics seam (§6.1 MetricsSink), grounded on the teacher's
/// `MetricsCollector` (`monitoring.rs`): counters, gauges, and latency
/// observations keyed by name with a small label map.
pub trait MetricsSink: Send + Sync {
    fn observe_latency(&self, name: &str, value_ms: f64, labels: &HashMap<String, String>);
    fn increment(&self, name: &str, labels: &HashMap<String, String>);
    fn gauge(&self, name: &str, value: f64, labels: &HashMap<String, String>);
}

// ═══════════════════════════════════════════════════════════════════════
// IN-MEMORY FAKES — deterministic, used by unit/integration tests and the
// demo binary. None of these talk to a network.
// ═══════════════════════════════════════════════════════════════════════

/// Records every call it receives instead of talking to a real platform.
#[derive(Default)]
pub struct FakeMessagingClient {
    pub restricted: Mutex<Vec<(i64, i64)>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub sent: Mutex<Vec<(i64, String)>>,
    pub admins: Mutex<HashMap<i64, Vec<ChatAdmin>>>,
    pub fail_restrict: Mutex<bool>,
    pub fail_restrict_network: Mutex<bool>,
}

#[async_trait]
impl MessagingClient for FakeMessagingClient {
    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: i64,
        _permissions: ChatPermissions,
        _until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if *self.fail_restrict.lock() {
            return Err(crate::error::SaqshyError::Forbidden {
                action: "restrict_member".into(),
            });
        }
        if *self.fail_restrict_network.lock() {
            return Err(crate::error::SaqshyError::Network {
                service: "messaging".into(),
                message: "connection reset".into(),
            });
        }
        self.restricted.lock().push((chat_id, user_id));
        Ok(())
    }

    async fn remove_restrictions(&self, chat_id: i64, user_id: i64) -> Result<()> {
        self.restricted.lock().retain(|(c, u)| !(*c == chat_id && *u == user_id));
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.deleted.lock().push((chat_id, message_id));
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _reply_markup: Option<&str>,
    ) -> Result<i64> {
        self.sent.lock().push((chat_id, text.to_string()));
        Ok(self.sent.lock().len() as i64)
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatAdmin>> {
        Ok(self.admins.lock().get(&chat_id).cloned().unwrap_or_default())
    }

    async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatAdmin>> {
        Ok(self
            .admins
            .lock()
            .get(&chat_id)
            .and_then(|admins| admins.iter().find(|a| a.user_id == user_id).cloned()))
    }
}

/// In-process history provider backed by `HashMap`s; good enough for tests
/// but not for cross-instance deployments (see `cache.rs` for the real KV
/// facade this stands in for).
#[derive(Default)]
pub struct InMemoryHistoryProvider {
    timestamps: Mutex<HashMap<(i64, i64), Vec<i64>>>,
    first_message: Mutex<HashMap<(i64, i64), i64>>,
    join_time: Mutex<HashMap<(i64, i64), i64>>,
    stats: Mutex<HashMap<(i64, i64, String), u64>>,
}

#[async_trait]
impl MessageHistoryProvider for InMemoryHistoryProvider {
    async fn record_message(&self, chat_id: i64, user_id: i64, timestamp_ms: i64) -> Result<()> {
        self.timestamps
            .lock()
            .entry((chat_id, user_id))
            .or_default()
            .push(timestamp_ms);
        self.first_message
            .lock()
            .entry((chat_id, user_id))
            .or_insert(timestamp_ms);
        Ok(())
    }

    async fn count_in_window(
        &self,
        chat_id: i64,
        user_id: i64,
        window_seconds: i64,
    ) -> Result<u32> {
        let guard = self.timestamps.lock();
        let Some(entries) = guard.get(&(chat_id, user_id)) else {
            return Ok(0);
        };
        let now_ms = entries.iter().copied().max().unwrap_or(0);
        let cutoff = now_ms - window_seconds * 1000;
        Ok(entries.iter().filter(|&&ts| ts >= cutoff).count() as u32)
    }

    async fn get_first_message_time(&self, chat_id: i64, user_id: i64) -> Result<Option<i64>> {
        Ok(self.first_message.lock().get(&(chat_id, user_id)).copied())
    }

    async fn get_join_time(&self, chat_id: i64, user_id: i64) -> Result<Option<i64>> {
        Ok(self.join_time.lock().get(&(chat_id, user_id)).copied())
    }

    async fn increment_stat(&self, chat_id: i64, user_id: i64, stat_name: &str) -> Result<u64> {
        let mut guard = self.stats.lock();
        let entry = guard
            .entry((chat_id, user_id, stat_name.to_string()))
            .or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn get_stat(&self, chat_id: i64, user_id: i64, stat_name: &str) -> Result<u64> {
        Ok(self
            .stats
            .lock()
            .get(&(chat_id, user_id, stat_name.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

impl InMemoryHistoryProvider {
    pub fn set_join_time(&self, chat_id: i64, user_id: i64, timestamp_ms: i64) {
        self.join_time.lock().insert((chat_id, user_id), timestamp_ms);
    }
}

/// Static subscription table for tests; no real channel to query.
#[derive(Default)]
pub struct FakeSubscriptionChecker {
    pub subscribed: Mutex<HashMap<(i64, i64), DateTime<Utc>>>,
}

#[async_trait]
impl ChannelSubscriptionChecker for FakeSubscriptionChecker {
    async fn is_subscribed(
        &self,
        channel_id: i64,
        user_id: i64,
    ) -> Result<(bool, Option<DateTime<Utc>>)> {
        let guard = self.subscribed.lock();
        match guard.get(&(channel_id, user_id)) {
            Some(since) => Ok((true, Some(*since))),
            None => Ok((false, None)),
        }
    }
}

/// Substring-based stand-in for a real fuzzy spam corpus.
#[derive(Default)]
pub struct FakeSpamDatabase {
    pub known_phrases: Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl SpamDatabase for FakeSpamDatabase {
    async fn check(&self, text: &str) -> Result<(f64, Option<String>)> {
        if text.trim().is_empty() {
            return Ok((0.0, None));
        }
        let lowered = text.to_lowercase();
        let guard = self.known_phrases.lock();
        let best = guard
            .iter()
            .filter(|(phrase, _)| lowered.contains(phrase.as_str()))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(match best {
            Some((phrase, similarity)) => (*similarity, Some(phrase.clone())),
            None => (0.0, None),
        })
    }
}

/// Deterministic adjudicator for tests: always agrees with the rule-based
/// verdict it's given, at fixed confidence and latency.
pub struct FakeLLMAdjudicator {
    pub forced_verdict: Option<Verdict>,
}

#[async_trait]
impl LLMAdjudicator for FakeLLMAdjudicator {
    async fn adjudicate(
        &self,
        _context_summary: &str,
        _signals_summary: &str,
        risk_score: u8,
    ) -> Result<LLMVerdict> {
        let verdict = self.forced_verdict.unwrap_or(if risk_score >= 70 {
            Verdict::Review
        } else {
            Verdict::Watch
        });
        Ok(LLMVerdict {
            verdict,
            explanation: "fake adjudication".to_string(),
            confidence: 0.8,
            latency_ms: 5,
        })
    }
}

/// In-memory append-only store; clones kept behind an `Arc<Mutex<_>>` so
/// tests can inspect what was persisted after the pipeline returns.
#[derive(Default, Clone)]
pub struct InMemoryDecisionStore {
    decisions: Arc<Mutex<Vec<Decision>>>,
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn save(&self, decision: Decision) -> Result<()> {
        self.decisions.lock().push(decision);
        Ok(())
    }

    async fn load(&self, decision_id: uuid::Uuid) -> Result<Option<Decision>> {
        Ok(self
            .decisions
            .lock()
            .iter()
            .find(|d| d.id == decision_id)
            .cloned())
    }

    async fn list_by_group(&self, chat_id: i64, limit: usize) -> Result<Vec<Decision>> {
        Ok(self
            .decisions
            .lock()
            .iter()
            .filter(|d| d.chat_id == chat_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: i64, limit: usize) -> Result<Vec<Decision>> {
        Ok(self
            .decisions
            .lock()
            .iter()
            .filter(|d| d.user_id == user_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_override(
        &self,
        decision_id: uuid::Uuid,
        admin_user_id: i64,
        reason: OverrideReason,
        note: Option<String>,
        new_verdict: Verdict,
    ) -> Result<()> {
        let mut guard = self.decisions.lock();
        let Some(decision) = guard.iter_mut().find(|d| d.id == decision_id) else {
            return Err(crate::error::SaqshyError::internal_error(
                "override on unknown decision id",
            ));
        };
        decision.override_ = Some(crate::types::AdminOverride {
            admin_user_id,
            reason,
            note,
            overridden_at: Utc::now(),
            new_verdict,
        });
        Ok(())
    }

    async fn stats(&self, chat_id: i64) -> Result<DecisionStats> {
        let guard = self.decisions.lock();
        let matching: Vec<&Decision> = guard.iter().filter(|d| d.chat_id == chat_id).collect();
        let total = matching.len() as u64;
        if total == 0 {
            return Ok(DecisionStats::default());
        }
        let mut by_verdict = HashMap::new();
        let mut time_sum = 0u64;
        let mut llm_used = 0u64;
        for d in &matching {
            *by_verdict.entry(d.verdict).or_insert(0u64) += 1;
            time_sum += d.processing_time_ms;
            if d.needs_llm {
                llm_used += 1;
            }
        }
        Ok(DecisionStats {
            total,
            by_verdict,
            average_processing_time_ms: time_sum as f64 / total as f64,
            llm_usage_fraction: llm_used as f64 / total as f64,
        })
    }
}

/// Collects observations in memory; inspected directly by tests instead of
/// scraping a real metrics backend.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    pub counters: Mutex<HashMap<String, u64>>,
    pub gauges: Mutex<HashMap<String, f64>>,
    pub latencies: Mutex<HashMap<String, Vec<f64>>>,
}

impl MetricsSink for InMemoryMetricsSink {
    fn observe_latency(&self, name: &str, value_ms: f64, _labels: &HashMap<String, String>) {
        self.latencies
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value_ms);
    }

    fn increment(&self, name: &str, _labels: &HashMap<String, String>) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    fn gauge(&self, name: &str, value: f64, _labels: &HashMap<String, String>) {
        self.gauges.lock().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_spam_database_returns_zero_on_empty_input() {
        let db = FakeSpamDatabase::default();
        let (similarity, matched) = db.check("").await.unwrap();
        assert_eq!(similarity, 0.0);
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn fake_history_provider_counts_window() {
        let provider = InMemoryHistoryProvider::default();
        for ts in [1_000, 2_000, 3_000] {
            provider.record_message(1, 42, ts).await.unwrap();
        }
        let count = provider.count_in_window(1, 42, 1).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn decision_store_stats_empty_when_no_decisions() {
        let store = InMemoryDecisionStore::default();
        let stats = store.stats(1).await.unwrap();
        assert_eq!(stats.total, 0);
    }
}
