//! Orchestrator (§4.3): fans the four analyzers out, scores the result,
//! adjudicates the gray zone, acts, updates trust state, and audits — one
//! `run()` per inbound message.
//!
//! Grounded on spec.md §4.3/§4.3b/§5 for the fan-out/fan-in/cancellation
//! contract. Dependency-guarding wrappers (`GuardedSpamDatabase`,
//! `GuardedSubscriptionChecker`) reuse `circuit_breaker.rs`'s
//! `CircuitBreaker` directly rather than duplicating its state machine,
//! matching the decorator shape the pack's other repos use to wrap a client
//! trait with cross-cutting resilience.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::action_engine::{plan_for_verdict, ActionEngine};
use crate::analyzers::network::CrossGroupTracker;
use crate::analyzers::{Analyzer, BehaviorAnalyzer, ContentAnalyzer, NetworkAnalyzer, ProfileAnalyzer};
use crate::audit::AuditTrail;
use crate::cache::{KeyValueStore, RateLimitDecision, RateLimiter};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::config::{GroupConfig, GroupConfigRegistry, TimeoutConfig};
use crate::constants::thresholds_for;
use crate::error::{Result, SaqshyError};
use crate::protocols::{
    ChannelSubscriptionChecker, DecisionStore, LLMAdjudicator, LLMVerdict, MessageHistoryProvider,
    MessagingClient, MetricsSink, SpamDatabase,
};
use crate::risk_calculator::RiskCalculator;
use crate::signals::{BehaviorSignals, ContentSignals, NetworkSignals, ProfileSignals, Signals};
use crate::trust_manager::{TrustContext, TrustManager, TrustManagerConfig};
use crate::types::{Decision, GroupType, MessageContext, Verdict};

const SPAM_DB_DEPENDENCY: &str = "spam_db";
const SUBSCRIPTION_DEPENDENCY: &str = "subscription_checker";
const LLM_DEPENDENCY: &str = "llm";

/// Summary of one pipeline run (§4.3 "Return").
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub decision_id: Uuid,
    pub verdict: Verdict,
    pub score: u8,
    /// `(action, outcome)` debug-formatted pairs; empty when the run was
    /// short-circuited (rate-limited or cancelled) and never reached the
    /// action engine.
    pub action_outcomes: Vec<(String, String)>,
    pub processing_time_ms: u64,
    pub degraded: bool,
    pub cancelled_stage: Option<String>,
}

/// Everything the pipeline needs injected to talk to the outside world
/// (§6.1). Bundled so `Pipeline::new` doesn't take a dozen parameters.
pub struct PipelineDependencies {
    pub messaging: Arc<dyn MessagingClient>,
    pub history: Arc<dyn MessageHistoryProvider>,
    pub subscriptions: Arc<dyn ChannelSubscriptionChecker>,
    pub spam_db: Arc<dyn SpamDatabase>,
    pub cross_group: Arc<dyn CrossGroupTracker>,
    pub llm: Arc<dyn LLMAdjudicator>,
    pub decision_store: Arc<dyn DecisionStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub kv: Arc<dyn KeyValueStore>,
}

/// Wraps `SpamDatabase` with the `spam_db` circuit breaker (§4.3b); the
/// `NetworkAnalyzer` it's handed to already treats any `Err` as a safe
/// default, so the breaker only needs to gate and record outcomes.
struct GuardedSpamDatabase {
    inner: Arc<dyn SpamDatabase>,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl SpamDatabase for GuardedSpamDatabase {
    async fn check(&self, text: &str) -> Result<(f64, Option<String>)> {
        if !self.breaker.allow_request() {
            return Err(SaqshyError::CircuitOpen {
                dependency: SPAM_DB_DEPENDENCY.to_string(),
            });
        }
        match self.inner.check(text).await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

/// Wraps `ChannelSubscriptionChecker` with the `subscription_checker` breaker.
struct GuardedSubscriptionChecker {
    inner: Arc<dyn ChannelSubscriptionChecker>,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl ChannelSubscriptionChecker for GuardedSubscriptionChecker {
    async fn is_subscribed(&self, channel_id: i64, user_id: i64) -> Result<(bool, Option<DateTime<Utc>>)> {
        if !self.breaker.allow_request() {
            return Err(SaqshyError::CircuitOpen {
                dependency: SUBSCRIPTION_DEPENDENCY.to_string(),
            });
        }
        match self.inner.is_subscribed(channel_id, user_id).await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

pub struct Pipeline {
    history: Arc<dyn MessageHistoryProvider>,
    guarded_spam_db: Arc<dyn SpamDatabase>,
    guarded_subscriptions: Arc<dyn ChannelSubscriptionChecker>,
    cross_group: Arc<dyn CrossGroupTracker>,
    llm: Arc<dyn LLMAdjudicator>,
    risk_calculators: DashMap<(GroupType, u8), Arc<RiskCalculator>>,
    trust_manager: TrustManager,
    action_engine: ActionEngine,
    audit: AuditTrail,
    rate_limiter: RateLimiter,
    breakers: Arc<CircuitBreakerRegistry>,
    timeouts: TimeoutConfig,
    group_configs: parking_lot::RwLock<GroupConfigRegistry>,
}

impl Pipeline {
    pub fn new(
        deps: PipelineDependencies,
        timeouts: TimeoutConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        trust_config: TrustManagerConfig,
        group_configs: GroupConfigRegistry,
    ) -> Self {
        let guarded_spam_db: Arc<dyn SpamDatabase> = Arc::new(GuardedSpamDatabase {
            inner: deps.spam_db,
            breaker: breakers.get(SPAM_DB_DEPENDENCY),
        });
        let guarded_subscriptions: Arc<dyn ChannelSubscriptionChecker> = Arc::new(GuardedSubscriptionChecker {
            inner: deps.subscriptions,
            breaker: breakers.get(SUBSCRIPTION_DEPENDENCY),
        });
        let action_engine = ActionEngine::new(deps.messaging, deps.kv.clone(), breakers.clone());
        let trust_manager = TrustManager::new(deps.kv.clone(), trust_config);
        let audit = AuditTrail::new(deps.decision_store, deps.metrics);
        let rate_limiter = RateLimiter::new(deps.kv);

        Self {
            history: deps.history,
            guarded_spam_db,
            guarded_subscriptions,
            cross_group: deps.cross_group,
            llm: deps.llm,
            risk_calculators: DashMap::new(),
            trust_manager,
            action_engine,
            audit,
            rate_limiter,
            breakers,
            timeouts,
            group_configs: parking_lot::RwLock::new(group_configs),
        }
    }

    /// Swaps in a pre-configured rate limiter (e.g. custom limits for a
    /// test), builder-style so call sites that don't need it stay unchanged.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn set_group_config(&self, chat_id: i64, config: GroupConfig) {
        self.group_configs.write().set(chat_id, config);
    }

    fn group_config(&self, context: &MessageContext) -> GroupConfig {
        self.group_configs.read().get(context.chat_id, context.group_type)
    }

    fn risk_calculator_for(&self, group_type: GroupType, sensitivity: u8) -> Arc<RiskCalculator> {
        let key = (group_type, sensitivity);
        if let Some(existing) = self.risk_calculators.get(&key) {
            return existing.clone();
        }
        let calculator = Arc::new(RiskCalculator::new(group_type, sensitivity).unwrap_or_else(|err| {
            warn!(error = %err, sensitivity, "risk calculator construction failed, falling back to neutral sensitivity");
            RiskCalculator::new(group_type, 5).expect("neutral sensitivity always validates")
        }));
        self.risk_calculators.insert(key, calculator.clone());
        calculator
    }

    /// Runs the full decision pipeline for one message (§4.3).
    pub async fn run(&self, context: &MessageContext, cancellation: CancellationToken) -> PipelineResult {
        let started = Instant::now();

        // Admission control (§5 "Backpressure"): rate-limited messages never
        // reach the analyzers or the action engine.
        if self.rate_limiter.check_user(context.chat_id, context.user_id, false).await == RateLimitDecision::Exceeded
            || self.rate_limiter.check_group(context.chat_id).await == RateLimitDecision::Exceeded
        {
            warn!(chat_id = context.chat_id, user_id = context.user_id, "rate limit exceeded, short-circuiting to allow");
            return PipelineResult {
                decision_id: Uuid::new_v4(),
                verdict: Verdict::Allow,
                score: 0,
                action_outcomes: Vec::new(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                degraded: false,
                cancelled_stage: None,
            };
        }

        let group_config = self.group_config(context);

        let profile = ProfileAnalyzer::default();
        let content = ContentAnalyzer::default();
        let behavior = BehaviorAnalyzer::new(
            self.history.clone(),
            self.guarded_subscriptions.clone(),
            group_config.linked_channel_id,
        );
        let network = NetworkAnalyzer::new(self.guarded_spam_db.clone(), self.cross_group.clone());

        let soft = self.timeouts.analyzer_soft_deadline();
        let hard = self.timeouts.pipeline_hard_deadline();

        let fan_out = async {
            tokio::join!(
                run_analyzer(&profile, context, soft, &cancellation),
                run_analyzer(&content, context, soft, &cancellation),
                run_analyzer(&behavior, context, soft, &cancellation),
                run_analyzer(&network, context, soft, &cancellation),
            )
        };

        let (profile_signals, content_signals, behavior_signals, network_signals, mut degraded, cancelled_stage) =
            match tokio::time::timeout(hard, fan_out).await {
                Ok((p, c, b, n)) => {
                    let degraded = p.1 || c.1 || b.1 || n.1;
                    let cancelled_stage = [("profile", p.2), ("content", c.2), ("behavior", b.2), ("network", n.2)]
                        .into_iter()
                        .find(|(_, cancelled)| *cancelled)
                        .map(|(name, _)| name.to_string());
                    (p.0, c.0, b.0, n.0, degraded, cancelled_stage)
                }
                Err(_) => {
                    warn!(chat_id = context.chat_id, "pipeline fan-out exceeded hard deadline");
                    (
                        ProfileSignals::default(),
                        ContentSignals::default(),
                        BehaviorSignals::default(),
                        NetworkSignals::default(),
                        true,
                        Some("fan_out".to_string()),
                    )
                }
            };

        // §5 "A partially-completed pipeline MUST produce an audit record
        // with action_taken=null": skip scoring/acting entirely and persist
        // a best-effort sentinel.
        if let Some(stage) = cancelled_stage {
            let decision = Decision {
                id: Uuid::new_v4(),
                correlation_id: correlation_id(context),
                chat_id: context.chat_id,
                user_id: context.user_id,
                message_id: context.message_id,
                group_type: context.group_type,
                verdict: Verdict::Allow,
                threat_type: crate::types::ThreatType::Unknown,
                score: 0,
                raw_score: 0,
                confidence: 0.0,
                needs_llm: false,
                llm_verdict: None,
                llm_explanation: None,
                contributing_factors: Vec::new(),
                mitigating_factors: Vec::new(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                degraded: true,
                regression_reset: false,
                cancelled_stage: Some(stage.clone()),
                decided_at: Utc::now(),
                override_: None,
            };
            let decision_id = decision.id;
            let processing_time_ms = decision.processing_time_ms;
            self.audit.log_decision(decision).await;
            return PipelineResult {
                decision_id,
                verdict: Verdict::Allow,
                score: 0,
                action_outcomes: Vec::new(),
                processing_time_ms,
                degraded: true,
                cancelled_stage: Some(stage),
            };
        }

        let signals = Signals {
            profile: profile_signals,
            content: content_signals,
            behavior: behavior_signals,
            network: network_signals,
        };

        let trust_level = self.trust_manager.trust_level(context.chat_id, context.user_id).await;
        let risk_calculator = self.risk_calculator_for(group_config.group_type, group_config.sensitivity);
        let risk_result = risk_calculator.calculate(&signals, trust_level);

        let mut final_verdict = risk_result.verdict;
        let mut llm_used = false;
        let mut llm_explanation = None;

        if risk_result.needs_llm {
            match self.adjudicate(context, &signals, risk_result.score).await {
                Some(verdict) => {
                    final_verdict = verdict.verdict;
                    llm_used = true;
                    llm_explanation = Some(verdict.explanation);
                }
                None => {
                    degraded = true;
                    warn!(chat_id = context.chat_id, "llm adjudication unavailable, keeping rule-based verdict");
                }
            }
        }

        let thresholds = thresholds_for(group_config.group_type);
        let plan = plan_for_verdict(final_verdict, risk_result.score, thresholds.block as u8);
        let action_results = self
            .action_engine
            .execute(&plan, final_verdict, context, risk_result.score)
            .await;

        let trust_ctx = TrustContext {
            chat_id: context.chat_id,
            user_id: context.user_id,
            group_type: context.group_type,
            sandbox_enabled: group_config.sandbox_enabled,
            account_age_days: signals.profile.account_age_days,
            is_channel_subscriber: signals.behavior.is_channel_subscriber,
            verdict: final_verdict,
        };
        let regression_reset = match self.trust_manager.notify(&trust_ctx).await {
            Ok(regressed) => regressed,
            Err(err) => {
                warn!(error = %err, "trust manager update failed");
                degraded = true;
                false
            }
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let decision = Decision {
            id: Uuid::new_v4(),
            correlation_id: correlation_id(context),
            chat_id: context.chat_id,
            user_id: context.user_id,
            message_id: context.message_id,
            group_type: context.group_type,
            verdict: final_verdict,
            threat_type: risk_result.threat_type,
            score: risk_result.score,
            raw_score: risk_result.raw_score,
            confidence: risk_result.confidence,
            needs_llm: risk_result.needs_llm,
            llm_verdict: if llm_used { Some(final_verdict) } else { None },
            llm_explanation,
            contributing_factors: risk_result.contributing_factors,
            mitigating_factors: risk_result.mitigating_factors,
            processing_time_ms,
            degraded,
            regression_reset,
            cancelled_stage: None,
            decided_at: Utc::now(),
            override_: None,
        };
        let decision_id = decision.id;
        self.audit.log_decision(decision).await;

        let action_outcomes = action_results
            .iter()
            .map(|r| (format!("{:?}", r.action), format!("{:?}", r.outcome)))
            .collect();

        PipelineResult {
            decision_id,
            verdict: final_verdict,
            score: risk_result.score,
            action_outcomes,
            processing_time_ms,
            degraded,
            cancelled_stage: None,
        }
    }

    /// Gray-zone adjudication (§4.3): one call plus one retry, both bounded
    /// by the LLM deadline and gated by the `llm` breaker. Returns `None` on
    /// any failure so the caller falls back to the rule-based verdict.
    async fn adjudicate(&self, context: &MessageContext, signals: &Signals, score: u8) -> Option<LLMVerdict> {
        let breaker = self.breakers.get(LLM_DEPENDENCY);
        let context_summary = format!(
            "chat={} user={} group={}",
            context.chat_id, context.user_id, context.group_type
        );
        let signals_summary = serde_json::to_string(signals).unwrap_or_default();

        for attempt in 0..2 {
            if !breaker.allow_request() {
                warn!(attempt, "llm circuit open, falling back to rule-based verdict");
                return None;
            }
            let outcome = tokio::time::timeout(
                self.timeouts.llm_deadline(),
                self.llm.adjudicate(&context_summary, &signals_summary, score),
            )
            .await;

            match outcome {
                Ok(Ok(verdict)) => {
                    breaker.record_success();
                    return Some(verdict);
                }
                Ok(Err(err)) => {
                    breaker.record_failure();
                    warn!(error = %err, attempt, "llm adjudication failed");
                }
                Err(_) => {
                    breaker.record_failure();
                    warn!(attempt, "llm adjudication timed out");
                }
            }
        }
        None
    }
}

fn correlation_id(context: &MessageContext) -> String {
    format!("{}-{}-{}", context.chat_id, context.user_id, context.message_id)
}

/// Runs one analyzer under a soft deadline, racing it against cancellation.
/// Returns `(signals, degraded, cancelled)`; `degraded` covers both timeout
/// and an analyzer-level failure, `cancelled` only the cancellation branch.
async fn run_analyzer<A>(
    analyzer: &A,
    context: &MessageContext,
    soft_deadline: std::time::Duration,
    cancellation: &CancellationToken,
) -> (A::Output, bool, bool)
where
    A: Analyzer,
    A::Output: Default,
{
    tokio::select! {
        _ = cancellation.cancelled() => (A::Output::default(), true, true),
        outcome = tokio::time::timeout(soft_deadline, analyzer.analyze(context)) => {
            match outcome {
                Ok(Ok(signals)) => (signals, false, false),
                Ok(Err(err)) => {
                    warn!(error = %err, analyzer = analyzer.name(), "analyzer failed, using defaults");
                    (A::Output::default(), true, false)
                }
                Err(_) => {
                    warn!(analyzer = analyzer.name(), "analyzer timed out, using defaults");
                    (A::Output::default(), true, false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::network::InMemoryCrossGroupTracker;
    use crate::cache::InMemoryKeyValueStore;
    use crate::protocols::{
        FakeLLMAdjudicator, FakeMessagingClient, FakeSpamDatabase, FakeSubscriptionChecker, InMemoryDecisionStore,
        InMemoryHistoryProvider, InMemoryMetricsSink,
    };
    use crate::types::GroupType;
    use std::time::Duration;

    fn test_pipeline() -> (Pipeline, Arc<FakeMessagingClient>, Arc<InMemoryDecisionStore>) {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryDecisionStore::default());
        let deps = PipelineDependencies {
            messaging: messaging.clone(),
            history: Arc::new(InMemoryHistoryProvider::default()),
            subscriptions: Arc::new(FakeSubscriptionChecker::default()),
            spam_db: Arc::new(FakeSpamDatabase::default()),
            cross_group: Arc::new(InMemoryCrossGroupTracker::default()),
            llm: Arc::new(FakeLLMAdjudicator { forced_verdict: None }),
            decision_store: store.clone(),
            metrics: Arc::new(InMemoryMetricsSink::default()),
            kv: Arc::new(InMemoryKeyValueStore::new()),
        };
        let pipeline = Pipeline::new(
            deps,
            TimeoutConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30))),
            TrustManagerConfig::default(),
            GroupConfigRegistry::new(),
        );
        (pipeline, messaging, store)
    }

    #[tokio::test]
    async fn benign_message_persists_exactly_one_decision() {
        let (pipeline, _messaging, store) = test_pipeline();
        let ctx = MessageContext::new(1, 100, 42, Some("hello there".into()), GroupType::General);

        pipeline.run(&ctx, CancellationToken::new()).await;

        assert_eq!(store.stats(100).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn rate_limited_message_short_circuits_without_side_effects() {
        let (mut pipeline_parts, messaging, store) = test_pipeline();
        pipeline_parts = pipeline_parts.with_rate_limiter(RateLimiter::with_limits(
            Arc::new(InMemoryKeyValueStore::new()),
            0,
            Duration::from_secs(60),
            200,
            Duration::from_secs(60),
        ));
        let ctx = MessageContext::new(1, 100, 42, Some("hi".into()), GroupType::General);

        let result = pipeline_parts.run(&ctx, CancellationToken::new()).await;

        assert_eq!(result.verdict, Verdict::Allow);
        assert!(result.action_outcomes.is_empty());
        assert!(messaging.sent.lock().is_empty());
        assert_eq!(store.stats(100).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_partial_audit_record() {
        let (pipeline, _messaging, store) = test_pipeline();
        let ctx = MessageContext::new(1, 100, 42, Some("hello".into()), GroupType::General);

        let token = CancellationToken::new();
        token.cancel();
        let result = pipeline.run(&ctx, token).await;

        assert!(result.cancelled_stage.is_some());
        assert!(result.action_outcomes.is_empty());
        assert_eq!(store.stats(100).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn gray_zone_score_invokes_llm_and_uses_its_verdict() {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryDecisionStore::default());
        let deps = PipelineDependencies {
            messaging: messaging.clone(),
            history: Arc::new(InMemoryHistoryProvider::default()),
            subscriptions: Arc::new(FakeSubscriptionChecker::default()),
            spam_db: Arc::new(FakeSpamDatabase::default()),
            cross_group: Arc::new(InMemoryCrossGroupTracker::default()),
            llm: Arc::new(FakeLLMAdjudicator {
                forced_verdict: Some(Verdict::Review),
            }),
            decision_store: store.clone(),
            metrics: Arc::new(InMemoryMetricsSink::default()),
            kv: Arc::new(InMemoryKeyValueStore::new()),
        };
        let pipeline = Pipeline::new(
            deps,
            TimeoutConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30))),
            TrustManagerConfig::default(),
            GroupConfigRegistry::new(),
        );

        // Hand-derived to land at raw_score=61 for a brand-new, untrusted,
        // first-message account in a GENERAL group (default sensitivity,
        // no linked channel, no prior history): profile +13 (no photo +8,
        // no username +5), content +35 (urgency +10, money +12, phone +8,
        // one non-whitelisted/non-shortened URL +5), behavior +8
        // (first message), network +0, trust(untrusted) +5. None of this
        // crosses into crypto-scam-phrase or wallet-address territory, so
        // it stays in [60,80] rather than jumping straight to `block` the
        // way risk_calculator.rs's own `crypto_scam_phrase_dominates_threat_type`
        // fixture does.
        let ctx = MessageContext::new(
            1,
            100,
            8_000_000_000,
            Some("Act now, get easy money, call 555-123-4567, check mysite.info for details".into()),
            GroupType::General,
        );

        let result = pipeline.run(&ctx, CancellationToken::new()).await;

        assert!(
            (60..=80).contains(&result.score),
            "fixture expected to land in the gray zone, got score={}",
            result.score
        );
        // The LLM is the only thing that returns `Review`: the rule-based
        // fallback for a raw_score of 61 in GENERAL (thresholds 30/50/75/92)
        // would be `Limit`, so seeing `Review` here proves the LLM's forced
        // verdict was actually used, not just that the score landed in range.
        assert_eq!(result.verdict, Verdict::Review);
        assert_eq!(store.stats(100).await.unwrap().total, 1);
    }
}
