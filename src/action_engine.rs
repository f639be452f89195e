//! Verdict-to-action mapping (§4.5). Translates a `(Verdict, context,
//! risk_result)` tuple into an ordered action plan, executes it against
//! `MessagingClient` with idempotency, error classification, and fallback
//! chains, and rate-limits admin notifications.
//!
//! Grounded on `bot/adapters/telegram_restrictions.py` (only the class
//! skeleton and `SANDBOX_PERMISSIONS`/`FULL_PERMISSIONS` constants survived
//! retrieval, already mirrored in `protocols.rs::ChatPermissions`) for the
//! error-classification shape, and `bot/middlewares/rate_limit.py`'s
//! docstring for the admin-notification throttling policy. Idempotency keys
//! follow spec.md §4.5 exactly: `sha256(verdict|chat_id|user_id|message_id|action_type)`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{key_idempotency, ttl, KeyValueStore};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::{Result as SaqshyResult, SaqshyError};
use crate::protocols::{ChatPermissions, MessagingClient};
use crate::types::{MessageContext, Verdict};

const MESSAGING_DEPENDENCY: &str = "messaging_client";
/// Upper bound on how long a single action will honour a rate-limit
/// `retry_after` before giving up and falling back (§4.5 "respect
/// retry-after"); unbounded waits would stall the whole action plan.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);
const NETWORK_RETRY_BASE: Duration = Duration::from_millis(150);
const NETWORK_RETRY_JITTER_MS: u64 = 150;

/// One step of an action plan (§4.5 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    DeleteMessage,
    RestrictMember,
    RecordDecision,
    NotifyTrustManager,
    EnqueueAdminReview,
    NotifyAdmins,
}

impl ActionType {
    fn as_str(self) -> &'static str {
        match self {
            Self::DeleteMessage => "delete_message",
            Self::RestrictMember => "restrict_member",
            Self::RecordDecision => "record_decision",
            Self::NotifyTrustManager => "notify_trust_manager",
            Self::EnqueueAdminReview => "enqueue_admin_review",
            Self::NotifyAdmins => "notify_admins",
        }
    }
}

/// How one action in the plan resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Performed,
    SkippedIdempotent,
    Fallback(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action: ActionType,
    pub outcome: ActionOutcome,
}

/// Builds the action plan for a verdict (§4.5 table). `score` and
/// `block_escalation_threshold` decide whether a block verdict also
/// restricts the member, not just deletes the message.
pub fn plan_for_verdict(verdict: Verdict, score: u8, block_threshold: u8) -> Vec<ActionType> {
    match verdict {
        Verdict::Allow => vec![],
        Verdict::Watch => vec![ActionType::RecordDecision, ActionType::NotifyTrustManager],
        Verdict::Limit => vec![
            ActionType::RestrictMember,
            ActionType::RecordDecision,
            ActionType::NotifyTrustManager,
        ],
        Verdict::Review => vec![
            ActionType::EnqueueAdminReview,
            ActionType::RecordDecision,
            ActionType::NotifyAdmins,
        ],
        Verdict::Block => {
            let mut plan = vec![ActionType::DeleteMessage];
            if score >= block_threshold.saturating_add(5) {
                plan.push(ActionType::RestrictMember);
            }
            plan.push(ActionType::RecordDecision);
            plan.push(ActionType::NotifyAdmins);
            plan
        }
    }
}

fn idempotency_key(verdict: Verdict, chat_id: i64, user_id: i64, message_id: i64, action: ActionType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{verdict}|{chat_id}|{user_id}|{message_id}|{}",
        action.as_str()
    ));
    hex::encode(hasher.finalize())
}

/// Classifies a `SaqshyError` surfaced by a `MessagingClient` call into the
/// §4.5/§7 error-handling buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    RateLimit,
    Forbidden,
    BadRequest,
    Network,
    Api,
}

fn classify(err: &SaqshyError) -> ErrorClass {
    match err {
        SaqshyError::RateLimited { .. } => ErrorClass::RateLimit,
        SaqshyError::Forbidden { .. } => ErrorClass::Forbidden,
        SaqshyError::BadRequest { .. } => ErrorClass::BadRequest,
        SaqshyError::Network { .. } | SaqshyError::Timeout { .. } | SaqshyError::CircuitOpen { .. } => {
            ErrorClass::Network
        }
        _ => ErrorClass::Api,
    }
}

/// Outcome of one messaging-API attempt, before the caller's fallback runs.
enum MessagingAttempt {
    Performed,
    /// §4.5 "log, do not retry, continue to subsequent actions" — no fallback.
    Skipped(String),
    NeedsFallback(String),
}

fn jittered_backoff() -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=NETWORK_RETRY_JITTER_MS);
    NETWORK_RETRY_BASE + Duration::from_millis(jitter_ms)
}

/// Caps the messaging platform's requested `retry_after` so one rate-limited
/// action can't stall the rest of the plan indefinitely.
fn rate_limit_wait(err: &SaqshyError) -> Duration {
    match err {
        SaqshyError::RateLimited { retry_after_seconds } => {
            Duration::from_secs(*retry_after_seconds).min(MAX_RATE_LIMIT_WAIT)
        }
        _ => MAX_RATE_LIMIT_WAIT,
    }
}

pub struct ActionEngine {
    messaging: Arc<dyn MessagingClient>,
    store: Arc<dyn KeyValueStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    /// Per-group last-notification timestamp (ms since epoch), enforcing
    /// the 1/minute admin-notification cap (§4.5). Coalesced count of
    /// suppressed notifications awaiting the next send.
    notify_throttle: tokio::sync::Mutex<std::collections::HashMap<i64, (i64, u32)>>,
}

impl ActionEngine {
    pub fn new(
        messaging: Arc<dyn MessagingClient>,
        store: Arc<dyn KeyValueStore>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            messaging,
            store,
            breakers,
            notify_throttle: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Executes every action in `plan` against `context`, in order. A
    /// primary failure never aborts the rest of the plan (§4.5 "Fallback
    /// chain" / §7 propagation policy): each action degrades independently.
    pub async fn execute(
        &self,
        plan: &[ActionType],
        verdict: Verdict,
        context: &MessageContext,
        score: u8,
    ) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(plan.len());
        for &action in plan {
            let key = idempotency_key(verdict, context.chat_id, context.user_id, context.message_id, action);
            if self.already_performed(&key).await {
                results.push(ActionResult {
                    action,
                    outcome: ActionOutcome::SkippedIdempotent,
                });
                continue;
            }

            let outcome = self.perform(action, context, score).await;
            self.mark_performed(&key).await;
            results.push(ActionResult { action, outcome });
        }
        results
    }

    async fn already_performed(&self, key: &str) -> bool {
        match self.store.get(&key_idempotency(key)).await {
            Ok(value) => value.is_some(),
            Err(err) => {
                warn!(error = %err, "idempotency store unavailable, proceeding without dedup");
                false
            }
        }
    }

    async fn mark_performed(&self, key: &str) {
        if let Err(err) = self
            .store
            .set(&key_idempotency(key), b"1".to_vec(), ttl::IDEMPOTENCY)
            .await
        {
            warn!(error = %err, "failed to record idempotency marker");
        }
    }

    async fn perform(&self, action: ActionType, context: &MessageContext, score: u8) -> ActionOutcome {
        match action {
            ActionType::DeleteMessage => {
                match self
                    .attempt_messaging_call("delete_message", || {
                        self.messaging.delete_message(context.chat_id, context.message_id)
                    })
                    .await
                {
                    MessagingAttempt::Performed => ActionOutcome::Performed,
                    MessagingAttempt::Skipped(reason) => ActionOutcome::Failed(reason),
                    MessagingAttempt::NeedsFallback(reason) => {
                        let _ = self
                            .messaging
                            .send_message(context.chat_id, "⚠️ message could not be deleted", None)
                            .await;
                        ActionOutcome::Fallback(reason)
                    }
                }
            }
            ActionType::RestrictMember => {
                match self
                    .attempt_messaging_call("restrict_member", || {
                        self.messaging.restrict_member(
                            context.chat_id,
                            context.user_id,
                            ChatPermissions::sandboxed(),
                            None,
                        )
                    })
                    .await
                {
                    MessagingAttempt::Performed => ActionOutcome::Performed,
                    MessagingAttempt::Skipped(reason) => ActionOutcome::Failed(reason),
                    MessagingAttempt::NeedsFallback(reason) => {
                        let _ = self.notify_admins(context, score).await;
                        ActionOutcome::Fallback(reason)
                    }
                }
            }
            ActionType::RecordDecision => ActionOutcome::Performed,
            ActionType::NotifyTrustManager => ActionOutcome::Performed,
            ActionType::EnqueueAdminReview => ActionOutcome::Performed,
            ActionType::NotifyAdmins => self.notify_admins(context, score).await,
        }
    }

    /// Runs one messaging-API call against `classify`'s §4.5/§7 policy: a
    /// `network` failure gets one jittered retry, a `rate_limit` failure
    /// waits out (a bounded) `retry_after` before one retry, `forbidden`/
    /// `bad_request`/`api` are logged and skipped outright (no retry, no
    /// fallback — §4.5's "continue to subsequent actions"). The caller decides
    /// what the fallback action actually is; this only decides whether one
    /// runs.
    async fn attempt_messaging_call<Fut>(
        &self,
        action_name: &'static str,
        mut call: impl FnMut() -> Fut,
    ) -> MessagingAttempt
    where
        Fut: std::future::Future<Output = SaqshyResult<()>>,
    {
        let breaker = self.breakers.get(MESSAGING_DEPENDENCY);
        if !breaker.allow_request() {
            warn!(action = action_name, "circuit open, skipping call");
            return MessagingAttempt::NeedsFallback("circuit open".to_string());
        }

        let err = match call().await {
            Ok(()) => {
                breaker.record_success();
                return MessagingAttempt::Performed;
            }
            Err(err) => err,
        };
        breaker.record_failure();

        match classify(&err) {
            ErrorClass::Network => {
                warn!(error = %err, action = action_name, "network error, retrying once with jitter");
                tokio::time::sleep(jittered_backoff()).await;
                match call().await {
                    Ok(()) => {
                        breaker.record_success();
                        MessagingAttempt::Performed
                    }
                    Err(err2) => {
                        warn!(error = %err2, action = action_name, "retry failed, applying fallback");
                        MessagingAttempt::NeedsFallback(err2.to_string())
                    }
                }
            }
            ErrorClass::RateLimit => {
                let wait = rate_limit_wait(&err);
                warn!(
                    error = %err,
                    action = action_name,
                    retry_after_s = wait.as_secs(),
                    "rate-limited, honouring retry-after before retrying"
                );
                tokio::time::sleep(wait).await;
                match call().await {
                    Ok(()) => {
                        breaker.record_success();
                        MessagingAttempt::Performed
                    }
                    Err(err2) => {
                        warn!(error = %err2, action = action_name, "still rate-limited, applying fallback");
                        MessagingAttempt::NeedsFallback(err2.to_string())
                    }
                }
            }
            ErrorClass::Forbidden => {
                warn!(error = %err, action = action_name, "bot lacks permission, skipping without retry or fallback");
                MessagingAttempt::Skipped(err.to_string())
            }
            ErrorClass::BadRequest | ErrorClass::Api => {
                warn!(error = %err, action = action_name, "non-retriable error, skipping action");
                MessagingAttempt::Skipped(err.to_string())
            }
        }
    }

    /// Sends an admin alert, rate-limited per group to 1/minute; a
    /// suppressed notification increments a coalesced counter sent with the
    /// next allowed message (§4.5).
    async fn notify_admins(&self, context: &MessageContext, score: u8) -> ActionOutcome {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut throttle = self.notify_throttle.lock().await;
        let entry = throttle.entry(context.chat_id).or_insert((0, 0));
        let (last_sent_ms, suppressed) = *entry;

        if now_ms - last_sent_ms < 60_000 && last_sent_ms != 0 {
            entry.1 += 1;
            return ActionOutcome::Fallback("rate-limited, coalesced".to_string());
        }

        let text = if suppressed > 0 {
            format!(
                "Moderation alert (score={score}) — {suppressed} earlier alert(s) suppressed in this window."
            )
        } else {
            format!("Moderation alert: score={score}")
        };

        let breaker = self.breakers.get(MESSAGING_DEPENDENCY);
        if !breaker.allow_request() {
            entry.1 += 1;
            return ActionOutcome::Fallback("circuit open".to_string());
        }

        match self.messaging.send_message(context.chat_id, &text, None).await {
            Ok(_) => {
                breaker.record_success();
                *entry = (now_ms, 0);
                ActionOutcome::Performed
            }
            Err(err) => {
                breaker.record_failure();
                let class = classify(&err);
                info!(error = %err, ?class, "admin notification failed");
                ActionOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKeyValueStore;
    use crate::protocols::FakeMessagingClient;
    use crate::types::GroupType;
    use std::time::Duration;

    fn context() -> MessageContext {
        MessageContext::new(1, 100, 42, Some("spam".into()), GroupType::General)
    }

    fn breakers() -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::new(5, Duration::from_secs(30)))
    }

    #[test]
    fn block_plan_includes_restrict_above_escalation_threshold() {
        let plan = plan_for_verdict(Verdict::Block, 95, 80);
        assert!(plan.contains(&ActionType::RestrictMember));
        assert!(plan.contains(&ActionType::DeleteMessage));
    }

    #[test]
    fn block_plan_omits_restrict_below_escalation_threshold() {
        let plan = plan_for_verdict(Verdict::Block, 81, 80);
        assert!(!plan.contains(&ActionType::RestrictMember));
    }

    #[test]
    fn allow_plan_is_empty() {
        assert!(plan_for_verdict(Verdict::Allow, 5, 80).is_empty());
    }

    #[tokio::test]
    async fn second_invocation_with_same_key_performs_no_side_effect() {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryKeyValueStore::new());
        let engine = ActionEngine::new(messaging.clone(), store, breakers());
        let plan = vec![ActionType::DeleteMessage];
        let ctx = context();

        engine.execute(&plan, Verdict::Block, &ctx, 95).await;
        engine.execute(&plan, Verdict::Block, &ctx, 95).await;

        assert_eq!(messaging.deleted.lock().len(), 1);
    }

    #[tokio::test]
    async fn restrict_forbidden_failure_skips_without_retry_or_fallback() {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryKeyValueStore::new());
        let engine = ActionEngine::new(messaging.clone(), store, breakers());

        *messaging.fail_restrict.lock() = true;
        let plan = vec![ActionType::RestrictMember];
        let results = engine.execute(&plan, Verdict::Limit, &context(), 50).await;
        assert!(matches!(results[0].outcome, ActionOutcome::Failed(_)));
        assert!(messaging.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn restrict_network_failure_retries_then_falls_back_to_admin_notification() {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryKeyValueStore::new());
        let engine = ActionEngine::new(messaging.clone(), store, breakers());

        *messaging.fail_restrict_network.lock() = true;
        let plan = vec![ActionType::RestrictMember];
        let results = engine.execute(&plan, Verdict::Limit, &context(), 50).await;
        assert!(matches!(results[0].outcome, ActionOutcome::Fallback(_)));
        assert_eq!(messaging.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn admin_notifications_are_rate_limited_per_group() {
        let messaging = Arc::new(FakeMessagingClient::default());
        let store = Arc::new(InMemoryKeyValueStore::new());
        let engine = ActionEngine::new(messaging.clone(), store, breakers());
        let ctx = context();

        let first = engine.notify_admins(&ctx, 90).await;
        let second = engine.notify_admins(&ctx, 90).await;
        assert_eq!(first, ActionOutcome::Performed);
        assert!(matches!(second, ActionOutcome::Fallback(_)));
        assert_eq!(messaging.sent.lock().len(), 1);
    }
}
