//! Behavior signal extraction (§4.2 BehaviorAnalyzer). No Python original was
//! retrieved for this analyzer; derived directly from spec.md §4.2/§4.6 and
//! the `MessageHistoryProvider`/`ChannelSubscriptionChecker` protocols.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::Result;
use crate::protocols::{ChannelSubscriptionChecker, MessageHistoryProvider};
use crate::signals::BehaviorSignals;
use crate::types::MessageContext;

use super::Analyzer;

/// Consumes the injected history provider and subscription checker. On
/// provider failure, returns safe (all-zero / not-subscribed) defaults
/// rather than propagating — the analyzer degrades, it never fails the
/// pipeline (§4.2, §7).
pub struct BehaviorAnalyzer {
    history: Arc<dyn MessageHistoryProvider>,
    subscriptions: Arc<dyn ChannelSubscriptionChecker>,
    linked_channel_id: Option<i64>,
}

impl BehaviorAnalyzer {
    pub fn new(
        history: Arc<dyn MessageHistoryProvider>,
        subscriptions: Arc<dyn ChannelSubscriptionChecker>,
        linked_channel_id: Option<i64>,
    ) -> Self {
        Self {
            history,
            subscriptions,
            linked_channel_id,
        }
    }
}

#[async_trait]
impl Analyzer for BehaviorAnalyzer {
    type Output = BehaviorSignals;

    fn name(&self) -> &'static str {
        "behavior"
    }

    async fn analyze(&self, context: &MessageContext) -> Result<BehaviorSignals> {
        let now_ms = now_millis();

        let messages_in_last_hour = self
            .history
            .count_in_window(context.chat_id, context.user_id, 3600)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "history provider unavailable, defaulting messages_in_last_hour=0");
                0
            });

        let messages_in_last_24h = self
            .history
            .count_in_window(context.chat_id, context.user_id, 86_400)
            .await
            .unwrap_or(0);

        let first_message_time = self
            .history
            .get_first_message_time(context.chat_id, context.user_id)
            .await
            .unwrap_or(None);
        let is_first_message = first_message_time.is_none();

        let time_to_first_message_seconds = first_message_time
            .map(|first_ts| ((now_ms - first_ts).max(0)) / 1000);

        let join_time = self
            .history
            .get_join_time(context.chat_id, context.user_id)
            .await
            .unwrap_or(None);
        let join_to_message_seconds = join_time.map(|join_ts| ((now_ms - join_ts).max(0)) / 1000);

        let previous_messages_approved = self
            .history
            .get_stat(context.chat_id, context.user_id, "approved")
            .await
            .unwrap_or(0) as u32;
        let previous_messages_flagged = self
            .history
            .get_stat(context.chat_id, context.user_id, "flagged")
            .await
            .unwrap_or(0) as u32;
        let previous_messages_blocked = self
            .history
            .get_stat(context.chat_id, context.user_id, "blocked")
            .await
            .unwrap_or(0) as u32;

        let (is_channel_subscriber, subscribed_since) = match self.linked_channel_id {
            Some(channel_id) => self
                .subscriptions
                .is_subscribed(channel_id, context.user_id)
                .await
                .unwrap_or_else(|err| {
                    warn!(error = %err, "subscription checker unavailable, defaulting to not-subscribed");
                    (false, None)
                }),
            None => (false, None),
        };
        let channel_subscription_duration_days = subscribed_since
            .map(|since| (Utc::now() - since).num_days().max(0))
            .unwrap_or(0);

        let is_reply = context.reply_to_message_id.is_some();
        let is_reply_to_admin = is_reply
            && context
                .raw_message
                .get("reply_to_message")
                .and_then(|m| m.get("from"))
                .and_then(|from| from.get("is_admin"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

        let mentioned_users_count = context
            .text
            .as_deref()
            .map(|text| text.matches('@').count() as u32)
            .unwrap_or(0);

        let group_membership_days = context
            .raw_chat
            .get("member_since_days")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        self.history
            .record_message(context.chat_id, context.user_id, now_ms)
            .await
            .unwrap_or(());

        BehaviorSignals {
            time_to_first_message_seconds,
            messages_in_last_hour,
            messages_in_last_24h,
            join_to_message_seconds,
            previous_messages_approved,
            previous_messages_flagged,
            previous_messages_blocked,
            is_first_message,
            is_channel_subscriber,
            channel_subscription_duration_days,
            is_reply,
            is_reply_to_admin,
            mentioned_users_count,
            group_membership_days,
        }
        .validate()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{FakeSubscriptionChecker, InMemoryHistoryProvider};
    use crate::types::GroupType;

    #[tokio::test]
    async fn first_message_is_flagged() {
        let history = Arc::new(InMemoryHistoryProvider::default());
        let subs = Arc::new(FakeSubscriptionChecker::default());
        let analyzer = BehaviorAnalyzer::new(history, subs, None);
        let ctx = MessageContext::new(1, 100, 42, None, GroupType::General);
        let signals = analyzer.analyze(&ctx).await.unwrap();
        assert!(signals.is_first_message);
    }

    #[tokio::test]
    async fn no_linked_channel_means_not_subscribed() {
        let history = Arc::new(InMemoryHistoryProvider::default());
        let subs = Arc::new(FakeSubscriptionChecker::default());
        let analyzer = BehaviorAnalyzer::new(history, subs, None);
        let ctx = MessageContext::new(1, 100, 42, None, GroupType::General);
        let signals = analyzer.analyze(&ctx).await.unwrap();
        assert!(!signals.is_channel_subscriber);
    }
}
