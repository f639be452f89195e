//! Small demo binary: wires the in-memory fakes into a `Pipeline` and runs a
//! handful of sample messages through it, so the crate has something
//! runnable beyond its test suite. Not a production adapter — a host
//! application would swap every fake here for a real client (Telegram Bot
//! API, Redis, an LLM endpoint) implementing the same `protocols` traits.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use saqshy_core::analyzers::network::InMemoryCrossGroupTracker;
use saqshy_core::cache::InMemoryKeyValueStore;
use saqshy_core::circuit_breaker::CircuitBreakerRegistry;
use saqshy_core::config::{GroupConfigRegistry, ProcessConfig, TimeoutConfig};
use saqshy_core::protocols::{
    FakeLLMAdjudicator, FakeMessagingClient, FakeSpamDatabase, FakeSubscriptionChecker,
    InMemoryDecisionStore, InMemoryHistoryProvider, InMemoryMetricsSink,
};
use saqshy_core::trust_manager::TrustManagerConfig;
use saqshy_core::types::{GroupType, MessageContext};
use saqshy_core::{Pipeline, PipelineDependencies};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let process_config = ProcessConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "falling back to defaults, process config failed to load");
        ProcessConfig::default()
    });

    let deps = PipelineDependencies {
        messaging: Arc::new(FakeMessagingClient::default()),
        history: Arc::new(InMemoryHistoryProvider::default()),
        subscriptions: Arc::new(FakeSubscriptionChecker::default()),
        spam_db: Arc::new(FakeSpamDatabase::default()),
        cross_group: Arc::new(InMemoryCrossGroupTracker::default()),
        llm: Arc::new(FakeLLMAdjudicator { forced_verdict: None }),
        decision_store: Arc::new(InMemoryDecisionStore::default()),
        metrics: Arc::new(InMemoryMetricsSink::default()),
        kv: Arc::new(InMemoryKeyValueStore::new()),
    };

    let pipeline = Pipeline::new(
        deps,
        TimeoutConfig::default(),
        Arc::new(CircuitBreakerRegistry::new(
            process_config.circuit_breaker.failure_threshold,
            Duration::from_secs(process_config.circuit_breaker.open_duration_secs),
        )),
        TrustManagerConfig::default(),
        GroupConfigRegistry::new(),
    );

    let samples = [
        (1_i64, 42_i64, "hey everyone, how's it going?", GroupType::General),
        (
            2,
            43,
            "send BTC now guaranteed profit double your bitcoin wallet bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh",
            GroupType::Crypto,
        ),
        (3, 44, "check out this deal, 50% off today only", GroupType::Deals),
    ];

    for (chat_id, user_id, text, group_type) in samples {
        let context = MessageContext::new(
            sample_message_id(chat_id, user_id),
            chat_id,
            user_id,
            Some(text.to_string()),
            group_type,
        );
        let result = pipeline.run(&context, CancellationToken::new()).await;
        info!(
            chat_id,
            user_id,
            ?group_type,
            verdict = ?result.verdict,
            score = result.score,
            degraded = result.degraded,
            processing_time_ms = result.processing_time_ms,
            "processed sample message"
        );
    }
}

/// Deterministic per-sample message id, so repeated demo runs are diffable.
fn sample_message_id(chat_id: i64, user_id: i64) -> i64 {
    chat_id * 1_000 + user_id
}
