//! Audit trail (§4.7): the pipeline's only path to durable storage. Wraps an
//! injected `DecisionStore` + `MetricsSink` pair so the pipeline never talks
//! to either directly.
//!
//! Grounded on `core/audit.py`'s `AuditTrail(session_factory, metrics_collector)`
//! constructor shape and `log_decision(correlation_id, context, result, metrics)`
//! signature (only the docstring survived retrieval) and on the teacher's
//! `hub/audit.rs` for the structured-`tracing` style used around persistence
//! calls.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::protocols::{DecisionStats, DecisionStore, MetricsSink};
use crate::types::{Decision, DecisionLabels, OverrideReason, Verdict};

pub struct AuditTrail {
    store: Arc<dyn DecisionStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn DecisionStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Persists `decision` and emits its metrics (§4.7). A store failure is
    /// logged at error (this is the one place in the core where "fatal" is
    /// the right severity — see spec.md §7 — since a lost decision record
    /// means the moderation action it describes is unaccounted for) but
    /// never propagated past this point: the pipeline has already acted on
    /// the verdict by the time `log_decision` runs.
    pub async fn log_decision(&self, decision: Decision) {
        let labels = DecisionLabels::for_decision(&decision);
        self.metrics.increment("decisions_total", &labels.0);
        self.metrics.observe_latency(
            "decision_processing_time_ms",
            decision.processing_time_ms as f64,
            &labels.0,
        );
        if decision.needs_llm {
            self.metrics.increment("llm_adjudications_total", &labels.0);
        }
        if decision.degraded {
            self.metrics.increment("degraded_decisions_total", &labels.0);
        }

        let correlation_id = decision.correlation_id.clone();
        let decision_id = decision.id;
        match self.store.save(decision).await {
            Ok(()) => {
                info!(correlation_id, %decision_id, "decision persisted");
            }
            Err(err) => {
                error!(correlation_id, %decision_id, error = %err, "failed to persist decision");
            }
        }
    }

    pub async fn list_by_group(&self, chat_id: i64, limit: usize) -> Vec<Decision> {
        self.store.list_by_group(chat_id, limit).await.unwrap_or_else(|err| {
            error!(error = %err, chat_id, "failed to list decisions by group");
            Vec::new()
        })
    }

    pub async fn list_by_user(&self, user_id: i64, limit: usize) -> Vec<Decision> {
        self.store.list_by_user(user_id, limit).await.unwrap_or_else(|err| {
            error!(error = %err, user_id, "failed to list decisions by user");
            Vec::new()
        })
    }

    pub async fn record_override(
        &self,
        decision_id: uuid::Uuid,
        admin_user_id: i64,
        reason: OverrideReason,
        note: Option<String>,
        new_verdict: Verdict,
    ) -> crate::error::Result<()> {
        self.store
            .record_override(decision_id, admin_user_id, reason, note, new_verdict)
            .await?;
        let mut labels = HashMap::new();
        labels.insert("new_verdict".to_string(), new_verdict.to_string());
        self.metrics.increment("decision_overrides_total", &labels);
        Ok(())
    }

    pub async fn stats(&self, chat_id: i64) -> DecisionStats {
        self.store.stats(chat_id).await.unwrap_or_else(|err| {
            error!(error = %err, chat_id, "failed to compute decision stats");
            DecisionStats::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{InMemoryDecisionStore, InMemoryMetricsSink};
    use crate::types::{GroupType, ThreatType};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_decision() -> Decision {
        Decision {
            id: Uuid::new_v4(),
            correlation_id: "corr-1".to_string(),
            chat_id: 1,
            user_id: 42,
            message_id: 100,
            group_type: GroupType::General,
            verdict: Verdict::Block,
            threat_type: ThreatType::Spam,
            score: 95,
            raw_score: 95,
            confidence: 0.9,
            needs_llm: false,
            llm_verdict: None,
            llm_explanation: None,
            contributing_factors: vec![],
            mitigating_factors: vec![],
            processing_time_ms: 42,
            degraded: false,
            regression_reset: false,
            cancelled_stage: None,
            decided_at: Utc::now(),
            override_: None,
        }
    }

    #[tokio::test]
    async fn log_decision_persists_and_emits_metrics() {
        let store = Arc::new(InMemoryDecisionStore::default());
        let metrics = Arc::new(InMemoryMetricsSink::default());
        let trail = AuditTrail::new(store.clone(), metrics.clone());

        trail.log_decision(sample_decision()).await;

        assert_eq!(store.stats(1).await.unwrap().total, 1);
        assert_eq!(*metrics.counters.lock().get("decisions_total").unwrap(), 1);
    }

    #[tokio::test]
    async fn record_override_updates_decision_and_metrics() {
        let store = Arc::new(InMemoryDecisionStore::default());
        let metrics = Arc::new(InMemoryMetricsSink::default());
        let trail = AuditTrail::new(store.clone(), metrics.clone());

        let decision = sample_decision();
        let id = decision.id;
        trail.log_decision(decision).await;

        trail
            .record_override(id, 7, OverrideReason::FalsePositive, None, Verdict::Allow)
            .await
            .unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.override_.unwrap().new_verdict, Verdict::Allow);
        assert_eq!(*metrics.counters.lock().get("decision_overrides_total").unwrap(), 1);
    }
}
