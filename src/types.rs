//! Core domain types shared across the decision pipeline (spec.md §3).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Group type determines threshold calibration and weight overrides (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    General,
    Tech,
    Deals,
    Crypto,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::General => "general",
            Self::Tech => "tech",
            Self::Deals => "deals",
            Self::Crypto => "crypto",
        };
        write!(f, "{s}")
    }
}

/// Risk verdict. Totally ordered from least to most restrictive (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow = 0,
    Watch = 1,
    Limit = 2,
    Review = 3,
    Block = 4,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::Watch => "watch",
            Self::Limit => "limit",
            Self::Review => "review",
            Self::Block => "block",
        };
        write!(f, "{s}")
    }
}

/// Detected threat category, used for analytics and response customization (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    None,
    Spam,
    Scam,
    CryptoScam,
    Phishing,
    Promotion,
    Flood,
    Raid,
    Bot,
    Unknown,
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Spam => "spam",
            Self::Scam => "scam",
            Self::CryptoScam => "crypto_scam",
            Self::Phishing => "phishing",
            Self::Promotion => "promotion",
            Self::Flood => "flood",
            Self::Raid => "raid",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Per-(chat, user) trust level, drives the score adjuster in RiskCalculator (§4.1, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Brand-new relationship, no history yet.
    Untrusted,
    /// Some history accrued, no adjustment either way.
    Provisional,
    /// Established track record, risk scores discounted.
    Trusted,
    /// Long-standing, heavily trusted member.
    Established,
}

impl TrustLevel {
    /// Score adjustment applied in `RiskCalculator::calculate` (risk_calculator.py
    /// `TRUST_SCORE_ADJUSTMENTS`).
    pub fn score_adjustment(self) -> i64 {
        match self {
            Self::Untrusted => 5,
            Self::Provisional => 0,
            Self::Trusted => -10,
            Self::Established => -20,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Untrusted => "untrusted",
            Self::Provisional => "provisional",
            Self::Trusted => "trusted",
            Self::Established => "established",
        };
        write!(f, "{s}")
    }
}

/// Immutable record describing the message being evaluated (§3).
///
/// Constructed once per incoming message and passed by reference through the
/// entire pipeline; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,

    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_bot: bool,
    pub is_premium: bool,

    pub chat_type: String,
    pub chat_title: Option<String>,
    pub group_type: GroupType,

    pub has_media: bool,
    pub media_type: Option<String>,
    pub is_forward: bool,
    pub forward_from_chat_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,

    /// Raw provider payloads, kept for analyzers that need fields this struct
    /// doesn't promote to first-class (e.g. `raw_user["bio"]`, `raw_message["forward_from_chat"]`).
    pub raw_message: Value,
    pub raw_user: Value,
    pub raw_chat: Value,
}

impl MessageContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_id: i64,
        chat_id: i64,
        user_id: i64,
        text: Option<String>,
        group_type: GroupType,
    ) -> Self {
        Self {
            message_id,
            chat_id,
            user_id,
            text,
            timestamp: Utc::now(),
            username: None,
            first_name: None,
            last_name: None,
            is_bot: false,
            is_premium: false,
            chat_type: "group".to_string(),
            chat_title: None,
            group_type,
            has_media: false,
            media_type: None,
            is_forward: false,
            forward_from_chat_id: None,
            reply_to_message_id: None,
            raw_message: Value::Object(serde_json::Map::new()),
            raw_user: Value::Object(serde_json::Map::new()),
            raw_chat: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn raw_user_str(&self, key: &str) -> Option<String> {
        self.raw_user.get(key)?.as_str().map(str::to_string)
    }
}

/// Reason an admin override was recorded against a `Decision` (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    FalsePositive,
    FalseNegative,
    PolicyException,
    Other,
}

/// An admin's override of an automated decision, appended (never replacing) the
/// original `Decision` record (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminOverride {
    pub admin_user_id: i64,
    pub reason: OverrideReason,
    pub note: Option<String>,
    pub overridden_at: DateTime<Utc>,
    pub new_verdict: Verdict,
}

/// Append-only audit record for one moderation decision (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub correlation_id: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub group_type: GroupType,
    pub verdict: Verdict,
    pub threat_type: ThreatType,
    pub score: u8,
    pub raw_score: i64,
    pub confidence: f64,
    pub needs_llm: bool,
    pub llm_verdict: Option<Verdict>,
    pub llm_explanation: Option<String>,
    pub contributing_factors: Vec<String>,
    pub mitigating_factors: Vec<String>,
    pub processing_time_ms: u64,
    /// True if any analyzer or dependency degraded to a fail-open default
    /// during this decision (circuit open, timeout, KV error — §7, §9).
    pub degraded: bool,
    /// Set when a sandbox/trust regression reset the TTL for this user (§9
    /// Open Question resolution).
    pub regression_reset: bool,
    /// Which pipeline stage was cancelled, if the decision was produced on a
    /// best-effort basis after cancellation (§5).
    pub cancelled_stage: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub override_: Option<AdminOverride>,
}

/// Labels attached to ambient metrics/log lines, grouped here to avoid
/// threading five separate strings through every call site.
#[derive(Debug, Clone, Default)]
pub struct DecisionLabels(pub HashMap<String, String>);

impl DecisionLabels {
    pub fn for_decision(d: &Decision) -> Self {
        let mut m = HashMap::new();
        m.insert("group_type".to_string(), d.group_type.to_string());
        m.insert("verdict".to_string(), d.verdict.to_string());
        m.insert("threat_type".to_string(), d.threat_type.to_string());
        Self(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_ordering_is_total() {
        assert!(Verdict::Allow < Verdict::Watch);
        assert!(Verdict::Watch < Verdict::Limit);
        assert!(Verdict::Limit < Verdict::Review);
        assert!(Verdict::Review < Verdict::Block);
    }

    #[test]
    fn trust_adjustments_match_source() {
        assert_eq!(TrustLevel::Untrusted.score_adjustment(), 5);
        assert_eq!(TrustLevel::Provisional.score_adjustment(), 0);
        assert_eq!(TrustLevel::Trusted.score_adjustment(), -10);
        assert_eq!(TrustLevel::Established.score_adjustment(), -20);
    }
}
