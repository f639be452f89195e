//! Frozen trust-state records (§4.4, §9 "frozen records + `with_*`
//! transitions"). `SandboxState` and `SoftWatchState` are immutable once
//! built: every transition returns a new instance via a `with_*` method, the
//! manager in `trust_manager.rs` is the only thing that ever replaces the
//! stored value, and it always does so through a CAS write.
//!
//! Grounded on `core/sandbox.py`'s state diagram (only the docstring and key
//! names survived retrieval; the transition logic below is derived from
//! spec.md §4.4/§8/§9) and on the frozen-record convention already
//! established in `signals.rs`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Verdict;

/// Where a user currently sits in the trust lifecycle (§4.4 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStage {
    New,
    Sandbox,
    Limited,
    Trusted,
    SoftWatch,
}

/// Why a user left `sandbox` (§4.4 "Release reasons").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    TimeExpired,
    ApprovedMessages,
    ChannelSubscription,
    AdminOverride,
    Regression,
}

pub const DEFAULT_APPROVED_MESSAGES_TO_RELEASE: u32 = 5;
pub const DEFAULT_MIN_HOURS_IN_SANDBOX: i64 = 2;
pub const DEFAULT_APPROVED_TO_TRUSTED: u32 = 30;
pub const DEFAULT_TRUSTED_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_REGRESSION_LIMIT_COUNT: u32 = 3;

/// Per-`(chat_id, user_id)` sandbox/trust record (§4.4, §4.6 `sandbox:{chat_id}:{user_id}`).
///
/// `version` is the CAS token the KV layer compares against on write; it has
/// no meaning to the state machine itself beyond "this is the value I last
/// read".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxState {
    pub stage: TrustStage,
    pub entered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub approved_count: u32,
    pub limit_count: u32,
    pub last_release_reason: Option<ReleaseReason>,
    /// True if the last transition into this state was a regression, so the
    /// audit record can stamp `regression_reset` (§9 Open Question).
    pub regression_reset: bool,
    pub version: u64,
}

impl SandboxState {
    /// A brand new relationship: no sandbox/trust history yet.
    pub fn new() -> Self {
        Self {
            stage: TrustStage::New,
            entered_at: Utc::now(),
            expires_at: None,
            approved_count: 0,
            limit_count: 0,
            last_release_reason: None,
            regression_reset: false,
            version: 0,
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        self.stage == TrustStage::Sandbox
    }

    pub fn is_terminal_trusted(&self) -> bool {
        self.stage == TrustStage::Trusted
    }

    /// `new -> sandbox`, for groups with sandboxing enabled (§4.4).
    pub fn with_entered_sandbox(&self, duration_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            stage: TrustStage::Sandbox,
            entered_at: now,
            expires_at: Some(now + ChronoDuration::hours(duration_hours)),
            approved_count: 0,
            limit_count: 0,
            last_release_reason: None,
            regression_reset: false,
            version: self.version,
        }
    }

    /// `new -> trusted` directly, via channel subscription + account age ≥ 7d.
    pub fn with_trusted_via_subscription(&self) -> Self {
        Self {
            stage: TrustStage::Trusted,
            entered_at: Utc::now(),
            expires_at: None,
            approved_count: self.approved_count,
            limit_count: 0,
            last_release_reason: Some(ReleaseReason::ChannelSubscription),
            regression_reset: false,
            version: self.version,
        }
    }

    /// Records one approved message while sandboxed, without transitioning.
    /// Pure: returns a new record, never mutates `self` (§8 testable property).
    pub fn with_message_recorded(&self, approved: bool) -> Self {
        let mut next = self.clone();
        if approved {
            next.approved_count += 1;
        }
        next
    }

    /// `sandbox -> limited`, either by approved-count + minimum dwell time, or
    /// by TTL expiry. Returns `None` if neither release condition holds yet.
    pub fn try_release_to_limited(
        &self,
        approved_threshold: u32,
        min_hours: i64,
    ) -> Option<Self> {
        if self.stage != TrustStage::Sandbox {
            return None;
        }
        let hours_elapsed = (Utc::now() - self.entered_at).num_hours();
        let expired = self.expires_at.is_some_and(|exp| Utc::now() >= exp);
        let earned = self.approved_count >= approved_threshold && hours_elapsed >= min_hours;

        if !expired && !earned {
            return None;
        }
        let reason = if earned {
            ReleaseReason::ApprovedMessages
        } else {
            ReleaseReason::TimeExpired
        };
        Some(Self {
            stage: TrustStage::Limited,
            entered_at: Utc::now(),
            expires_at: None,
            approved_count: 0,
            limit_count: self.limit_count,
            last_release_reason: Some(reason),
            regression_reset: false,
            version: self.version,
        })
    }

    /// `limited -> trusted` after enough consecutive approved messages in the
    /// trust window, with no intervening violation.
    pub fn try_promote_to_trusted(&self, approved_to_trusted: u32) -> Option<Self> {
        if self.stage != TrustStage::Limited {
            return None;
        }
        if self.approved_count < approved_to_trusted {
            return None;
        }
        Some(Self {
            stage: TrustStage::Trusted,
            entered_at: Utc::now(),
            expires_at: None,
            approved_count: self.approved_count,
            limit_count: 0,
            last_release_reason: None,
            regression_reset: false,
            version: self.version,
        })
    }

    /// `any -> sandbox` regression: a block verdict, or repeated limit
    /// verdicts within the trailing window. Per §9's resolved Open Question,
    /// regression performs a *full TTL reset* rather than extending or
    /// preserving the original window, and stamps `regression_reset` so the
    /// audit record can surface it.
    pub fn with_regression(&self, duration_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            stage: TrustStage::Sandbox,
            entered_at: now,
            expires_at: Some(now + ChronoDuration::hours(duration_hours)),
            approved_count: 0,
            limit_count: 0,
            last_release_reason: Some(ReleaseReason::Regression),
            regression_reset: true,
            version: self.version,
        }
    }

    /// Whether `verdict` should trigger a regression (§4.4 "any -> sandbox").
    /// `self.limit_count` must already reflect the current verdict — the
    /// caller records a `Limit` verdict via `with_limit_recorded` before
    /// calling this, so the count here is already post-increment.
    pub fn should_regress(
        &self,
        verdict: Verdict,
        regression_limit_count: u32,
    ) -> bool {
        if verdict == Verdict::Block {
            return true;
        }
        if verdict == Verdict::Limit {
            return self.limit_count >= regression_limit_count;
        }
        false
    }

    /// Pure increment of the rolling limit-verdict counter; call before
    /// `should_regress` so the threshold check sees the post-increment count.
    pub fn with_limit_recorded(&self) -> Self {
        let mut next = self.clone();
        next.limit_count += 1;
        next
    }

    pub fn with_admin_override_release(&self) -> Self {
        Self {
            stage: TrustStage::Limited,
            entered_at: Utc::now(),
            expires_at: None,
            approved_count: 0,
            limit_count: 0,
            last_release_reason: Some(ReleaseReason::AdminOverride),
            regression_reset: false,
            version: self.version,
        }
    }

    /// Stamps the CAS token read alongside this value; used by the manager
    /// right before a write, never by transition logic.
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

impl Default for SandboxState {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging-only policy record for `deals` groups (§4.4 "new -> soft_watch"):
/// no restrictions are ever applied, but elevated-risk messages are tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftWatchState {
    pub entered_at: DateTime<Utc>,
    pub flagged_count: u32,
    pub version: u64,
}

impl SoftWatchState {
    pub fn new() -> Self {
        Self {
            entered_at: Utc::now(),
            flagged_count: 0,
            version: 0,
        }
    }

    pub fn with_flag_recorded(&self) -> Self {
        Self {
            flagged_count: self.flagged_count + 1,
            ..self.clone()
        }
    }

    pub fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

impl Default for SoftWatchState {
    fn default() -> Self {
        Self::new()
    }
}
