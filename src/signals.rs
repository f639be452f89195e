//! Frozen signal records produced by the four analyzers (§3, §4.2).
//!
//! Every `*Signals` struct is immutable by convention once built: there is no
//! setter, and `Signals::new` is the only path the analyzers and pipeline use
//! to assemble one from its four categories, routing every field through
//! `validate()` first (fractions in [0,1], counts non-negative, per spec.md
//! §3). Fields are `pub` rather than privately-guarded — struct-literal
//! construction is how the proptest/unit-test fixtures across this crate
//! build partial signals — so the invariant is enforced at the one
//! production call site, not by the type system. This mirrors the
//! frozen-record discipline spec.md §9 calls out, applied as a convention
//! rather than a compiler guarantee.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SaqshyError};

/// Signals extracted from the user's profile (analyzers/profile.py).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProfileSignals {
    pub account_age_days: i64,
    pub has_username: bool,
    pub has_profile_photo: bool,
    pub has_bio: bool,
    pub has_first_name: bool,
    pub has_last_name: bool,
    pub is_premium: bool,

    pub is_bot: bool,
    pub username_has_random_chars: bool,
    pub bio_has_links: bool,
    pub bio_has_crypto_terms: bool,
    pub name_has_emoji_spam: bool,
}

impl ProfileSignals {
    pub fn validate(self) -> Result<Self> {
        if self.account_age_days < 0 {
            return Err(SaqshyError::out_of_range(
                "profile.account_age_days",
                self.account_age_days,
                ">= 0",
            ));
        }
        Ok(self)
    }
}

/// Signals extracted from message content (analyzers/content.py).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSignals {
    pub text_length: usize,
    pub word_count: usize,
    pub caps_ratio: f64,
    pub emoji_count: usize,
    pub has_cyrillic: bool,
    pub has_latin: bool,
    pub language: String,

    pub url_count: usize,
    pub has_shortened_urls: bool,
    pub has_whitelisted_urls: bool,
    pub has_suspicious_tld: bool,
    pub unique_domains: usize,

    pub has_crypto_scam_phrases: bool,
    pub has_money_patterns: bool,
    pub has_urgency_patterns: bool,
    pub has_phone_numbers: bool,
    pub has_wallet_addresses: bool,

    pub has_media: bool,
    pub has_forward: bool,
    pub forward_from_channel: bool,
}

impl ContentSignals {
    pub fn validate(self) -> Result<Self> {
        if !(0.0..=1.0).contains(&self.caps_ratio) {
            return Err(SaqshyError::out_of_range(
                "content.caps_ratio",
                self.caps_ratio,
                "[0.0, 1.0]",
            ));
        }
        Ok(self)
    }
}

/// Signals from user behavior / message history (§4.2 BehaviorAnalyzer).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BehaviorSignals {
    pub time_to_first_message_seconds: Option<i64>,
    pub messages_in_last_hour: u32,
    pub messages_in_last_24h: u32,
    pub join_to_message_seconds: Option<i64>,

    pub previous_messages_approved: u32,
    pub previous_messages_flagged: u32,
    pub previous_messages_blocked: u32,
    pub is_first_message: bool,

    /// Strongest trust signal in the whole model (§4.2): subscription to the
    /// group's linked broadcast channel.
    pub is_channel_subscriber: bool,
    pub channel_subscription_duration_days: i64,

    pub is_reply: bool,
    pub is_reply_to_admin: bool,
    pub mentioned_users_count: u32,

    /// How long the user has been a member of *this* group — not in the
    /// original `types.py` dataclass listing, but referenced by
    /// `risk_calculator.py::_calculate_behavior_score` (`group_member_*_days`
    /// weights); added here as the field it implies.
    pub group_membership_days: i64,
}

impl BehaviorSignals {
    pub fn validate(self) -> Result<Self> {
        if self.channel_subscription_duration_days < 0 {
            return Err(SaqshyError::out_of_range(
                "behavior.channel_subscription_duration_days",
                self.channel_subscription_duration_days,
                ">= 0",
            ));
        }
        if self.group_membership_days < 0 {
            return Err(SaqshyError::out_of_range(
                "behavior.group_membership_days",
                self.group_membership_days,
                ">= 0",
            ));
        }
        Ok(self)
    }
}

/// Signals from cross-group/network analysis (§4.2 NetworkAnalyzer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSignals {
    pub groups_in_common: u32,
    pub duplicate_messages_in_other_groups: u32,
    pub flagged_in_other_groups: u32,
    pub blocked_in_other_groups: u32,

    pub spam_db_similarity: f64,
    pub spam_db_matched_pattern: Option<String>,

    pub is_in_global_blocklist: bool,
    pub is_in_global_whitelist: bool,
}

impl NetworkSignals {
    pub fn validate(self) -> Result<Self> {
        if !(0.0..=1.0).contains(&self.spam_db_similarity) {
            return Err(SaqshyError::out_of_range(
                "network.spam_db_similarity",
                self.spam_db_similarity,
                "[0.0, 1.0]",
            ));
        }
        Ok(self)
    }
}

/// Combined, validated signals — the sole input to `RiskCalculator::calculate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signals {
    pub profile: ProfileSignals,
    pub content: ContentSignals,
    pub behavior: BehaviorSignals,
    pub network: NetworkSignals,
}

impl Signals {
    pub fn new(
        profile: ProfileSignals,
        content: ContentSignals,
        behavior: BehaviorSignals,
        network: NetworkSignals,
    ) -> Result<Self> {
        Ok(Self {
            profile: profile.validate()?,
            content: content.validate()?,
            behavior: behavior.validate()?,
            network: network.validate()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_caps_ratio() {
        let content = ContentSignals {
            caps_ratio: 1.5,
            ..Default::default()
        };
        assert!(content.validate().is_err());
    }

    #[test]
    fn accepts_defaults() {
        let signals = Signals::new(
            ProfileSignals::default(),
            ContentSignals::default(),
            BehaviorSignals::default(),
            NetworkSignals::default(),
        );
        assert!(signals.is_ok());
    }
}
