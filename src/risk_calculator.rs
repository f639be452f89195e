//! Pure, synchronous risk scoring (§4.1). Grounded on
//! `saqshy/core/risk_calculator.py` in full: weight application order,
//! clamping, threat-type priority contest and confidence all mirror that
//! module's logic exactly.

use crate::constants::{
    self, behavior_weights, content_weights, network_weights, profile_weights, thresholds_for,
    Thresholds, WeightTable, LLM_GRAY_ZONE, MAX_WEIGHT_MAGNITUDE,
};
use crate::error::{Result, SaqshyError};
use crate::signals::{BehaviorSignals, Signals};
use crate::types::{GroupType, ThreatType, TrustLevel, Verdict};

#[derive(Debug, Default)]
struct ScoreBreakdown {
    profile_score: i64,
    content_score: i64,
    behavior_score: i64,
    network_score: i64,
    contributing_factors: Vec<String>,
    mitigating_factors: Vec<String>,
}

/// Final output of a risk calculation (§3 RiskResult).
#[derive(Debug, Clone)]
pub struct RiskResult {
    /// Clamped to [0, 100].
    pub score: u8,
    /// Unclamped sum, preserved for diagnostics (can be negative or >100).
    pub raw_score: i64,
    pub verdict: Verdict,
    pub threat_type: ThreatType,
    pub profile_score: i64,
    pub content_score: i64,
    pub behavior_score: i64,
    pub network_score: i64,
    pub needs_llm: bool,
    pub confidence: f64,
    pub contributing_factors: Vec<String>,
    pub mitigating_factors: Vec<String>,
}

/// Scores `Signals` into a `RiskResult` for one group type. Construction
/// validates the weight tables and thresholds once; `calculate` is then a
/// pure function with no I/O and no fallibility (risk_calculator.py never
/// raises past `__init__`).
pub struct RiskCalculator {
    group_type: GroupType,
    profile_weights: WeightTable,
    content_weights: WeightTable,
    behavior_weights: WeightTable,
    network_weights: WeightTable,
    thresholds: Thresholds,
}

impl RiskCalculator {
    /// `sensitivity` is the per-group config knob (§6.2, 1-10, default 5).
    /// Resolved here (DESIGN.md Open Question #2) as a uniform multiplier on
    /// positive category weights: 5 is neutral (1.0x), each unit away scales
    /// by ±10%.
    pub fn new(group_type: GroupType, sensitivity: u8) -> Result<Self> {
        if !(1..=10).contains(&sensitivity) {
            return Err(SaqshyError::out_of_range(
                "sensitivity",
                sensitivity,
                "1..=10",
            ));
        }
        let multiplier = 1.0 + (sensitivity as f64 - 5.0) * 0.10;

        let mut content = content_weights();
        match group_type {
            GroupType::Deals => content.extend(constants::deals_weight_overrides()),
            GroupType::Crypto => content.extend(constants::crypto_weight_overrides()),
            GroupType::Tech => content.extend(constants::tech_weight_overrides()),
            GroupType::General => {}
        }

        let mut calculator = Self {
            group_type,
            profile_weights: profile_weights(),
            content_weights: content,
            behavior_weights: behavior_weights(),
            network_weights: network_weights(),
            thresholds: thresholds_for(group_type),
        };
        calculator.scale_positive_weights(multiplier);
        calculator.validate_weights()?;
        Ok(calculator)
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    fn scale_positive_weights(&mut self, multiplier: f64) {
        for table in [
            &mut self.profile_weights,
            &mut self.content_weights,
            &mut self.behavior_weights,
            &mut self.network_weights,
        ] {
            for value in table.values_mut() {
                if *value > 0 {
                    *value = (*value as f64 * multiplier).round() as i64;
                }
            }
        }
    }

    fn validate_weights(&self) -> Result<()> {
        let tables: [(&str, &WeightTable); 4] = [
            ("profile", &self.profile_weights),
            ("content", &self.content_weights),
            ("behavior", &self.behavior_weights),
            ("network", &self.network_weights),
        ];
        for (category, table) in tables {
            for (key, value) in table {
                if value.abs() > MAX_WEIGHT_MAGNITUDE {
                    return Err(SaqshyError::invalid_weight(
                        category,
                        key,
                        &format!("magnitude {value} exceeds {MAX_WEIGHT_MAGNITUDE}"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn calculate(&self, signals: &Signals, trust_level: TrustLevel) -> RiskResult {
        let mut breakdown = ScoreBreakdown::default();
        breakdown.profile_score = self.score_profile(signals, &mut breakdown);
        breakdown.content_score = self.score_content(signals, &mut breakdown);
        breakdown.behavior_score = self.score_behavior(signals, &mut breakdown);
        breakdown.network_score = self.score_network(signals, &mut breakdown);

        let mut raw_score = breakdown.profile_score
            + breakdown.content_score
            + breakdown.behavior_score
            + breakdown.network_score;

        let trust_adjustment = trust_level.score_adjustment();
        raw_score += trust_adjustment;
        if trust_adjustment != 0 {
            if trust_adjustment < 0 {
                breakdown
                    .mitigating_factors
                    .push(format!("Trust level: {trust_level} ({trust_adjustment})"));
            } else {
                breakdown
                    .contributing_factors
                    .push(format!("Trust level: {trust_level} (+{trust_adjustment})"));
            }
        }

        let final_score = raw_score.clamp(0, 100) as u8;
        let verdict = self.score_to_verdict(final_score as i64);
        let threat_type = self.detect_threat_type(signals, final_score as i64);
        let needs_llm =
            (LLM_GRAY_ZONE.0..=LLM_GRAY_ZONE.1).contains(&final_score);
        let confidence = Self::confidence_for(final_score, &threat_type);

        RiskResult {
            score: final_score,
            raw_score,
            verdict,
            threat_type,
            profile_score: breakdown.profile_score,
            content_score: breakdown.content_score,
            behavior_score: breakdown.behavior_score,
            network_score: breakdown.network_score,
            needs_llm,
            confidence,
            contributing_factors: breakdown.contributing_factors,
            mitigating_factors: breakdown.mitigating_factors,
        }
    }

    fn score_profile(&self, signals: &Signals, breakdown: &mut ScoreBreakdown) -> i64 {
        let profile = &signals.profile;
        let w = &self.profile_weights;
        let mut score = 0;

        if profile.account_age_days < 1 {
            score += w.get("account_age_under_24_hours").copied().unwrap_or(25);
            breakdown
                .contributing_factors
                .push("Account created less than 24 hours ago".into());
        } else if profile.account_age_days < 7 {
            score += w.get("account_age_under_7_days").copied().unwrap_or(15);
            breakdown
                .contributing_factors
                .push("Account less than 7 days old".into());
        } else if profile.account_age_days >= 365 * 3 {
            score += w.get("account_age_3_years").copied().unwrap_or(-15);
            breakdown.mitigating_factors.push("Account 3+ years old".into());
        } else if profile.account_age_days >= 365 {
            score += w.get("account_age_1_year").copied().unwrap_or(-10);
            breakdown.mitigating_factors.push("Account 1+ year old".into());
        }

        if profile.has_profile_photo {
            score += w.get("has_profile_photo").copied().unwrap_or(-5);
        } else {
            score += w.get("no_profile_photo").copied().unwrap_or(8);
            breakdown.contributing_factors.push("No profile photo".into());
        }

        if profile.has_username {
            score += w.get("has_username").copied().unwrap_or(-3);
        } else {
            score += w.get("no_username").copied().unwrap_or(5);
        }

        if profile.is_premium {
            score += w.get("is_premium").copied().unwrap_or(-10);
            breakdown.mitigating_factors.push("Premium user".into());
        }

        if profile.username_has_random_chars {
            score += w.get("username_random_chars").copied().unwrap_or(12);
            breakdown
                .contributing_factors
                .push("Username contains random characters".into());
        }

        if profile.name_has_emoji_spam {
            score += w.get("name_has_emoji_spam").copied().unwrap_or(15);
            breakdown
                .contributing_factors
                .push("Name contains emoji spam".into());
        }

        if profile.bio_has_crypto_terms {
            score += w.get("bio_has_crypto_terms").copied().unwrap_or(10);
        }

        if profile.bio_has_links {
            score += w.get("bio_has_links").copied().unwrap_or(8);
        }

        score
    }

    fn score_content(&self, signals: &Signals, breakdown: &mut ScoreBreakdown) -> i64 {
        let content = &signals.content;
        let w = &self.content_weights;
        let mut score = 0;

        if content.has_crypto_scam_phrases {
            score += w.get("crypto_scam_phrase").copied().unwrap_or(35);
            breakdown
                .contributing_factors
                .push("Contains crypto scam phrases".into());
        }

        if content.has_wallet_addresses {
            score += w.get("wallet_address").copied().unwrap_or(20);
            breakdown
                .contributing_factors
                .push("Contains wallet address".into());
        }

        if content.url_count > 0 {
            score += w.get("has_urls").copied().unwrap_or(5);

            if content.url_count >= 3 {
                score += w.get("multiple_urls_3_plus").copied().unwrap_or(12);
                breakdown.contributing_factors.push("Multiple URLs".into());
            }
            if content.has_shortened_urls {
                score += w.get("has_shortened_urls").copied().unwrap_or(15);
                breakdown.contributing_factors.push("Shortened URLs".into());
            }
            if content.has_suspicious_tld {
                score += w.get("has_suspicious_tld").copied().unwrap_or(18);
                breakdown.contributing_factors.push("Suspicious TLD".into());
            }
            if content.has_whitelisted_urls {
                score += w.get("has_whitelisted_domains").copied().unwrap_or(-8);
                breakdown
                    .mitigating_factors
                    .push("Whitelisted domains".into());
            }
        }

        if content.caps_ratio > 0.8 {
            score += w.get("excessive_caps_80_percent").copied().unwrap_or(15);
            breakdown.contributing_factors.push("Excessive caps".into());
        } else if content.caps_ratio > 0.5 {
            score += w.get("excessive_caps_50_percent").copied().unwrap_or(8);
        }

        if content.emoji_count >= 20 {
            score += w.get("excessive_emoji_20_plus").copied().unwrap_or(18);
        } else if content.emoji_count >= 10 {
            score += w.get("excessive_emoji_10_plus").copied().unwrap_or(10);
        }

        if content.has_money_patterns {
            score += w.get("money_pattern").copied().unwrap_or(12);
        }
        if content.has_urgency_patterns {
            score += w.get("urgency_pattern").copied().unwrap_or(10);
        }
        if content.has_phone_numbers {
            score += w.get("phone_number").copied().unwrap_or(8);
        }

        if content.forward_from_channel {
            score += w.get("is_forward_from_channel").copied().unwrap_or(12);
        } else if content.has_forward {
            score += w.get("is_forward").copied().unwrap_or(5);
        }

        score
    }

    fn score_behavior(&self, signals: &Signals, breakdown: &mut ScoreBreakdown) -> i64 {
        let behavior = &signals.behavior;
        let profile = &signals.profile;
        let w = &self.behavior_weights;
        let mut score = 0;

        score += Self::channel_subscription_bonus(behavior, profile, breakdown);

        if behavior.previous_messages_approved >= 10 {
            score += w
                .get("previous_messages_approved_10_plus")
                .copied()
                .unwrap_or(-15);
            breakdown
                .mitigating_factors
                .push("10+ approved messages".into());
        } else if behavior.previous_messages_approved >= 5 {
            score += w
                .get("previous_messages_approved_5_plus")
                .copied()
                .unwrap_or(-10);
        } else if behavior.previous_messages_approved >= 1 {
            score += w
                .get("previous_messages_approved_1_plus")
                .copied()
                .unwrap_or(-5);
        }

        if behavior.is_reply {
            score += w.get("is_reply").copied().unwrap_or(-3);
            if behavior.is_reply_to_admin {
                score += w.get("is_reply_to_admin").copied().unwrap_or(-5);
            }
        }

        if behavior.group_membership_days >= 90 {
            score += w.get("group_member_90_days").copied().unwrap_or(-15);
            breakdown
                .mitigating_factors
                .push("Group member for 90+ days".into());
        } else if behavior.group_membership_days >= 30 {
            score += w.get("group_member_30_days").copied().unwrap_or(-10);
            breakdown
                .mitigating_factors
                .push("Group member for 30+ days".into());
        } else if behavior.group_membership_days >= 7 {
            score += w.get("group_member_7_days").copied().unwrap_or(-5);
        }

        if behavior.is_first_message {
            score += w.get("is_first_message").copied().unwrap_or(8);
        }

        if let Some(ttfm) = behavior.time_to_first_message_seconds {
            if ttfm < 30 {
                score += w.get("ttfm_under_30_seconds").copied().unwrap_or(15);
                breakdown
                    .contributing_factors
                    .push("Very fast first message".into());
            } else if ttfm < 300 {
                score += w.get("ttfm_under_5_minutes").copied().unwrap_or(8);
            }
        }

        if let Some(join_gap) = behavior.join_to_message_seconds {
            if join_gap < 10 {
                score += w
                    .get("join_to_message_under_10_seconds")
                    .copied()
                    .unwrap_or(18);
                breakdown
                    .contributing_factors
                    .push("Message immediately after join".into());
            }
        }

        if behavior.messages_in_last_hour >= 10 {
            score += w.get("messages_in_hour_10_plus").copied().unwrap_or(20);
            breakdown.contributing_factors.push("Message flood".into());
        } else if behavior.messages_in_last_hour >= 5 {
            score += w.get("messages_in_hour_5_plus").copied().unwrap_or(12);
        }

        if behavior.previous_messages_blocked > 0 {
            score += w.get("previous_messages_blocked").copied().unwrap_or(25);
            breakdown
                .contributing_factors
                .push("Previously blocked messages".into());
        }
        if behavior.previous_messages_flagged > 0 {
            score += w.get("previous_messages_flagged").copied().unwrap_or(15);
        }

        score
    }

    /// Channel-subscription bonus (§4.2 "strongest trust signal"). Capped
    /// for accounts under 7 days old to prevent a compromised/bought account
    /// from bypassing scoring purely by subscribing to the linked channel.
    fn channel_subscription_bonus(
        behavior: &BehaviorSignals,
        profile: &crate::signals::ProfileSignals,
        breakdown: &mut ScoreBreakdown,
    ) -> i64 {
        if !behavior.is_channel_subscriber {
            return 0;
        }
        let base_bonus: i64 = -15;
        let duration_bonus: i64 = if behavior.channel_subscription_duration_days >= 30 {
            -10
        } else if behavior.channel_subscription_duration_days >= 7 {
            -5
        } else {
            0
        };
        let mut total_bonus = base_bonus + duration_bonus;

        if profile.account_age_days < 7 {
            total_bonus = total_bonus.max(-10);
            breakdown.mitigating_factors.push(format!(
                "Channel subscriber (capped to {total_bonus} for new account)"
            ));
        } else {
            breakdown
                .mitigating_factors
                .push(format!("Channel subscriber ({total_bonus} trust bonus)"));
        }
        total_bonus
    }

    fn score_network(&self, signals: &Signals, breakdown: &mut ScoreBreakdown) -> i64 {
        let network = &signals.network;
        let w = &self.network_weights;
        let mut score = 0;

        if network.is_in_global_whitelist {
            score += w.get("is_in_global_whitelist").copied().unwrap_or(-30);
            breakdown.mitigating_factors.push("In global whitelist".into());
        }
        if network.is_in_global_blocklist {
            score += w.get("is_in_global_blocklist").copied().unwrap_or(50);
            breakdown.contributing_factors.push("In global blocklist".into());
        }

        if network.spam_db_similarity >= 0.95 {
            score += w
                .get("spam_db_similarity_0.95_plus")
                .copied()
                .unwrap_or(50);
            breakdown
                .contributing_factors
                .push("Near-exact spam match".into());
        } else if network.spam_db_similarity >= 0.88 {
            score += w
                .get("spam_db_similarity_0.88_plus")
                .copied()
                .unwrap_or(45);
            breakdown
                .contributing_factors
                .push("High spam similarity".into());
        } else if network.spam_db_similarity >= 0.80 {
            score += w
                .get("spam_db_similarity_0.80_plus")
                .copied()
                .unwrap_or(35);
        } else if network.spam_db_similarity >= 0.70 {
            score += w
                .get("spam_db_similarity_0.70_plus")
                .copied()
                .unwrap_or(25);
        }

        let dup_count = network.duplicate_messages_in_other_groups;
        if dup_count >= 5 {
            score += w.get("duplicate_in_5_plus_groups").copied().unwrap_or(50);
            breakdown.contributing_factors.push(format!(
                "Duplicate in {dup_count}+ groups (coordinated spam attack)"
            ));
        } else if dup_count >= 3 {
            score += w.get("duplicate_in_3_groups").copied().unwrap_or(35);
            breakdown
                .contributing_factors
                .push(format!("Duplicate in {dup_count} groups"));
        } else if dup_count >= 2 {
            score += w.get("duplicate_in_2_groups").copied().unwrap_or(20);
            breakdown
                .contributing_factors
                .push(format!("Duplicate in {dup_count} groups"));
        } else if dup_count > 0 {
            score += 10;
            breakdown
                .contributing_factors
                .push("Message seen in another group".into());
        }

        if network.blocked_in_other_groups > 0 {
            score += w.get("blocked_in_other_groups").copied().unwrap_or(40);
            breakdown
                .contributing_factors
                .push("Blocked in other groups".into());
        }
        if network.flagged_in_other_groups > 0 {
            score += w.get("flagged_in_other_groups").copied().unwrap_or(25);
        }
        if network.groups_in_common >= 5 {
            score += w.get("groups_in_common_5_plus").copied().unwrap_or(-5);
        }

        score
    }

    fn score_to_verdict(&self, score: i64) -> Verdict {
        let t = &self.thresholds;
        if score >= t.block {
            Verdict::Block
        } else if score >= t.review {
            Verdict::Review
        } else if score >= t.limit {
            Verdict::Limit
        } else if score >= t.watch {
            Verdict::Watch
        } else {
            Verdict::Allow
        }
    }

    /// Priority contest over candidate threat types (risk_calculator.py
    /// `_detect_threat_type`): highest priority score wins, ties favor the
    /// earliest candidate collected.
    fn detect_threat_type(&self, signals: &Signals, score: i64) -> ThreatType {
        if score < 30 {
            return ThreatType::None;
        }

        let mut candidates: Vec<(i64, ThreatType)> = Vec::new();

        if signals.content.has_crypto_scam_phrases {
            candidates.push((100, ThreatType::CryptoScam));
        }
        if signals.content.has_wallet_addresses && score >= 50 {
            candidates.push((90, ThreatType::Scam));
        }
        if signals.network.duplicate_messages_in_other_groups >= 3 {
            candidates.push((85, ThreatType::Raid));
        } else if signals.network.duplicate_messages_in_other_groups > 0 {
            candidates.push((70, ThreatType::Raid));
        }
        if signals.behavior.messages_in_last_hour >= 10 {
            candidates.push((75, ThreatType::Flood));
        }
        if signals.network.spam_db_similarity >= 0.95 {
            candidates.push((95, ThreatType::Spam));
        } else if signals.network.spam_db_similarity >= 0.80 {
            candidates.push((65, ThreatType::Spam));
        }
        if signals.content.url_count >= 3 || signals.content.has_money_patterns {
            candidates.push((50, ThreatType::Promotion));
        }

        candidates
            .into_iter()
            .max_by_key(|(priority, _)| *priority)
            .map(|(_, threat)| threat)
            .unwrap_or(ThreatType::Unknown)
    }

    /// Confidence heuristic (not present verbatim in risk_calculator.py,
    /// which always returns 1.0 implicitly by never setting the field —
    /// `RiskResult.confidence` defaults to `1.0` in `types.py`). This crate
    /// lowers confidence near verdict boundaries and for `Unknown` threat
    /// classification, since spec.md §3 describes `confidence` as meaningful
    /// rather than a constant.
    fn confidence_for(score: u8, threat_type: &ThreatType) -> f64 {
        let boundary_distance = [30i64, 50, 75, 92]
            .iter()
            .map(|b| (score as i64 - b).abs())
            .min()
            .unwrap_or(50);
        let boundary_confidence = (boundary_distance as f64 / 15.0).min(1.0).max(0.5);
        if matches!(threat_type, ThreatType::Unknown) {
            (boundary_confidence - 0.1).max(0.4)
        } else {
            boundary_confidence
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{ContentSignals, NetworkSignals, ProfileSignals};
    use proptest::prelude::*;

    fn calculator(group_type: GroupType) -> RiskCalculator {
        RiskCalculator::new(group_type, 5).unwrap()
    }

    #[test]
    fn clean_message_from_trusted_user_allows() {
        let calc = calculator(GroupType::General);
        let signals = Signals::new(
            ProfileSignals {
                account_age_days: 1000,
                has_username: true,
                has_profile_photo: true,
                ..Default::default()
            },
            ContentSignals {
                caps_ratio: 0.1,
                ..Default::default()
            },
            BehaviorSignals {
                previous_messages_approved: 20,
                group_membership_days: 200,
                is_first_message: false,
                ..Default::default()
            },
            NetworkSignals::default(),
        )
        .unwrap();

        let result = calc.calculate(&signals, TrustLevel::Established);
        assert_eq!(result.verdict, Verdict::Allow);
        assert!(result.raw_score < 30);
    }

    #[test]
    fn crypto_scam_phrase_dominates_threat_type() {
        let calc = calculator(GroupType::Crypto);
        let signals = Signals::new(
            ProfileSignals::default(),
            ContentSignals {
                has_crypto_scam_phrases: true,
                has_wallet_addresses: true,
                ..Default::default()
            },
            BehaviorSignals::default(),
            NetworkSignals {
                duplicate_messages_in_other_groups: 4,
                ..Default::default()
            },
        )
        .unwrap();

        let result = calc.calculate(&signals, TrustLevel::Untrusted);
        assert_eq!(result.threat_type, ThreatType::CryptoScam);
        assert_eq!(result.verdict, Verdict::Block);
    }

    #[test]
    fn score_is_always_clamped() {
        let calc = calculator(GroupType::General);
        let signals = Signals::new(
            ProfileSignals::default(),
            ContentSignals {
                has_crypto_scam_phrases: true,
                has_wallet_addresses: true,
                url_count: 5,
                has_shortened_urls: true,
                has_suspicious_tld: true,
                caps_ratio: 0.9,
                emoji_count: 30,
                has_money_patterns: true,
                has_urgency_patterns: true,
                has_phone_numbers: true,
                forward_from_channel: true,
                ..Default::default()
            },
            BehaviorSignals {
                messages_in_last_hour: 50,
                previous_messages_blocked: 5,
                previous_messages_flagged: 5,
                ..Default::default()
            },
            NetworkSignals {
                is_in_global_blocklist: true,
                spam_db_similarity: 1.0,
                duplicate_messages_in_other_groups: 10,
                blocked_in_other_groups: 3,
                flagged_in_other_groups: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let result = calc.calculate(&signals, TrustLevel::Untrusted);
        assert_eq!(result.score, 100);
        assert!(result.raw_score > 100);
    }

    #[test]
    fn rejects_sensitivity_out_of_range() {
        assert!(RiskCalculator::new(GroupType::General, 0).is_err());
        assert!(RiskCalculator::new(GroupType::General, 11).is_err());
    }

    proptest! {
        /// `calculate()`'s score is clamped to [0, 100] no matter how extreme
        /// the input signals or trust adjustment are (§3 RiskResult.score).
        #[test]
        fn score_is_always_in_range(
            group_type in prop_oneof![
                Just(GroupType::General),
                Just(GroupType::Deals),
                Just(GroupType::Crypto),
                Just(GroupType::Tech),
            ],
            sensitivity in 1u8..=10,
            trust_level in prop_oneof![
                Just(TrustLevel::Untrusted),
                Just(TrustLevel::Provisional),
                Just(TrustLevel::Trusted),
                Just(TrustLevel::Established),
            ],
            account_age_days in 0i64..4000,
            has_username in any::<bool>(),
            has_profile_photo in any::<bool>(),
            username_has_random_chars in any::<bool>(),
            name_has_emoji_spam in any::<bool>(),
            has_crypto_scam_phrases in any::<bool>(),
            has_wallet_addresses in any::<bool>(),
            url_count in 0usize..10,
            has_shortened_urls in any::<bool>(),
            has_suspicious_tld in any::<bool>(),
            caps_ratio in 0.0f64..=1.0,
            emoji_count in 0usize..40,
            has_money_patterns in any::<bool>(),
            has_urgency_patterns in any::<bool>(),
            previous_messages_approved in 0u32..30,
            previous_messages_blocked in 0u32..10,
            messages_in_last_hour in 0u32..60,
            spam_db_similarity in 0.0f64..=1.0,
            duplicate_messages_in_other_groups in 0u32..15,
            is_in_global_blocklist in any::<bool>(),
        ) {
            let calc = RiskCalculator::new(group_type, sensitivity).unwrap();
            let signals = Signals::new(
                ProfileSignals {
                    account_age_days,
                    has_username,
                    has_profile_photo,
                    username_has_random_chars,
                    name_has_emoji_spam,
                    ..Default::default()
                },
                ContentSignals {
                    has_crypto_scam_phrases,
                    has_wallet_addresses,
                    url_count,
                    has_shortened_urls,
                    has_suspicious_tld,
                    caps_ratio,
                    emoji_count,
                    has_money_patterns,
                    has_urgency_patterns,
                    ..Default::default()
                },
                BehaviorSignals {
                    previous_messages_approved,
                    previous_messages_blocked,
                    messages_in_last_hour,
                    ..Default::default()
                },
                NetworkSignals {
                    spam_db_similarity,
                    duplicate_messages_in_other_groups,
                    is_in_global_blocklist,
                    ..Default::default()
                },
            )
            .unwrap();

            let result = calc.calculate(&signals, trust_level);
            prop_assert!(result.score <= 100);
        }
    }
}
