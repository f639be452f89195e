//! Pure profile signal extraction (§4.2 ProfileAnalyzer), ported from
//! `analyzers/profile.py`.

use async_trait::async_trait;

use crate::constants::{
    BIO_URL_PATTERN, CRYPTO_TERMS, DEFAULT_NEW_ACCOUNT_DAYS, EMOJI_PATTERN,
    RANDOM_USERNAME_DIGIT_RATIO, RANDOM_USERNAME_MIN_LEN_FOR_DIGIT_RATIO, RANDOM_USERNAME_PATTERNS,
    SCAM_EMOJI_CLUSTERS, USER_ID_AGE_THRESHOLDS,
};
use crate::error::Result;
use crate::signals::ProfileSignals;
use crate::types::MessageContext;

use super::Analyzer;

#[derive(Debug, Default)]
pub struct ProfileAnalyzer;

#[async_trait]
impl Analyzer for ProfileAnalyzer {
    type Output = ProfileSignals;

    fn name(&self) -> &'static str {
        "profile"
    }

    async fn analyze(&self, context: &MessageContext) -> Result<ProfileSignals> {
        let bio = context.raw_user_str("bio").unwrap_or_default();
        let display_name = format!(
            "{} {}",
            context.first_name.as_deref().unwrap_or(""),
            context.last_name.as_deref().unwrap_or("")
        );

        Ok(ProfileSignals {
            account_age_days: estimate_account_age_days(context.user_id),
            has_username: context.username.is_some(),
            has_profile_photo: context
                .raw_user
                .get("has_profile_photo")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            has_bio: !bio.trim().is_empty(),
            has_first_name: context.first_name.is_some(),
            has_last_name: context.last_name.is_some(),
            is_premium: context.is_premium,
            is_bot: context.is_bot,
            username_has_random_chars: context
                .username
                .as_deref()
                .map(username_has_random_chars)
                .unwrap_or(false),
            bio_has_links: BIO_URL_PATTERN.is_match(&bio),
            bio_has_crypto_terms: bio_has_crypto_terms(&bio),
            name_has_emoji_spam: name_has_emoji_spam(&display_name),
        }
        .validate()?)
    }
}

/// Telegram user IDs are assigned roughly sequentially, so an ID below a
/// given threshold implies the account predates a corresponding date
/// (profile.py `_estimate_account_age`, `USER_ID_AGE_THRESHOLDS`).
fn estimate_account_age_days(user_id: i64) -> i64 {
    for (max_id_exclusive, age_days) in USER_ID_AGE_THRESHOLDS {
        if user_id < *max_id_exclusive {
            return *age_days;
        }
    }
    DEFAULT_NEW_ACCOUNT_DAYS
}

fn username_has_random_chars(username: &str) -> bool {
    RANDOM_USERNAME_PATTERNS.iter().any(|re| re.is_match(username))
        || has_high_digit_ratio(username)
}

/// Catches mixed letter/digit handles the fixed patterns miss: names at
/// least [`RANDOM_USERNAME_MIN_LEN_FOR_DIGIT_RATIO`] chars long where more
/// than [`RANDOM_USERNAME_DIGIT_RATIO`] of characters are digits (profile.py
/// folded this into a single lookahead regex; `regex` has no lookaround, so
/// it's a plain count here).
fn has_high_digit_ratio(username: &str) -> bool {
    let len = username.chars().count();
    if len < RANDOM_USERNAME_MIN_LEN_FOR_DIGIT_RATIO {
        return false;
    }
    let digit_count = username.chars().filter(|c| c.is_ascii_digit()).count();
    (digit_count as f64 / len as f64) > RANDOM_USERNAME_DIGIT_RATIO
}

/// Word-boundary match for terms of length ≤ 3, substring match otherwise
/// (profile.py `_check_crypto_terms`: short acronyms like "eth" need a
/// boundary check to avoid matching inside unrelated words).
fn bio_has_crypto_terms(bio: &str) -> bool {
    let lowered = bio.to_lowercase();
    CRYPTO_TERMS.iter().any(|term| {
        if term.chars().count() <= 3 {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *term)
        } else {
            lowered.contains(term)
        }
    })
}

/// True if ≥3 total emojis, or ≥2 from the same scam cluster (profile.py
/// `_check_emoji_spam`).
fn name_has_emoji_spam(name: &str) -> bool {
    let total_emoji_count = EMOJI_PATTERN.find_iter(name).count();
    if total_emoji_count >= 3 {
        return true;
    }

    let cluster_chars: Vec<char> = name
        .chars()
        .filter(|c| SCAM_EMOJI_CLUSTERS.iter().flatten().any(|e| e == c))
        .collect();

    SCAM_EMOJI_CLUSTERS
        .iter()
        .any(|cluster| cluster_chars.iter().filter(|c| cluster.contains(c)).count() >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupType;

    fn ctx(user_id: i64, username: Option<&str>) -> MessageContext {
        let mut ctx = MessageContext::new(1, 100, user_id, None, GroupType::General);
        ctx.username = username.map(str::to_string);
        ctx
    }

    #[tokio::test]
    async fn old_user_id_implies_old_account() {
        let analyzer = ProfileAnalyzer;
        let signals = analyzer.analyze(&ctx(50_000_000, Some("alice"))).await.unwrap();
        assert_eq!(signals.account_age_days, 3650);
    }

    #[tokio::test]
    async fn new_user_id_implies_default_new_account_age() {
        let analyzer = ProfileAnalyzer;
        let signals = analyzer
            .analyze(&ctx(8_000_000_000, Some("alice")))
            .await
            .unwrap();
        assert_eq!(signals.account_age_days, DEFAULT_NEW_ACCOUNT_DAYS);
    }

    #[test]
    fn detects_random_username() {
        assert!(username_has_random_chars("user123456"));
        assert!(!username_has_random_chars("alice_the_builder"));
    }

    #[test]
    fn detects_high_digit_ratio_username() {
        assert!(username_has_random_chars("xy12345z"));
        assert!(!username_has_random_chars("shortd1"));
    }

    #[test]
    fn detects_crypto_terms_with_word_boundary() {
        assert!(bio_has_crypto_terms("check my eth wallet"));
        assert!(!bio_has_crypto_terms("synthetic leather goods"));
    }

    #[test]
    fn three_plain_emojis_is_spam_regardless_of_cluster() {
        assert!(name_has_emoji_spam("Cool 😀 Name 🎈 Here 🐶"));
    }

    #[test]
    fn two_same_cluster_emojis_is_spam() {
        assert!(name_has_emoji_spam("💰🚀 Crypto King"));
    }

    #[test]
    fn single_emoji_is_not_spam() {
        assert!(!name_has_emoji_spam("John 🙂"));
    }
}
