//! Weight tables, thresholds, vocabularies and regex sources for the risk
//! scoring pipeline.
//!
//! Every numeric default here is carried over from
//! `saqshy/core/risk_calculator.py`'s `.get(key, default)` calls (the
//! `constants.py` module that originally defined these dicts was not part of
//! the retrieval pack, so its defaults are the intended constants — Python's
//! `dict.get(key, default)` falls through to `default` whenever the dict is
//! unpopulated, which is the situation observed here). Vocabulary lists
//! (`CRYPTO_TERMS`, regex sources) are ported from `analyzers/profile.py` and
//! `analyzers/content.py`. `CRYPTO_SCAM_PHRASES`/`ALLOWED_SHORTENERS`/
//! `SUSPICIOUS_TLDS`/`WHITELIST_DOMAINS_*` were referenced by
//! `analyzers/content.py` but defined in the un-retrieved `constants.py`; the
//! lists below are authored for this crate to the same intent and documented
//! as such in DESIGN.md.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::GroupType;

// ═══════════════════════════════════════════════════════════════════════
// WEIGHT TABLES
// ═══════════════════════════════════════════════════════════════════════

pub type WeightTable = HashMap<&'static str, i64>;

pub fn profile_weights() -> WeightTable {
    HashMap::from([
        ("account_age_under_24_hours", 25),
        ("account_age_under_7_days", 15),
        ("account_age_3_years", -15),
        ("account_age_1_year", -10),
        ("has_profile_photo", -5),
        ("no_profile_photo", 8),
        ("has_username", -3),
        ("no_username", 5),
        ("is_premium", -10),
        ("username_random_chars", 12),
        ("name_has_emoji_spam", 15),
        ("bio_has_crypto_terms", 10),
        ("bio_has_links", 8),
    ])
}

pub fn content_weights() -> WeightTable {
    HashMap::from([
        ("crypto_scam_phrase", 35),
        ("wallet_address", 20),
        ("has_urls", 5),
        ("multiple_urls_3_plus", 12),
        ("has_shortened_urls", 15),
        ("has_suspicious_tld", 18),
        ("has_whitelisted_domains", -8),
        ("excessive_caps_80_percent", 15),
        ("excessive_caps_50_percent", 8),
        ("excessive_emoji_20_plus", 18),
        ("excessive_emoji_10_plus", 10),
        ("money_pattern", 12),
        ("urgency_pattern", 10),
        ("phone_number", 8),
        ("is_forward_from_channel", 12),
        ("is_forward", 5),
    ])
}

pub fn behavior_weights() -> WeightTable {
    HashMap::from([
        ("previous_messages_approved_10_plus", -15),
        ("previous_messages_approved_5_plus", -10),
        ("previous_messages_approved_1_plus", -5),
        ("is_reply", -3),
        ("is_reply_to_admin", -5),
        ("group_member_90_days", -15),
        ("group_member_30_days", -10),
        ("group_member_7_days", -5),
        ("is_first_message", 8),
        ("ttfm_under_30_seconds", 15),
        ("ttfm_under_5_minutes", 8),
        ("join_to_message_under_10_seconds", 18),
        ("messages_in_hour_10_plus", 20),
        ("messages_in_hour_5_plus", 12),
        ("previous_messages_blocked", 25),
        ("previous_messages_flagged", 15),
    ])
}

pub fn network_weights() -> WeightTable {
    HashMap::from([
        ("is_in_global_whitelist", -30),
        ("is_in_global_blocklist", 50),
        ("spam_db_similarity_0.95_plus", 50),
        ("spam_db_similarity_0.88_plus", 45),
        ("spam_db_similarity_0.80_plus", 35),
        ("spam_db_similarity_0.70_plus", 25),
        ("duplicate_in_5_plus_groups", 50),
        ("duplicate_in_3_groups", 35),
        ("duplicate_in_2_groups", 20),
        ("blocked_in_other_groups", 40),
        ("flagged_in_other_groups", 25),
        ("groups_in_common_5_plus", -5),
    ])
}

/// DEALS groups tolerate more commercial/URL-heavy content than GENERAL.
pub fn deals_weight_overrides() -> WeightTable {
    HashMap::from([
        ("has_urls", 2),
        ("multiple_urls_3_plus", 5),
        ("has_shortened_urls", 5),
        ("money_pattern", 4),
        ("urgency_pattern", 4),
    ])
}

/// CRYPTO groups: wallet addresses and crypto terms are expected content.
pub fn crypto_weight_overrides() -> WeightTable {
    HashMap::from([("wallet_address", 5), ("crypto_scam_phrase", 40)])
}

/// TECH groups: links to docs/repos are routine, shorteners less so.
pub fn tech_weight_overrides() -> WeightTable {
    HashMap::from([("has_urls", 1), ("has_shortened_urls", 18)])
}

// ═══════════════════════════════════════════════════════════════════════
// THRESHOLDS — (watch, limit, review, block) per group type (§4.1)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub watch: i64,
    pub limit: i64,
    pub review: i64,
    pub block: i64,
}

pub fn thresholds_for(group_type: GroupType) -> Thresholds {
    match group_type {
        GroupType::General | GroupType::Tech => Thresholds {
            watch: 30,
            limit: 50,
            review: 75,
            block: 92,
        },
        GroupType::Deals => Thresholds {
            watch: 40,
            limit: 60,
            review: 80,
            block: 95,
        },
        GroupType::Crypto => Thresholds {
            watch: 25,
            limit: 45,
            review: 70,
            block: 90,
        },
    }
}

/// Gray zone: scores in this (inclusive) range are routed to the LLM
/// adjudicator before a final verdict is committed (§4.3, §9).
pub const LLM_GRAY_ZONE: (u8, u8) = (60, 80);

/// Maximum magnitude a single weight may have before `RiskCalculator::new`
/// refuses to build (risk_calculator.py `_validate_weights`).
pub const MAX_WEIGHT_MAGNITUDE: i64 = 100;

// ═══════════════════════════════════════════════════════════════════════
// PROFILE ANALYZER VOCABULARY (analyzers/profile.py)
// ═══════════════════════════════════════════════════════════════════════

pub static RANDOM_USERNAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^user[_]?\d{5,}$").unwrap(),
        Regex::new(r"(?i)^[a-z]{2,8}\d{6,}$").unwrap(),
        Regex::new(r"(?i)^[a-z]{1,3}_\d{5,}$").unwrap(),
        Regex::new(r"(?i)^[a-f0-9]{10,}$").unwrap(),
        Regex::new(r"^[A-Z][a-z]+\d{5,}$").unwrap(),
        Regex::new(r"(?i)^\d{2,}[a-z]+\d{2,}$").unwrap(),
        Regex::new(r"(?i)^[a-z]{18,}$").unwrap(),
    ]
});

/// Minimum digit-to-length ratio for a name of at least [`RANDOM_USERNAME_MIN_LEN_FOR_DIGIT_RATIO`]
/// characters to count as "random" (profile.py's mixed-letter-and-digit
/// catch-all). `regex`'s engine has no lookaround, so this tier is a plain
/// character count rather than a pattern (see `username_has_random_chars`).
pub const RANDOM_USERNAME_DIGIT_RATIO: f64 = 0.6;
pub const RANDOM_USERNAME_MIN_LEN_FOR_DIGIT_RATIO: usize = 8;

pub static CRYPTO_TERMS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "btc", "bitcoin", "eth", "ethereum", "usdt", "bnb", "sol", "solana", "xrp", "doge",
        "shib", "ada", "cardano", "avax", "matic", "ltc", "crypto", "defi", "nft", "token",
        "airdrop", "staking", "hodl", "blockchain", "web3", "dao", "yield", "trading", "trader",
        "invest", "investor", "profit", "forex", "signal", "portfolio", "roi", "binance",
        "coinbase", "kraken", "metamask", "trustwallet", "wallet", "exchange", "криптовалюта",
        "биткоин", "эфир", "трейдинг", "инвест",
    ]
});

pub static BIO_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://\S+|www\.\S+|t\.me/\S+|\w+\.(com|ru|org|net|io|me|cc|xyz|link|top)\b")
        .unwrap()
});

/// Emoji ranges shared by both analyzers, expressed as a Rust char-class.
pub static EMOJI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{1F700}-\u{1F77F}\u{1F780}-\u{1F7FF}\u{1F800}-\u{1F8FF}\u{1F900}-\u{1F9FF}\u{1FA00}-\u{1FA6F}\u{1FA70}-\u{1FAFF}\u{2702}-\u{27B0}\u{24C2}-\u{1F251}\u{1F1E0}-\u{1F1FF}\u{2600}-\u{26FF}\u{2700}-\u{27BF}]\u{FE0F}?",
    )
    .unwrap()
});

/// Five scam emoji clusters: 2+ from the same cluster in a name is a signal
/// (profile.py `SCAM_EMOJI_CLUSTERS`). A single emoji, or emojis spread
/// across clusters, is normal and scores nothing.
pub static SCAM_EMOJI_CLUSTERS: Lazy<Vec<Vec<char>>> = Lazy::new(|| {
    vec![
        // money / pump
        vec!['💰', '🚀', '📈', '💵', '💸', '🤑', '💲'],
        // fake giveaway / prize
        vec!['🎁', '🎉', '🏆', '🎊', '🥇', '🎯', '✨'],
        // urgency / warning
        vec!['⚠', '🔴', '❗', '‼', '❌', '🚨', '⛔'],
        // fake verification / trust
        vec!['✅', '💯', '🔒', '✔', '🛡', '👍', '🔐'],
        // fire / hot deal
        vec!['🔥', '💥', '⚡', '💎', '🌟', '⭐', '★'],
    ]
});

/// (max_user_id_exclusive, estimated_age_days), ordered ascending by id — the
/// first bucket the id falls under wins (profile.py `USER_ID_AGE_THRESHOLDS`).
pub const USER_ID_AGE_THRESHOLDS: &[(i64, i64)] = &[
    (100_000_000, 3650),
    (500_000_000, 2555),
    (1_000_000_000, 1825),
    (2_000_000_000, 1095),
    (3_500_000_000, 730),
    (5_000_000_000, 365),
    (6_000_000_000, 180),
    (6_500_000_000, 90),
    (7_000_000_000, 30),
    (7_500_000_000, 14),
];

pub const DEFAULT_NEW_ACCOUNT_DAYS: i64 = 7;

// ═══════════════════════════════════════════════════════════════════════
// CONTENT ANALYZER VOCABULARY (analyzers/content.py)
// ═══════════════════════════════════════════════════════════════════════

pub static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s<>\[\]()"'{}|\\^`]+|www\.[^\s<>\[\]()"'{}|\\^`]+|[a-zA-Z0-9][-a-zA-Z0-9]*\.[a-zA-Z]{2,}(?:/[^\s<>\[\]()"'{}|\\^`]*)?"#,
    )
    .unwrap()
});

pub static KNOWN_SHORTENERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "bit.ly",
        "goo.gl",
        "tinyurl.com",
        "t.co",
        "ow.ly",
        "is.gd",
        "buff.ly",
        "j.mp",
        "tr.im",
        "su.pr",
        "cli.gs",
        "short.to",
        "cutt.ly",
        "rb.gy",
        "shorturl.at",
        "rebrand.ly",
        "adf.ly",
        "clck.ru",
        "fas.st",
        "got.by",
        "ali.ski",
        "s.click.aliexpress.com",
        "trk.mail.ru",
        "amzn.to",
    ]
});

/// Subset of `KNOWN_SHORTENERS` considered acceptable in DEALS groups
/// (affiliate link shorteners), per `content.py::_check_shortened_urls`.
pub static ALLOWED_SHORTENERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "clck.ru",
        "fas.st",
        "got.by",
        "ali.ski",
        "s.click.aliexpress.com",
        "trk.mail.ru",
        "amzn.to",
    ]
});

/// TLDs that register cheaply and attract spam/phishing campaigns; authored
/// for this crate (not retrieved from `constants.py`).
pub static SUSPICIOUS_TLDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        ".xyz", ".top", ".club", ".work", ".click", ".link", ".loan", ".win", ".bid", ".men",
        ".download", ".racing", ".review", ".stream", ".party",
    ]
});

pub static WHITELIST_DOMAINS_GENERAL: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["telegram.org", "t.me", "wikipedia.org", "youtube.com"]);

pub static WHITELIST_DOMAINS_TECH: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "github.com",
        "gitlab.com",
        "stackoverflow.com",
        "docs.rs",
        "crates.io",
        "rust-lang.org",
        "readthedocs.io",
        "npmjs.com",
    ]
});

pub static WHITELIST_DOMAINS_DEALS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "amazon.com",
        "aliexpress.com",
        "ebay.com",
        "wildberries.ru",
        "ozon.ru",
    ]
});

/// Crypto scam phrases matched with surrounding word-boundary punctuation, the
/// same way `content.py::__init__` compiles them. Authored for this crate
/// (the phrase list itself lived in the un-retrieved `constants.py`).
pub static CRYPTO_SCAM_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "double your bitcoin",
        "guaranteed profit",
        "send btc receive",
        "risk free investment",
        "guaranteed returns",
        "investment opportunity of a lifetime",
        "elon musk giveaway",
        "crypto giveaway",
        "send eth get back",
        "100% guaranteed",
        "limited slots available",
        "private signal group",
        "pump signal",
        "financial freedom",
    ]
});

pub static MONEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\$\s?\d+(?:[.,]\d+)?(?:\s?(?:k|m|usd|usdt))?\b|\d+\s?(?:dollars?|usd|usdt)\b|(?:earn|make|get|win|receive)\s+(?:easy\s+)?money|(?:зарабо|получ|выигр)\w*\s+(?:деньги|денег)|\d+\s?(?:руб|рублей|rub)\b|\x{20bd}\s?\d+|\x{20ac}\s?\d+|\d+\s?\x{20ac}|\x{a3}\s?\d+|\d+\s?\x{a3}|\d+(?:,\d{3})*(?:\.\d{2})?\s*(?:usd|eur|rub|usdt|btc|eth)\b",
    )
    .unwrap()
});

pub static URGENCY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:limited\s+)?(?:time|spots?|offer)|act\s+now|hurry\s+up|don'?t\s+miss|last\s+chance|only\s+\d+\s+(?:left|remaining|spots?)|expires?\s+(?:soon|today|tomorrow)|urgent|quick|fast\s+(?:money|cash|profit)|(?:ограничен|успей|торопи|не\s+упусти|последний\s+шанс|срочно|быстр)",
    )
    .unwrap()
});

pub static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\+?\d{1,4}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9}|\+7\s?\(?\d{3}\)?\s?\d{3}[-\s]?\d{2}[-\s]?\d{2}|\+1\s?\(?\d{3}\)?\s?\d{3}[-\s]?\d{4}|\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b",
    )
    .unwrap()
});

pub static WALLET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[13][a-km-zA-HJ-NP-Z1-9]{25,34}\b|\bbc1[a-zA-HJ-NP-Z0-9]{25,90}\b|\b0x[a-fA-F0-9]{40}\b|\bT[A-Za-z1-9]{33}\b|\b[LM3][a-km-zA-HJ-NP-Z1-9]{26,33}\b|\bbnb1[a-z0-9]{38}\b|\b[45][0-9AB][1-9A-HJ-NP-Za-km-z]{93}\b",
    )
    .unwrap()
});

pub static CYRILLIC_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{0400}-\u{04FF}]").unwrap());
pub static LATIN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_source_table() {
        let general = thresholds_for(GroupType::General);
        assert_eq!((general.watch, general.limit, general.review, general.block), (30, 50, 75, 92));
        let deals = thresholds_for(GroupType::Deals);
        assert_eq!((deals.watch, deals.limit, deals.review, deals.block), (40, 60, 80, 95));
        let crypto = thresholds_for(GroupType::Crypto);
        assert_eq!((crypto.watch, crypto.limit, crypto.review, crypto.block), (25, 45, 70, 90));
    }

    #[test]
    fn no_weight_exceeds_max_magnitude() {
        for table in [
            profile_weights(),
            content_weights(),
            behavior_weights(),
            network_weights(),
        ] {
            for (key, value) in table {
                assert!(
                    value.abs() <= MAX_WEIGHT_MAGNITUDE,
                    "weight {key} exceeds max magnitude: {value}"
                );
            }
        }
    }

    #[test]
    fn random_username_patterns_match_telegram_default() {
        assert!(RANDOM_USERNAME_PATTERNS
            .iter()
            .any(|re| re.is_match("user123456")));
    }
}
