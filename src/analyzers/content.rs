//! Pure text signal extraction (§4.2 ContentAnalyzer), ported from
//! `analyzers/content.py`.

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::constants::{
    ALLOWED_SHORTENERS, CRYPTO_SCAM_PHRASES, CYRILLIC_PATTERN, EMOJI_PATTERN, KNOWN_SHORTENERS,
    LATIN_PATTERN, MONEY_PATTERN, PHONE_PATTERN, SUSPICIOUS_TLDS, URGENCY_PATTERN, URL_PATTERN,
    WALLET_PATTERN, WHITELIST_DOMAINS_DEALS, WHITELIST_DOMAINS_GENERAL, WHITELIST_DOMAINS_TECH,
};
use crate::error::Result;
use crate::signals::ContentSignals;
use crate::types::{GroupType, MessageContext};

use super::Analyzer;

#[derive(Debug, Default)]
pub struct ContentAnalyzer;

#[async_trait]
impl Analyzer for ContentAnalyzer {
    type Output = ContentSignals;

    fn name(&self) -> &'static str {
        "content"
    }

    async fn analyze(&self, context: &MessageContext) -> Result<ContentSignals> {
        let text = context.text.as_deref().unwrap_or("");
        let domains = extract_domains(text);
        let unique_domains: HashSet<&str> = domains.iter().map(String::as_str).collect();

        let caps_ratio = caps_ratio(text);
        let phone_digits_ok = PHONE_PATTERN
            .find_iter(text)
            .any(|m| matches!(digit_count(m.as_str()), 7..=15));

        Ok(ContentSignals {
            text_length: text.chars().count(),
            word_count: text.split_whitespace().count(),
            caps_ratio,
            emoji_count: EMOJI_PATTERN.find_iter(text).count(),
            has_cyrillic: CYRILLIC_PATTERN.is_match(text),
            has_latin: LATIN_PATTERN.is_match(text),
            language: detect_language(text),

            url_count: domains.len(),
            has_shortened_urls: has_shortened_urls(&domains, context.group_type),
            has_whitelisted_urls: has_whitelisted_urls(&unique_domains, context.group_type),
            has_suspicious_tld: has_suspicious_tld(&unique_domains),
            unique_domains: unique_domains.len(),

            has_crypto_scam_phrases: has_crypto_scam_phrases(text),
            has_money_patterns: MONEY_PATTERN.is_match(text),
            has_urgency_patterns: URGENCY_PATTERN.is_match(text),
            has_phone_numbers: phone_digits_ok,
            has_wallet_addresses: WALLET_PATTERN.is_match(text),

            has_media: context.has_media,
            has_forward: context.is_forward,
            forward_from_channel: is_forward_from_channel(context),
        }
        .validate()?)
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

fn caps_ratio(text: &str) -> f64 {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

/// Ports `content.py`'s `_detect_language` exactly: a >0.7 ratio threshold
/// decides `"ru"`/`"en"` outright; below that, mixed scripts fall back to
/// `"mixed"` rather than picking a winner by raw count.
fn detect_language(text: &str) -> String {
    if text.is_empty() {
        return "unknown".to_string();
    }

    let cyrillic_count = CYRILLIC_PATTERN.find_iter(text).count();
    let latin_count = LATIN_PATTERN.find_iter(text).count();
    let has_cyrillic = cyrillic_count > 0;
    let has_latin = latin_count > 0;

    if cyrillic_count == 0 && latin_count == 0 {
        return "unknown".to_string();
    }

    let total = (cyrillic_count + latin_count) as f64;
    if cyrillic_count as f64 / total > 0.7 {
        "ru".to_string()
    } else if latin_count as f64 / total > 0.7 {
        "en".to_string()
    } else if has_cyrillic && has_latin {
        "mixed".to_string()
    } else if has_cyrillic {
        "ru".to_string()
    } else {
        "en".to_string()
    }
}

/// Extracts every URL/bare-domain occurrence, normalizing `www.` prefix and
/// port, and tolerating a missing scheme (content.py `_extract_domains`).
fn extract_domains(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|m| normalize_domain(m.as_str()))
        .collect()
}

fn normalize_domain(raw: &str) -> Option<String> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let parsed = Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    Some(host.to_lowercase())
}

fn has_shortened_urls(domains: &[String], group_type: GroupType) -> bool {
    let allowed: HashSet<&str> = if group_type == GroupType::Deals {
        ALLOWED_SHORTENERS.iter().copied().collect()
    } else {
        HashSet::new()
    };
    domains
        .iter()
        .any(|d| KNOWN_SHORTENERS.contains(&d.as_str()) && !allowed.contains(d.as_str()))
}

fn whitelist_for(group_type: GroupType) -> &'static [&'static str] {
    match group_type {
        GroupType::General => WHITELIST_DOMAINS_GENERAL.as_slice(),
        GroupType::Tech => WHITELIST_DOMAINS_TECH.as_slice(),
        GroupType::Deals => WHITELIST_DOMAINS_DEALS.as_slice(),
        GroupType::Crypto => WHITELIST_DOMAINS_GENERAL.as_slice(),
    }
}

fn has_whitelisted_urls(domains: &HashSet<&str>, group_type: GroupType) -> bool {
    let whitelist = whitelist_for(group_type);
    domains.iter().any(|d| whitelist.contains(d))
}

fn has_suspicious_tld(domains: &HashSet<&str>) -> bool {
    domains
        .iter()
        .any(|d| SUSPICIOUS_TLDS.iter().any(|tld| d.ends_with(tld)))
}

/// Compiled once: each scam phrase anchored with word boundaries so a bare
/// substring like "bitcoin" inside "bitcoin" never matches "double your
/// bitcoin" unless the whole phrase is present (content.py
/// `_check_crypto_scam_phrases`, which compiles the same way at `__init__`).
static CRYPTO_SCAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    CRYPTO_SCAM_PHRASES
        .iter()
        .map(|phrase| {
            let escaped = regex::escape(phrase).replace(r"\ ", r"\s+");
            Regex::new(&format!(r"(?i)\b{escaped}\b")).unwrap()
        })
        .collect()
});

fn has_crypto_scam_phrases(text: &str) -> bool {
    CRYPTO_SCAM_PATTERNS.iter().any(|re| re.is_match(text))
}

/// `raw_message.forward_from_chat.type == "channel"` (content.py
/// `_is_forward_from_channel`).
fn is_forward_from_channel(context: &MessageContext) -> bool {
    context
        .raw_message
        .get("forward_from_chat")
        .and_then(|chat| chat.get("type"))
        .and_then(|t| t.as_str())
        == Some("channel")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str, group_type: GroupType) -> MessageContext {
        MessageContext::new(1, 100, 42, Some(text.to_string()), group_type)
    }

    #[tokio::test]
    async fn bare_bitcoin_word_does_not_trigger_scam_phrase() {
        let analyzer = ContentAnalyzer;
        let signals = analyzer
            .analyze(&ctx("I own some bitcoin", GroupType::General))
            .await
            .unwrap();
        assert!(!signals.has_crypto_scam_phrases);
    }

    #[tokio::test]
    async fn exact_scam_phrase_triggers() {
        let analyzer = ContentAnalyzer;
        let signals = analyzer
            .analyze(&ctx("guaranteed profit every day!", GroupType::General))
            .await
            .unwrap();
        assert!(signals.has_crypto_scam_phrases);
    }

    #[tokio::test]
    async fn shortened_url_flagged_outside_deals() {
        let analyzer = ContentAnalyzer;
        let signals = analyzer
            .analyze(&ctx("check this out bit.ly/abc123", GroupType::General))
            .await
            .unwrap();
        assert!(signals.has_shortened_urls);
    }

    #[tokio::test]
    async fn allowed_shortener_not_flagged_in_deals() {
        let analyzer = ContentAnalyzer;
        let signals = analyzer
            .analyze(&ctx("deal at amzn.to/xyz", GroupType::Deals))
            .await
            .unwrap();
        assert!(!signals.has_shortened_urls);
    }

    #[tokio::test]
    async fn www_prefix_and_port_are_normalized() {
        let domains = extract_domains("visit www.Example.com:8080/path now");
        assert_eq!(domains, vec!["example.com".to_string()]);
    }

    #[tokio::test]
    async fn phone_with_too_few_digits_is_not_flagged() {
        let analyzer = ContentAnalyzer;
        let signals = analyzer.analyze(&ctx("call 12-3", GroupType::General)).await.unwrap();
        assert!(!signals.has_phone_numbers);
    }

    #[test]
    fn caps_ratio_ignores_non_letters() {
        assert!((caps_ratio("ABC 123!!!") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn language_detection_prefers_dominant_script() {
        assert_eq!(detect_language("hello there friend"), "en");
        assert_eq!(detect_language("привет как дела"), "ru");
    }

    #[test]
    fn language_detection_falls_back_to_mixed_below_threshold() {
        assert_eq!(detect_language("привет hello мир world foo"), "mixed");
    }

    #[test]
    fn language_detection_handles_no_letters() {
        assert_eq!(detect_language("12345 !!!"), "unknown");
    }
}
