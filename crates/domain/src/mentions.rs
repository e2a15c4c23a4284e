//! `@mention` extraction (spec §4.2, §8).
//!
//! Shared between `relay-engagement` (engagement detection) and
//! `relay-context` (rendering mentions back for prompts) so the regex and
//! its edge cases live in exactly one place.

use regex::Regex;
use std::sync::OnceLock;

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^a-zA-Z0-9])@([a-zA-Z0-9_-]+)").expect("static mention regex")
    })
}

/// Tokenizes `@username` mentions. Case preserved; callers compare
/// case-insensitively. A trailing run of hyphens does not capture a
/// phantom empty mention — `[a-zA-Z0-9_-]+` requires at least one char,
/// and `@relay-bot-admin` never yields `relay-bot` (no partial matches).
pub fn extract_mentions(text: &str) -> std::collections::HashSet<String> {
    mention_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Case-insensitive membership check used by the engagement rule "if the
/// service account username appears".
pub fn mentions_username(text: &str, username: &str) -> bool {
    let lower = username.to_lowercase();
    extract_mentions(text)
        .iter()
        .any(|m| m.to_lowercase() == lower)
}
