//! Text helpers shared by normalization, clustering and the extractive fallback.

use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Upper bound on cleaned article text, in chars.
pub const MAX_CLEAN_CHARS: usize = 8_000;
const MAX_ENTITIES: usize = 20;

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|</?[^>]+>").unwrap())
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn re_entity() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").unwrap())
}

/// Decode entities, strip markup, fold typographic quotes, collapse whitespace
/// and cap the length.
pub fn clean_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    // Decoding first means escaped markup (`&lt;b&gt;`) is stripped too.
    let stripped = re_tags().replace_all(&decoded, " ");

    let folded = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    let out = re_ws().replace_all(&folded, " ");
    let out = out.trim();
    if out.chars().count() > MAX_CLEAN_CHARS {
        out.chars().take(MAX_CLEAN_CHARS).collect()
    } else {
        out.to_string()
    }
}

/// Lowercase, whitespace-collapsed form used for fingerprints and title matching.
pub fn fold(s: &str) -> String {
    re_ws().replace_all(s.trim(), " ").to_lowercase()
}

/// Hex SHA-256 of the folded title and body.
pub fn fingerprint(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fold(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(fold(body).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// First `n` sentences. A sentence ends at `.`, `!` or `?` followed by whitespace.
pub fn lead_sentences(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let mut found = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    found += 1;
                    if found == n {
                        return text[..i + c.len_utf8()].trim().to_string();
                    }
                }
            }
        }
    }
    text.trim().to_string()
}

/// Keep the first `max_words` words, marking the cut with `...`.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    let mut out = words[..max_words].join(" ");
    out.push_str("...");
    out
}

/// Capitalized multi-word phrases, most frequent first.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for m in re_entity().find_iter(text) {
        let name = m.as_str().trim();
        if name.len() <= 3 {
            continue;
        }
        let key = name.to_lowercase();
        if !counts.contains_key(&key) {
            order.push(name.to_string());
        }
        *counts.entry(key).or_insert(0) += 1;
    }
    // Stable sort keeps first-seen order among equal counts.
    order.sort_by(|a, b| {
        let ca = counts.get(&a.to_lowercase()).copied().unwrap_or(0);
        let cb = counts.get(&b.to_lowercase()).copied().unwrap_or(0);
        cb.cmp(&ca)
    });
    order.truncate(MAX_ENTITIES);
    order
}
