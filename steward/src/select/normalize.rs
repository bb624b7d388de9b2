//! Query normalization for cache keys and feedback matching.
//!
//! Lowercases, strips punctuation, collapses whitespace, then expands common
//! contractions and greeting synonyms so near-identical phrasings share one
//! classification cache entry.

use once_cell::sync::Lazy;

/// Synonym table applied after punctuation stripping (so contraction keys
/// are apostrophe-free). Multi-word phrases come first: a phrase must win
/// over its prefix word.
static SYNONYMS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("hows it going", "how are you"),
        ("whats up", "how are you"),
        ("good morning", "hello"),
        ("good afternoon", "hello"),
        ("good evening", "hello"),
        ("hi there", "hello"),
        ("whats", "what is"),
        ("whatre", "what are"),
        ("hows", "how is"),
        ("howre", "how are"),
        ("im", "i am"),
        ("its", "it is"),
        ("thats", "that is"),
        ("theres", "there is"),
        ("heres", "here is"),
        ("wheres", "where is"),
        ("whos", "who is"),
        ("sup", "how are you"),
        ("hey", "hello"),
        ("hi", "hello"),
    ]
});

/// Normalizes a query for cache keys and fuzzy matching.
pub fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase();

    // Strip punctuation, keep word characters and whitespace.
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    // Collapse whitespace.
    let mut words: Vec<String> = stripped
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();

    // Phrase synonyms first (on the joined string), then word synonyms.
    let mut joined = words.join(" ");
    for (from, to) in SYNONYMS.iter().filter(|(f, _)| f.contains(' ')) {
        if joined.contains(from) {
            joined = joined.replace(from, to);
        }
    }
    words = joined.split_whitespace().map(|w| w.to_string()).collect();
    for word in &mut words {
        if let Some((_, to)) = SYNONYMS
            .iter()
            .filter(|(f, _)| !f.contains(' '))
            .find(|(f, _)| f == word)
        {
            *word = to.to_string();
        }
    }

    words.join(" ")
}
