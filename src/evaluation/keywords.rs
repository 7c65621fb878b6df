use std::collections::BTreeSet;

use super::KeywordMatch;

/// Case-insensitive substring match of each expected keyword against the
/// whole snippet. An empty expectation list passes vacuously (ratio 1.0).
pub fn match_keywords(code: &str, expected: &[String]) -> KeywordMatch {
    if expected.is_empty() {
        return KeywordMatch {
            found_keywords: BTreeSet::new(),
            expected_keywords: Vec::new(),
            match_ratio: 1.0,
            any_found: true,
        };
    }

    let haystack = code.to_lowercase();
    let mut found_keywords = BTreeSet::new();
    let mut hits = 0usize;

    for keyword in expected {
        if haystack.contains(&keyword.to_lowercase()) {
            hits += 1;
            found_keywords.insert(keyword.clone());
        }
    }

    KeywordMatch {
        found_keywords,
        expected_keywords: expected.to_vec(),
        // Counted per expected entry so duplicates cannot push this past 1.0.
        match_ratio: hits as f64 / expected.len() as f64,
        any_found: hits > 0,
    }
}
