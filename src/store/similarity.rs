//! Trigram similarity with `pg_trgm` semantics, used by the in-memory store
//! for typo-tolerant medication lookup.

use std::collections::BTreeSet;

/// Candidates must score strictly above this.
pub const SIMILARITY_THRESHOLD: f64 = 0.3;

/// Maximum number of fuzzy candidates returned.
pub const MAX_FUZZY_CANDIDATES: usize = 5;

/// Trigram set of `text`.
///
/// Each alphanumeric word is lowercased and padded with two leading spaces
/// and one trailing space before being split into three-character windows.
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word.to_lowercase()).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Shared trigrams over the union of both sets, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_words_score_one() {
        assert!((similarity("Ibuprofen", "ibuprofen") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_typo_stays_above_threshold() {
        // 8 shared of 13 distinct trigrams
        let score = similarity("iburprofen", "Ibuprofen");
        assert!((score - 8.0 / 13.0).abs() < 1e-9);
        assert!(score > SIMILARITY_THRESHOLD);
    }

    #[test]
    fn shared_suffix_alone_is_below_threshold() {
        assert!(similarity("iburprofen", "Nurofen") < SIMILARITY_THRESHOLD);
    }

    #[test]
    fn punctuation_only_input_scores_zero() {
        assert!(trigrams("@#$%").is_empty());
        assert_eq!(similarity("@#$%", "Nurofen"), 0.0);
    }

    #[test]
    fn words_are_padded_independently() {
        let set = trigrams("ab cd");
        assert!(set.contains("  a"));
        assert!(set.contains("  c"));
        assert!(set.contains("ab "));
        assert!(!set.contains("b c"));
    }
}
