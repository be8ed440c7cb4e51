//! Text agreement between two extractions of the same page.
//!
//! Both sides are normalised first (ligatures expanded, whitespace collapsed,
//! lowercased) so that cosmetic differences between a native text layer and
//! OCR output do not count as disagreement. The score is `1 - WER` over the
//! normalised words, clamped to `[0, 1]`.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const LIGATURES: [(&str, &str); 5] = [
    ("\u{FB00}", "ff"),
    ("\u{FB01}", "fi"),
    ("\u{FB02}", "fl"),
    ("\u{FB03}", "ffi"),
    ("\u{FB04}", "ffl"),
];

/// Canonical form used for comparison.
pub fn normalize(text: &str) -> String {
    let mut out = text.to_string();
    for (lig, plain) in LIGATURES {
        if out.contains(lig) {
            out = out.replace(lig, plain);
        }
    }
    WHITESPACE.replace_all(out.trim(), " ").to_lowercase()
}

/// Similarity of `hypothesis` to `reference` in `[0, 1]`.
///
/// `None` when the reference has no words: agreement with nothing is not
/// measurable.
pub fn similarity(reference: &str, hypothesis: &str) -> Option<f64> {
    let reference = normalize(reference);
    let hypothesis = normalize(hypothesis);
    let ref_words: Vec<&str> = reference.split(' ').filter(|w| !w.is_empty()).collect();
    if ref_words.is_empty() {
        return None;
    }
    let hyp_words: Vec<&str> = hypothesis.split(' ').filter(|w| !w.is_empty()).collect();
    let distance = strsim::generic_levenshtein(&ref_words, &hyp_words);
    let wer = distance as f64 / ref_words.len() as f64;
    Some((1.0 - wer).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(similarity("The quick brown fox", "The quick brown fox"), Some(1.0));
    }

    #[test]
    fn normalisation_ignores_case_whitespace_and_ligatures() {
        assert_eq!(normalize("  Of\u{FB01}ce\n\tHOURS "), "office hours");
        assert_eq!(similarity("of\u{FB01}ce hours", "OFFICE   hours"), Some(1.0));
    }

    #[test]
    fn one_substitution_in_four_words() {
        let s = similarity("a b c d", "a x c d").unwrap();
        assert!((s - 0.75).abs() < 1e-9);
    }

    #[test]
    fn insertions_and_deletions_count_as_word_errors() {
        let dropped = similarity("alpha beta gamma delta", "alpha gamma delta").unwrap();
        assert!((dropped - 0.75).abs() < 1e-9);
        let extra = similarity("alpha beta", "alpha noise beta").unwrap();
        assert!((extra - 0.5).abs() < 1e-9);
    }

    #[test]
    fn garbage_hypothesis_clamps_to_zero() {
        let s = similarity("one", "lots of unrelated words here").unwrap();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn empty_reference_is_unmeasurable() {
        assert_eq!(similarity("   ", "anything"), None);
        assert_eq!(similarity("text", ""), Some(0.0));
    }
}
