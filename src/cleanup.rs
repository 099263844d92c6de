//! OCR text cleanup.
//!
//! Applies a fixed table of known OCR misreads, then fuzzy-corrects the
//! remaining alphabetic tokens against the target language's keyword set.
//! Deliberately conservative: numbers, operators and mixed tokens are never
//! rewritten, so literals and punctuation survive untouched.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Known OCR misreads with exact, case-sensitive replacements.
static OCR_FIXES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("prinf", "printf"),
        ("retunr", "return"),
        ("Retrun", "Return"),
        ("fucntion", "function"),
        ("funtcion", "function"),
        ("flase", "false"),
        ("Flase", "False"),
        ("ture", "true"),
        ("Ture", "True"),
    ])
});

/// Reserved words per language, used only for fuzzy correction.
static KEYWORDS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([(
        "python",
        vec![
            "def", "return", "print", "for", "while", "if", "elif", "else", "import",
            "from", "class", "try", "except", "finally", "with", "as", "raise", "assert",
            "yield", "lambda", "global", "nonlocal", "pass", "break", "continue", "in", "is",
        ],
    )])
});

/// Alternating word / non-word runs; non-word runs pass through unchanged.
static TOKEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|\W+").expect("static regex"));

/// Similarity below this leaves a token alone.
const FUZZY_CUTOFF: f64 = 0.85;

/// Clean raw OCR output line by line, preserving line structure.
pub fn clean_ocr_text(text: &str, lang: &str) -> String {
    text.lines()
        .map(|line| clean_line(line, lang))
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean_line(line: &str, lang: &str) -> String {
    let mut cleaned = String::with_capacity(line.len());
    for run in TOKEN_RUNS.find_iter(line) {
        let token = run.as_str();
        if let Some(fix) = OCR_FIXES.get(token) {
            cleaned.push_str(fix);
        } else if is_alphabetic(token) {
            match KEYWORDS.get(lang).and_then(|words| closest_keyword(token, words)) {
                Some(keyword) => cleaned.push_str(keyword),
                None => cleaned.push_str(token),
            }
        } else {
            cleaned.push_str(token);
        }
    }
    cleaned
}

fn is_alphabetic(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_alphabetic())
}

/// Best single keyword at or above the similarity cutoff.
fn closest_keyword(token: &str, keywords: &[&'static str]) -> Option<&'static str> {
    let mut best: Option<(&'static str, f64)> = None;
    for keyword in keywords {
        let score = similarity(token, keyword);
        if score >= FUZZY_CUTOFF && best.map_or(true, |(_, prev)| score > prev) {
            best = Some((keyword, score));
        }
    }
    best.map(|(keyword, _)| keyword)
}

/// Normalized Levenshtein similarity in `[0, 1]`.
///
/// Also used by the history store to score prior questions against the
/// current one.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }
    let distance = levenshtein(&a_chars, &b_chars);
    1.0 - distance as f64 / a_chars.len().max(b_chars.len()) as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_typo_fix() {
        assert_eq!(clean_ocr_text("retunr x", "python"), "return x");
    }

    #[test]
    fn test_typo_fix_is_case_sensitive() {
        assert_eq!(clean_ocr_text("Flase", "python"), "False");
        assert_eq!(clean_ocr_text("flase", "python"), "false");
    }

    #[test]
    fn test_fuzzy_correction_above_cutoff() {
        // distance 1 over length 8 -> 0.875
        assert_eq!(clean_ocr_text("nonlocak", "python"), "nonlocal");
    }

    #[test]
    fn test_fuzzy_correction_below_cutoff_is_untouched() {
        // distance 1 over length 4 -> 0.75, too far from "def"
        assert_eq!(clean_ocr_text("defx", "python"), "defx");
    }

    #[test]
    fn test_unknown_language_is_untouched() {
        assert_eq!(clean_ocr_text("nonlocak", "haskell"), "nonlocak");
    }

    #[test]
    fn test_non_alphabetic_tokens_pass_through() {
        let line = "x += 42 # offset_1";
        assert_eq!(clean_ocr_text(line, "python"), line);
    }

    #[test]
    fn test_line_structure_preserved() {
        let text = "def add(a, b):\n    retunr a + b";
        assert_eq!(clean_ocr_text(text, "python"), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn test_idempotent_on_clean_text() {
        let text = "def add(a, b):\n    return a + b\n\nprint(add(1, 2))";
        let once = clean_ocr_text(text, "python");
        let twice = clean_ocr_text(&once, "python");
        assert_eq!(once, twice);
        assert_eq!(once, text);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("return", "return"), 1.0);
        assert_eq!(similarity("", "return"), 0.0);
        assert!(similarity("retur", "return") > 0.8);
        assert!(similarity("xyz", "return") < 0.2);
    }

    #[test]
    fn test_levenshtein_known_distances() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars("abc"), &chars("abc")), 0);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
    }
}
