use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"(?u)[\p{L}\p{N}]+").expect("valid regex");
}

/// Turns raw query text into lexicon-comparable tokens: NFKC, lowercase,
/// punctuation stripped. Stop words and lemmas are left alone; documents
/// arrive already cleaned, and the same folding is enough to match them.
pub fn normalize_query(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    WORD.find_iter(&normalized).map(|m| m.as_str().to_string()).collect()
}

/// Normalizes an autocomplete prefix the same way, keeping it as one string.
pub fn normalize_prefix(prefix: &str) -> String {
    normalize_query(prefix).concat()
}
