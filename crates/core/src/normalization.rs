use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

static POSSESSIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)['’]s$").expect("valid possessive pattern"));

static STOPWORDS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing",
        "down", "during", "each", "either", "else", "etc", "even", "ever", "every", "few",
        "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
        "herself", "him", "himself", "his", "how", "however", "i", "if", "in", "into", "is",
        "it", "its", "itself", "just", "let", "like", "may", "me", "might", "more", "most",
        "much", "must", "my", "myself", "no", "nor", "not", "now", "of", "off", "often", "on",
        "once", "one", "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own",
        "per", "rather", "same", "see", "shall", "she", "should", "so", "some", "such", "than",
        "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these",
        "they", "this", "those", "though", "through", "thus", "to", "too", "under", "until",
        "up", "upon", "us", "use", "used", "uses", "using", "very", "via", "was", "way", "we",
        "well", "were", "what", "when", "where", "whether", "which", "while", "who", "whom",
        "why", "will", "with", "within", "without", "would", "yet", "you", "your", "yours",
        "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HyphenationMode {
    #[default]
    Merge,
    Preserve,
}

pub fn normalize_line(line: &str) -> String {
    let trimmed = line.trim_matches(|c: char| c.is_control() || c.is_whitespace());
    let nfkc = trimmed.nfkc().collect::<String>();
    let mut result = String::with_capacity(nfkc.len());
    let mut prev_space = false;
    for ch in nfkc.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else if ch.is_control() {
            continue;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result.trim().to_string()
}

/// Flattens a unit's (possibly multi-line) text into one normalized line,
/// re-joining words hyphenated across line breaks when `mode` is `Merge`.
pub fn normalize_text(text: &str, mode: HyphenationMode) -> String {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let merged = match mode {
        HyphenationMode::Merge => merge_hyphenation(&lines),
        HyphenationMode::Preserve => lines,
    };
    let joined = merged
        .iter()
        .map(|line| normalize_line(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    normalize_line(&joined)
}

fn merge_hyphenation(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut carry = String::new();
    for line in lines {
        let current = if carry.is_empty() {
            line.clone()
        } else {
            let mut combined = carry.clone();
            combined.push_str(line.trim_start());
            combined
        };
        let trimmed = current.trim_end().to_string();
        if trimmed.ends_with('-') && trimmed.len() > 1 {
            carry = trimmed.trim_end_matches('-').to_string();
            continue;
        }
        out.push(current);
        carry.clear();
    }
    if !carry.is_empty() {
        out.push(carry);
    }
    out
}

fn is_apostrophe(ch: char) -> bool {
    ch == '\'' || ch == '’'
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || is_apostrophe(ch)
}

/// Splits text into phrase segments: runs of words not interrupted by
/// clause punctuation. Hyphens and whitespace separate words but keep the
/// segment open, so "duck-typing" yields the words `duck`, `typing`.
pub fn segments(text: &str, mode: HyphenationMode) -> Vec<Vec<String>> {
    let line = normalize_text(text, mode);
    let mut segments = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut word = String::new();
    for ch in line.chars() {
        if is_word_char(ch) {
            word.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            flush_word(&mut word, &mut current);
        } else {
            flush_word(&mut word, &mut current);
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        }
    }
    flush_word(&mut word, &mut current);
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn flush_word(word: &mut String, current: &mut Vec<String>) {
    if let Some(clean) = clean_word(word) {
        current.push(clean);
    }
    word.clear();
}

fn clean_word(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches(is_apostrophe);
    let without_possessive = POSSESSIVE_RE.replace(trimmed, "");
    let cleaned: String = without_possessive
        .chars()
        .filter(|c| !is_apostrophe(*c))
        .collect();
    if cleaned.chars().any(char::is_alphanumeric) {
        Some(cleaned)
    } else {
        None
    }
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word.to_lowercase().as_str())
}

/// Identifier-like tokens (`__init__`, `utf8`) are kept verbatim by every
/// normalization step.
pub fn is_symbolic(word: &str) -> bool {
    word.contains('_') || word.chars().any(|c| c.is_ascii_digit())
}

/// The form a word takes inside a candidate phrase: lowercased unless
/// symbolic.
pub fn surface_word(word: &str) -> String {
    if is_symbolic(word) {
        word.to_string()
    } else {
        word.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStep {
    Lowercase,
    StripPossessive,
    StripPunctuation,
    SuffixStrip,
}

impl CanonicalStep {
    pub fn apply(self, word: &str) -> String {
        match self {
            CanonicalStep::Lowercase => word.to_lowercase(),
            CanonicalStep::StripPossessive => POSSESSIVE_RE.replace(word, "").into_owned(),
            CanonicalStep::StripPunctuation => {
                word.chars().filter(|c| c.is_alphanumeric()).collect()
            }
            CanonicalStep::SuffixStrip => strip_suffix(word),
        }
    }
}

/// Maps surface variants of a key-phrase to one canonical concept key.
///
/// The suffix rule is a deliberately light heuristic, not a stemmer: it
/// folds regular plurals (`abstractions`, `classes`, `libraries`) and leaves
/// everything else alone. Words shorter than five characters are never
/// stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalizer {
    steps: Vec<CanonicalStep>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(vec![
            CanonicalStep::Lowercase,
            CanonicalStep::StripPossessive,
            CanonicalStep::StripPunctuation,
            CanonicalStep::SuffixStrip,
        ])
    }
}

impl Canonicalizer {
    pub fn new(steps: Vec<CanonicalStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[CanonicalStep] {
        &self.steps
    }

    pub fn canonical_word(&self, word: &str) -> String {
        if is_symbolic(word) {
            return word
                .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
                .to_string();
        }
        self.steps
            .iter()
            .fold(word.to_string(), |acc, step| step.apply(&acc))
    }

    /// Total: every input yields a key. When every word normalizes away the
    /// trimmed input itself is the key.
    pub fn canonicalize(&self, phrase: &str) -> String {
        let key = phrase
            .split_whitespace()
            .map(|word| self.canonical_word(word))
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if key.is_empty() {
            phrase.trim().to_string()
        } else {
            key
        }
    }

    pub fn canonicalize_words<S: AsRef<str>>(&self, words: &[S]) -> String {
        let joined = words
            .iter()
            .map(|w| w.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        self.canonicalize(&joined)
    }
}

fn strip_suffix(word: &str) -> String {
    if word.chars().count() < 5 || !word.chars().all(char::is_alphabetic) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if let Some(stem) = word.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    for suffix in ["xes", "ches", "shes"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            return format!("{stem}{}", &suffix[..suffix.len() - 2]);
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}
