use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::book::TextUnit;
use crate::normalization::{is_stopword, is_symbolic, segments, surface_word, HyphenationMode};
use crate::stats::round_score;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub top_k: usize,
    pub max_ngram: usize,
    pub min_token_chars: usize,
    pub min_ngram_count: u32,
    pub spread_weight: f64,
    pub ngram_bonus: f64,
    pub hyphenation: HyphenationMode,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            max_ngram: 3,
            min_token_chars: 2,
            min_ngram_count: 2,
            spread_weight: 0.5,
            ngram_bonus: 0.25,
            hyphenation: HyphenationMode::Merge,
        }
    }
}

/// A candidate key-phrase of one chapter with its salience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPhrase {
    pub phrase: String,
    pub score: f64,
    pub count: u32,
    pub unit_spread: u32,
    pub first_position: u32,
}

#[derive(Debug, Default)]
struct Candidate {
    words: usize,
    count: u32,
    unit_spread: u32,
    last_unit: Option<usize>,
    first_position: u32,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordExtractor {
    config: KeywordConfig,
}

impl KeywordExtractor {
    pub fn new(config: KeywordConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KeywordConfig {
        &self.config
    }

    /// The `top_k` best candidates of [`KeywordExtractor::candidates`].
    pub fn extract(&self, units: &[TextUnit]) -> Vec<RankedPhrase> {
        let mut ranked = self.candidates(units);
        ranked.truncate(self.config.top_k);
        ranked
    }

    /// Ranks every candidate phrase of the chapter, best first. Salience is
    /// `(1 + ln count) * (1 + spread_weight * spread) * (1 + ngram_bonus * (n - 1))`
    /// where `spread` is the fraction of the chapter's other units the phrase
    /// recurs in. Multi-word phrases seen fewer than `min_ngram_count` times
    /// are not candidates.
    pub fn candidates(&self, units: &[TextUnit]) -> Vec<RankedPhrase> {
        let candidates = self.collect_candidates(units);
        if candidates.is_empty() {
            return Vec::new();
        }
        let spread_denominator = units.len().saturating_sub(1).max(1) as f64;
        let mut ranked: Vec<RankedPhrase> = candidates
            .into_iter()
            .filter(|(_, c)| c.words == 1 || c.count >= self.config.min_ngram_count)
            .map(|(phrase, c)| {
                let frequency = 1.0 + f64::from(c.count).ln();
                let spread = f64::from(c.unit_spread.saturating_sub(1)) / spread_denominator;
                let spread_bonus = 1.0 + self.config.spread_weight * spread;
                let length_bonus = 1.0 + self.config.ngram_bonus * (c.words - 1) as f64;
                RankedPhrase {
                    phrase,
                    score: round_score(frequency * spread_bonus * length_bonus),
                    count: c.count,
                    unit_spread: c.unit_spread,
                    first_position: c.first_position,
                }
            })
            .collect();
        ranked.sort_by(compare_phrases);
        ranked
    }

    fn collect_candidates(&self, units: &[TextUnit]) -> FxHashMap<String, Candidate> {
        let max_ngram = self.config.max_ngram.clamp(1, 3);
        let mut candidates: FxHashMap<String, Candidate> = FxHashMap::default();
        let mut position = 0u32;
        for (unit_index, unit) in units.iter().enumerate() {
            if unit.text.trim().is_empty() {
                continue;
            }
            for segment in segments(&unit.text, self.config.hyphenation) {
                let mut run: Vec<(String, u32)> = Vec::new();
                for word in segment {
                    if self.is_candidate_word(&word) {
                        run.push((surface_word(&word), position));
                    } else {
                        self.record_run(&run, max_ngram, unit_index, &mut candidates);
                        run.clear();
                    }
                    position = position.saturating_add(1);
                }
                self.record_run(&run, max_ngram, unit_index, &mut candidates);
            }
        }
        candidates
    }

    fn record_run(
        &self,
        run: &[(String, u32)],
        max_ngram: usize,
        unit_index: usize,
        candidates: &mut FxHashMap<String, Candidate>,
    ) {
        for n in 1..=max_ngram.min(run.len()) {
            for window in run.windows(n) {
                let phrase = window
                    .iter()
                    .map(|(word, _)| word.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let start = window.first().map(|(_, pos)| *pos).unwrap_or(0);
                let entry = candidates.entry(phrase).or_insert_with(|| Candidate {
                    words: n,
                    first_position: start,
                    ..Candidate::default()
                });
                entry.count = entry.count.saturating_add(1);
                entry.first_position = entry.first_position.min(start);
                if entry.last_unit != Some(unit_index) {
                    entry.unit_spread += 1;
                    entry.last_unit = Some(unit_index);
                }
            }
        }
    }

    fn is_candidate_word(&self, word: &str) -> bool {
        if is_stopword(word) {
            return false;
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        is_symbolic(word) || word.chars().count() >= self.config.min_token_chars
    }
}

fn compare_phrases(a: &RankedPhrase, b: &RankedPhrase) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.phrase.cmp(&b.phrase))
}
