use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const SCORE_QUANTUM: f64 = 1e9;

/// Rounds a score to nine decimal places so that orderings and serialized
/// output are bit-identical across runs and platforms.
pub fn round_score(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * SCORE_QUANTUM).round() / SCORE_QUANTUM
}

/// Book-wide chapter frequencies of canonical concepts. Computed once per
/// book from the registry and cached under the book id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub chapter_count: u32,
    pub chapter_frequency: BTreeMap<String, u32>,
}

impl CorpusStats {
    pub fn new(chapter_count: u32) -> Self {
        Self {
            chapter_count,
            chapter_frequency: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, key: impl Into<String>, chapters: u32) {
        self.chapter_frequency.insert(key.into(), chapters);
    }

    pub fn frequency(&self, key: &str) -> u32 {
        self.chapter_frequency.get(key).copied().unwrap_or(0)
    }

    /// `ln(1 + N / df)`: strictly positive, smaller for concepts that appear
    /// in most chapters. An unseen concept is treated as appearing in one.
    pub fn icf(&self, key: &str) -> f64 {
        let chapters = f64::from(self.chapter_count.max(1));
        let df = f64::from(self.frequency(key).max(1));
        (1.0 + chapters / df).ln()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.chapter_frequency.len()
    }
}
