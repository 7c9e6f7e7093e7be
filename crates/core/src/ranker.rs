use std::cmp::Ordering;
use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::book::TextUnit;
use crate::chapter_index::ChapterConceptIndex;
use crate::normalization::{segments, Canonicalizer, HyphenationMode};
use crate::stats::{round_score, CorpusStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub max_excerpts: usize,
    /// Term frequency saturation.
    pub k1: f64,
    /// Unit length normalization.
    pub b: f64,
    pub hyphenation: HyphenationMode,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            max_excerpts: 3,
            k1: 1.2,
            b: 0.75,
            hyphenation: HyphenationMode::Merge,
        }
    }
}

/// A unit relevant to a concept, carrying its source provenance and the
/// unit text exactly as ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedExcerpt {
    pub unit_index: u32,
    pub page: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub text: String,
    pub occurrences: u32,
    pub score: f64,
}

#[derive(Debug, Default)]
struct UnitProfile {
    tokens: u32,
    occurrences: FxHashMap<String, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityRanker {
    config: RankerConfig,
    canonicalizer: Canonicalizer,
}

impl SimilarityRanker {
    pub fn new(config: RankerConfig, canonicalizer: Canonicalizer) -> Self {
        Self {
            config,
            canonicalizer,
        }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Scores every unit of the chapter against one canonical concept key:
    /// `icf * tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`.
    /// Units that never mention the concept are left out.
    pub fn rank_excerpts(
        &self,
        concept_key: &str,
        units: &[TextUnit],
        stats: &CorpusStats,
    ) -> Vec<RankedExcerpt> {
        let wanted = FxHashSet::from_iter([concept_key]);
        let profiles = self.profile_units(units, &wanted);
        self.rank_with_profiles(concept_key, units, &profiles, stats)
    }

    /// Ranks excerpts for every concept of a chapter index, sharing one pass
    /// of tokenization over the units.
    pub fn rank_chapter(
        &self,
        index: &ChapterConceptIndex,
        units: &[TextUnit],
        stats: &CorpusStats,
    ) -> BTreeMap<String, Vec<RankedExcerpt>> {
        let wanted: FxHashSet<&str> = index.keys().collect();
        let profiles = self.profile_units(units, &wanted);
        index
            .keys()
            .map(|key| {
                (
                    key.to_string(),
                    self.rank_with_profiles(key, units, &profiles, stats),
                )
            })
            .collect()
    }

    fn rank_with_profiles(
        &self,
        concept_key: &str,
        units: &[TextUnit],
        profiles: &[UnitProfile],
        stats: &CorpusStats,
    ) -> Vec<RankedExcerpt> {
        let avg_len = average_length(profiles);
        let icf = stats.icf(concept_key);
        let k1 = self.config.k1;
        let b = self.config.b;
        let mut ranked: Vec<RankedExcerpt> = units
            .iter()
            .zip(profiles)
            .enumerate()
            .filter_map(|(unit_index, (unit, profile))| {
                let tf = profile.occurrences.get(concept_key).copied().unwrap_or(0);
                if tf == 0 {
                    return None;
                }
                let tf = f64::from(tf);
                let len_ratio = f64::from(profile.tokens) / avg_len;
                let saturation = tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_ratio));
                Some(RankedExcerpt {
                    unit_index: unit_index as u32,
                    page: unit.page,
                    line_start: unit.line_start,
                    line_end: unit.line_end,
                    text: unit.text.clone(),
                    occurrences: tf as u32,
                    score: round_score(icf * saturation),
                })
            })
            .collect();
        ranked.sort_by(compare_excerpts);
        ranked.truncate(self.config.max_excerpts);
        ranked
    }

    fn profile_units(&self, units: &[TextUnit], wanted: &FxHashSet<&str>) -> Vec<UnitProfile> {
        let max_words = wanted
            .iter()
            .map(|key| key.split(' ').count())
            .max()
            .unwrap_or(1)
            .clamp(1, 3);
        units
            .iter()
            .map(|unit| self.profile_unit(unit, wanted, max_words))
            .collect()
    }

    fn profile_unit(
        &self,
        unit: &TextUnit,
        wanted: &FxHashSet<&str>,
        max_words: usize,
    ) -> UnitProfile {
        let mut profile = UnitProfile::default();
        for segment in segments(&unit.text, self.config.hyphenation) {
            profile.tokens = profile.tokens.saturating_add(segment.len() as u32);
            let canonical: Vec<String> = segment
                .iter()
                .map(|word| self.canonicalizer.canonical_word(word))
                .collect();
            for n in 1..=max_words.min(canonical.len()) {
                for window in canonical.windows(n) {
                    let key = window.join(" ");
                    if wanted.contains(key.as_str()) {
                        *profile.occurrences.entry(key).or_insert(0) += 1;
                    }
                }
            }
        }
        profile
    }
}

fn average_length(profiles: &[UnitProfile]) -> f64 {
    let (total, count) = profiles
        .iter()
        .filter(|p| p.tokens > 0)
        .fold((0u64, 0u64), |(total, count), p| {
            (total + u64::from(p.tokens), count + 1)
        });
    if count == 0 {
        1.0
    } else {
        total as f64 / count as f64
    }
}

fn compare_excerpts(a: &RankedExcerpt, b: &RankedExcerpt) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.page.cmp(&b.page))
        .then_with(|| a.line_start.cmp(&b.line_start))
        .then_with(|| a.unit_index.cmp(&b.unit_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(page: u32, line: u32, text: &str) -> TextUnit {
        TextUnit::new(page, line, line + 1, text)
    }

    fn stats(chapters: u32, entries: &[(&str, u32)]) -> CorpusStats {
        let mut stats = CorpusStats::new(chapters);
        for (key, df) in entries {
            stats.record(*key, *df);
        }
        stats
    }

    #[test]
    fn ranks_units_by_concept_frequency() {
        let ranker = SimilarityRanker::default();
        let units = vec![
            unit(1, 1, "An abstraction hides detail."),
            unit(1, 3, "Abstractions layer: each abstraction hides another abstraction."),
            unit(2, 1, "Nothing relevant here."),
        ];
        let ranked = ranker.rank_excerpts("abstraction", &units, &stats(3, &[("abstraction", 1)]));
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].unit_index, 1);
        assert_eq!(ranked[0].occurrences, 3);
        assert_eq!(ranked[0].text, units[1].text);
        assert_eq!((ranked[1].page, ranked[1].line_start), (1, 1));
    }

    #[test]
    fn matches_multiword_concepts_across_variants() {
        let ranker = SimilarityRanker::default();
        let units = vec![unit(4, 10, "Context managers: a context manager closes files.")];
        let ranked =
            ranker.rank_excerpts("context manager", &units, &stats(2, &[("context manager", 1)]));
        assert_eq!(ranked[0].occurrences, 2);
    }

    #[test]
    fn ubiquitous_concepts_score_lower() {
        let ranker = SimilarityRanker::default();
        let units = vec![unit(1, 1, "class descriptor")];
        let corpus = stats(8, &[("class", 8), ("descriptor", 1)]);
        let class = ranker.rank_excerpts("class", &units, &corpus);
        let descriptor = ranker.rank_excerpts("descriptor", &units, &corpus);
        assert!(descriptor[0].score > class[0].score);
    }

    #[test]
    fn ties_fall_back_to_provenance_order() {
        let ranker = SimilarityRanker::default();
        let units = vec![
            unit(3, 1, "closure"),
            unit(1, 9, "closure"),
            unit(1, 2, "closure"),
        ];
        let ranked = ranker.rank_excerpts("closure", &units, &stats(1, &[("closure", 1)]));
        let order: Vec<_> = ranked.iter().map(|e| e.unit_index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn rank_chapter_covers_every_indexed_concept() {
        use crate::book::{BookId, ChapterId};
        use crate::concepts::ConceptResolver;
        use crate::keywords::KeywordExtractor;

        let units = vec![
            unit(1, 1, "Generators yield values lazily."),
            unit(1, 3, "A generator is an iterator."),
        ];
        let phrases = KeywordExtractor::default().extract(&units);
        let concepts = ConceptResolver::default().resolve(&phrases);
        let corpus = stats(1, &[]);
        let index = ChapterConceptIndex::build(
            ChapterId::new(BookId::from_hex("00"), 0),
            &concepts,
            &corpus,
        );
        let excerpts = SimilarityRanker::default().rank_chapter(&index, &units, &corpus);
        assert_eq!(excerpts.len(), index.len());
        assert_eq!(excerpts["generator"].len(), 2);
    }
}
