use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::book::ChapterId;
use crate::chapter_index::{ChapterConceptIndex, IndexedConcept};
use crate::error::ConsistencyError;
use crate::stats::round_score;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    #[default]
    Sum,
    Max,
}

impl CombineMode {
    pub fn combine(self, earlier: f64, later: f64) -> f64 {
        match self {
            CombineMode::Sum => earlier + later,
            CombineMode::Max => earlier.max(later),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossReferenceConfig {
    pub top_n: usize,
    pub combine: CombineMode,
}

impl Default for CrossReferenceConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            combine: CombineMode::Sum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConcept {
    pub key: String,
    pub display_form: String,
    pub earlier_count: u32,
    pub later_count: u32,
    pub earlier_salience: f64,
    pub later_salience: f64,
    pub combined: f64,
}

impl SharedConcept {
    fn new(earlier: &IndexedConcept, later: &IndexedConcept, mode: CombineMode) -> Self {
        Self {
            key: earlier.key.clone(),
            display_form: earlier.display_form.clone(),
            earlier_count: earlier.count,
            later_count: later.count,
            earlier_salience: earlier.salience,
            later_salience: later.salience,
            combined: round_score(mode.combine(earlier.salience, later.salience)),
        }
    }
}

/// Concepts that `target` builds upon from `source`, where `source` strictly
/// precedes `target` in book order. An empty `shared` list is a valid,
/// explicit "no shared concepts" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub source: ChapterId,
    pub target: ChapterId,
    /// Size of the full intersection before the top-N cap.
    pub shared_total: u32,
    pub shared: Vec<SharedConcept>,
}

impl CrossReference {
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.shared.iter().map(|s| s.key.as_str())
    }
}

pub fn validate_pair(earlier: &ChapterId, later: &ChapterId) -> Result<(), ConsistencyError> {
    if earlier.book != later.book {
        return Err(ConsistencyError::DifferentBooks {
            left: earlier.clone(),
            right: later.clone(),
        });
    }
    match earlier.index.cmp(&later.index) {
        Ordering::Less => Ok(()),
        Ordering::Equal => Err(ConsistencyError::SelfReference(earlier.clone())),
        Ordering::Greater => Err(ConsistencyError::Backward {
            earlier: earlier.clone(),
            later: later.clone(),
        }),
    }
}

pub fn cross_reference(
    earlier: &ChapterConceptIndex,
    later: &ChapterConceptIndex,
    config: &CrossReferenceConfig,
) -> Result<CrossReference, ConsistencyError> {
    validate_pair(&earlier.chapter, &later.chapter)?;
    let later_by_key: FxHashMap<&str, &IndexedConcept> =
        later.concepts.iter().map(|c| (c.key.as_str(), c)).collect();
    let shared: Vec<SharedConcept> = earlier
        .concepts
        .iter()
        .filter_map(|concept| {
            later_by_key
                .get(concept.key.as_str())
                .map(|other| SharedConcept::new(concept, other, config.combine))
        })
        .collect();
    Ok(finish(
        earlier.chapter.clone(),
        later.chapter.clone(),
        shared,
        config.top_n,
    ))
}

/// Every pair of a book's chapter indices, one record per `i < j` in book
/// order (empty records included).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossReferenceSet {
    pub references: Vec<CrossReference>,
    pub rejected: Vec<ConsistencyError>,
}

/// Computes all chapter pairs through an inverted concept → chapters
/// posting list, so the work is proportional to the shared postings rather
/// than to every pair's full concept lists.
///
/// Book order comes from the chapter ids, not from the order of `indices`.
/// Indices from a different book than the first, and repeated chapters, are
/// rejected individually; the remaining chapters are still paired.
pub fn cross_reference_all<'a, I>(indices: I, config: &CrossReferenceConfig) -> CrossReferenceSet
where
    I: IntoIterator<Item = &'a ChapterConceptIndex>,
{
    let indices: Vec<&ChapterConceptIndex> = indices.into_iter().collect();
    let Some(first) = indices.first().copied() else {
        return CrossReferenceSet::default();
    };
    let mut rejected = Vec::new();
    let mut ordered: BTreeMap<u32, &ChapterConceptIndex> = BTreeMap::new();
    for index in indices {
        if index.chapter.book != first.chapter.book {
            rejected.push(ConsistencyError::DifferentBooks {
                left: first.chapter.clone(),
                right: index.chapter.clone(),
            });
            continue;
        }
        match ordered.entry(index.chapter.index) {
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
            Entry::Occupied(_) => {
                rejected.push(ConsistencyError::SelfReference(index.chapter.clone()));
            }
        }
    }
    let chapters: Vec<&ChapterConceptIndex> = ordered.into_values().collect();

    let mut postings: BTreeMap<&str, Vec<(usize, &IndexedConcept)>> = BTreeMap::new();
    for (position, index) in chapters.iter().enumerate() {
        for concept in &index.concepts {
            postings
                .entry(concept.key.as_str())
                .or_default()
                .push((position, concept));
        }
    }
    let mut pairs: FxHashMap<(usize, usize), Vec<SharedConcept>> = FxHashMap::default();
    for posting in postings.values().filter(|p| p.len() > 1) {
        for (offset, (earlier_pos, earlier)) in posting.iter().enumerate() {
            for (later_pos, later) in posting.iter().skip(offset + 1) {
                pairs
                    .entry((*earlier_pos, *later_pos))
                    .or_default()
                    .push(SharedConcept::new(earlier, later, config.combine));
            }
        }
    }

    let mut references = Vec::new();
    for (i, earlier) in chapters.iter().enumerate() {
        for (j, later) in chapters.iter().enumerate().skip(i + 1) {
            let shared = pairs.remove(&(i, j)).unwrap_or_default();
            references.push(finish(
                earlier.chapter.clone(),
                later.chapter.clone(),
                shared,
                config.top_n,
            ));
        }
    }
    CrossReferenceSet {
        references,
        rejected,
    }
}

fn finish(
    source: ChapterId,
    target: ChapterId,
    mut shared: Vec<SharedConcept>,
    top_n: usize,
) -> CrossReference {
    let shared_total = shared.len() as u32;
    shared.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    shared.truncate(top_n);
    CrossReference {
        source,
        target,
        shared_total,
        shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookId;

    fn book(tag: &str) -> BookId {
        BookId::from_hex(tag.repeat(64 / tag.len()))
    }

    fn concept(key: &str, salience: f64) -> IndexedConcept {
        IndexedConcept {
            key: key.to_string(),
            display_form: key.to_string(),
            surface_forms: vec![key.to_string()],
            count: 1,
            salience,
            local_salience: salience,
            icf: 1.0,
            chapter_frequency: 2,
            first_position: 0,
        }
    }

    fn index(book_id: &BookId, chapter: u32, concepts: &[(&str, f64)]) -> ChapterConceptIndex {
        ChapterConceptIndex {
            chapter: ChapterId::new(book_id.clone(), chapter),
            concepts: concepts.iter().map(|(k, s)| concept(k, *s)).collect(),
        }
    }

    #[test]
    fn ranks_shared_concepts_by_combined_salience() {
        let b = book("a");
        let first = index(&b, 0, &[("closure", 1.0), ("scope", 3.0), ("binding", 2.0)]);
        let second = index(&b, 1, &[("scope", 0.5), ("closure", 4.0), ("decorator", 9.0)]);
        let reference = cross_reference(&first, &second, &CrossReferenceConfig::default()).unwrap();
        let keys: Vec<_> = reference.keys().collect();
        assert_eq!(keys, vec!["closure", "scope"]);
        assert_eq!(reference.shared[0].combined, 5.0);
        assert_eq!(reference.shared_total, 2);
    }

    #[test]
    fn max_mode_uses_the_larger_salience() {
        let b = book("a");
        let first = index(&b, 0, &[("closure", 1.0)]);
        let second = index(&b, 1, &[("closure", 4.0)]);
        let config = CrossReferenceConfig {
            combine: CombineMode::Max,
            ..CrossReferenceConfig::default()
        };
        let reference = cross_reference(&first, &second, &config).unwrap();
        assert_eq!(reference.shared[0].combined, 4.0);
    }

    #[test]
    fn disjoint_chapters_yield_explicit_empty_reference() {
        let b = book("a");
        let first = index(&b, 0, &[("closure", 1.0)]);
        let second = index(&b, 2, &[("metaclass", 1.0)]);
        let reference = cross_reference(&first, &second, &CrossReferenceConfig::default()).unwrap();
        assert!(reference.is_empty());
        assert_eq!(reference.shared_total, 0);
        assert_eq!(reference.target.index, 2);
    }

    #[test]
    fn rejects_backward_self_and_foreign_pairs() {
        let b = book("a");
        let first = index(&b, 0, &[("closure", 1.0)]);
        let second = index(&b, 1, &[("closure", 1.0)]);
        let foreign = index(&book("b"), 1, &[("closure", 1.0)]);
        let config = CrossReferenceConfig::default();
        assert!(matches!(
            cross_reference(&second, &first, &config),
            Err(ConsistencyError::Backward { .. })
        ));
        assert!(matches!(
            cross_reference(&first, &first, &config),
            Err(ConsistencyError::SelfReference(_))
        ));
        assert!(matches!(
            cross_reference(&first, &foreign, &config),
            Err(ConsistencyError::DifferentBooks { .. })
        ));
    }

    #[test]
    fn caps_at_top_n_with_lexicographic_ties() {
        let b = book("a");
        let keys: Vec<String> = (0..12).map(|i| format!("concept{i:02}")).collect();
        let shared: Vec<(&str, f64)> = keys.iter().map(|k| (k.as_str(), 1.0)).collect();
        let first = index(&b, 0, &shared);
        let second = index(&b, 1, &shared);
        let reference = cross_reference(&first, &second, &CrossReferenceConfig::default()).unwrap();
        assert_eq!(reference.shared.len(), 5);
        assert_eq!(reference.shared_total, 12);
        let got: Vec<_> = reference.keys().collect();
        assert_eq!(got, vec!["concept00", "concept01", "concept02", "concept03", "concept04"]);
    }

    #[test]
    fn all_pairs_matches_pairwise_computation() {
        let b = book("a");
        let indices = vec![
            index(&b, 2, &[("closure", 1.0), ("yield", 2.0)]),
            index(&b, 0, &[("closure", 3.0), ("scope", 1.0)]),
            index(&b, 1, &[("scope", 2.0), ("yield", 0.5)]),
            index(&b, 3, &[("metaclass", 1.0)]),
        ];
        let config = CrossReferenceConfig::default();
        let set = cross_reference_all(&indices, &config);
        assert!(set.rejected.is_empty());
        assert_eq!(set.references.len(), 6);
        let mut sorted = indices.clone();
        sorted.sort_by_key(|i| i.chapter.index);
        let mut expected = Vec::new();
        for i in 0..sorted.len() {
            for j in i + 1..sorted.len() {
                expected.push(cross_reference(&sorted[i], &sorted[j], &config).unwrap());
            }
        }
        assert_eq!(set.references, expected);
        assert!(set.references.iter().any(|r| r.is_empty()));
    }

    #[test]
    fn all_pairs_rejects_foreign_and_duplicate_chapters() {
        let b = book("a");
        let indices = vec![
            index(&b, 0, &[("closure", 1.0)]),
            index(&b, 1, &[("closure", 1.0)]),
            index(&b, 1, &[("closure", 1.0)]),
            index(&book("b"), 2, &[("closure", 1.0)]),
        ];
        let set = cross_reference_all(&indices, &CrossReferenceConfig::default());
        assert_eq!(set.rejected.len(), 2);
        assert_eq!(set.references.len(), 1);
        assert_eq!(set.references[0].shared_total, 1);
    }
}
