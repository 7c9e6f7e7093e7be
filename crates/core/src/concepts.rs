use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::book::BookId;
use crate::keywords::RankedPhrase;
use crate::normalization::Canonicalizer;
use crate::stats::{round_score, CorpusStats};

/// A chapter-local concept: every surface variant of one canonical key,
/// merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalConcept {
    pub key: String,
    pub display_form: String,
    pub surface_forms: BTreeSet<String>,
    pub count: u32,
    pub salience: f64,
    pub first_position: u32,
}

/// Descending salience, then earliest first occurrence, then key.
pub fn compare_ranked(a: (f64, u32, &str), b: (f64, u32, &str)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(b.2))
}

#[derive(Debug, Clone, Default)]
pub struct ConceptResolver {
    canonicalizer: Canonicalizer,
}

struct Merge {
    concept: CanonicalConcept,
    display_score: f64,
}

impl ConceptResolver {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    pub fn canonical_key(&self, phrase: &str) -> String {
        self.canonicalizer.canonicalize(phrase)
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Folds surface variants into canonical concepts. Counts and salience
    /// are summed; the display form is the best-scoring variant, the first
    /// one seen on ties.
    pub fn resolve(&self, phrases: &[RankedPhrase]) -> Vec<CanonicalConcept> {
        let mut merged: IndexMap<String, Merge> = IndexMap::new();
        for phrase in phrases {
            let key = self.canonical_key(&phrase.phrase);
            match merged.get_mut(&key) {
                Some(existing) => {
                    let concept = &mut existing.concept;
                    concept.count = concept.count.saturating_add(phrase.count);
                    concept.salience += phrase.score;
                    concept.first_position = concept.first_position.min(phrase.first_position);
                    concept.surface_forms.insert(phrase.phrase.clone());
                    if phrase.score > existing.display_score {
                        concept.display_form = phrase.phrase.clone();
                        existing.display_score = phrase.score;
                    }
                }
                None => {
                    let concept = CanonicalConcept {
                        key: key.clone(),
                        display_form: phrase.phrase.clone(),
                        surface_forms: BTreeSet::from([phrase.phrase.clone()]),
                        count: phrase.count,
                        salience: phrase.score,
                        first_position: phrase.first_position,
                    };
                    merged.insert(
                        key,
                        Merge {
                            concept,
                            display_score: phrase.score,
                        },
                    );
                }
            }
        }
        let mut concepts: Vec<CanonicalConcept> = merged
            .into_values()
            .map(|m| {
                let mut concept = m.concept;
                concept.salience = round_score(concept.salience);
                concept
            })
            .collect();
        concepts.sort_by(|a, b| {
            compare_ranked(
                (a.salience, a.first_position, &a.key),
                (b.salience, b.first_position, &b.key),
            )
        });
        concepts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterOccurrence {
    pub count: u32,
    pub salience: f64,
    pub first_position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEntry {
    pub key: String,
    pub display_form: String,
    pub surface_forms: BTreeSet<String>,
    pub chapters: BTreeMap<u32, ChapterOccurrence>,
}

impl ConceptEntry {
    pub fn total_count(&self) -> u32 {
        self.chapters.values().map(|o| o.count).sum()
    }

    // Highest chapter salience wins the display form; the earlier chapter on
    // ties. Independent of registration order.
    fn refresh_display(&mut self, candidates: &FxHashMap<u32, String>) {
        let best = self.chapters.iter().fold(None, |best: Option<(u32, f64)>, (ch, occ)| {
            match best {
                Some((_, salience)) if salience >= occ.salience => best,
                _ => Some((*ch, occ.salience)),
            }
        });
        if let Some(form) = best.and_then(|(ch, _)| candidates.get(&ch)) {
            self.display_form = form.clone();
        }
    }
}

/// Book-wide map from canonical key to the chapters containing it. Built by
/// folding each chapter's resolved concepts; the result does not depend on
/// the order chapters are folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptRegistry {
    book: BookId,
    chapter_count: u32,
    concepts: FxHashMap<String, ConceptEntry>,
    display_by_chapter: FxHashMap<String, FxHashMap<u32, String>>,
}

impl ConceptRegistry {
    pub fn new(book: BookId, chapter_count: u32) -> Self {
        Self {
            book,
            chapter_count,
            concepts: FxHashMap::default(),
            display_by_chapter: FxHashMap::default(),
        }
    }

    pub fn build<'a, I>(book: BookId, chapter_count: u32, chapters: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a [CanonicalConcept])>,
    {
        chapters
            .into_iter()
            .fold(Self::new(book, chapter_count), |registry, (chapter, concepts)| {
                registry.register_chapter(chapter, concepts)
            })
    }

    /// Records one chapter. Registering the same chapter again replaces its
    /// earlier occurrences.
    pub fn register_chapter(mut self, chapter: u32, concepts: &[CanonicalConcept]) -> Self {
        self.forget_chapter(chapter);
        for concept in concepts {
            let displays = self
                .display_by_chapter
                .entry(concept.key.clone())
                .or_default();
            displays.insert(chapter, concept.display_form.clone());
            let entry = self
                .concepts
                .entry(concept.key.clone())
                .or_insert_with(|| ConceptEntry {
                    key: concept.key.clone(),
                    display_form: concept.display_form.clone(),
                    surface_forms: BTreeSet::new(),
                    chapters: BTreeMap::new(),
                });
            entry.surface_forms.extend(concept.surface_forms.iter().cloned());
            entry.chapters.insert(
                chapter,
                ChapterOccurrence {
                    count: concept.count,
                    salience: concept.salience,
                    first_position: concept.first_position,
                },
            );
            entry.refresh_display(displays);
        }
        self
    }

    fn forget_chapter(&mut self, chapter: u32) {
        let keys: Vec<String> = self
            .concepts
            .iter()
            .filter(|(_, entry)| entry.chapters.contains_key(&chapter))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            let displays = self.display_by_chapter.entry(key.clone()).or_default();
            displays.remove(&chapter);
            let now_empty = match self.concepts.get_mut(&key) {
                Some(entry) => {
                    entry.chapters.remove(&chapter);
                    entry.refresh_display(displays);
                    entry.chapters.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.concepts.remove(&key);
                self.display_by_chapter.remove(&key);
            }
        }
    }

    pub fn book(&self) -> &BookId {
        &self.book
    }

    pub fn chapter_count(&self) -> u32 {
        self.chapter_count
    }

    pub fn get(&self, key: &str) -> Option<&ConceptEntry> {
        self.concepts.get(key)
    }

    pub fn chapters_containing(&self, key: &str) -> Option<&BTreeMap<u32, ChapterOccurrence>> {
        self.concepts.get(key).map(|entry| &entry.chapters)
    }

    pub fn chapter_frequency(&self, key: &str) -> u32 {
        self.chapters_containing(key)
            .map(|chapters| chapters.len() as u32)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Entries ordered by canonical key.
    pub fn entries(&self) -> Vec<&ConceptEntry> {
        let mut entries: Vec<&ConceptEntry> = self.concepts.values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn corpus_stats(&self) -> CorpusStats {
        let mut stats = CorpusStats::new(self.chapter_count);
        for entry in self.concepts.values() {
            stats.record(entry.key.clone(), entry.chapters.len() as u32);
        }
        stats
    }
}
