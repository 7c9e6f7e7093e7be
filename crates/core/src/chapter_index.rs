use serde::{Deserialize, Serialize};

use crate::book::ChapterId;
use crate::concepts::{compare_ranked, CanonicalConcept};
use crate::stats::{round_score, CorpusStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedConcept {
    pub key: String,
    pub display_form: String,
    pub surface_forms: Vec<String>,
    pub count: u32,
    /// Chapter salience weighted by inverse chapter frequency.
    pub salience: f64,
    pub local_salience: f64,
    pub icf: f64,
    pub chapter_frequency: u32,
    pub first_position: u32,
}

/// The ordered concept list of one chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterConceptIndex {
    pub chapter: ChapterId,
    pub concepts: Vec<IndexedConcept>,
}

impl ChapterConceptIndex {
    pub fn build(chapter: ChapterId, concepts: &[CanonicalConcept], stats: &CorpusStats) -> Self {
        let mut indexed: Vec<IndexedConcept> = concepts
            .iter()
            .map(|concept| {
                let icf = stats.icf(&concept.key);
                IndexedConcept {
                    key: concept.key.clone(),
                    display_form: concept.display_form.clone(),
                    surface_forms: concept.surface_forms.iter().cloned().collect(),
                    count: concept.count,
                    salience: round_score(concept.salience * icf),
                    local_salience: concept.salience,
                    icf: round_score(icf),
                    chapter_frequency: stats.frequency(&concept.key),
                    first_position: concept.first_position,
                }
            })
            .collect();
        indexed.sort_by(|a, b| {
            compare_ranked(
                (a.salience, a.first_position, &a.key),
                (b.salience, b.first_position, &b.key),
            )
        });
        Self {
            chapter,
            concepts: indexed,
        }
    }

    pub fn get(&self, key: &str) -> Option<&IndexedConcept> {
        self.concepts.iter().find(|c| c.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.concepts.iter().map(|c| c.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}
