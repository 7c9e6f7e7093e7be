use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::book::{BookId, ChapterId, PageRange};
use crate::chapter_index::IndexedConcept;
use crate::error::{CardsError, Result};
use crate::pipeline::BookAnalysis;
use crate::ranker::RankedExcerpt;
use crate::xref::CrossReference;

pub const INTERCHANGE_FORMAT: &str = "concept-cards";
pub const INTERCHANGE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: Option<String>,
    pub chapter_count: u32,
    pub concepts: Vec<ConceptSummary>,
}

/// A registry entry: where in the book a concept appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSummary {
    pub key: String,
    pub display_form: String,
    pub surface_forms: Vec<String>,
    pub chapters: Vec<u32>,
    pub total_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptCard {
    pub concept: IndexedConcept,
    pub excerpts: Vec<RankedExcerpt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterCards {
    pub chapter: ChapterId,
    pub title: Option<String>,
    pub pages: Option<PageRange>,
    pub concepts: Vec<ConceptCard>,
}

/// The versioned document handed to the renderer and the annotator. Only
/// ordered containers appear in it, so equal analyses serialize to equal
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interchange {
    pub format: String,
    pub version: u32,
    pub book: BookSummary,
    pub chapters: Vec<ChapterCards>,
    pub cross_references: Vec<CrossReference>,
}

impl Interchange {
    /// The book summary lists the concepts surfaced in some chapter, each
    /// with every chapter it occurs in.
    pub fn from_analysis(analysis: &BookAnalysis) -> Self {
        let surfaced = analysis.indexed_keys();
        let concepts = analysis
            .registry
            .entries()
            .into_iter()
            .filter(|entry| surfaced.contains(entry.key.as_str()))
            .map(|entry| ConceptSummary {
                key: entry.key.clone(),
                display_form: entry.display_form.clone(),
                surface_forms: entry.surface_forms.iter().cloned().collect(),
                chapters: entry.chapters.keys().copied().collect_vec(),
                total_count: entry.total_count(),
            })
            .collect();
        let chapters = analysis
            .chapters
            .iter()
            .map(|chapter| ChapterCards {
                chapter: chapter.chapter.clone(),
                title: chapter.title.clone(),
                pages: chapter.pages,
                concepts: chapter
                    .index
                    .concepts
                    .iter()
                    .map(|concept| ConceptCard {
                        concept: concept.clone(),
                        excerpts: chapter
                            .excerpts
                            .get(&concept.key)
                            .cloned()
                            .unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            format: INTERCHANGE_FORMAT.to_string(),
            version: INTERCHANGE_VERSION,
            book: BookSummary {
                id: analysis.book.clone(),
                title: analysis.title.clone(),
                chapter_count: analysis.chapters.len() as u32,
                concepts,
            },
            chapters,
            cross_references: analysis.cross_references.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(raw)?;
        document.check_version()?;
        Ok(document)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let document: Self = serde_json::from_reader(BufReader::new(file))?;
        document.check_version()?;
        Ok(document)
    }

    fn check_version(&self) -> Result<()> {
        if self.format != INTERCHANGE_FORMAT {
            return Err(CardsError::Interchange(format!(
                "expected format {INTERCHANGE_FORMAT:?}, found {:?}",
                self.format
            )));
        }
        if self.version != INTERCHANGE_VERSION {
            return Err(CardsError::Interchange(format!(
                "version {} is not supported (expected {INTERCHANGE_VERSION})",
                self.version
            )));
        }
        Ok(())
    }

    pub fn chapter(&self, index: u32) -> Option<&ChapterCards> {
        self.chapters.iter().find(|c| c.chapter.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{Book, BookSource, ChapterSource, TextUnit};
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::pipeline::Analyzer;

    fn analysis() -> BookAnalysis {
        analysis_with(EngineConfig::default())
    }

    fn analysis_with(config: EngineConfig) -> BookAnalysis {
        let chapter = |texts: &[&str]| ChapterSource {
            title: Some(texts[0].to_string()),
            units: texts
                .iter()
                .enumerate()
                .map(|(i, t)| TextUnit::new(1, i as u32 * 3 + 1, i as u32 * 3 + 2, *t))
                .collect(),
        };
        let book = Book::ingest(BookSource {
            title: Some("Descriptors".to_string()),
            chapters: vec![
                chapter(&["Descriptors", "A descriptor defines attribute access."]),
                chapter(&["Properties", "A property is a descriptor. Properties wrap access."]),
            ],
        })
        .unwrap();
        Analyzer::new(config, ResultCache::disabled())
            .analyze(&book)
            .unwrap()
    }

    #[test]
    fn carries_header_and_cards() {
        let analysis = analysis();
        let document = Interchange::from_analysis(&analysis);
        assert_eq!(document.format, "concept-cards");
        assert_eq!(document.version, 1);
        assert_eq!(document.book.chapter_count, 2);
        assert_eq!(document.cross_references.len(), 1);
        let descriptor = document
            .book
            .concepts
            .iter()
            .find(|c| c.key == "descriptor")
            .unwrap();
        assert_eq!(descriptor.chapters, vec![0, 1]);
        let card = document.chapter(1).unwrap();
        assert!(card.concepts.iter().all(|c| !c.excerpts.is_empty()));
    }

    #[test]
    fn summary_lists_surfaced_concepts_only() {
        let mut config = EngineConfig::default();
        config.keywords.top_k = 1;
        let analysis = analysis_with(config);
        let document = Interchange::from_analysis(&analysis);
        let surfaced = analysis.indexed_keys();
        assert!(!document.book.concepts.is_empty());
        assert!(document
            .book
            .concepts
            .iter()
            .all(|c| surfaced.contains(c.key.as_str())));
        assert!(analysis.registry.len() > document.book.concepts.len());
        // "access" never surfaces but still counts towards chapter frequency
        assert!(analysis.registry.get("access").is_some());
        assert_eq!(analysis.corpus.frequency("access"), 2);
    }

    #[test]
    fn json_round_trip_is_byte_stable() {
        let document = Interchange::from_analysis(&analysis());
        let json = document.to_json().unwrap();
        let reloaded = Interchange::from_json(&json).unwrap();
        assert_eq!(reloaded, document);
        assert_eq!(reloaded.to_json().unwrap(), json);
    }

    #[test]
    fn rejects_other_versions() {
        let mut document = Interchange::from_analysis(&analysis());
        document.version = 2;
        let json = document.to_json().unwrap();
        assert!(matches!(
            Interchange::from_json(&json),
            Err(CardsError::Interchange(_))
        ));
        document.version = 1;
        document.format = "something-else".to_string();
        let json = document.to_json().unwrap();
        assert!(Interchange::from_json(&json).is_err());
    }
}
