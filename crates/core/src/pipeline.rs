use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::book::{Book, BookId, Chapter, ChapterId, PageRange};
use crate::cache::{CacheScope, ResultCache, Stage};
use crate::chapter_index::ChapterConceptIndex;
use crate::concepts::{CanonicalConcept, ConceptRegistry, ConceptResolver};
use crate::config::EngineConfig;
use crate::error::{CardsError, Result};
use crate::keywords::{KeywordConfig, KeywordExtractor};
use crate::normalization::{CanonicalStep, Canonicalizer};
use crate::ranker::{RankedExcerpt, SimilarityRanker};
use crate::stats::CorpusStats;
use crate::xref::{cross_reference_all, validate_pair, CrossReference};

pub const CONCEPTS_STAGE: Stage = Stage::new("concepts", 2);
pub const CORPUS_STATS_STAGE: Stage = Stage::new("corpus-stats", 2);
pub const EXCERPTS_STAGE: Stage = Stage::new("excerpts", 2);
pub const CROSS_REFERENCES_STAGE: Stage = Stage::new("cross-references", 2);

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterAnalysis {
    pub chapter: ChapterId,
    pub title: Option<String>,
    pub pages: Option<PageRange>,
    pub index: ChapterConceptIndex,
    /// Ranked excerpts per canonical concept key of `index`.
    pub excerpts: BTreeMap<String, Vec<RankedExcerpt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookAnalysis {
    pub book: BookId,
    pub title: Option<String>,
    pub chapters: Vec<ChapterAnalysis>,
    /// One record per chapter pair `i < j`, in book order.
    pub cross_references: Vec<CrossReference>,
    /// Every canonical concept of every chapter, surfaced or not.
    pub registry: ConceptRegistry,
    pub corpus: CorpusStats,
}

impl BookAnalysis {
    pub fn chapter(&self, index: u32) -> Option<&ChapterAnalysis> {
        self.chapters.get(index as usize)
    }

    /// The record for `earlier → later`. Asking for a pair out of book
    /// order, or a chapter against itself, is a consistency error.
    pub fn cross_reference(&self, earlier: u32, later: u32) -> Result<&CrossReference> {
        let source = ChapterId::new(self.book.clone(), earlier);
        let target = ChapterId::new(self.book.clone(), later);
        validate_pair(&source, &target)?;
        self.cross_references
            .iter()
            .find(|r| r.source == source && r.target == target)
            .ok_or_else(|| {
                CardsError::InvalidBook(format!(
                    "chapter pair {earlier}->{later} is outside a book of {} chapters",
                    self.chapters.len()
                ))
            })
    }

    /// Keys that made at least one chapter's index.
    pub fn indexed_keys(&self) -> BTreeSet<&str> {
        self.chapters
            .iter()
            .flat_map(|chapter| chapter.index.keys())
            .collect()
    }

    /// Later chapters that build on `chapter`.
    pub fn forward_references(&self, chapter: u32) -> impl Iterator<Item = &CrossReference> {
        self.cross_references
            .iter()
            .filter(move |r| r.source.index == chapter && !r.is_empty())
    }

    /// Earlier chapters `chapter` builds on.
    pub fn backward_references(&self, chapter: u32) -> impl Iterator<Item = &CrossReference> {
        self.cross_references
            .iter()
            .filter(move |r| r.target.index == chapter && !r.is_empty())
    }
}

/// Runs every stage over one book. Chapter-local stages run in parallel and
/// go through the result cache; the registry fold, corpus statistics and
/// cross-references are computed once all chapters are in.
///
/// Variants are merged over a chapter's full candidate list and only then cut
/// to `top_k`, and chapter frequencies count every chapter a concept occurs
/// in, surfaced there or not.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: EngineConfig,
    cache: ResultCache,
    extractor: KeywordExtractor,
    resolver: ConceptResolver,
    ranker: SimilarityRanker,
}

impl Analyzer {
    pub fn new(config: EngineConfig, cache: ResultCache) -> Self {
        let canonicalizer = Canonicalizer::default();
        Self {
            extractor: KeywordExtractor::new(config.keywords.clone()),
            resolver: ConceptResolver::new(canonicalizer.clone()),
            ranker: SimilarityRanker::new(config.ranker.clone(), canonicalizer),
            config,
            cache,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn analyze(&self, book: &Book) -> Result<BookAnalysis> {
        self.analyze_with_cancel(book, &AtomicBool::new(false))
    }

    /// Like [`Analyzer::analyze`], checking `cancel` before every chapter
    /// task. Chapters finished before cancellation stay cached.
    pub fn analyze_with_cancel(&self, book: &Book, cancel: &AtomicBool) -> Result<BookAnalysis> {
        if self.config.workers == 0 {
            return self.run(book, cancel);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| CardsError::Other(format!("failed to start worker pool: {e}")))?;
        pool.install(|| self.run(book, cancel))
    }

    fn run(&self, book: &Book, cancel: &AtomicBool) -> Result<BookAnalysis> {
        let chapter_count = book.chapters.len() as u32;
        info!(
            book = %book.id.short(),
            chapters = chapter_count,
            units = book.total_units(),
            "analyzing book"
        );

        let resolved: Vec<Vec<CanonicalConcept>> = book
            .chapters
            .par_iter()
            .map(|chapter| {
                check_cancel(cancel)?;
                Ok(self.chapter_concepts(&book.id, chapter))
            })
            .collect::<Result<_>>()?;

        let registry = ConceptRegistry::build(
            book.id.clone(),
            chapter_count,
            resolved
                .iter()
                .enumerate()
                .map(|(index, concepts)| (index as u32, concepts.as_slice())),
        );
        let corpus: CorpusStats = self.cache.cached(
            &CORPUS_STATS_STAGE,
            &book.id,
            CacheScope::Book,
            &self.concept_params(),
            || registry.corpus_stats(),
        );
        debug!(
            book = %book.id.short(),
            vocabulary = corpus.vocabulary_size(),
            "concept registry built"
        );

        let chapters: Vec<ChapterAnalysis> = book
            .chapters
            .par_iter()
            .zip(resolved.par_iter())
            .map(|(chapter, concepts)| {
                check_cancel(cancel)?;
                Ok(self.chapter_analysis(&book.id, chapter, concepts, &corpus))
            })
            .collect::<Result<_>>()?;

        check_cancel(cancel)?;
        let cross_references: Vec<CrossReference> = self.cache.cached(
            &CROSS_REFERENCES_STAGE,
            &book.id,
            CacheScope::Book,
            &(self.concept_params(), &self.config.cross_reference),
            || {
                let set = cross_reference_all(
                    chapters.iter().map(|c| &c.index),
                    &self.config.cross_reference,
                );
                for rejected in &set.rejected {
                    error!(book = %book.id.short(), "cross-reference rejected: {rejected}");
                }
                set.references
            },
        );

        let stats = self.cache.stats();
        info!(
            book = %book.id.short(),
            vocabulary = registry.len(),
            pairs = cross_references.len(),
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            cache_errors = stats.errors,
            "book analyzed"
        );

        Ok(BookAnalysis {
            book: book.id.clone(),
            title: book.title.clone(),
            chapters,
            cross_references,
            registry,
            corpus,
        })
    }

    fn chapter_concepts(&self, book: &BookId, chapter: &Chapter) -> Vec<CanonicalConcept> {
        let concepts: Vec<CanonicalConcept> = self.cache.cached(
            &CONCEPTS_STAGE,
            book,
            CacheScope::chapter(chapter.id.index),
            &self.concept_params(),
            || self.resolver.resolve(&self.extractor.candidates(&chapter.units)),
        );
        debug!(chapter = %chapter.id, concepts = concepts.len(), "chapter concepts resolved");
        concepts
    }

    fn chapter_analysis(
        &self,
        book: &BookId,
        chapter: &Chapter,
        concepts: &[CanonicalConcept],
        corpus: &CorpusStats,
    ) -> ChapterAnalysis {
        let surfaced = &concepts[..concepts.len().min(self.config.keywords.top_k)];
        let index = ChapterConceptIndex::build(chapter.id.clone(), surfaced, corpus);
        let excerpts = self.cache.cached(
            &EXCERPTS_STAGE,
            book,
            CacheScope::chapter(chapter.id.index),
            &(self.concept_params(), &self.config.ranker),
            || self.ranker.rank_chapter(&index, &chapter.units, corpus),
        );
        ChapterAnalysis {
            chapter: chapter.id.clone(),
            title: chapter.title.clone(),
            pages: chapter.pages,
            index,
            excerpts,
        }
    }

    // Everything that shapes canonical concepts; later stages build on them.
    fn concept_params(&self) -> (&KeywordConfig, &[CanonicalStep]) {
        (&self.config.keywords, self.resolver.canonicalizer().steps())
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(CardsError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::book::{BookSource, ChapterSource, TextUnit};
    use crate::cache::MemoryStore;

    fn book(chapters: &[&[&str]]) -> Book {
        let chapters = chapters
            .iter()
            .map(|texts| ChapterSource {
                title: None,
                units: texts
                    .iter()
                    .enumerate()
                    .map(|(i, text)| TextUnit::new(i as u32 + 1, 1, 2, *text))
                    .collect(),
            })
            .collect();
        Book::ingest(BookSource {
            title: Some("Fluent Patterns".to_string()),
            chapters,
        })
        .unwrap()
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(
            EngineConfig::default(),
            ResultCache::in_memory(crate::cache::DEFAULT_TTL),
        )
    }

    #[test]
    fn empty_chapters_produce_empty_results() {
        let book = book(&[&[], &["Decorators wrap functions. Decorators compose."]]);
        let analysis = analyzer().analyze(&book).unwrap();
        assert!(analysis.chapters[0].index.is_empty());
        assert!(analysis.chapters[0].excerpts.is_empty());
        assert_eq!(analysis.cross_references.len(), 1);
        assert!(analysis.cross_references[0].is_empty());
    }

    #[test]
    fn pair_lookup_enforces_book_order() {
        let book = book(&[&["closures capture"], &["closures again"], &["closures"]]);
        let analysis = analyzer().analyze(&book).unwrap();
        assert!(analysis.cross_reference(0, 2).is_ok());
        assert!(matches!(
            analysis.cross_reference(2, 0),
            Err(CardsError::Consistency(_))
        ));
        assert!(matches!(
            analysis.cross_reference(1, 1),
            Err(CardsError::Consistency(_))
        ));
        assert!(matches!(
            analysis.cross_reference(1, 7),
            Err(CardsError::InvalidBook(_))
        ));
        assert_eq!(analysis.forward_references(0).count(), 2);
        assert_eq!(analysis.backward_references(2).count(), 2);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let book = book(&[&["generators yield values"], &["generators are iterators"]]);
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(
            store.clone(),
            Arc::new(crate::cache::SystemClock),
            crate::cache::DEFAULT_TTL,
            "1",
        );
        let analyzer = Analyzer::new(EngineConfig::default(), cache);
        let first = analyzer.analyze(&book).unwrap();
        let misses = analyzer.cache().stats().misses;
        let second = analyzer.analyze(&book).unwrap();
        assert_eq!(first, second);
        assert_eq!(analyzer.cache().stats().misses, misses);
        // concepts and excerpts per chapter, plus corpus stats and pairs
        assert_eq!(store.len(), 2 * 2 + 2);
    }

    #[test]
    fn cancelled_runs_stop() {
        let book = book(&[&["iterators"], &["iterators"]]);
        let cancel = AtomicBool::new(true);
        let err = analyzer().analyze_with_cancel(&book, &cancel).unwrap_err();
        assert!(matches!(err, CardsError::Cancelled));
    }

    #[test]
    fn dedicated_worker_pool_matches_global_pool() {
        let book = book(&[&["context managers close files"], &["a context manager"]]);
        let config = EngineConfig {
            workers: 2,
            ..EngineConfig::default()
        };
        let pooled = Analyzer::new(config, ResultCache::disabled()).analyze(&book).unwrap();
        let global = Analyzer::new(EngineConfig::default(), ResultCache::disabled())
            .analyze(&book)
            .unwrap();
        assert_eq!(pooled, global);
    }
}
