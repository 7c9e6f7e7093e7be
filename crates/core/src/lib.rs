mod book;
mod cache;
mod chapter_index;
mod concepts;
mod config;
mod error;
mod export;
mod interchange;
mod keywords;
mod normalization;
mod pipeline;
mod ranker;
mod stats;
mod xref;

pub use book::{Book, BookId, BookSource, Chapter, ChapterId, ChapterSource, PageRange, TextUnit};
pub use cache::{
    CacheEntry, CacheKey, CacheScope, CacheStats, CacheStore, Clock, DisabledStore, FileStore,
    ManualClock, MemoryStore, ResultCache, Stage, SystemClock, DEFAULT_TTL,
};
pub use chapter_index::{ChapterConceptIndex, IndexedConcept};
pub use concepts::{
    CanonicalConcept, ChapterOccurrence, ConceptEntry, ConceptRegistry, ConceptResolver,
};
pub use config::{CacheConfig, EngineConfig};
pub use error::{CardsError, ConsistencyError, Result};
pub use export::{export_jsonl, index_records, write_jsonl};
pub use interchange::{
    BookSummary, ChapterCards, ConceptCard, ConceptSummary, Interchange, INTERCHANGE_FORMAT,
    INTERCHANGE_VERSION,
};
pub use keywords::{KeywordConfig, KeywordExtractor, RankedPhrase};
pub use normalization::{
    normalize_line, normalize_text, segments, CanonicalStep, Canonicalizer, HyphenationMode,
};
pub use pipeline::{
    Analyzer, BookAnalysis, ChapterAnalysis, CONCEPTS_STAGE, CORPUS_STATS_STAGE,
    CROSS_REFERENCES_STAGE, EXCERPTS_STAGE,
};
pub use ranker::{RankedExcerpt, RankerConfig, SimilarityRanker};
pub use stats::{round_score, CorpusStats};
pub use xref::{
    cross_reference, cross_reference_all, validate_pair, CombineMode, CrossReference,
    CrossReferenceConfig, CrossReferenceSet, SharedConcept,
};
