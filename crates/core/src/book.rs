use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CardsError, Result};

const SHORT_ID_CHARS: usize = 12;

/// Content hash of a whole book. Any change to any unit yields a new id,
/// which is what keys cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Parses a full id as printed by `book-id`: 64 hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        let bytes = hex::decode(&raw)
            .map_err(|e| CardsError::InvalidBook(format!("book id {raw:?} is not hex: {e}")))?;
        if bytes.len() != blake3::OUT_LEN {
            return Err(CardsError::InvalidBook(format!(
                "book id must be {} hex characters, got {}",
                blake3::OUT_LEN * 2,
                raw.len()
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        self.0.get(..SHORT_ID_CHARS).unwrap_or(&self.0)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChapterId {
    pub book: BookId,
    pub index: u32,
}

impl ChapterId {
    pub fn new(book: BookId, index: u32) -> Self {
        Self { book, index }
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.book.short(), self.index)
    }
}

/// One addressable excerpt: a line range on a page and its raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub page: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub text: String,
}

impl TextUnit {
    pub fn new(page: u32, line_start: u32, line_end: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            line_start,
            line_end,
            text: text.into(),
        }
        .sanitized()
    }

    fn sanitized(mut self) -> Self {
        if self.line_end < self.line_start {
            std::mem::swap(&mut self.line_start, &mut self.line_end);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: Option<String>,
    pub pages: Option<PageRange>,
    pub units: Vec<TextUnit>,
}

impl Chapter {
    pub fn index(&self) -> usize {
        self.id.index as usize
    }

    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|unit| unit.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: Option<String>,
    pub chapters: Vec<Chapter>,
}

/// What the ingestion collaborator hands over: ordered chapters of
/// page/line-addressed units, without identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookSource {
    #[serde(default)]
    pub title: Option<String>,
    pub chapters: Vec<ChapterSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterSource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub units: Vec<TextUnit>,
}

impl Book {
    pub fn ingest(source: BookSource) -> Result<Self> {
        if source.chapters.is_empty() {
            return Err(CardsError::InvalidBook("book has no chapters".to_string()));
        }
        let chapters: Vec<ChapterSource> = source
            .chapters
            .into_iter()
            .map(|chapter| ChapterSource {
                title: chapter.title,
                units: chapter.units.into_iter().map(TextUnit::sanitized).collect(),
            })
            .collect();
        let id = hash_book(source.title.as_deref(), &chapters);
        let chapters = chapters
            .into_iter()
            .enumerate()
            .map(|(index, chapter)| {
                let pages = page_range(&chapter.units);
                Chapter {
                    id: ChapterId::new(id.clone(), index as u32),
                    title: chapter.title,
                    pages,
                    units: chapter.units,
                }
            })
            .collect();
        Ok(Self {
            id,
            title: source.title,
            chapters,
        })
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let source: BookSource = serde_json::from_reader(BufReader::new(file))?;
        Self::ingest(source)
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn total_units(&self) -> usize {
        self.chapters.iter().map(|c| c.units.len()).sum()
    }
}

fn page_range(units: &[TextUnit]) -> Option<PageRange> {
    let first = units.iter().map(|u| u.page).min()?;
    let last = units.iter().map(|u| u.page).max()?;
    Some(PageRange { first, last })
}

fn hash_book(title: Option<&str>, chapters: &[ChapterSource]) -> BookId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"book\0");
    update_str(&mut hasher, title.unwrap_or_default());
    for (index, chapter) in chapters.iter().enumerate() {
        hasher.update(b"chapter\0");
        hasher.update(&(index as u64).to_le_bytes());
        update_str(&mut hasher, chapter.title.as_deref().unwrap_or_default());
        for unit in &chapter.units {
            hasher.update(&unit.page.to_le_bytes());
            hasher.update(&unit.line_start.to_le_bytes());
            hasher.update(&unit.line_end.to_le_bytes());
            update_str(&mut hasher, &unit.text);
        }
    }
    BookId(hex::encode(hasher.finalize().as_bytes()))
}

// Length-prefixed so that field boundaries cannot be shifted between units.
fn update_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(texts: &[&[&str]]) -> BookSource {
        BookSource {
            title: Some("Sample".to_string()),
            chapters: texts
                .iter()
                .map(|units| ChapterSource {
                    title: None,
                    units: units
                        .iter()
                        .enumerate()
                        .map(|(i, text)| TextUnit::new(1 + i as u32, 1, 2, *text))
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn identical_content_hashes_identically() {
        let a = Book::ingest(source(&[&["one", "two"], &["three"]])).unwrap();
        let b = Book::ingest(source(&[&["one", "two"], &["three"]])).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.chapters[1].id, b.chapters[1].id);
    }

    #[test]
    fn moving_text_between_units_changes_id() {
        let a = Book::ingest(source(&[&["ab", "c"]])).unwrap();
        let b = Book::ingest(source(&[&["a", "bc"]])).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_books_without_chapters() {
        let err = Book::ingest(BookSource::default()).unwrap_err();
        assert!(matches!(err, CardsError::InvalidBook(_)));
    }

    #[test]
    fn sanitizes_inverted_line_ranges() {
        let unit = TextUnit::new(3, 9, 4, "text");
        assert_eq!((unit.line_start, unit.line_end), (4, 9));
    }

    #[test]
    fn page_range_spans_units() {
        let book = Book::ingest(source(&[&["a", "b", "c"], &[]])).unwrap();
        assert_eq!(
            book.chapters[0].pages,
            Some(PageRange { first: 1, last: 3 })
        );
        assert_eq!(book.chapters[1].pages, None);
        assert!(book.chapters[1].is_empty());
        assert_eq!(book.chapters[1].id.to_string(), format!("{}:1", book.id.short()));
    }

    #[test]
    fn parses_printed_ids_only() {
        let book = Book::ingest(source(&[&["a"]])).unwrap();
        let parsed = BookId::parse(&book.id.as_str().to_uppercase()).unwrap();
        assert_eq!(parsed, book.id);
        assert!(BookId::parse("abc").is_err());
        assert!(BookId::parse(&"zz".repeat(32)).is_err());
    }
}
