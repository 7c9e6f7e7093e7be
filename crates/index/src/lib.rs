use std::io::{BufRead, Write};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// One line of a `.cards.jsonl` export. Every line names its record kind so
/// consumers can stream the file without knowing its layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum IndexRecord {
    Chapter(ChapterRecord),
    Concept(ConceptRecord),
    Excerpt(ExcerptRecord),
    CrossReference(CrossReferenceRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChapterRecord {
    pub book_id: String,
    pub chapter: u32,
    pub title: Option<String>,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
    pub concept_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConceptRecord {
    pub book_id: String,
    pub chapter: u32,
    pub rank: u32,
    pub key: String,
    pub display_form: String,
    #[serde(default)]
    pub surface_forms: Vec<String>,
    pub count: u32,
    pub salience: f64,
    pub chapter_frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExcerptRecord {
    pub book_id: String,
    pub chapter: u32,
    pub key: String,
    pub rank: u32,
    pub page: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrossReferenceRecord {
    pub book_id: String,
    pub source: u32,
    pub target: u32,
    pub shared_total: u32,
    #[serde(default)]
    pub shared: Vec<SharedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SharedRecord {
    pub key: String,
    pub display_form: String,
    pub combined: f64,
}

pub struct JsonlWriter<W> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads an export back, skipping blank lines.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<IndexRecord>> {
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| anyhow!("line {}: invalid record: {e}", number + 1))?;
        records.push(record);
    }
    Ok(records)
}
