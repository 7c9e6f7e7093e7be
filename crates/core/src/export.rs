use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use conceptcards_index::{
    ChapterRecord, ConceptRecord, CrossReferenceRecord, ExcerptRecord, IndexRecord, JsonlWriter,
    SharedRecord,
};

use crate::error::Result;
use crate::interchange::Interchange;

/// Flattens an interchange document into JSONL records: each chapter is
/// followed by its concepts, each concept by its excerpts, and the
/// cross-references close the stream in book order.
pub fn index_records(document: &Interchange) -> Vec<IndexRecord> {
    let book_id = document.book.id.as_str();
    let mut records = Vec::new();
    for chapter in &document.chapters {
        let chapter_index = chapter.chapter.index;
        records.push(IndexRecord::Chapter(ChapterRecord {
            book_id: book_id.to_string(),
            chapter: chapter_index,
            title: chapter.title.clone(),
            first_page: chapter.pages.map(|p| p.first),
            last_page: chapter.pages.map(|p| p.last),
            concept_count: chapter.concepts.len() as u32,
        }));
        for (rank, card) in chapter.concepts.iter().enumerate() {
            let concept = &card.concept;
            records.push(IndexRecord::Concept(ConceptRecord {
                book_id: book_id.to_string(),
                chapter: chapter_index,
                rank: rank as u32 + 1,
                key: concept.key.clone(),
                display_form: concept.display_form.clone(),
                surface_forms: concept.surface_forms.clone(),
                count: concept.count,
                salience: concept.salience,
                chapter_frequency: concept.chapter_frequency,
            }));
            records.extend(card.excerpts.iter().enumerate().map(|(rank, excerpt)| {
                IndexRecord::Excerpt(ExcerptRecord {
                    book_id: book_id.to_string(),
                    chapter: chapter_index,
                    key: concept.key.clone(),
                    rank: rank as u32 + 1,
                    page: excerpt.page,
                    line_start: excerpt.line_start,
                    line_end: excerpt.line_end,
                    text: excerpt.text.clone(),
                    score: excerpt.score,
                })
            }));
        }
    }
    records.extend(document.cross_references.iter().map(|reference| {
        IndexRecord::CrossReference(CrossReferenceRecord {
            book_id: book_id.to_string(),
            source: reference.source.index,
            target: reference.target.index,
            shared_total: reference.shared_total,
            shared: reference
                .shared
                .iter()
                .map(|shared| SharedRecord {
                    key: shared.key.clone(),
                    display_form: shared.display_form.clone(),
                    combined: shared.combined,
                })
                .collect(),
        })
    }));
    records
}

pub fn write_jsonl<W: Write>(document: &Interchange, writer: W) -> Result<usize> {
    let mut writer = JsonlWriter::new(writer);
    for record in index_records(document) {
        writer.write_record(&record)?;
    }
    let written = writer.written();
    writer.into_inner()?;
    Ok(written)
}

pub fn export_jsonl<P: AsRef<Path>>(document: &Interchange, path: P) -> Result<usize> {
    let file = File::create(path)?;
    write_jsonl(document, BufWriter::new(file))
}
