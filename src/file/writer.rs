use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::csv::CsvWriter;
use crate::doc::{Document, Word, WordId};
use crate::pageimage::{PageImageAttributes, PageImageSource};
use crate::progress::{NullProgress, Progress};
use crate::store::{Entry, EntryStore, EntryWrite};

use super::{
    WriteError, WriteMode, WriteOptions, ANNOTATIONS_CSV, DIRECT_WRITE_THRESHOLD, DOCUMENT_CSV,
    FONTS_CSV, KEY_ATTRIBUTES, KEY_BOUNDS, KEY_CHAR_ID, KEY_CHAR_IMAGE, KEY_CHAR_STRING,
    KEY_DOC_ID, KEY_FIRST_WORD, KEY_ID, KEY_IMAGE_DPI, KEY_LAST_WORD, KEY_MIME_TYPE, KEY_NAME,
    KEY_NEXT_RELATION, KEY_PAGE_ID, KEY_PREV_WORD, KEY_STRING, KEY_TEXT_STREAM_TYPE, KEY_TYPE,
    PAGES_CSV, PAGE_IMAGES_CSV, REGIONS_CSV, SUPPLEMENTS_CSV, WORDS_CSV, WORD_ROW_BYTES,
};

/// Write a document to a store with default options.
pub fn write_document(doc: &mut Document, target: &Arc<dyn EntryStore>) -> Result<(), WriteError> {
    write_document_with_options(doc, target, &WriteOptions::default(), &mut NullProgress)
}

/// Write a document to a store.
///
/// Tabular sections go first, large payloads (page images, supplement
/// bytes) last. When the target is the very store the document was loaded
/// from, unchanged payloads are not rewritten: only their entry is carried
/// forward. On success the target is finalized with the exact entry set
/// written, and a same-store document is rebound to the target.
pub fn write_document_with_options(
    doc: &mut Document,
    target: &Arc<dyn EntryStore>,
    options: &WriteOptions,
    progress: &mut dyn Progress,
) -> Result<(), WriteError> {
    let direct = match options.mode {
        WriteMode::Buffered => false,
        WriteMode::Direct => true,
        WriteMode::Auto => doc.word_count() as u64 * WORD_ROW_BYTES > DIRECT_WRITE_THRESHOLD,
    };
    let incremental = matches!(
        (doc.source_store_id(), target.store_id().as_deref()),
        (Some(source), Some(dest)) if source == dest
    );

    let mut written: Vec<Entry> = Vec::new();

    progress.phase("document");
    progress.percent(0);
    written.push(write_document_row(doc, &**target)?);

    progress.phase("pages");
    progress.percent(10);
    written.push(write_pages(doc, &**target)?);

    progress.phase("words");
    progress.percent(20);
    written.push(write_words(doc, &**target, direct)?);

    progress.phase("regions");
    progress.percent(40);
    if doc.pages().iter().any(|p| !p.regions().is_empty()) {
        written.push(write_regions(doc, &**target, direct)?);
    }

    progress.phase("annotations");
    progress.percent(45);
    if !doc.annotations().is_empty() {
        written.push(write_annotations(doc, &**target, direct)?);
    }

    progress.phase("fonts");
    progress.percent(50);
    if !doc.fonts().is_empty() {
        written.push(write_fonts(doc, &**target, direct)?);
    }

    progress.phase("supplements");
    progress.percent(55);
    if !doc.supplements().is_empty() {
        written.push(write_supplement_rows(doc, &**target)?);
    }

    progress.phase("page images");
    progress.percent(60);
    let mut image_table: Vec<(u16, PageImageAttributes)> = Vec::new();
    let page_ids: Vec<u16> = doc.pages().iter().map(|p| p.id()).collect();
    for page_id in page_ids {
        if let Some(attributes) =
            write_page_image(doc, target, incremental, page_id, &mut written)?
        {
            image_table.push((page_id, attributes));
        }
    }
    if !image_table.is_empty() {
        written.push(write_page_image_rows(&image_table, &**target)?);
    }

    progress.phase("supplement payloads");
    progress.percent(80);
    for index in 0..doc.supplements().len() {
        write_supplement_payload(doc, target, incremental, index, &mut written)?;
    }

    target.finalize(&written)?;

    if incremental {
        let table: HashMap<u16, PageImageAttributes> = image_table.into_iter().collect();
        let images = Arc::new(PageImageSource::new(
            Arc::clone(target),
            doc.doc_id().to_string(),
            Some(table),
        ));
        doc.rebind(Arc::clone(target), images);
    }

    progress.percent(100);
    Ok(())
}

fn open_section<'a>(
    target: &'a dyn EntryStore,
    name: &str,
    direct: bool,
    keys: &[&str],
) -> Result<CsvWriter<Box<dyn EntryWrite + 'a>>, WriteError> {
    Ok(CsvWriter::new(target.output_stream(name, direct)?, keys)?)
}

fn close_section(writer: CsvWriter<Box<dyn EntryWrite + '_>>) -> Result<Entry, WriteError> {
    Ok(writer.into_inner().close()?)
}

fn write_document_row(doc: &Document, target: &dyn EntryStore) -> Result<Entry, WriteError> {
    let mut csv = open_section(target, DOCUMENT_CSV, false, &[KEY_DOC_ID, KEY_ATTRIBUTES])?;
    csv.write_record(&[doc.doc_id(), doc.attributes().linearize().as_str()])?;
    close_section(csv)
}

fn write_pages(doc: &Document, target: &dyn EntryStore) -> Result<Entry, WriteError> {
    let mut csv = open_section(
        target,
        PAGES_CSV,
        false,
        &[KEY_PAGE_ID, KEY_BOUNDS, KEY_IMAGE_DPI, KEY_ATTRIBUTES],
    )?;
    for page in doc.pages() {
        let id = page.id().to_string();
        let bounds = page.bounds.to_string();
        let dpi = page.image_dpi.to_string();
        let attrs = page.attributes.linearize();
        csv.write_record(&[id.as_str(), bounds.as_str(), dpi.as_str(), attrs.as_str()])?;
    }
    close_section(csv)
}

/// Global text stream position of every reachable word.
fn stream_order(doc: &Document) -> HashMap<WordId, usize> {
    let mut order = HashMap::new();
    for head in doc.chain_heads() {
        for (id, _) in doc.text_stream(head) {
            if !order.contains_key(&id) {
                order.insert(id, order.len());
            }
        }
    }
    order
}

fn write_words(doc: &Document, target: &dyn EntryStore, direct: bool) -> Result<Entry, WriteError> {
    // Words go out per page in text stream order; the sort runs on every
    // store.
    let order = stream_order(doc);
    let mut csv = open_section(
        target,
        WORDS_CSV,
        direct,
        &[
            KEY_PAGE_ID,
            KEY_BOUNDS,
            KEY_STRING,
            KEY_PREV_WORD,
            KEY_NEXT_RELATION,
            KEY_TEXT_STREAM_TYPE,
            KEY_ATTRIBUTES,
        ],
    )?;
    for page in doc.pages() {
        let page_id = page.id().to_string();
        let mut words: Vec<&Word> = page.words().iter().collect();
        words.sort_by_key(|word| {
            order
                .get(&WordId::new(page.id(), word.bounds))
                .copied()
                .unwrap_or(usize::MAX)
        });
        for word in words {
            let bounds = word.bounds.to_string();
            let prev = word.prev.map(|p| p.to_string()).unwrap_or_default();
            let relation = word.next_relation.code().to_string();
            let stream_type = word.text_stream_type.clone().unwrap_or_default();
            let attrs = word.attributes.linearize();
            csv.write_record(&[
                page_id.as_str(),
                bounds.as_str(),
                word.string.as_str(),
                prev.as_str(),
                relation.as_str(),
                stream_type.as_str(),
                attrs.as_str(),
            ])?;
        }
    }
    close_section(csv)
}

fn write_regions(
    doc: &Document,
    target: &dyn EntryStore,
    direct: bool,
) -> Result<Entry, WriteError> {
    let mut csv = open_section(
        target,
        REGIONS_CSV,
        direct,
        &[KEY_PAGE_ID, KEY_TYPE, KEY_BOUNDS, KEY_ATTRIBUTES],
    )?;
    for page in doc.pages() {
        let page_id = page.id().to_string();
        for region in page.regions() {
            let bounds = region.bounds.to_string();
            let attrs = region.attributes.linearize();
            csv.write_record(&[
                page_id.as_str(),
                region.region_type.as_str(),
                bounds.as_str(),
                attrs.as_str(),
            ])?;
        }
    }
    close_section(csv)
}

fn write_annotations(
    doc: &Document,
    target: &dyn EntryStore,
    direct: bool,
) -> Result<Entry, WriteError> {
    let mut csv = open_section(
        target,
        ANNOTATIONS_CSV,
        direct,
        &[KEY_TYPE, KEY_FIRST_WORD, KEY_LAST_WORD, KEY_ATTRIBUTES],
    )?;
    for annotation in doc.annotations() {
        // An annotation whose endpoints vanished since load is not worth a
        // row; the reader would drop it anyway.
        if doc.word(&annotation.first).is_none() || doc.word(&annotation.last).is_none() {
            tracing::debug!(
                "skipping annotation {:?} with dangling words",
                annotation.annotation_type
            );
            continue;
        }
        let first = annotation.first.to_string();
        let last = annotation.last.to_string();
        let attrs = annotation.attributes.linearize();
        csv.write_record(&[
            annotation.annotation_type.as_str(),
            first.as_str(),
            last.as_str(),
            attrs.as_str(),
        ])?;
    }
    close_section(csv)
}

fn write_fonts(doc: &Document, target: &dyn EntryStore, direct: bool) -> Result<Entry, WriteError> {
    let mut csv = open_section(
        target,
        FONTS_CSV,
        direct,
        &[
            KEY_NAME,
            KEY_CHAR_ID,
            KEY_CHAR_STRING,
            KEY_CHAR_IMAGE,
            KEY_ATTRIBUTES,
        ],
    )?;
    for font in doc.fonts() {
        let attrs = font.attributes.linearize();
        let mut first_row = true;
        if font.char_count() == 0 {
            // A char-less font still gets one row so its attributes survive.
            csv.write_record(&[font.name(), "", "", "", attrs.as_str()])?;
            continue;
        }
        for (char_id, entry) in font.chars() {
            let id = format!("{char_id:X}");
            let glyph = entry
                .glyph
                .as_deref()
                .map(crate::encode::encode_glyph)
                .unwrap_or_default();
            let row_attrs = if first_row { attrs.as_str() } else { "" };
            csv.write_record(&[
                font.name(),
                id.as_str(),
                entry.string.as_deref().unwrap_or(""),
                glyph.as_str(),
                row_attrs,
            ])?;
            first_row = false;
        }
    }
    close_section(csv)
}

fn write_supplement_rows(doc: &Document, target: &dyn EntryStore) -> Result<Entry, WriteError> {
    let mut csv = open_section(
        target,
        SUPPLEMENTS_CSV,
        false,
        &[KEY_ID, KEY_TYPE, KEY_MIME_TYPE, KEY_ATTRIBUTES],
    )?;
    for supplement in doc.supplements() {
        let attrs = supplement.attributes.linearize();
        csv.write_record(&[
            supplement.id(),
            supplement.kind.tag(),
            supplement.mime_type.as_str(),
            attrs.as_str(),
        ])?;
    }
    close_section(csv)
}

fn write_page_image_rows(
    table: &[(u16, PageImageAttributes)],
    target: &dyn EntryStore,
) -> Result<Entry, WriteError> {
    let mut csv = open_section(target, PAGE_IMAGES_CSV, false, &[KEY_PAGE_ID, KEY_ATTRIBUTES])?;
    for (page_id, attributes) in table {
        let id = page_id.to_string();
        let attrs = attributes.to_attributes().linearize();
        csv.write_record(&[id.as_str(), attrs.as_str()])?;
    }
    close_section(csv)
}

/// Write or carry one page image. Returns the geometry for the side table,
/// or `None` when the page has no image.
fn write_page_image(
    doc: &Document,
    target: &Arc<dyn EntryStore>,
    incremental: bool,
    page_id: u16,
    written: &mut Vec<Entry>,
) -> Result<Option<PageImageAttributes>, WriteError> {
    let entry_name = format!("{}.{}.png", doc.doc_id(), page_id);

    // A replaced image always goes out in full.
    if let Some(image) = doc.replaced_image(page_id) {
        let mut sink = target.output_stream(&entry_name, true)?;
        sink.write_all(&image.bytes)?;
        written.push(sink.close()?);
        return Ok(Some(image.attributes));
    }

    let Some(binding) = doc.source() else {
        return Ok(None);
    };
    let Some(source_entry) = binding.images.entry(page_id) else {
        return Ok(None);
    };

    let attributes = binding.images.attributes(page_id)?;
    if incremental && target.has_entry_data(&source_entry) {
        // Same store, unchanged payload: carry the entry, leave the bytes.
        target.put_entry(source_entry.clone());
        written.push(source_entry);
        return Ok(Some(attributes));
    }

    // Full copy, always in the table-based form (raw image bytes).
    let (attributes, mut reader) = binding.images.open(page_id)?;
    let mut sink = target.output_stream(&entry_name, true)?;
    std::io::copy(&mut reader, &mut sink)?;
    written.push(sink.close()?);
    Ok(Some(attributes))
}

/// Write or carry one supplement payload.
fn write_supplement_payload(
    doc: &Document,
    target: &Arc<dyn EntryStore>,
    incremental: bool,
    index: usize,
    written: &mut Vec<Entry>,
) -> Result<(), WriteError> {
    let supplement = &doc.supplements()[index];
    let name = supplement.data_name();

    if incremental && !doc.is_supplement_dirty(supplement.id()) {
        if let Some(binding) = doc.source() {
            if let Some(entry) = binding.store.entry(&name) {
                if target.has_entry_data(&entry) {
                    target.put_entry(entry.clone());
                    written.push(entry);
                    return Ok(());
                }
            }
        }
    }

    let mut reader = supplement.reader()?;
    let mut sink = target.output_stream(&name, true)?;
    std::io::copy(&mut reader, &mut sink)?;
    written.push(sink.close()?);
    Ok(())
}
