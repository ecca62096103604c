use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::sync::Arc;

use crate::attrs;
use crate::csv::CsvReader;
use crate::doc::{
    Annotation, AttributeMap, Document, Font, FontChar, NextRelation, Page, Region, Supplement,
    SupplementKind, Word, WordId,
};
use crate::encode;
use crate::pageimage::{PageImageAttributes, PageImageSource};
use crate::progress::{NullProgress, Progress};
use crate::store::{EntryStore, StoreError};

use super::{
    ReadError, ANNOTATIONS_CSV, DOCUMENT_CSV, FONTS_CSV, KEY_ATTRIBUTES, KEY_BOUNDS, KEY_CHAR_ID,
    KEY_CHAR_IMAGE, KEY_CHAR_STRING, KEY_DOC_ID, KEY_FIRST_WORD, KEY_ID, KEY_IMAGE_DPI,
    KEY_LAST_WORD, KEY_MIME_TYPE, KEY_NAME, KEY_NEXT_RELATION, KEY_PAGE_ID, KEY_PREV_WORD,
    KEY_STRING, KEY_TEXT_STREAM_TYPE, KEY_TYPE, PAGES_CSV, PAGE_IMAGES_CSV, REGIONS_CSV,
    SUPPLEMENTS_CSV, WORDS_CSV,
};

/// Read a document from a store.
pub fn read_document(store: &Arc<dyn EntryStore>) -> Result<Document, ReadError> {
    read_document_with_progress(store, &mut NullProgress)
}

/// Read a document from a store, reporting coarse progress.
///
/// Sections load in fixed order because later sections reference
/// identifiers minted earlier. Mandatory sections abort on failure; optional
/// sections recover to "absent".
pub fn read_document_with_progress(
    store: &Arc<dyn EntryStore>,
    progress: &mut dyn Progress,
) -> Result<Document, ReadError> {
    progress.phase("document");
    progress.percent(0);
    let (doc_id, doc_attrs) =
        load_document_row(&**store).map_err(|e| mandatory(DOCUMENT_CSV, e))?;
    let mut doc = Document::new(&doc_id);
    for (name, value) in doc_attrs.iter() {
        doc.set_attribute(name, value);
    }

    progress.phase("fonts");
    progress.percent(10);
    if let Some(fonts) = optional(FONTS_CSV, load_fonts(&**store)) {
        for font in fonts {
            doc.add_font(font);
        }
    }

    progress.phase("page images");
    progress.percent(20);
    let image_table = optional(PAGE_IMAGES_CSV, load_page_image_table(&**store));

    progress.phase("pages");
    progress.percent(30);
    load_pages(&**store, &mut doc).map_err(|e| mandatory(PAGES_CSV, e))?;

    progress.phase("words");
    progress.percent(40);
    load_words(&**store, &mut doc).map_err(|e| mandatory(WORDS_CSV, e))?;

    progress.phase("regions");
    progress.percent(60);
    optional(REGIONS_CSV, load_regions(&**store, &mut doc));

    progress.phase("annotations");
    progress.percent(70);
    optional(ANNOTATIONS_CSV, load_annotations(&**store, &mut doc));

    progress.phase("supplements");
    progress.percent(80);
    optional(SUPPLEMENTS_CSV, load_supplements(store, &mut doc));

    let images = Arc::new(PageImageSource::new(
        Arc::clone(store),
        &doc_id,
        image_table,
    ));
    doc.bind_source(Arc::clone(store), images);

    progress.percent(100);
    Ok(doc)
}

/// Fast path: read only the document id and attributes, without
/// materializing the graph.
pub fn read_document_attributes(
    store: &dyn EntryStore,
) -> Result<(String, AttributeMap), ReadError> {
    load_document_row(store).map_err(|e| mandatory(DOCUMENT_CSV, e))
}

/// Remap an absent mandatory section to [ReadError::MissingSection].
fn mandatory(section: &'static str, err: ReadError) -> ReadError {
    match err {
        ReadError::Store(StoreError::EntryNotFound(_)) => ReadError::MissingSection(section),
        other => other,
    }
}

/// Recover an optional section failure to "absent".
fn optional<T>(section: &str, result: Result<T, ReadError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!("optional section {section} treated as absent: {err}");
            None
        }
    }
}

fn open_section(
    store: &dyn EntryStore,
    name: &str,
) -> Result<CsvReader<BufReader<Box<dyn Read>>>, ReadError> {
    let stream = store.input_stream(name)?;
    Ok(CsvReader::new(BufReader::new(stream))?)
}

fn cell<'a>(row: &'a [String], idx: Option<usize>) -> &'a str {
    idx.and_then(|i| row.get(i)).map(|s| s.as_str()).unwrap_or("")
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn malformed(section: &'static str, detail: impl Into<String>) -> ReadError {
    ReadError::MalformedRow {
        section,
        detail: detail.into(),
    }
}

fn load_document_row(store: &dyn EntryStore) -> Result<(String, AttributeMap), ReadError> {
    let mut csv = open_section(store, DOCUMENT_CSV)?;
    let id_col = csv.index_of(KEY_DOC_ID);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);
    let row = csv.read_record()?.ok_or(ReadError::MissingDocumentId)?;

    let doc_id = cell(&row, id_col);
    if doc_id.is_empty() {
        return Err(ReadError::MissingDocumentId);
    }
    Ok((
        doc_id.to_string(),
        AttributeMap::parse(cell(&row, attr_col)),
    ))
}

fn load_fonts(store: &dyn EntryStore) -> Result<Vec<Font>, ReadError> {
    let mut csv = open_section(store, FONTS_CSV)?;
    let name_col = csv.index_of(KEY_NAME);
    let id_col = csv.index_of(KEY_CHAR_ID);
    let string_col = csv.index_of(KEY_CHAR_STRING);
    let image_col = csv.index_of(KEY_CHAR_IMAGE);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    let mut fonts: Vec<Font> = Vec::new();
    while let Some(row) = csv.read_record()? {
        let name = cell(&row, name_col);
        if name.is_empty() {
            continue;
        }
        // A name change starts the next font.
        if fonts.last().map(|f| f.name() != name).unwrap_or(true) {
            fonts.push(Font::new(name));
        }
        let Some(font) = fonts.last_mut() else {
            continue;
        };

        let attr_str = cell(&row, attr_col);
        if !attr_str.is_empty() {
            font.attributes.merge(&AttributeMap::parse(attr_str));
        }

        let id_str = cell(&row, id_col);
        if id_str.is_empty() {
            continue;
        }
        let Ok(char_id) = u32::from_str_radix(id_str, 16) else {
            tracing::debug!("dropping font row with malformed char id {id_str:?}");
            continue;
        };
        font.set_char(
            char_id,
            FontChar {
                string: non_empty(cell(&row, string_col)).map(str::to_string),
                glyph: non_empty(cell(&row, image_col)).and_then(encode::decode_glyph),
            },
        );
    }
    Ok(fonts)
}

fn load_page_image_table(
    store: &dyn EntryStore,
) -> Result<HashMap<u16, PageImageAttributes>, ReadError> {
    let mut csv = open_section(store, PAGE_IMAGES_CSV)?;
    let page_col = csv.index_of(KEY_PAGE_ID);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    let mut table = HashMap::new();
    while let Some(row) = csv.read_record()? {
        let Ok(page_id) = cell(&row, page_col).parse::<u16>() else {
            tracing::debug!("dropping page image row with malformed page id");
            continue;
        };
        let attrs_map = AttributeMap::parse(cell(&row, attr_col));
        table.insert(page_id, PageImageAttributes::from_attributes(&attrs_map));
    }
    Ok(table)
}

fn load_pages(store: &dyn EntryStore, doc: &mut Document) -> Result<(), ReadError> {
    let mut csv = open_section(store, PAGES_CSV)?;
    let id_col = csv.index_of(KEY_PAGE_ID);
    let bounds_col = csv.index_of(KEY_BOUNDS);
    let dpi_col = csv.index_of(KEY_IMAGE_DPI);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    while let Some(row) = csv.read_record()? {
        let id = cell(&row, id_col)
            .parse::<u16>()
            .map_err(|_| malformed(PAGES_CSV, format!("bad page id {:?}", cell(&row, id_col))))?;
        let bounds = cell(&row, bounds_col)
            .parse()
            .map_err(|_| malformed(PAGES_CSV, format!("bad bounds for page {id}")))?;
        let dpi = cell(&row, dpi_col).parse::<u16>().unwrap_or(0);

        let mut page = Page::new(id, bounds, dpi);
        page.attributes = AttributeMap::parse(cell(&row, attr_col));
        doc.add_page(page);
    }
    Ok(())
}

struct WordRow {
    id: WordId,
    string: String,
    prev: Option<WordId>,
    relation: NextRelation,
    stream_type: Option<String>,
    attributes: AttributeMap,
}

fn load_words(store: &dyn EntryStore, doc: &mut Document) -> Result<(), ReadError> {
    let mut csv = open_section(store, WORDS_CSV)?;
    let page_col = csv.index_of(KEY_PAGE_ID);
    let bounds_col = csv.index_of(KEY_BOUNDS);
    let string_col = csv.index_of(KEY_STRING);
    let prev_col = csv.index_of(KEY_PREV_WORD);
    let rel_col = csv.index_of(KEY_NEXT_RELATION);
    let stream_col = csv.index_of(KEY_TEXT_STREAM_TYPE);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    let mut rows = Vec::new();
    while let Some(row) = csv.read_record()? {
        let page_id = cell(&row, page_col).parse::<u16>().map_err(|_| {
            malformed(WORDS_CSV, format!("bad page id {:?}", cell(&row, page_col)))
        })?;
        let bounds = cell(&row, bounds_col)
            .parse()
            .map_err(|_| malformed(WORDS_CSV, format!("bad bounds on page {page_id}")))?;
        // An unparseable back-reference reads as "no previous word"; the
        // word then heads its own stream.
        let prev = non_empty(cell(&row, prev_col)).and_then(|s| s.parse().ok());
        rows.push(WordRow {
            id: WordId::new(page_id, bounds),
            string: cell(&row, string_col).to_string(),
            prev,
            relation: cell(&row, rel_col)
                .chars()
                .next()
                .map(NextRelation::from_code)
                .unwrap_or_default(),
            stream_type: non_empty(cell(&row, stream_col)).map(str::to_string),
            attributes: AttributeMap::parse(cell(&row, attr_col)),
        });
    }

    // Pass 1: create every word on its page. Row order need not match chain
    // order, which is why linking waits for pass 2.
    for row in &rows {
        let page = doc.page_mut(row.id.page_id).ok_or_else(|| {
            malformed(
                WORDS_CSV,
                format!("word references nonexistent page {}", row.id.page_id),
            )
        })?;
        page.add_word(Word::new(row.id.bounds, row.string.clone()));
    }

    // Pass 2: resolve back-references and apply the remaining row data.
    for row in &rows {
        let prev = row
            .prev
            .filter(|p| *p != row.id && doc.word(p).is_some());
        if let Some(prev_id) = prev {
            if let Some(prev_word) = doc.word_mut(&prev_id) {
                prev_word.next = Some(row.id);
            }
        }
        let Some(word) = doc.word_mut(&row.id) else {
            continue;
        };
        word.next_relation = row.relation;
        word.attributes = row.attributes.clone();
        match prev {
            Some(prev_id) => word.prev = Some(prev_id),
            None => {
                // Chain head: takes the stream type tag.
                word.text_stream_type = Some(
                    row.stream_type
                        .clone()
                        .unwrap_or_else(|| attrs::DEFAULT_TEXT_STREAM.to_string()),
                );
            }
        }
    }
    Ok(())
}

fn load_regions(store: &dyn EntryStore, doc: &mut Document) -> Result<(), ReadError> {
    let mut csv = open_section(store, REGIONS_CSV)?;
    let page_col = csv.index_of(KEY_PAGE_ID);
    let type_col = csv.index_of(KEY_TYPE);
    let bounds_col = csv.index_of(KEY_BOUNDS);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    while let Some(row) = csv.read_record()? {
        let Ok(page_id) = cell(&row, page_col).parse::<u16>() else {
            tracing::debug!("dropping region row with malformed page id");
            continue;
        };
        let Ok(bounds) = cell(&row, bounds_col).parse() else {
            tracing::debug!("dropping region row with malformed bounds on page {page_id}");
            continue;
        };
        let region_type = cell(&row, type_col).to_string();
        let attrs_map = AttributeMap::parse(cell(&row, attr_col));
        let Some(page) = doc.page_mut(page_id) else {
            tracing::debug!("dropping region row for nonexistent page {page_id}");
            continue;
        };
        // Rows sharing (type, page, bounds) merge into one region; later
        // rows overwrite attributes.
        let existing = page
            .regions()
            .iter()
            .position(|r| r.region_type == region_type && r.bounds == bounds);
        match existing {
            Some(idx) => page.regions_mut()[idx].attributes.merge(&attrs_map),
            None => {
                let mut region = Region::new(region_type, bounds);
                region.attributes = attrs_map;
                page.add_region(region);
            }
        }
    }
    Ok(())
}

fn load_annotations(store: &dyn EntryStore, doc: &mut Document) -> Result<(), ReadError> {
    let mut csv = open_section(store, ANNOTATIONS_CSV)?;
    let type_col = csv.index_of(KEY_TYPE);
    let first_col = csv.index_of(KEY_FIRST_WORD);
    let last_col = csv.index_of(KEY_LAST_WORD);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    while let Some(row) = csv.read_record()? {
        // Unresolvable endpoints drop the row, never the load.
        let endpoint = |col: Option<usize>| -> Option<WordId> {
            let id: WordId = cell(&row, col).parse().ok()?;
            doc.word(&id).map(|_| id)
        };
        let (Some(first), Some(last)) = (endpoint(first_col), endpoint(last_col)) else {
            tracing::debug!(
                "dropping annotation {:?} with unresolvable words",
                cell(&row, type_col)
            );
            continue;
        };
        let mut annotation = Annotation::new(cell(&row, type_col), first, last);
        annotation.attributes = AttributeMap::parse(cell(&row, attr_col));
        doc.add_annotation(annotation);
    }
    Ok(())
}

fn load_supplements(store: &Arc<dyn EntryStore>, doc: &mut Document) -> Result<(), ReadError> {
    let mut csv = open_section(&**store, SUPPLEMENTS_CSV)?;
    let id_col = csv.index_of(KEY_ID);
    let type_col = csv.index_of(KEY_TYPE);
    let mime_col = csv.index_of(KEY_MIME_TYPE);
    let attr_col = csv.index_of(KEY_ATTRIBUTES);

    while let Some(row) = csv.read_record()? {
        let id = cell(&row, id_col);
        if id.is_empty() {
            tracing::debug!("dropping supplement row without id");
            continue;
        }
        let kind = SupplementKind::from_tag(cell(&row, type_col));
        let mime_type = cell(&row, mime_col).to_string();
        let subtype = mime_type
            .split_once('/')
            .map(|(_, s)| s)
            .unwrap_or(&mime_type);
        let data_name = format!("{id}.{subtype}");
        let mut supplement = Supplement::stored(id, kind, mime_type.clone(), Arc::clone(store), data_name);
        supplement.attributes = AttributeMap::parse(cell(&row, attr_col));
        // Replayed from stored state, so not an edit.
        doc.add_supplement(supplement, false);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheEntryStore;
    use std::io::Write;

    fn put(store: &dyn EntryStore, name: &str, text: &str) {
        let mut w = store.output_stream(name, false).unwrap();
        w.write_all(text.as_bytes()).unwrap();
        w.close().unwrap();
    }

    fn minimal_store() -> Arc<dyn EntryStore> {
        let store = CacheEntryStore::in_memory();
        put(
            &store,
            DOCUMENT_CSV,
            "\"docId\",\"attributes\"\r\n\"doc-1\",\"title<Testing>\"\r\n",
        );
        put(
            &store,
            PAGES_CSV,
            "\"pageId\",\"bounds\",\"imageDpi\",\"attributes\"\r\n\
             \"0\",\"[0,0,1000,1500]\",\"300\",\"\"\r\n\
             \"1\",\"[0,0,1000,1500]\",\"300\",\"\"\r\n",
        );
        // Rows deliberately out of chain order.
        put(
            &store,
            WORDS_CSV,
            "\"pageId\",\"bounds\",\"string\",\"prevWord\",\"nextRelation\",\"textStreamType\",\"attributes\"\r\n\
             \"1\",\"[10,10,70,30]\",\"second\",\"0.[10,10,60,30]\",\"S\",\"\",\"\"\r\n\
             \"0\",\"[10,10,60,30]\",\"first\",\"\",\"H\",\"\",\"bold<true>\"\r\n",
        );
        Arc::new(store)
    }

    #[test]
    fn test_minimal_document() {
        let store = minimal_store();
        let doc = read_document(&store).unwrap();

        assert_eq!(doc.doc_id(), "doc-1");
        assert_eq!(doc.attribute("title"), Some("Testing"));
        assert_eq!(doc.pages().len(), 2);
        assert_eq!(doc.fonts().len(), 0);
        assert_eq!(doc.word_count(), 2);

        // Chaining resolved across pages; the head took the default stream
        // type.
        let head = WordId::new(0, "[10,10,60,30]".parse().unwrap());
        let second = WordId::new(1, "[10,10,70,30]".parse().unwrap());
        let word = doc.word(&head).unwrap();
        assert_eq!(word.next, Some(second));
        assert_eq!(word.next_relation, NextRelation::Hyphenated);
        assert_eq!(word.text_stream_type.as_deref(), Some("mainText"));
        assert_eq!(word.attributes.get("bold"), Some("true"));
        assert_eq!(doc.word(&second).unwrap().prev, Some(head));
        assert!(doc.word(&second).unwrap().text_stream_type.is_none());
    }

    #[test]
    fn test_missing_mandatory_section() {
        let store = CacheEntryStore::in_memory();
        put(
            &store,
            DOCUMENT_CSV,
            "\"docId\",\"attributes\"\r\n\"doc-1\",\"\"\r\n",
        );
        let store: Arc<dyn EntryStore> = Arc::new(store);
        match read_document(&store) {
            Err(ReadError::MissingSection(section)) => assert_eq!(section, PAGES_CSV),
            other => panic!("expected MissingSection, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_document_id() {
        let store = CacheEntryStore::in_memory();
        put(
            &store,
            DOCUMENT_CSV,
            "\"docId\",\"attributes\"\r\n\"\",\"\"\r\n",
        );
        let store: Arc<dyn EntryStore> = Arc::new(store);
        assert!(matches!(
            read_document(&store),
            Err(ReadError::MissingDocumentId)
        ));
    }

    #[test]
    fn test_unresolvable_annotation_dropped() {
        let store = minimal_store();
        put(
            &*store,
            ANNOTATIONS_CSV,
            "\"type\",\"firstWord\",\"lastWord\",\"attributes\"\r\n\
             \"emphasis\",\"0.[10,10,60,30]\",\"1.[10,10,70,30]\",\"\"\r\n\
             \"broken\",\"0.[10,10,60,30]\",\"5.[1,1,2,2]\",\"\"\r\n",
        );
        let doc = read_document(&store).unwrap();
        assert_eq!(doc.annotations().len(), 1);
        assert_eq!(doc.annotations()[0].annotation_type, "emphasis");
    }

    #[test]
    fn test_region_rows_merge() {
        let store = minimal_store();
        put(
            &*store,
            REGIONS_CSV,
            "\"pageId\",\"type\",\"bounds\",\"attributes\"\r\n\
             \"0\",\"block\",\"[0,0,500,500]\",\"kind<body>\"\r\n\
             \"0\",\"block\",\"[0,0,500,500]\",\"kind<column>\"\r\n\
             \"0\",\"table\",\"[0,0,500,500]\",\"\"\r\n",
        );
        let doc = read_document(&store).unwrap();
        let regions = doc.page(0).unwrap().regions();
        assert_eq!(regions.len(), 2);
        let block = regions.iter().find(|r| r.region_type == "block").unwrap();
        // The later row overwrote the attribute.
        assert_eq!(block.attributes.get("kind"), Some("column"));
    }

    #[test]
    fn test_corrupt_optional_section_is_absent() {
        let store = minimal_store();
        put(&*store, FONTS_CSV, "");
        let doc = read_document(&store).unwrap();
        assert_eq!(doc.fonts().len(), 0);
    }

    #[test]
    fn test_fonts_group_by_contiguous_name() {
        let store = minimal_store();
        put(
            &*store,
            FONTS_CSV,
            "\"name\",\"charId\",\"charString\",\"charImage\",\"attributes\"\r\n\
             \"F0\",\"41\",\"A\",\"f00f\",\"serif<true>\"\r\n\
             \"F0\",\"42\",\"B\",\"\",\"\"\r\n\
             \"F1\",\"43\",\"C\",\"\",\"\"\r\n",
        );
        let doc = read_document(&store).unwrap();
        assert_eq!(doc.fonts().len(), 2);
        let f0 = doc.font("F0").unwrap();
        assert_eq!(f0.char_count(), 2);
        assert_eq!(f0.attributes.get("serif"), Some("true"));
        assert_eq!(f0.char(0x41).unwrap().glyph.as_deref(), Some(&[0xf0, 0x0f][..]));
        assert_eq!(doc.font("F1").unwrap().char_count(), 1);
    }

    #[test]
    fn test_fast_path_attributes() {
        let store = minimal_store();
        let (doc_id, attrs) = read_document_attributes(&*store).unwrap();
        assert_eq!(doc_id, "doc-1");
        assert_eq!(attrs.get("title"), Some("Testing"));
    }

    #[test]
    fn test_supplement_lazily_bound() {
        let store = minimal_store();
        put(
            &*store,
            SUPPLEMENTS_CSV,
            "\"id\",\"type\",\"mimeType\",\"attributes\"\r\n\
             \"fig-1\",\"figure\",\"image/png\",\"caption<Fig 1>\"\r\n",
        );
        {
            let mut w = store.output_stream("fig-1.png", false).unwrap();
            w.write_all(b"payload").unwrap();
            w.close().unwrap();
        }
        let doc = read_document(&store).unwrap();
        let supp = doc.supplement("fig-1").unwrap();
        assert_eq!(supp.kind, SupplementKind::Figure);
        assert_eq!(supp.attributes.get("caption"), Some("Fig 1"));
        assert!(!doc.is_supplement_dirty("fig-1"));
        assert_eq!(supp.bytes().unwrap(), b"payload");
    }
}
