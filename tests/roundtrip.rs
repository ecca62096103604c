//! End-to-end store/load round-trips over the folder and archive backings.

use std::io::Cursor;
use std::sync::Arc;

use imf_format::{
    read_document, write_document, Annotation, BoundingBox, Document, Entry, EntryStore,
    FolderEntryStore, Font, FontChar, NextRelation, Page, PageImage, PageImageAttributes,
    Supplement, SupplementKind, Word, WordId, ZipSourceEntryStore, ZipTargetEntryStore,
};

fn word_id(page: u16, left: i32) -> WordId {
    WordId::new(page, BoundingBox::new(left, 100, left + 50, 120))
}

fn png_bytes(tag: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&[tag; 16]);
    bytes
}

fn image_attrs() -> PageImageAttributes {
    PageImageAttributes {
        original_width: 2480,
        original_height: 3508,
        original_dpi: 300,
        current_dpi: 300,
        left_edge: 10,
        right_edge: 10,
        top_edge: 20,
        bottom_edge: 20,
    }
}

/// Two pages, three words chained across the page boundary, a region, an
/// annotation, a font, a supplement and a page image.
fn build_document() -> Document {
    let mut doc = Document::new("doc-rt");
    doc.set_attribute("title", "Round & Trip <test>");

    for id in 0..2u16 {
        doc.add_page(Page::new(id, BoundingBox::new(0, 0, 2480, 3508), 300));
    }

    let a = word_id(0, 100);
    let b = word_id(0, 200);
    let c = word_id(1, 100);
    {
        let page = doc.page_mut(0).unwrap();
        let mut word = Word::new(a.bounds, "inter-");
        word.next_relation = NextRelation::Hyphenated;
        word.text_stream_type = Some("mainText".to_string());
        page.add_word(word);
        page.add_word(Word::new(b.bounds, "rupted"));
    }
    doc.page_mut(1)
        .unwrap()
        .add_word(Word::new(c.bounds, "flow"));
    doc.set_next_word(&a, &b);
    doc.set_next_word(&b, &c);
    doc.word_mut(&b).unwrap().next_relation = NextRelation::Separate;

    let mut region =
        imf_format::Region::new("block", BoundingBox::new(50, 50, 2400, 3400));
    region.attributes.set("kind", "body");
    doc.page_mut(0).unwrap().add_region(region);

    let mut annotation = Annotation::new("emphasis", a, c);
    annotation.attributes.set("strength", "strong");
    doc.add_annotation(annotation);

    let mut font = Font::new("Embedded-7");
    font.attributes.set("serif", "true");
    font.set_char(
        0x41,
        FontChar {
            string: Some("A".to_string()),
            glyph: Some(vec![0xde, 0xad, 0xbe, 0xef]),
        },
    );
    doc.add_font(font);

    let mut supplement = Supplement::new(
        "scan-0",
        SupplementKind::Scan,
        "image/png",
        png_bytes(7),
    );
    supplement.attributes.set("page", "0");
    doc.add_supplement(supplement, true);

    doc.set_page_image(
        0,
        PageImage {
            attributes: image_attrs(),
            bytes: png_bytes(1),
        },
    );

    doc
}

fn assert_roundtripped(doc: &Document) {
    assert_eq!(doc.doc_id(), "doc-rt");
    assert_eq!(doc.attribute("title"), Some("Round & Trip <test>"));
    assert_eq!(doc.pages().len(), 2);
    assert_eq!(doc.word_count(), 3);

    let a = word_id(0, 100);
    let b = word_id(0, 200);
    let c = word_id(1, 100);

    // Chain structure by page and bounds equality, across the page boundary.
    let first = doc.word(&a).unwrap();
    assert_eq!(first.next, Some(b));
    assert_eq!(first.next_relation, NextRelation::Hyphenated);
    assert_eq!(first.text_stream_type.as_deref(), Some("mainText"));
    assert_eq!(doc.word(&b).unwrap().next, Some(c));
    assert_eq!(doc.word(&c).unwrap().prev, Some(b));
    assert!(doc.word(&c).unwrap().text_stream_type.is_none());

    let strings: Vec<String> = doc
        .text_stream(a)
        .map(|(_, w)| w.string.clone())
        .collect();
    assert_eq!(strings, ["inter-", "rupted", "flow"]);

    // Regions and annotations.
    let regions = doc.page(0).unwrap().regions();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].region_type, "block");
    assert_eq!(regions[0].attributes.get("kind"), Some("body"));

    assert_eq!(doc.annotations().len(), 1);
    let annotation = &doc.annotations()[0];
    assert_eq!(annotation.annotation_type, "emphasis");
    assert_eq!(annotation.first, a);
    assert_eq!(annotation.last, c);
    assert_eq!(annotation.attributes.get("strength"), Some("strong"));

    // Font character table.
    let font = doc.font("Embedded-7").unwrap();
    assert_eq!(font.attributes.get("serif"), Some("true"));
    let char_a = font.char(0x41).unwrap();
    assert_eq!(char_a.string.as_deref(), Some("A"));
    assert_eq!(char_a.glyph.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));

    // Byte-identical payloads.
    let supplement = doc.supplement("scan-0").unwrap();
    assert_eq!(supplement.kind, SupplementKind::Scan);
    assert_eq!(supplement.attributes.get("page"), Some("0"));
    assert_eq!(supplement.bytes().unwrap(), png_bytes(7));

    let image = doc.page_image(0).unwrap();
    assert_eq!(image.attributes, image_attrs());
    assert_eq!(image.bytes, png_bytes(1));
}

#[test]
fn folder_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = build_document();

    let store: Arc<dyn EntryStore> =
        Arc::new(FolderEntryStore::open(dir.path().join("doc")).unwrap());
    write_document(&mut doc, &store).unwrap();

    let reopened: Arc<dyn EntryStore> =
        Arc::new(FolderEntryStore::open(dir.path().join("doc")).unwrap());
    let loaded = read_document(&reopened).unwrap();
    assert_roundtripped(&loaded);
}

#[test]
fn archive_roundtrip() {
    let mut doc = build_document();

    let target = Arc::new(ZipTargetEntryStore::new(Cursor::new(Vec::new())));
    {
        let store: Arc<dyn EntryStore> = target.clone();
        write_document(&mut doc, &store).unwrap();
    }
    let bytes = target.take_sink().unwrap().into_inner();

    let source: Arc<dyn EntryStore> =
        Arc::new(ZipSourceEntryStore::read(Cursor::new(bytes)).unwrap());
    let loaded = read_document(&source).unwrap();
    assert_roundtripped(&loaded);
}

#[test]
fn zero_font_document_omits_fonts_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::new("no-fonts");
    doc.add_page(Page::new(0, BoundingBox::new(0, 0, 100, 100), 72));

    let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
    write_document(&mut doc, &store).unwrap();
    assert!(!store.has_entry("fonts.csv"));

    let loaded = read_document(&store).unwrap();
    assert_eq!(loaded.fonts().len(), 0);
}

#[test]
fn annotation_with_deleted_word_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::new("drop-anno");
    doc.add_page(Page::new(0, BoundingBox::new(0, 0, 1000, 1000), 300));
    let ids: Vec<WordId> = (0..5).map(|i| word_id(0, 100 + i * 60)).collect();
    for (i, id) in ids.iter().enumerate() {
        doc.page_mut(0)
            .unwrap()
            .add_word(Word::new(id.bounds, format!("w{i}")));
    }
    for pair in ids.windows(2) {
        doc.set_next_word(&pair[0], &pair[1]);
    }
    doc.add_annotation(Annotation::new("span", ids[0], ids[4]));

    // Deleting the last word leaves the annotation dangling.
    doc.page_mut(0).unwrap().remove_word(&ids[4].bounds);

    let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
    write_document(&mut doc, &store).unwrap();
    let loaded = read_document(&store).unwrap();
    assert_eq!(loaded.annotations().len(), 0);
    assert_eq!(loaded.word_count(), 4);
}

#[test]
fn repeated_stores_rotate_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());

    for round in 0..3 {
        let mut doc = Document::new("rotate");
        doc.set_attribute("round", round.to_string());
        doc.add_page(Page::new(0, BoundingBox::new(0, 0, 100, 100), 72));
        write_document(&mut doc, &store).unwrap();
    }

    let old_manifests = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("entries.txt.") && n.ends_with(".old"))
                .unwrap_or(false)
        })
        .count();
    assert_eq!(old_manifests, 2);
    assert!(dir.path().join("entries.txt").is_file());

    let reloaded = read_document(&store).unwrap();
    assert_eq!(reloaded.attribute("round"), Some("2"));
}

#[test]
fn incremental_store_carries_unchanged_payloads() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
        let mut doc = build_document();
        write_document(&mut doc, &store).unwrap();
    }

    let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
    // Age the payload entries so a carried entry is distinguishable from a
    // fresh write by its update time.
    for name in ["doc-rt.0.png", "scan-0.png"] {
        let entry = store.entry(name).unwrap();
        store.put_entry(Entry::new(name, 1_000, entry.data_hash));
    }

    let mut doc = read_document(&store).unwrap();
    doc.set_attribute("touched", "yes");
    write_document(&mut doc, &store).unwrap();

    // Unchanged large payloads were carried, not rewritten.
    assert_eq!(store.entry("doc-rt.0.png").unwrap().update_time, 1_000);
    assert_eq!(store.entry("scan-0.png").unwrap().update_time, 1_000);

    // The document rebound to the target and stayed fully readable.
    let reloaded = read_document(&store).unwrap();
    assert_eq!(reloaded.attribute("touched"), Some("yes"));
    assert_roundtripped(&reloaded);
}

#[test]
fn dirty_supplement_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
        let mut doc = build_document();
        write_document(&mut doc, &store).unwrap();
    }

    let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(dir.path()).unwrap());
    let mut doc = read_document(&store).unwrap();
    doc.add_supplement(
        Supplement::new("scan-0", SupplementKind::Scan, "image/png", png_bytes(9)),
        true,
    );
    write_document(&mut doc, &store).unwrap();

    let reloaded = read_document(&store).unwrap();
    assert_eq!(
        reloaded.supplement("scan-0").unwrap().bytes().unwrap(),
        png_bytes(9)
    );
}

#[test]
fn store_to_second_folder_writes_payloads_in_full() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a");
    let second = dir.path().join("b");
    {
        let store: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(&first).unwrap());
        let mut doc = build_document();
        write_document(&mut doc, &store).unwrap();
    }

    let source: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(&first).unwrap());
    let mut doc = read_document(&source).unwrap();

    let target: Arc<dyn EntryStore> = Arc::new(FolderEntryStore::open(&second).unwrap());
    write_document(&mut doc, &target).unwrap();

    let loaded = read_document(&target).unwrap();
    assert_roundtripped(&loaded);
}
