//! Reading and writing documents against an entry store.
//!
//! A document is nine ordered tabular sections plus binary payloads. Three
//! sections are mandatory: the document table, the page table and the word
//! table. Everything else is optional and simply absent in older or smaller
//! documents.

mod reader;
mod writer;

pub use reader::{read_document, read_document_attributes, read_document_with_progress};
pub use writer::{write_document, write_document_with_options};

use crate::store::StoreError;

// Section entry names.
pub(crate) const DOCUMENT_CSV: &str = "document.csv";
pub(crate) const PAGES_CSV: &str = "pages.csv";
pub(crate) const WORDS_CSV: &str = "words.csv";
pub(crate) const FONTS_CSV: &str = "fonts.csv";
pub(crate) const REGIONS_CSV: &str = "regions.csv";
pub(crate) const ANNOTATIONS_CSV: &str = "annotations.csv";
pub(crate) const PAGE_IMAGES_CSV: &str = "pageImages.csv";
pub(crate) const SUPPLEMENTS_CSV: &str = "supplements.csv";

// Column keys shared by reader and writer.
pub(crate) const KEY_DOC_ID: &str = "docId";
pub(crate) const KEY_PAGE_ID: &str = "pageId";
pub(crate) const KEY_BOUNDS: &str = "bounds";
pub(crate) const KEY_IMAGE_DPI: &str = "imageDpi";
pub(crate) const KEY_STRING: &str = "string";
pub(crate) const KEY_PREV_WORD: &str = "prevWord";
pub(crate) const KEY_NEXT_RELATION: &str = "nextRelation";
pub(crate) const KEY_TEXT_STREAM_TYPE: &str = "textStreamType";
pub(crate) const KEY_TYPE: &str = "type";
pub(crate) const KEY_FIRST_WORD: &str = "firstWord";
pub(crate) const KEY_LAST_WORD: &str = "lastWord";
pub(crate) const KEY_NAME: &str = "name";
pub(crate) const KEY_CHAR_ID: &str = "charId";
pub(crate) const KEY_CHAR_STRING: &str = "charString";
pub(crate) const KEY_CHAR_IMAGE: &str = "charImage";
pub(crate) const KEY_ID: &str = "id";
pub(crate) const KEY_MIME_TYPE: &str = "mimeType";
pub(crate) const KEY_ATTRIBUTES: &str = "attributes";

/// Errors aborting a document load.
///
/// Only mandatory sections abort: a failure scoped to an optional section is
/// treated as "section absent" and recovered silently.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("missing mandatory section '{0}'")]
    MissingSection(&'static str),
    #[error("document table carries no document id")]
    MissingDocumentId,
    #[error("malformed {section} row: {detail}")]
    MalformedRow {
        section: &'static str,
        detail: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors aborting a document store.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Buffered-vs-direct strategy for the bulk tabular sections (words,
/// regions, annotations, fonts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Estimate the serialized word volume and switch to direct writes for
    /// large documents.
    #[default]
    Auto,
    /// Always buffer entry bytes in memory until close.
    Buffered,
    /// Always write through a temp file from the first byte.
    Direct,
}

/// Options for [write_document_with_options].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mode: WriteMode,
}

/// Rough serialized size of one word table row.
pub(crate) const WORD_ROW_BYTES: u64 = 100;

/// Estimated bulk volume above which [WriteMode::Auto] forces direct writes.
pub(crate) const DIRECT_WRITE_THRESHOLD: u64 = 64 * 1024 * 1024;
