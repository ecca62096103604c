//! Herein lies the brains of the Image Markup File (IMF) document format.
//!
//! An IMF document is a set of logical entries (tabular sections plus binary
//! page images and supplements) kept in an [EntryStore][store::EntryStore]:
//! a folder with a manifest, a ZIP archive, or a transient cache. Use
//! [read_document][file::read_document] to reconstruct the document graph and
//! [write_document][file::write_document] to persist it.

pub mod attrs;
mod csv;
pub mod doc;
pub mod encode;
pub mod file;
pub mod hashing;
pub mod pageimage;
mod progress;
pub mod store;

pub use doc::{
    Annotation, AttributeMap, BoundingBox, Document, DocumentListener, Font, FontChar,
    NextRelation, Page, Region, Supplement, SupplementData, SupplementKind, Word, WordId,
};
pub use file::{
    read_document, read_document_attributes, read_document_with_progress, write_document,
    write_document_with_options, ReadError, WriteError, WriteMode, WriteOptions,
};
pub use pageimage::{PageImage, PageImageAttributes, PageImageSource};
pub use progress::{NullProgress, Progress};
pub use store::{
    CacheEntryStore, Entry, EntryStore, EntryWrite, FolderEntryStore, StoreError,
    ZipSourceEntryStore, ZipTargetEntryStore,
};
