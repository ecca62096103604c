//! The in-memory Image Markup document graph.
//!
//! A [Document] owns its pages, fonts, annotations and supplements. Words
//! link into cross-page text streams through [WordId] references rather than
//! native pointers, so the graph flattens into tables without cycles.

mod attr;
mod bounds;
mod font;
mod page;
mod supplement;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub use attr::AttributeMap;
pub use bounds::{BoundingBox, ParseBoundsError};
pub use font::{Font, FontChar};
pub use page::{NextRelation, Page, Region, Word, WordId};
pub use supplement::{Supplement, SupplementData, SupplementKind};

use crate::pageimage::{PageImage, PageImageSource};
use crate::store::{EntryStore, StoreError};

/// A logical annotation spanning the word chain from `first` to `last`.
///
/// Annotations are not geometrically bounded; they follow the text stream.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub annotation_type: String,
    pub first: WordId,
    pub last: WordId,
    pub attributes: AttributeMap,
}

impl Annotation {
    pub fn new(annotation_type: impl Into<String>, first: WordId, last: WordId) -> Self {
        Annotation {
            annotation_type: annotation_type.into(),
            first,
            last,
            attributes: AttributeMap::new(),
        }
    }
}

/// Receives change notifications from a [Document].
///
/// All callbacks have empty default bodies.
pub trait DocumentListener {
    /// A document attribute was set or removed. `old` is the previous value.
    fn attribute_changed(&self, name: &str, old: Option<&str>) {
        let _ = (name, old);
    }

    /// A supplement was added or replaced.
    fn supplement_added(&self, id: &str) {
        let _ = id;
    }
}

/// Where a loaded document came from: the store and the page image source
/// bound over it.
pub(crate) struct SourceBinding {
    pub(crate) store: Arc<dyn EntryStore>,
    pub(crate) store_id: Option<String>,
    pub(crate) images: Arc<PageImageSource>,
}

/// The root aggregate of an Image Markup document.
pub struct Document {
    doc_id: String,
    attributes: AttributeMap,
    pages: Vec<Page>,
    fonts: Vec<Font>,
    annotations: Vec<Annotation>,
    supplements: Vec<Supplement>,
    dirty_supplements: HashSet<String>,
    replaced_images: HashMap<u16, PageImage>,
    source: Option<SourceBinding>,
    listeners: Vec<Box<dyn DocumentListener>>,
}

impl Document {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Document {
            doc_id: doc_id.into(),
            attributes: AttributeMap::new(),
            pages: Vec::new(),
            fonts: Vec::new(),
            annotations: Vec::new(),
            supplements: Vec::new(),
            dirty_supplements: HashSet::new(),
            replaced_images: HashMap::new(),
            source: None,
            listeners: Vec::new(),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    // --- attributes ---

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)
    }

    /// Set a document attribute and notify listeners.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        let old = self.attributes.set(name, value);
        for listener in &self.listeners {
            listener.attribute_changed(name, old.as_deref());
        }
        old
    }

    /// Remove a document attribute and notify listeners.
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let old = self.attributes.remove(name);
        if old.is_some() {
            for listener in &self.listeners {
                listener.attribute_changed(name, old.as_deref());
            }
        }
        old
    }

    pub fn add_listener(&mut self, listener: Box<dyn DocumentListener>) {
        self.listeners.push(listener);
    }

    // --- pages and words ---

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut [Page] {
        &mut self.pages
    }

    pub fn page(&self, id: u16) -> Option<&Page> {
        self.pages.iter().find(|p| p.id() == id)
    }

    pub fn page_mut(&mut self, id: u16) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id() == id)
    }

    /// Add a page. A page with the same id replaces the existing one.
    pub fn add_page(&mut self, page: Page) {
        match self.pages.iter().position(|p| p.id() == page.id()) {
            Some(idx) => self.pages[idx] = page,
            None => self.pages.push(page),
        }
    }

    pub fn word(&self, id: &WordId) -> Option<&Word> {
        self.page(id.page_id)?.word(&id.bounds)
    }

    pub fn word_mut(&mut self, id: &WordId) -> Option<&mut Word> {
        self.page_mut(id.page_id)?.word_mut(&id.bounds)
    }

    pub fn next_word(&self, id: &WordId) -> Option<&Word> {
        let next = self.word(id)?.next?;
        self.word(&next)
    }

    pub fn prev_word(&self, id: &WordId) -> Option<&Word> {
        let prev = self.word(id)?.prev?;
        self.word(&prev)
    }

    /// Link two words into a chain: `a.next = b`, `b.prev = a`.
    ///
    /// `b` stops being a chain head, so its text stream tag is cleared.
    /// Returns false (and changes nothing) if either word is missing.
    pub fn set_next_word(&mut self, a: &WordId, b: &WordId) -> bool {
        if self.word(a).is_none() || self.word(b).is_none() {
            return false;
        }
        if let Some(word) = self.word_mut(a) {
            word.next = Some(*b);
        }
        if let Some(word) = self.word_mut(b) {
            word.prev = Some(*a);
            word.text_stream_type = None;
        }
        true
    }

    /// Identifiers of all chain heads, in page and word order.
    pub fn chain_heads(&self) -> Vec<WordId> {
        let mut heads = Vec::new();
        for page in &self.pages {
            for word in page.words() {
                if word.is_chain_head() {
                    heads.push(WordId::new(page.id(), word.bounds));
                }
            }
        }
        heads
    }

    /// Walk the text stream starting at `head`, following `next` links.
    ///
    /// The iterator stops at a dangling reference and guards against cycles
    /// in corrupt chains.
    pub fn text_stream(&self, head: WordId) -> TextStream<'_> {
        TextStream {
            doc: self,
            next: Some(head),
            seen: HashSet::new(),
        }
    }

    /// Total word count across all pages.
    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.words().len()).sum()
    }

    // --- fonts ---

    pub fn fonts(&self) -> &[Font] {
        &self.fonts
    }

    pub fn font(&self, name: &str) -> Option<&Font> {
        self.fonts.iter().find(|f| f.name() == name)
    }

    pub fn font_mut(&mut self, name: &str) -> Option<&mut Font> {
        self.fonts.iter_mut().find(|f| f.name() == name)
    }

    /// Add a font. A font with the same name replaces the existing one.
    pub fn add_font(&mut self, font: Font) {
        match self.fonts.iter().position(|f| f.name() == font.name()) {
            Some(idx) => self.fonts[idx] = font,
            None => self.fonts.push(font),
        }
    }

    // --- annotations ---

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut Vec<Annotation> {
        &mut self.annotations
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    // --- supplements ---

    pub fn supplements(&self) -> &[Supplement] {
        &self.supplements
    }

    pub fn supplement(&self, id: &str) -> Option<&Supplement> {
        self.supplements.iter().find(|s| s.id() == id)
    }

    pub fn supplement_mut(&mut self, id: &str) -> Option<&mut Supplement> {
        self.supplements.iter_mut().find(|s| s.id() == id)
    }

    /// Add a supplement and notify listeners.
    ///
    /// `is_edit` marks the payload dirty, forcing its bytes to be rewritten
    /// on the next store. Loading replays stored supplements with
    /// `is_edit = false`, since they reflect prior state rather than a new
    /// edit.
    pub fn add_supplement(&mut self, supplement: Supplement, is_edit: bool) {
        let id = supplement.id().to_string();
        if is_edit {
            self.dirty_supplements.insert(id.clone());
        }
        match self.supplements.iter().position(|s| s.id() == id) {
            Some(idx) => self.supplements[idx] = supplement,
            None => self.supplements.push(supplement),
        }
        for listener in &self.listeners {
            listener.supplement_added(&id);
        }
    }

    /// True if the supplement's payload was edited since load.
    pub fn is_supplement_dirty(&self, id: &str) -> bool {
        self.dirty_supplements.contains(id)
    }

    // --- page images ---

    /// Replace the image of a page. The replacement is written in full on
    /// the next store.
    pub fn set_page_image(&mut self, page_id: u16, image: PageImage) {
        self.replaced_images.insert(page_id, image);
    }

    /// The image of a page: a replacement if one was set, else the bound
    /// source.
    pub fn page_image(&self, page_id: u16) -> Result<PageImage, StoreError> {
        if let Some(image) = self.replaced_images.get(&page_id) {
            return Ok(image.clone());
        }
        match &self.source {
            Some(binding) => binding.images.page_image(page_id),
            None => Err(StoreError::EntryNotFound(format!(
                "page image {page_id}"
            ))),
        }
    }

    pub(crate) fn replaced_image(&self, page_id: u16) -> Option<&PageImage> {
        self.replaced_images.get(&page_id)
    }

    // --- source binding ---

    pub(crate) fn source(&self) -> Option<&SourceBinding> {
        self.source.as_ref()
    }

    /// The identity of the store this document was loaded from, if any.
    pub fn source_store_id(&self) -> Option<&str> {
        self.source.as_ref()?.store_id.as_deref()
    }

    pub(crate) fn bind_source(&mut self, store: Arc<dyn EntryStore>, images: Arc<PageImageSource>) {
        let store_id = store.store_id();
        self.source = Some(SourceBinding {
            store,
            store_id,
            images,
        });
    }

    /// Rebind the document to the store it was just written to: the new
    /// store becomes the source, replacements and dirty marks are settled.
    pub(crate) fn rebind(&mut self, store: Arc<dyn EntryStore>, images: Arc<PageImageSource>) {
        for supplement in &mut self.supplements {
            supplement.rebind(&store);
        }
        self.replaced_images.clear();
        self.dirty_supplements.clear();
        self.bind_source(store, images);
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("doc_id", &self.doc_id)
            .field("pages", &self.pages.len())
            .field("words", &self.word_count())
            .field("fonts", &self.fonts.len())
            .field("annotations", &self.annotations.len())
            .field("supplements", &self.supplements.len())
            .finish_non_exhaustive()
    }
}

/// Iterator over a text stream, produced by [Document::text_stream].
pub struct TextStream<'a> {
    doc: &'a Document,
    next: Option<WordId>,
    seen: HashSet<WordId>,
}

impl<'a> Iterator for TextStream<'a> {
    type Item = (WordId, &'a Word);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if !self.seen.insert(id) {
            tracing::warn!("cycle in text stream at word {id}, stopping traversal");
            return None;
        }
        let word = self.doc.word(&id)?;
        self.next = word.next;
        Some((id, word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_page_doc() -> Document {
        let mut doc = Document::new("doc-1");
        for id in 0..2u16 {
            doc.add_page(Page::new(id, BoundingBox::new(0, 0, 1000, 1500), 300));
        }
        doc
    }

    #[test]
    fn test_cross_page_chain() {
        let mut doc = two_page_doc();
        let a = WordId::new(0, BoundingBox::new(10, 10, 60, 30));
        let b = WordId::new(1, BoundingBox::new(10, 10, 70, 30));
        doc.page_mut(0).unwrap().add_word(Word::new(a.bounds, "first"));
        doc.page_mut(1).unwrap().add_word(Word::new(b.bounds, "second"));

        assert!(doc.set_next_word(&a, &b));
        assert_eq!(doc.next_word(&a).unwrap().string, "second");
        assert_eq!(doc.prev_word(&b).unwrap().string, "first");
        assert_eq!(doc.chain_heads(), vec![a]);

        let stream: Vec<String> = doc
            .text_stream(a)
            .map(|(_, w)| w.string.clone())
            .collect();
        assert_eq!(stream, ["first", "second"]);
    }

    #[test]
    fn test_text_stream_cycle_guard() {
        let mut doc = two_page_doc();
        let a = WordId::new(0, BoundingBox::new(0, 0, 10, 10));
        let b = WordId::new(0, BoundingBox::new(20, 0, 30, 10));
        doc.page_mut(0).unwrap().add_word(Word::new(a.bounds, "a"));
        doc.page_mut(0).unwrap().add_word(Word::new(b.bounds, "b"));
        doc.set_next_word(&a, &b);
        // Corrupt the chain into a cycle.
        doc.word_mut(&b).unwrap().next = Some(a);

        let count = doc.text_stream(a).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_supplement_dirty_tracking() {
        let mut doc = two_page_doc();
        doc.add_supplement(
            Supplement::new("clean", SupplementKind::Scan, "image/png", vec![1u8]),
            false,
        );
        doc.add_supplement(
            Supplement::new("edited", SupplementKind::Figure, "image/png", vec![2u8]),
            true,
        );
        assert!(!doc.is_supplement_dirty("clean"));
        assert!(doc.is_supplement_dirty("edited"));
    }

    #[test]
    fn test_listener_notifications() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Default)]
        struct Recorder {
            events: Rc<RefCell<Vec<String>>>,
        }
        impl DocumentListener for Recorder {
            fn attribute_changed(&self, name: &str, _old: Option<&str>) {
                self.events.borrow_mut().push(format!("attr:{name}"));
            }
            fn supplement_added(&self, id: &str) {
                self.events.borrow_mut().push(format!("supp:{id}"));
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut doc = two_page_doc();
        doc.add_listener(Box::new(Recorder {
            events: Rc::clone(&events),
        }));

        doc.set_attribute("title", "On Testing");
        doc.add_supplement(
            Supplement::new("s", SupplementKind::Source, "application/pdf", vec![0u8]),
            true,
        );
        assert_eq!(*events.borrow(), ["attr:title", "supp:s"]);
    }
}
