use std::fmt;
use std::str::FromStr;

use super::attr::AttributeMap;
use super::bounds::{BoundingBox, ParseBoundsError};

/// Identifies a word by its page and bounds.
///
/// Word chains are serialized through these identifiers instead of native
/// references, so the cross-page linked structure never forms a
/// serialization cycle. Rendered as `<pageId>.<bounds>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordId {
    pub page_id: u16,
    pub bounds: BoundingBox,
}

impl WordId {
    pub fn new(page_id: u16, bounds: BoundingBox) -> Self {
        WordId { page_id, bounds }
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.page_id, self.bounds)
    }
}

impl FromStr for WordId {
    type Err = ParseBoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (page, bounds) = s
            .split_once('.')
            .ok_or_else(|| ParseBoundsError(s.to_string()))?;
        let page_id = page
            .parse::<u16>()
            .map_err(|_| ParseBoundsError(s.to_string()))?;
        Ok(WordId {
            page_id,
            bounds: bounds.parse()?,
        })
    }
}

/// How a word relates to its successor in the text stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NextRelation {
    /// Plain word boundary.
    #[default]
    Separate,
    /// The word is the first half of a hyphenated word.
    Hyphenated,
    /// The successor continues this word without a space.
    Continue,
    /// The word ends a paragraph.
    ParagraphEnd,
}

impl NextRelation {
    /// Single-character code used in the words table.
    pub fn code(&self) -> char {
        match self {
            NextRelation::Separate => 'S',
            NextRelation::Hyphenated => 'H',
            NextRelation::Continue => 'C',
            NextRelation::ParagraphEnd => 'P',
        }
    }

    /// Decode a relation code; unknown codes read as [NextRelation::Separate].
    pub fn from_code(code: char) -> NextRelation {
        match code {
            'H' => NextRelation::Hyphenated,
            'C' => NextRelation::Continue,
            'P' => NextRelation::ParagraphEnd,
            _ => NextRelation::Separate,
        }
    }
}

/// A layout word on a page, linked into a text stream.
///
/// `prev` and `next` may point across pages. Only chain heads (words with no
/// predecessor) carry a text stream type.
#[derive(Debug, Clone)]
pub struct Word {
    pub bounds: BoundingBox,
    pub string: String,
    pub prev: Option<WordId>,
    pub next: Option<WordId>,
    pub next_relation: NextRelation,
    pub text_stream_type: Option<String>,
    pub attributes: AttributeMap,
}

impl Word {
    pub fn new(bounds: BoundingBox, string: impl Into<String>) -> Self {
        Word {
            bounds,
            string: string.into(),
            prev: None,
            next: None,
            next_relation: NextRelation::default(),
            text_stream_type: None,
            attributes: AttributeMap::new(),
        }
    }

    /// True if this word heads a text stream.
    pub fn is_chain_head(&self) -> bool {
        self.prev.is_none()
    }
}

/// A typed geometric region on a page (block, column, table, graphic, ...).
#[derive(Debug, Clone)]
pub struct Region {
    pub region_type: String,
    pub bounds: BoundingBox,
    pub attributes: AttributeMap,
}

impl Region {
    pub fn new(region_type: impl Into<String>, bounds: BoundingBox) -> Self {
        Region {
            region_type: region_type.into(),
            bounds,
            attributes: AttributeMap::new(),
        }
    }
}

/// One page of a document: bounds, image resolution, words and regions.
#[derive(Debug, Clone)]
pub struct Page {
    id: u16,
    pub bounds: BoundingBox,
    pub image_dpi: u16,
    pub attributes: AttributeMap,
    words: Vec<Word>,
    regions: Vec<Region>,
}

impl Page {
    pub fn new(id: u16, bounds: BoundingBox, image_dpi: u16) -> Self {
        Page {
            id,
            bounds,
            image_dpi,
            attributes: AttributeMap::new(),
            words: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }

    /// Add a word to this page. The word's identifier is its bounds; adding
    /// a second word with identical bounds replaces the first.
    pub fn add_word(&mut self, word: Word) {
        match self.words.iter().position(|w| w.bounds == word.bounds) {
            Some(idx) => self.words[idx] = word,
            None => self.words.push(word),
        }
    }

    /// Remove the word at `bounds`, if present. Chain links of neighboring
    /// words are left untouched; a dangling reference is dropped on the next
    /// store/load cycle.
    pub fn remove_word(&mut self, bounds: &BoundingBox) -> Option<Word> {
        let idx = self.words.iter().position(|w| &w.bounds == bounds)?;
        Some(self.words.remove(idx))
    }

    pub fn word(&self, bounds: &BoundingBox) -> Option<&Word> {
        self.words.iter().find(|w| &w.bounds == bounds)
    }

    pub fn word_mut(&mut self, bounds: &BoundingBox) -> Option<&mut Word> {
        self.words.iter_mut().find(|w| &w.bounds == bounds)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub fn add_region(&mut self, region: Region) {
        self.regions.push(region);
    }

    /// Find a region by its dedup key (type and bounds).
    pub fn region_mut(&mut self, region_type: &str, bounds: &BoundingBox) -> Option<&mut Region> {
        self.regions
            .iter_mut()
            .find(|r| r.region_type == region_type && &r.bounds == bounds)
    }
}
