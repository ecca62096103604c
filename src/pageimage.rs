//! Page image metadata and the adapter bridging entry stores to page
//! image data.
//!
//! Two on-disk encodings exist. The current format stores raw image bytes
//! and keeps the geometry in the `pageImages.csv` side table. The legacy
//! format prepends a 16-byte header of eight big-endian u16 fields to the
//! image bytes. Which one applies is decided per page by sniffing the PNG
//! signature at stream start.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, RwLock};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::attrs;
use crate::doc::AttributeMap;
use crate::store::{Entry, EntryStore, StoreError};

/// First four bytes of a PNG stream.
pub const PNG_SIGNATURE: [u8; 4] = [0x89, b'P', b'N', b'G'];

/// Per-page geometry mapping a stored bitmap back to logical page
/// coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageImageAttributes {
    pub original_width: u16,
    pub original_height: u16,
    pub original_dpi: u16,
    pub current_dpi: u16,
    pub left_edge: u16,
    pub right_edge: u16,
    pub top_edge: u16,
    pub bottom_edge: u16,
}

impl PageImageAttributes {
    /// Size of the legacy inline header in bytes.
    pub const HEADER_SIZE: usize = 16;

    /// Read the legacy 16-byte header.
    pub fn read_header<R: Read>(reader: &mut R) -> io::Result<PageImageAttributes> {
        Ok(PageImageAttributes {
            original_width: reader.read_u16::<BigEndian>()?,
            original_height: reader.read_u16::<BigEndian>()?,
            original_dpi: reader.read_u16::<BigEndian>()?,
            current_dpi: reader.read_u16::<BigEndian>()?,
            left_edge: reader.read_u16::<BigEndian>()?,
            right_edge: reader.read_u16::<BigEndian>()?,
            top_edge: reader.read_u16::<BigEndian>()?,
            bottom_edge: reader.read_u16::<BigEndian>()?,
        })
    }

    /// Write the legacy 16-byte header.
    pub fn write_header<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(self.original_width)?;
        writer.write_u16::<BigEndian>(self.original_height)?;
        writer.write_u16::<BigEndian>(self.original_dpi)?;
        writer.write_u16::<BigEndian>(self.current_dpi)?;
        writer.write_u16::<BigEndian>(self.left_edge)?;
        writer.write_u16::<BigEndian>(self.right_edge)?;
        writer.write_u16::<BigEndian>(self.top_edge)?;
        writer.write_u16::<BigEndian>(self.bottom_edge)?;
        Ok(())
    }

    /// Render as linearizable attributes for the side table.
    pub fn to_attributes(&self) -> AttributeMap {
        [
            (attrs::ORIGINAL_WIDTH, self.original_width),
            (attrs::ORIGINAL_HEIGHT, self.original_height),
            (attrs::ORIGINAL_DPI, self.original_dpi),
            (attrs::CURRENT_DPI, self.current_dpi),
            (attrs::LEFT_EDGE, self.left_edge),
            (attrs::RIGHT_EDGE, self.right_edge),
            (attrs::TOP_EDGE, self.top_edge),
            (attrs::BOTTOM_EDGE, self.bottom_edge),
        ]
        .into_iter()
        .map(|(name, value)| (name, value.to_string()))
        .collect()
    }

    /// Rebuild from side table attributes; absent or malformed fields read
    /// as zero.
    pub fn from_attributes(attrs_map: &AttributeMap) -> PageImageAttributes {
        let field = |name: &str| -> u16 {
            attrs_map
                .get(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        PageImageAttributes {
            original_width: field(attrs::ORIGINAL_WIDTH),
            original_height: field(attrs::ORIGINAL_HEIGHT),
            original_dpi: field(attrs::ORIGINAL_DPI),
            current_dpi: field(attrs::CURRENT_DPI),
            left_edge: field(attrs::LEFT_EDGE),
            right_edge: field(attrs::RIGHT_EDGE),
            top_edge: field(attrs::TOP_EDGE),
            bottom_edge: field(attrs::BOTTOM_EDGE),
        }
    }
}

/// A page image: its geometry attributes and the raw image bytes (header
/// stripped for legacy payloads).
#[derive(Debug, Clone)]
pub struct PageImage {
    pub attributes: PageImageAttributes,
    pub bytes: Vec<u8>,
}

/// Bridges an entry store to per-page image data, choosing table-driven or
/// legacy inline-header decoding by signature sniffing.
///
/// Attributes are cached in memory per process so repeated queries never
/// re-read the store. Stores always write the table-based form; sniffing
/// stays authoritative on read, so a non-PNG payload written through the new
/// form would decode as legacy on reload. That quirk is inherited from the
/// format itself.
pub struct PageImageSource {
    store: Arc<dyn EntryStore>,
    doc_id: String,
    table: HashMap<u16, PageImageAttributes>,
    cache: RwLock<HashMap<u16, PageImageAttributes>>,
}

impl PageImageSource {
    /// Create a source over `store`. `table` is the parsed side table, if
    /// the document carried one.
    pub fn new(
        store: Arc<dyn EntryStore>,
        doc_id: impl Into<String>,
        table: Option<HashMap<u16, PageImageAttributes>>,
    ) -> PageImageSource {
        PageImageSource {
            store,
            doc_id: doc_id.into(),
            table: table.unwrap_or_default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The payload entry name for a page: `<docId>.<pageId>.png`, falling
    /// back to a prefix scan for legacy extensions.
    pub fn entry_name(&self, page_id: u16) -> Option<String> {
        let exact = format!("{}.{}.png", self.doc_id, page_id);
        if self.store.has_entry(&exact) {
            return Some(exact);
        }
        let prefix = format!("{}.{}.", self.doc_id, page_id);
        self.store
            .entries()
            .into_iter()
            .map(|e| e.name)
            .find(|name| name.starts_with(&prefix) && !name.ends_with(".csv"))
    }

    /// The payload entry for a page, if one is stored.
    pub(crate) fn entry(&self, page_id: u16) -> Option<Entry> {
        let name = self.entry_name(page_id)?;
        self.store.entry(&name)
    }

    /// The geometry attributes of a page image.
    ///
    /// Resolution order: process cache, side table, payload sniff. For a
    /// PNG payload with no side table row this fails, since the new format
    /// keeps no inline geometry.
    pub fn attributes(&self, page_id: u16) -> Result<PageImageAttributes, StoreError> {
        if let Some(cached) = self
            .cache
            .read()
            .expect("page image cache poisoned")
            .get(&page_id)
        {
            return Ok(*cached);
        }
        if let Some(from_table) = self.table.get(&page_id) {
            self.cache
                .write()
                .expect("page image cache poisoned")
                .insert(page_id, *from_table);
            return Ok(*from_table);
        }
        let (attributes, _) = self.open(page_id)?;
        Ok(attributes)
    }

    /// Open a page image: its attributes plus a reader over the raw image
    /// bytes (legacy header already consumed).
    pub fn open(&self, page_id: u16) -> Result<(PageImageAttributes, Box<dyn Read>), StoreError> {
        let name = self
            .entry_name(page_id)
            .ok_or_else(|| StoreError::EntryNotFound(format!("page image {page_id}")))?;
        let mut stream = self.store.input_stream(&name)?;

        let mut signature = [0u8; 4];
        stream.read_exact(&mut signature)?;

        let (attributes, reader): (PageImageAttributes, Box<dyn Read>) =
            if signature == PNG_SIGNATURE {
                // New format: geometry lives in the side table only.
                let attributes = self.table.get(&page_id).copied().ok_or_else(|| {
                    StoreError::EntryNotFound(format!(
                        "page image attributes for page {page_id}"
                    ))
                })?;
                (attributes, Box::new(Cursor::new(signature.to_vec()).chain(stream)))
            } else {
                // Legacy format: the sniffed bytes open a 16-byte header.
                let mut header = [0u8; PageImageAttributes::HEADER_SIZE];
                header[..4].copy_from_slice(&signature);
                stream.read_exact(&mut header[4..])?;
                let attributes =
                    PageImageAttributes::read_header(&mut Cursor::new(header.as_slice()))?;
                (attributes, stream)
            };

        self.cache
            .write()
            .expect("page image cache poisoned")
            .insert(page_id, attributes);
        Ok((attributes, reader))
    }

    /// Read a whole page image into memory.
    pub fn page_image(&self, page_id: u16) -> Result<PageImage, StoreError> {
        let (attributes, mut reader) = self.open(page_id)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(PageImage { attributes, bytes })
    }
}

impl fmt::Debug for PageImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImageSource")
            .field("doc_id", &self.doc_id)
            .field("table", &self.table.len())
            .finish_non_exhaustive()
    }
}
