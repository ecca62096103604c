use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use super::attr::AttributeMap;
use crate::store::{EntryStore, StoreError};

/// The kind of an out-of-band binary payload attached to a document.
///
/// A closed union: the historical catch-all subtype survives as
/// [SupplementKind::Other] with its original tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplementKind {
    /// The source the document was digitized from (a PDF, typically).
    Source,
    /// A raw page scan.
    Scan,
    /// An extracted bitmap figure.
    Figure,
    /// Extracted vector graphics.
    Graphics,
    /// Any other payload, by its original type tag.
    Other(String),
}

impl SupplementKind {
    /// The type tag stored in the supplements table.
    pub fn tag(&self) -> &str {
        match self {
            SupplementKind::Source => "source",
            SupplementKind::Scan => "scan",
            SupplementKind::Figure => "figure",
            SupplementKind::Graphics => "graphics",
            SupplementKind::Other(tag) => tag,
        }
    }

    /// Resolve a type tag from the supplements table.
    pub fn from_tag(tag: &str) -> SupplementKind {
        match tag {
            "source" => SupplementKind::Source,
            "scan" => SupplementKind::Scan,
            "figure" => SupplementKind::Figure,
            "graphics" => SupplementKind::Graphics,
            other => SupplementKind::Other(other.to_string()),
        }
    }
}

/// Where a supplement's bytes live: in memory, or lazily bound to an entry
/// of the store the document was loaded from.
#[derive(Clone)]
pub enum SupplementData {
    Bytes(Arc<[u8]>),
    Stored {
        store: Arc<dyn EntryStore>,
        name: String,
    },
}

impl fmt::Debug for SupplementData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplementData::Bytes(bytes) => {
                f.debug_tuple("Bytes").field(&bytes.len()).finish()
            }
            SupplementData::Stored { name, .. } => {
                f.debug_struct("Stored").field("name", name).finish_non_exhaustive()
            }
        }
    }
}

/// An out-of-band binary payload attached to a document.
#[derive(Debug, Clone)]
pub struct Supplement {
    id: String,
    pub kind: SupplementKind,
    pub mime_type: String,
    pub attributes: AttributeMap,
    data: SupplementData,
}

impl Supplement {
    /// Create a supplement over in-memory bytes.
    pub fn new(
        id: impl Into<String>,
        kind: SupplementKind,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Supplement {
            id: id.into(),
            kind,
            mime_type: mime_type.into(),
            attributes: AttributeMap::new(),
            data: SupplementData::Bytes(bytes.into()),
        }
    }

    /// Create a supplement whose bytes stay in `store` under `name` until
    /// first read.
    pub fn stored(
        id: impl Into<String>,
        kind: SupplementKind,
        mime_type: impl Into<String>,
        store: Arc<dyn EntryStore>,
        name: impl Into<String>,
    ) -> Self {
        Supplement {
            id: id.into(),
            kind,
            mime_type: mime_type.into(),
            attributes: AttributeMap::new(),
            data: SupplementData::Stored {
                store,
                name: name.into(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &SupplementData {
        &self.data
    }

    /// The mime subtype, used as the payload file extension.
    pub fn mime_subtype(&self) -> &str {
        match self.mime_type.split_once('/') {
            Some((_, subtype)) => subtype,
            None => &self.mime_type,
        }
    }

    /// The entry name the payload is stored under: `<id>.<mimeSubtype>`.
    pub fn data_name(&self) -> String {
        format!("{}.{}", self.id, self.mime_subtype())
    }

    /// Open the payload for reading.
    pub fn reader(&self) -> Result<Box<dyn Read>, StoreError> {
        match &self.data {
            SupplementData::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            SupplementData::Stored { store, name } => store.input_stream(name),
        }
    }

    /// Read the whole payload into memory.
    pub fn bytes(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Rebind a lazily stored payload to another store, keeping the entry
    /// name. In-memory payloads are unaffected.
    pub(crate) fn rebind(&mut self, store: &Arc<dyn EntryStore>) {
        if let SupplementData::Stored { store: slot, .. } = &mut self.data {
            *slot = Arc::clone(store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        for kind in [
            SupplementKind::Source,
            SupplementKind::Scan,
            SupplementKind::Figure,
            SupplementKind::Graphics,
            SupplementKind::Other("sidecar".to_string()),
        ] {
            assert_eq!(SupplementKind::from_tag(kind.tag()), kind);
        }
    }

    #[test]
    fn test_data_name_uses_mime_subtype() {
        let s = Supplement::new("fig-3", SupplementKind::Figure, "image/png", vec![1u8, 2]);
        assert_eq!(s.mime_subtype(), "png");
        assert_eq!(s.data_name(), "fig-3.png");

        let s = Supplement::new("raw", SupplementKind::Scan, "octet-stream", vec![0u8]);
        assert_eq!(s.data_name(), "raw.octet-stream");
    }

    #[test]
    fn test_in_memory_bytes() {
        let s = Supplement::new("x", SupplementKind::Scan, "image/png", vec![9u8, 8, 7]);
        assert_eq!(s.bytes().unwrap(), [9, 8, 7]);
    }
}
