//! Entry stores: logical names mapped to content-addressed bytes.
//!
//! Four backings implement one contract: a folder with a manifest, a
//! streaming ZIP source, a ZIP target wrapping an open archive writer, and a
//! transient cache. All implementations must satisfy these invariants:
//! - At most one current entry per logical name; entries keep insertion order.
//! - An output stream registers its entry only at `close()`; a dropped,
//!   unclosed stream registers nothing.
//! - Physical data is content addressed by MD5 where the backing persists
//!   (folder storage); identical bytes are stored once.
//! - Every publish ends in a rename, so a mid-write failure leaves prior
//!   state untouched.

mod cache;
mod folder;
mod zip;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

pub use cache::CacheEntryStore;
pub use folder::{FolderEntryStore, MANIFEST_NAME};
pub use zip::{ZipSourceEntryStore, ZipTargetEntryStore};

/// Errors raised by entry stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entry not found: '{0}'")]
    EntryNotFound(String),
    #[error("store is read-only")]
    ReadOnly,
    #[error("store is write-only")]
    WriteOnly,
    #[error("archive error: {0}")]
    Archive(#[from] ::zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One logical entry: a name, the time it was last updated, and the MD5 of
/// its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub update_time: u64,
    /// Lowercase hex MD5 of the entry's bytes.
    pub data_hash: String,
}

impl Entry {
    pub fn new(name: impl Into<String>, update_time: u64, data_hash: impl Into<String>) -> Self {
        Entry {
            name: name.into(),
            update_time,
            data_hash: data_hash.into(),
        }
    }

    /// The physical file name: the hash inserted immediately before the
    /// final extension, or appended when there is none.
    pub fn physical_name(&self) -> String {
        match self.name.rfind('.') {
            Some(dot) => format!(
                "{}.{}.{}",
                &self.name[..dot],
                self.data_hash,
                &self.name[dot + 1..]
            ),
            None => format!("{}.{}", self.name, self.data_hash),
        }
    }

    /// Render as a tab-separated manifest line.
    pub(crate) fn to_manifest_line(&self) -> String {
        format!("{}\t{}\t{}", self.name, self.update_time, self.data_hash)
    }

    /// Parse a tab-separated manifest line.
    pub(crate) fn from_manifest_line(line: &str) -> Option<Entry> {
        let mut parts = line.split('\t');
        let name = parts.next()?;
        let update_time = parts.next()?.parse().ok()?;
        let data_hash = parts.next()?;
        if name.is_empty() || data_hash.is_empty() {
            return None;
        }
        Some(Entry::new(name, update_time, data_hash))
    }
}

/// A store of logical entries behind one of the four backings.
///
/// Methods take `&self`; implementations guard their entry list internally,
/// so a store can be shared as `Arc<dyn EntryStore>` into a loaded
/// document's source binding. The format itself is single threaded per
/// document.
pub trait EntryStore {
    /// True if a current entry exists under `name`.
    fn has_entry(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// True if the content-addressed physical data behind `entry` exists,
    /// regardless of whether the entry is current.
    fn has_entry_data(&self, entry: &Entry) -> bool;

    /// The current entry under `name`, if any.
    fn entry(&self, name: &str) -> Option<Entry>;

    /// All current entries, in insertion order.
    fn entries(&self) -> Vec<Entry>;

    /// Make `entry` current under its name, returning the entry it
    /// replaced. The physical data of a replaced entry is not deleted.
    fn put_entry(&self, entry: Entry) -> Option<Entry>;

    /// Open the current entry under `name` for reading.
    fn input_stream(&self, name: &str) -> Result<Box<dyn Read>, StoreError>;

    /// Open an output stream for `name`. The entry registers at `close()`.
    ///
    /// With `write_directly` false the stream may buffer in memory until the
    /// first flush; true forces a direct temp-file write from the start.
    fn output_stream(
        &self,
        name: &str,
        write_directly: bool,
    ) -> Result<Box<dyn EntryWrite + '_>, StoreError>;

    /// [output_stream][Self::output_stream] with the default mode: buffered
    /// while no current entry exists under `name`, direct otherwise.
    fn output(&self, name: &str) -> Result<Box<dyn EntryWrite + '_>, StoreError> {
        let write_directly = self.has_entry(name);
        self.output_stream(name, write_directly)
    }

    /// An opaque identity for persistent stores, `None` for transient ones.
    ///
    /// Equal identities let a store operation skip rewriting unchanged large
    /// payloads.
    fn store_id(&self) -> Option<String> {
        None
    }

    /// Settle the store after a successful document write: `entries` is the
    /// exact set written, in order. Folder stores replace their entry list
    /// and rotate the manifest; archive targets finish the archive; caches
    /// do nothing.
    fn finalize(&self, entries: &[Entry]) -> Result<(), StoreError> {
        let _ = entries;
        Ok(())
    }
}

/// An open entry output stream.
///
/// `close()` finalizes the content hash and registers the entry; dropping
/// without closing discards the stream.
pub trait EntryWrite: Write {
    fn close(self: Box<Self>) -> Result<Entry, StoreError>;
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An insertion-ordered name-to-entry map shared by the store backings.
#[derive(Debug, Default)]
pub(crate) struct EntryList {
    order: Vec<String>,
    map: HashMap<String, Entry>,
}

impl EntryList {
    pub(crate) fn get(&self, name: &str) -> Option<Entry> {
        self.map.get(name).cloned()
    }

    /// Insert or replace; replacement keeps the original position.
    pub(crate) fn put(&mut self, entry: Entry) -> Option<Entry> {
        match self.map.insert(entry.name.clone(), entry.clone()) {
            Some(old) => Some(old),
            None => {
                self.order.push(entry.name);
                None
            }
        }
    }

    pub(crate) fn all(&self) -> Vec<Entry> {
        self.order
            .iter()
            .filter_map(|name| self.map.get(name).cloned())
            .collect()
    }

    pub(crate) fn replace_all(&mut self, entries: &[Entry]) {
        self.order.clear();
        self.map.clear();
        for entry in entries {
            self.put(entry.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
