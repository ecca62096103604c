use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tempfile::TempDir;

use super::{now_millis, Entry, EntryList, EntryStore, EntryWrite, StoreError};
use crate::hashing::HashingWriter;

/// A transient entry store: pure in-memory, or backed by a scratch folder
/// for documents too large to hold in memory.
///
/// Caches report no stable identity, so storing a document loaded through a
/// cache always rewrites large payloads in full. Scratch files are plain
/// (no content addressing, no manifest) and vanish with the store.
pub struct CacheEntryStore {
    entries: Arc<RwLock<EntryList>>,
    backing: Backing,
}

enum Backing {
    Memory(Arc<RwLock<HashMap<String, Arc<[u8]>>>>),
    Scratch(Arc<TempDir>),
}

impl CacheEntryStore {
    /// A cache holding all entry bytes in memory.
    pub fn in_memory() -> CacheEntryStore {
        CacheEntryStore {
            entries: Arc::new(RwLock::new(EntryList::default())),
            backing: Backing::Memory(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    /// A cache backed by a fresh scratch folder under the system temp dir.
    pub fn scratch() -> Result<CacheEntryStore, StoreError> {
        Ok(CacheEntryStore {
            entries: Arc::new(RwLock::new(EntryList::default())),
            backing: Backing::Scratch(Arc::new(tempfile::tempdir()?)),
        })
    }

    /// Number of current entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("entry list poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scratch_path(dir: &TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }
}

impl std::fmt::Debug for CacheEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.backing {
            Backing::Memory(_) => "memory",
            Backing::Scratch(_) => "scratch",
        };
        f.debug_struct("CacheEntryStore")
            .field("backing", &backing)
            .field("entries", &self.len())
            .finish()
    }
}

impl EntryStore for CacheEntryStore {
    fn has_entry_data(&self, entry: &Entry) -> bool {
        match self
            .entries
            .read()
            .expect("entry list poisoned")
            .get(&entry.name)
        {
            Some(current) => current.data_hash == entry.data_hash,
            None => false,
        }
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.entries.read().expect("entry list poisoned").get(name)
    }

    fn entries(&self) -> Vec<Entry> {
        self.entries.read().expect("entry list poisoned").all()
    }

    fn put_entry(&self, entry: Entry) -> Option<Entry> {
        self.entries.write().expect("entry list poisoned").put(entry)
    }

    fn input_stream(&self, name: &str) -> Result<Box<dyn Read>, StoreError> {
        if !self.has_entry(name) {
            return Err(StoreError::EntryNotFound(name.to_string()));
        }
        match &self.backing {
            Backing::Memory(map) => {
                let bytes = map
                    .read()
                    .expect("cache map poisoned")
                    .get(name)
                    .cloned()
                    .ok_or_else(|| StoreError::EntryNotFound(name.to_string()))?;
                Ok(Box::new(Cursor::new(bytes)))
            }
            Backing::Scratch(dir) => {
                let file = File::open(Self::scratch_path(dir, name))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    fn output_stream(
        &self,
        name: &str,
        _write_directly: bool,
    ) -> Result<Box<dyn EntryWrite + '_>, StoreError> {
        Ok(Box::new(CacheEntryWriter {
            name: name.to_string(),
            entries: Arc::clone(&self.entries),
            buffer: HashingWriter::new(Vec::new()),
            sink: match &self.backing {
                Backing::Memory(map) => Sink::Memory(Arc::clone(map)),
                Backing::Scratch(dir) => Sink::Scratch(Arc::clone(dir)),
            },
        }))
    }

    fn store_id(&self) -> Option<String> {
        None
    }
}

enum Sink {
    Memory(Arc<RwLock<HashMap<String, Arc<[u8]>>>>),
    Scratch(Arc<TempDir>),
}

struct CacheEntryWriter {
    name: String,
    entries: Arc<RwLock<EntryList>>,
    buffer: HashingWriter<Vec<u8>>,
    sink: Sink,
}

impl Write for CacheEntryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl EntryWrite for CacheEntryWriter {
    fn close(self: Box<Self>) -> Result<Entry, StoreError> {
        let CacheEntryWriter {
            name,
            entries,
            buffer,
            sink,
        } = *self;
        let (bytes, hash, _) = buffer.finalize();

        match &sink {
            Sink::Memory(map) => {
                map.write()
                    .expect("cache map poisoned")
                    .insert(name.clone(), bytes.into());
            }
            Sink::Scratch(dir) => {
                std::fs::write(CacheEntryStore::scratch_path(dir, &name), &bytes)?;
            }
        }

        let entry = Entry::new(name, now_millis(), hash);
        entries
            .write()
            .expect("entry list poisoned")
            .put(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(store: &CacheEntryStore) {
        let mut w = store.output_stream("words.csv", false).unwrap();
        w.write_all(b"cached bytes").unwrap();
        let entry = w.close().unwrap();

        assert!(store.has_entry("words.csv"));
        assert!(store.has_entry_data(&entry));
        assert!(store.store_id().is_none());

        let mut out = Vec::new();
        store
            .input_stream("words.csv")
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"cached bytes");
    }

    #[test]
    fn test_memory_roundtrip() {
        roundtrip(&CacheEntryStore::in_memory());
    }

    #[test]
    fn test_scratch_roundtrip() {
        roundtrip(&CacheEntryStore::scratch().unwrap());
    }

    #[test]
    fn test_missing_entry() {
        let store = CacheEntryStore::in_memory();
        assert!(matches!(
            store.input_stream("nope"),
            Err(StoreError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_overwrite_replaces_bytes() {
        let store = CacheEntryStore::in_memory();
        for payload in [b"one".as_slice(), b"two".as_slice()] {
            let mut w = store.output_stream("x", false).unwrap();
            w.write_all(payload).unwrap();
            w.close().unwrap();
        }
        let mut out = Vec::new();
        store.input_stream("x").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"two");
        assert_eq!(store.len(), 1);
    }
}
